use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Time source used for every admission decision and elapsed measurement.
///
/// Wall clock (`now`) drives runtime-phase derivation; the monotonic instant
/// drives elapsed-time invariants so a system clock jump cannot shorten or
/// extend a running question.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
	fn monotonic(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}

	fn monotonic(&self) -> Instant {
		Instant::now()
	}
}

/// Handle for a detached timer task. Dropping the handle does NOT cancel the
/// timer; call [`TimerHandle::cancel`].
#[derive(Debug)]
pub struct TimerHandle {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl TimerHandle {
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}

/// One-shot timer: runs `callback` after `delay` unless cancelled first.
pub fn spawn_after<F>(delay: Duration, callback: F) -> TimerHandle
where
	F: FnOnce() + Send + 'static,
{
	let cancel = CancellationToken::new();
	let token = cancel.clone();

	let task = tokio::spawn(async move {
		tokio::select! {
			() = tokio::time::sleep(delay) => callback(),
			() = token.cancelled() => {}
		}
	});

	TimerHandle { cancel, task }
}

/// Periodic timer: runs `callback` every `period` until cancelled.
pub fn spawn_every<F>(period: Duration, mut callback: F) -> TimerHandle
where
	F: FnMut() + Send + 'static,
{
	let cancel = CancellationToken::new();
	let token = cancel.clone();

	let task = tokio::spawn(async move {
		let mut ticker = tokio::time::interval(period);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		// interval fires immediately; swallow the first tick
		ticker.tick().await;

		loop {
			tokio::select! {
				_ = ticker.tick() => callback(),
				() = token.cancelled() => break,
			}
		}
	});

	TimerHandle { cancel, task }
}
