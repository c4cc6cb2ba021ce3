use super::rooms::RoomRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Low-level liveness sweep. Every cycle each session gets a protocol ping;
/// a session that has not answered since the previous cycle is terminated
/// and its room membership released.
pub fn spawn_heartbeat(rooms: Arc<RoomRegistry>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.tick().await;

		loop {
			tokio::select! {
				_ = ticker.tick() => sweep(&rooms, interval),
				() = cancel.cancelled() => {
					debug!("heartbeat sweep stopped");
					break;
				}
			}
		}
	})
}

fn sweep(rooms: &RoomRegistry, interval: Duration) {
	let sessions = rooms.all_sessions();
	let mut dropped = 0usize;

	for session in sessions {
		if session.last_pong().elapsed() > interval * 2 {
			info!(session = %session.id, user = %session.user_id, "heartbeat missed, terminating session");
			rooms.remove(session.id);
			dropped += 1;
			continue;
		}
		session.ping();
	}

	if dropped > 0 {
		debug!(dropped, "heartbeat sweep removed dead sessions");
	}
}
