mod command;
mod engine;
mod state;

pub use command::ContestCommand;
pub use engine::INTERSTITIAL_GRACE;
pub use state::{ActiveQuestion, RuntimeContestState};

use crate::clock::{spawn_after, Clock, TimerHandle};
use crate::error::CoreError;
use crate::model::validate_question_order;
use crate::repos::{ContestRepository, ScoreIndex, SubmissionRepository};
use crate::submission::QuestionWindow;
use async_trait::async_trait;
use contest_events::{ContestId, QuestionId, ServerEvent, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use engine::{ContestEngine, EngineDeps};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Push delivery into a contest room. Implemented by the session fan-out
/// layer; the orchestrator only knows this narrow seam.
#[async_trait]
pub trait ContestBroadcaster: Send + Sync {
	async fn broadcast(&self, contest_id: &ContestId, event: ServerEvent);
}

pub struct OrchestratorDeps {
	pub contests: Arc<dyn ContestRepository>,
	pub submissions: Arc<dyn SubmissionRepository>,
	pub index: Arc<dyn ScoreIndex>,
	pub broadcaster: Arc<dyn ContestBroadcaster>,
	pub clock: Arc<dyn Clock>,
}

struct ContestHandle {
	commands: mpsc::UnboundedSender<ContestCommand>,
	snapshot: watch::Receiver<Option<ActiveQuestion>>,
	cancel: CancellationToken,
}

struct Inner {
	deps: OrchestratorDeps,
	running: DashMap<ContestId, ContestHandle>,
	scheduled: DashMap<ContestId, TimerHandle>,
	shutdown: CancellationToken,
}

/// Owns one engine task per ACTIVE contest and a table of scheduled starts
/// for UPCOMING ones. Constructed once at startup and passed around as a
/// dependency; there is no global instance.
#[derive(Clone)]
pub struct ContestOrchestrator {
	inner: Arc<Inner>,
}

impl ContestOrchestrator {
	pub fn new(deps: OrchestratorDeps) -> Self {
		Self {
			inner: Arc::new(Inner {
				deps,
				running: DashMap::new(),
				scheduled: DashMap::new(),
				shutdown: CancellationToken::new(),
			}),
		}
	}

	/// Drive a contest toward Running based on its derived runtime state.
	/// Idempotent: calling while already running or scheduled is a no-op
	/// (an upcoming contest's schedule is replaced, not duplicated).
	pub async fn start_contest(&self, contest_id: &ContestId) -> Result<(), CoreError> {
		let contest = self.inner.deps.contests.get_contest(contest_id).await?.ok_or(CoreError::ContestNotFound)?;

		if let Err(err) = contest.validate() {
			warn!(contest = %contest_id, error = %err, "contest window fails validation, refusing to start");
			return Ok(());
		}

		match contest.phase_at(self.inner.deps.clock.now()) {
			crate::model::RuntimePhase::Completed => {
				debug!(contest = %contest_id, "start requested for completed contest, ignoring");
				if let Some((_, handle)) = self.inner.scheduled.remove(contest_id) {
					handle.cancel();
				}
				Ok(())
			}
			crate::model::RuntimePhase::Upcoming => {
				let delay_ms = (contest.start_at - self.inner.deps.clock.now()).num_milliseconds().max(0) as u64;
				self.schedule_start(contest_id.clone(), std::time::Duration::from_millis(delay_ms));
				Ok(())
			}
			crate::model::RuntimePhase::Active => self.spawn_engine(contest).await,
		}
	}

	/// Invoked on every join/resync: starts an active contest that has no
	/// engine yet, or schedules an upcoming one.
	pub async fn ensure_running(&self, contest_id: &ContestId) -> Result<(), CoreError> {
		if self.inner.running.contains_key(contest_id) || self.inner.scheduled.contains_key(contest_id) {
			return Ok(());
		}
		self.start_contest(contest_id).await
	}

	/// Notify the contest's engine that a submission was persisted.
	pub fn record_submission(&self, contest_id: &ContestId, user_id: UserId, question_id: QuestionId) {
		if let Some(handle) = self.inner.running.get(contest_id) {
			let _ = handle.commands.send(ContestCommand::RecordSubmission { user_id, question_id });
		}
	}

	/// Keep the early-advancement denominator fresh after a join.
	pub fn update_participant_count(&self, contest_id: &ContestId) {
		if let Some(handle) = self.inner.running.get(contest_id) {
			let _ = handle.commands.send(ContestCommand::UpdateParticipantCount);
		}
	}

	/// Cancel the contest's timers and any pending interstitial delay.
	/// Already-broadcast events are not retracted.
	pub fn stop_contest(&self, contest_id: &ContestId) {
		if let Some((_, handle)) = self.inner.scheduled.remove(contest_id) {
			handle.cancel();
		}
		if let Some((_, handle)) = self.inner.running.remove(contest_id) {
			handle.cancel.cancel();
			info!(contest = %contest_id, "contest stopped");
		}
	}

	pub fn is_running(&self, contest_id: &ContestId) -> bool {
		self.inner.running.contains_key(contest_id)
	}

	/// Consistent late-joiner snapshot. Never returns a question whose timer
	/// has expired, even if the transition has not fired yet.
	pub fn current_question(&self, contest_id: &ContestId) -> Option<ActiveQuestion> {
		let handle = self.inner.running.get(contest_id)?;
		let snapshot = handle.snapshot.borrow().clone();
		snapshot.filter(|question| question.remaining().is_some())
	}

	pub async fn shutdown(&self) {
		info!("shutting down contest orchestrator");
		for entry in self.inner.scheduled.iter() {
			entry.value().cancel();
		}
		self.inner.scheduled.clear();
		self.inner.shutdown.cancel();
	}

	fn schedule_start(&self, contest_id: ContestId, delay: std::time::Duration) {
		let orchestrator = self.clone();
		let fired_id = contest_id.clone();

		let handle = spawn_after(delay, move || {
			let orchestrator = orchestrator.clone();
			tokio::spawn(async move {
				orchestrator.inner.scheduled.remove(&fired_id);
				if let Err(err) = orchestrator.start_contest(&fired_id).await {
					warn!(contest = %fired_id, error = %err, "scheduled contest start failed");
				}
			});
		});

		// Replace any prior schedule; the old timer must not fire twice.
		if let Some(previous) = self.inner.scheduled.insert(contest_id.clone(), handle) {
			previous.cancel();
		}
		info!(contest = %contest_id, delay_secs = delay.as_secs(), "contest start scheduled");
	}

	async fn spawn_engine(&self, contest: crate::model::Contest) -> Result<(), CoreError> {
		let contest_id = contest.id.clone();

		if self.inner.running.contains_key(&contest_id) {
			debug!(contest = %contest_id, "contest already running");
			return Ok(());
		}

		let questions = self.inner.deps.contests.get_ordered_questions(&contest_id).await?;
		if questions.is_empty() {
			info!(contest = %contest_id, "contest has no questions, nothing to run");
			return Ok(());
		}
		if let Err(err) = validate_question_order(&questions.iter().map(|(slot, _)| slot.clone()).collect::<Vec<_>>()) {
			warn!(contest = %contest_id, error = %err, "question order is not dense, running in stored order");
		}

		let total_participants = self.inner.deps.contests.count_participants(&contest_id).await?;

		let (command_tx, command_rx) = mpsc::unbounded_channel();
		let (snapshot_tx, snapshot_rx) = watch::channel(None);
		let cancel = self.inner.shutdown.child_token();

		let handle = ContestHandle {
			commands: command_tx,
			snapshot: snapshot_rx,
			cancel: cancel.clone(),
		};

		match self.inner.running.entry(contest_id.clone()) {
			Entry::Occupied(_) => {
				// Lost a start race; the winner's engine owns the contest.
				cancel.cancel();
				return Ok(());
			}
			Entry::Vacant(vacant) => {
				vacant.insert(handle);
			}
		}

		let state = RuntimeContestState::new(contest_id.clone(), questions, total_participants);
		let engine = ContestEngine::new(
			EngineDeps {
				contests: self.inner.deps.contests.clone(),
				submissions: self.inner.deps.submissions.clone(),
				index: self.inner.deps.index.clone(),
				broadcaster: self.inner.deps.broadcaster.clone(),
			},
			contest,
			state,
			snapshot_tx,
			command_rx,
			cancel,
		);

		let inner = self.inner.clone();
		tokio::spawn(async move {
			engine.run().await;
			inner.running.remove(&contest_id);
			debug!(contest = %contest_id, "contest engine task exited");
		});

		Ok(())
	}
}

impl QuestionWindow for ContestOrchestrator {
	fn is_open(&self, contest_id: &ContestId, question_id: &QuestionId) -> bool {
		self.current_question(contest_id).is_some_and(|question| question.question_id == *question_id)
	}

	fn elapsed_ms(&self, contest_id: &ContestId, question_id: &QuestionId) -> Option<u64> {
		self
			.current_question(contest_id)
			.filter(|question| question.question_id == *question_id)
			.map(|question| question.elapsed_ms())
	}
}
