use super::command::ContestCommand;
use super::state::{ActiveQuestion, RuntimeContestState};
use super::ContestBroadcaster;
use crate::error::StorageError;
use crate::model::Contest;
use crate::repos::{ContestRepository, ScoreIndex, SubmissionRepository};
use contest_events::{ContestEndPayload, ContestStartPayload, QuestionBroadcastPayload, QuestionChangePayload, ServerEvent, TimerUpdatePayload};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between `question_change` and the next `question_broadcast`.
pub const INTERSTITIAL_GRACE: Duration = Duration::from_secs(2);

/// Entries included in the room-wide final leaderboard.
const FINAL_LEADERBOARD_SIZE: usize = 10;

pub(super) struct EngineDeps {
	pub contests: Arc<dyn ContestRepository>,
	pub submissions: Arc<dyn SubmissionRepository>,
	pub index: Arc<dyn ScoreIndex>,
	pub broadcaster: Arc<dyn ContestBroadcaster>,
}

enum QuestionOutcome {
	/// Timer elapsed or every participant submitted.
	Completed,
	/// Recovery preload already satisfied the predicate: no broadcast, no timer.
	Skipped,
	Stopped,
}

/// Per-contest progression task. Owns the runtime state; timer expiries and
/// commands serialize through its select loop.
pub(super) struct ContestEngine {
	deps: EngineDeps,
	contest: Contest,
	state: RuntimeContestState,
	snapshot_tx: watch::Sender<Option<ActiveQuestion>>,
	command_rx: mpsc::UnboundedReceiver<ContestCommand>,
	cancel: CancellationToken,
}

impl ContestEngine {
	pub fn new(
		deps: EngineDeps,
		contest: Contest,
		state: RuntimeContestState,
		snapshot_tx: watch::Sender<Option<ActiveQuestion>>,
		command_rx: mpsc::UnboundedReceiver<ContestCommand>,
		cancel: CancellationToken,
	) -> Self {
		Self {
			deps,
			contest,
			state,
			snapshot_tx,
			command_rx,
			cancel,
		}
	}

	pub async fn run(mut self) {
		info!(contest = %self.state.contest_id, questions = self.state.questions.len(), participants = self.state.total_participants, "contest engine started");

		self.broadcast(ServerEvent::ContestStart(ContestStartPayload {
			contest_id: self.contest.id.clone(),
			title: self.contest.title.clone(),
			total_questions: self.state.total_questions(),
			countdown_to_start: None,
		}))
		.await;

		let total = self.state.questions.len();
		let mut index = 0;

		while index < total {
			self.state.current_index = index;

			match self.run_question(index).await {
				QuestionOutcome::Stopped => {
					self.snapshot_tx.send_replace(None);
					info!(contest = %self.state.contest_id, "contest engine stopped");
					return;
				}
				QuestionOutcome::Skipped => {
					debug!(contest = %self.state.contest_id, question = index + 1, "question already answered by every participant, skipping");
					index += 1;
				}
				QuestionOutcome::Completed => {
					self.snapshot_tx.send_replace(None);
					let next_question_number = if index + 1 < total { Some(index as u32 + 2) } else { None };
					self.broadcast(ServerEvent::QuestionChange(QuestionChangePayload { next_question_number })).await;

					if !self.interstitial().await {
						info!(contest = %self.state.contest_id, "contest engine stopped during interstitial");
						return;
					}
					index += 1;
				}
			}
		}

		self.end_contest().await;
	}

	async fn run_question(&mut self, index: usize) -> QuestionOutcome {
		let (slot, _) = &self.state.questions[index];
		let question_id = slot.question_id.clone();
		let time_limit = slot.time_limit;
		let question_number = index as u32 + 1;

		// Recovery: a restart mid-contest must not wait on users who already
		// submitted before the process died.
		self.state.submitted_users = match self.deps.submissions.list_for_question(&self.state.contest_id, &question_id).await {
			Ok(rows) => rows.into_iter().map(|submission| submission.user_id).collect(),
			Err(err) => {
				warn!(contest = %self.state.contest_id, question = %question_id, error = %err, "failed to preload submissions, starting with an empty set");
				HashSet::new()
			}
		};

		if self.state.all_submitted() {
			return QuestionOutcome::Skipped;
		}

		// The payload must be fully resolved and published before the timer
		// starts so a late joiner seeing timer_update always finds a matching
		// question_broadcast.
		let payload = match self.build_payload(index).await {
			Ok(payload) => payload,
			Err(err) => {
				error!(contest = %self.state.contest_id, question = %question_id, error = %err, "failed to resolve question payload, skipping question");
				return QuestionOutcome::Skipped;
			}
		};

		let started_at = Instant::now();
		self.snapshot_tx.send_replace(Some(ActiveQuestion {
			question_id: question_id.clone(),
			payload: payload.clone(),
			started_at,
			time_limit,
		}));
		self.broadcast(ServerEvent::QuestionBroadcast(payload)).await;

		let deadline = started_at + time_limit;
		let mut ticker = interval_at(started_at + Duration::from_secs(1), Duration::from_secs(1));
		let end = sleep_until(deadline);
		tokio::pin!(end);

		loop {
			tokio::select! {
				() = &mut end => {
					debug!(contest = %self.state.contest_id, question = question_number, "question timer elapsed");
					return QuestionOutcome::Completed;
				}
				_ = ticker.tick() => {
					let remaining_time = deadline.saturating_duration_since(Instant::now()).as_secs();
					self.broadcast(ServerEvent::TimerUpdate(TimerUpdatePayload { question_number, remaining_time })).await;
				}
				command = self.command_rx.recv() => {
					let Some(command) = command else { return QuestionOutcome::Stopped };
					if self.handle_command(command, &question_id).await {
						return QuestionOutcome::Completed;
					}
					if self.cancel.is_cancelled() {
						return QuestionOutcome::Stopped;
					}
				}
				() = self.cancel.cancelled() => return QuestionOutcome::Stopped,
			}
		}
	}

	/// Returns true when the early-advancement predicate fired.
	async fn handle_command(&mut self, command: ContestCommand, current_question: &contest_events::QuestionId) -> bool {
		match command {
			ContestCommand::RecordSubmission { user_id, question_id } => {
				if question_id != *current_question {
					// Stale notification from a previous question.
					return false;
				}
				self.state.submitted_users.insert(user_id);
				if self.state.all_submitted() {
					info!(contest = %self.state.contest_id, question = %question_id, "every participant submitted, advancing early");
					return true;
				}
				false
			}
			ContestCommand::UpdateParticipantCount => {
				match self.deps.contests.count_participants(&self.state.contest_id).await {
					Ok(count) => {
						self.state.total_participants = count;
						if self.state.all_submitted() {
							info!(contest = %self.state.contest_id, "participant recount satisfied early advancement");
							return true;
						}
					}
					Err(err) => warn!(contest = %self.state.contest_id, error = %err, "participant recount failed"),
				}
				false
			}
			ContestCommand::Stop => {
				self.cancel.cancel();
				false
			}
		}
	}

	/// 2-second pause after `question_change`. Returns false when stopped.
	async fn interstitial(&mut self) -> bool {
		let grace = sleep(INTERSTITIAL_GRACE);
		tokio::pin!(grace);

		loop {
			tokio::select! {
				() = &mut grace => return true,
				command = self.command_rx.recv() => match command {
					None | Some(ContestCommand::Stop) => return false,
					Some(ContestCommand::UpdateParticipantCount) => {
						if let Ok(count) = self.deps.contests.count_participants(&self.state.contest_id).await {
							self.state.total_participants = count;
						}
					}
					// No question is on the clock; submission notifications are stale.
					Some(ContestCommand::RecordSubmission { .. }) => {}
				},
				() = self.cancel.cancelled() => return false,
			}
		}
	}

	async fn end_contest(&mut self) {
		self.snapshot_tx.send_replace(None);

		let leaderboard = match self.deps.index.top_n(&self.state.contest_id, FINAL_LEADERBOARD_SIZE).await {
			Ok(entries) => entries,
			Err(err) => {
				error!(contest = %self.state.contest_id, error = %err, "failed to read final leaderboard");
				Vec::new()
			}
		};

		self.broadcast(ServerEvent::ContestEnd(ContestEndPayload {
			contest_id: self.state.contest_id.clone(),
			leaderboard,
			your_rank: None,
		}))
		.await;

		if let Err(err) = self.deps.index.persist(&self.state.contest_id).await {
			error!(contest = %self.state.contest_id, error = %err, "failed to persist leaderboard snapshot");
		}

		info!(contest = %self.state.contest_id, "contest ended");
	}

	async fn build_payload(&self, index: usize) -> Result<QuestionBroadcastPayload, StorageError> {
		let (slot, question) = &self.state.questions[index];

		let options = match question.kind {
			contest_events::QuestionKind::Mcq => self.deps.contests.options_for(&question.id).await?,
			contest_events::QuestionKind::Coding => Vec::new(),
		};

		Ok(QuestionBroadcastPayload {
			question: question.public_view(&options),
			question_number: index as u32 + 1,
			total_questions: self.state.total_questions(),
			time_limit: slot.time_limit.as_secs(),
			points: slot.points,
		})
	}

	async fn broadcast(&self, event: ServerEvent) {
		self.deps.broadcaster.broadcast(&self.state.contest_id, event).await;
	}
}
