use super::rooms::{RoomRegistry, Session};
use crate::state::AppState;
use contest_core::{SubmitOutcome, SubmitRequest};
use contest_events::{ContestId, ErrorCode, ErrorPayload, QuestionKind, ServerEvent, SubmissionResultPayload, SubmitAnswerPayload};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub async fn handle_submit(state: &AppState, session: &Arc<Session>, payload: SubmitAnswerPayload) {
	// Admins observe; they never score.
	if session.role.is_admin() {
		session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::NotParticipant, "monitors cannot submit answers")));
		return;
	}

	let Some(contest_id) = session.contest() else {
		session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::InvalidEvent, "join a contest before submitting")));
		return;
	};

	// Cheap duplicate short-circuit before the pipeline does real work.
	if already_terminal(state, session, &contest_id, &payload).await {
		session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::AlreadySubmitted, "answer already recorded for this question")));
		return;
	}

	let request = SubmitRequest {
		contest_id: contest_id.clone(),
		user_id: session.user_id.clone(),
		question_id: payload.question_id.clone(),
		selected_option_id: payload.selected_option_id,
		code: payload.code,
		language: payload.language,
	};

	match state.pipeline.submit(request).await {
		Ok(outcome) => {
			// submission_result goes to the submitter before the room-wide
			// leaderboard refresh can reach the same session.
			session.send(ServerEvent::SubmissionResult(to_result_payload(&outcome)));
			state.orchestrator.record_submission(&contest_id, session.user_id.clone(), payload.question_id.clone());
			state.public_hub.notify_score_change(&contest_id);
			state.debouncer.schedule(contest_id.clone());

			info!(user = %session.user_id, contest = %contest_id, question = %payload.question_id, correct = outcome.is_correct, "submission handled");
		}
		Err(err) => {
			if err.is_precondition() {
				debug!(user = %session.user_id, contest = %contest_id, code = %err.code(), "submission rejected");
			} else {
				warn!(user = %session.user_id, contest = %contest_id, error = %err, "submission failed");
			}
			session.send(ServerEvent::Error(ErrorPayload::new(err.code(), err.to_string())));
		}
	}
}

/// True when a stored submission already terminally answers this question
/// for this user (any graded MCQ row; an accepted coding row).
async fn already_terminal(state: &AppState, session: &Arc<Session>, contest_id: &ContestId, payload: &SubmitAnswerPayload) -> bool {
	let Ok(Some(existing)) = state.submissions.find_submission(&session.user_id, contest_id, &payload.question_id).await else {
		return false;
	};

	if existing.is_correct {
		return true;
	}

	// Without the question kind the row alone is not conclusive; the open
	// question snapshot carries it.
	state
		.orchestrator
		.current_question(contest_id)
		.is_some_and(|current| current.question_id == payload.question_id && current.payload.question.kind == QuestionKind::Mcq)
}

fn to_result_payload(outcome: &SubmitOutcome) -> SubmissionResultPayload {
	SubmissionResultPayload {
		submission_id: outcome.submission_id.clone(),
		is_correct: outcome.is_correct,
		points_earned: outcome.points_earned,
		time_taken_ms: outcome.time_taken_ms,
		current_score: outcome.current_score,
		current_rank: outcome.current_rank,
		verdict: outcome.verdict.clone(),
	}
}

/// Coalesces post-submission leaderboard broadcasts: the first submission in
/// a burst arms a timer, later ones ride along, and the payload is built at
/// fire time so the last update always reaches the room.
pub struct LeaderboardDebouncer {
	rooms: Arc<RoomRegistry>,
	pending: Arc<DashMap<ContestId, ()>>,
	delay: Duration,
}

impl LeaderboardDebouncer {
	pub fn new(rooms: Arc<RoomRegistry>, delay: Duration) -> Self {
		Self {
			rooms,
			pending: Arc::new(DashMap::new()),
			delay,
		}
	}

	pub fn schedule(&self, contest_id: ContestId) {
		if self.pending.insert(contest_id.clone(), ()).is_some() {
			return;
		}

		let rooms = self.rooms.clone();
		let pending = self.pending.clone();
		let delay = self.delay;

		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			// Clear the marker before reading scores: a submission landing
			// after this point arms a fresh broadcast.
			pending.remove(&contest_id);

			match rooms.leaderboard_payload(&contest_id).await {
				Ok(payload) => {
					use contest_core::ContestBroadcaster;
					rooms.broadcast(&contest_id, ServerEvent::LeaderboardUpdate(payload)).await;
				}
				Err(err) => warn!(contest = %contest_id, error = %err, "debounced leaderboard read failed"),
			}
		});
	}
}
