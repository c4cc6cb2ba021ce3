use super::rooms::Session;
use crate::state::AppState;
use contest_core::{LeaderboardRow, RuntimePhase};
use contest_events::{close_codes, ContestEndPayload, ContestId, ContestStartPayload, ErrorCode, ErrorPayload, LeaderboardEntry, ServerEvent, TimerUpdatePayload};
use std::sync::Arc;
use tracing::{info, warn};

/// Join and resync share state resolution; resync skips re-authorization
/// when the session already sits in the room.
pub async fn handle_join(state: &AppState, session: &Arc<Session>, contest_id: &ContestId, is_resync: bool) {
	let contest = match state.contests.get_contest(contest_id).await {
		Ok(Some(contest)) => contest,
		Ok(None) => {
			session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::ContestNotFound, "contest does not exist")));
			session.close(close_codes::NORMAL, "contest not found");
			return;
		}
		Err(err) => {
			warn!(contest = %contest_id, error = %err, "contest lookup failed");
			session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::ServerError, "failed to load contest")));
			return;
		}
	};

	// Admission is always derived from wall-clock timestamps.
	let phase = contest.phase_at(state.clock.now());

	let already_in_room = session.contest().as_ref() == Some(contest_id);
	let is_monitor = session.role.is_admin();

	if !is_monitor && !(is_resync && already_in_room) {
		match state.contests.is_participant(contest_id, &session.user_id).await {
			Ok(true) => {}
			Ok(false) => {
				session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::NotParticipant, "join the contest before connecting")));
				session.close(close_codes::FORBIDDEN, "not a participant");
				return;
			}
			Err(err) => {
				warn!(contest = %contest_id, error = %err, "participant lookup failed");
				session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::ServerError, "failed to verify membership")));
				return;
			}
		}
	}

	match phase {
		RuntimePhase::Completed => send_final_standings(state, session, contest_id).await,
		RuntimePhase::Upcoming => {
			state.rooms.join_room(contest_id, session);
			if let Err(err) = state.orchestrator.ensure_running(contest_id).await {
				warn!(contest = %contest_id, error = %err, "failed to schedule contest start");
			}

			session.send(ServerEvent::ContestStart(ContestStartPayload {
				contest_id: contest_id.clone(),
				title: contest.title.clone(),
				total_questions: total_questions(state, contest_id).await,
				countdown_to_start: Some(contest.seconds_until_start(state.clock.now())),
			}));
			info!(user = %session.user_id, contest = %contest_id, "joined upcoming contest");
		}
		RuntimePhase::Active => join_active(state, session, contest_id, &contest.title, is_monitor).await,
	}
}

async fn join_active(state: &AppState, session: &Arc<Session>, contest_id: &ContestId, title: &str, is_monitor: bool) {
	let questions = match state.contests.get_ordered_questions(contest_id).await {
		Ok(questions) => questions,
		Err(err) => {
			warn!(contest = %contest_id, error = %err, "question lookup failed");
			session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::ServerError, "failed to load contest questions")));
			return;
		}
	};

	// A participant who already answered everything is done; hand them the
	// standings instead of a dead room.
	if !is_monitor && !questions.is_empty() {
		let answered = state.submissions.count_answered(&session.user_id, contest_id).await.unwrap_or(0);
		if answered >= questions.len() as u64 {
			send_live_standings_and_close(state, session, contest_id).await;
			return;
		}
	}

	if let Err(err) = state.orchestrator.ensure_running(contest_id).await {
		warn!(contest = %contest_id, error = %err, "failed to ensure contest running");
	}
	state.rooms.join_room(contest_id, session);
	state.orchestrator.update_participant_count(contest_id);

	session.send(ServerEvent::ContestStart(ContestStartPayload {
		contest_id: contest_id.clone(),
		title: title.to_string(),
		total_questions: questions.len() as u32,
		countdown_to_start: None,
	}));

	// Targeted catch-up: the current question, its clock, and the standings.
	if let Some(current) = state.orchestrator.current_question(contest_id) {
		let question_number = current.payload.question_number;
		session.send(ServerEvent::QuestionBroadcast(current.payload.clone()));
		session.send(ServerEvent::TimerUpdate(TimerUpdatePayload {
			question_number,
			remaining_time: current.remaining_secs(),
		}));
	}

	match state.rooms.leaderboard_payload(contest_id).await {
		Ok(mut payload) => {
			payload.your_rank = state.rooms.rank_for(contest_id, &session.user_id, &payload.entries).await;
			session.send(ServerEvent::LeaderboardUpdate(payload));
		}
		Err(err) => warn!(contest = %contest_id, error = %err, "leaderboard read failed on join"),
	}

	info!(user = %session.user_id, contest = %contest_id, "joined active contest");
}

/// Completed contest: synthesize `contest_end` from the durable snapshot and
/// close gracefully.
async fn send_final_standings(state: &AppState, session: &Arc<Session>, contest_id: &ContestId) {
	let rows = match state.snapshots.rows_for(contest_id).await {
		Ok(rows) => rows,
		Err(err) => {
			warn!(contest = %contest_id, error = %err, "snapshot lookup failed");
			session.send(ServerEvent::Error(ErrorPayload::new(ErrorCode::ServerError, "failed to load final standings")));
			return;
		}
	};

	let leaderboard = snapshot_entries(state, contest_id, &rows).await;
	let your_rank = leaderboard.iter().find(|entry| entry.user_id == session.user_id).cloned();

	session.send(ServerEvent::ContestEnd(ContestEndPayload {
		contest_id: contest_id.clone(),
		leaderboard,
		your_rank,
	}));
	session.close(close_codes::NORMAL, "contest already completed");
}

/// Active contest, but this user has nothing left to answer: live standings
/// from the index, then a graceful close.
async fn send_live_standings_and_close(state: &AppState, session: &Arc<Session>, contest_id: &ContestId) {
	let leaderboard = state.index.top_n(contest_id, state.config.leaderboard_size).await.unwrap_or_default();
	let your_rank = state.rooms.rank_for(contest_id, &session.user_id, &leaderboard).await;

	session.send(ServerEvent::ContestEnd(ContestEndPayload {
		contest_id: contest_id.clone(),
		leaderboard,
		your_rank,
	}));
	session.close(close_codes::NORMAL, "all questions answered");
}

async fn total_questions(state: &AppState, contest_id: &ContestId) -> u32 {
	state.contests.get_ordered_questions(contest_id).await.map(|questions| questions.len() as u32).unwrap_or(0)
}

async fn snapshot_entries(state: &AppState, contest_id: &ContestId, rows: &[LeaderboardRow]) -> Vec<LeaderboardEntry> {
	let users: Vec<_> = rows.iter().map(|row| row.user_id.clone()).collect();
	let names = state.contests.display_names(&users).await.unwrap_or_default();
	let answered = state.submissions.correct_counts(contest_id).await.unwrap_or_default();

	rows
		.iter()
		.map(|row| LeaderboardEntry {
			rank: row.rank,
			user_name: names.get(&row.user_id).cloned().unwrap_or_else(|| row.user_id.as_str().to_string()),
			questions_answered: answered.get(&row.user_id).copied().unwrap_or(0),
			user_id: row.user_id.clone(),
			score: row.score,
		})
		.collect()
}
