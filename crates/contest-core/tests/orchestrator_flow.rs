mod common;

use common::{active_contest, submission_row, upcoming_contest, MemoryIndex, MemoryStore, RecordingBroadcaster, TestClock};
use contest_core::{ContestOrchestrator, OrchestratorDeps};
use contest_events::{ContestId, QuestionId, ServerEvent, UserId};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
	store: Arc<MemoryStore>,
	index: Arc<MemoryIndex>,
	broadcaster: Arc<RecordingBroadcaster>,
	clock: Arc<TestClock>,
	orchestrator: ContestOrchestrator,
}

fn fixture() -> Fixture {
	let store = MemoryStore::new();
	let index = MemoryIndex::new();
	let broadcaster = RecordingBroadcaster::new();
	let clock = Arc::new(TestClock::new());

	let orchestrator = ContestOrchestrator::new(OrchestratorDeps {
		contests: store.clone(),
		submissions: store.clone(),
		index: index.clone(),
		broadcaster: broadcaster.clone(),
		clock: clock.clone(),
	});

	Fixture {
		store,
		index,
		broadcaster,
		clock,
		orchestrator,
	}
}

async fn settle() {
	tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test(start_paused = true)]
async fn early_advancement_fires_when_every_participant_submits() {
	let fx = fixture();
	let contest_id = ContestId::new("c-early");
	fx.store.add_contest(active_contest("c-early", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1", "u2"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 5, Duration::from_secs(60), "a");
	fx.store.add_mcq(&contest_id, "q2", 1, 5, Duration::from_secs(60), "b");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;

	fx.orchestrator.record_submission(&contest_id, UserId::new("u1"), QuestionId::new("q1"));
	settle().await;
	assert_eq!(fx.broadcaster.question_numbers(&contest_id), vec![1], "one submission of two must not advance");

	fx.orchestrator.record_submission(&contest_id, UserId::new("u2"), QuestionId::new("q1"));
	tokio::time::sleep(Duration::from_secs(3)).await;

	assert_eq!(
		fx.broadcaster.transitions_for(&contest_id),
		vec![
			ServerEvent::CONTEST_START,
			ServerEvent::QUESTION_BROADCAST,
			ServerEvent::QUESTION_CHANGE,
			ServerEvent::QUESTION_BROADCAST,
		]
	);
	assert_eq!(fx.broadcaster.question_numbers(&contest_id), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn timer_expiry_walks_to_contest_end() {
	let fx = fixture();
	let contest_id = ContestId::new("c-expiry");
	fx.store.add_contest(active_contest("c-expiry", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 10, Duration::from_secs(3), "a");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	tokio::time::sleep(Duration::from_secs(6)).await;

	assert_eq!(
		fx.broadcaster.transitions_for(&contest_id),
		vec![ServerEvent::CONTEST_START, ServerEvent::QUESTION_BROADCAST, ServerEvent::QUESTION_CHANGE, ServerEvent::CONTEST_END]
	);
	assert_eq!(fx.index.persist_calls.lock().unwrap().as_slice(), &[contest_id.clone()]);
	assert!(!fx.orchestrator.is_running(&contest_id));
}

#[tokio::test(start_paused = true)]
async fn question_broadcast_precedes_first_timer_update() {
	let fx = fixture();
	let contest_id = ContestId::new("c-order");
	fx.store.add_contest(active_contest("c-order", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 10, Duration::from_secs(5), "a");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	tokio::time::sleep(Duration::from_millis(2500)).await;

	let names = fx.broadcaster.names_for(&contest_id);
	let broadcast_at = names.iter().position(|name| *name == ServerEvent::QUESTION_BROADCAST).unwrap();
	let first_tick = names.iter().position(|name| *name == ServerEvent::TIMER_UPDATE).unwrap();
	assert!(broadcast_at < first_tick, "timer updates must follow the question broadcast: {names:?}");
}

#[tokio::test(start_paused = true)]
async fn restart_recovery_skips_fully_answered_question() {
	let fx = fixture();
	let contest_id = ContestId::new("c-recover");
	fx.store.add_contest(active_contest("c-recover", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 5, Duration::from_secs(60), "a");
	fx.store.add_mcq(&contest_id, "q2", 1, 5, Duration::from_secs(60), "b");

	// u1 submitted to q1 before the restart.
	let row = submission_row("u1", &contest_id, "q1", true, 5);
	fx.store.submissions.lock().unwrap().insert((row.user_id.clone(), contest_id.clone(), row.question_id.clone()), row);

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;

	// q1 is skipped silently: no broadcast, no question_change for it.
	assert_eq!(fx.broadcaster.transitions_for(&contest_id), vec![ServerEvent::CONTEST_START, ServerEvent::QUESTION_BROADCAST]);
	assert_eq!(fx.broadcaster.question_numbers(&contest_id), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn upcoming_contest_start_is_scheduled_and_fires() {
	let fx = fixture();
	let contest_id = ContestId::new("c-upcoming");
	fx.store.add_contest(upcoming_contest("c-upcoming", fx.clock.as_ref(), Duration::from_secs(120), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 10, Duration::from_secs(60), "a");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	// Re-scheduling while upcoming replaces the old timer rather than stacking.
	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;
	assert!(!fx.orchestrator.is_running(&contest_id));
	assert!(fx.broadcaster.names_for(&contest_id).is_empty());

	tokio::time::sleep(Duration::from_secs(121)).await;

	assert!(fx.orchestrator.is_running(&contest_id));
	let starts = fx.broadcaster.names_for(&contest_id).iter().filter(|name| **name == ServerEvent::CONTEST_START).count();
	assert_eq!(starts, 1);
}

#[tokio::test(start_paused = true)]
async fn start_contest_is_idempotent_while_running() {
	let fx = fixture();
	let contest_id = ContestId::new("c-idem");
	fx.store.add_contest(active_contest("c-idem", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 10, Duration::from_secs(60), "a");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;
	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;

	let starts = fx.broadcaster.names_for(&contest_id).iter().filter(|name| **name == ServerEvent::CONTEST_START).count();
	assert_eq!(starts, 1);
}

#[tokio::test(start_paused = true)]
async fn contest_without_questions_is_a_noop() {
	let fx = fixture();
	let contest_id = ContestId::new("c-empty");
	fx.store.add_contest(active_contest("c-empty", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;

	assert!(!fx.orchestrator.is_running(&contest_id));
	assert!(fx.broadcaster.names_for(&contest_id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn completed_contest_start_is_a_noop() {
	let fx = fixture();
	let contest_id = ContestId::new("c-done");
	let mut contest = active_contest("c-done", fx.clock.as_ref(), Duration::from_secs(600));
	contest.start_at = contest.start_at - chrono::Duration::hours(3);
	contest.end_at = contest.start_at + chrono::Duration::hours(1);
	fx.store.add_contest(contest);

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;

	assert!(!fx.orchestrator.is_running(&contest_id));
	assert!(fx.broadcaster.names_for(&contest_id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_contest_cancels_timers_and_interstitials() {
	let fx = fixture();
	let contest_id = ContestId::new("c-stop");
	fx.store.add_contest(active_contest("c-stop", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 10, Duration::from_secs(30), "a");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;
	fx.orchestrator.stop_contest(&contest_id);
	tokio::time::sleep(Duration::from_secs(60)).await;

	assert!(!fx.orchestrator.is_running(&contest_id));
	let names = fx.broadcaster.names_for(&contest_id);
	assert!(!names.contains(&ServerEvent::QUESTION_CHANGE));
	assert!(!names.contains(&ServerEvent::CONTEST_END));
	assert!(fx.index.persist_calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn snapshot_tracks_remaining_time_and_expiry() {
	let fx = fixture();
	let contest_id = ContestId::new("c-snap");
	fx.store.add_contest(active_contest("c-snap", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 10, Duration::from_secs(30), "a");
	fx.store.add_mcq(&contest_id, "q2", 1, 10, Duration::from_secs(30), "b");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;

	let snapshot = fx.orchestrator.current_question(&contest_id).expect("question should be live");
	assert_eq!(snapshot.payload.question_number, 1);
	assert!(snapshot.remaining_secs() >= 29);

	tokio::time::sleep(Duration::from_secs(10)).await;
	let snapshot = fx.orchestrator.current_question(&contest_id).unwrap();
	assert!(snapshot.remaining_secs() <= 20);

	// During the interstitial there is no current question.
	tokio::time::sleep(Duration::from_secs(21)).await;
	assert!(fx.orchestrator.current_question(&contest_id).is_none());
}

#[tokio::test(start_paused = true)]
async fn participant_recount_can_trigger_early_advance() {
	let fx = fixture();
	let contest_id = ContestId::new("c-recount");
	fx.store.add_contest(active_contest("c-recount", fx.clock.as_ref(), Duration::from_secs(600)));
	fx.store.add_participants(&contest_id, &["u1", "u2"]);
	fx.store.add_mcq(&contest_id, "q1", 0, 5, Duration::from_secs(120), "a");
	fx.store.add_mcq(&contest_id, "q2", 1, 5, Duration::from_secs(120), "b");

	fx.orchestrator.start_contest(&contest_id).await.unwrap();
	settle().await;

	fx.orchestrator.record_submission(&contest_id, UserId::new("u1"), QuestionId::new("q1"));
	settle().await;
	assert_eq!(fx.broadcaster.question_numbers(&contest_id), vec![1]);

	// u2 drops out of the contest; the fresh denominator is 1.
	fx.store.participants.lock().unwrap().get_mut(&contest_id).unwrap().retain(|user| user.as_str() != "u2");
	fx.orchestrator.update_participant_count(&contest_id);
	tokio::time::sleep(Duration::from_secs(3)).await;

	assert_eq!(fx.broadcaster.question_numbers(&contest_id), vec![1, 2]);
}
