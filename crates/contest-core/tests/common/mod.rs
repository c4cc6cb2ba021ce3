#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contest_core::error::{IndexError, StorageError};
use contest_core::model::{AnswerOption, Contest, ContestQuestion, LeaderboardRow, Question, Submission};
use contest_core::repos::{ContestRepository, ScoreIndex, SubmissionRepository};
use contest_core::{Clock, ContestBroadcaster};
use contest_events::{ContestId, Difficulty, LeaderboardEntry, OptionId, QuestionId, QuestionKind, ServerEvent, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Wall clock slaved to tokio's (pausable) monotonic clock so paused-time
/// tests advance both together.
pub struct TestClock {
	base_wall: DateTime<Utc>,
	base_instant: Instant,
}

impl TestClock {
	pub fn new() -> Self {
		Self {
			base_wall: Utc::now(),
			base_instant: Instant::now(),
		}
	}
}

impl Clock for TestClock {
	fn now(&self) -> DateTime<Utc> {
		self.base_wall + chrono::Duration::from_std(self.base_instant.elapsed()).unwrap_or_default()
	}

	fn monotonic(&self) -> Instant {
		Instant::now()
	}
}

#[derive(Default)]
pub struct MemoryStore {
	pub contests: Mutex<HashMap<ContestId, Contest>>,
	pub questions: Mutex<HashMap<ContestId, Vec<(ContestQuestion, Question)>>>,
	pub options: Mutex<HashMap<QuestionId, Vec<AnswerOption>>>,
	pub participants: Mutex<HashMap<ContestId, Vec<UserId>>>,
	pub submissions: Mutex<HashMap<(UserId, ContestId, QuestionId), Submission>>,
	pub fail_duplicate_for: Mutex<Option<(UserId, ContestId, QuestionId)>>,
}

impl MemoryStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn add_contest(&self, contest: Contest) {
		self.contests.lock().unwrap().insert(contest.id.clone(), contest);
	}

	pub fn add_participants(&self, contest_id: &ContestId, users: &[&str]) {
		self
			.participants
			.lock()
			.unwrap()
			.entry(contest_id.clone())
			.or_default()
			.extend(users.iter().map(|user| UserId::new(*user)));
	}

	pub fn add_mcq(&self, contest_id: &ContestId, question_id: &str, order_index: u32, points: i64, limit: Duration, correct_option: &str) {
		let question_id = QuestionId::new(question_id);
		let slot = ContestQuestion {
			contest_id: contest_id.clone(),
			question_id: question_id.clone(),
			order_index,
			time_limit: limit,
			points,
		};
		let question = Question {
			id: question_id.clone(),
			kind: QuestionKind::Mcq,
			title: format!("question {order_index}"),
			description: String::new(),
			function_name: None,
			time_limit_ms: None,
			memory_limit_mb: None,
			difficulty: Difficulty::Easy,
		};

		let options = vec![
			AnswerOption {
				id: OptionId::new(correct_option),
				question_id: question_id.clone(),
				text: "right".into(),
				is_correct: true,
			},
			AnswerOption {
				id: OptionId::new(format!("{correct_option}-wrong")),
				question_id: question_id.clone(),
				text: "wrong".into(),
				is_correct: false,
			},
		];

		self.options.lock().unwrap().insert(question_id, options);
		self.questions.lock().unwrap().entry(contest_id.clone()).or_default().push((slot, question));
	}

	pub fn add_coding(&self, contest_id: &ContestId, question_id: &str, order_index: u32, points: i64, limit: Duration) {
		let question_id = QuestionId::new(question_id);
		let slot = ContestQuestion {
			contest_id: contest_id.clone(),
			question_id: question_id.clone(),
			order_index,
			time_limit: limit,
			points,
		};
		let question = Question {
			id: question_id.clone(),
			kind: QuestionKind::Coding,
			title: format!("coding {order_index}"),
			description: String::new(),
			function_name: Some("solve".into()),
			time_limit_ms: Some(2000),
			memory_limit_mb: Some(256),
			difficulty: Difficulty::Medium,
		};
		self.questions.lock().unwrap().entry(contest_id.clone()).or_default().push((slot, question));
	}

	pub fn stored_submission(&self, user: &str, contest: &ContestId, question: &str) -> Option<Submission> {
		self
			.submissions
			.lock()
			.unwrap()
			.get(&(UserId::new(user), contest.clone(), QuestionId::new(question)))
			.cloned()
	}
}

#[async_trait]
impl ContestRepository for MemoryStore {
	async fn get_contest(&self, id: &ContestId) -> Result<Option<Contest>, StorageError> {
		Ok(self.contests.lock().unwrap().get(id).cloned())
	}

	async fn get_ordered_questions(&self, id: &ContestId) -> Result<Vec<(ContestQuestion, Question)>, StorageError> {
		let mut questions = self.questions.lock().unwrap().get(id).cloned().unwrap_or_default();
		questions.sort_by_key(|(slot, _)| slot.order_index);
		Ok(questions)
	}

	async fn count_participants(&self, id: &ContestId) -> Result<u64, StorageError> {
		Ok(self.participants.lock().unwrap().get(id).map_or(0, |users| users.len() as u64))
	}

	async fn list_participants(&self, id: &ContestId) -> Result<Vec<UserId>, StorageError> {
		Ok(self.participants.lock().unwrap().get(id).cloned().unwrap_or_default())
	}

	async fn is_participant(&self, id: &ContestId, user_id: &UserId) -> Result<bool, StorageError> {
		Ok(self.participants.lock().unwrap().get(id).is_some_and(|users| users.contains(user_id)))
	}

	async fn options_for(&self, question_id: &QuestionId) -> Result<Vec<AnswerOption>, StorageError> {
		Ok(self.options.lock().unwrap().get(question_id).cloned().unwrap_or_default())
	}

	async fn list_contests(&self) -> Result<Vec<Contest>, StorageError> {
		Ok(self.contests.lock().unwrap().values().cloned().collect())
	}

	async fn display_names(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, String>, StorageError> {
		Ok(user_ids.iter().map(|user| (user.clone(), user.as_str().to_string())).collect())
	}
}

#[async_trait]
impl SubmissionRepository for MemoryStore {
	async fn find_submission(&self, user_id: &UserId, contest_id: &ContestId, question_id: &QuestionId) -> Result<Option<Submission>, StorageError> {
		Ok(self.submissions.lock().unwrap().get(&(user_id.clone(), contest_id.clone(), question_id.clone())).cloned())
	}

	async fn create_or_update(&self, submission: &Submission) -> Result<(), StorageError> {
		let key = (submission.user_id.clone(), submission.contest_id.clone(), submission.question_id.clone());
		if self.fail_duplicate_for.lock().unwrap().as_ref() == Some(&key) {
			return Err(StorageError::Duplicate);
		}
		self.submissions.lock().unwrap().insert(key, submission.clone());
		Ok(())
	}

	async fn list_for_question(&self, contest_id: &ContestId, question_id: &QuestionId) -> Result<Vec<Submission>, StorageError> {
		Ok(
			self
				.submissions
				.lock()
				.unwrap()
				.values()
				.filter(|submission| submission.contest_id == *contest_id && submission.question_id == *question_id)
				.cloned()
				.collect(),
		)
	}

	async fn correct_with_points(&self, user_id: &UserId, contest_id: &ContestId) -> Result<Vec<(QuestionId, i64)>, StorageError> {
		Ok(
			self
				.submissions
				.lock()
				.unwrap()
				.values()
				.filter(|submission| submission.user_id == *user_id && submission.contest_id == *contest_id && submission.is_correct)
				.map(|submission| (submission.question_id.clone(), submission.points_earned))
				.collect(),
		)
	}

	async fn correct_counts(&self, contest_id: &ContestId) -> Result<HashMap<UserId, u32>, StorageError> {
		let mut counts: HashMap<UserId, u32> = HashMap::new();
		for submission in self.submissions.lock().unwrap().values() {
			if submission.contest_id == *contest_id && submission.is_correct {
				*counts.entry(submission.user_id.clone()).or_default() += 1;
			}
		}
		Ok(counts)
	}

	async fn count_answered(&self, user_id: &UserId, contest_id: &ContestId) -> Result<u64, StorageError> {
		Ok(
			self
				.submissions
				.lock()
				.unwrap()
				.values()
				.filter(|submission| submission.user_id == *user_id && submission.contest_id == *contest_id)
				.count() as u64,
		)
	}
}

/// Records every room broadcast in arrival order.
#[derive(Default)]
pub struct RecordingBroadcaster {
	pub events: Mutex<Vec<(ContestId, ServerEvent)>>,
}

impl RecordingBroadcaster {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn names_for(&self, contest_id: &ContestId) -> Vec<&'static str> {
		self
			.events
			.lock()
			.unwrap()
			.iter()
			.filter(|(id, _)| id == contest_id)
			.map(|(_, event)| event.name())
			.collect()
	}

	/// Same, with per-second timer updates filtered out.
	pub fn transitions_for(&self, contest_id: &ContestId) -> Vec<&'static str> {
		self.names_for(contest_id).into_iter().filter(|name| *name != ServerEvent::TIMER_UPDATE).collect()
	}

	pub fn question_numbers(&self, contest_id: &ContestId) -> Vec<u32> {
		self
			.events
			.lock()
			.unwrap()
			.iter()
			.filter(|(id, _)| id == contest_id)
			.filter_map(|(_, event)| match event {
				ServerEvent::QuestionBroadcast(payload) => Some(payload.question_number),
				_ => None,
			})
			.collect()
	}
}

#[async_trait]
impl ContestBroadcaster for RecordingBroadcaster {
	async fn broadcast(&self, contest_id: &ContestId, event: ServerEvent) {
		self.events.lock().unwrap().push((contest_id.clone(), event));
	}
}

/// Deterministic in-memory stand-in for the sorted score index.
#[derive(Default)]
pub struct MemoryIndex {
	pub scores: Mutex<HashMap<ContestId, HashMap<UserId, i64>>>,
	pub persist_calls: Mutex<Vec<ContestId>>,
	pub snapshots: Mutex<HashMap<ContestId, Vec<LeaderboardRow>>>,
}

impl MemoryIndex {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn ranking(&self, contest_id: &ContestId) -> Vec<LeaderboardEntry> {
		let scores = self.scores.lock().unwrap();
		let mut pairs: Vec<(UserId, i64)> = scores.get(contest_id).map(|by_user| by_user.iter().map(|(user, score)| (user.clone(), *score)).collect()).unwrap_or_default();
		pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

		pairs
			.into_iter()
			.enumerate()
			.map(|(position, (user_id, score))| LeaderboardEntry {
				rank: position as u32 + 1,
				user_name: user_id.as_str().to_string(),
				user_id,
				score,
				questions_answered: 0,
			})
			.collect()
	}
}

#[async_trait]
impl ScoreIndex for MemoryIndex {
	async fn update_score(&self, contest_id: &ContestId, user_id: &UserId, score: i64) -> Result<(), IndexError> {
		self.scores.lock().unwrap().entry(contest_id.clone()).or_default().insert(user_id.clone(), score);
		Ok(())
	}

	async fn top_n(&self, contest_id: &ContestId, n: usize) -> Result<Vec<LeaderboardEntry>, IndexError> {
		Ok(self.ranking(contest_id).into_iter().take(n).collect())
	}

	async fn user_rank(&self, contest_id: &ContestId, user_id: &UserId) -> Result<Option<LeaderboardEntry>, IndexError> {
		Ok(self.ranking(contest_id).into_iter().find(|entry| entry.user_id == *user_id))
	}

	async fn total_participants(&self, contest_id: &ContestId) -> Result<u64, IndexError> {
		Ok(self.scores.lock().unwrap().get(contest_id).map_or(0, |by_user| by_user.len() as u64))
	}

	async fn persist(&self, contest_id: &ContestId) -> Result<(), IndexError> {
		let rows = self
			.ranking(contest_id)
			.into_iter()
			.map(|entry| LeaderboardRow {
				contest_id: contest_id.clone(),
				user_id: entry.user_id,
				rank: entry.rank,
				score: entry.score,
			})
			.collect();
		self.snapshots.lock().unwrap().insert(contest_id.clone(), rows);
		self.persist_calls.lock().unwrap().push(contest_id.clone());
		Ok(())
	}
}

pub fn submission_row(user: &str, contest_id: &ContestId, question: &str, is_correct: bool, points: i64) -> Submission {
	use contest_core::model::ExecutionMetrics;
	use contest_events::{SubmissionId, VerdictStatus};

	Submission {
		id: SubmissionId::new(format!("sub-{user}-{question}")),
		user_id: UserId::new(user),
		contest_id: contest_id.clone(),
		question_id: QuestionId::new(question),
		selected_option_id: None,
		code: None,
		language: None,
		status: if is_correct { VerdictStatus::Accepted } else { VerdictStatus::WrongAnswer },
		is_correct,
		points_earned: if is_correct { points } else { 0 },
		submitted_at: Utc::now(),
		metrics: ExecutionMetrics::default(),
	}
}

/// Contest window builder anchored on a test clock's current wall time.
pub fn active_contest(id: &str, clock: &dyn Clock, runs_for: Duration) -> Contest {
	Contest {
		id: ContestId::new(id),
		title: format!("contest {id}"),
		start_at: clock.now() - chrono::Duration::seconds(60),
		end_at: clock.now() + chrono::Duration::from_std(runs_for).unwrap(),
		status: None,
	}
}

pub fn upcoming_contest(id: &str, clock: &dyn Clock, starts_in: Duration, runs_for: Duration) -> Contest {
	let start_at = clock.now() + chrono::Duration::from_std(starts_in).unwrap();
	Contest {
		id: ContestId::new(id),
		title: format!("contest {id}"),
		start_at,
		end_at: start_at + chrono::Duration::from_std(runs_for).unwrap(),
		status: None,
	}
}
