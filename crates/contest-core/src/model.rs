use chrono::{DateTime, Duration as ChronoDuration, Utc};
use contest_events::{ContestId, Difficulty, OptionId, OptionView, QuestionId, QuestionKind, QuestionView, SubmissionId, UserId, VerdictStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Longest a contest is allowed to run.
pub const MAX_CONTEST_DURATION_HOURS: i64 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
	#[error("contest must end after it starts")]
	EndBeforeStart,
	#[error("contest duration exceeds {MAX_CONTEST_DURATION_HOURS}h cap")]
	DurationTooLong,
	#[error("question order indexes are not a dense 0-based permutation")]
	SparseQuestionOrder,
}

/// Contest state derived from wall-clock time. Any persisted status column
/// is advisory only; this derivation is the sole admission criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimePhase {
	Upcoming,
	Active,
	Completed,
}

impl RuntimePhase {
	/// The upper bound is inclusive: `now == end_at` is still `Active`.
	pub fn derive(now: DateTime<Utc>, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
		if now < start_at {
			Self::Upcoming
		} else if now <= end_at {
			Self::Active
		} else {
			Self::Completed
		}
	}

	pub fn is_active(self) -> bool {
		matches!(self, Self::Active)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contest {
	pub id: ContestId,
	pub title: String,
	pub start_at: DateTime<Utc>,
	pub end_at: DateTime<Utc>,
	/// Display hint written by the CRUD layer; never consulted for admission.
	pub status: Option<String>,
}

impl Contest {
	pub fn validate(&self) -> Result<(), ModelError> {
		if self.end_at <= self.start_at {
			return Err(ModelError::EndBeforeStart);
		}
		if self.end_at - self.start_at > ChronoDuration::hours(MAX_CONTEST_DURATION_HOURS) {
			return Err(ModelError::DurationTooLong);
		}
		Ok(())
	}

	pub fn phase_at(&self, now: DateTime<Utc>) -> RuntimePhase {
		RuntimePhase::derive(now, self.start_at, self.end_at)
	}

	pub fn seconds_until_start(&self, now: DateTime<Utc>) -> i64 {
		(self.start_at - now).num_seconds().max(0)
	}
}

/// A question slot inside a contest's ordered sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestQuestion {
	pub contest_id: ContestId,
	pub question_id: QuestionId,
	pub order_index: u32,
	pub time_limit: Duration,
	pub points: i64,
}

/// `order_index` must be a dense 0-based permutation within the contest.
pub fn validate_question_order(questions: &[ContestQuestion]) -> Result<(), ModelError> {
	let mut seen = vec![false; questions.len()];
	for question in questions {
		let index = question.order_index as usize;
		if index >= seen.len() || seen[index] {
			return Err(ModelError::SparseQuestionOrder);
		}
		seen[index] = true;
	}
	Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
	pub id: QuestionId,
	pub kind: QuestionKind,
	pub title: String,
	pub description: String,
	pub function_name: Option<String>,
	pub time_limit_ms: Option<u64>,
	pub memory_limit_mb: Option<u32>,
	pub difficulty: Difficulty,
}

impl Question {
	/// Participant-facing view: MCQ options lose their `is_correct` flag,
	/// coding questions expose limits but never test cases.
	pub fn public_view(&self, options: &[AnswerOption]) -> QuestionView {
		let options = match self.kind {
			QuestionKind::Mcq => options
				.iter()
				.map(|option| OptionView {
					id: option.id.clone(),
					text: option.text.clone(),
				})
				.collect(),
			QuestionKind::Coding => Vec::new(),
		};

		QuestionView {
			id: self.id.clone(),
			kind: self.kind,
			title: self.title.clone(),
			description: self.description.clone(),
			difficulty: self.difficulty,
			options,
			function_name: self.function_name.clone(),
			time_limit_ms: match self.kind {
				QuestionKind::Coding => self.time_limit_ms,
				QuestionKind::Mcq => None,
			},
			memory_limit_mb: match self.kind {
				QuestionKind::Coding => self.memory_limit_mb,
				QuestionKind::Mcq => None,
			},
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOption {
	pub id: OptionId,
	pub question_id: QuestionId,
	pub text: String,
	pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
	pub question_id: QuestionId,
	pub input: String,
	pub expected_output: String,
	pub is_hidden: bool,
	pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestParticipant {
	pub contest_id: ContestId,
	pub user_id: UserId,
	pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
	pub runtime_ms: Option<u64>,
	pub memory_kb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
	pub id: SubmissionId,
	pub user_id: UserId,
	pub contest_id: ContestId,
	pub question_id: QuestionId,
	pub selected_option_id: Option<OptionId>,
	pub code: Option<String>,
	pub language: Option<String>,
	pub status: VerdictStatus,
	pub is_correct: bool,
	pub points_earned: i64,
	pub submitted_at: DateTime<Utc>,
	pub metrics: ExecutionMetrics,
}

impl Submission {
	/// A terminal submission can never be downgraded. MCQ rows are terminal
	/// once graded; coding rows only once accepted.
	pub fn is_terminal(&self, kind: QuestionKind) -> bool {
		match kind {
			QuestionKind::Mcq => true,
			QuestionKind::Coding => self.is_correct,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
	pub contest_id: ContestId,
	pub user_id: UserId,
	pub rank: u32,
	pub score: i64,
}
