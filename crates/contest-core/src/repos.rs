use crate::error::{IndexError, StorageError};
use crate::model::{AnswerOption, Contest, ContestQuestion, LeaderboardRow, Question, Submission};
use async_trait::async_trait;
use contest_events::{ContestId, LeaderboardEntry, QuestionId, TestCaseResultView, UserId, VerdictStatus, VerdictView};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Read side of contest definitions. The CRUD surface that writes these
/// lives outside the core.
#[async_trait]
pub trait ContestRepository: Send + Sync {
	async fn get_contest(&self, id: &ContestId) -> Result<Option<Contest>, StorageError>;
	/// Questions in `order_index` order, joined with their definitions.
	async fn get_ordered_questions(&self, id: &ContestId) -> Result<Vec<(ContestQuestion, Question)>, StorageError>;
	async fn count_participants(&self, id: &ContestId) -> Result<u64, StorageError>;
	async fn list_participants(&self, id: &ContestId) -> Result<Vec<UserId>, StorageError>;
	async fn is_participant(&self, id: &ContestId, user_id: &UserId) -> Result<bool, StorageError>;
	async fn options_for(&self, question_id: &QuestionId) -> Result<Vec<AnswerOption>, StorageError>;
	async fn list_contests(&self) -> Result<Vec<Contest>, StorageError>;
	/// Batched display-name lookup for leaderboard entries.
	async fn display_names(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, String>, StorageError>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
	async fn find_submission(&self, user_id: &UserId, contest_id: &ContestId, question_id: &QuestionId) -> Result<Option<Submission>, StorageError>;
	/// Insert or overwrite the unique `(user, contest, question)` row.
	/// Losing a concurrent-insert race surfaces [`StorageError::Duplicate`].
	/// The store must never downgrade a row whose `is_correct` is set.
	async fn create_or_update(&self, submission: &Submission) -> Result<(), StorageError>;
	async fn list_for_question(&self, contest_id: &ContestId, question_id: &QuestionId) -> Result<Vec<Submission>, StorageError>;
	/// `(question, points_earned)` for the user's currently-correct rows.
	async fn correct_with_points(&self, user_id: &UserId, contest_id: &ContestId) -> Result<Vec<(QuestionId, i64)>, StorageError>;
	/// Correct-submission counts for every user in the contest, batched for
	/// leaderboard reads.
	async fn correct_counts(&self, contest_id: &ContestId) -> Result<HashMap<UserId, u32>, StorageError>;
	/// Distinct questions this user has submitted to in the contest.
	async fn count_answered(&self, user_id: &UserId, contest_id: &ContestId) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait LeaderboardSnapshotRepository: Send + Sync {
	/// Idempotent: re-running with the same ranking produces identical rows.
	async fn upsert_many(&self, rows: &[LeaderboardRow]) -> Result<(), StorageError>;
	async fn rows_for(&self, contest_id: &ContestId) -> Result<Vec<LeaderboardRow>, StorageError>;
}

/// Live sorted score ranking per contest, plus the durable end-of-contest
/// snapshot write.
#[async_trait]
pub trait ScoreIndex: Send + Sync {
	/// Overwrite the user's absolute score.
	async fn update_score(&self, contest_id: &ContestId, user_id: &UserId, score: i64) -> Result<(), IndexError>;
	/// Dense ranks from 1, score descending; ties broken by ascending
	/// `user_id`.
	async fn top_n(&self, contest_id: &ContestId, n: usize) -> Result<Vec<LeaderboardEntry>, IndexError>;
	async fn user_rank(&self, contest_id: &ContestId, user_id: &UserId) -> Result<Option<LeaderboardEntry>, IndexError>;
	async fn total_participants(&self, contest_id: &ContestId) -> Result<u64, IndexError>;
	/// Idempotent snapshot write; runs in the contest-end critical path.
	async fn persist(&self, contest_id: &ContestId) -> Result<(), IndexError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedTestCase {
	pub passed: bool,
	pub is_hidden: bool,
	pub input: String,
	pub expected_output: String,
	pub actual_output: String,
	pub runtime_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
	pub status: VerdictStatus,
	pub test_results: Vec<GradedTestCase>,
	pub runtime_ms: Option<u64>,
	pub memory_kb: Option<u64>,
}

impl Verdict {
	pub fn bare(status: VerdictStatus) -> Self {
		Self {
			status,
			test_results: Vec::new(),
			runtime_ms: None,
			memory_kb: None,
		}
	}

	/// Participant-facing view. Hidden test cases keep their pass flag but
	/// lose input, expected and actual output.
	pub fn redacted_view(&self) -> VerdictView {
		let test_results = self
			.test_results
			.iter()
			.map(|case| {
				if case.is_hidden {
					TestCaseResultView {
						passed: case.passed,
						hidden: true,
						input: None,
						expected_output: None,
						actual_output: None,
						runtime_ms: case.runtime_ms,
					}
				} else {
					TestCaseResultView {
						passed: case.passed,
						hidden: false,
						input: Some(case.input.clone()),
						expected_output: Some(case.expected_output.clone()),
						actual_output: Some(case.actual_output.clone()),
						runtime_ms: case.runtime_ms,
					}
				}
			})
			.collect::<Vec<_>>();

		let passed_count = test_results.iter().filter(|case| case.passed).count() as u32;
		let total_count = test_results.len() as u32;

		VerdictView {
			status: self.status,
			test_results,
			passed_count,
			total_count,
			runtime_ms: self.runtime_ms,
			memory_kb: self.memory_kb,
		}
	}
}

#[derive(Debug, Error)]
pub enum GraderError {
	/// The sandboxed process wedged; graded as a runtime error.
	#[error("grader reported a wedged process: {0}")]
	Wedged(String),
	/// The grader itself is unreachable.
	#[error("grader unreachable")]
	Unavailable(#[source] anyhow::Error),
}

/// External code-execution collaborator for coding questions.
#[async_trait]
pub trait CodeGrader: Send + Sync {
	async fn grade(&self, code: &str, language: &str, question_id: &QuestionId) -> Result<Verdict, GraderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	Participant,
	Admin,
}

impl Role {
	pub fn is_admin(self) -> bool {
		matches!(self, Self::Admin)
	}
}

#[derive(Debug, Clone)]
pub struct AuthClaims {
	pub user_id: UserId,
	pub role: Role,
}

#[derive(Debug, Error)]
pub enum AuthError {
	#[error("token signature or shape is invalid")]
	Invalid,
	#[error("token expired")]
	Expired,
}

/// Validates the bearer token presented on upgrade.
pub trait TokenVerifier: Send + Sync {
	fn verify(&self, token: &str) -> Result<AuthClaims, AuthError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn graded(passed: bool, hidden: bool) -> GradedTestCase {
		GradedTestCase {
			passed,
			is_hidden: hidden,
			input: "1 2".into(),
			expected_output: "3".into(),
			actual_output: if passed { "3".into() } else { "4".into() },
			runtime_ms: Some(7),
		}
	}

	#[test]
	fn redaction_strips_hidden_io_but_keeps_counts() {
		let verdict = Verdict {
			status: VerdictStatus::WrongAnswer,
			test_results: vec![graded(true, false), graded(false, true)],
			runtime_ms: Some(14),
			memory_kb: Some(2048),
		};

		let view = verdict.redacted_view();
		assert_eq!(view.passed_count, 1);
		assert_eq!(view.total_count, 2);
		assert_eq!(view.test_results[0].input.as_deref(), Some("1 2"));
		assert!(view.test_results[1].hidden);
		assert!(view.test_results[1].input.is_none());
		assert!(view.test_results[1].actual_output.is_none());
	}
}
