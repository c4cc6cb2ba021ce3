use crate::error::map_sqlx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contest_core::model::{ExecutionMetrics, Submission};
use contest_core::repos::SubmissionRepository;
use contest_core::StorageError;
use contest_events::{ContestId, OptionId, QuestionId, SubmissionId, UserId, VerdictStatus};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const WRITE_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 50;

pub(crate) fn status_str(status: VerdictStatus) -> &'static str {
	match status {
		VerdictStatus::Accepted => "ACCEPTED",
		VerdictStatus::WrongAnswer => "WRONG_ANSWER",
		VerdictStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
		VerdictStatus::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
		VerdictStatus::RuntimeError => "RUNTIME_ERROR",
		VerdictStatus::CompilationError => "COMPILATION_ERROR",
	}
}

pub(crate) fn parse_status(raw: &str) -> Result<VerdictStatus, StorageError> {
	match raw {
		"ACCEPTED" => Ok(VerdictStatus::Accepted),
		"WRONG_ANSWER" => Ok(VerdictStatus::WrongAnswer),
		"TIME_LIMIT_EXCEEDED" => Ok(VerdictStatus::TimeLimitExceeded),
		"MEMORY_LIMIT_EXCEEDED" => Ok(VerdictStatus::MemoryLimitExceeded),
		"RUNTIME_ERROR" => Ok(VerdictStatus::RuntimeError),
		"COMPILATION_ERROR" => Ok(VerdictStatus::CompilationError),
		other => Err(StorageError::Backend(anyhow::anyhow!("unknown submission status: {other}"))),
	}
}

#[derive(FromRow)]
struct SubmissionRow {
	id: String,
	user_id: String,
	contest_id: String,
	question_id: String,
	selected_option_id: Option<String>,
	code: Option<String>,
	language: Option<String>,
	status: String,
	is_correct: bool,
	points_earned: i64,
	submitted_at: DateTime<Utc>,
	runtime_ms: Option<i64>,
	memory_kb: Option<i64>,
}

impl SubmissionRow {
	fn into_submission(self) -> Result<Submission, StorageError> {
		let status = parse_status(&self.status)?;
		Ok(Submission {
			id: SubmissionId::new(self.id),
			user_id: UserId::new(self.user_id),
			contest_id: ContestId::new(self.contest_id),
			question_id: QuestionId::new(self.question_id),
			selected_option_id: self.selected_option_id.map(OptionId::new),
			code: self.code,
			language: self.language,
			status,
			is_correct: self.is_correct,
			points_earned: self.points_earned,
			submitted_at: self.submitted_at,
			metrics: ExecutionMetrics {
				runtime_ms: self.runtime_ms.map(|ms| ms.max(0) as u64),
				memory_kb: self.memory_kb.map(|kb| kb.max(0) as u64),
			},
		})
	}
}

const SELECT_COLUMNS: &str = "id, user_id, contest_id, question_id, selected_option_id, code, language, status, is_correct, points_earned, submitted_at, runtime_ms, memory_kb";

#[derive(Clone)]
pub struct SqliteSubmissionRepository {
	pool: SqlitePool,
}

impl SqliteSubmissionRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	fn is_transient(err: &sqlx::Error) -> bool {
		match err {
			sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
			sqlx::Error::Database(db) => {
				let message = db.message();
				message.contains("locked") || message.contains("busy")
			}
			_ => false,
		}
	}

	async fn try_write(&self, submission: &Submission) -> Result<(), sqlx::Error> {
		let updated = sqlx::query(
			"UPDATE submissions SET \
			 	code = ?, \
			 	language = ?, \
			 	selected_option_id = ?, \
			 	status = CASE WHEN is_correct THEN status ELSE ? END, \
			 	points_earned = CASE WHEN is_correct THEN points_earned ELSE ? END, \
			 	submitted_at = ?, \
			 	runtime_ms = CASE WHEN is_correct THEN runtime_ms ELSE ? END, \
			 	memory_kb = CASE WHEN is_correct THEN memory_kb ELSE ? END, \
			 	is_correct = CASE WHEN is_correct THEN is_correct ELSE ? END \
			 WHERE id = ?",
		)
		.bind(submission.code.as_deref())
		.bind(submission.language.as_deref())
		.bind(submission.selected_option_id.as_ref().map(OptionId::as_str))
		.bind(status_str(submission.status))
		.bind(submission.points_earned)
		.bind(submission.submitted_at)
		.bind(submission.metrics.runtime_ms.map(|ms| ms as i64))
		.bind(submission.metrics.memory_kb.map(|kb| kb as i64))
		.bind(submission.is_correct)
		.bind(submission.id.as_str())
		.execute(&self.pool)
		.await?;

		if updated.rows_affected() > 0 {
			return Ok(());
		}

		sqlx::query(
			"INSERT INTO submissions (id, user_id, contest_id, question_id, selected_option_id, code, language, status, is_correct, points_earned, submitted_at, runtime_ms, memory_kb) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(submission.id.as_str())
		.bind(submission.user_id.as_str())
		.bind(submission.contest_id.as_str())
		.bind(submission.question_id.as_str())
		.bind(submission.selected_option_id.as_ref().map(OptionId::as_str))
		.bind(submission.code.as_deref())
		.bind(submission.language.as_deref())
		.bind(status_str(submission.status))
		.bind(submission.is_correct)
		.bind(submission.points_earned)
		.bind(submission.submitted_at)
		.bind(submission.metrics.runtime_ms.map(|ms| ms as i64))
		.bind(submission.metrics.memory_kb.map(|kb| kb as i64))
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}

#[async_trait]
impl SubmissionRepository for SqliteSubmissionRepository {
	async fn find_submission(&self, user_id: &UserId, contest_id: &ContestId, question_id: &QuestionId) -> Result<Option<Submission>, StorageError> {
		let row = sqlx::query_as::<_, SubmissionRow>(&format!(
			"SELECT {SELECT_COLUMNS} FROM submissions WHERE user_id = ? AND contest_id = ? AND question_id = ?"
		))
		.bind(user_id.as_str())
		.bind(contest_id.as_str())
		.bind(question_id.as_str())
		.fetch_optional(&self.pool)
		.await
		.map_err(map_sqlx)?;

		row.map(SubmissionRow::into_submission).transpose()
	}

	/// Update-then-insert keyed on the row id.
	///
	/// A re-grade carries the stored row's id and lands on the UPDATE path;
	/// a fresh submission inserts, and the loser of a concurrent insert race
	/// observes the `(user, contest, question)` unique constraint and
	/// surfaces as [`StorageError::Duplicate`]. Terminal rows
	/// (`is_correct = 1`) keep their verdict, points and metrics while still
	/// accepting fresh code text.
	async fn create_or_update(&self, submission: &Submission) -> Result<(), StorageError> {
		let mut last_error = None;

		for attempt in 0..=WRITE_RETRIES {
			let result = self.try_write(submission).await;

			match result {
				Ok(()) => return Ok(()),
				Err(err) if Self::is_transient(&err) && attempt < WRITE_RETRIES => {
					let delay = RETRY_BASE_DELAY_MS << attempt;
					warn!(attempt = attempt + 1, delay_ms = delay, "transient submission write failure, retrying");
					sleep(Duration::from_millis(delay)).await;
					last_error = Some(err);
				}
				Err(err) => return Err(map_sqlx(err)),
			}
		}

		Err(last_error.map_or_else(|| StorageError::Backend(anyhow::anyhow!("submission write retries exhausted")), map_sqlx))
	}

	async fn list_for_question(&self, contest_id: &ContestId, question_id: &QuestionId) -> Result<Vec<Submission>, StorageError> {
		let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
			"SELECT {SELECT_COLUMNS} FROM submissions WHERE contest_id = ? AND question_id = ? ORDER BY submitted_at"
		))
		.bind(contest_id.as_str())
		.bind(question_id.as_str())
		.fetch_all(&self.pool)
		.await
		.map_err(map_sqlx)?;

		rows.into_iter().map(SubmissionRow::into_submission).collect()
	}

	async fn correct_with_points(&self, user_id: &UserId, contest_id: &ContestId) -> Result<Vec<(QuestionId, i64)>, StorageError> {
		let rows: Vec<(String, i64)> = sqlx::query_as("SELECT question_id, points_earned FROM submissions WHERE user_id = ? AND contest_id = ? AND is_correct = 1")
			.bind(user_id.as_str())
			.bind(contest_id.as_str())
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(rows.into_iter().map(|(question, points)| (QuestionId::new(question), points)).collect())
	}

	async fn correct_counts(&self, contest_id: &ContestId) -> Result<HashMap<UserId, u32>, StorageError> {
		let rows: Vec<(String, i64)> = sqlx::query_as("SELECT user_id, COUNT(*) FROM submissions WHERE contest_id = ? AND is_correct = 1 GROUP BY user_id")
			.bind(contest_id.as_str())
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(rows.into_iter().map(|(user, count)| (UserId::new(user), count.max(0) as u32)).collect())
	}

	async fn count_answered(&self, user_id: &UserId, contest_id: &ContestId) -> Result<u64, StorageError> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT question_id) FROM submissions WHERE user_id = ? AND contest_id = ?")
			.bind(user_id.as_str())
			.bind(contest_id.as_str())
			.fetch_one(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(count.max(0) as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_pool;

	fn row(id: &str, user: &str, question: &str, status: VerdictStatus, points: i64) -> Submission {
		Submission {
			id: SubmissionId::new(id),
			user_id: UserId::new(user),
			contest_id: ContestId::new("c1"),
			question_id: QuestionId::new(question),
			selected_option_id: None,
			code: Some("fn main() {}".into()),
			language: Some("rust".into()),
			status,
			is_correct: status.is_accepted(),
			points_earned: points,
			submitted_at: Utc::now(),
			metrics: ExecutionMetrics {
				runtime_ms: Some(12),
				memory_kb: Some(1024),
			},
		}
	}

	#[tokio::test]
	async fn round_trips_a_submission() {
		let pool = test_pool().await;
		let repo = SqliteSubmissionRepository::new(pool);

		let submission = row("s1", "u1", "q1", VerdictStatus::Accepted, 10);
		repo.create_or_update(&submission).await.unwrap();

		let stored = repo.find_submission(&UserId::new("u1"), &ContestId::new("c1"), &QuestionId::new("q1")).await.unwrap().unwrap();
		assert_eq!(stored.id, submission.id);
		assert_eq!(stored.status, VerdictStatus::Accepted);
		assert!(stored.is_correct);
		assert_eq!(stored.metrics.runtime_ms, Some(12));
	}

	#[tokio::test]
	async fn racing_insert_with_different_id_loses() {
		let pool = test_pool().await;
		let repo = SqliteSubmissionRepository::new(pool);

		repo.create_or_update(&row("s1", "u1", "q1", VerdictStatus::WrongAnswer, 0)).await.unwrap();

		let err = repo.create_or_update(&row("s2", "u1", "q1", VerdictStatus::Accepted, 10)).await.unwrap_err();
		assert!(matches!(err, StorageError::Duplicate));

		let stored = repo.find_submission(&UserId::new("u1"), &ContestId::new("c1"), &QuestionId::new("q1")).await.unwrap().unwrap();
		assert_eq!(stored.id.as_str(), "s1");
		assert_eq!(stored.status, VerdictStatus::WrongAnswer);
	}

	#[tokio::test]
	async fn regrade_with_same_id_updates_in_place() {
		let pool = test_pool().await;
		let repo = SqliteSubmissionRepository::new(pool);

		repo.create_or_update(&row("s1", "u1", "q1", VerdictStatus::WrongAnswer, 0)).await.unwrap();
		repo.create_or_update(&row("s1", "u1", "q1", VerdictStatus::Accepted, 10)).await.unwrap();

		let stored = repo.find_submission(&UserId::new("u1"), &ContestId::new("c1"), &QuestionId::new("q1")).await.unwrap().unwrap();
		assert!(stored.is_correct);
		assert_eq!(stored.points_earned, 10);
	}

	#[tokio::test]
	async fn accepted_rows_never_downgrade_but_keep_new_code() {
		let pool = test_pool().await;
		let repo = SqliteSubmissionRepository::new(pool);

		repo.create_or_update(&row("s1", "u1", "q1", VerdictStatus::Accepted, 10)).await.unwrap();

		let mut regressed = row("s1", "u1", "q1", VerdictStatus::RuntimeError, 0);
		regressed.code = Some("fn main() { panic!() }".into());
		repo.create_or_update(&regressed).await.unwrap();

		let stored = repo.find_submission(&UserId::new("u1"), &ContestId::new("c1"), &QuestionId::new("q1")).await.unwrap().unwrap();
		assert!(stored.is_correct, "terminal rows must not downgrade");
		assert_eq!(stored.status, VerdictStatus::Accepted);
		assert_eq!(stored.points_earned, 10);
		assert_eq!(stored.code.as_deref(), Some("fn main() { panic!() }"));
	}

	#[tokio::test]
	async fn aggregates_follow_correct_rows() {
		let pool = test_pool().await;
		let repo = SqliteSubmissionRepository::new(pool);

		repo.create_or_update(&row("s1", "u1", "q1", VerdictStatus::Accepted, 10)).await.unwrap();
		repo.create_or_update(&row("s2", "u1", "q2", VerdictStatus::WrongAnswer, 0)).await.unwrap();
		repo.create_or_update(&row("s3", "u1", "q3", VerdictStatus::Accepted, 7)).await.unwrap();
		repo.create_or_update(&row("s4", "u2", "q1", VerdictStatus::Accepted, 10)).await.unwrap();

		let correct = repo.correct_with_points(&UserId::new("u1"), &ContestId::new("c1")).await.unwrap();
		let total: i64 = correct.iter().map(|(_, points)| points).sum();
		assert_eq!(total, 17);

		let counts = repo.correct_counts(&ContestId::new("c1")).await.unwrap();
		assert_eq!(counts.get(&UserId::new("u1")), Some(&2));
		assert_eq!(counts.get(&UserId::new("u2")), Some(&1));

		assert_eq!(repo.count_answered(&UserId::new("u1"), &ContestId::new("c1")).await.unwrap(), 3);

		let for_q1 = repo.list_for_question(&ContestId::new("c1"), &QuestionId::new("q1")).await.unwrap();
		assert_eq!(for_q1.len(), 2);
	}
}
