use crate::error::map_sqlx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contest_core::model::{AnswerOption, Contest, ContestQuestion, Question};
use contest_core::repos::ContestRepository;
use contest_core::StorageError;
use contest_events::{ContestId, Difficulty, OptionId, QuestionId, QuestionKind, UserId};
use sqlx::{FromRow, QueryBuilder, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;

pub(crate) fn parse_kind(raw: &str) -> Result<QuestionKind, StorageError> {
	match raw {
		"MCQ" => Ok(QuestionKind::Mcq),
		"CODING" => Ok(QuestionKind::Coding),
		other => Err(StorageError::Backend(anyhow::anyhow!("unknown question kind: {other}"))),
	}
}

pub(crate) fn parse_difficulty(raw: &str) -> Result<Difficulty, StorageError> {
	match raw {
		"EASY" => Ok(Difficulty::Easy),
		"MEDIUM" => Ok(Difficulty::Medium),
		"HARD" => Ok(Difficulty::Hard),
		other => Err(StorageError::Backend(anyhow::anyhow!("unknown difficulty: {other}"))),
	}
}

#[derive(FromRow)]
struct ContestRow {
	id: String,
	title: String,
	start_at: DateTime<Utc>,
	end_at: DateTime<Utc>,
	status: Option<String>,
}

impl From<ContestRow> for Contest {
	fn from(row: ContestRow) -> Self {
		Self {
			id: ContestId::new(row.id),
			title: row.title,
			start_at: row.start_at,
			end_at: row.end_at,
			status: row.status,
		}
	}
}

#[derive(FromRow)]
struct OrderedQuestionRow {
	contest_id: String,
	question_id: String,
	order_index: i64,
	time_limit_secs: i64,
	points: i64,
	kind: String,
	question_title: String,
	description: String,
	function_name: Option<String>,
	time_limit_ms: Option<i64>,
	memory_limit_mb: Option<i64>,
	difficulty: String,
}

impl OrderedQuestionRow {
	fn into_pair(self) -> Result<(ContestQuestion, Question), StorageError> {
		let kind = parse_kind(&self.kind)?;
		let difficulty = parse_difficulty(&self.difficulty)?;
		let question_id = QuestionId::new(self.question_id);

		let slot = ContestQuestion {
			contest_id: ContestId::new(self.contest_id),
			question_id: question_id.clone(),
			order_index: self.order_index as u32,
			time_limit: Duration::from_secs(self.time_limit_secs.max(0) as u64),
			points: self.points,
		};

		let question = Question {
			id: question_id,
			kind,
			title: self.question_title,
			description: self.description,
			function_name: self.function_name,
			time_limit_ms: self.time_limit_ms.map(|ms| ms.max(0) as u64),
			memory_limit_mb: self.memory_limit_mb.map(|mb| mb.max(0) as u32),
			difficulty,
		};

		Ok((slot, question))
	}
}

#[derive(FromRow)]
struct OptionRow {
	id: String,
	question_id: String,
	text: String,
	is_correct: bool,
}

#[derive(Clone)]
pub struct SqliteContestRepository {
	pool: SqlitePool,
}

impl SqliteContestRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl ContestRepository for SqliteContestRepository {
	async fn get_contest(&self, id: &ContestId) -> Result<Option<Contest>, StorageError> {
		let row = sqlx::query_as::<_, ContestRow>("SELECT id, title, start_at, end_at, status FROM contests WHERE id = ?")
			.bind(id.as_str())
			.fetch_optional(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(row.map(Contest::from))
	}

	async fn get_ordered_questions(&self, id: &ContestId) -> Result<Vec<(ContestQuestion, Question)>, StorageError> {
		let rows = sqlx::query_as::<_, OrderedQuestionRow>(
			"SELECT cq.contest_id, cq.question_id, cq.order_index, cq.time_limit_secs, cq.points, \
			        q.kind, q.title AS question_title, q.description, q.function_name, q.time_limit_ms, q.memory_limit_mb, q.difficulty \
			 FROM contest_questions cq \
			 JOIN questions q ON q.id = cq.question_id \
			 WHERE cq.contest_id = ? \
			 ORDER BY cq.order_index",
		)
		.bind(id.as_str())
		.fetch_all(&self.pool)
		.await
		.map_err(map_sqlx)?;

		rows.into_iter().map(OrderedQuestionRow::into_pair).collect()
	}

	async fn count_participants(&self, id: &ContestId) -> Result<u64, StorageError> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contest_participants WHERE contest_id = ?")
			.bind(id.as_str())
			.fetch_one(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(count.max(0) as u64)
	}

	async fn list_participants(&self, id: &ContestId) -> Result<Vec<UserId>, StorageError> {
		let users: Vec<String> = sqlx::query_scalar("SELECT user_id FROM contest_participants WHERE contest_id = ? ORDER BY user_id")
			.bind(id.as_str())
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(users.into_iter().map(UserId::new).collect())
	}

	async fn is_participant(&self, id: &ContestId, user_id: &UserId) -> Result<bool, StorageError> {
		let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM contest_participants WHERE contest_id = ? AND user_id = ?")
			.bind(id.as_str())
			.bind(user_id.as_str())
			.fetch_optional(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(found.is_some())
	}

	async fn options_for(&self, question_id: &QuestionId) -> Result<Vec<AnswerOption>, StorageError> {
		let rows = sqlx::query_as::<_, OptionRow>("SELECT id, question_id, text, is_correct FROM question_options WHERE question_id = ? ORDER BY id")
			.bind(question_id.as_str())
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(
			rows
				.into_iter()
				.map(|row| AnswerOption {
					id: OptionId::new(row.id),
					question_id: QuestionId::new(row.question_id),
					text: row.text,
					is_correct: row.is_correct,
				})
				.collect(),
		)
	}

	async fn list_contests(&self) -> Result<Vec<Contest>, StorageError> {
		let rows = sqlx::query_as::<_, ContestRow>("SELECT id, title, start_at, end_at, status FROM contests ORDER BY start_at")
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(rows.into_iter().map(Contest::from).collect())
	}

	async fn display_names(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, String>, StorageError> {
		if user_ids.is_empty() {
			return Ok(HashMap::new());
		}

		let mut builder = QueryBuilder::new("SELECT id, name FROM users WHERE id IN (");
		let mut separated = builder.separated(", ");
		for user in user_ids {
			separated.push_bind(user.as_str());
		}
		separated.push_unseparated(")");

		let rows: Vec<(String, String)> = builder.build_query_as().fetch_all(&self.pool).await.map_err(map_sqlx)?;

		Ok(rows.into_iter().map(|(id, name)| (UserId::new(id), name)).collect())
	}
}
