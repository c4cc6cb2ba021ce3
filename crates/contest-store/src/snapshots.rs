use crate::error::map_sqlx;
use async_trait::async_trait;
use contest_core::repos::LeaderboardSnapshotRepository;
use contest_core::{LeaderboardRow, StorageError};
use contest_events::{ContestId, UserId};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct SqliteSnapshotRepository {
	pool: SqlitePool,
}

impl SqliteSnapshotRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl LeaderboardSnapshotRepository for SqliteSnapshotRepository {
	/// One transaction per ranking; replaying the same ranking rewrites the
	/// same rows, so contest-end retries are safe.
	async fn upsert_many(&self, rows: &[LeaderboardRow]) -> Result<(), StorageError> {
		let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

		for row in rows {
			sqlx::query(
				"INSERT INTO leaderboard_snapshots (contest_id, user_id, rank, score) VALUES (?, ?, ?, ?) \
				 ON CONFLICT (contest_id, user_id) DO UPDATE SET rank = excluded.rank, score = excluded.score",
			)
			.bind(row.contest_id.as_str())
			.bind(row.user_id.as_str())
			.bind(row.rank as i64)
			.bind(row.score)
			.execute(&mut *tx)
			.await
			.map_err(map_sqlx)?;
		}

		tx.commit().await.map_err(map_sqlx)?;
		Ok(())
	}

	async fn rows_for(&self, contest_id: &ContestId) -> Result<Vec<LeaderboardRow>, StorageError> {
		let rows: Vec<(String, i64, i64)> = sqlx::query_as("SELECT user_id, rank, score FROM leaderboard_snapshots WHERE contest_id = ? ORDER BY rank")
			.bind(contest_id.as_str())
			.fetch_all(&self.pool)
			.await
			.map_err(map_sqlx)?;

		Ok(
			rows
				.into_iter()
				.map(|(user_id, rank, score)| LeaderboardRow {
					contest_id: contest_id.clone(),
					user_id: UserId::new(user_id),
					rank: rank.max(0) as u32,
					score,
				})
				.collect(),
		)
	}
}
