use crate::ranking::rank_entries;
use async_trait::async_trait;
use contest_core::error::{IndexError, StorageError};
use contest_core::repos::{ContestRepository, LeaderboardSnapshotRepository, ScoreIndex, SubmissionRepository};
use contest_core::LeaderboardRow;
use contest_events::{ContestId, LeaderboardEntry, UserId};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct IndexConfig {
	pub redis_url: String,
	pub max_retries: u32,
	pub retry_delay_ms: u64,
	pub key_prefix: String,
}

impl Default for IndexConfig {
	fn default() -> Self {
		Self {
			redis_url: "redis://127.0.0.1:6379".to_string(),
			max_retries: 3,
			retry_delay_ms: 100,
			key_prefix: "contest:".to_string(),
		}
	}
}

/// Redis sorted-set score index. One ZSET per contest keyed by user id;
/// reads are enriched with display names and correct-answer counts from
/// durable storage.
pub struct RedisScoreIndex {
	client: Client,
	config: IndexConfig,
	contests: Arc<dyn ContestRepository>,
	submissions: Arc<dyn SubmissionRepository>,
	snapshots: Arc<dyn LeaderboardSnapshotRepository>,
}

impl RedisScoreIndex {
	pub fn new(
		config: IndexConfig,
		contests: Arc<dyn ContestRepository>,
		submissions: Arc<dyn SubmissionRepository>,
		snapshots: Arc<dyn LeaderboardSnapshotRepository>,
	) -> Result<Self, IndexError> {
		let client = Client::open(config.redis_url.as_str()).map_err(|err| IndexError::Backend(err.into()))?;
		Ok(Self {
			client,
			config,
			contests,
			submissions,
			snapshots,
		})
	}

	fn score_key(&self, contest_id: &ContestId) -> String {
		format!("{}{}:leaderboard", self.config.key_prefix, contest_id)
	}

	fn finalized_key(&self, contest_id: &ContestId) -> String {
		format!("{}{}:finalized", self.config.key_prefix, contest_id)
	}

	/// Bounded exponential backoff around a single redis operation.
	async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, IndexError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, redis::RedisError>>,
	{
		let mut last_error = None;

		for attempt in 0..=self.config.max_retries {
			match operation().await {
				Ok(value) => return Ok(value),
				Err(err) => {
					last_error = Some(err);
					if attempt < self.config.max_retries {
						let delay = self.config.retry_delay_ms << attempt;
						warn!(attempt = attempt + 1, delay_ms = delay, "score index operation failed, retrying");
						sleep(Duration::from_millis(delay)).await;
					}
				}
			}
		}

		match last_error {
			Some(err) => Err(IndexError::Backend(err.into())),
			None => Err(IndexError::RetriesExhausted {
				attempts: self.config.max_retries + 1,
			}),
		}
	}

	/// Raw `(user, score)` pairs for the whole contest. Sorting happens on
	/// our side so the tiebreak stays deterministic regardless of how redis
	/// orders equal scores.
	async fn raw_pairs(&self, contest_id: &ContestId) -> Result<Vec<(UserId, i64)>, IndexError> {
		let key = self.score_key(contest_id);
		let pairs: Vec<(String, i64)> = self
			.with_retry(|| {
				let client = self.client.clone();
				let key = key.clone();
				async move {
					let mut conn = client.get_multiplexed_async_connection().await?;
					conn.zrange_withscores(key, 0, -1).await
				}
			})
			.await?;

		Ok(pairs.into_iter().map(|(user, score)| (UserId::new(user), score)).collect())
	}

	async fn enriched_ranking(&self, contest_id: &ContestId) -> Result<Vec<LeaderboardEntry>, IndexError> {
		let pairs = self.raw_pairs(contest_id).await?;
		let users: Vec<UserId> = pairs.iter().map(|(user, _)| user.clone()).collect();

		let names = self.contests.display_names(&users).await.map_err(storage_to_index)?;
		let answered = self.submissions.correct_counts(contest_id).await.map_err(storage_to_index)?;

		Ok(rank_entries(pairs, &names, &answered))
	}
}

#[async_trait]
impl ScoreIndex for RedisScoreIndex {
	async fn update_score(&self, contest_id: &ContestId, user_id: &UserId, score: i64) -> Result<(), IndexError> {
		let key = self.score_key(contest_id);
		self
			.with_retry(|| {
				let client = self.client.clone();
				let key = key.clone();
				let member = user_id.as_str().to_string();
				async move {
					let mut conn = client.get_multiplexed_async_connection().await?;
					conn.zadd::<_, _, _, ()>(key, member, score).await
				}
			})
			.await?;

		debug!(contest = %contest_id, user = %user_id, score, "score updated");
		Ok(())
	}

	async fn top_n(&self, contest_id: &ContestId, n: usize) -> Result<Vec<LeaderboardEntry>, IndexError> {
		let mut entries = self.enriched_ranking(contest_id).await?;
		entries.truncate(n);
		Ok(entries)
	}

	async fn user_rank(&self, contest_id: &ContestId, user_id: &UserId) -> Result<Option<LeaderboardEntry>, IndexError> {
		let entries = self.enriched_ranking(contest_id).await?;
		Ok(entries.into_iter().find(|entry| entry.user_id == *user_id))
	}

	async fn total_participants(&self, contest_id: &ContestId) -> Result<u64, IndexError> {
		self.contests.count_participants(contest_id).await.map_err(storage_to_index)
	}

	/// Idempotent by construction: the snapshot rows are a pure function of
	/// the final ranking, and participants who never scored are included at
	/// zero so the snapshot covers the whole field.
	async fn persist(&self, contest_id: &ContestId) -> Result<(), IndexError> {
		let mut pairs = self.raw_pairs(contest_id).await?;

		let participants = self.contests.list_participants(contest_id).await.map_err(storage_to_index)?;
		for user in participants {
			if !pairs.iter().any(|(scored, _)| *scored == user) {
				pairs.push((user, 0));
			}
		}

		let entries = rank_entries(pairs, &HashMap::new(), &HashMap::new());
		let rows: Vec<LeaderboardRow> = entries
			.iter()
			.map(|entry| LeaderboardRow {
				contest_id: contest_id.clone(),
				user_id: entry.user_id.clone(),
				rank: entry.rank,
				score: entry.score,
			})
			.collect();

		self.snapshots.upsert_many(&rows).await.map_err(storage_to_index)?;

		let key = self.finalized_key(contest_id);
		self
			.with_retry(|| {
				let client = self.client.clone();
				let key = key.clone();
				async move {
					let mut conn = client.get_multiplexed_async_connection().await?;
					conn.set::<_, _, ()>(key, 1).await
				}
			})
			.await?;

		info!(contest = %contest_id, rows = rows.len(), "leaderboard snapshot persisted");
		Ok(())
	}
}

fn storage_to_index(err: StorageError) -> IndexError {
	IndexError::Backend(anyhow::Error::new(err))
}
