use crate::ranking::rank_entries;
use async_trait::async_trait;
use contest_core::error::{IndexError, StorageError};
use contest_core::repos::{ContestRepository, LeaderboardSnapshotRepository, ScoreIndex, SubmissionRepository};
use contest_core::LeaderboardRow;
use contest_events::{ContestId, LeaderboardEntry, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Process-local score index for single-node deployments and tests.
/// Mirrors the redis implementation's ordering and persist semantics.
pub struct InMemoryScoreIndex {
	scores: Mutex<HashMap<ContestId, HashMap<UserId, i64>>>,
	finalized: Mutex<HashSet<ContestId>>,
	contests: Arc<dyn ContestRepository>,
	submissions: Arc<dyn SubmissionRepository>,
	snapshots: Arc<dyn LeaderboardSnapshotRepository>,
}

impl InMemoryScoreIndex {
	pub fn new(contests: Arc<dyn ContestRepository>, submissions: Arc<dyn SubmissionRepository>, snapshots: Arc<dyn LeaderboardSnapshotRepository>) -> Self {
		Self {
			scores: Mutex::new(HashMap::new()),
			finalized: Mutex::new(HashSet::new()),
			contests,
			submissions,
			snapshots,
		}
	}

	pub fn is_finalized(&self, contest_id: &ContestId) -> bool {
		self.finalized.lock().unwrap().contains(contest_id)
	}

	fn raw_pairs(&self, contest_id: &ContestId) -> Vec<(UserId, i64)> {
		self
			.scores
			.lock()
			.unwrap()
			.get(contest_id)
			.map(|by_user| by_user.iter().map(|(user, score)| (user.clone(), *score)).collect())
			.unwrap_or_default()
	}

	async fn enriched_ranking(&self, contest_id: &ContestId) -> Result<Vec<LeaderboardEntry>, IndexError> {
		let pairs = self.raw_pairs(contest_id);
		let users: Vec<UserId> = pairs.iter().map(|(user, _)| user.clone()).collect();

		let names = self.contests.display_names(&users).await.map_err(storage_to_index)?;
		let answered = self.submissions.correct_counts(contest_id).await.map_err(storage_to_index)?;

		Ok(rank_entries(pairs, &names, &answered))
	}
}

#[async_trait]
impl ScoreIndex for InMemoryScoreIndex {
	async fn update_score(&self, contest_id: &ContestId, user_id: &UserId, score: i64) -> Result<(), IndexError> {
		self.scores.lock().unwrap().entry(contest_id.clone()).or_default().insert(user_id.clone(), score);
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

	async fn persist(&self, contest_id: &ContestId) -> Result<(), IndexError> {
		let mut pairs = self.raw_pairs(contest_id);

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
		self.finalized.lock().unwrap().insert(contest_id.clone());

		info!(contest = %contest_id, rows = rows.len(), "leaderboard snapshot persisted");
		Ok(())
	}
}

fn storage_to_index(err: StorageError) -> IndexError {
	IndexError::Backend(anyhow::Error::new(err))
}
