use contest_events::{LeaderboardEntry, UserId};
use std::collections::HashMap;

/// Turn raw `(user, score)` pairs into a dense ranking.
///
/// Ordering: score descending, ties broken by ascending `user_id`. Ranks are
/// dense starting at 1. Missing display names fall back to the raw user id.
pub fn rank_entries(mut pairs: Vec<(UserId, i64)>, names: &HashMap<UserId, String>, answered: &HashMap<UserId, u32>) -> Vec<LeaderboardEntry> {
	pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

	pairs
		.into_iter()
		.enumerate()
		.map(|(position, (user_id, score))| LeaderboardEntry {
			rank: position as u32 + 1,
			user_name: names.get(&user_id).cloned().unwrap_or_else(|| user_id.as_str().to_string()),
			questions_answered: answered.get(&user_id).copied().unwrap_or(0),
			user_id,
			score,
		})
		.collect()
}
