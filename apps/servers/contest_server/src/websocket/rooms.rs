use async_trait::async_trait;
use contest_core::error::IndexError;
use contest_core::repos::ScoreIndex;
use contest_core::{ContestBroadcaster, Role};
use contest_events::{ContestId, LeaderboardEntry, LeaderboardUpdatePayload, ServerEvent, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Frames queued for a session's writer task. A single queue per session
/// keeps delivery ordered.
#[derive(Debug)]
pub enum OutboundFrame {
	Event(ServerEvent),
	Ping,
	Close { code: u16, reason: String },
}

/// One authenticated long-lived connection.
pub struct Session {
	pub id: SessionId,
	pub user_id: UserId,
	pub role: Role,
	tx: mpsc::UnboundedSender<OutboundFrame>,
	pub cancel: CancellationToken,
	last_pong: Mutex<Instant>,
	contest: Mutex<Option<ContestId>>,
}

impl Session {
	pub fn new(user_id: UserId, role: Role, tx: mpsc::UnboundedSender<OutboundFrame>, cancel: CancellationToken) -> Arc<Self> {
		Arc::new(Self {
			id: Uuid::new_v4(),
			user_id,
			role,
			tx,
			cancel,
			last_pong: Mutex::new(Instant::now()),
			contest: Mutex::new(None),
		})
	}

	pub fn send(&self, event: ServerEvent) -> bool {
		self.tx.send(OutboundFrame::Event(event)).is_ok()
	}

	pub fn ping(&self) -> bool {
		self.tx.send(OutboundFrame::Ping).is_ok()
	}

	pub fn close(&self, code: u16, reason: impl Into<String>) {
		let _ = self.tx.send(OutboundFrame::Close { code, reason: reason.into() });
	}

	pub fn record_pong(&self) {
		*self.last_pong.lock().unwrap() = Instant::now();
	}

	pub fn last_pong(&self) -> Instant {
		*self.last_pong.lock().unwrap()
	}

	pub fn contest(&self) -> Option<ContestId> {
		self.contest.lock().unwrap().clone()
	}

	fn set_contest(&self, contest_id: Option<ContestId>) -> Option<ContestId> {
		std::mem::replace(&mut *self.contest.lock().unwrap(), contest_id)
	}
}

/// Per-contest rooms over the set of connected sessions. Room broadcasts
/// personalize leaderboard-shaped events with the recipient's own rank.
pub struct RoomRegistry {
	sessions: DashMap<SessionId, Arc<Session>>,
	rooms: DashMap<ContestId, HashSet<SessionId>>,
	index: Arc<dyn ScoreIndex>,
	leaderboard_size: usize,
}

impl RoomRegistry {
	pub fn new(index: Arc<dyn ScoreIndex>, leaderboard_size: usize) -> Self {
		Self {
			sessions: DashMap::new(),
			rooms: DashMap::new(),
			index,
			leaderboard_size,
		}
	}

	pub fn register(&self, session: Arc<Session>) {
		debug!(session = %session.id, user = %session.user_id, "session registered");
		self.sessions.insert(session.id, session);
	}

	/// Remove the session from the registry and whatever room it joined.
	/// Pending sends die with the channel; no user-visible error is emitted.
	pub fn remove(&self, session_id: SessionId) {
		if let Some((_, session)) = self.sessions.remove(&session_id) {
			if let Some(contest_id) = session.set_contest(None) {
				if let Some(mut members) = self.rooms.get_mut(&contest_id) {
					members.remove(&session_id);
				}
			}
			session.cancel.cancel();
			debug!(session = %session_id, "session removed");
		}
	}

	pub fn join_room(&self, contest_id: &ContestId, session: &Arc<Session>) {
		if let Some(previous) = session.set_contest(Some(contest_id.clone())) {
			if previous != *contest_id {
				if let Some(mut members) = self.rooms.get_mut(&previous) {
					members.remove(&session.id);
				}
			}
		}
		self.rooms.entry(contest_id.clone()).or_default().insert(session.id);
		info!(session = %session.id, user = %session.user_id, contest = %contest_id, "joined room");
	}

	pub fn room_sessions(&self, contest_id: &ContestId) -> Vec<Arc<Session>> {
		self
			.rooms
			.get(contest_id)
			.map(|members| members.iter().filter_map(|id| self.sessions.get(id).map(|entry| entry.value().clone())).collect())
			.unwrap_or_default()
	}

	pub fn all_sessions(&self) -> Vec<Arc<Session>> {
		self.sessions.iter().map(|entry| entry.value().clone()).collect()
	}

	/// Room-wide leaderboard payload without personalization applied.
	pub async fn leaderboard_payload(&self, contest_id: &ContestId) -> Result<LeaderboardUpdatePayload, IndexError> {
		let entries = self.index.top_n(contest_id, self.leaderboard_size).await?;
		let total_participants = self.index.total_participants(contest_id).await?;

		Ok(LeaderboardUpdatePayload {
			entries,
			total_participants,
			your_rank: None,
		})
	}

	/// The recipient's own rank: out of the visible page when possible, via
	/// the index otherwise.
	pub async fn rank_for(&self, contest_id: &ContestId, user_id: &UserId, entries: &[LeaderboardEntry]) -> Option<LeaderboardEntry> {
		if let Some(entry) = entries.iter().find(|entry| entry.user_id == *user_id) {
			return Some(entry.clone());
		}
		match self.index.user_rank(contest_id, user_id).await {
			Ok(rank) => rank,
			Err(err) => {
				warn!(contest = %contest_id, user = %user_id, error = %err, "rank lookup failed");
				None
			}
		}
	}

	async fn deliver(&self, contest_id: &ContestId, event: ServerEvent) {
		let members = self.room_sessions(contest_id);
		if members.is_empty() {
			return;
		}

		match event {
			ServerEvent::LeaderboardUpdate(base) => {
				for session in members {
					let mut payload = base.clone();
					payload.your_rank = self.rank_for(contest_id, &session.user_id, &payload.entries).await;
					session.send(ServerEvent::LeaderboardUpdate(payload));
				}
			}
			ServerEvent::ContestEnd(base) => {
				for session in members {
					let mut payload = base.clone();
					payload.your_rank = self.rank_for(contest_id, &session.user_id, &payload.leaderboard).await;
					session.send(ServerEvent::ContestEnd(payload));
				}
			}
			other => {
				for session in members {
					session.send(other.clone());
				}
			}
		}
	}

	/// Drain all sessions with a grace period, then cut them off.
	pub async fn shutdown(&self, grace: Duration) {
		let sessions = self.all_sessions();
		info!(sessions = sessions.len(), "draining websocket sessions");

		for session in &sessions {
			session.close(contest_events::close_codes::NORMAL, "server shutting down");
		}

		tokio::time::sleep(grace).await;

		for session in sessions {
			self.remove(session.id);
		}
	}
}

#[async_trait]
impl ContestBroadcaster for RoomRegistry {
	async fn broadcast(&self, contest_id: &ContestId, event: ServerEvent) {
		self.deliver(contest_id, event).await;
	}
}

impl std::fmt::Debug for RoomRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RoomRegistry").field("sessions", &self.sessions.len()).field("rooms", &self.rooms.len()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use contest_events::TimerUpdatePayload;

	struct StaticIndex {
		entries: Vec<LeaderboardEntry>,
	}

	#[async_trait]
	impl ScoreIndex for StaticIndex {
		async fn update_score(&self, _contest_id: &ContestId, _user_id: &UserId, _score: i64) -> Result<(), IndexError> {
			Ok(())
		}

		async fn top_n(&self, _contest_id: &ContestId, n: usize) -> Result<Vec<LeaderboardEntry>, IndexError> {
			Ok(self.entries.iter().take(n).cloned().collect())
		}

		async fn user_rank(&self, _contest_id: &ContestId, user_id: &UserId) -> Result<Option<LeaderboardEntry>, IndexError> {
			Ok(self.entries.iter().find(|entry| entry.user_id == *user_id).cloned())
		}

		async fn total_participants(&self, _contest_id: &ContestId) -> Result<u64, IndexError> {
			Ok(self.entries.len() as u64)
		}

		async fn persist(&self, _contest_id: &ContestId) -> Result<(), IndexError> {
			Ok(())
		}
	}

	fn entry(user: &str, rank: u32, score: i64) -> LeaderboardEntry {
		LeaderboardEntry {
			rank,
			user_id: UserId::new(user),
			user_name: user.to_string(),
			score,
			questions_answered: 1,
		}
	}

	fn registry() -> RoomRegistry {
		RoomRegistry::new(
			Arc::new(StaticIndex {
				entries: vec![entry("u1", 1, 10), entry("u2", 2, 5)],
			}),
			10,
		)
	}

	fn session(user: &str) -> (Arc<Session>, mpsc::UnboundedReceiver<OutboundFrame>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Session::new(UserId::new(user), Role::Participant, tx, CancellationToken::new()), rx)
	}

	#[tokio::test]
	async fn broadcast_reaches_every_room_member_in_order() {
		let registry = registry();
		let contest_id = ContestId::new("c1");
		let (first, mut first_rx) = session("u1");
		let (second, mut second_rx) = session("u2");
		registry.register(first.clone());
		registry.register(second.clone());
		registry.join_room(&contest_id, &first);
		registry.join_room(&contest_id, &second);

		for remaining in [3, 2, 1] {
			registry
				.broadcast(
					&contest_id,
					ServerEvent::TimerUpdate(TimerUpdatePayload {
						question_number: 1,
						remaining_time: remaining,
					}),
				)
				.await;
		}

		for rx in [&mut first_rx, &mut second_rx] {
			let mut seen = Vec::new();
			while let Ok(frame) = rx.try_recv() {
				if let OutboundFrame::Event(ServerEvent::TimerUpdate(payload)) = frame {
					seen.push(payload.remaining_time);
				}
			}
			assert_eq!(seen, vec![3, 2, 1]);
		}
	}

	#[tokio::test]
	async fn leaderboard_updates_carry_the_recipients_rank() {
		let registry = registry();
		let contest_id = ContestId::new("c1");
		let (member, mut rx) = session("u2");
		registry.register(member.clone());
		registry.join_room(&contest_id, &member);

		let payload = registry.leaderboard_payload(&contest_id).await.unwrap();
		registry.broadcast(&contest_id, ServerEvent::LeaderboardUpdate(payload)).await;

		let frame = rx.try_recv().unwrap();
		match frame {
			OutboundFrame::Event(ServerEvent::LeaderboardUpdate(payload)) => {
				assert_eq!(payload.your_rank.unwrap().rank, 2);
				assert_eq!(payload.entries.len(), 2);
			}
			other => panic!("unexpected frame: {other:?}"),
		}
	}

	#[tokio::test]
	async fn removed_sessions_stop_receiving() {
		let registry = registry();
		let contest_id = ContestId::new("c1");
		let (member, mut rx) = session("u1");
		registry.register(member.clone());
		registry.join_room(&contest_id, &member);

		registry.remove(member.id);
		registry
			.broadcast(
				&contest_id,
				ServerEvent::TimerUpdate(TimerUpdatePayload {
					question_number: 1,
					remaining_time: 5,
				}),
			)
			.await;

		assert!(rx.try_recv().is_err());
		assert!(member.cancel.is_cancelled());
	}

	#[tokio::test]
	async fn switching_rooms_leaves_the_previous_one() {
		let registry = registry();
		let first_contest = ContestId::new("c1");
		let second_contest = ContestId::new("c2");
		let (member, mut rx) = session("u1");
		registry.register(member.clone());
		registry.join_room(&first_contest, &member);
		registry.join_room(&second_contest, &member);

		registry
			.broadcast(
				&first_contest,
				ServerEvent::TimerUpdate(TimerUpdatePayload {
					question_number: 1,
					remaining_time: 5,
				}),
			)
			.await;
		assert!(rx.try_recv().is_err());
		assert_eq!(registry.room_sessions(&second_contest).len(), 1);
	}
}
