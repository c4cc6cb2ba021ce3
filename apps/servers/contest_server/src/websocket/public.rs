use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use contest_core::repos::ScoreIndex;
use contest_core::{spawn_after, Clock, Contest, ContestRepository, RuntimePhase, TimerHandle};
use contest_events::{ContestId, Envelope, ErrorCode, ErrorPayload, LeaderboardUpdatePayload, ServerEvent};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SUBSCRIBE_CONTESTS: &str = "subscribe_contests";
const SUBSCRIBE_LEADERBOARD: &str = "subscribe_leaderboard";
const CONTESTS_UPDATE: &str = "contests_update";
const PUBLIC_LEADERBOARD_SIZE: usize = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContestSummaryView {
	id: ContestId,
	title: String,
	start_at: DateTime<Utc>,
	end_at: DateTime<Utc>,
	status: RuntimePhase,
}

impl ContestSummaryView {
	fn from_contest(contest: &Contest, now: DateTime<Utc>) -> Self {
		Self {
			id: contest.id.clone(),
			title: contest.title.clone(),
			start_at: contest.start_at,
			end_at: contest.end_at,
			status: contest.phase_at(now),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeLeaderboardPayload {
	contest_id: ContestId,
}

struct PublicMember {
	tx: mpsc::UnboundedSender<Envelope>,
	wants_contests: AtomicBool,
	leaderboards: Mutex<HashSet<ContestId>>,
}

struct HubInner {
	members: DashMap<Uuid, PublicMember>,
	contests: Arc<dyn ContestRepository>,
	index: Arc<dyn ScoreIndex>,
	clock: Arc<dyn Clock>,
	boundary_timers: DashMap<ContestId, Vec<TimerHandle>>,
}

/// Anonymous subscription channels: the contests list (re-pushed whenever a
/// contest crosses a runtime-state boundary) and per-contest leaderboards
/// (re-pushed on every score change).
#[derive(Clone)]
pub struct PublicHub {
	inner: Arc<HubInner>,
}

impl PublicHub {
	pub fn new(contests: Arc<dyn ContestRepository>, index: Arc<dyn ScoreIndex>, clock: Arc<dyn Clock>) -> Self {
		Self {
			inner: Arc::new(HubInner {
				members: DashMap::new(),
				contests,
				index,
				clock,
				boundary_timers: DashMap::new(),
			}),
		}
	}

	fn register(&self, id: Uuid, tx: mpsc::UnboundedSender<Envelope>) {
		self.inner.members.insert(
			id,
			PublicMember {
				tx,
				wants_contests: AtomicBool::new(false),
				leaderboards: Mutex::new(HashSet::new()),
			},
		);
	}

	fn remove(&self, id: Uuid) {
		self.inner.members.remove(&id);
	}

	fn member_tx(&self, id: Uuid) -> Option<mpsc::UnboundedSender<Envelope>> {
		self.inner.members.get(&id).map(|member| member.tx.clone())
	}

	fn mark_wants_contests(&self, id: Uuid) {
		if let Some(member) = self.inner.members.get(&id) {
			member.wants_contests.store(true, Ordering::Relaxed);
		}
	}

	fn add_leaderboard_subscription(&self, id: Uuid, contest_id: &ContestId) {
		if let Some(member) = self.inner.members.get(&id) {
			member.leaderboards.lock().unwrap().insert(contest_id.clone());
		}
	}

	/// Called after every successful submission; pushes fresh standings to
	/// subscribed viewers without blocking the submit path.
	pub fn notify_score_change(&self, contest_id: &ContestId) {
		let hub = self.clone();
		let contest_id = contest_id.clone();
		tokio::spawn(async move {
			hub.push_leaderboard(&contest_id).await;
		});
	}

	async fn push_leaderboard(&self, contest_id: &ContestId) {
		let interested: Vec<_> = self
			.inner
			.members
			.iter()
			.filter(|member| member.leaderboards.lock().unwrap().contains(contest_id))
			.map(|member| member.tx.clone())
			.collect();

		if interested.is_empty() {
			return;
		}

		let Ok(payload) = self.leaderboard_payload(contest_id).await else { return };
		let Ok(envelope) = ServerEvent::LeaderboardUpdate(payload).to_envelope() else { return };

		for tx in interested {
			let _ = tx.send(envelope.clone());
		}
	}

	async fn leaderboard_payload(&self, contest_id: &ContestId) -> Result<LeaderboardUpdatePayload, ()> {
		let entries = self.inner.index.top_n(contest_id, PUBLIC_LEADERBOARD_SIZE).await.map_err(|err| {
			warn!(contest = %contest_id, error = %err, "public leaderboard read failed");
		})?;
		let total_participants = self.inner.index.total_participants(contest_id).await.unwrap_or(entries.len() as u64);

		Ok(LeaderboardUpdatePayload {
			entries,
			total_participants,
			your_rank: None,
		})
	}

	async fn contests_envelope(&self) -> Option<Envelope> {
		let contests = match self.inner.contests.list_contests().await {
			Ok(contests) => contests,
			Err(err) => {
				warn!(error = %err, "contest list read failed");
				return None;
			}
		};

		let now = self.inner.clock.now();
		let views: Vec<ContestSummaryView> = contests.iter().map(|contest| ContestSummaryView::from_contest(contest, now)).collect();

		// Runtime state flips exactly at startAt/endAt; one-shot timers at
		// those instants re-push the list as each boundary passes.
		for contest in &contests {
			self.schedule_boundaries(contest, now);
		}

		serde_json::to_value(views).ok().map(|contests| Envelope::new(CONTESTS_UPDATE, json!({ "contests": contests })))
	}

	fn schedule_boundaries(&self, contest: &Contest, now: DateTime<Utc>) {
		if self.inner.boundary_timers.contains_key(&contest.id) {
			return;
		}

		let mut handles = Vec::new();
		for boundary in [contest.start_at, contest.end_at] {
			let delay_ms = (boundary - now).num_milliseconds();
			if delay_ms <= 0 {
				continue;
			}
			let hub = self.clone();
			let contest_id = contest.id.clone();
			handles.push(spawn_after(std::time::Duration::from_millis(delay_ms as u64), move || {
				tokio::spawn(async move {
					debug!(contest = %contest_id, "runtime-state boundary crossed, re-pushing contest list");
					hub.broadcast_contests().await;
				});
			}));
		}

		if !handles.is_empty() {
			self.inner.boundary_timers.insert(contest.id.clone(), handles);
		}
	}

	async fn broadcast_contests(&self) {
		let Some(envelope) = self.contests_envelope().await else { return };

		for member in self.inner.members.iter() {
			if member.wants_contests.load(Ordering::Relaxed) {
				let _ = member.tx.send(envelope.clone());
			}
		}
	}

	pub fn shutdown(&self) {
		for entry in self.inner.boundary_timers.iter() {
			for handle in entry.value() {
				handle.cancel();
			}
		}
		self.inner.boundary_timers.clear();
		self.inner.members.clear();
	}
}

/// Unauthenticated upgrade; anonymous viewers only ever read public data.
pub async fn public_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_public_socket(socket, state))
}

async fn handle_public_socket(socket: WebSocket, state: AppState) {
	let (sender, receiver) = socket.split();
	let (tx, rx) = mpsc::unbounded_channel();
	let cancel = state.cancel.child_token();
	let id = Uuid::new_v4();

	state.public_hub.register(id, tx);
	info!(session = %id, "public session opened");

	let writer = tokio::spawn(write_public(sender, rx, cancel.clone()));
	read_public(receiver, &state, id, &cancel).await;

	state.public_hub.remove(id);
	cancel.cancel();
	let _ = writer.await;
	debug!(session = %id, "public session closed");
}

async fn write_public(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Envelope>, cancel: CancellationToken) {
	loop {
		tokio::select! {
			envelope = rx.recv() => {
				let Some(envelope) = envelope else { break };
				match envelope.to_json() {
					Ok(json) => {
						if sender.send(Message::Text(json)).await.is_err() {
							break;
						}
					}
					Err(err) => warn!(error = %err, "failed to serialize public envelope"),
				}
			}
			() = cancel.cancelled() => {
				let _ = sender.send(Message::Close(None)).await;
				break;
			}
		}
	}
}

async fn read_public(mut receiver: SplitStream<WebSocket>, state: &AppState, id: Uuid, cancel: &CancellationToken) {
	loop {
		let message = tokio::select! {
			message = receiver.next() => message,
			() = cancel.cancelled() => break,
		};

		match message {
			Some(Ok(Message::Text(text))) => handle_public_text(state, id, &text).await,
			Some(Ok(Message::Close(_))) | None => break,
			Some(Ok(_)) => {}
			Some(Err(err)) => {
				debug!(session = %id, error = %err, "public websocket read error");
				break;
			}
		}
	}
}

async fn handle_public_text(state: &AppState, id: Uuid, text: &str) {
	let Some(tx) = state.public_hub.member_tx(id) else {
		return;
	};

	let send_error = |tx: &mpsc::UnboundedSender<Envelope>, code: ErrorCode, message: String| {
		if let Ok(envelope) = ServerEvent::Error(ErrorPayload::new(code, message)).to_envelope() {
			let _ = tx.send(envelope);
		}
	};

	let envelope = match Envelope::from_json(text) {
		Ok(envelope) => envelope,
		Err(err) => {
			send_error(&tx, ErrorCode::InvalidEvent, format!("malformed envelope: {err}"));
			return;
		}
	};

	match envelope.event.as_str() {
		SUBSCRIBE_CONTESTS => {
			state.public_hub.mark_wants_contests(id);
			if let Some(snapshot) = state.public_hub.contests_envelope().await {
				let _ = tx.send(snapshot);
			}
		}
		SUBSCRIBE_LEADERBOARD => match serde_json::from_value::<SubscribeLeaderboardPayload>(envelope.data) {
			Ok(payload) => {
				state.public_hub.add_leaderboard_subscription(id, &payload.contest_id);
				if let Ok(leaderboard) = state.public_hub.leaderboard_payload(&payload.contest_id).await {
					if let Ok(envelope) = ServerEvent::LeaderboardUpdate(leaderboard).to_envelope() {
						let _ = tx.send(envelope);
					}
				}
			}
			Err(err) => send_error(&tx, ErrorCode::InvalidEvent, format!("malformed subscription: {err}")),
		},
		"ping" => {
			if let Ok(envelope) = ServerEvent::Pong.to_envelope() {
				let _ = tx.send(envelope);
			}
		}
		other => send_error(&tx, ErrorCode::InvalidEvent, format!("unknown public event: {other}")),
	}
}
