use crate::config::Config;
use crate::websocket::public::PublicHub;
use crate::websocket::{LeaderboardDebouncer, RoomRegistry};
use contest_core::repos::{ContestRepository, LeaderboardSnapshotRepository, ScoreIndex, SubmissionRepository, TokenVerifier};
use contest_core::{Clock, ContestOrchestrator, SubmissionPipeline};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Process-wide state, built once in `main` and handed to every handler.
/// Components reference each other only through the core's trait seams.
#[derive(Clone)]
pub struct AppState {
	pub config: Arc<Config>,
	pub contests: Arc<dyn ContestRepository>,
	pub submissions: Arc<dyn SubmissionRepository>,
	pub snapshots: Arc<dyn LeaderboardSnapshotRepository>,
	pub index: Arc<dyn ScoreIndex>,
	pub clock: Arc<dyn Clock>,
	pub verifier: Arc<dyn TokenVerifier>,
	pub rooms: Arc<RoomRegistry>,
	pub orchestrator: ContestOrchestrator,
	pub pipeline: Arc<SubmissionPipeline>,
	pub public_hub: PublicHub,
	pub debouncer: Arc<LeaderboardDebouncer>,
	pub cancel: CancellationToken,
}
