mod auth;
mod config;
mod grader;
mod state;
mod websocket;

use anyhow::Result;
use auth::JwtVerifier;
use axum::Router;
use clap::Parser;
use config::Config;
use contest_core::repos::{CodeGrader, ContestRepository, LeaderboardSnapshotRepository, ScoreIndex, SubmissionRepository, TokenVerifier};
use contest_core::{Clock, ContestOrchestrator, OrchestratorDeps, QuestionWindow, RuntimePhase, SubmissionPipeline, SystemClock};
use contest_store::{SqliteContestRepository, SqliteSnapshotRepository, SqliteSubmissionRepository};
use grader::HttpCodeGrader;
use leaderboard_index::{IndexConfig, RedisScoreIndex};
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, util::SubscriberInitExt, Layer};
use websocket::{heartbeat::spawn_heartbeat, public::PublicHub, LeaderboardDebouncer, RoomRegistry};

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();
	let config = Config::parse();
	let _ = init_tracing(&config);
	let config = Arc::new(config);

	let pool = contest_store::connect(&config.database_url).await?;

	let contests: Arc<dyn ContestRepository> = Arc::new(SqliteContestRepository::new(pool.clone()));
	let submissions: Arc<dyn SubmissionRepository> = Arc::new(SqliteSubmissionRepository::new(pool.clone()));
	let snapshots: Arc<dyn LeaderboardSnapshotRepository> = Arc::new(SqliteSnapshotRepository::new(pool.clone()));
	let clock: Arc<dyn Clock> = Arc::new(SystemClock);
	let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&config.hmac_key));
	let code_grader: Arc<dyn CodeGrader> = Arc::new(HttpCodeGrader::new(config.grader_url.clone(), Duration::from_secs(config.grader_timeout_secs))?);

	let index_config = IndexConfig {
		redis_url: config.redis_url.clone(),
		..IndexConfig::default()
	};
	let index: Arc<dyn ScoreIndex> = Arc::new(RedisScoreIndex::new(index_config, contests.clone(), submissions.clone(), snapshots.clone())?);

	let rooms = Arc::new(RoomRegistry::new(index.clone(), config.leaderboard_size));

	let orchestrator = ContestOrchestrator::new(OrchestratorDeps {
		contests: contests.clone(),
		submissions: submissions.clone(),
		index: index.clone(),
		broadcaster: rooms.clone(),
		clock: clock.clone(),
	});

	let window: Arc<dyn QuestionWindow> = Arc::new(orchestrator.clone());
	let pipeline = Arc::new(SubmissionPipeline::new(
		contests.clone(),
		submissions.clone(),
		code_grader,
		index.clone(),
		clock.clone(),
		window,
	));

	let public_hub = PublicHub::new(contests.clone(), index.clone(), clock.clone());
	let debouncer = Arc::new(LeaderboardDebouncer::new(rooms.clone(), Duration::from_millis(config.leaderboard_debounce_ms)));

	let shutdown_token = CancellationToken::new();
	let app_state = AppState {
		config: config.clone(),
		contests: contests.clone(),
		submissions,
		snapshots,
		index,
		clock: clock.clone(),
		verifier,
		rooms: rooms.clone(),
		orchestrator: orchestrator.clone(),
		pipeline,
		public_hub: public_hub.clone(),
		debouncer,
		cancel: shutdown_token.clone(),
	};

	// Pick running contests back up and schedule upcoming ones; the engines
	// preload submitted sets from storage, so a restart mid-contest resumes
	// at the right question.
	resume_contests(&orchestrator, contests.as_ref(), clock.as_ref()).await;

	let heartbeat = spawn_heartbeat(rooms.clone(), Duration::from_secs(config.heartbeat_secs), shutdown_token.clone());

	let app = Router::new().merge(websocket::router()).layer(TraceLayer::new_for_http()).with_state(app_state);

	let address = format!("{}:{}", config.host, config.port);
	let listener = TcpListener::bind(&address).await?;
	tracing::info!("listening on {}", listener.local_addr()?);
	let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());

	let signal_token = shutdown_token.clone();
	let signal_task = tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("received shutdown signal");
		signal_token.cancel();
	});

	tokio::select! {
		result = server => {
			if let Err(err) = result {
				tracing::error!("server error: {err}");
			}
		}
		_ = shutdown_token.cancelled() => {
			tracing::info!("shutdown initiated");
		}
	}

	// Drain sessions, stop contest engines, drop public subscriptions.
	tracing::info!("starting graceful shutdown");
	shutdown_token.cancel();
	rooms.shutdown(Duration::from_secs(config.shutdown_grace_secs)).await;
	orchestrator.shutdown().await;
	public_hub.shutdown();

	heartbeat.abort();
	signal_task.abort();

	tracing::info!("shutdown complete");
	Ok(())
}

/// On boot, every non-completed contest is handed to the orchestrator:
/// active ones spawn engines immediately, upcoming ones get a start timer.
async fn resume_contests(orchestrator: &ContestOrchestrator, contests: &dyn ContestRepository, clock: &dyn Clock) {
	let known = match contests.list_contests().await {
		Ok(known) => known,
		Err(err) => {
			tracing::error!("failed to list contests during startup: {err}");
			return;
		}
	};

	for contest in known {
		if contest.phase_at(clock.now()) == RuntimePhase::Completed {
			continue;
		}
		if let Err(err) = orchestrator.start_contest(&contest.id).await {
			tracing::warn!(contest = %contest.id, "failed to resume contest: {err}");
		}
	}
}

#[must_use]
pub fn init_tracing(config: &Config) -> Option<()> {
	use std::str::FromStr;
	use tracing_subscriber::layer::SubscriberExt;

	let filter = EnvFilter::from_str(config.rust_log.as_deref().unwrap_or("info")).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(
				tracing_subscriber::fmt::layer()
					.event_format(tracing_subscriber::fmt::format().pretty())
					.with_filter(filter),
			)
		})
		.init();
	None
}
