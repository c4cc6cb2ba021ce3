use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	/// Use JSON formatting for tracing
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	/// Log level filter
	#[arg(long, env = "RUST_LOG")]
	pub rust_log: Option<String>,

	/// Server host
	#[arg(long, env = "HOST", default_value = "127.0.0.1")]
	pub host: String,

	/// Server port
	#[arg(long, env = "PORT", default_value = "3000")]
	pub port: u16,

	/// SQLite database URL
	#[arg(long, env = "DATABASE_URL", default_value = "sqlite://contest.db")]
	pub database_url: String,

	/// Redis URL for the live leaderboard index
	#[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
	pub redis_url: String,

	/// HMAC signing key for JWT tokens
	#[arg(long, env = "HMAC_KEY")]
	pub hmac_key: String,

	/// Base URL of the code-execution engine
	#[arg(long, env = "GRADER_URL", default_value = "http://127.0.0.1:4100")]
	pub grader_url: String,

	/// Grading request timeout in seconds
	#[arg(long, env = "GRADER_TIMEOUT", default_value = "30")]
	pub grader_timeout_secs: u64,

	/// Heartbeat sweep interval in seconds
	#[arg(long, env = "HEARTBEAT_INTERVAL", default_value = "30")]
	pub heartbeat_secs: u64,

	/// Delay used to coalesce leaderboard broadcasts after submissions
	#[arg(long, env = "LEADERBOARD_DEBOUNCE_MS", default_value = "100")]
	pub leaderboard_debounce_ms: u64,

	/// Entries sent in room leaderboard updates
	#[arg(long, env = "LEADERBOARD_SIZE", default_value = "10")]
	pub leaderboard_size: usize,

	/// Grace given to connected sessions on shutdown, in seconds
	#[arg(long, env = "SHUTDOWN_GRACE", default_value = "10")]
	pub shutdown_grace_secs: u64,
}

impl Config {
	pub fn new() -> Self {
		Self::parse()
	}
}
