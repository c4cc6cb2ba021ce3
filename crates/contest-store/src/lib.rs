pub mod contests;
pub mod error;
pub mod snapshots;
pub mod submissions;

pub use contests::SqliteContestRepository;
pub use error::{map_sqlx, StoreError};
pub use snapshots::SqliteSnapshotRepository;
pub use submissions::SqliteSubmissionRepository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Open the pool and bring the schema up to date. A busy timeout absorbs
/// short lock contention so callers only ever see real failures.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
	let options = SqliteConnectOptions::from_str(database_url)?
		.create_if_missing(true)
		.busy_timeout(Duration::from_secs(5))
		.foreign_keys(true);

	let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

	MIGRATOR.run(&pool).await?;
	info!("database ready at {database_url}");

	Ok(pool)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
	MIGRATOR.run(&pool).await.unwrap();
	pool
}
