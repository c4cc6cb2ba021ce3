use contest_core::StorageError;
use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("an error occurred with the database")]
	Sqlx(#[from] sqlx::Error),

	#[error("migration error occurred")]
	Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Collapse sqlx failures into the core's storage taxonomy. Unique-key
/// violations become [`StorageError::Duplicate`] so the pipeline can
/// normalize lost submit races to `ALREADY_SUBMITTED`.
pub fn map_sqlx(err: sqlx::Error) -> StorageError {
	match &err {
		sqlx::Error::RowNotFound => StorageError::NotFound,
		sqlx::Error::Database(db) if matches!(db.kind(), ErrorKind::UniqueViolation) => StorageError::Duplicate,
		_ => StorageError::Backend(anyhow::Error::new(err)),
	}
}
