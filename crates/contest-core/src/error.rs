use contest_events::ErrorCode;
use thiserror::Error;

/// Failures surfaced by durable-storage adapters. Transient backend errors
/// are retried inside the adapter and reach the core only once exhausted.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("record already exists")]
	Duplicate,
	#[error("record not found")]
	NotFound,
	#[error("storage backend failure")]
	Backend(#[source] anyhow::Error),
}

/// Failures surfaced by the sorted score index.
#[derive(Debug, Error)]
pub enum IndexError {
	#[error("score index backend failure")]
	Backend(#[source] anyhow::Error),
	#[error("score index unavailable after {attempts} attempts")]
	RetriesExhausted { attempts: u32 },
}

/// Core error taxonomy. Precondition variants map one-to-one onto wire
/// error codes; infrastructure variants collapse to `SERVER_ERROR`.
#[derive(Debug, Error)]
pub enum CoreError {
	#[error("contest not found")]
	ContestNotFound,
	#[error("contest is not active")]
	ContestNotActive,
	#[error("user is not a participant of this contest")]
	NotParticipant,
	#[error("question is not part of this contest")]
	InvalidQuestion,
	#[error("option does not belong to the submitted question")]
	InvalidOption,
	#[error("a terminal submission already exists for this question")]
	AlreadySubmitted,
	#[error("the question timer has elapsed")]
	TimeExpired,
	#[error("submission payload is missing required fields")]
	MalformedSubmission,
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error(transparent)]
	Index(#[from] IndexError),
	#[error("grading backend unavailable")]
	GraderUnavailable(#[source] anyhow::Error),
}

impl CoreError {
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::ContestNotFound => ErrorCode::ContestNotFound,
			Self::ContestNotActive => ErrorCode::ContestNotActive,
			Self::NotParticipant => ErrorCode::NotParticipant,
			Self::InvalidQuestion => ErrorCode::InvalidQuestion,
			Self::InvalidOption => ErrorCode::InvalidOption,
			Self::AlreadySubmitted => ErrorCode::AlreadySubmitted,
			Self::TimeExpired => ErrorCode::TimeExpired,
			Self::MalformedSubmission => ErrorCode::InvalidEvent,
			Self::Storage(_) | Self::Index(_) | Self::GraderUnavailable(_) => ErrorCode::ServerError,
		}
	}

	/// Precondition rejections are expected traffic; infrastructure
	/// failures are not.
	pub fn is_precondition(&self) -> bool {
		!matches!(self, Self::Storage(_) | Self::Index(_) | Self::GraderUnavailable(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn precondition_errors_map_to_typed_codes() {
		assert_eq!(CoreError::AlreadySubmitted.code(), ErrorCode::AlreadySubmitted);
		assert_eq!(CoreError::TimeExpired.code(), ErrorCode::TimeExpired);
		assert_eq!(CoreError::MalformedSubmission.code(), ErrorCode::InvalidEvent);
		assert!(CoreError::AlreadySubmitted.is_precondition());
	}

	#[test]
	fn infrastructure_errors_collapse_to_server_error() {
		let err = CoreError::Storage(StorageError::Backend(anyhow::anyhow!("boom")));
		assert_eq!(err.code(), ErrorCode::ServerError);
		assert!(!err.is_precondition());
	}
}
