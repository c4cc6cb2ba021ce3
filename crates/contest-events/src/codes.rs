use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Typed error codes carried in the `error` event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	ContestNotFound,
	ContestNotActive,
	NotParticipant,
	InvalidEvent,
	AlreadySubmitted,
	TimeExpired,
	InvalidQuestion,
	InvalidOption,
	ServerError,
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let code = match self {
			Self::ContestNotFound => "CONTEST_NOT_FOUND",
			Self::ContestNotActive => "CONTEST_NOT_ACTIVE",
			Self::NotParticipant => "NOT_PARTICIPANT",
			Self::InvalidEvent => "INVALID_EVENT",
			Self::AlreadySubmitted => "ALREADY_SUBMITTED",
			Self::TimeExpired => "TIME_EXPIRED",
			Self::InvalidQuestion => "INVALID_QUESTION",
			Self::InvalidOption => "INVALID_OPTION",
			Self::ServerError => "SERVER_ERROR",
		};
		write!(f, "{code}")
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

impl ErrorPayload {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			details: None,
		}
	}

	pub fn with_details(mut self, details: Value) -> Self {
		self.details = Some(details);
		self
	}
}

/// WebSocket close codes used by both channels.
pub mod close_codes {
	/// Normal closure after a terminal event.
	pub const NORMAL: u16 = 1000;
	/// Upgrade carried an invalid or expired token.
	pub const AUTH_FAILED: u16 = 4401;
	/// Authenticated but not allowed to perform the action.
	pub const FORBIDDEN: u16 = 4403;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_codes_serialize_screaming_snake() {
		let json = serde_json::to_string(&ErrorCode::AlreadySubmitted).unwrap();
		assert_eq!(json, "\"ALREADY_SUBMITTED\"");
		assert_eq!(ErrorCode::AlreadySubmitted.to_string(), "ALREADY_SUBMITTED");
	}

	#[test]
	fn error_payload_omits_empty_details() {
		let payload = ErrorPayload::new(ErrorCode::TimeExpired, "question timer elapsed");
		let json = serde_json::to_value(&payload).unwrap();
		assert!(json.get("details").is_none());
	}
}
