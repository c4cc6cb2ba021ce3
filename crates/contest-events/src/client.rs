use crate::codes::ErrorCode;
use crate::envelope::Envelope;
use crate::ids::{ContestId, OptionId, QuestionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinContestPayload {
	pub contest_id: ContestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerPayload {
	pub question_id: QuestionId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub selected_option_id: Option<OptionId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub language: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncPayload {
	pub contest_id: ContestId,
}

/// Client-to-server events on the authenticated channel. Names are fixed
/// protocol identifiers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
	JoinContest(JoinContestPayload),
	SubmitAnswer(SubmitAnswerPayload),
	Resync(ResyncPayload),
	Ping,
}

#[derive(Debug, Error)]
pub enum ParseError {
	#[error("unknown client event: {0}")]
	UnknownEvent(String),
	#[error("malformed payload for {event}: {source}")]
	MalformedPayload {
		event: String,
		#[source]
		source: serde_json::Error,
	},
}

impl ParseError {
	pub fn code(&self) -> ErrorCode {
		ErrorCode::InvalidEvent
	}
}

impl ClientEvent {
	pub const JOIN_CONTEST: &'static str = "join_contest";
	pub const SUBMIT_ANSWER: &'static str = "submit_answer";
	pub const RESYNC: &'static str = "resync";
	pub const PING: &'static str = "ping";

	pub fn from_envelope(envelope: Envelope) -> Result<Self, ParseError> {
		let Envelope { event, data, .. } = envelope;
		let malformed = |event: &str| {
			let event = event.to_string();
			move |source| ParseError::MalformedPayload { event, source }
		};

		match event.as_str() {
			Self::JOIN_CONTEST => serde_json::from_value(data).map(Self::JoinContest).map_err(malformed(Self::JOIN_CONTEST)),
			Self::SUBMIT_ANSWER => serde_json::from_value(data).map(Self::SubmitAnswer).map_err(malformed(Self::SUBMIT_ANSWER)),
			Self::RESYNC => serde_json::from_value(data).map(Self::Resync).map_err(malformed(Self::RESYNC)),
			Self::PING => Ok(Self::Ping),
			other => Err(ParseError::UnknownEvent(other.to_string())),
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::JoinContest(_) => Self::JOIN_CONTEST,
			Self::SubmitAnswer(_) => Self::SUBMIT_ANSWER,
			Self::Resync(_) => Self::RESYNC,
			Self::Ping => Self::PING,
		}
	}
}
