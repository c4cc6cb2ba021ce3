use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire envelope shared by both channels: `{event, data, timestamp}`.
///
/// The `event` name selects the payload shape; `data` is deserialized by the
/// receiving side once the name is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
	pub event: String,
	#[serde(default)]
	pub data: Value,
	pub timestamp: DateTime<Utc>,
}

impl Envelope {
	pub fn new(event: impl Into<String>, data: Value) -> Self {
		Self {
			event: event.into(),
			data,
			timestamp: Utc::now(),
		}
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(raw)
	}
}
