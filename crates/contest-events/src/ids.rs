use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			pub fn new(raw: impl Into<String>) -> Self {
				Self(raw.into())
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_inner(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<String> for $name {
			fn from(raw: String) -> Self {
				Self(raw)
			}
		}

		impl From<&str> for $name {
			fn from(raw: &str) -> Self {
				Self(raw.to_string())
			}
		}
	};
}

string_id!(ContestId);
string_id!(UserId);
string_id!(QuestionId);
string_id!(OptionId);
string_id!(SubmissionId);
