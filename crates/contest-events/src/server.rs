use crate::codes::ErrorPayload;
use crate::envelope::Envelope;
use crate::ids::{ContestId, OptionId, QuestionId, SubmissionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionKind {
	Mcq,
	Coding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
	Easy,
	Medium,
	Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
	Accepted,
	WrongAnswer,
	TimeLimitExceeded,
	MemoryLimitExceeded,
	RuntimeError,
	CompilationError,
}

impl VerdictStatus {
	pub fn is_accepted(self) -> bool {
		matches!(self, Self::Accepted)
	}
}

/// An answer option as shown to participants. `is_correct` is stripped
/// before anything reaches this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionView {
	pub id: OptionId,
	pub text: String,
}

/// A question as broadcast to a contest room. MCQ questions carry their
/// options; coding questions carry limits but never test cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
	pub id: QuestionId,
	pub kind: QuestionKind,
	pub title: String,
	pub description: String,
	pub difficulty: Difficulty,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub options: Vec<OptionView>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time_limit_ms: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub memory_limit_mb: Option<u32>,
}

/// One graded test case in a coding verdict. Hidden cases carry only the
/// pass flag; inputs and outputs are redacted before this view is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResultView {
	pub passed: bool,
	pub hidden: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub input: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub expected_output: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub actual_output: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub runtime_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictView {
	pub status: VerdictStatus,
	pub test_results: Vec<TestCaseResultView>,
	pub passed_count: u32,
	pub total_count: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub runtime_ms: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub memory_kb: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestStartPayload {
	pub contest_id: ContestId,
	pub title: String,
	pub total_questions: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub countdown_to_start: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionBroadcastPayload {
	pub question: QuestionView,
	pub question_number: u32,
	pub total_questions: u32,
	pub time_limit: u64,
	pub points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdatePayload {
	pub question_number: u32,
	pub remaining_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionChangePayload {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub next_question_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResultPayload {
	pub submission_id: SubmissionId,
	pub is_correct: bool,
	pub points_earned: i64,
	pub time_taken_ms: u64,
	pub current_score: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub current_rank: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub verdict: Option<VerdictView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
	pub rank: u32,
	pub user_id: UserId,
	pub user_name: String,
	pub score: i64,
	pub questions_answered: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdatePayload {
	pub entries: Vec<LeaderboardEntry>,
	pub total_participants: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub your_rank: Option<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestEndPayload {
	pub contest_id: ContestId,
	pub leaderboard: Vec<LeaderboardEntry>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub your_rank: Option<LeaderboardEntry>,
}

/// Server-to-client events. Names are fixed protocol identifiers.
#[derive(Debug, Clone)]
pub enum ServerEvent {
	ContestStart(ContestStartPayload),
	QuestionBroadcast(QuestionBroadcastPayload),
	TimerUpdate(TimerUpdatePayload),
	QuestionChange(QuestionChangePayload),
	SubmissionResult(SubmissionResultPayload),
	LeaderboardUpdate(LeaderboardUpdatePayload),
	ContestEnd(ContestEndPayload),
	Error(ErrorPayload),
	Pong,
}

impl ServerEvent {
	pub const CONTEST_START: &'static str = "contest_start";
	pub const QUESTION_BROADCAST: &'static str = "question_broadcast";
	pub const TIMER_UPDATE: &'static str = "timer_update";
	pub const QUESTION_CHANGE: &'static str = "question_change";
	pub const SUBMISSION_RESULT: &'static str = "submission_result";
	pub const LEADERBOARD_UPDATE: &'static str = "leaderboard_update";
	pub const CONTEST_END: &'static str = "contest_end";
	pub const ERROR: &'static str = "error";
	pub const PONG: &'static str = "pong";

	pub fn name(&self) -> &'static str {
		match self {
			Self::ContestStart(_) => Self::CONTEST_START,
			Self::QuestionBroadcast(_) => Self::QUESTION_BROADCAST,
			Self::TimerUpdate(_) => Self::TIMER_UPDATE,
			Self::QuestionChange(_) => Self::QUESTION_CHANGE,
			Self::SubmissionResult(_) => Self::SUBMISSION_RESULT,
			Self::LeaderboardUpdate(_) => Self::LEADERBOARD_UPDATE,
			Self::ContestEnd(_) => Self::CONTEST_END,
			Self::Error(_) => Self::ERROR,
			Self::Pong => Self::PONG,
		}
	}

	pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
		let data = match self {
			Self::ContestStart(payload) => serde_json::to_value(payload)?,
			Self::QuestionBroadcast(payload) => serde_json::to_value(payload)?,
			Self::TimerUpdate(payload) => serde_json::to_value(payload)?,
			Self::QuestionChange(payload) => serde_json::to_value(payload)?,
			Self::SubmissionResult(payload) => serde_json::to_value(payload)?,
			Self::LeaderboardUpdate(payload) => serde_json::to_value(payload)?,
			Self::ContestEnd(payload) => serde_json::to_value(payload)?,
			Self::Error(payload) => serde_json::to_value(payload)?,
			Self::Pong => Value::Null,
		};

		Ok(Envelope::new(self.name(), data))
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		self.to_envelope()?.to_json()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codes::{ErrorCode, ErrorPayload};

	#[test]
	fn event_names_match_protocol() {
		let payload = QuestionChangePayload { next_question_number: Some(2) };
		assert_eq!(ServerEvent::QuestionChange(payload).name(), "question_change");
		assert_eq!(ServerEvent::Pong.name(), "pong");
	}

	#[test]
	fn error_event_envelope_carries_code() {
		let event = ServerEvent::Error(ErrorPayload::new(ErrorCode::NotParticipant, "join first"));
		let envelope = event.to_envelope().unwrap();
		assert_eq!(envelope.event, "error");
		assert_eq!(envelope.data["code"], "NOT_PARTICIPANT");
	}

	#[test]
	fn question_view_never_serializes_correct_flag() {
		let view = QuestionView {
			id: QuestionId::new("q1"),
			kind: QuestionKind::Mcq,
			title: "t".into(),
			description: "d".into(),
			difficulty: Difficulty::Easy,
			options: vec![OptionView {
				id: OptionId::new("o1"),
				text: "A".into(),
			}],
			function_name: None,
			time_limit_ms: None,
			memory_limit_mb: None,
		};
		let json = serde_json::to_string(&view).unwrap();
		assert!(!json.contains("isCorrect"));
		assert!(!json.contains("is_correct"));
	}

	#[test]
	fn hidden_test_result_serializes_without_io() {
		let result = TestCaseResultView {
			passed: false,
			hidden: true,
			input: None,
			expected_output: None,
			actual_output: None,
			runtime_ms: Some(12),
		};
		let json = serde_json::to_value(&result).unwrap();
		assert!(json.get("input").is_none());
		assert!(json.get("expectedOutput").is_none());
		assert!(json.get("actualOutput").is_none());
	}
}
