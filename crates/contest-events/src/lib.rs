pub mod client;
pub mod codes;
pub mod envelope;
pub mod ids;
pub mod server;

pub use client::{ClientEvent, SubmitAnswerPayload};
pub use codes::{close_codes, ErrorCode, ErrorPayload};
pub use envelope::Envelope;
pub use ids::{ContestId, OptionId, QuestionId, SubmissionId, UserId};
pub use server::{
	ContestEndPayload, ContestStartPayload, Difficulty, LeaderboardEntry, LeaderboardUpdatePayload, OptionView, QuestionBroadcastPayload, QuestionChangePayload, QuestionKind,
	QuestionView, ServerEvent, SubmissionResultPayload, TestCaseResultView, TimerUpdatePayload, VerdictStatus, VerdictView,
};
