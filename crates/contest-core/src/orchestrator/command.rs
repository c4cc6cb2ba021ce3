use contest_events::{QuestionId, UserId};

/// Commands accepted by a running contest's engine task. All runtime-state
/// mutation funnels through this channel, so no locking is needed.
#[derive(Debug, Clone)]
pub enum ContestCommand {
	/// A submission for `question_id` was persisted; feeds early advancement.
	RecordSubmission { user_id: UserId, question_id: QuestionId },
	/// Recount `total_participants` from durable storage.
	UpdateParticipantCount,
	/// Tear the contest down without finishing the question sequence.
	Stop,
}
