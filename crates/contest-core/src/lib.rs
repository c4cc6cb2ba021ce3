pub mod clock;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod repos;
pub mod submission;

pub use clock::{spawn_after, spawn_every, Clock, SystemClock, TimerHandle};
pub use error::{CoreError, IndexError, StorageError};
pub use model::{validate_question_order, AnswerOption, Contest, ContestParticipant, ContestQuestion, ExecutionMetrics, LeaderboardRow, Question, RuntimePhase, Submission, TestCase};
pub use orchestrator::{ActiveQuestion, ContestBroadcaster, ContestOrchestrator, OrchestratorDeps, INTERSTITIAL_GRACE};
pub use repos::{
	AuthClaims, AuthError, CodeGrader, ContestRepository, GradedTestCase, GraderError, LeaderboardSnapshotRepository, Role, ScoreIndex, SubmissionRepository, TokenVerifier, Verdict,
};
pub use submission::{QuestionWindow, SubmissionPipeline, SubmitOutcome, SubmitRequest};
