use crate::clock::Clock;
use crate::error::{CoreError, StorageError};
use crate::model::{ContestQuestion, ExecutionMetrics, Question, Submission};
use crate::repos::{CodeGrader, ContestRepository, GraderError, ScoreIndex, SubmissionRepository, Verdict};
use contest_events::{ContestId, OptionId, QuestionId, QuestionKind, SubmissionId, UserId, VerdictStatus, VerdictView};
use std::sync::Arc;
use tracing::{info, warn};

/// C4's view of the live question window. The pipeline consults it before
/// grading: a submission for anything but the open question is rejected.
pub trait QuestionWindow: Send + Sync {
	/// True only when `question_id` is the contest's current question and
	/// its timer has not elapsed. Ambiguity (no runtime state) reads false.
	fn is_open(&self, contest_id: &ContestId, question_id: &QuestionId) -> bool;
	/// Milliseconds since the current question was broadcast.
	fn elapsed_ms(&self, contest_id: &ContestId, question_id: &QuestionId) -> Option<u64>;
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
	pub contest_id: ContestId,
	pub user_id: UserId,
	pub question_id: QuestionId,
	pub selected_option_id: Option<OptionId>,
	pub code: Option<String>,
	pub language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
	pub submission_id: SubmissionId,
	pub is_correct: bool,
	pub points_earned: i64,
	pub time_taken_ms: u64,
	pub current_score: i64,
	pub current_rank: Option<u32>,
	pub verdict: Option<VerdictView>,
}

/// Validate → grade → persist → update score → compute rank, with
/// at-most-once semantics per `(user, question)`.
pub struct SubmissionPipeline {
	contests: Arc<dyn ContestRepository>,
	submissions: Arc<dyn SubmissionRepository>,
	grader: Arc<dyn CodeGrader>,
	index: Arc<dyn ScoreIndex>,
	clock: Arc<dyn Clock>,
	window: Arc<dyn QuestionWindow>,
}

impl SubmissionPipeline {
	pub fn new(
		contests: Arc<dyn ContestRepository>,
		submissions: Arc<dyn SubmissionRepository>,
		grader: Arc<dyn CodeGrader>,
		index: Arc<dyn ScoreIndex>,
		clock: Arc<dyn Clock>,
		window: Arc<dyn QuestionWindow>,
	) -> Self {
		Self {
			contests,
			submissions,
			grader,
			index,
			clock,
			window,
		}
	}

	pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, CoreError> {
		let contest = self.contests.get_contest(&request.contest_id).await?.ok_or(CoreError::ContestNotFound)?;

		// Derived fresh from timestamps, never from a cached status column.
		if !contest.phase_at(self.clock.now()).is_active() {
			return Err(CoreError::ContestNotActive);
		}

		if !self.contests.is_participant(&request.contest_id, &request.user_id).await? {
			return Err(CoreError::NotParticipant);
		}

		let questions = self.contests.get_ordered_questions(&request.contest_id).await?;
		let (slot, question) = questions
			.into_iter()
			.find(|(slot, _)| slot.question_id == request.question_id)
			.ok_or(CoreError::InvalidQuestion)?;

		if !self.window.is_open(&request.contest_id, &request.question_id) {
			return Err(CoreError::TimeExpired);
		}
		let time_taken_ms = self.window.elapsed_ms(&request.contest_id, &request.question_id).unwrap_or(0);

		let existing = self.submissions.find_submission(&request.user_id, &request.contest_id, &request.question_id).await?;

		match question.kind {
			QuestionKind::Mcq => {
				if existing.is_some() {
					return Err(CoreError::AlreadySubmitted);
				}
				self.submit_mcq(request, &slot, &question, time_taken_ms).await
			}
			QuestionKind::Coding => match existing {
				Some(prior) if prior.is_correct => self.refresh_accepted_code(request, prior, time_taken_ms).await,
				prior => self.submit_coding(request, &slot, prior, time_taken_ms).await,
			},
		}
	}

	async fn submit_mcq(&self, request: SubmitRequest, slot: &ContestQuestion, question: &Question, time_taken_ms: u64) -> Result<SubmitOutcome, CoreError> {
		let selected = request.selected_option_id.clone().ok_or(CoreError::MalformedSubmission)?;

		let options = self.contests.options_for(&question.id).await?;
		let option = options.iter().find(|option| option.id == selected).ok_or(CoreError::InvalidOption)?;

		let is_correct = option.is_correct;
		let points_earned = if is_correct { slot.points } else { 0 };
		let status = if is_correct { VerdictStatus::Accepted } else { VerdictStatus::WrongAnswer };

		let submission = Submission {
			id: SubmissionId::new(uuid_like_id()),
			user_id: request.user_id.clone(),
			contest_id: request.contest_id.clone(),
			question_id: request.question_id.clone(),
			selected_option_id: Some(selected),
			code: None,
			language: None,
			status,
			is_correct,
			points_earned,
			submitted_at: self.clock.now(),
			metrics: ExecutionMetrics::default(),
		};

		self.persist_and_score(submission, time_taken_ms, None).await
	}

	async fn submit_coding(&self, request: SubmitRequest, slot: &ContestQuestion, prior: Option<Submission>, time_taken_ms: u64) -> Result<SubmitOutcome, CoreError> {
		let code = request.code.clone().ok_or(CoreError::MalformedSubmission)?;
		let language = request.language.clone().ok_or(CoreError::MalformedSubmission)?;

		let verdict = match self.grader.grade(&code, &language, &request.question_id).await {
			Ok(verdict) => verdict,
			Err(GraderError::Wedged(reason)) => {
				warn!(question = %request.question_id, %reason, "grader reported wedged process");
				Verdict::bare(VerdictStatus::RuntimeError)
			}
			Err(GraderError::Unavailable(source)) => {
				// Persist a non-accepted row so duplicates remain detectable,
				// then surface the infrastructure failure.
				let submission = build_coding_row(&request, prior.as_ref(), code, language, VerdictStatus::RuntimeError, 0, ExecutionMetrics::default(), self.clock.now());
				if let Err(err) = self.submissions.create_or_update(&submission).await {
					warn!(question = %request.question_id, error = %err, "failed to persist submission after grader outage");
				}
				return Err(CoreError::GraderUnavailable(source));
			}
		};

		let is_correct = verdict.status.is_accepted();
		let points_earned = if is_correct { slot.points } else { 0 };
		let metrics = ExecutionMetrics {
			runtime_ms: verdict.runtime_ms,
			memory_kb: verdict.memory_kb,
		};

		let submission = build_coding_row(&request, prior.as_ref(), code, language, verdict.status, points_earned, metrics, self.clock.now());
		self.persist_and_score(submission, time_taken_ms, Some(verdict.redacted_view())).await
	}

	/// Accepted coding rows are terminal: keep the latest code text, refuse
	/// to downgrade status, points or score.
	async fn refresh_accepted_code(&self, request: SubmitRequest, mut prior: Submission, time_taken_ms: u64) -> Result<SubmitOutcome, CoreError> {
		if let Some(code) = request.code {
			prior.code = Some(code);
		}
		if let Some(language) = request.language {
			prior.language = Some(language);
		}
		self.submissions.create_or_update(&prior).await?;

		let current_score = self.current_score(&prior.user_id, &prior.contest_id).await?;
		let current_rank = self.index.user_rank(&prior.contest_id, &prior.user_id).await?.map(|entry| entry.rank);

		info!(user = %prior.user_id, question = %prior.question_id, "kept accepted verdict, refreshed code text");

		Ok(SubmitOutcome {
			submission_id: prior.id,
			is_correct: true,
			points_earned: prior.points_earned,
			time_taken_ms,
			current_score,
			current_rank,
			verdict: None,
		})
	}

	async fn persist_and_score(&self, submission: Submission, time_taken_ms: u64, verdict: Option<VerdictView>) -> Result<SubmitOutcome, CoreError> {
		match self.submissions.create_or_update(&submission).await {
			Ok(()) => {}
			// Concurrent duplicate lost the storage race.
			Err(StorageError::Duplicate) => return Err(CoreError::AlreadySubmitted),
			Err(err) => return Err(err.into()),
		}

		let current_score = self.current_score(&submission.user_id, &submission.contest_id).await?;
		self.index.update_score(&submission.contest_id, &submission.user_id, current_score).await?;
		let current_rank = self.index.user_rank(&submission.contest_id, &submission.user_id).await?.map(|entry| entry.rank);

		info!(
			user = %submission.user_id,
			contest = %submission.contest_id,
			question = %submission.question_id,
			correct = submission.is_correct,
			score = current_score,
			"submission graded"
		);

		Ok(SubmitOutcome {
			submission_id: submission.id,
			is_correct: submission.is_correct,
			points_earned: submission.points_earned,
			time_taken_ms,
			current_score,
			current_rank,
			verdict,
		})
	}

	/// Stored score invariant: the sum of points over currently-correct
	/// submissions.
	async fn current_score(&self, user_id: &UserId, contest_id: &ContestId) -> Result<i64, CoreError> {
		let correct = self.submissions.correct_with_points(user_id, contest_id).await?;
		Ok(correct.iter().map(|(_, points)| points).sum())
	}
}

#[allow(clippy::too_many_arguments)]
fn build_coding_row(
	request: &SubmitRequest,
	prior: Option<&Submission>,
	code: String,
	language: String,
	status: VerdictStatus,
	points_earned: i64,
	metrics: ExecutionMetrics,
	now: chrono::DateTime<chrono::Utc>,
) -> Submission {
	Submission {
		id: prior.map_or_else(|| SubmissionId::new(uuid_like_id()), |prior| prior.id.clone()),
		user_id: request.user_id.clone(),
		contest_id: request.contest_id.clone(),
		question_id: request.question_id.clone(),
		selected_option_id: None,
		code: Some(code),
		language: Some(language),
		status,
		is_correct: status.is_accepted(),
		points_earned,
		submitted_at: now,
		metrics,
	}
}

/// Collision-resistant id without pulling uuid into the core: nanosecond
/// timestamp plus a process-unique counter.
fn uuid_like_id() -> String {
	use std::sync::atomic::{AtomicU64, Ordering};
	static COUNTER: AtomicU64 = AtomicU64::new(0);
	let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
	let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
	format!("sub-{nanos:x}-{seq:x}")
}
