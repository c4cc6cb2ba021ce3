use crate::model::{ContestQuestion, Question};
use contest_events::{ContestId, QuestionBroadcastPayload, QuestionId, UserId};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// In-memory progression state for one ACTIVE contest. Owned and mutated
/// exclusively by that contest's engine task.
#[derive(Debug)]
pub struct RuntimeContestState {
	pub contest_id: ContestId,
	pub questions: Vec<(ContestQuestion, Question)>,
	pub current_index: usize,
	pub submitted_users: HashSet<UserId>,
	pub total_participants: u64,
}

impl RuntimeContestState {
	pub fn new(contest_id: ContestId, questions: Vec<(ContestQuestion, Question)>, total_participants: u64) -> Self {
		Self {
			contest_id,
			questions,
			current_index: 0,
			submitted_users: HashSet::new(),
			total_participants,
		}
	}

	/// Early-advancement predicate. A zero-participant contest never
	/// advances early; only the timer ends its questions.
	pub fn all_submitted(&self) -> bool {
		self.total_participants > 0 && self.submitted_users.len() as u64 >= self.total_participants
	}

	pub fn current_question(&self) -> Option<&(ContestQuestion, Question)> {
		self.questions.get(self.current_index)
	}

	pub fn total_questions(&self) -> u32 {
		self.questions.len() as u32
	}
}

/// Read-side snapshot of the question currently on the clock, published
/// through a watch channel for late joiners and the submission window.
#[derive(Debug, Clone)]
pub struct ActiveQuestion {
	pub question_id: QuestionId,
	pub payload: QuestionBroadcastPayload,
	pub started_at: Instant,
	pub time_limit: Duration,
}

impl ActiveQuestion {
	/// `None` once the timer has elapsed, even if the transition has not
	/// fired yet.
	pub fn remaining(&self) -> Option<Duration> {
		let elapsed = self.started_at.elapsed();
		if elapsed >= self.time_limit {
			None
		} else {
			Some(self.time_limit - elapsed)
		}
	}

	pub fn remaining_secs(&self) -> u64 {
		self.remaining().map_or(0, |left| left.as_secs())
	}

	pub fn elapsed_ms(&self) -> u64 {
		self.started_at.elapsed().as_millis() as u64
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use contest_events::{Difficulty, QuestionKind, QuestionView};

	fn state(total: u64) -> RuntimeContestState {
		RuntimeContestState::new(ContestId::new("c1"), Vec::new(), total)
	}

	#[test]
	fn zero_participants_never_advance_early() {
		let mut state = state(0);
		state.submitted_users.insert(UserId::new("u1"));
		assert!(!state.all_submitted());
	}

	#[test]
	fn predicate_fires_at_or_above_denominator() {
		let mut state = state(2);
		state.submitted_users.insert(UserId::new("u1"));
		assert!(!state.all_submitted());
		state.submitted_users.insert(UserId::new("u2"));
		assert!(state.all_submitted());
		state.submitted_users.insert(UserId::new("u3"));
		assert!(state.all_submitted());
	}

	#[tokio::test(start_paused = true)]
	async fn active_question_expires_to_none() {
		let question = ActiveQuestion {
			question_id: QuestionId::new("q1"),
			payload: QuestionBroadcastPayload {
				question: QuestionView {
					id: QuestionId::new("q1"),
					kind: QuestionKind::Mcq,
					title: "t".into(),
					description: String::new(),
					difficulty: Difficulty::Easy,
					options: Vec::new(),
					function_name: None,
					time_limit_ms: None,
					memory_limit_mb: None,
				},
				question_number: 1,
				total_questions: 1,
				time_limit: 30,
				points: 10,
			},
			started_at: Instant::now(),
			time_limit: Duration::from_secs(30),
		};

		tokio::time::advance(Duration::from_secs(29)).await;
		assert!(question.remaining().is_some());
		assert_eq!(question.remaining_secs(), 1);

		tokio::time::advance(Duration::from_secs(2)).await;
		assert!(question.remaining().is_none());
		assert_eq!(question.remaining_secs(), 0);
	}
}
