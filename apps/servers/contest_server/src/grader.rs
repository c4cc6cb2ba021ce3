use async_trait::async_trait;
use contest_core::repos::{CodeGrader, GradedTestCase, GraderError, Verdict};
use contest_events::{QuestionId, VerdictStatus};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GradeRequest<'a> {
	code: &'a str,
	language: &'a str,
	question_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeTestCase {
	passed: bool,
	#[serde(default)]
	is_hidden: bool,
	#[serde(default)]
	input: String,
	#[serde(default)]
	expected_output: String,
	#[serde(default)]
	actual_output: String,
	#[serde(default)]
	runtime_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeResponse {
	status: VerdictStatus,
	#[serde(default)]
	test_results: Vec<GradeTestCase>,
	#[serde(default)]
	runtime_ms: Option<u64>,
	#[serde(default)]
	memory_kb: Option<u64>,
}

/// JSON client for the external code-execution engine.
///
/// A gateway-timeout from the engine means the sandboxed process wedged and
/// is graded as a runtime error; transport failures mean the engine itself
/// is unreachable.
pub struct HttpCodeGrader {
	client: reqwest::Client,
	base_url: String,
}

impl HttpCodeGrader {
	pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GraderError> {
		let client = reqwest::Client::builder().timeout(timeout).build().map_err(|err| GraderError::Unavailable(err.into()))?;
		Ok(Self {
			client,
			base_url: base_url.into(),
		})
	}
}

#[async_trait]
impl CodeGrader for HttpCodeGrader {
	async fn grade(&self, code: &str, language: &str, question_id: &QuestionId) -> Result<Verdict, GraderError> {
		let url = format!("{}/grade", self.base_url.trim_end_matches('/'));
		let request = GradeRequest {
			code,
			language,
			question_id: question_id.as_str(),
		};

		let response = self
			.client
			.post(&url)
			.json(&request)
			.send()
			.await
			.map_err(|err| GraderError::Unavailable(err.into()))?;

		match response.status() {
			StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
				return Err(GraderError::Wedged(format!("execution engine timed out grading {question_id}")));
			}
			status if !status.is_success() => {
				return Err(GraderError::Unavailable(anyhow::anyhow!("grader returned {status}")));
			}
			_ => {}
		}

		let body: GradeResponse = response.json().await.map_err(|err| GraderError::Unavailable(err.into()))?;
		debug!(question = %question_id, status = ?body.status, cases = body.test_results.len(), "verdict received");

		Ok(Verdict {
			status: body.status,
			test_results: body
				.test_results
				.into_iter()
				.map(|case| GradedTestCase {
					passed: case.passed,
					is_hidden: case.is_hidden,
					input: case.input,
					expected_output: case.expected_output,
					actual_output: case.actual_output,
					runtime_ms: case.runtime_ms,
				})
				.collect(),
			runtime_ms: body.runtime_ms,
			memory_kb: body.memory_kb,
		})
	}
}
