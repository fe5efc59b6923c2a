//! Grading of challenges whose deliverable is a routing object.
//!
//! The submission runs once per grading pass in its own interpreter, its entry
//! point builds the app, and every case's request line is replayed against that
//! app in case order. Nothing touches a socket. Building the app and each
//! request get the time limit of their own.

use std::fmt::Write;

use serde_json::Value;

use crate::config::TestCase;
use crate::sandbox::SandboxRunner;
use crate::sandbox::protocol::{
    HarnessOutcome, HarnessRequest, RequestOutcome, SyntheticRequest, SyntheticResponse,
};
use crate::sandbox::RawOutcome;

use super::compare::outputs_match;
use super::error::ExecutionFailure;
use super::{CaseVerdict, Judge, Verdict};

const SUPPORTED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Status code whose response carries no body
const NO_CONTENT: u16 = 204;

/// A parsed `"<METHOD> <path> [<json-body>]"` case input
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

impl RequestLine {
    /// Parses a case input; body parse problems are appended to `diagnostics`
    pub fn parse(input: &str, diagnostics: &mut String) -> Result<Self, ExecutionFailure> {
        let mut parts = input.trim().splitn(3, ' ');
        let method = parts.next().unwrap_or_default().to_uppercase();
        let path = parts.next().unwrap_or_default().trim();
        let body_text = parts.next().map(str::trim).unwrap_or_default();

        if !SUPPORTED_METHODS.contains(&method.as_str()) {
            return Err(ExecutionFailure::RuntimeFailure(format!(
                "Unsupported HTTP method: {method}"
            )));
        }
        if !path.starts_with('/') {
            return Err(ExecutionFailure::RuntimeFailure(format!(
                "Malformed request line: {:?} (expected \"<METHOD> <path> [<json-body>]\")",
                input.trim()
            )));
        }

        let body = if body_text.is_empty() {
            None
        } else {
            match serde_json::from_str(body_text) {
                Ok(body) => Some(body),
                Err(e) => {
                    let _ = writeln!(diagnostics, "Error parsing request body: {e}");
                    None
                }
            }
        };

        Ok(Self {
            method,
            path: path.to_string(),
            body,
        })
    }

    /// Whether a case input is shaped like a request line at all
    pub fn looks_like(input: &str) -> bool {
        let mut parts = input.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(method), Some(path)) => {
                SUPPORTED_METHODS.contains(&method) && path.starts_with('/')
            }
            _ => false,
        }
    }

    fn into_request(self) -> SyntheticRequest {
        SyntheticRequest {
            method: self.method,
            path: self.path,
            body: self.body,
        }
    }
}

impl Judge {
    pub(super) fn evaluate_http(
        &self,
        runner: &dyn SandboxRunner,
        source: &str,
        entry_point: &str,
        test_cases: &[TestCase],
    ) -> Verdict {
        let mut console = format!("Evaluating REST API via {entry_point}\n");
        let parsed: Vec<Result<RequestLine, ExecutionFailure>> = test_cases
            .iter()
            .map(|case| RequestLine::parse(&case.input, &mut console))
            .collect();

        let requests: Vec<SyntheticRequest> = parsed
            .iter()
            .filter_map(|line| line.as_ref().ok())
            .cloned()
            .map(RequestLine::into_request)
            .collect();

        let time_limit = self.settings.time_limit;
        let request = HarnessRequest::Http {
            source: source.to_string(),
            entry_point: entry_point.to_string(),
            requests,
            time_limit_ms: self.time_limit_ms(),
        };

        // `killed` marks a replay the process teardown cut short
        let replay = match runner.execute(&request) {
            Ok(RawOutcome::Finished(response)) => {
                console.push_str(&response.console);
                match response.outcome {
                    HarnessOutcome::Responses { responses } => Ok((responses, false)),
                    HarnessOutcome::MalformedEntryPoint { message } => {
                        Err(ExecutionFailure::MalformedEntryPoint(message))
                    }
                    HarnessOutcome::TimedOut => Err(ExecutionFailure::Timeout(time_limit)),
                    HarnessOutcome::Raised { message } => {
                        Err(ExecutionFailure::RuntimeFailure(message))
                    }
                    other => Err(ExecutionFailure::RuntimeFailure(format!(
                        "Unexpected harness outcome: {other:?}"
                    ))),
                }
            }
            Ok(RawOutcome::TimedOut { completed }) => {
                log::info!(
                    "REST evaluation killed after {} settled request(s)",
                    completed.len()
                );
                let _ = writeln!(
                    console,
                    "Error evaluating REST API: {}",
                    ExecutionFailure::Timeout(time_limit)
                );
                Ok((completed, true))
            }
            Ok(RawOutcome::Crashed { info }) => Err(ExecutionFailure::RuntimeFailure(info)),
            Err(e) => {
                log::error!("Sandbox {} failed to run http request: {e:#}", runner.name());
                Err(ExecutionFailure::RuntimeFailure(format!(
                    "Sandbox unavailable: {e}"
                )))
            }
        };

        let (outcomes, killed) = match replay {
            Ok(replay) => replay,
            Err(failure) => {
                log::info!("REST evaluation failed for every case: {failure}");
                let _ = writeln!(console, "Error evaluating REST API: {failure}");
                let results = test_cases
                    .iter()
                    .map(|case| CaseVerdict::failed(case, &failure))
                    .collect();
                return Verdict {
                    passed: false,
                    results,
                    console_output: self.clip_console(console),
                };
            }
        };

        let mut outcomes = outcomes.into_iter();
        let mut kill_reported = false;
        let mut results = Vec::with_capacity(test_cases.len());
        for (case, line) in test_cases.iter().zip(parsed) {
            if let Err(failure) = line {
                results.push(CaseVerdict::failed(case, &failure));
                continue;
            }
            let verdict = match outcomes.next() {
                Some(RequestOutcome::Response(response)) => {
                    let (actual_output, passed) = self.judge_response(&response, case);
                    CaseVerdict {
                        input: case.input.clone(),
                        expected_output: case.expected_output.clone(),
                        actual_output,
                        passed,
                    }
                }
                Some(RequestOutcome::Failed { message }) => {
                    CaseVerdict::failed(case, &ExecutionFailure::RuntimeFailure(message))
                }
                Some(RequestOutcome::TimedOut) => {
                    CaseVerdict::failed(case, &ExecutionFailure::Timeout(time_limit))
                }
                // the first unsettled request is the one the kill interrupted
                None if killed && !kill_reported => {
                    kill_reported = true;
                    CaseVerdict::failed(case, &ExecutionFailure::Timeout(time_limit))
                }
                None if killed => CaseVerdict::failed(case, &ExecutionFailure::NotRun),
                None => CaseVerdict::failed(
                    case,
                    &ExecutionFailure::RuntimeFailure("No response was recorded".to_string()),
                ),
            };
            results.push(verdict);
        }

        Verdict {
            passed: results.iter().all(|result| result.passed),
            results,
            console_output: self.clip_console(console),
        }
    }

    fn judge_response(&self, response: &SyntheticResponse, case: &TestCase) -> (String, bool) {
        if response.status == NO_CONTENT {
            return (String::new(), case.expected_output.is_empty());
        }
        let actual = response.rendered_body();
        let passed = self
            .sentinels
            .evaluate(&case.expected_output, response)
            .unwrap_or_else(|| outputs_match(&actual, &case.expected_output));
        (actual, passed)
    }
}
