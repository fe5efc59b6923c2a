mod case_runner;
pub mod codec;
pub mod compare;
pub mod entry_point;
mod error;
pub mod sentinel;
pub mod synthetic_http;

pub use error::ExecutionFailure;
pub use sentinel::SentinelRegistry;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Language, SandboxConfig, TestCase};
use crate::sandbox::SandboxRunner;

use synthetic_http::RequestLine;

/// Marker appended when console output is cut short
const TRUNCATION_MARKER: &str = "\n... output truncated";

#[derive(Debug, Clone)]
pub struct JudgeSettings {
    /// Budget for one sandbox invocation
    pub time_limit: Duration,
    /// Factory names that switch a submission to the synthetic-HTTP path
    pub http_entry_points: Vec<String>,
    pub max_output_bytes: usize,
}

impl From<&SandboxConfig> for JudgeSettings {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            time_limit: config.time_limit.into(),
            http_entry_points: config.http_entry_points.clone(),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// One grading request
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub source_text: String,
    pub language: Language,
    pub test_cases: Vec<TestCase>,
    pub challenge_id: Option<u32>,
}

/// What one case produced in the sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub actual_output: String,
    pub captured_stream: String,
    pub raised: Option<ExecutionFailure>,
}

impl ExecutionOutcome {
    fn failed(failure: ExecutionFailure) -> Self {
        Self {
            actual_output: failure.rendered(),
            captured_stream: String::new(),
            raised: Some(failure),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaseVerdict {
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub passed: bool,
}

impl CaseVerdict {
    fn failed(case: &TestCase, failure: &ExecutionFailure) -> Self {
        Self {
            input: case.input.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: failure.rendered(),
            passed: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub passed: bool,
    pub results: Vec<CaseVerdict>,
    pub console_output: String,
}

/// The grader: picks a path for a submission and drives a sandbox through it
#[derive(Debug)]
pub struct Judge {
    settings: JudgeSettings,
    sentinels: SentinelRegistry,
}

impl Judge {
    pub fn new(settings: JudgeSettings) -> Self {
        Self::with_sentinels(settings, SentinelRegistry::default())
    }

    pub fn with_sentinels(settings: JudgeSettings, sentinels: SentinelRegistry) -> Self {
        Self {
            settings,
            sentinels,
        }
    }

    pub fn settings(&self) -> &JudgeSettings {
        &self.settings
    }

    /// Grades `source` against `test_cases`
    ///
    /// Never fails: every problem with the submitted code ends up in the
    /// returned verdict. `results` always has one entry per case, in order.
    pub fn execute_code(
        &self,
        runner: &dyn SandboxRunner,
        source: &str,
        language: Language,
        test_cases: &[TestCase],
    ) -> Verdict {
        if language != Language::JavaScript {
            return self.not_executed(language, test_cases);
        }
        if test_cases.is_empty() {
            return self.plain_run(runner, source);
        }
        if let Some(entry_point) = self.http_entry_point(source, test_cases) {
            return self.evaluate_http(runner, source, entry_point, test_cases);
        }
        self.run_function_cases(runner, source, test_cases)
    }

    pub fn grade(&self, runner: &dyn SandboxRunner, submission: &Submission) -> Verdict {
        self.execute_code(
            runner,
            &submission.source_text,
            submission.language,
            &submission.test_cases,
        )
    }

    /// The entry point to use when the submission should go down the HTTP path
    ///
    /// Chosen when the source names a configured entry point, or when every case
    /// is a request line (so a missing factory is reported as such).
    fn http_entry_point<'a>(&'a self, source: &str, test_cases: &[TestCase]) -> Option<&'a str> {
        let entry_points = &self.settings.http_entry_points;
        entry_point::find_http_entry_point(source, entry_points).or_else(|| {
            test_cases
                .iter()
                .all(|case| RequestLine::looks_like(&case.input))
                .then(|| {
                    entry_points
                        .iter()
                        .find(|name| entry_point::is_identifier(name))
                        .map(String::as_str)
                })
                .flatten()
        })
    }

    fn not_executed(&self, language: Language, test_cases: &[TestCase]) -> Verdict {
        let failure = ExecutionFailure::UnsupportedLanguage(language);
        log::debug!("Skipping execution: {failure}");
        Verdict {
            passed: false,
            results: test_cases
                .iter()
                .map(|case| CaseVerdict::failed(case, &failure))
                .collect(),
            console_output: failure.rendered(),
        }
    }

    fn time_limit_ms(&self) -> u64 {
        self.settings.time_limit.as_millis() as u64
    }

    fn clip_console(&self, mut console: String) -> String {
        let limit = self.settings.max_output_bytes;
        if console.len() <= limit {
            return console;
        }
        let mut cut = limit;
        while !console.is_char_boundary(cut) {
            cut -= 1;
        }
        console.truncate(cut);
        console.push_str(TRUNCATION_MARKER);
        console
    }
}
