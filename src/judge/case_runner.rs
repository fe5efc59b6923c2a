use crate::config::TestCase;
use crate::sandbox::protocol::{HarnessOutcome, HarnessRequest};
use crate::sandbox::{RawOutcome, SandboxRunner};

use super::codec::{decode_input, encode_output};
use super::compare::outputs_match;
use super::entry_point::find_function_name;
use super::error::ExecutionFailure;
use super::{CaseVerdict, ExecutionOutcome, Judge, Verdict};

impl Judge {
    /// Runs the fragment once with nothing bound and nothing checked
    pub(super) fn plain_run(&self, runner: &dyn SandboxRunner, source: &str) -> Verdict {
        let request = HarnessRequest::Plain {
            source: source.to_string(),
            time_limit_ms: self.time_limit_ms(),
        };

        let (mut console, result) = match self.run(runner, &request) {
            Ok((console, HarnessOutcome::Completed)) => (console, Ok(())),
            Ok((console, outcome)) => (console, Err(self.failure_from(outcome))),
            Err(failure) => (String::new(), Err(failure)),
        };

        if let Err(failure) = &result {
            console.push_str(&failure.rendered());
        }
        Verdict {
            passed: result.is_ok(),
            results: Vec::new(),
            console_output: self.clip_console(console),
        }
    }

    /// One fresh interpreter per case, results kept in case order
    pub(super) fn run_function_cases(
        &self,
        runner: &dyn SandboxRunner,
        source: &str,
        test_cases: &[TestCase],
    ) -> Verdict {
        let function_name = find_function_name(source);
        if function_name.is_none() {
            log::debug!("No function declaration found in submission");
        }

        let mut console = String::new();
        let results: Vec<CaseVerdict> = test_cases
            .iter()
            .map(|case| {
                let outcome = match &function_name {
                    Some(name) => self.call_function(runner, source, name, &case.input),
                    None => ExecutionOutcome::failed(ExecutionFailure::NoFunctionFound),
                };
                console.push_str(&outcome.captured_stream);

                let passed = outcome.raised.is_none()
                    && outputs_match(&outcome.actual_output, &case.expected_output);
                CaseVerdict {
                    input: case.input.clone(),
                    expected_output: case.expected_output.clone(),
                    actual_output: outcome.actual_output,
                    passed,
                }
            })
            .collect();

        Verdict {
            passed: results.iter().all(|result| result.passed),
            results,
            console_output: self.clip_console(console),
        }
    }

    fn call_function(
        &self,
        runner: &dyn SandboxRunner,
        source: &str,
        function_name: &str,
        input: &str,
    ) -> ExecutionOutcome {
        let request = HarnessRequest::Call {
            source: source.to_string(),
            function_name: function_name.to_string(),
            input: decode_input(input),
            time_limit_ms: self.time_limit_ms(),
        };

        match self.run(runner, &request) {
            Ok((console, HarnessOutcome::Returned { value })) => ExecutionOutcome {
                actual_output: encode_output(&value),
                captured_stream: console,
                raised: None,
            },
            Ok((console, outcome)) => ExecutionOutcome {
                captured_stream: console,
                ..ExecutionOutcome::failed(self.failure_from(outcome))
            },
            Err(failure) => ExecutionOutcome::failed(failure),
        }
    }

    /// Executes one request; anything short of a harness report becomes a failure
    fn run(
        &self,
        runner: &dyn SandboxRunner,
        request: &HarnessRequest,
    ) -> Result<(String, HarnessOutcome), ExecutionFailure> {
        match runner.execute(request) {
            Ok(RawOutcome::Finished(response)) => Ok((response.console, response.outcome)),
            Ok(RawOutcome::TimedOut { .. }) => Err(ExecutionFailure::Timeout(self.settings.time_limit)),
            Ok(RawOutcome::Crashed { info }) => Err(ExecutionFailure::RuntimeFailure(info)),
            Err(e) => {
                log::error!(
                    "Sandbox {} failed to run {} request: {e:#}",
                    runner.name(),
                    request.mode()
                );
                Err(ExecutionFailure::RuntimeFailure(format!(
                    "Sandbox unavailable: {e}"
                )))
            }
        }
    }

    fn failure_from(&self, outcome: HarnessOutcome) -> ExecutionFailure {
        match outcome {
            HarnessOutcome::Raised { message } => ExecutionFailure::RuntimeFailure(message),
            HarnessOutcome::TimedOut => ExecutionFailure::Timeout(self.settings.time_limit),
            HarnessOutcome::MalformedEntryPoint { message } => {
                ExecutionFailure::MalformedEntryPoint(message)
            }
            other => ExecutionFailure::RuntimeFailure(format!(
                "Unexpected harness outcome: {other:?}"
            )),
        }
    }
}
