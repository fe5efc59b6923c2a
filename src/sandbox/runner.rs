use std::sync::Arc;

use anyhow::Result;

use crate::config::SandboxConfig;

use super::protocol::{HarnessRequest, HarnessResponse, ProgressLine, RequestOutcome};

/// What came back from one interpreter process
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    /// The harness ran to completion and reported back
    Finished(HarnessResponse),
    /// The wall-clock budget ran out and the process was torn down
    ///
    /// `completed` holds the replayed requests the harness settled before that.
    TimedOut { completed: Vec<RequestOutcome> },
    /// The interpreter died or produced no readable report
    Crashed { info: String },
}

impl RawOutcome {
    /// A timeout with nothing salvaged
    pub fn timed_out() -> Self {
        Self::TimedOut {
            completed: Vec::new(),
        }
    }
}

/// Trait for different sandbox execution implementations
///
/// This trait abstracts the one thing the grader needs from an execution
/// backend: run the harness once against a request, in a process of its own,
/// and hand back whatever it reported. Backends range from full isolation with
/// `isolate` to a plain child process with rlimits.
pub trait SandboxRunner: Send + Sync {
    /// Creates a new sandbox runner instance with the given ID
    fn build(id: u8, config: Arc<SandboxConfig>) -> Result<Self>
    where
        Self: Sized;

    /// Short backend name, used in logs
    fn name(&self) -> &'static str;

    /// Runs the harness against a single request
    ///
    /// Every call starts a fresh interpreter, so nothing a previous request did
    /// is visible to this one. An `Err` means the backend itself failed (could not
    /// spawn, could not write the box); failures of the submitted code are
    /// reported through [`RawOutcome`].
    fn execute(&self, request: &HarnessRequest) -> Result<RawOutcome>;
}

/// Parses the single report line the harness writes to stdout
pub(super) fn parse_report(stdout: &str) -> Option<HarnessResponse> {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str(line).ok())
}

/// Collects the per-request progress lines the harness wrote before it stopped
pub(super) fn parse_progress(stdout: &str) -> Vec<RequestOutcome> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<ProgressLine>(line).ok())
        .map(|line| line.progress)
        .collect()
}
