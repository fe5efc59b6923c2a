mod isolate_runner;
pub mod protocol;
mod runner;
mod simple_runner;

// Re-export the trait and common types
use isolate_runner::IsolateRunner;
pub use runner::{RawOutcome, SandboxRunner};
use simple_runner::SimpleRunner;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::{Isolation, SandboxConfig};

/// The harness every backend runs, embedded at build time
pub(crate) const HARNESS_SOURCE: &str = include_str!("sandbox/harness.js");
pub(crate) const HARNESS_FILE_NAME: &str = "harness.js";

/// Interpreter start-up allowance on top of the per-run budget
pub(crate) const STARTUP_GRACE: Duration = Duration::from_millis(750);

/// Creates a sandbox runner based on configuration
///
/// `isolation: "isolate"` always builds an IsolateRunner, `"simple"` always a
/// SimpleRunner. In `"auto"` mode the `isolate` binary is looked up and the
/// IsolateRunner is preferred when it is available.
pub fn create_sandbox_runner(id: u8, config: Arc<SandboxConfig>) -> Result<Box<dyn SandboxRunner>> {
    let use_isolate = match config.isolation {
        Isolation::Isolate => true,
        Isolation::Simple => false,
        Isolation::Auto => isolate_available(),
    };

    if use_isolate {
        log::info!("Creating IsolateRunner {id} (full isolation mode)");
        let runner = IsolateRunner::build(id, config)?;
        Ok(Box::new(runner))
    } else {
        log::info!("Creating SimpleRunner {id} (process isolation only)");
        let runner = SimpleRunner::build(id, config)?;
        Ok(Box::new(runner))
    }
}

fn isolate_available() -> bool {
    std::process::Command::new("which")
        .arg("isolate")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_is_embedded() {
        assert!(HARNESS_SOURCE.contains("runInContext"));
        assert!(HARNESS_SOURCE.contains("malformed_entry_point"));
    }

    #[test]
    fn test_simple_runner_when_forced() {
        let config = Arc::new(SandboxConfig {
            isolation: Isolation::Simple,
            ..SandboxConfig::default()
        });
        let runner = create_sandbox_runner(250, config).unwrap();
        assert_eq!(runner.name(), "simple");
    }
}
