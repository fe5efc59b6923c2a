use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::SandboxConfig;

use super::protocol::HarnessRequest;
use super::runner::{RawOutcome, SandboxRunner, parse_progress, parse_report};
use super::{HARNESS_FILE_NAME, HARNESS_SOURCE, STARTUP_GRACE};

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// A runner that executes the harness as a plain child process
///
/// SimpleRunner gives each request its own interpreter process with a cleared
/// environment, an empty working directory, rlimits on CPU time and file
/// writes, and a wall-clock budget after which the whole process group is
/// killed. It has no memory cgroup and no filesystem namespace, so it relies on
/// the harness and interpreter flags for the rest.
pub struct SimpleRunner {
    /// Unique identifier for this instance
    id: u8,
    /// Working directory the interpreter is started in
    work_dir: PathBuf,
    /// Harness script location
    harness_path: PathBuf,
    config: Arc<SandboxConfig>,
}

impl SandboxRunner for SimpleRunner {
    fn build(id: u8, config: Arc<SandboxConfig>) -> Result<Self> {
        let work_dir = Self::create_work_directory(id)?;
        let harness_path = work_dir.join(HARNESS_FILE_NAME);
        fs::write(&harness_path, HARNESS_SOURCE)
            .with_context(|| format!("Failed to install harness at {}", harness_path.display()))?;

        log::info!("SimpleRunner {id} initialized successfully");
        log::warn!("SimpleRunner has no memory or filesystem isolation - prefer isolate in production");

        Ok(Self {
            id,
            work_dir,
            harness_path,
            config,
        })
    }

    fn name(&self) -> &'static str {
        "simple"
    }

    fn execute(&self, request: &HarnessRequest) -> Result<RawOutcome> {
        let payload = serde_json::to_vec(request)?;
        let budget = request.budget() + STARTUP_GRACE;

        let start_time = Instant::now();
        let outcome = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.run_harness(payload, budget)),
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(self.run_harness(payload, budget)),
        }?;

        log::debug!(
            "SimpleRunner {} ran {} request in {:?}",
            self.id,
            request.mode(),
            start_time.elapsed()
        );
        Ok(outcome)
    }
}

impl SimpleRunner {
    /// Creates a working directory for this runner instance
    fn create_work_directory(id: u8) -> Result<PathBuf> {
        let work_dir = std::env::temp_dir()
            .join("codejudge-simple")
            .join(id.to_string());
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)?;
        }
        fs::create_dir_all(&work_dir)?;
        Ok(work_dir)
    }

    fn cpu_seconds(budget: Duration) -> libc::rlim_t {
        (budget.as_secs() + 1) as libc::rlim_t
    }

    /// CPU limit whose soft end raises SIGXCPU a second before the hard kill
    fn cpu_rlimit(budget: Duration) -> libc::rlimit {
        let soft = Self::cpu_seconds(budget);
        libc::rlimit {
            rlim_cur: soft,
            rlim_max: soft + 1,
        }
    }

    /// Spawns the interpreter, feeds the request and waits within `budget`
    async fn run_harness(&self, payload: Vec<u8>, budget: Duration) -> Result<RawOutcome> {
        let cpu_limit = Self::cpu_rlimit(budget);

        let mut cmd = tokio::process::Command::new(&self.config.node_path);
        cmd.args(&self.config.node_args)
            .arg(&self.harness_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.work_dir)
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .process_group(0)
            .kill_on_drop(true);

        // SAFETY: only async-signal-safe libc calls between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                check(libc::setrlimit(libc::RLIMIT_CPU, &cpu_limit))?;
                check(libc::setrlimit(libc::RLIMIT_CORE, &rlimit(0)))?;
                check(libc::setrlimit(libc::RLIMIT_FSIZE, &rlimit(0)))?;
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.config.node_path))?;
        let pid = child.id();
        let (mut stdin, stdout_pipe, stderr_pipe) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => return Err(anyhow!("Interpreter pipes were not captured")),
            };

        // Filled as the child writes, so a kill still leaves the progress lines behind
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let run = async {
            let feed = async {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
                drop(stdin);
                Ok::<_, std::io::Error>(())
            };
            let (fed, out, err) = tokio::join!(
                feed,
                drain(stdout_pipe, &mut stdout),
                drain(stderr_pipe, &mut stderr)
            );
            fed?;
            out?;
            err?;
            child.wait().await
        };

        let finished = timeout(budget, run).await;
        match finished {
            Ok(Ok(status)) => Ok(outcome_of(
                status,
                &String::from_utf8_lossy(&stdout),
                &String::from_utf8_lossy(&stderr),
            )),
            Ok(Err(e)) => {
                // A broken pipe here means the interpreter died before reading its input
                log::warn!("SimpleRunner {} lost the interpreter: {e}", self.id);
                Ok(RawOutcome::Crashed {
                    info: format!("Interpreter I/O error: {e}"),
                })
            }
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                log::info!("SimpleRunner {} killed a run after {budget:?}", self.id);
                Ok(RawOutcome::TimedOut {
                    completed: parse_progress(&String::from_utf8_lossy(&stdout)),
                })
            }
        }
    }
}

/// Copies a pipe into `sink` chunk by chunk until EOF
async fn drain(mut pipe: impl AsyncRead + Unpin, sink: &mut Vec<u8>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sink.extend_from_slice(&chunk[..n]);
    }
}

/// Classifies an interpreter that exited on its own
fn outcome_of(status: std::process::ExitStatus, stdout: &str, stderr: &str) -> RawOutcome {
    if status.signal() == Some(libc::SIGXCPU) {
        return RawOutcome::TimedOut {
            completed: parse_progress(stdout),
        };
    }
    if status.success() {
        if let Some(report) = parse_report(stdout) {
            return RawOutcome::Finished(report);
        }
    }
    RawOutcome::Crashed {
        info: crash_info(status, stderr),
    }
}

fn rlimit(value: libc::rlim_t) -> libc::rlimit {
    libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    }
}

fn check(rc: libc::c_int) -> std::io::Result<()> {
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn kill_process_group(pid: u32) {
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        log::debug!(
            "killpg({pid}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

pub(super) fn crash_info(status: std::process::ExitStatus, stderr: &str) -> String {
    let detail = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or_default();
    match (status.code(), detail.is_empty()) {
        (Some(code), true) => format!("Process exited with code: {code}"),
        (Some(code), false) => format!("Process exited with code {code}: {detail}"),
        (None, _) => format!(
            "Process terminated by signal {}",
            status.signal().unwrap_or_default()
        ),
    }
}
