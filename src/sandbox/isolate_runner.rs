use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};

use crate::config::SandboxConfig;

use super::protocol::HarnessRequest;
use super::runner::{RawOutcome, SandboxRunner, parse_progress, parse_report};
use super::{HARNESS_FILE_NAME, HARNESS_SOURCE, STARTUP_GRACE};

// Sandbox configuration constants
const RUNTIME_PROCESSES: u32 = 64; // the interpreter is multi-threaded
const RUNTIME_OPEN_FILES: u32 = 64;
const RUNTIME_FILE_SIZE: u32 = 1024; // KB

const REQUEST_FILE_NAME: &str = "request.json";
const REPORT_FILE_NAME: &str = "report.json";
const STDERR_FILE_NAME: &str = "stderr.txt";

// Sandbox cache directory permissions
const CACHE_DIR_PERMISSIONS: u32 = 0o700;

/// Execution information isolate leaves in its meta file
#[derive(Debug, Default, PartialEq)]
struct MetaReport {
    timed_out: bool,
    oom_killed: bool,
    exit_code: Option<i32>,
    message: Option<String>,
    time_wall: Option<f64>,
}

/// A sandbox environment for running the harness using isolate
///
/// The IsolateRunner runs each request in a freshly initialized isolate box with
/// a memory cgroup, wall-time, process, open-file and file-size limits and no
/// network. The box is wiped between requests.
pub struct IsolateRunner {
    /// Unique identifier for this sandbox instance
    id: u8,
    /// Path to the sandbox's working directory (inside isolate)
    box_dir: PathBuf,
    /// Path to the cache directory for meta files
    cache_dir: PathBuf,
    /// Absolute path of the interpreter
    node_binary: PathBuf,
    config: Arc<SandboxConfig>,
}

impl SandboxRunner for IsolateRunner {
    fn build(id: u8, config: Arc<SandboxConfig>) -> Result<Self> {
        let cache_dir = Self::setup_cache_directory(id)?;
        let box_dir = Self::initialize_isolate_sandbox(id)?;
        let node_binary = resolve_binary(&config.node_path)
            .ok_or_else(|| anyhow!("Unable to locate interpreter {}", config.node_path))?;

        log::info!(
            "IsolateRunner {id} initialized successfully (interpreter {})",
            node_binary.display()
        );
        Ok(Self {
            id,
            box_dir,
            cache_dir,
            node_binary,
            config,
        })
    }

    fn name(&self) -> &'static str {
        "isolate"
    }

    fn execute(&self, request: &HarnessRequest) -> Result<RawOutcome> {
        self.reinit()?;

        fs::write(self.box_dir.join(HARNESS_FILE_NAME), HARNESS_SOURCE)?;
        fs::write(
            self.box_dir.join(REQUEST_FILE_NAME),
            serde_json::to_vec(request)?,
        )?;

        let budget = request.budget() + STARTUP_GRACE;
        let meta_path = self.cache_dir.join("run.meta");
        let _ = fs::remove_file(&meta_path);

        let start_time = Instant::now();
        self.execute_harness(budget, &meta_path)?;
        let elapsed = start_time.elapsed();

        let meta = fs::read_to_string(&meta_path)
            .map(|content| parse_meta(&content))
            .map_err(|e| anyhow!("Failed to read meta file: {e}"))?;

        log::debug!(
            "IsolateRunner {} ran {} request in {:?} (wall {:?})",
            self.id,
            request.mode(),
            elapsed,
            meta.time_wall
        );

        let stdout = fs::read_to_string(self.box_dir.join(REPORT_FILE_NAME)).unwrap_or_default();

        // Use external wall timer as a second opinion
        if meta.timed_out || elapsed > budget + STARTUP_GRACE {
            return Ok(RawOutcome::TimedOut {
                completed: parse_progress(&stdout),
            });
        }
        if meta.oom_killed {
            return Ok(RawOutcome::Crashed {
                info: "Memory limit exceeded".to_string(),
            });
        }

        if meta.exit_code == Some(0) {
            if let Some(report) = parse_report(&stdout) {
                return Ok(RawOutcome::Finished(report));
            }
        }

        let stderr = fs::read_to_string(self.box_dir.join(STDERR_FILE_NAME)).unwrap_or_default();
        let detail = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .next_back()
            .map(str::to_string)
            .or(meta.message)
            .unwrap_or_else(|| format!("Process exited with code: {:?}", meta.exit_code));
        Ok(RawOutcome::Crashed { info: detail })
    }
}

impl IsolateRunner {
    /// Sets up the cache directory for the sandbox
    fn setup_cache_directory(id: u8) -> Result<PathBuf> {
        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "codejudge")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;

        let cache_base_dir = proj_dirs.cache_dir();
        fs::create_dir_all(cache_base_dir)?;
        fs::set_permissions(
            cache_base_dir,
            fs::Permissions::from_mode(CACHE_DIR_PERMISSIONS),
        )?;

        let cache_dir = cache_base_dir.join(id.to_string());
        fs::create_dir_all(&cache_dir)?;

        Ok(cache_dir)
    }

    /// Initializes the isolate sandbox and returns the box directory
    fn initialize_isolate_sandbox(id: u8) -> Result<PathBuf> {
        let output = Command::new("isolate")
            .args(["-b", &id.to_string(), "--cg", "--init"])
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --init: {}", e))?;

        if !output.status.success() {
            bail!(
                "isolate --init exited with non-zero status; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let root_dir_absolute = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root_dir_absolute.is_empty() {
            bail!(
                "isolate --init produced empty stdout; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(PathBuf::from(root_dir_absolute).join("box"))
    }

    /// Wipes the box so the next request starts from an empty directory
    fn reinit(&self) -> Result<()> {
        let sandbox_id = self.id.to_string();
        let cleanup = Command::new("isolate")
            .args(["-b", &sandbox_id, "--cg", "--cleanup"])
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --cleanup: {}", e))?;
        if !cleanup.status.success() {
            log::warn!("isolate --cleanup failed for box {}", self.id);
        }

        let output = Command::new("isolate")
            .args(["-b", &sandbox_id, "--cg", "--init"])
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --init: {}", e))?;

        if !output.status.success() {
            bail!("isolate --init exited with non-zero status");
        }

        log::debug!("Sandbox {} reinitialized", self.id);
        Ok(())
    }

    /// Runs the harness inside the box
    fn execute_harness(&self, budget: Duration, meta_path: &Path) -> Result<()> {
        let sandbox_id = self.id.to_string();
        let wall_time_arg = format!("--wall-time={:.3}", budget.as_secs_f64());
        let cpu_time_arg = format!("--time={:.3}", budget.as_secs_f64());
        let memory_arg = format!("--cg-mem={}", self.config.memory_limit.0);
        let processes_arg = format!("--processes={}", RUNTIME_PROCESSES);
        let open_files_arg = format!("--open-files={}", RUNTIME_OPEN_FILES);
        let fsize_arg = format!("--fsize={}", RUNTIME_FILE_SIZE);
        let meta_arg = meta_path.to_string_lossy();

        let mut cmd = Command::new("isolate");
        if let Some(dir) = self.interpreter_dir_binding() {
            cmd.arg(dir);
        }
        cmd.args([
            "-b",
            &sandbox_id,
            "--cg",
            "--run",
            &wall_time_arg,
            &cpu_time_arg,
            &memory_arg,
            &processes_arg,
            &open_files_arg,
            &fsize_arg,
            "-E",
            "PATH=/usr/local/bin:/usr/bin:/bin",
            "-M",
            &meta_arg,
            "-i",
            REQUEST_FILE_NAME,
            "-o",
            REPORT_FILE_NAME,
            "-r",
            STDERR_FILE_NAME,
            "--silent",
            "--",
        ])
        .arg(&self.node_binary)
        .args(&self.config.node_args)
        .arg(HARNESS_FILE_NAME);

        let _ = cmd.output()?;
        Ok(())
    }

    /// Binds the interpreter's install prefix when it lives outside the default mounts
    fn interpreter_dir_binding(&self) -> Option<String> {
        let prefix = self.node_binary.parent()?.parent()?;
        if prefix == Path::new("/") || prefix.starts_with("/usr") {
            return None;
        }
        Some(format!("--dir={}", prefix.display()))
    }
}

/// Processes the meta file content into a report
fn parse_meta(meta_content: &str) -> MetaReport {
    let mut meta = MetaReport::default();
    for line in meta_content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            match key {
                "status" => {
                    if value == "TO" {
                        meta.timed_out = true;
                    }
                }
                "killed" => {
                    // killed:1 without an OOM flag means the limits kicked in
                    meta.timed_out = true;
                }
                "cg-oom-killed" => {
                    meta.oom_killed = true;
                }
                "exitcode" => {
                    meta.exit_code = value.parse().ok();
                }
                "message" => {
                    meta.message = Some(value.to_string());
                }
                "time-wall" => {
                    meta.time_wall = value.parse().ok();
                }
                _ => {}
            }
        }
    }
    if meta.oom_killed {
        meta.timed_out = false;
    }
    meta
}

/// Finds an executable the way a shell would
fn resolve_binary(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return path.is_file().then(|| path.canonicalize().unwrap_or(path));
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}
