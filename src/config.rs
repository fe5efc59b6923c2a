use std::fmt;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "codejudge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of grading workers
    #[arg(long = "threads", short = 't', default_value_t = 2)]
    pub threads: u8,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub challenges: Vec<ChallengeConfig>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub node_path: String,
    pub node_args: Vec<String>,
    pub time_limit: MicroSecond,
    pub memory_limit: KiloByte,
    pub isolation: Isolation,
    pub http_entry_points: Vec<String>,
    pub max_source_bytes: usize,
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            node_path: "node".to_string(),
            node_args: vec![
                "--disallow-code-generation-from-strings".to_string(),
                "--max-old-space-size=128".to_string(),
            ],
            time_limit: MicroSecond(2_000_000),
            memory_limit: KiloByte(262_144),
            isolation: Isolation::Auto,
            http_entry_points: vec!["createProductsAPI".to_string()],
            max_source_bytes: 64 * 1024,
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    #[default]
    Auto,
    Isolate,
    Simple,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MicroSecond(pub u64);

impl From<MicroSecond> for Duration {
    fn from(value: MicroSecond) -> Self {
        Duration::from_micros(value.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KiloByte(pub u64);

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
    Java,
    Cpp,
    Rust,
    Go,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::JavaScript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::Rust,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == name)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared test case, exactly as the catalog stores it
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChallengeConfig {
    pub id: u32,
    pub title: String,
    pub language: Language,
    pub difficulty: Option<String>,
    pub points: Option<u32>,
    pub test_cases: Vec<TestCase>,
}
