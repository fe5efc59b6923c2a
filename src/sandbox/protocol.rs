//! Messages exchanged with the interpreter harness.
//!
//! The host writes exactly one [`HarnessRequest`] as JSON to the child's stdin.
//! The child answers with one [`HarnessResponse`] line on stdout, preceded in
//! http mode by one [`ProgressLine`] per replayed request. Nothing else crosses
//! the process boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HarnessRequest {
    /// Run the fragment once, no input binding, no return value
    Plain { source: String, time_limit_ms: u64 },
    /// Run the fragment and call `function_name(input)`
    Call {
        source: String,
        function_name: String,
        input: Value,
        time_limit_ms: u64,
    },
    /// Build a routing object through `entry_point()` and replay `requests` against it
    ///
    /// `time_limit_ms` bounds building the app and each request separately.
    Http {
        source: String,
        entry_point: String,
        requests: Vec<SyntheticRequest>,
        time_limit_ms: u64,
    },
}

impl HarnessRequest {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Plain { .. } => "plain",
            Self::Call { .. } => "call",
            Self::Http { .. } => "http",
        }
    }

    /// Wall-clock allowance for the whole interpreter run
    pub fn budget(&self) -> Duration {
        match self {
            Self::Plain { time_limit_ms, .. } | Self::Call { time_limit_ms, .. } => {
                Duration::from_millis(*time_limit_ms)
            }
            // one slot to build the app plus one per request
            Self::Http {
                time_limit_ms,
                requests,
                ..
            } => Duration::from_millis(*time_limit_ms) * (requests.len() as u32 + 1),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyntheticRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HarnessResponse {
    #[serde(default)]
    pub console: String,
    pub outcome: HarnessOutcome,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarnessOutcome {
    Completed,
    Returned { value: ReturnedValue },
    Raised { message: String },
    TimedOut,
    Responses { responses: Vec<RequestOutcome> },
    MalformedEntryPoint { message: String },
}

/// A JavaScript return value after it left the interpreter
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReturnedValue {
    Undefined,
    Structured { value: Value },
    Scalar { text: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestOutcome {
    Response(SyntheticResponse),
    Failed { message: String },
    /// The request's handlers ran past the time limit
    TimedOut,
}

/// Written as soon as one replayed request is settled
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub progress: RequestOutcome,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyntheticResponse {
    pub status: u16,
    pub body: Option<Value>,
    pub text: Option<String>,
}

impl SyntheticResponse {
    /// The response rendered the way it is reported back as `actualOutput`
    pub fn rendered_body(&self) -> String {
        match (&self.body, &self.text) {
            (Some(body), _) => body.to_string(),
            (None, Some(text)) => text.clone(),
            (None, None) => String::new(),
        }
    }
}
