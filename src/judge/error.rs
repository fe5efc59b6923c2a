use std::time::Duration;

use thiserror::Error;

use crate::config::Language;

/// Everything that can go wrong while grading one case or one submission
///
/// None of these ever escape [`Judge::execute_code`](super::Judge::execute_code);
/// they end up as text in `actualOutput` / `consoleOutput`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionFailure {
    #[error("Could not find function definition in code")]
    NoFunctionFound,

    #[error("{0}")]
    RuntimeFailure(String),

    #[error("Timeout: execution exceeded {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0} submissions are not executed in this environment")]
    UnsupportedLanguage(Language),

    #[error("{0}")]
    MalformedEntryPoint(String),

    #[error("Not run: an earlier request exceeded the time limit")]
    NotRun,
}

impl ExecutionFailure {
    /// The text reported as `actualOutput`
    pub fn rendered(&self) -> String {
        match self {
            Self::UnsupportedLanguage(_) => format!("Not executed: {self}"),
            _ => format!("Error: {self}"),
        }
    }
}
