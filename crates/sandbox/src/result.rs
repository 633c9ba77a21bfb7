use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure classes of a run. None of them is ever returned as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected by the static policy check; nothing ran.
    PolicyViolation,
    /// The snippet raised an error, including syntax errors.
    RuntimeFault,
    /// The wall-clock budget ran out.
    Timeout,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::RuntimeFault => "runtime_fault",
            ErrorKind::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one sandboxed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured `print` output with one trailing newline removed.
    pub output: String,
    pub error: Option<ExecutionError>,
    pub duration: Duration,
    pub success: bool,
}

impl ExecutionResult {
    pub(crate) fn completed(output: String, duration: Duration) -> Self {
        Self {
            output,
            error: None,
            duration,
            success: true,
        }
    }

    pub(crate) fn failed(
        kind: ErrorKind,
        message: impl Into<String>,
        output: String,
        duration: Duration,
    ) -> Self {
        Self {
            output,
            error: Some(ExecutionError {
                kind,
                message: message.into(),
            }),
            duration,
            success: false,
        }
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// `true` when the snippet got past the policy check.
    #[must_use]
    pub fn was_executed(&self) -> bool {
        self.error_kind() != Some(ErrorKind::PolicyViolation)
    }
}
