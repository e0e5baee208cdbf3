//! Outcome classification and the request/response wire shapes.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{SandboxError, SyntaxDiagnostic};

/// `Runtime Error at line ` followed by ASCII digits, anywhere in a message.
static RUNTIME_ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Runtime Error at line ([0-9]+)").unwrap());

/// Extract the line tagged by the instrumenter from a guest error message.
///
/// The first occurrence wins. Returns `None` when there is no tag or the
/// digits do not fit in a `u32`.
pub fn runtime_error_line(message: &str) -> Option<u32> {
    RUNTIME_ERROR_LINE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// The single verdict produced for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The program ran to completion.
    Success {
        /// Captured console lines joined with `\n`.
        output: String,
    },
    /// The source did not parse. Nothing was executed.
    SyntaxFailure {
        /// `Syntax Error at line L, column C: ...` or `Syntax Error: ...`.
        message: String,
        /// Line of the error, when known.
        line: Option<u32>,
    },
    /// The guest threw or ran out of time.
    RuntimeFailure {
        /// The guest error's message.
        message: String,
        /// Line of the failing top-level statement, when known.
        line: Option<u32>,
    },
    /// The host failed or a resource ceiling was hit.
    InternalFailure {
        /// Description of the failure.
        message: String,
    },
}

impl ExecutionOutcome {
    /// Whether this is [`ExecutionOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The error text, for failures.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::SyntaxFailure { message, .. }
            | Self::RuntimeFailure { message, .. }
            | Self::InternalFailure { message } => Some(message),
        }
    }

    /// The attributed line, for syntax and runtime failures that have one.
    pub fn line(&self) -> Option<u32> {
        match self {
            Self::SyntaxFailure { line, .. } | Self::RuntimeFailure { line, .. } => *line,
            _ => None,
        }
    }
}

impl From<SyntaxDiagnostic> for ExecutionOutcome {
    fn from(diagnostic: SyntaxDiagnostic) -> Self {
        Self::SyntaxFailure {
            message: diagnostic.to_string(),
            line: diagnostic.line,
        }
    }
}

/// Coarse classification used by the audit log and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The program completed.
    Success,
    /// Rejected by the validator.
    SyntaxError,
    /// The guest threw.
    RuntimeError,
    /// The deadline passed.
    Timeout,
    /// Host failure or resource ceiling.
    InternalError,
}

impl OutcomeKind {
    /// Kind of an outcome produced from `error`.
    pub fn of_error(error: &SandboxError) -> Self {
        match error {
            SandboxError::JsError { .. } => Self::RuntimeError,
            SandboxError::Timeout { .. } => Self::Timeout,
            _ => Self::InternalError,
        }
    }

    /// Stable label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SyntaxError => "syntax_error",
            Self::RuntimeError => "runtime_error",
            Self::Timeout => "timeout",
            Self::InternalError => "internal_error",
        }
    }
}

/// Map a sandbox error to the outcome the caller sees.
///
/// Guest throws and timeouts are runtime failures; everything else happened
/// on the host side and is internal.
pub fn classify(error: SandboxError) -> ExecutionOutcome {
    match error {
        SandboxError::JsError { message } => {
            let line = runtime_error_line(&message);
            ExecutionOutcome::RuntimeFailure { message, line }
        }
        timeout @ SandboxError::Timeout { .. } => ExecutionOutcome::RuntimeFailure {
            message: timeout.to_string(),
            line: None,
        },
        other => ExecutionOutcome::InternalFailure {
            message: other.to_string(),
        },
    }
}

/// A run request: `{ "code": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Source text to execute.
    pub code: String,
}

/// The response body for one request.
///
/// `line` is omitted for successes and internal failures, and present (as a
/// number or `null`) for syntax and runtime failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    /// Whether the program ran to completion.
    pub success: bool,
    /// Captured output, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error text, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attributed line, for syntax and runtime failures.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_line"
    )]
    pub line: Option<Option<u32>>,
}

/// A present `line` field, even when `null`, deserializes to `Some(_)`.
fn present_line<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Some)
}

impl From<ExecutionOutcome> for RunResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Success { output } => Self {
                success: true,
                output: Some(output),
                error: None,
                line: None,
            },
            ExecutionOutcome::SyntaxFailure { message, line }
            | ExecutionOutcome::RuntimeFailure { message, line } => Self {
                success: false,
                output: None,
                error: Some(message),
                line: Some(line),
            },
            ExecutionOutcome::InternalFailure { message } => Self {
                success: false,
                output: None,
                error: Some(message),
                line: None,
            },
        }
    }
}
