//! Error types for the jsrun sandbox.

use thiserror::Error;

/// The first syntax error found in a submitted program.
///
/// `Display` renders the caller-facing text: `Syntax Error at line L, column C: <message>`
/// when the location is known, `Syntax Error: <message>` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.render())]
pub struct SyntaxDiagnostic {
    /// Parser message, without location.
    pub message: String,
    /// 1-based line of the error, when the parser reported a location.
    pub line: Option<u32>,
    /// 1-based column of the error, when the parser reported a location.
    pub column: Option<u32>,
}

impl SyntaxDiagnostic {
    /// A diagnostic with a known location.
    pub fn at(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    /// A diagnostic the parser could not locate.
    pub fn unlocated(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    fn render(&self) -> String {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                format!("Syntax Error at line {line}, column {column}: {}", self.message)
            }
            _ => format!("Syntax Error: {}", self.message),
        }
    }
}

/// Errors that can occur while preparing or running a sandboxed program.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Code exceeds the configured maximum size.
    #[error("code exceeds maximum size of {max} bytes (got {actual})")]
    CodeTooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Actual size.
        actual: usize,
    },

    /// Bracket nesting is deeper than the parser is allowed to recurse.
    #[error("nesting depth {actual} exceeds maximum {max}")]
    NestingTooDeep {
        /// Maximum allowed depth.
        max: usize,
        /// Detected depth.
        actual: usize,
    },

    /// Execution ran past its deadline (CPU-bound watchdog or pending timers).
    #[error("Script execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The V8 heap reached its configured ceiling.
    #[error("memory limit of {limit_mib} MiB exceeded")]
    HeapLimitExceeded {
        /// Configured ceiling in MiB.
        limit_mib: usize,
    },

    /// V8 refused to compile the generated program.
    #[error("failed to compile sandbox program: {message}")]
    Compile {
        /// The V8 compile error.
        message: String,
    },

    /// The guest threw, synchronously or from a timer callback.
    #[error("{message}")]
    JsError {
        /// The thrown error's `message`, or `String(value)` for non-errors.
        message: String,
    },

    /// Too many concurrent sandbox executions.
    #[error("concurrency limit reached (max {max} concurrent executions)")]
    ConcurrencyLimit {
        /// Maximum allowed concurrent executions.
        max: usize,
    },

    /// Host-side failure setting up or tearing down the sandbox.
    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),
}
