#![warn(missing_docs)]

//! # jsrun-sandbox
//!
//! Runs untrusted JavaScript in a fresh deno_core isolate and reports one
//! structured verdict per request.
//!
//! A request flows through four stages:
//!
//! 1. [`validator`]: size and nesting limits, then a full syntax check. Code
//!    that does not parse never reaches V8.
//! 2. [`instrument`]: each top-level statement is wrapped in a `try`/`catch`
//!    that rethrows as `Runtime Error at line N: ...`.
//! 3. [`codegen`]: the instrumented tree is printed back to source.
//! 4. [`executor`]: the program runs in an isolate with only `console` and
//!    timers bridged in, under a heap ceiling and a wall-clock deadline.
//!
//! [`report`] turns whatever happened into an [`ExecutionOutcome`] and its
//! wire shape, [`RunResponse`].
//!
//! ## Security model
//!
//! - **V8 isolate**: Same process-level isolation as Chrome tabs
//! - **No ambient capabilities**: No fs, net, env, or `Deno` namespace
//! - **Fresh runtime per call**: No state leakage between executions
//! - **Timeout enforcement**: Execution killed after the configured deadline
//! - **Heap ceiling**: Allocation past the limit terminates the isolate

pub mod ast;
pub mod audit;
pub mod bridge;
pub mod codegen;
pub mod console;
pub mod error;
pub mod executor;
pub mod instrument;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod parse;
pub mod report;
pub mod timers;
pub mod validator;

pub use error::{SandboxError, SyntaxDiagnostic};
pub use executor::{SandboxConfig, SandboxExecutor, MIN_HEAP_SIZE};
pub use report::{ExecutionOutcome, OutcomeKind, RunRequest, RunResponse};
