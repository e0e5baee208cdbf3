//! Sandbox executor: creates a fresh V8 isolate per request and runs the
//! instrumented program inside it.
//!
//! Each execution gets a brand new runtime. No state leaks between calls.
//!
//! V8 isolates are `!Send`, so all JsRuntime operations run on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use deno_core::{v8, JsRuntime, RuntimeOptions};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::audit::{AuditEntryBuilder, AuditLogger, NoopAuditLogger};
use crate::bridge::{self, exception_message, GuestState, HostBridge, TimerCallback};
use crate::codegen::generate;
use crate::error::SandboxError;
use crate::instrument::instrument;
use crate::parse::parse;
use crate::report::{classify, ExecutionOutcome, OutcomeKind};
use crate::validator::{check_limits, validate, DEFAULT_MAX_CODE_SIZE};

const MIB: usize = 1024 * 1024;

/// Smallest heap ceiling V8 can boot a context in. Lower limits are raised to it.
pub const MIN_HEAP_SIZE: usize = 8 * MIB;

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock deadline for one run, timers included.
    pub timeout: Duration,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum size of submitted code in bytes.
    pub max_code_size: usize,
    /// Maximum concurrent isolates.
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_heap_size: 128 * MIB,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            max_concurrent: 8,
        }
    }
}

impl SandboxConfig {
    /// Build from a memory ceiling in MiB and a deadline in milliseconds,
    /// keeping the default size and concurrency limits. The ceiling is
    /// clamped to [`MIN_HEAP_SIZE`].
    pub fn new(memory_limit_mib: usize, execution_timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(execution_timeout_ms),
            max_heap_size: memory_limit_mib.saturating_mul(MIB).max(MIN_HEAP_SIZE),
            ..Default::default()
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// The sandbox executor. Creates fresh V8 isolates for each execution.
///
/// This is `Send + Sync` safe: all V8 operations are dispatched to a
/// dedicated thread internally. A concurrency semaphore limits the number
/// of simultaneous V8 isolates.
pub struct SandboxExecutor {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
    audit_logger: Arc<dyn AuditLogger>,
    isolates_created: Arc<AtomicU64>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<crate::metrics::SandboxMetrics>>,
}

impl SandboxExecutor {
    /// Create a new sandbox executor with the given configuration.
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_audit_logger(config, Arc::new(NoopAuditLogger))
    }

    /// Create a new sandbox executor with an audit logger.
    pub fn with_audit_logger(config: SandboxConfig, logger: Arc<dyn AuditLogger>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            semaphore,
            audit_logger: logger,
            isolates_created: Arc::new(AtomicU64::new(0)),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Record every execution in `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<crate::metrics::SandboxMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The executor's configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Number of isolates this executor has created so far.
    pub fn isolates_created(&self) -> u64 {
        self.isolates_created.load(Ordering::SeqCst)
    }

    /// Validate, instrument and run `code`, producing exactly one outcome.
    pub async fn execute(&self, code: &str) -> ExecutionOutcome {
        tracing::info!(code_len = code.len(), "execute: starting");
        let audit_builder = AuditEntryBuilder::new(code);
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let (outcome, kind, log_lines) = self.execute_inner(code).await;

        match &outcome {
            ExecutionOutcome::Success { .. } => {
                tracing::info!(log_lines, "execute: complete");
            }
            ExecutionOutcome::InternalFailure { message } => {
                tracing::error!(error = %message, "execute: internal failure");
            }
            failure => {
                tracing::warn!(
                    kind = kind.as_str(),
                    line = failure.line(),
                    error = failure.error_message().unwrap_or_default(),
                    "execute: failed"
                );
            }
        }

        let entry = audit_builder.finish(&outcome, kind, log_lines);
        self.audit_logger.log(&entry).await;

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record(kind, started.elapsed().as_secs_f64());
        }

        outcome
    }

    async fn execute_inner(&self, code: &str) -> (ExecutionOutcome, OutcomeKind, usize) {
        if let Err(e) = check_limits(code, self.config.max_code_size) {
            return failed(e, 0);
        }
        if let Err(diagnostic) = validate(code) {
            return (diagnostic.into(), OutcomeKind::SyntaxError, 0);
        }
        let program = match parse(code) {
            Ok(program) => program,
            Err(diagnostic) => return (diagnostic.into(), OutcomeKind::SyntaxError, 0),
        };
        let generated = generate(&instrument(program));

        let Ok(_permit) = self.semaphore.clone().try_acquire_owned() else {
            return failed(
                SandboxError::ConcurrencyLimit {
                    max: self.config.max_concurrent,
                },
                0,
            );
        };

        let config = self.config.clone();
        let isolates_created = Arc::clone(&self.isolates_created);

        // V8 isolates are !Send: run everything on a dedicated thread
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send((Err(SandboxError::Execution(e.into())), Vec::new())).is_err() {
                        tracing::warn!("sandbox result receiver dropped");
                    }
                    return;
                }
            };
            let bridge = HostBridge::new();
            isolates_created.fetch_add(1, Ordering::SeqCst);
            let result = rt.block_on(run(&generated, &config, &bridge));
            if tx.send((result, bridge.log().lines())).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        match rx.await {
            Ok((Ok(()), lines)) => (
                ExecutionOutcome::Success {
                    output: lines.join("\n"),
                },
                OutcomeKind::Success,
                lines.len(),
            ),
            Ok((Err(e), lines)) => failed(e, lines.len()),
            Err(_) => failed(
                SandboxError::Execution(anyhow::anyhow!("sandbox thread panicked")),
                0,
            ),
        }
    }
}

fn failed(error: SandboxError, log_lines: usize) -> (ExecutionOutcome, OutcomeKind, usize) {
    let kind = OutcomeKind::of_error(&error);
    (classify(error), kind, log_lines)
}

/// Run generated `program` in a fresh isolate on the current thread.
///
/// Must be called from a dedicated thread driving a current-thread tokio
/// runtime, never from a multi-threaded runtime's worker. Console output is
/// appended to `bridge`'s log. The isolate is torn down before this returns.
pub async fn run(
    program: &str,
    config: &SandboxConfig,
    bridge: &HostBridge,
) -> Result<(), SandboxError> {
    let heap_limit = config.max_heap_size.max(MIN_HEAP_SIZE);
    let mut runtime = create_runtime(heap_limit);

    // --- Set up heap limit callback ---
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    // --- Set up CPU watchdog ---
    let watchdog = Watchdog::start(runtime.v8_isolate().thread_safe_handle(), config.timeout);
    let deadline = Instant::now() + config.timeout;

    let result = match bridge.install(&mut runtime) {
        Ok(state) => execute_program(&mut runtime, &state, program, deadline, config).await,
        Err(e) => Err(e),
    };

    // --- Teardown: watchdog first, then guest state, then the isolate ---
    let timed_out = watchdog.stop();
    bridge::teardown(&mut runtime);
    runtime
        .v8_isolate()
        .remove_near_heap_limit_callback(near_heap_limit_callback, 0);
    drop(runtime);

    // --- Check error causes in priority order ---
    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(SandboxError::HeapLimitExceeded {
            limit_mib: heap_limit / MIB,
        });
    }
    if timed_out {
        return Err(SandboxError::Timeout {
            timeout_ms: config.timeout_ms(),
        });
    }
    result
}

/// Create a fresh JsRuntime with V8 heap limits set.
fn create_runtime(max_heap_size: usize) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, max_heap_size);
    JsRuntime::new(RuntimeOptions {
        create_params: Some(create_params),
        ..Default::default()
    })
}

/// Compile and run the wrapped program, then drain its timers.
async fn execute_program(
    runtime: &mut JsRuntime,
    state: &GuestState,
    program: &str,
    deadline: Instant,
    config: &SandboxConfig,
) -> Result<(), SandboxError> {
    let source = format!("(function() {{\n{program}\n}})();");
    {
        let scope = &mut runtime.handle_scope();
        let code = v8::String::new(scope, &source)
            .ok_or_else(|| anyhow::anyhow!("program does not fit in a V8 string"))?;
        let tc = &mut v8::TryCatch::new(scope);
        let Some(script) = v8::Script::compile(tc, code, None) else {
            return Err(match guest_failure(tc) {
                SandboxError::JsError { message } => SandboxError::Compile { message },
                other => other,
            });
        };
        if script.run(tc).is_none() {
            return Err(guest_failure(tc));
        }
        tc.perform_microtask_checkpoint();
    }
    drain_timers(runtime, state, deadline, config).await
}

/// Fire due timers in (due time, registration) order until none remain.
async fn drain_timers(
    runtime: &mut JsRuntime,
    state: &GuestState,
    deadline: Instant,
    config: &SandboxConfig,
) -> Result<(), SandboxError> {
    loop {
        let next = state.timers.borrow().next_due();
        let Some(due) = next else {
            return Ok(());
        };
        if due > deadline {
            return Err(SandboxError::Timeout {
                timeout_ms: config.timeout_ms(),
            });
        }
        tokio::time::sleep_until(due).await;

        loop {
            let fired = state.timers.borrow_mut().pop_due(Instant::now());
            let Some(fired) = fired else {
                break;
            };
            tracing::trace!(timer_id = fired.id, "firing timer");
            invoke_timer(runtime, &fired.payload)?;
        }
    }
}

fn invoke_timer(runtime: &mut JsRuntime, callback: &TimerCallback) -> Result<(), SandboxError> {
    let scope = &mut runtime.handle_scope();
    let tc = &mut v8::TryCatch::new(scope);
    let function = v8::Local::new(tc, &callback.function);
    let args: Vec<v8::Local<v8::Value>> = callback
        .args
        .iter()
        .map(|arg| v8::Local::new(tc, arg))
        .collect();
    let recv = v8::undefined(tc).into();
    if function.call(tc, recv, &args).is_none() {
        return Err(guest_failure(tc));
    }
    tc.perform_microtask_checkpoint();
    Ok(())
}

/// Turn the exception caught by `tc` into an error.
///
/// Termination (watchdog or heap limit) carries no exception; the caller
/// replaces it with the cause recorded by whoever terminated.
fn guest_failure(tc: &mut v8::TryCatch<v8::HandleScope>) -> SandboxError {
    if tc.has_terminated() {
        return SandboxError::Execution(anyhow::anyhow!("guest execution was terminated"));
    }
    match tc.exception() {
        Some(exception) => SandboxError::JsError {
            message: exception_message(tc, exception),
        },
        None => SandboxError::Execution(anyhow::anyhow!("guest execution failed without an exception")),
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// Set once the limit is hit. AtomicBool so the callback only needs `&`.
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate cleanly.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the boxed `HeapLimitState` in `run`, which
    // unregisters this callback before the box is dropped.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + MIB
}

/// Terminates the isolate when the deadline passes (CPU-bound loops never
/// yield to the timer loop).
struct Watchdog {
    cancel: mpsc::Sender<()>,
    thread: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn start(handle: v8::IsolateHandle, timeout: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let watchdog_fired = Arc::clone(&fired);
        let (cancel, cancel_rx) = mpsc::channel::<()>();
        let thread = std::thread::spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
                watchdog_fired.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        });
        Self {
            cancel,
            thread,
            fired,
        }
    }

    /// Cancel and join. Returns whether the deadline passed first.
    fn stop(self) -> bool {
        let _ = self.cancel.send(());
        if self.thread.join().is_err() {
            tracing::warn!("watchdog thread panicked");
        }
        self.fired.load(Ordering::SeqCst)
    }
}
