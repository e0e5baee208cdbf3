//! The host bridge: everything the guest can reach that the host provides.
//!
//! The bridge is a fixed set of native functions installed on the context's
//! global object: `console.{log,info,warn,error,debug}`, `setTimeout`,
//! `setInterval`, `clearTimeout` and `clearInterval`. Per-run state lives in
//! an isolate slot, so it is dropped together with the isolate.

use std::cell::RefCell;
use std::rc::Rc;

use deno_core::{v8, JsRuntime};
use tokio::time::Instant;

use crate::console::{get_object, Formatter};
use crate::error::SandboxError;
use crate::timers::{normalize_delay, TimerQueue};

/// Target for guest console lines in `tracing`.
pub const GUEST_LOG_TARGET: &str = "jsrun::sandbox::guest";

/// Ordered, append-only console output of one run.
#[derive(Debug, Clone, Default)]
pub struct CapturedLog(Rc<RefCell<Vec<String>>>);

impl CapturedLog {
    /// Append one formatted line.
    pub fn push(&self, line: String) {
        self.0.borrow_mut().push(line);
    }

    /// Copy of the captured lines, in call order.
    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// A registered timer callback with its extra arguments.
pub(crate) struct TimerCallback {
    pub(crate) function: v8::Global<v8::Function>,
    pub(crate) args: Vec<v8::Global<v8::Value>>,
}

/// Host state reachable from the native bridge functions.
pub(crate) struct GuestState {
    pub(crate) log: CapturedLog,
    pub(crate) timers: RefCell<TimerQueue<TimerCallback>>,
    formatter: Formatter,
}

/// Host side of the guest's global surface.
///
/// Create one per run, [`install`](Self::install) it into a fresh runtime,
/// then read the output from [`log`](Self::log).
#[derive(Debug, Default)]
pub struct HostBridge {
    log: CapturedLog,
}

impl HostBridge {
    /// A bridge with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Output captured so far.
    pub fn log(&self) -> &CapturedLog {
        &self.log
    }

    /// Install console and timer functions on the runtime's global object and
    /// remove `Deno`.
    pub(crate) fn install(&self, runtime: &mut JsRuntime) -> Result<Rc<GuestState>, SandboxError> {
        let scope = &mut runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);

        let formatter = Formatter::capture(scope, global)
            .ok_or_else(|| anyhow::anyhow!("JSON, Object or String builtin missing"))?;
        let state = Rc::new(GuestState {
            log: self.log.clone(),
            timers: RefCell::new(TimerQueue::default()),
            formatter,
        });

        let console = v8::Object::new(scope);
        for name in ["log", "info", "warn", "error", "debug"] {
            set_function(scope, console, name, console_log)?;
        }
        set_value(scope, global, "console", console.into())?;

        set_function(scope, global, "setTimeout", set_timeout)?;
        set_function(scope, global, "setInterval", set_interval)?;
        set_function(scope, global, "clearTimeout", clear_timer)?;
        set_function(scope, global, "clearInterval", clear_timer)?;

        if get_object(scope, global, "Deno").is_some() {
            let key = v8_string(scope, "Deno")?;
            if global.delete(scope, key.into()) != Some(true) {
                return Err(anyhow::anyhow!("could not remove Deno from the global object").into());
            }
        }

        scope.set_slot(Rc::clone(&state));
        Ok(state)
    }
}

/// The guest state of the isolate `scope` belongs to.
pub(crate) fn guest_state(isolate: &v8::Isolate) -> Option<Rc<GuestState>> {
    isolate.get_slot::<Rc<GuestState>>().cloned()
}

/// Drop every pending timer and release the slot's reference to the state.
pub(crate) fn teardown(runtime: &mut JsRuntime) {
    let isolate = runtime.v8_isolate();
    if let Some(state) = isolate.remove_slot::<Rc<GuestState>>() {
        state.timers.borrow_mut().clear();
    }
}

/// Message of a thrown value: its `message` property when present, else
/// `String(value)`.
pub(crate) fn exception_message(
    scope: &mut v8::HandleScope<'_>,
    exception: v8::Local<'_, v8::Value>,
) -> String {
    if let Ok(object) = v8::Local::<v8::Object>::try_from(exception) {
        if let Some(key) = v8::String::new(scope, "message") {
            if let Some(message) = object.get(scope, key.into()) {
                if !message.is_undefined() {
                    return message.to_rust_string_lossy(scope);
                }
            }
        }
    }
    exception.to_rust_string_lossy(scope)
}

fn v8_string<'s>(
    scope: &mut v8::HandleScope<'s>,
    value: &str,
) -> Result<v8::Local<'s, v8::String>, SandboxError> {
    v8::String::new(scope, value)
        .ok_or_else(|| anyhow::anyhow!("failed to allocate V8 string {value:?}").into())
}

fn set_value(
    scope: &mut v8::HandleScope<'_>,
    object: v8::Local<'_, v8::Object>,
    name: &str,
    value: v8::Local<'_, v8::Value>,
) -> Result<(), SandboxError> {
    let key = v8_string(scope, name)?;
    match object.set(scope, key.into(), value) {
        Some(true) => Ok(()),
        _ => Err(anyhow::anyhow!("failed to install {name}").into()),
    }
}

fn set_function(
    scope: &mut v8::HandleScope<'_>,
    object: v8::Local<'_, v8::Object>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) -> Result<(), SandboxError> {
    let function = v8::Function::new(scope, callback)
        .ok_or_else(|| anyhow::anyhow!("failed to create native function {name}"))?;
    let label = v8_string(scope, name)?;
    function.set_name(label);
    set_value(scope, object, name, function.into())
}

fn throw_type_error(scope: &mut v8::HandleScope<'_>, message: &str) {
    if let Some(message) = v8::String::new(scope, message) {
        let exception = v8::Exception::type_error(scope, message);
        scope.throw_exception(exception);
    }
}

fn console_log<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    _rv: v8::ReturnValue,
) {
    let Some(state) = guest_state(scope) else {
        return;
    };
    let line = state.formatter.format_args(scope, &args);
    tracing::debug!(target: GUEST_LOG_TARGET, "{line}");
    state.log.push(line);
}

fn set_timeout<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    register_timer(scope, &args, rv, false);
}

fn set_interval<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    rv: v8::ReturnValue,
) {
    register_timer(scope, &args, rv, true);
}

fn register_timer<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: &v8::FunctionCallbackArguments<'s>,
    mut rv: v8::ReturnValue,
    repeating: bool,
) {
    let Ok(callback) = v8::Local::<v8::Function>::try_from(args.get(0)) else {
        throw_type_error(scope, "The \"callback\" argument must be of type function");
        return;
    };
    // A throwing `valueOf` leaves its exception pending; nothing is scheduled.
    let Some(delay) = args.get(1).number_value(scope) else {
        return;
    };
    let Some(state) = guest_state(scope) else {
        return;
    };

    let payload = TimerCallback {
        function: v8::Global::new(scope, callback),
        args: (2..args.length())
            .map(|i| v8::Global::new(scope, args.get(i)))
            .collect(),
    };
    let id = state.timers.borrow_mut().schedule(
        Instant::now(),
        normalize_delay(delay, repeating),
        repeating,
        payload,
    );
    rv.set_uint32(id);
}

fn clear_timer<'s>(
    scope: &mut v8::HandleScope<'s>,
    args: v8::FunctionCallbackArguments<'s>,
    _rv: v8::ReturnValue,
) {
    let Some(raw) = args.get(0).number_value(scope) else {
        return;
    };
    if !(raw >= 1.0 && raw <= f64::from(u32::MAX)) {
        return;
    }
    if let Some(state) = guest_state(scope) {
        state.timers.borrow_mut().cancel(raw as u32);
    }
}
