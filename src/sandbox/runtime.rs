//! Sandbox execution host.
//!
//! Each compile or execute call gets a throwaway V8 isolate. Isolates are
//! `!Send`, so the work runs on a dedicated thread with its own
//! single-threaded tokio runtime; the async caller suspends on a oneshot.
//! Wall-clock enforcement is two-layered: every async phase draws on one
//! shared deadline, plus a watchdog thread that terminates the isolate, which
//! also covers synchronous busy loops the event loop never observes.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deno_core::{serde_v8, v8, JsRuntime, ModuleId, PollEventLoopOptions, RuntimeOptions};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::compiler::{self, CompiledFunction};
use super::loader::{FunctionModuleLoader, MAIN_MODULE};
use super::ops::{self, ConsoleSink};
use super::{ConsoleLine, ExecutionOutcome, OutcomeStatus};
use crate::config::SandboxConfig;
use crate::error::EngineError;

// ─── Executor ─────────────────────────────────────────────────────────────────

/// Shared entry point to the sandbox. Cheap to clone behind an `Arc`; the
/// semaphore caps simultaneously live isolates process-wide.
pub struct SandboxExecutor {
    limits: SandboxConfig,
    slots: Arc<Semaphore>,
}

impl SandboxExecutor {
    pub fn new(limits: SandboxConfig) -> Self {
        let slots = Arc::new(Semaphore::new(limits.max_concurrent));
        Self { limits, slots }
    }

    /// Validate source and extract its static exports. The default export is
    /// never invoked; only the module's top level runs.
    pub async fn compile(&self, source: &str) -> Result<CompiledFunction, EngineError> {
        let _permit = self.acquire().await?;
        let limits = self.limits.clone();
        let source = source.to_owned();
        run_isolate_thread(move || compile_blocking(&limits, source)).await?
    }

    /// Run a compiled function in a fresh context. Every failure mode is
    /// folded into the returned outcome.
    pub async fn execute(
        &self,
        unit: &CompiledFunction,
        bound_params: serde_json::Map<String, Value>,
        payload: Value,
    ) -> ExecutionOutcome {
        let _permit = match self.acquire().await {
            Ok(p) => p,
            Err(e) => return error_outcome(e, Vec::new()),
        };
        let limits = self.limits.clone();
        let unit = unit.clone();
        match run_isolate_thread(move || execute_blocking(&limits, unit, bound_params, payload))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => error_outcome(e, Vec::new()),
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit, EngineError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Runtime("sandbox executor is shut down".to_string()))
    }
}

fn error_outcome(e: EngineError, console: Vec<ConsoleLine>) -> ExecutionOutcome {
    ExecutionOutcome {
        status: OutcomeStatus::Error,
        result: None,
        error: Some(e.to_string()),
        console,
    }
}

/// V8 isolates are `!Send` — run the closure on a dedicated thread and await
/// its result over a oneshot.
async fn run_isolate_thread<T, F>(f: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        if tx.send(f()).is_err() {
            warn!("sandbox result receiver dropped before the isolate finished");
        }
    });
    rx.await
        .map_err(|_| EngineError::Runtime("sandbox thread terminated unexpectedly".to_string()))
}

// ─── Isolate setup ────────────────────────────────────────────────────────────

fn new_runtime(limits: &SandboxConfig, source: String) -> Result<JsRuntime, EngineError> {
    let create_params = v8::CreateParams::default().heap_limits(0, limits.max_heap_bytes);
    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(FunctionModuleLoader::new(source))),
        extensions: vec![ops::ledgerd_sandbox::init_ops(
            ConsoleSink::new(limits.max_output_bytes),
            reqwest::Client::new(),
        )],
        create_params: Some(create_params),
        ..Default::default()
    });
    runtime
        .execute_script("[ledgerd:bootstrap]", ops::BOOTSTRAP_JS)
        .map_err(|e| EngineError::Runtime(format!("sandbox bootstrap failed: {e}")))?;
    Ok(runtime)
}

struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace so
/// the termination exception can propagate.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the Box<HeapLimitState> armed below, which
    // outlives every JS execution on this isolate. Only the AtomicBool is
    // touched through a shared reference.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

fn arm_heap_limit(runtime: &mut JsRuntime) -> Box<HeapLimitState> {
    let state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*state as *const HeapLimitState as *mut std::ffi::c_void,
    );
    state
}

/// Unregister the near-heap-limit callback. Must run before the
/// `HeapLimitState` it points at is dropped, or isolate teardown could still
/// invoke the callback against freed memory.
fn disarm_heap_limit(runtime: &mut JsRuntime) {
    runtime
        .v8_isolate()
        .remove_near_heap_limit_callback(near_heap_limit_callback, 0);
}

/// Watchdog thread covering synchronous busy loops: fires
/// `terminate_execution()` when the deadline passes without a disarm.
struct Watchdog {
    cancel_tx: std::sync::mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
    timed_out: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(runtime: &mut JsRuntime, timeout: Duration) -> Self {
        let handle = runtime.v8_isolate().thread_safe_handle();
        let timed_out = Arc::new(AtomicBool::new(false));
        let flag = timed_out.clone();
        let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
        let thread = std::thread::spawn(move || {
            if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout)
            {
                flag.store(true, Ordering::SeqCst);
                handle.terminate_execution();
            }
        });
        Self {
            cancel_tx,
            thread: Some(thread),
            timed_out,
        }
    }

    /// Stop the watchdog and report whether it fired.
    fn disarm(mut self) -> bool {
        let _ = self.cancel_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.timed_out.load(Ordering::SeqCst)
    }
}

fn drain_console(runtime: &mut JsRuntime) -> Vec<ConsoleLine> {
    let state = runtime.op_state();
    let mut state = state.borrow_mut();
    match state.try_take::<ConsoleSink>() {
        Some(sink) => sink.into_lines(),
        None => Vec::new(),
    }
}

/// Load `file:///function.js` and run its top level to completion. Both
/// phases draw on the caller's single deadline, so time spent loading is not
/// granted again to evaluation.
async fn load_and_evaluate(
    runtime: &mut JsRuntime,
    deadline: tokio::time::Instant,
) -> Result<ModuleId, EngineError> {
    let specifier = deno_core::ModuleSpecifier::parse(MAIN_MODULE)
        .map_err(|e| EngineError::Internal(e.into()))?;

    let module_id = tokio::time::timeout_at(deadline, runtime.load_main_es_module(&specifier))
        .await
        .map_err(|_| EngineError::Timeout)?
        .map_err(js_error)?;

    let eval = runtime.mod_evaluate(module_id);
    tokio::time::timeout_at(deadline, runtime.run_event_loop(PollEventLoopOptions::default()))
        .await
        .map_err(|_| EngineError::Timeout)?
        .map_err(js_error)?;
    eval.await.map_err(js_error)?;

    Ok(module_id)
}

fn js_error(e: anyhow::Error) -> EngineError {
    match e.downcast::<deno_core::error::JsError>() {
        Ok(js) => {
            let location = js.frames.first().and_then(|f| {
                let file = f.file_name.as_deref()?;
                Some(match (f.line_number, f.column_number) {
                    (Some(line), Some(col)) => format!("{file}:{line}:{col}"),
                    (Some(line), None) => format!("{file}:{line}"),
                    _ => file.to_string(),
                })
            });
            EngineError::Compile {
                reason: js.exception_message.clone(),
                location,
            }
        }
        Err(other) => EngineError::Runtime(other.to_string()),
    }
}

/// Reapply resource-limit classification: heap exhaustion and watchdog
/// termination both surface as opaque V8 termination errors, so the flags
/// decide. Heap wins over timeout.
fn classify<T>(
    result: Result<T, EngineError>,
    heap: &HeapLimitState,
    timed_out: bool,
) -> Result<T, EngineError> {
    match result {
        Err(_) if heap.triggered.load(Ordering::SeqCst) => {
            Err(EngineError::Runtime("memory limit exceeded".to_string()))
        }
        Err(_) if timed_out => Err(EngineError::Timeout),
        other => other,
    }
}

// ─── Compile path ─────────────────────────────────────────────────────────────

fn compile_blocking(limits: &SandboxConfig, source: String) -> Result<CompiledFunction, EngineError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| EngineError::Internal(e.into()))?;
    rt.block_on(compile_in_isolate(limits, source))
}

async fn compile_in_isolate(
    limits: &SandboxConfig,
    source: String,
) -> Result<CompiledFunction, EngineError> {
    let timeout = Duration::from_millis(limits.timeout_ms);
    let mut runtime = new_runtime(limits, source.clone())?;
    let heap_state = arm_heap_limit(&mut runtime);
    let watchdog = Watchdog::arm(&mut runtime, timeout);
    let deadline = tokio::time::Instant::now() + timeout;

    let loaded = load_and_evaluate(&mut runtime, deadline).await;
    let timed_out = watchdog.disarm();

    // An evaluation failure here is a compile error; resource blowups during
    // the top level are reclassified by the limit flags first.
    let result = classify(loaded, &heap_state, timed_out)
        .and_then(|module_id| compiler::inspect(&mut runtime, module_id, source));
    disarm_heap_limit(&mut runtime);
    result
}

// ─── Execute path ─────────────────────────────────────────────────────────────

fn execute_blocking(
    limits: &SandboxConfig,
    unit: CompiledFunction,
    bound_params: serde_json::Map<String, Value>,
    payload: Value,
) -> ExecutionOutcome {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return error_outcome(EngineError::Internal(e.into()), Vec::new()),
    };
    rt.block_on(execute_in_isolate(limits, unit, bound_params, payload))
}

async fn execute_in_isolate(
    limits: &SandboxConfig,
    unit: CompiledFunction,
    bound_params: serde_json::Map<String, Value>,
    payload: Value,
) -> ExecutionOutcome {
    let timeout = Duration::from_millis(limits.timeout_ms);
    let mut runtime = match new_runtime(limits, unit.source.clone()) {
        Ok(r) => r,
        Err(e) => return error_outcome(e, Vec::new()),
    };
    let heap_state = arm_heap_limit(&mut runtime);
    let watchdog = Watchdog::arm(&mut runtime, timeout);
    let deadline = tokio::time::Instant::now() + timeout;

    let result = run_function(&mut runtime, limits, bound_params, payload, deadline).await;
    let timed_out = watchdog.disarm();
    let result = classify(result, &heap_state, timed_out);
    disarm_heap_limit(&mut runtime);

    let console = drain_console(&mut runtime);
    match result {
        Ok(value) => {
            debug!("sandboxed function completed");
            ExecutionOutcome {
                status: OutcomeStatus::Completed,
                result: Some(value),
                error: None,
                console,
            }
        }
        Err(e) => {
            debug!(err = %e, "sandboxed function failed");
            error_outcome(e, console)
        }
    }
}

async fn run_function(
    runtime: &mut JsRuntime,
    limits: &SandboxConfig,
    bound_params: serde_json::Map<String, Value>,
    payload: Value,
    deadline: tokio::time::Instant,
) -> Result<Value, EngineError> {
    // The source already passed compile, so a failure here is a runtime
    // fault, not a compile error.
    let module_id = load_and_evaluate(runtime, deadline).await.map_err(|e| match e {
        EngineError::Compile { reason, .. } => EngineError::Runtime(reason),
        other => other,
    })?;

    let namespace = runtime
        .get_module_namespace(module_id)
        .map_err(|e| EngineError::Runtime(e.to_string()))?;

    // Call the default export with (boundParams, payload) inside a TryCatch.
    let promise = {
        let scope = &mut runtime.handle_scope();
        let namespace = v8::Local::new(scope, namespace);
        let key = v8_str(scope, "default")?;
        let value = namespace
            .get(scope, key)
            .ok_or_else(|| EngineError::Runtime("missing default export".to_string()))?;
        let function: v8::Local<v8::Function> = value
            .try_into()
            .map_err(|_| EngineError::Runtime("default export is not a function".to_string()))?;

        let params_arg = serde_v8::to_v8(scope, Value::Object(bound_params))
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let payload_arg = serde_v8::to_v8(scope, payload)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        let try_scope = &mut v8::TryCatch::new(scope);
        let recv = v8::undefined(try_scope).into();
        match function.call(try_scope, recv, &[params_arg, payload_arg]) {
            Some(value) => v8::Global::new(try_scope, value),
            None => return Err(caught_error(try_scope)),
        }
    };

    // Resolve the returned value (promise or plain) while driving the event
    // loop, still under the same deadline.
    let resolve = runtime.resolve(promise);
    let resolved = tokio::time::timeout_at(
        deadline,
        runtime.with_event_loop_future(resolve, PollEventLoopOptions::default()),
    )
    .await
    .map_err(|_| EngineError::Timeout)?
    .map_err(js_rejection)?;

    // Encode the result inside V8. A cyclic structure makes JSON.stringify
    // throw a catchable TypeError there, instead of recursing on the host
    // stack; the encoded length is also what the output limit meters.
    let encoded = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, resolved);
        if local.is_null_or_undefined() {
            "null".to_string()
        } else {
            let try_scope = &mut v8::TryCatch::new(scope);
            match v8::json::stringify(try_scope, local) {
                Some(text) => text.to_rust_string_lossy(try_scope),
                None => return Err(stringify_error(try_scope)),
            }
        }
    };

    if encoded.len() > limits.max_output_bytes {
        return Err(EngineError::Serialization(format!(
            "result of {} bytes exceeds the {} byte output limit",
            encoded.len(),
            limits.max_output_bytes
        )));
    }

    // Values JSON.stringify cannot encode (a bare function, a symbol) come
    // back as the literal text `undefined`, which fails to parse here.
    serde_json::from_str(&encoded)
        .map_err(|_| EngineError::Serialization("result is not JSON-serializable".to_string()))
}

fn stringify_error(try_scope: &mut v8::TryCatch<v8::HandleScope>) -> EngineError {
    let detail = match try_scope.exception() {
        Some(exception) => exception.to_rust_string_lossy(try_scope),
        None => "value has no JSON representation".to_string(),
    };
    EngineError::Serialization(format!("result is not JSON-serializable: {detail}"))
}

fn v8_str<'s>(
    scope: &mut v8::HandleScope<'s>,
    text: &str,
) -> Result<v8::Local<'s, v8::Value>, EngineError> {
    v8::String::new(scope, text)
        .map(Into::into)
        .ok_or_else(|| EngineError::Runtime("failed to allocate v8 string".to_string()))
}

fn caught_error(try_scope: &mut v8::TryCatch<v8::HandleScope>) -> EngineError {
    if try_scope.has_terminated() {
        // Termination is reclassified by the caller via the watchdog/heap flags.
        return EngineError::Runtime("execution terminated".to_string());
    }
    let message = match try_scope.exception() {
        Some(exception) => exception.to_rust_string_lossy(try_scope),
        None => "unknown exception".to_string(),
    };
    EngineError::Runtime(message)
}

/// Promise rejections come back as `JsError`s; report the exception message
/// rather than the full stack dump.
fn js_rejection(e: anyhow::Error) -> EngineError {
    match e.downcast::<deno_core::error::JsError>() {
        Ok(js) => EngineError::Runtime(js.exception_message.clone()),
        Err(other) => EngineError::Runtime(other.to_string()),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::default())
    }

    fn executor_with(f: impl FnOnce(&mut SandboxConfig)) -> SandboxExecutor {
        let mut limits = SandboxConfig::default();
        f(&mut limits);
        SandboxExecutor::new(limits)
    }

    async fn run(source: &str, params: serde_json::Map<String, Value>, payload: Value) -> ExecutionOutcome {
        let exec = executor();
        let unit = exec.compile(source).await.expect("compile");
        exec.execute(&unit, params, payload).await
    }

    #[tokio::test]
    async fn resolves_return_value_to_json() {
        let outcome = run(
            "export default async (params, payload) => ({ doubled: payload.n * 2 });",
            serde_json::Map::new(),
            serde_json::json!({ "n": 21 }),
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.result, Some(serde_json::json!({ "doubled": 42 })));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn bound_params_arrive_as_first_argument() {
        let mut params = serde_json::Map::new();
        params.insert("apiKey".to_string(), Value::String("secret".into()));
        let outcome = run(
            "export default (params, payload) => params.apiKey;",
            params,
            Value::Null,
        )
        .await;
        assert_eq!(outcome.result, Some(Value::String("secret".into())));
    }

    #[tokio::test]
    async fn thrown_exception_becomes_error_outcome() {
        let outcome = run(
            r#"export default (params, payload) => { throw new Error("boom"); };"#,
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.error.as_deref().unwrap_or("").contains("boom"));
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn rejected_promise_becomes_error_outcome() {
        let outcome = run(
            r#"export default async (params, payload) => { throw new Error("async boom"); };"#,
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.error.as_deref().unwrap_or("").contains("async boom"));
    }

    #[tokio::test]
    async fn busy_loop_hits_the_wall_clock_limit() {
        let exec = executor_with(|l| l.timeout_ms = 300);
        let unit = exec
            .compile("export default (params, payload) => { while (true) {} };")
            .await
            .expect("compile");
        let outcome = exec.execute(&unit, serde_json::Map::new(), Value::Null).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("execution timed out"));
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn console_capture_preserves_emit_order() {
        let outcome = run(
            r#"export default (params, payload) => {
                console.log("first", 1);
                console.error("second");
                console.log({ third: true });
                return null;
            };"#,
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        let msgs: Vec<&str> = outcome.console.iter().map(|l| l.msg.as_str()).collect();
        assert_eq!(msgs, vec!["first 1", "second", r#"{"third":true}"#]);
        assert!(!outcome.console[0].is_err);
        assert!(outcome.console[1].is_err);
    }

    #[tokio::test]
    async fn console_is_captured_even_when_the_function_fails() {
        let outcome = run(
            r#"export default (params, payload) => {
                console.log("before the crash");
                throw new Error("crash");
            };"#,
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.console[0].msg, "before the crash");
    }

    #[tokio::test]
    async fn oversized_console_output_is_truncated_with_marker() {
        let exec = executor_with(|l| l.max_output_bytes = 64);
        let unit = exec
            .compile(
                r#"export default (params, payload) => {
                    for (let i = 0; i < 20; i++) console.log("x".repeat(16));
                    return null;
                };"#,
            )
            .await
            .expect("compile");
        let outcome = exec.execute(&unit, serde_json::Map::new(), Value::Null).await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        let last = outcome.console.last().expect("marker line");
        assert_eq!(last.msg, "[console output truncated]");
        assert!(outcome.console.len() < 20);
    }

    #[tokio::test]
    async fn oversized_return_value_fails_with_serialization_error() {
        let exec = executor_with(|l| l.max_output_bytes = 64);
        let unit = exec
            .compile(r#"export default (params, payload) => "y".repeat(1000);"#)
            .await
            .expect("compile");
        let outcome = exec.execute(&unit, serde_json::Map::new(), Value::Null).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.error.as_deref().unwrap_or("").contains("output limit"));
    }

    #[tokio::test]
    async fn cyclic_return_value_is_a_serialization_error() {
        let outcome = run(
            "export default (params, payload) => { const a = {}; a.self = a; return a; };",
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or("")
            .contains("not JSON-serializable"));
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn function_return_value_is_a_serialization_error() {
        let outcome = run(
            "export default (params, payload) => () => 1;",
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or("")
            .contains("not JSON-serializable"));
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn returning_nothing_yields_null() {
        let outcome = run(
            "export default (params, payload) => {};",
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.result, Some(Value::Null));
    }

    #[tokio::test]
    async fn timeout_budget_spans_module_load_and_call() {
        let exec = executor_with(|l| l.timeout_ms = 500);
        let unit = exec
            .compile(
                r#"
                const spinUntil = Date.now() + 300;
                while (Date.now() < spinUntil) {}
                export default (params, payload) => { while (true) {} };
                "#,
            )
            .await
            .expect("compile");
        let started = std::time::Instant::now();
        let outcome = exec.execute(&unit, serde_json::Map::new(), Value::Null).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("execution timed out"));
        // The top level and the call share one wall-clock window, not one each.
        assert!(started.elapsed() < Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn heap_exhaustion_is_reported_as_memory_limit() {
        let exec = executor_with(|l| l.max_heap_bytes = 32 * 1024 * 1024);
        let unit = exec
            .compile(
                r#"export default (params, payload) => {
                    const hog = [];
                    while (true) hog.push(new Array(65536).fill(7));
                };"#,
            )
            .await
            .expect("compile");
        let outcome = exec.execute(&unit, serde_json::Map::new(), Value::Null).await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or("")
            .contains("memory limit exceeded"));
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_schemes() {
        let outcome = run(
            r#"export default async (params, payload) => { await fetch("ftp://example.com/x"); };"#,
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.error.as_deref().unwrap_or("").contains("scheme"));
    }

    #[tokio::test]
    async fn deno_namespace_is_not_reachable() {
        let outcome = run(
            "export default (params, payload) => typeof globalThis.Deno;",
            serde_json::Map::new(),
            Value::Null,
        )
        .await;
        assert_eq!(outcome.result, Some(Value::String("undefined".into())));
    }

    #[tokio::test]
    async fn executions_do_not_share_state() {
        let exec = executor();
        let unit = exec
            .compile(
                r#"globalThis.counter = (globalThis.counter || 0) + 1;
                export default (params, payload) => globalThis.counter;"#,
            )
            .await
            .expect("compile");
        let first = exec.execute(&unit, serde_json::Map::new(), Value::Null).await;
        let second = exec.execute(&unit, serde_json::Map::new(), Value::Null).await;
        // A fresh isolate per call: the module top level runs anew each time.
        assert_eq!(first.result, Some(serde_json::json!(1)));
        assert_eq!(second.result, Some(serde_json::json!(1)));
    }
}
