//! Source validation and static export extraction.
//!
//! Compilation evaluates the module's top level in a fresh sandbox context
//! and inspects the resulting namespace. The default export itself is never
//! invoked; its body first runs during execution.

use deno_core::{serde_v8, v8, JsRuntime, ModuleId};

use crate::engine::binder::ParamSchema;
use crate::error::EngineError;

/// A validated function: the source plus everything the module declares
/// statically. Execution always re-instantiates a fresh context from the
/// source — nothing of the compile-time isolate survives here.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub source: String,
    /// Declared parameter schema (`params` export), empty when absent.
    pub params: ParamSchema,
    /// Events the function handles (`supportedEvents` export). An empty list
    /// makes the function untargetable by triggers.
    pub supported_events: Vec<String>,
}

impl CompiledFunction {
    pub fn supports_event(&self, event: &str) -> bool {
        self.supported_events.iter().any(|e| e == event)
    }
}

/// Inspect an evaluated module's namespace. Runs on the isolate thread.
pub(super) fn inspect(
    runtime: &mut JsRuntime,
    module_id: ModuleId,
    source: String,
) -> Result<CompiledFunction, EngineError> {
    let namespace = runtime
        .get_module_namespace(module_id)
        .map_err(|e| EngineError::compile(e.to_string()))?;
    let scope = &mut runtime.handle_scope();
    let namespace = v8::Local::new(scope, namespace);

    // Default export: present, callable, exactly (params, payload).
    let default_export = export(scope, namespace, "default")?
        .ok_or_else(|| EngineError::compile("missing default export"))?;
    let function: v8::Local<v8::Function> = default_export
        .try_into()
        .map_err(|_| EngineError::compile("default export is not a function"))?;
    let arity = function_arity(scope, function)?;
    if arity != 2 {
        return Err(EngineError::compile(format!(
            "default export must accept exactly 2 arguments (params, payload), found {arity}"
        )));
    }

    let params = match export(scope, namespace, "params")? {
        Some(value) => serde_v8::from_v8::<ParamSchema>(scope, value)
            .map_err(|e| EngineError::compile(format!("invalid `params` export: {e}")))?,
        None => ParamSchema::new(),
    };

    let supported_events = match export(scope, namespace, "supportedEvents")? {
        Some(value) => serde_v8::from_v8::<Vec<String>>(scope, value).map_err(|e| {
            EngineError::compile(format!("invalid `supportedEvents` export: {e}"))
        })?,
        None => Vec::new(),
    };

    Ok(CompiledFunction {
        source,
        params,
        supported_events,
    })
}

/// A named export, with absent and `undefined` folded together.
fn export<'s>(
    scope: &mut v8::HandleScope<'s>,
    namespace: v8::Local<'s, v8::Object>,
    name: &str,
) -> Result<Option<v8::Local<'s, v8::Value>>, EngineError> {
    let key = v8::String::new(scope, name)
        .ok_or_else(|| EngineError::Runtime("failed to allocate v8 string".to_string()))?;
    Ok(namespace
        .get(scope, key.into())
        .filter(|v| !v.is_undefined()))
}

fn function_arity(
    scope: &mut v8::HandleScope,
    function: v8::Local<v8::Function>,
) -> Result<u32, EngineError> {
    let key = v8::String::new(scope, "length")
        .ok_or_else(|| EngineError::Runtime("failed to allocate v8 string".to_string()))?;
    let length = function
        .get(scope, key.into())
        .and_then(|v| v.uint32_value(scope))
        .unwrap_or(0);
    Ok(length)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::engine::binder::ParamType;
    use crate::sandbox::SandboxExecutor;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::default())
    }

    const WELL_FORMED: &str = r#"
        export const params = {
            apiKey: { name: "API Key", type: "string" },
        };
        export const supportedEvents = ["transaction_created"];
        export default async (params, payload) => null;
    "#;

    #[tokio::test]
    async fn extracts_params_and_supported_events() {
        let unit = executor().compile(WELL_FORMED).await.unwrap();
        assert_eq!(unit.params.len(), 1);
        assert_eq!(unit.params["apiKey"].name, "API Key");
        assert_eq!(unit.params["apiKey"].ty, ParamType::String);
        assert!(unit.supports_event("transaction_created"));
        assert!(!unit.supports_event("transaction_updated"));
    }

    #[tokio::test]
    async fn compile_does_not_run_the_default_export() {
        let unit = executor()
            .compile(
                r#"export default (params, payload) => { throw new Error("must not run"); };"#,
            )
            .await
            .unwrap();
        assert!(unit.params.is_empty());
        assert!(unit.supported_events.is_empty());
    }

    #[tokio::test]
    async fn syntax_error_is_a_compile_error() {
        let err = executor().compile("export default (params, payload =>").await.unwrap_err();
        assert!(matches!(err, EngineError::Compile { .. }));
    }

    #[tokio::test]
    async fn missing_default_export_is_rejected() {
        let err = executor().compile("export const x = 1;").await.unwrap_err();
        match err {
            EngineError::Compile { reason, .. } => assert!(reason.contains("default export")),
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_function_default_export_is_rejected() {
        let err = executor().compile("export default 42;").await.unwrap_err();
        match err {
            EngineError::Compile { reason, .. } => assert!(reason.contains("not a function")),
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_arity_is_rejected() {
        let err = executor()
            .compile("export default (onlyOne) => onlyOne;")
            .await
            .unwrap_err();
        match err {
            EngineError::Compile { reason, .. } => assert!(reason.contains("2 arguments")),
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_params_export_is_rejected() {
        let err = executor()
            .compile(
                r#"export const params = { apiKey: { name: "K", type: "number" } };
                   export default (params, payload) => null;"#,
            )
            .await
            .unwrap_err();
        match err {
            EngineError::Compile { reason, .. } => assert!(reason.contains("params")),
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn top_level_throw_is_a_compile_error() {
        let err = executor()
            .compile(r#"throw new Error("top level"); export default (a, b) => null;"#)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Compile { .. }));
    }
}
