//! Module loading for sandboxed code.
//!
//! The function under execution is served from memory as `file:///function.js`;
//! `import` statements resolving to http(s) URLs are fetched at load time. No
//! other scheme resolves, so sandboxed code cannot read the host filesystem
//! through the module graph.

use deno_core::{
    error::AnyError, ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode,
    ModuleSpecifier, ModuleType, RequestedModuleType, ResolutionKind,
};

pub const MAIN_MODULE: &str = "file:///function.js";

pub struct FunctionModuleLoader {
    main_source: String,
}

impl FunctionModuleLoader {
    pub fn new(main_source: String) -> Self {
        Self { main_source }
    }
}

impl ModuleLoader for FunctionModuleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, AnyError> {
        Ok(deno_core::resolve_import(specifier, referrer)?)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let specifier = module_specifier.clone();

        if specifier.as_str() == MAIN_MODULE {
            return ModuleLoadResponse::Sync(Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(self.main_source.clone().into()),
                &specifier,
                None,
            )));
        }

        match specifier.scheme() {
            "http" | "https" => ModuleLoadResponse::Async(Box::pin(async move {
                let code = reqwest::get(specifier.as_str())
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to fetch module {specifier}: {e}"))?
                    .error_for_status()
                    .map_err(|e| anyhow::anyhow!("failed to fetch module {specifier}: {e}"))?
                    .text()
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to read module {specifier}: {e}"))?;
                Ok(ModuleSource::new(
                    ModuleType::JavaScript,
                    ModuleSourceCode::String(code.into()),
                    &specifier,
                    None,
                ))
            })),
            scheme => ModuleLoadResponse::Sync(Err(anyhow::anyhow!(
                "import scheme `{scheme}` is not allowed in sandboxed code"
            ))),
        }
    }
}
