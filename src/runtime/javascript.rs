//! QuickJS (WASI build) runtime

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::common::{GuestProfile, GuestSetup, RuntimeContext};
use super::validate::check_balance;
use super::{ExecuteOptions, Language, Runtime};
use crate::error::Result;
use crate::sandbox::{ExecutionPolicy, SandboxResult};

/// Exposes the QuickJS `std`/`os` modules as globals and starts in the mount.
fn setup_prelude(policy: &ExecutionPolicy) -> String {
    let mount = serde_json::Value::from(policy.guest_mount_path()).to_string();
    format!(
        "import * as std from 'std';\n\
         import * as os from 'os';\n\
         globalThis.std = std;\n\
         globalThis.os = os;\n\
         os.chdir({mount});\n"
    )
}

/// Runs JavaScript source with a `qjs.wasm` interpreter module
#[derive(Clone)]
pub struct JavaScriptRuntime {
    ctx: RuntimeContext,
}

impl JavaScriptRuntime {
    pub fn new(ctx: RuntimeContext) -> Self {
        JavaScriptRuntime { ctx }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }
}

impl GuestProfile for JavaScriptRuntime {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn default_argv(&self, entry_guest_path: &str) -> Vec<String> {
        vec!["qjs".to_string(), entry_guest_path.to_string()]
    }

    fn default_env(&self, policy: &ExecutionPolicy) -> BTreeMap<String, String> {
        BTreeMap::from([("HOME".to_string(), policy.guest_mount_path().to_string())])
    }

    fn wrap_source(&self, source: &str, policy: &ExecutionPolicy, setup: GuestSetup) -> String {
        if setup.persist_globals {
            warn!("auto_persist_globals is not supported by the JavaScript runtime");
        }
        if setup.inject_setup {
            format!("{}{}", setup_prelude(policy), source)
        } else {
            source.to_string()
        }
    }
}

#[async_trait]
impl Runtime for JavaScriptRuntime {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    async fn execute(&self, source: &str, options: ExecuteOptions) -> Result<SandboxResult> {
        self.ctx.run(self, source, options).await
    }

    fn validate_code(&self, source: &str) -> bool {
        match check_balance(source, Language::JavaScript) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "JavaScript source failed validation");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionHost;
    use crate::session::SessionManager;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn runtime_with(module: PathBuf) -> (JavaScriptRuntime, TempDir) {
        let tmp = tempdir().unwrap();
        let sessions = SessionManager::new(
            &tmp.path().join("workspaces"),
            &tmp.path().join("logs"),
            true,
        )
        .unwrap();
        let host = Arc::new(ExecutionHost::new().unwrap());
        let ctx = RuntimeContext::new(host, sessions, ExecutionPolicy::default(), module)
            .with_default_session("js");
        (JavaScriptRuntime::new(ctx), tmp)
    }

    #[test]
    fn test_wrap_source_with_setup() {
        let (runtime, _tmp) = runtime_with(PathBuf::from("qjs.wasm"));
        let policy = ExecutionPolicy::default();
        let wrapped = runtime.wrap_source(
            "console.log(1);",
            &policy,
            GuestSetup {
                inject_setup: true,
                persist_globals: false,
            },
        );
        assert!(wrapped.starts_with("import * as std from 'std';"));
        assert!(wrapped.contains("os.chdir(\"/app\");"));
        assert!(wrapped.ends_with("console.log(1);"));
        assert_eq!(
            runtime.default_argv("/app/user_code.js"),
            vec!["qjs", "/app/user_code.js"]
        );
    }

    #[test]
    fn test_validate_code() {
        let (runtime, _tmp) = runtime_with(PathBuf::from("qjs.wasm"));
        assert!(runtime.validate_code("const f = (x) => { return [x]; };\n"));
        assert!(!runtime.validate_code("function f() { return 1;\n"));
    }

    #[tokio::test]
    async fn test_console_log() {
        let Some(module) = std::env::var("SANDBOX_JAVASCRIPT_WASM")
            .ok()
            .map(PathBuf::from)
            .filter(|p| p.exists())
        else {
            return;
        };
        let (runtime, _tmp) = runtime_with(module);

        let result = runtime.execute("console.log('hello')", ExecuteOptions::new()).await.unwrap();

        assert_eq!(result.stdout, "hello\n");
        assert!(result.success);
        assert_eq!(result.metadata["runtime"], "javascript");
    }
}
