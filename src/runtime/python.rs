//! CPython (WASI build) runtime

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use super::common::{GuestProfile, GuestSetup, RuntimeContext, GUEST_STATE_FILE};
use super::validate::check_balance;
use super::{ExecuteOptions, Language, Runtime};
use crate::error::Result;
use crate::sandbox::{ExecutionPolicy, SandboxResult};
use crate::session::VENDOR_DIR_NAME;

/// Runs Python source with a `python.wasm` interpreter module
#[derive(Clone)]
pub struct PythonRuntime {
    ctx: RuntimeContext,
}

impl PythonRuntime {
    pub fn new(ctx: RuntimeContext) -> Self {
        PythonRuntime { ctx }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }
}

/// Quote `text` as a Python string literal
fn py_literal(text: &str) -> String {
    // a JSON string is a valid Python string literal
    serde_json::Value::from(text).to_string()
}

fn setup_prelude(policy: &ExecutionPolicy) -> String {
    let site = py_literal(&policy.guest_path_for(VENDOR_DIR_NAME));
    format!(
        "import sys as _sandbox_sys\n\
         if {site} not in _sandbox_sys.path:\n    \
             _sandbox_sys.path.insert(0, {site})\n"
    )
}

fn persist_prelude(policy: &ExecutionPolicy) -> String {
    let state = py_literal(&policy.guest_path_for(GUEST_STATE_FILE));
    format!(
        r#"import atexit as _sandbox_atexit, json as _sandbox_json, types as _sandbox_types
def _sandbox_restore():
    try:
        with open({state}) as f:
            globals().update(_sandbox_json.load(f))
    except (OSError, ValueError):
        pass
def _sandbox_save():
    state = {{}}
    for name, value in list(globals().items()):
        if name.startswith('_') or callable(value) or isinstance(value, _sandbox_types.ModuleType):
            continue
        try:
            _sandbox_json.dumps(value)
        except (TypeError, ValueError):
            continue
        state[name] = value
    with open({state}, 'w') as f:
        _sandbox_json.dump(state, f)
_sandbox_restore()
_sandbox_atexit.register(_sandbox_save)
"#
    )
}

/// Split off the block that must stay at the top of a module: comments, a
/// docstring and `from __future__` imports. The header is empty when the
/// source has no future imports.
fn split_future_header(source: &str) -> (&str, &str) {
    let mut offset = 0;
    let mut header_end = 0;
    let mut lines = source.split_inclusive('\n');

    while let Some(line) = lines.next() {
        offset += line.len();
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with("from __future__ import") {
            let mut open = trimmed.contains('(') && !trimmed.contains(')');
            let mut continued = trimmed.ends_with('\\');
            while open || continued {
                let Some(next) = lines.next() else { break };
                offset += next.len();
                let next = next.trim();
                if next.contains(')') {
                    open = false;
                }
                continued = next.ends_with('\\');
            }
            header_end = offset;
            continue;
        }
        // a docstring may only precede the future imports
        if header_end == 0 {
            if let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| trimmed.starts_with(*q)) {
                let mut closed = trimmed.len() >= 6 && trimmed[3..].contains(quote);
                while !closed {
                    let Some(next) = lines.next() else { break };
                    offset += next.len();
                    closed = next.contains(quote);
                }
                continue;
            }
        }
        break;
    }

    source.split_at(header_end)
}

impl GuestProfile for PythonRuntime {
    fn language(&self) -> Language {
        Language::Python
    }

    fn default_argv(&self, entry_guest_path: &str) -> Vec<String> {
        vec![
            "python".to_string(),
            "-u".to_string(),
            entry_guest_path.to_string(),
        ]
    }

    fn default_env(&self, policy: &ExecutionPolicy) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("HOME".to_string(), policy.guest_mount_path().to_string()),
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        ])
    }

    fn wrap_source(&self, source: &str, policy: &ExecutionPolicy, setup: GuestSetup) -> String {
        let (header, body) = split_future_header(source);
        let mut wrapped = header.to_string();
        if !wrapped.is_empty() && !wrapped.ends_with('\n') {
            wrapped.push('\n');
        }
        if setup.inject_setup {
            wrapped.push_str(&setup_prelude(policy));
        }
        if setup.persist_globals {
            wrapped.push_str(&persist_prelude(policy));
        }
        wrapped.push_str(body);
        wrapped
    }
}

#[async_trait]
impl Runtime for PythonRuntime {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn execute(&self, source: &str, options: ExecuteOptions) -> Result<SandboxResult> {
        self.ctx.run(self, source, options).await
    }

    fn validate_code(&self, source: &str) -> bool {
        match check_balance(source, Language::Python) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Python source failed validation");
                false
            }
        }
    }
}
