//! Factory/dispatch - builds runtime handles from requests

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::config::{check_data_dir, SandboxConfig};
use crate::error::Result;
use crate::runtime::{
    ExecuteOptions, JavaScriptRuntime, Language, PythonRuntime, Runtime, RuntimeContext,
};
use crate::sandbox::{ExecutionHost, ExecutionPolicy, SandboxResult};
use crate::session::{PruneReport, RetentionPolicy, SessionManager};

/// Parameters for [`create_sandbox`]
#[derive(Clone)]
pub struct SandboxRequest {
    pub language: Language,
    /// Defaults to the config's policy
    pub policy: Option<ExecutionPolicy>,
    /// Defaults to a fresh UUID session
    pub session_id: Option<String>,
    /// Defaults to the config's workspace root
    pub workspace_root: Option<PathBuf>,
    /// Defaults to the config's interpreter module for `language`
    pub module_path: Option<PathBuf>,
    /// Defaults to a process-wide shared host
    pub host: Option<Arc<ExecutionHost>>,
}

impl SandboxRequest {
    pub fn new(language: Language) -> Self {
        SandboxRequest {
            language,
            policy: None,
            session_id: None,
            workspace_root: None,
            module_path: None,
            host: None,
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path = Some(path.into());
        self
    }

    pub fn with_host(mut self, host: Arc<ExecutionHost>) -> Self {
        self.host = Some(host);
        self
    }
}

/// A runtime bound to one session, dispatching to its language variant
#[derive(Clone)]
pub enum RuntimeHandle {
    Python(PythonRuntime),
    JavaScript(JavaScriptRuntime),
}

impl RuntimeHandle {
    fn runtime(&self) -> &dyn Runtime {
        match self {
            RuntimeHandle::Python(rt) => rt as &dyn Runtime,
            RuntimeHandle::JavaScript(rt) => rt,
        }
    }

    fn context(&self) -> &RuntimeContext {
        match self {
            RuntimeHandle::Python(rt) => rt.context(),
            RuntimeHandle::JavaScript(rt) => rt.context(),
        }
    }

    /// Session used when `ExecuteOptions::session_id` is unset
    pub fn session_id(&self) -> &str {
        self.context().default_session().unwrap_or_default()
    }

    /// Host directory backing the default session
    pub fn workspace_path(&self) -> Result<PathBuf> {
        self.context().sessions().resolve(self.session_id())
    }

    pub fn sessions(&self) -> &SessionManager {
        self.context().sessions()
    }
}

#[async_trait]
impl Runtime for RuntimeHandle {
    fn language(&self) -> Language {
        self.runtime().language()
    }

    async fn execute(&self, source: &str, options: ExecuteOptions) -> Result<SandboxResult> {
        self.runtime().execute(source, options).await
    }

    fn validate_code(&self, source: &str) -> bool {
        self.runtime().validate_code(source)
    }
}

/// Host shared by every handle that does not bring its own
pub fn shared_host() -> Result<Arc<ExecutionHost>> {
    static HOST: OnceLock<Arc<ExecutionHost>> = OnceLock::new();
    if let Some(host) = HOST.get() {
        return Ok(host.clone());
    }
    let host = Arc::new(ExecutionHost::new()?);
    Ok(HOST.get_or_init(|| host).clone())
}

/// Build a runtime handle for one language and session.
///
/// A malformed session id or policy is rejected before anything is created
/// on disk. The session workspace exists when this returns.
pub fn create_sandbox(request: SandboxRequest, config: &SandboxConfig) -> Result<RuntimeHandle> {
    let allow_non_uuid = config.allow_non_uuid_sessions;
    let session_id = match request.session_id {
        Some(id) => {
            SessionManager::validate_session_id(&id, allow_non_uuid)?;
            id
        }
        None => Uuid::new_v4().to_string(),
    };
    let policy = match request.policy {
        Some(policy) => policy,
        None => config.default_policy()?,
    };

    let root = request
        .workspace_root
        .unwrap_or_else(|| config.workspace_root.clone());
    if let Some(data_dir) = policy.mount_data_dir() {
        check_data_dir(data_dir, &root)?;
    }
    let sessions = SessionManager::new(&root, &config.log_dir, allow_non_uuid)?
        .with_vendor_dir(config.vendor_dir.clone());
    policy.bind_workspace(&sessions.resolve(&session_id)?)?;
    let session = sessions.create_or_get(Some(&session_id), request.language)?;

    let host = match request.host {
        Some(host) => host,
        None => shared_host()?,
    };
    let module_path = request
        .module_path
        .unwrap_or_else(|| config.module_for(request.language).to_path_buf());

    info!(
        language = %request.language,
        session_id = %session.session_id,
        outcome = ?session.outcome,
        "Sandbox created"
    );

    let ctx = RuntimeContext::new(host, sessions, policy, module_path)
        .with_default_session(session.session_id);
    Ok(match request.language {
        Language::Python => RuntimeHandle::Python(PythonRuntime::new(ctx)),
        Language::JavaScript => RuntimeHandle::JavaScript(JavaScriptRuntime::new(ctx)),
    })
}

fn manager_for(config: &SandboxConfig) -> Result<SessionManager> {
    SessionManager::new(
        &config.workspace_root,
        &config.log_dir,
        config.allow_non_uuid_sessions,
    )
}

/// Prune sessions under the configured workspace root
pub fn prune_sessions(config: &SandboxConfig, retention: RetentionPolicy) -> Result<PruneReport> {
    manager_for(config)?.prune(&retention)
}

/// Delete one session under the configured workspace root
pub fn delete_session(config: &SandboxConfig, session_id: &str) -> Result<bool> {
    manager_for(config)?.delete(session_id)
}

/// True if a session directory exists for `session_id`
pub fn session_exists(config: &SandboxConfig, session_id: &str) -> Result<bool> {
    SessionManager::validate_session_id(session_id, config.allow_non_uuid_sessions)?;
    Ok(config.workspace_root.join(session_id).is_dir())
}
