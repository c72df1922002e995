//! Execution pipeline shared by every runtime variant

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::snapshot::WorkspaceSnapshot;
use super::{ExecuteOptions, Language};
use crate::analysis;
use crate::error::{Error, Result};
use crate::sandbox::{ExecutionHost, ExecutionPolicy, GuestInvocation, SandboxResult};
use crate::session::{
    lock_workspace, SessionManager, SessionMetadata, METADATA_FILE, VENDOR_DIR_NAME,
};

/// Guest-visible file holding persisted globals between executions
pub const GUEST_STATE_FILE: &str = ".session_state.json";

/// Optional source preludes requested for one execution
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GuestSetup {
    pub inject_setup: bool,
    pub persist_globals: bool,
}

/// What a language variant contributes to an execution
pub(crate) trait GuestProfile: Send + Sync {
    fn language(&self) -> Language;

    /// argv used when the policy does not pin one
    fn default_argv(&self, entry_guest_path: &str) -> Vec<String>;

    /// Environment defaults; policy entries override these
    fn default_env(&self, policy: &ExecutionPolicy) -> BTreeMap<String, String>;

    /// Entry file contents: the user source plus any requested preludes
    fn wrap_source(&self, source: &str, policy: &ExecutionPolicy, setup: GuestSetup) -> String;
}

/// Host, sessions and policy shared by the runtime variants
#[derive(Clone)]
pub struct RuntimeContext {
    host: Arc<ExecutionHost>,
    sessions: SessionManager,
    policy: ExecutionPolicy,
    module_path: PathBuf,
    default_session: Option<String>,
}

impl RuntimeContext {
    /// `policy` must not be bound to a workspace other than the session's.
    pub fn new(
        host: Arc<ExecutionHost>,
        sessions: SessionManager,
        policy: ExecutionPolicy,
        module_path: impl Into<PathBuf>,
    ) -> Self {
        RuntimeContext {
            host,
            sessions,
            policy,
            module_path: module_path.into(),
            default_session: None,
        }
    }

    /// Session used when `ExecuteOptions::session_id` is unset
    pub fn with_default_session(mut self, session_id: impl Into<String>) -> Self {
        self.default_session = Some(session_id.into());
        self
    }

    pub fn default_session(&self) -> Option<&str> {
        self.default_session.as_deref()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    /// Run one execution end to end.
    ///
    /// The session workspace is locked for the whole call.
    pub(crate) async fn run<P: GuestProfile>(
        &self,
        profile: &P,
        source: &str,
        options: ExecuteOptions,
    ) -> Result<SandboxResult> {
        let language = profile.language();
        let session_id = match options.session_id.as_ref().or(self.default_session.as_ref()) {
            Some(id) => id.clone(),
            None => Uuid::new_v4().to_string(),
        };
        // reject a bad id or policy before anything is created
        let resolved = self.sessions.resolve(&session_id)?;
        let policy = self.policy.bind_workspace(&resolved)?;

        // held from before creation so pruning cannot remove the workspace mid-run
        let _guard = lock_workspace(&resolved).await;
        let session = self.sessions.create_or_get(Some(&session_id), language)?;
        let workspace = session.workspace_path.clone();

        // 1. Session state and entry file
        let mut metadata = SessionMetadata::load(&workspace)?.unwrap_or(session.metadata);
        let persist = options
            .auto_persist_globals
            .unwrap_or(metadata.auto_persist_globals);
        if persist {
            restore_guest_state(&workspace, &metadata)?;
        }

        let setup = GuestSetup {
            inject_setup: options.inject_setup,
            persist_globals: persist,
        };
        let entry = language.entry_file();
        fs::write(workspace.join(entry), profile.wrap_source(source, &policy, setup))?;

        let metadata_tmp = format!("{METADATA_FILE}.tmp");
        let excluded = [
            entry,
            METADATA_FILE,
            metadata_tmp.as_str(),
            GUEST_STATE_FILE,
            VENDOR_DIR_NAME,
        ];
        let before = WorkspaceSnapshot::capture(&workspace, &excluded)?;

        // 2. Run the guest
        let invocation = GuestInvocation {
            argv: if policy.argv().is_empty() {
                profile.default_argv(&policy.guest_path_for(entry))
            } else {
                policy.argv().to_vec()
            },
            env: {
                let mut env = profile.default_env(&policy);
                env.extend(policy.env().iter().map(|(k, v)| (k.clone(), v.clone())));
                env
            },
            stdin: options.stdin.clone(),
        };

        let execution_id = Uuid::new_v4().to_string();
        info!(
            event = "execution.start",
            runtime = %language,
            session_id = %session.session_id,
            execution_id = %execution_id,
            fuel_budget = policy.fuel_budget(),
            memory_bytes = policy.memory_bytes(),
            "Execution started"
        );

        let host = self.host.clone();
        let module_path = self.module_path.clone();
        let run_policy = policy.clone();
        let mut result = tokio::task::spawn_blocking(move || {
            host.run_file(&module_path, &run_policy, &invocation)
        })
        .await
        .map_err(|e| Error::Internal(format!("Execution task failed: {}", e)))?;

        // 3. File delta, metadata and analysis
        let after = WorkspaceSnapshot::capture(&workspace, &excluded)?;
        let (created, modified) = before.diff(&after);
        result.files_created = created;
        result.files_modified = modified;

        result.set_metadata("runtime", language.to_string());
        result.set_metadata("session_id", session.session_id.clone());
        result.set_metadata("execution_id", execution_id.clone());
        result.set_metadata("session_outcome", serde_json::to_value(session.outcome)?);
        analysis::enrich(&mut result, policy.fuel_budget(), source, language);

        metadata.touch();
        metadata.auto_persist_globals = persist;
        if persist {
            metadata.persisted_state = read_guest_state(&workspace);
        }
        metadata.save(&workspace)?;

        // 4. Per-execution transcript
        if let Err(e) = self.sessions.write_execution_log(&execution_id, &result) {
            warn!(execution_id = %execution_id, error = %e, "Failed to write execution log");
        }
        match self.sessions.cleanup_logs(&execution_id, policy.preserve_logs()) {
            Ok(removed) => debug!(execution_id = %execution_id, removed, "Execution logs handled"),
            Err(e) => warn!(execution_id = %execution_id, error = %e, "Failed to clean execution logs"),
        }

        info!(
            event = "execution.finish",
            runtime = %language,
            session_id = %session.session_id,
            execution_id = %execution_id,
            state = ?result.state,
            success = result.success,
            exit_code = ?result.exit_code,
            fuel_consumed = result.fuel_consumed,
            duration_ms = result.duration_ms,
            "Execution finished"
        );

        Ok(result)
    }
}

/// Make the last saved globals visible to the guest.
fn restore_guest_state(workspace: &Path, metadata: &SessionMetadata) -> Result<()> {
    if let Some(state) = &metadata.persisted_state {
        fs::write(workspace.join(GUEST_STATE_FILE), serde_json::to_vec(state)?)?;
    }
    Ok(())
}

fn read_guest_state(workspace: &Path) -> Option<serde_json::Value> {
    let raw = fs::read_to_string(workspace.join(GUEST_STATE_FILE)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable persisted guest state");
            None
        }
    }
}
