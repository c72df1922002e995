//! Per-session mutual exclusion
//!
//! Executions against the same workspace are serialized inside the engine.
//! The registry is process-wide so independent handles for one session still
//! share a lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held for the duration of one execution
pub type SessionGuard = OwnedMutexGuard<()>;

#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    fn handle(&self, workspace: &Path) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        // entries only referenced by the map are idle
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        map.entry(workspace.to_path_buf()).or_default().clone()
    }
}

fn registry() -> &'static SessionLocks {
    static LOCKS: OnceLock<SessionLocks> = OnceLock::new();
    LOCKS.get_or_init(SessionLocks::default)
}

/// Wait for exclusive use of a session workspace
pub async fn lock_workspace(workspace: &Path) -> SessionGuard {
    registry().handle(workspace).lock_owned().await
}

/// Exclusive use of a session workspace if nobody else holds it
pub fn try_lock_workspace(workspace: &Path) -> Option<SessionGuard> {
    registry().handle(workspace).try_lock_owned().ok()
}
