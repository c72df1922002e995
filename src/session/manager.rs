//! Session/workspace manager
//!
//! Owns the on-disk session directories under one workspace root:
//! identifier validation, creation with a private package snapshot,
//! deletion, age-based pruning and per-execution log artifacts.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock::try_lock_workspace;
use super::metadata::SessionMetadata;
use super::tree::{copy_tree, dir_size};
use crate::error::{Error, Result};
use crate::runtime::Language;
use crate::sandbox::SandboxResult;

/// Directory inside a workspace holding the private vendored package copy
pub const VENDOR_DIR_NAME: &str = "site-packages";

/// Longest accepted session identifier
const MAX_SESSION_ID_LEN: usize = 128;

/// Whether `create_or_get` made a new workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    Created,
    Retrieved,
}

/// A resolved, existing session
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub workspace_path: PathBuf,
    pub metadata: SessionMetadata,
    pub outcome: SessionOutcome,
}

/// Age-based pruning policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Sessions idle for longer than this are removed
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Report what would be removed without deleting anything
    #[serde(default)]
    pub dry_run: bool,
}

impl RetentionPolicy {
    pub fn older_than(max_age: Duration) -> Self {
        RetentionPolicy {
            max_age,
            dry_run: false,
        }
    }
}

/// Directory entry that did not pass session validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Outcome of a prune pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneReport {
    /// Sessions deleted (or that would be, on a dry run)
    pub removed: Vec<String>,
    /// Valid sessions younger than the threshold
    pub kept: Vec<String>,
    /// Entries that failed validation; never deleted
    pub skipped: Vec<SkippedEntry>,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

/// Manages session workspaces under a single root
#[derive(Debug, Clone)]
pub struct SessionManager {
    workspace_root: PathBuf,
    log_dir: PathBuf,
    allow_non_uuid: bool,
    vendor_dir: Option<PathBuf>,
}

impl SessionManager {
    /// Create a manager, creating the workspace root if needed.
    pub fn new(workspace_root: &Path, log_dir: &Path, allow_non_uuid: bool) -> Result<Self> {
        fs::create_dir_all(workspace_root)?;
        let workspace_root = workspace_root.canonicalize()?;

        let log_dir = if log_dir.is_absolute() {
            log_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(log_dir)
        };
        if log_dir.starts_with(&workspace_root) {
            return Err(Error::Config(format!(
                "log_dir {} must not live inside the workspace root",
                log_dir.display()
            )));
        }

        Ok(SessionManager {
            workspace_root,
            log_dir,
            allow_non_uuid,
            vendor_dir: None,
        })
    }

    /// Copy this package tree into every newly created session
    pub fn with_vendor_dir(mut self, vendor_dir: Option<PathBuf>) -> Self {
        self.vendor_dir = vendor_dir;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Check a session identifier without touching the filesystem.
    pub fn validate_session_id(session_id: &str, allow_non_uuid: bool) -> Result<()> {
        let reject = |reason: &str| {
            Err(Error::InvalidSessionId(format!(
                "{:?}: {}",
                session_id.chars().take(MAX_SESSION_ID_LEN).collect::<String>(),
                reason
            )))
        };

        if session_id.is_empty() {
            return reject("empty");
        }
        if session_id.len() > MAX_SESSION_ID_LEN {
            return reject("too long");
        }
        if session_id.contains('/') || session_id.contains('\\') {
            return reject("contains a path separator");
        }
        if session_id.contains("..") {
            return reject("contains '..'");
        }
        if session_id.starts_with('.') {
            return reject("hidden names are reserved");
        }
        if !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return reject("only ASCII letters, digits, '-', '_' and '.' are allowed");
        }
        if !allow_non_uuid && Uuid::parse_str(session_id).is_err() {
            return reject("not a UUID");
        }
        Ok(())
    }

    /// Resolve a session identifier to its workspace path.
    ///
    /// Never creates anything.
    pub fn resolve(&self, session_id: &str) -> Result<PathBuf> {
        Self::validate_session_id(session_id, self.allow_non_uuid)?;
        let path = self.workspace_root.join(session_id);
        self.ensure_under_root(&path)?;
        Ok(path)
    }

    /// Re-check that a path is a direct, non-symlink child of the root.
    fn ensure_under_root(&self, path: &Path) -> Result<()> {
        let lexical_ok = path.parent() == Some(self.workspace_root.as_path())
            && path.starts_with(&self.workspace_root)
            && path
                .strip_prefix(&self.workspace_root)
                .map(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))))
                .unwrap_or(false);
        if !lexical_ok {
            return Err(Error::InvalidSessionId(format!(
                "{} escapes the workspace root",
                path.display()
            )));
        }
        if let Ok(meta) = fs::symlink_metadata(path) {
            if meta.file_type().is_symlink() {
                return Err(Error::InvalidSessionId(format!(
                    "{} is a symlink",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Get a session, creating its workspace on first use.
    ///
    /// A missing `session_id` creates a fresh UUID session.
    pub fn create_or_get(&self, session_id: Option<&str>, language: Language) -> Result<Session> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let workspace = self.resolve(&session_id)?;

        match fs::create_dir(&workspace) {
            Ok(()) => {
                if let Some(vendor) = &self.vendor_dir {
                    let bytes = copy_tree(vendor, &workspace.join(VENDOR_DIR_NAME))?;
                    debug!(session_id = %session_id, bytes, "Copied vendored packages");
                }
                let metadata = SessionMetadata::new(&session_id, language);
                metadata.save(&workspace)?;
                info!(event = "session.created", session_id = %session_id, language = %language, "Session created");
                Ok(Session {
                    session_id,
                    workspace_path: workspace,
                    metadata,
                    outcome: SessionOutcome::Created,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !workspace.is_dir() {
                    return Err(Error::InvalidSessionId(format!(
                        "{session_id} exists but is not a directory"
                    )));
                }
                let metadata = match SessionMetadata::load(&workspace)? {
                    Some(meta) => meta,
                    None => {
                        let meta = SessionMetadata::new(&session_id, language);
                        meta.save(&workspace)?;
                        meta
                    }
                };
                if metadata.language != language {
                    warn!(
                        session_id = %session_id,
                        stored = %metadata.language,
                        requested = %language,
                        "Session reused with a different language"
                    );
                }
                info!(event = "session.retrieved", session_id = %session_id, language = %language, "Session retrieved");
                Ok(Session {
                    session_id,
                    workspace_path: workspace,
                    metadata,
                    outcome: SessionOutcome::Retrieved,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete one session. Returns false if it did not exist.
    ///
    /// Fails with `SessionBusy` while an execution holds the session.
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let workspace = self.resolve(session_id)?;
        if !workspace.exists() {
            return Ok(false);
        }
        let _guard = try_lock_workspace(&workspace)
            .ok_or_else(|| Error::SessionBusy(session_id.to_string()))?;
        fs::remove_dir_all(&workspace)?;
        info!(session_id = %session_id, "Session deleted");
        Ok(true)
    }

    /// Ids of all valid session directories
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.workspace_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if Self::validate_session_id(name, self.allow_non_uuid).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove sessions idle for longer than the retention threshold.
    ///
    /// Every directory passing the creation-time validation is considered.
    /// Anything else, and any expired session that is mid-execution, is
    /// reported in `skipped` and left untouched.
    pub fn prune(&self, retention: &RetentionPolicy) -> Result<PruneReport> {
        let mut report = PruneReport {
            dry_run: retention.dry_run,
            ..PruneReport::default()
        };
        let now = SystemTime::now();

        for entry in fs::read_dir(&self.workspace_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();

            let file_type = entry.file_type()?;
            if !file_type.is_dir() {
                let reason = if file_type.is_symlink() { "symlink" } else { "not a directory" };
                warn!(entry = %name, reason, "Skipping non-session entry in workspace root");
                report.skipped.push(SkippedEntry {
                    name,
                    reason: reason.to_string(),
                });
                continue;
            }
            if let Err(e) = entry
                .file_name()
                .to_str()
                .ok_or_else(|| Error::InvalidSessionId("non UTF-8 name".to_string()))
                .and_then(|id| Self::validate_session_id(id, self.allow_non_uuid))
            {
                warn!(entry = %name, error = %e, "Skipping invalid session directory");
                report.skipped.push(SkippedEntry {
                    name,
                    reason: e.to_string(),
                });
                continue;
            }

            let path = entry.path();
            let age = match self.session_age(&path, now) {
                Ok(age) => age,
                Err(e) => {
                    report.errors.push(format!("{name}: {e}"));
                    continue;
                }
            };
            if age <= retention.max_age {
                report.kept.push(name);
                continue;
            }

            let Some(_guard) = try_lock_workspace(&path) else {
                debug!(session_id = %name, "Session in use, not pruning");
                report.skipped.push(SkippedEntry {
                    name,
                    reason: "in use".to_string(),
                });
                continue;
            };

            let size = dir_size(&path).unwrap_or(0);
            if !retention.dry_run {
                if let Err(e) = fs::remove_dir_all(&path) {
                    report.errors.push(format!("{name}: {e}"));
                    continue;
                }
            }
            debug!(session_id = %name, age_secs = age.as_secs(), size, "Pruned session");
            report.bytes_freed += size;
            report.removed.push(name);
        }

        report.removed.sort();
        report.kept.sort();
        info!(
            removed = report.removed.len(),
            kept = report.kept.len(),
            skipped = report.skipped.len(),
            bytes_freed = report.bytes_freed,
            dry_run = report.dry_run,
            "Session prune finished"
        );
        Ok(report)
    }

    /// Idle time from metadata `updated_at`, falling back to directory mtime.
    fn session_age(&self, path: &Path, now: SystemTime) -> Result<Duration> {
        if let Ok(Some(meta)) = SessionMetadata::load(path) {
            let idle = Utc::now().signed_duration_since(meta.updated_at);
            return Ok(idle.to_std().unwrap_or(Duration::ZERO));
        }
        let modified = fs::metadata(path)?.modified()?;
        Ok(now.duration_since(modified).unwrap_or(Duration::ZERO))
    }

    /// Directory holding the artifacts of one execution
    pub fn execution_log_dir(&self, execution_id: &str) -> Result<PathBuf> {
        Self::validate_session_id(execution_id, true)?;
        Ok(self.log_dir.join(execution_id))
    }

    /// Write the transcript of one execution: stdout, stderr and the result.
    pub fn write_execution_log(&self, execution_id: &str, result: &SandboxResult) -> Result<PathBuf> {
        let dir = self.execution_log_dir(execution_id)?;
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("stdout.log"), &result.stdout)?;
        fs::write(dir.join("stderr.log"), &result.stderr)?;
        fs::write(dir.join("result.json"), serde_json::to_vec_pretty(result)?)?;
        Ok(dir)
    }

    /// Delete the artifacts of one execution unless `preserve` is set.
    ///
    /// Returns true if something was removed.
    pub fn cleanup_logs(&self, execution_id: &str, preserve: bool) -> Result<bool> {
        let dir = self.execution_log_dir(execution_id)?;
        if preserve {
            debug!(execution_id, path = %dir.display(), "Preserving execution logs");
            return Ok(false);
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::metadata::METADATA_FILE;
    use tempfile::{tempdir, TempDir};

    fn manager(allow_non_uuid: bool) -> (SessionManager, TempDir) {
        let tmp = tempdir().unwrap();
        let manager = SessionManager::new(
            &tmp.path().join("workspace"),
            &tmp.path().join("logs"),
            allow_non_uuid,
        )
        .unwrap();
        (manager, tmp)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn backdate(manager: &SessionManager, id: &str, age: Duration) {
        let ws = manager.resolve(id).unwrap();
        let mut meta = SessionMetadata::load(&ws).unwrap().unwrap();
        meta.updated_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        meta.save(&ws).unwrap();
    }

    #[test]
    fn test_traversal_ids_rejected_without_side_effects() {
        let (manager, _tmp) = manager(true);
        for bad in ["../etc", "..", "a/b", "a\\b", "x..y", "", ".hidden", "a b"] {
            assert!(
                matches!(manager.resolve(bad), Err(Error::InvalidSessionId(_))),
                "{bad:?} should be rejected"
            );
            assert!(manager.create_or_get(Some(bad), Language::Python).is_err());
        }
        assert!(entries(manager.workspace_root()).is_empty());
    }

    #[test]
    fn test_uuid_only_mode() {
        let (manager, _tmp) = manager(false);
        assert!(manager.resolve("my-session").is_err());
        let id = Uuid::new_v4().to_string();
        assert_eq!(manager.resolve(&id).unwrap(), manager.workspace_root().join(&id));
    }

    #[test]
    fn test_create_then_retrieve() {
        let (manager, _tmp) = manager(true);
        let first = manager.create_or_get(Some("alpha"), Language::Python).unwrap();
        let second = manager.create_or_get(Some("alpha"), Language::Python).unwrap();

        assert_eq!(first.outcome, SessionOutcome::Created);
        assert_eq!(second.outcome, SessionOutcome::Retrieved);
        assert_eq!(first.workspace_path, second.workspace_path);
        assert_eq!(first.metadata.created_at, second.metadata.created_at);
        assert!(first.workspace_path.join(METADATA_FILE).exists());
    }

    #[test]
    fn test_auto_generated_id_is_uuid() {
        let (manager, _tmp) = manager(false);
        let session = manager.create_or_get(None, Language::JavaScript).unwrap();
        assert!(Uuid::parse_str(&session.session_id).is_ok());
        assert!(session.workspace_path.is_dir());
    }

    #[test]
    fn test_vendor_tree_is_copied_privately() {
        let vendor = tempdir().unwrap();
        fs::create_dir_all(vendor.path().join("tabulate")).unwrap();
        fs::write(vendor.path().join("tabulate/__init__.py"), "V = 1\n").unwrap();

        let (manager, _tmp) = manager(true);
        let manager = manager.with_vendor_dir(Some(vendor.path().to_path_buf()));
        let a = manager.create_or_get(Some("a"), Language::Python).unwrap();
        let b = manager.create_or_get(Some("b"), Language::Python).unwrap();

        let a_pkg = a.workspace_path.join(VENDOR_DIR_NAME).join("tabulate/__init__.py");
        let b_pkg = b.workspace_path.join(VENDOR_DIR_NAME).join("tabulate/__init__.py");
        fs::write(&a_pkg, "V = 'tampered'\n").unwrap();

        assert_eq!(fs::read_to_string(&b_pkg).unwrap(), "V = 1\n");
        assert_eq!(
            fs::read_to_string(vendor.path().join("tabulate/__init__.py")).unwrap(),
            "V = 1\n"
        );
    }

    #[test]
    fn test_delete() {
        let (manager, _tmp) = manager(true);
        manager.create_or_get(Some("gone"), Language::Python).unwrap();
        assert!(manager.delete("gone").unwrap());
        assert!(!manager.delete("gone").unwrap());
        assert!(manager.delete("../gone").is_err());
    }

    #[test]
    fn test_prune_removes_old_and_reports_invalid() {
        let (manager, _tmp) = manager(true);
        manager.create_or_get(Some("old-session"), Language::Python).unwrap();
        manager.create_or_get(Some("fresh"), Language::Python).unwrap();
        backdate(&manager, "old-session", Duration::from_secs(7200));
        fs::create_dir(manager.workspace_root().join(".stray")).unwrap();
        fs::write(manager.workspace_root().join("notes.txt"), "x").unwrap();

        let report = manager
            .prune(&RetentionPolicy::older_than(Duration::from_secs(3600)))
            .unwrap();

        assert_eq!(report.removed, vec!["old-session".to_string()]);
        assert_eq!(report.kept, vec!["fresh".to_string()]);
        assert!(report.bytes_freed > 0);
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.name.as_str()).collect();
        assert!(skipped.contains(&".stray"));
        assert!(skipped.contains(&"notes.txt"));
        assert!(manager.workspace_root().join(".stray").exists());
        assert!(!manager.workspace_root().join("old-session").exists());
    }

    #[test]
    fn test_prune_considers_non_uuid_sessions_when_allowed() {
        let (manager, _tmp) = manager(true);
        let uuid = Uuid::new_v4().to_string();
        manager.create_or_get(Some(&uuid), Language::Python).unwrap();
        manager.create_or_get(Some("named"), Language::Python).unwrap();
        backdate(&manager, &uuid, Duration::from_secs(100));
        backdate(&manager, "named", Duration::from_secs(100));

        let report = manager
            .prune(&RetentionPolicy::older_than(Duration::from_secs(10)))
            .unwrap();

        assert_eq!(report.removed.len(), 2);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_prune_leaves_locked_session_alone() {
        let (manager, _tmp) = manager(true);
        manager.create_or_get(Some("busy"), Language::Python).unwrap();
        manager.create_or_get(Some("idle"), Language::Python).unwrap();
        backdate(&manager, "busy", Duration::from_secs(7200));
        backdate(&manager, "idle", Duration::from_secs(7200));

        let guard = crate::session::lock_workspace(&manager.resolve("busy").unwrap()).await;
        let report = manager
            .prune(&RetentionPolicy::older_than(Duration::from_secs(3600)))
            .unwrap();

        assert_eq!(report.removed, vec!["idle".to_string()]);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.name == "busy" && s.reason == "in use"));
        assert!(manager.workspace_root().join("busy").exists());

        drop(guard);
        let report = manager
            .prune(&RetentionPolicy::older_than(Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(report.removed, vec!["busy".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_refuses_locked_session() {
        let (manager, _tmp) = manager(true);
        manager.create_or_get(Some("busy"), Language::Python).unwrap();

        let guard = crate::session::lock_workspace(&manager.resolve("busy").unwrap()).await;
        assert!(matches!(manager.delete("busy"), Err(Error::SessionBusy(_))));
        assert!(manager.workspace_root().join("busy").exists());

        drop(guard);
        assert!(manager.delete("busy").unwrap());
    }

    #[test]
    fn test_prune_dry_run_keeps_files() {
        let (manager, _tmp) = manager(true);
        manager.create_or_get(Some("old"), Language::Python).unwrap();
        backdate(&manager, "old", Duration::from_secs(7200));

        let report = manager
            .prune(&RetentionPolicy {
                max_age: Duration::from_secs(60),
                dry_run: true,
            })
            .unwrap();

        assert_eq!(report.removed, vec!["old".to_string()]);
        assert!(manager.workspace_root().join("old").exists());
    }

    #[test]
    fn test_log_dir_inside_root_rejected() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("ws");
        fs::create_dir_all(&root).unwrap();
        let root = root.canonicalize().unwrap();
        assert!(SessionManager::new(&root, &root.join("logs"), true).is_err());
    }

    #[test]
    fn test_cleanup_logs() {
        let (manager, _tmp) = manager(true);
        let result: SandboxResult = serde_json::from_value(serde_json::json!({
            "stdout": "hi", "stderr": "", "stdout_truncated": false, "stderr_truncated": false,
            "exit_code": 0, "success": true, "state": "completed", "fuel_consumed": 1,
            "memory_used_bytes": 0, "duration_ms": 0, "workspace_path": "/tmp",
            "files_created": [], "files_modified": [], "metadata": {}
        }))
        .unwrap();

        let dir = manager.write_execution_log("exec-1", &result).unwrap();
        assert_eq!(fs::read_to_string(dir.join("stdout.log")).unwrap(), "hi");

        assert!(!manager.cleanup_logs("exec-1", true).unwrap());
        assert!(dir.exists());
        assert!(manager.cleanup_logs("exec-1", false).unwrap());
        assert!(!dir.exists());
        assert!(!manager.cleanup_logs("exec-1", false).unwrap());
        assert!(manager.cleanup_logs("../exec-1", false).is_err());
    }
}
