//! Execution policy
//!
//! Immutable, validated description of the resource ceilings, mounts,
//! environment and argv for one guest execution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Default instruction budget (fuel units)
pub const DEFAULT_FUEL_BUDGET: u64 = 2_000_000_000;
/// Default linear-memory ceiling
pub const DEFAULT_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
/// Default stdout cap
pub const DEFAULT_STDOUT_MAX_BYTES: usize = 2 * 1024 * 1024;
/// Default stderr cap
pub const DEFAULT_STDERR_MAX_BYTES: usize = 1024 * 1024;
/// Guest path of the primary read-write mount
pub const DEFAULT_GUEST_MOUNT_PATH: &str = "/app";
/// Guest path of the optional read-only data mount
pub const DEFAULT_GUEST_DATA_PATH: &str = "/data";

/// Validated execution policy.
///
/// Fields are private: a policy can only come out of [`PolicyBuilder::build`],
/// so every instance has passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyBuilder", into = "PolicyBuilder")]
pub struct ExecutionPolicy {
    fuel_budget: u64,
    memory_bytes: u64,
    stdout_max_bytes: usize,
    stderr_max_bytes: usize,
    mount_host_dir: Option<PathBuf>,
    guest_mount_path: String,
    mount_data_dir: Option<PathBuf>,
    guest_data_path: String,
    env: BTreeMap<String, String>,
    argv: Vec<String>,
    timeout_seconds: Option<u64>,
    preserve_logs: bool,
}

impl ExecutionPolicy {
    /// Start building a policy from the defaults
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Instruction-count ceiling
    pub fn fuel_budget(&self) -> u64 {
        self.fuel_budget
    }

    /// Linear-memory ceiling in bytes
    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn stdout_max_bytes(&self) -> usize {
        self.stdout_max_bytes
    }

    pub fn stderr_max_bytes(&self) -> usize {
        self.stderr_max_bytes
    }

    /// Host directory preopened read-write, if already bound
    pub fn mount_host_dir(&self) -> Option<&Path> {
        self.mount_host_dir.as_deref()
    }

    pub fn guest_mount_path(&self) -> &str {
        &self.guest_mount_path
    }

    /// Host directory preopened read-only, if any
    pub fn mount_data_dir(&self) -> Option<&Path> {
        self.mount_data_dir.as_deref()
    }

    pub fn guest_data_path(&self) -> &str {
        &self.guest_data_path
    }

    /// Exact environment whitelist handed to the guest
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Guest argv; empty means "use the language defaults"
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }

    pub fn preserve_logs(&self) -> bool {
        self.preserve_logs
    }

    /// Copy of this policy with the primary mount bound to a session workspace.
    ///
    /// Fails if the caller already pinned `mount_host_dir` somewhere else,
    /// or if the data mount overlaps the workspace.
    pub fn bind_workspace(&self, workspace: &Path) -> Result<ExecutionPolicy> {
        if let Some(existing) = &self.mount_host_dir {
            if existing != workspace {
                return Err(Error::InvalidPolicy(format!(
                    "mount_host_dir is bound to a different directory than session workspace {}",
                    workspace.display()
                )));
            }
        }
        if let Some(data) = &self.mount_data_dir {
            check_disjoint(data, workspace)?;
        }
        let mut bound = self.clone();
        bound.mount_host_dir = Some(workspace.to_path_buf());
        Ok(bound)
    }

    /// Guest-side path of a file placed at the root of the primary mount
    pub fn guest_path_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.guest_mount_path.trim_end_matches('/'), file_name)
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        // The default builder always passes validation.
        PolicyBuilder::default().into_policy_unchecked()
    }
}

/// Mutable policy description, validated by [`PolicyBuilder::build`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyBuilder {
    pub fuel_budget: u64,
    pub memory_bytes: u64,
    pub stdout_max_bytes: usize,
    pub stderr_max_bytes: usize,
    pub mount_host_dir: Option<PathBuf>,
    pub guest_mount_path: String,
    pub mount_data_dir: Option<PathBuf>,
    pub guest_data_path: String,
    pub env: BTreeMap<String, String>,
    pub argv: Vec<String>,
    pub timeout_seconds: Option<u64>,
    pub preserve_logs: bool,
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        PolicyBuilder {
            fuel_budget: DEFAULT_FUEL_BUDGET,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            stdout_max_bytes: DEFAULT_STDOUT_MAX_BYTES,
            stderr_max_bytes: DEFAULT_STDERR_MAX_BYTES,
            mount_host_dir: None,
            guest_mount_path: DEFAULT_GUEST_MOUNT_PATH.to_string(),
            mount_data_dir: None,
            guest_data_path: DEFAULT_GUEST_DATA_PATH.to_string(),
            env: BTreeMap::new(),
            argv: Vec::new(),
            timeout_seconds: None,
            preserve_logs: false,
        }
    }
}

impl PolicyBuilder {
    pub fn fuel_budget(mut self, fuel: u64) -> Self {
        self.fuel_budget = fuel;
        self
    }

    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    pub fn stdout_max_bytes(mut self, bytes: usize) -> Self {
        self.stdout_max_bytes = bytes;
        self
    }

    pub fn stderr_max_bytes(mut self, bytes: usize) -> Self {
        self.stderr_max_bytes = bytes;
        self
    }

    pub fn mount_host_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mount_host_dir = Some(dir.into());
        self
    }

    pub fn guest_mount_path(mut self, path: impl Into<String>) -> Self {
        self.guest_mount_path = path.into();
        self
    }

    /// Mount a host directory read-only at `guest_data_path`
    pub fn mount_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mount_data_dir = Some(dir.into());
        self
    }

    pub fn guest_data_path(mut self, path: impl Into<String>) -> Self {
        self.guest_data_path = path.into();
        self
    }

    /// Add one variable to the environment whitelist
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout_seconds(mut self, secs: Option<u64>) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn preserve_logs(mut self, preserve: bool) -> Self {
        self.preserve_logs = preserve;
        self
    }

    /// Validate and freeze the policy
    pub fn build(self) -> Result<ExecutionPolicy> {
        self.validate()?;
        Ok(self.into_policy_unchecked())
    }

    fn validate(&self) -> Result<()> {
        if self.fuel_budget == 0 {
            return Err(Error::InvalidPolicy("fuel_budget must be positive".into()));
        }
        if self.memory_bytes == 0 {
            return Err(Error::InvalidPolicy("memory_bytes must be positive".into()));
        }
        if usize::try_from(self.memory_bytes).is_err() {
            return Err(Error::InvalidPolicy(format!(
                "memory_bytes {} does not fit the host address space",
                self.memory_bytes
            )));
        }
        if self.stdout_max_bytes == 0 {
            return Err(Error::InvalidPolicy("stdout_max_bytes must be positive".into()));
        }
        if self.stderr_max_bytes == 0 {
            return Err(Error::InvalidPolicy("stderr_max_bytes must be positive".into()));
        }
        if self.timeout_seconds == Some(0) {
            return Err(Error::InvalidPolicy("timeout_seconds must be positive".into()));
        }

        validate_guest_path("guest_mount_path", &self.guest_mount_path)?;
        if self.mount_data_dir.is_some() {
            validate_guest_path("guest_data_path", &self.guest_data_path)?;
            let primary = self.guest_mount_path.trim_end_matches('/');
            let data = self.guest_data_path.trim_end_matches('/');
            if primary == data
                || data.starts_with(&format!("{primary}/"))
                || primary.starts_with(&format!("{data}/"))
            {
                return Err(Error::InvalidPolicy(format!(
                    "guest_data_path {data} overlaps guest_mount_path {primary}"
                )));
            }
            if let (Some(data), Some(host)) = (&self.mount_data_dir, &self.mount_host_dir) {
                check_disjoint(data, host)?;
            }
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(Error::InvalidPolicy(format!(
                    "invalid environment variable name: {key:?}"
                )));
            }
        }

        Ok(())
    }

    fn into_policy_unchecked(self) -> ExecutionPolicy {
        ExecutionPolicy {
            fuel_budget: self.fuel_budget,
            memory_bytes: self.memory_bytes,
            stdout_max_bytes: self.stdout_max_bytes,
            stderr_max_bytes: self.stderr_max_bytes,
            mount_host_dir: self.mount_host_dir,
            guest_mount_path: self.guest_mount_path,
            mount_data_dir: self.mount_data_dir,
            guest_data_path: self.guest_data_path,
            env: self.env,
            argv: self.argv,
            timeout_seconds: self.timeout_seconds,
            preserve_logs: self.preserve_logs,
        }
    }
}

impl TryFrom<PolicyBuilder> for ExecutionPolicy {
    type Error = Error;

    fn try_from(builder: PolicyBuilder) -> Result<Self> {
        builder.build()
    }
}

impl From<ExecutionPolicy> for PolicyBuilder {
    fn from(policy: ExecutionPolicy) -> Self {
        PolicyBuilder {
            fuel_budget: policy.fuel_budget,
            memory_bytes: policy.memory_bytes,
            stdout_max_bytes: policy.stdout_max_bytes,
            stderr_max_bytes: policy.stderr_max_bytes,
            mount_host_dir: policy.mount_host_dir,
            guest_mount_path: policy.guest_mount_path,
            mount_data_dir: policy.mount_data_dir,
            guest_data_path: policy.guest_data_path,
            env: policy.env,
            argv: policy.argv,
            timeout_seconds: policy.timeout_seconds,
            preserve_logs: policy.preserve_logs,
        }
    }
}

/// Resolve a host path for containment checks.
///
/// The path is made absolute and normalized lexically, then its deepest
/// existing ancestor is canonicalized so symlinks cannot hide an overlap.
fn host_identity(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    for ancestor in normalized.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            return match normalized.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => canonical.join(rest),
                _ => canonical,
            };
        }
    }
    normalized
}

/// True if the two host directories are equal or one contains the other.
pub fn host_dirs_overlap(a: &Path, b: &Path) -> bool {
    let (a, b) = (host_identity(a), host_identity(b));
    a.starts_with(&b) || b.starts_with(&a)
}

/// A data mount must be neither the workspace, inside it, nor above it.
pub(crate) fn check_disjoint(data_dir: &Path, workspace: &Path) -> Result<()> {
    if host_dirs_overlap(data_dir, workspace) {
        return Err(Error::InvalidPolicy(format!(
            "mount_data_dir {} overlaps workspace {}",
            data_dir.display(),
            workspace.display()
        )));
    }
    Ok(())
}

fn validate_guest_path(field: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') || path.trim_end_matches('/').is_empty() {
        return Err(Error::InvalidPolicy(format!(
            "{field} must be an absolute guest path other than '/': {path:?}"
        )));
    }
    if path.split('/').any(|c| c == ".." || c == ".") || path.contains('\\') {
        return Err(Error::InvalidPolicy(format!(
            "{field} must not contain relative components: {path:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = ExecutionPolicy::default();
        assert_eq!(policy.fuel_budget(), DEFAULT_FUEL_BUDGET);
        assert_eq!(policy.guest_mount_path(), "/app");
        assert!(policy.mount_data_dir().is_none());
        assert!(policy.env().is_empty());
        assert!(ExecutionPolicy::builder().build().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_resources() {
        let cases = [
            ExecutionPolicy::builder().fuel_budget(0),
            ExecutionPolicy::builder().memory_bytes(0),
            ExecutionPolicy::builder().stdout_max_bytes(0),
            ExecutionPolicy::builder().stderr_max_bytes(0),
            ExecutionPolicy::builder().timeout_seconds(Some(0)),
        ];
        for builder in cases {
            assert!(matches!(builder.build(), Err(Error::InvalidPolicy(_))));
        }
    }

    #[test]
    fn test_rejects_overlapping_data_mount() {
        let result = ExecutionPolicy::builder()
            .mount_data_dir("/srv/data")
            .guest_data_path("/app/data")
            .build();
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));

        let result = ExecutionPolicy::builder()
            .mount_data_dir("/srv/data")
            .guest_data_path("/app")
            .build();
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_rejects_data_dir_overlapping_host_dir() {
        for data in ["/srv/ws/abc", "/srv/ws/abc/data", "/srv/ws", "/srv/ws/abc/sub/../"] {
            let result = ExecutionPolicy::builder()
                .mount_host_dir("/srv/ws/abc")
                .mount_data_dir(data)
                .build();
            assert!(matches!(result, Err(Error::InvalidPolicy(_))), "{data}");
        }

        let ok = ExecutionPolicy::builder()
            .mount_host_dir("/srv/ws/abc")
            .mount_data_dir("/srv/ws/abcd")
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_bind_rejects_data_dir_inside_workspace() {
        let ws = tempfile::tempdir().unwrap();
        let policy = ExecutionPolicy::builder()
            .mount_data_dir(ws.path().join("data"))
            .build()
            .unwrap();
        let result = policy.bind_workspace(ws.path());
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_bind_rejects_data_dir_above_workspace() {
        let root = tempfile::tempdir().unwrap();
        let ws = root.path().join("session");
        std::fs::create_dir(&ws).unwrap();
        let policy = ExecutionPolicy::builder()
            .mount_data_dir(root.path())
            .build()
            .unwrap();
        assert!(matches!(policy.bind_workspace(&ws), Err(Error::InvalidPolicy(_))));

        let sibling = root.path().join("data");
        std::fs::create_dir(&sibling).unwrap();
        let policy = ExecutionPolicy::builder().mount_data_dir(&sibling).build().unwrap();
        assert!(policy.bind_workspace(&ws).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_data_dir_into_workspace_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let ws = root.path().join("session");
        std::fs::create_dir_all(ws.join("inner")).unwrap();
        let link = root.path().join("link");
        std::os::unix::fs::symlink(ws.join("inner"), &link).unwrap();

        let policy = ExecutionPolicy::builder().mount_data_dir(&link).build().unwrap();
        assert!(policy.bind_workspace(&ws).is_err());
    }

    #[test]
    fn test_rejects_relative_guest_paths() {
        assert!(ExecutionPolicy::builder().guest_mount_path("app").build().is_err());
        assert!(ExecutionPolicy::builder().guest_mount_path("/").build().is_err());
        assert!(ExecutionPolicy::builder()
            .guest_mount_path("/app/../etc")
            .build()
            .is_err());
    }

    #[test]
    fn test_rejects_bad_env_names() {
        let result = ExecutionPolicy::builder().env("A=B", "c").build();
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }

    #[test]
    fn test_bind_workspace() {
        let policy = ExecutionPolicy::default();
        let bound = policy.bind_workspace(Path::new("/tmp/ws/abc")).unwrap();
        assert_eq!(bound.mount_host_dir(), Some(Path::new("/tmp/ws/abc")));
        // the original is untouched
        assert!(policy.mount_host_dir().is_none());

        let pinned = ExecutionPolicy::builder()
            .mount_host_dir("/elsewhere")
            .build()
            .unwrap();
        assert!(pinned.bind_workspace(Path::new("/tmp/ws/abc")).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ExecutionPolicy =
            serde_json::from_str(r#"{"fuel_budget": 1000, "env": {"LANG": "C"}}"#).unwrap();
        assert_eq!(ok.fuel_budget(), 1000);
        assert_eq!(ok.memory_bytes(), DEFAULT_MEMORY_BYTES);
        assert_eq!(ok.env().get("LANG").map(String::as_str), Some("C"));

        let bad = serde_json::from_str::<ExecutionPolicy>(r#"{"memory_bytes": 0}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_guest_path_for() {
        let policy = ExecutionPolicy::default();
        assert_eq!(policy.guest_path_for("user_code.py"), "/app/user_code.py");
    }
}
