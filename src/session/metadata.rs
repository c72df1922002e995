//! Session metadata document stored at the root of each workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::runtime::Language;

/// File name of the metadata document inside a workspace
pub const METADATA_FILE: &str = ".session_metadata.json";

/// Persisted per-session bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub auto_persist_globals: bool,
    #[serde(default)]
    pub execution_count: u64,
    /// Globals saved by the guest when `auto_persist_globals` is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_state: Option<serde_json::Value>,
}

impl SessionMetadata {
    pub fn new(session_id: impl Into<String>, language: Language) -> Self {
        let now = Utc::now();
        SessionMetadata {
            session_id: session_id.into(),
            language,
            created_at: now,
            updated_at: now,
            auto_persist_globals: false,
            execution_count: 0,
            persisted_state: None,
        }
    }

    /// Record one more execution
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.execution_count += 1;
    }

    /// Read the document from a workspace; `None` if it is absent.
    pub fn load(workspace: &Path) -> Result<Option<Self>> {
        let path = workspace.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Write the document, replacing any previous version atomically.
    pub fn save(&self, workspace: &Path) -> Result<()> {
        let tmp = workspace.join(format!("{METADATA_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, workspace.join(METADATA_FILE))?;
        Ok(())
    }
}
