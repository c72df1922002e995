//! Session/workspace management
//!
//! One directory per session under a configured root, each holding the
//! guest's files, a metadata document and a private copy of any vendored
//! packages.

mod lock;
mod manager;
mod metadata;
mod tree;

pub use lock::{lock_workspace, try_lock_workspace, SessionGuard};
pub use manager::{
    PruneReport, RetentionPolicy, Session, SessionManager, SessionOutcome, SkippedEntry,
    VENDOR_DIR_NAME,
};
pub use metadata::{SessionMetadata, METADATA_FILE};
