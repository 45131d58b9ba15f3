use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Best-effort version-control snapshots of passing artifacts.
///
/// Failures are logged by the caller and never affect the session outcome.
#[async_trait]
pub trait SnapshotRecorder: Send + Sync {
    /// Prepare a fresh session, returning the branch created, if any.
    async fn begin_session(&self, project: &Path, started_at: DateTime<Utc>)
        -> Result<Option<String>>;

    async fn record(&self, project: &Path, artifact: &Path, message: &str) -> Result<()>;
}
