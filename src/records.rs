//! Hooks for persisting sessions outside this process.

use crate::error::Result;
use crate::report::SessionReport;
use crate::session::SessionConfig;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// External store that learns about a session when it starts and is given the
/// result when the user confirms saving it
#[async_trait]
pub trait SessionRecordStore: Send + Sync {
    /// Called once the service accepted the session. Returns the record id.
    async fn start_record(&self, session_id: &str, config: &SessionConfig) -> Result<String>;

    /// Called with the finished report of a previously started record
    async fn complete_record(&self, record_id: &str, report: &SessionReport) -> Result<()>;
}

/// Store that only logs; used when no backend is configured
#[derive(Debug, Default)]
pub struct LoggingRecordStore;

#[async_trait]
impl SessionRecordStore for LoggingRecordStore {
    async fn start_record(&self, session_id: &str, config: &SessionConfig) -> Result<String> {
        let record_id = Uuid::new_v4().to_string();
        info!(
            "Started record {} for session {} ({})",
            record_id,
            session_id,
            config.exercise()
        );
        Ok(record_id)
    }

    async fn complete_record(&self, record_id: &str, report: &SessionReport) -> Result<()> {
        info!(
            "Completed record {}: {} reps, score {:?}",
            record_id, report.completed_reps, report.total_score
        );
        Ok(())
    }
}

/// Hand a finished report to the store it was started in.
///
/// Returns `false` when the session never got a record id.
pub async fn confirm_save(store: &dyn SessionRecordStore, report: &SessionReport) -> Result<bool> {
    match report.record_id.as_deref() {
        Some(record_id) => {
            store.complete_record(record_id, report).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
