use crate::capture::SourceMode;
use crate::error::{FormcoachError, Result};
use crate::replay::RepetitionRecord;
use crate::session::{SessionConfig, SessionState, Target, TeardownReason};
use crate::transport::{SessionResult, TransportStatsSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Summary of one sealed or abandoned repetition; frames are not persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepetitionSummary {
    pub number: u32,
    pub score: Option<f64>,
    pub feedback: Vec<String>,
    pub frame_count: usize,
    pub complete: bool,
}

impl From<&RepetitionRecord> for RepetitionSummary {
    fn from(record: &RepetitionRecord) -> Self {
        Self {
            number: record.number,
            score: record.score,
            feedback: record.feedback.clone(),
            frame_count: record.frame_count(),
            complete: record.complete,
        }
    }
}

/// What a finished session leaves behind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    /// Id handed out by the record store, when it accepted the session
    pub record_id: Option<String>,
    pub exercise: String,
    pub mode: SourceMode,
    pub target: Option<Target>,
    pub reason: TeardownReason,
    pub error: Option<String>,
    pub completed_reps: u32,
    pub total_score: Option<f64>,
    pub elapsed_seconds: f64,
    pub rep_scores: BTreeMap<u32, f64>,
    pub repetitions: Vec<RepetitionSummary>,
    pub final_result: Option<SessionResult>,
    pub count_discrepancies: u64,
    pub transport: TransportStatsSnapshot,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionReport {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        session_id: &str,
        record_id: Option<String>,
        config: &SessionConfig,
        state: &SessionState,
        records: &[std::sync::Arc<RepetitionRecord>],
        transport: TransportStatsSnapshot,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            record_id,
            exercise: config.exercise().to_string(),
            mode: config.mode(),
            target: config.target(),
            reason: state.teardown_reason.unwrap_or(TeardownReason::UserStop),
            error: state.error.clone(),
            completed_reps: state.completed_reps,
            total_score: state.total_score,
            elapsed_seconds: state.elapsed_seconds,
            rep_scores: state.rep_scores.clone(),
            repetitions: records.iter().map(|r| RepetitionSummary::from(r.as_ref())).collect(),
            final_result: state.final_result.clone(),
            count_discrepancies: state.count_discrepancies,
            transport,
            started_at,
            ended_at,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none() && !self.reason.is_failure()
    }

    /// Write as pretty JSON to `<dir>/<session_id>.json`
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(self)?;

        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(|e| {
            FormcoachError::system(format!(
                "Failed to create report directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(format!("{}.json", self.session_id));
        fs::write(&path, json).await.map_err(|e| {
            FormcoachError::system(format!("Failed to write report {}: {}", path.display(), e))
        })?;

        debug!("Saved session report to {}", path.display());
        Ok(path)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Multi-line text summary for the terminal
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} ({}): {} repetitions, ended by {:?}",
            self.exercise, self.mode, self.completed_reps, self.reason
        )];

        if let Some(total) = self.total_score {
            lines.push(format!("Total score: {:.2}", total));
        }
        if let Some(rank) = self
            .final_result
            .as_ref()
            .and_then(|r| r.final_rank.as_ref())
        {
            lines.push(format!("Final rank: {}", rank));
        }
        lines.push(format!(
            "Frames: {} sent, {} dropped ({:.0}% delivered)",
            self.transport.frames_sent,
            self.transport.frames_dropped,
            self.transport.efficiency() * 100.0
        ));
        for rep in &self.repetitions {
            let score = rep
                .score
                .map(|s| format!("{:.2}", s))
                .unwrap_or_else(|| "-".to_string());
            let mut line = format!("  #{:<3} score {:>5}  {:>3} frames", rep.number, score, rep.frame_count);
            if !rep.feedback.is_empty() {
                line.push_str(&format!("  [{}]", rep.feedback.join(", ")));
            }
            if !rep.complete {
                line.push_str("  (incomplete)");
            }
            lines.push(line);
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {}", error));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{FrameSample, ReplayRecorder};
    use crate::session::Phase;

    fn report() -> SessionReport {
        let config =
            SessionConfig::new("squat", SourceMode::Live, Some(Target::Repetitions(2)), 10).unwrap();
        let mut state = SessionState::new();
        state.completed_reps = 2;
        state.total_score = Some(0.8);
        state.teardown_reason = Some(TeardownReason::TargetReached);
        state.rep_scores = BTreeMap::from([(1, 0.9), (2, 0.7)]);

        let recorder = ReplayRecorder::new();
        recorder.open(1);
        recorder.append(FrameSample::new("data:image/jpeg;base64,AA==", Phase::Active, None));
        recorder.seal_through(2, &state.rep_scores, &["knees_in".to_string()]);

        let now = Utc::now();
        SessionReport::build(
            "session-1",
            None,
            &config,
            &state,
            &recorder.records(),
            TransportStatsSnapshot::default(),
            now,
            now,
        )
    }

    #[test]
    fn test_report_summarises_records() {
        let report = report();
        assert!(report.succeeded());
        assert_eq!(report.repetitions.len(), 2);
        assert_eq!(report.repetitions[0].frame_count, 1);
        assert_eq!(report.repetitions[1].score, Some(0.7));

        let summary = report.summary();
        assert!(summary.contains("squat (live): 2 repetitions"));
        assert!(summary.contains("knees_in"));
        assert!(summary.contains("0 sent, 0 dropped (100% delivered)"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let report = report();

        let path = report.save(dir.path().join("sessions")).await.unwrap();
        assert!(path.ends_with("session-1.json"));

        let loaded = SessionReport::load(&path).await.unwrap();
        assert_eq!(loaded, report);
    }
}
