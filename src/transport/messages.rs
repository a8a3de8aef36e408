//! JSON text messages exchanged with the analysis service.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// First message on a fresh connection. Carries no `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    pub exercise: String,
    pub is_video_mode: bool,
    pub target_reps: Option<u32>,
    pub target_time: Option<u32>,
}

/// Typed messages sent after the handshake
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Frame { frame: String },
    Stop,
}

/// Status attached to every rendered frame the service sends back
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStatus {
    #[serde(default)]
    pub is_running: Option<bool>,
    #[serde(default)]
    pub is_warmup: Option<bool>,
    #[serde(default)]
    pub warmup_remaining: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub counters: Option<HashMap<String, Value>>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub rep_count: Option<u32>,
    /// Repetition number (as a string key) to score in 0..=1
    #[serde(default)]
    pub rep_scores: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub total_score: Option<f64>,
    /// Feedback identifiers joined with `" | "`
    #[serde(default)]
    pub feedback_ko: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl FrameStatus {
    /// Numeric view of `rep_scores`; non-numeric keys or values are skipped
    pub fn scores(&self) -> BTreeMap<u32, f64> {
        self.rep_scores
            .iter()
            .flatten()
            .filter_map(|(key, value)| Some((key.trim().parse::<u32>().ok()?, value.as_f64()?)))
            .collect()
    }

    /// `counters.reps`, the rawest count the service reports
    pub fn counter_reps(&self) -> Option<u32> {
        self.counters
            .as_ref()?
            .get("reps")
            .and_then(count_from_value)
    }
}

/// Whole repetitions in a JSON number; `3.0` counts, negatives and non-numbers do not
fn count_from_value(value: &Value) -> Option<u32> {
    let count = value.as_f64()?;
    if !count.is_finite() || count < 0.0 || count > u32::MAX as f64 {
        return None;
    }
    Some(count.floor() as u32)
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count_from_value))
}

/// Final summary carried by `stopped`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    #[serde(default, deserialize_with = "lenient_count")]
    pub rep_count: Option<u32>,
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default)]
    pub grade_counts: Option<Value>,
    #[serde(default)]
    pub final_rank: Option<Value>,
    #[serde(default)]
    pub video_completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InitSuccess {
        #[serde(default)]
        message: String,
    },
    WarmupEnd,
    Frame {
        #[serde(default)]
        frame: Option<String>,
        #[serde(default)]
        status: Option<FrameStatus>,
    },
    Stopped {
        #[serde(default)]
        result: Option<SessionResult>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

const KNOWN_TYPES: [&str; 5] = ["init_success", "warmup_end", "frame", "stopped", "error"];

impl ServerMessage {
    /// Parse one text message. Unknown `type`s yield `Ok(None)`.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::Malformed {
            details: format!("invalid JSON: {}", e),
        })?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed {
                details: "message has no string `type` field".to_string(),
            })?;

        if !KNOWN_TYPES.contains(&kind) {
            return Ok(None);
        }

        let kind = kind.to_string();
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ProtocolError::Malformed {
                details: format!("bad `{}` message: {}", kind, e),
            })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::InitSuccess { .. } => "init_success",
            ServerMessage::WarmupEnd => "warmup_end",
            ServerMessage::Frame { .. } => "frame",
            ServerMessage::Stopped { .. } => "stopped",
            ServerMessage::Error { .. } => "error",
        }
    }
}
