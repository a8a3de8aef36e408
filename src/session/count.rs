use crate::transport::FrameStatus;
use serde::Serialize;

/// Which status field the completed-repetition count came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSource {
    RepScores,
    RepCount,
    Counter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountResolution {
    pub count: u32,
    pub source: CountSource,
    /// `(rep_count, highest rep_scores key)` when both are present and disagree
    pub discrepancy: Option<(u32, u32)>,
}

/// Resolve the completed-repetition count from one status payload.
///
/// Precedence: highest key of `rep_scores`, then `rep_count`, then `counters.reps`.
/// Scores only appear once a repetition is sealed server-side, so they win.
/// A disagreement between `rep_count` and the scores is reported, not corrected.
pub fn resolve_completed(status: &FrameStatus) -> Option<CountResolution> {
    let max_scored = status.scores().keys().next_back().copied();

    match (max_scored, status.rep_count) {
        (Some(scored), reported) => Some(CountResolution {
            count: scored,
            source: CountSource::RepScores,
            discrepancy: reported
                .filter(|reported| *reported != scored)
                .map(|reported| (reported, scored)),
        }),
        (None, Some(reported)) => Some(CountResolution {
            count: reported,
            source: CountSource::RepCount,
            discrepancy: None,
        }),
        (None, None) => status.counter_reps().map(|count| CountResolution {
            count,
            source: CountSource::Counter,
            discrepancy: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(value: serde_json::Value) -> FrameStatus {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_scores_take_precedence() {
        let resolved =
            resolve_completed(&status(json!({"rep_scores": {"1": 0.8, "2": 0.6}, "rep_count": 2})))
                .unwrap();
        assert_eq!(resolved.count, 2);
        assert_eq!(resolved.source, CountSource::RepScores);
        assert_eq!(resolved.discrepancy, None);
    }

    #[test]
    fn test_numeric_key_order_not_lexical() {
        let resolved =
            resolve_completed(&status(json!({"rep_scores": {"9": 0.8, "10": 0.6}}))).unwrap();
        assert_eq!(resolved.count, 10);
    }

    #[test]
    fn test_discrepancy_is_flagged() {
        let resolved =
            resolve_completed(&status(json!({"rep_scores": {"1": 0.8}, "rep_count": 2}))).unwrap();
        assert_eq!(resolved.count, 1);
        assert_eq!(resolved.discrepancy, Some((2, 1)));
    }

    #[test]
    fn test_fallbacks() {
        let resolved = resolve_completed(&status(json!({"rep_count": 4, "counters": {"reps": 9}})))
            .unwrap();
        assert_eq!((resolved.count, resolved.source), (4, CountSource::RepCount));

        let resolved = resolve_completed(&status(json!({"rep_scores": {}, "counters": {"reps": 9}})))
            .unwrap();
        assert_eq!((resolved.count, resolved.source), (9, CountSource::Counter));

        assert!(resolve_completed(&status(json!({"feedback_ko": "x"}))).is_none());
    }
}
