use serde::{Deserialize, Serialize};

/// Whether an exercise is counted in repetitions or timed as a hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseKind {
    Counted,
    Hold,
}

impl ExerciseKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ExerciseKind::Counted => "counted in repetitions",
            ExerciseKind::Hold => "timed as a hold",
        }
    }
}

/// Exercises the analysis service is known to support
pub const CATALOG: [(&str, ExerciseKind); 7] = [
    ("push_up", ExerciseKind::Counted),
    ("squat", ExerciseKind::Counted),
    ("plank", ExerciseKind::Hold),
    ("lunge", ExerciseKind::Counted),
    ("crunch", ExerciseKind::Counted),
    ("cross_lunge", ExerciseKind::Counted),
    ("leg_raise", ExerciseKind::Counted),
];

/// Catalog entry for `exercise`, if known
pub fn lookup(exercise: &str) -> Option<ExerciseKind> {
    CATALOG
        .iter()
        .find(|(name, _)| *name == exercise)
        .map(|(_, kind)| *kind)
}

/// Identifiers are sent verbatim to the service
pub fn is_valid_identifier(exercise: &str) -> bool {
    !exercise.is_empty()
        && exercise
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
