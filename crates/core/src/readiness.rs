//! Readiness score validation and the submission gate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Minimum readiness score an analysis must declare before it can be submitted.
pub const SUBMISSION_THRESHOLD: u8 = 75;

pub const MAX_SCORE: u8 = 100;

/// An author-declared completeness estimate, always within `0..=100`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ReadinessScore(u8);

impl ReadinessScore {
    pub const FIELD: &'static str = "readiness_score";

    pub fn new(value: i64) -> Result<Self, EngineError> {
        if value < 0 {
            return Err(EngineError::invalid_field(Self::FIELD, "must be at least 0"));
        }
        if value > i64::from(MAX_SCORE) {
            return Err(EngineError::invalid_field(
                Self::FIELD,
                format!("must be at most {}", MAX_SCORE),
            ));
        }
        Ok(ReadinessScore(value as u8))
    }

    /// Validate an untyped JSON value: integers only, no floats, no strings.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EngineError> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::new(i),
                None if n.as_u64().is_some() => Err(EngineError::invalid_field(
                    Self::FIELD,
                    format!("must be at most {}", MAX_SCORE),
                )),
                None => Err(EngineError::invalid_field(Self::FIELD, "must be an integer")),
            },
            _ => Err(EngineError::invalid_field(Self::FIELD, "must be an integer")),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn meets_threshold(self) -> bool {
        self.0 >= SUBMISSION_THRESHOLD
    }

    /// Fail with `ValidationFailed` unless the score clears the submission gate.
    pub fn require_submittable(self) -> Result<(), EngineError> {
        if self.meets_threshold() {
            Ok(())
        } else {
            Err(EngineError::invalid_field(
                Self::FIELD,
                format!(
                    "readiness score {} is below the submission threshold of {}",
                    self.0, SUBMISSION_THRESHOLD
                ),
            ))
        }
    }
}

impl fmt::Display for ReadinessScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for ReadinessScore {
    type Error = EngineError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        ReadinessScore::new(value)
    }
}

impl<'de> Deserialize<'de> for ReadinessScore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        ReadinessScore::new(raw).map_err(serde::de::Error::custom)
    }
}
