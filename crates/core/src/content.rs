//! Analysis content: validated shapes and their untrusted input drafts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::readiness::ReadinessScore;

/// Incident category, fixed when the analysis is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisType {
    Latency,
    Security,
    Outage,
    Capacity,
}

impl AnalysisType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Latency => "LATENCY",
            AnalysisType::Security => "SECURITY",
            AnalysisType::Outage => "OUTAGE",
            AnalysisType::Capacity => "CAPACITY",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LATENCY" => Ok(AnalysisType::Latency),
            "SECURITY" => Ok(AnalysisType::Security),
            "OUTAGE" => Ok(AnalysisType::Outage),
            "CAPACITY" => Ok(AnalysisType::Capacity),
            other => Err(format!("unknown analysis type '{}'", other)),
        }
    }
}

/// A validated root-cause hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub text: String,
    /// 0..=100
    pub confidence: u8,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Validated, storable analysis content.
///
/// Only produced by [`crate::validate::validate_content`]; every list entry is
/// trimmed and non-blank and every numeric field is in range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContent {
    pub symptoms: Vec<String>,
    pub signals: Vec<String>,
    pub hypotheses: Vec<Hypothesis>,
    pub readiness_score: ReadinessScore,
}

impl AnalysisContent {
    /// Highest-confidence hypothesis; the first one listed wins a tie.
    pub fn leading_hypothesis(&self) -> Option<&Hypothesis> {
        self.hypotheses
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.confidence.cmp(&b.confidence).then(ib.cmp(ia)))
            .map(|(_, h)| h)
    }
}

/// A hypothesis as submitted by a caller or a suggestion helper.
///
/// `confidence` stays untyped so a float or string can be reported as a
/// field error rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisDraft {
    pub text: String,
    pub confidence: serde_json::Value,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl From<Hypothesis> for HypothesisDraft {
    fn from(h: Hypothesis) -> Self {
        HypothesisDraft {
            text: h.text,
            confidence: serde_json::Value::from(h.confidence),
            evidence: h.evidence,
        }
    }
}

/// Untrusted content input for create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDraft {
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub hypotheses: Vec<HypothesisDraft>,
    #[serde(default = "zero")]
    pub readiness_score: serde_json::Value,
}

fn zero() -> serde_json::Value {
    serde_json::Value::from(0)
}

impl Default for ContentDraft {
    fn default() -> Self {
        ContentDraft {
            symptoms: Vec::new(),
            signals: Vec::new(),
            hypotheses: Vec::new(),
            readiness_score: zero(),
        }
    }
}

impl From<AnalysisContent> for ContentDraft {
    fn from(c: AnalysisContent) -> Self {
        ContentDraft {
            symptoms: c.symptoms,
            signals: c.signals,
            hypotheses: c.hypotheses.into_iter().map(HypothesisDraft::from).collect(),
            readiness_score: serde_json::Value::from(c.readiness_score.value()),
        }
    }
}
