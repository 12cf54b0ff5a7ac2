//! Hypothesis suggestion collaborators.
//!
//! A suggester proposes `{text, confidence, evidence}` candidates for an
//! analysis. The engine treats the output as untrusted input and validates it
//! exactly like a hypothesis typed into the form.

use async_trait::async_trait;
use serde_json::Value;

use postmortem_core::{AnalysisType, HypothesisDraft};
use postmortem_storage::AnalysisRecord;

#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error("hypothesis suggester unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait HypothesisSuggester: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn suggest(&self, analysis: &AnalysisRecord) -> Result<Vec<HypothesisDraft>, SuggestError>;
}

/// At most this many suggestions are returned per request.
pub const MAX_SUGGESTIONS: usize = 5;

/// Evidence lines quoted per suggestion.
const MAX_EVIDENCE: usize = 3;

struct Rule {
    keywords: &'static [&'static str],
    text: &'static str,
    confidence: u8,
}

/// Deterministic keyword rules keyed on analysis type.
///
/// Each rule fires when any keyword appears in a symptom or signal; the
/// matching lines become its evidence. When nothing fires, the type's
/// fallback hypothesis is proposed with no evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicSuggester;

fn rules(analysis_type: AnalysisType) -> (&'static [Rule], Rule) {
    match analysis_type {
        AnalysisType::Latency => (
            &[
                Rule {
                    keywords: &["pool", "connection"],
                    text: "Connection pool exhaustion under load",
                    confidence: 65,
                },
                Rule {
                    keywords: &["timeout", "p99", "slow", "latency"],
                    text: "Downstream dependency latency is propagating to callers",
                    confidence: 60,
                },
                Rule {
                    keywords: &["gc", "garbage", "heap"],
                    text: "Garbage collection pauses are stalling request threads",
                    confidence: 55,
                },
            ],
            Rule {
                keywords: &[],
                text: "A recent deploy introduced a slower code path",
                confidence: 40,
            },
        ),
        AnalysisType::Security => (
            &[
                Rule {
                    keywords: &["token", "api key", "secret"],
                    text: "Leaked credentials or API keys are being used",
                    confidence: 65,
                },
                Rule {
                    keywords: &["login", "auth", "credential", "password"],
                    text: "Credential stuffing against the login endpoint",
                    confidence: 60,
                },
                Rule {
                    keywords: &["scan", "probe", "port"],
                    text: "External scanning discovered an exposed service",
                    confidence: 50,
                },
            ],
            Rule {
                keywords: &[],
                text: "Misconfigured access control exposed a resource",
                confidence: 40,
            },
        ),
        AnalysisType::Outage => (
            &[
                Rule {
                    keywords: &["deploy", "release", "rollout"],
                    text: "A faulty deploy took the service down",
                    confidence: 70,
                },
                Rule {
                    keywords: &["dns", "certificate", "cert"],
                    text: "DNS or certificate expiry broke connectivity",
                    confidence: 60,
                },
                Rule {
                    keywords: &["oom", "memory", "disk full"],
                    text: "Resource exhaustion crashed service instances",
                    confidence: 55,
                },
            ],
            Rule {
                keywords: &[],
                text: "An upstream provider outage cascaded into the service",
                confidence: 40,
            },
        ),
        AnalysisType::Capacity => (
            &[
                Rule {
                    keywords: &["cpu", "saturat"],
                    text: "CPU saturation from organic traffic growth",
                    confidence: 60,
                },
                Rule {
                    keywords: &["queue", "backlog", "lag"],
                    text: "Consumers cannot keep up with the queue backlog",
                    confidence: 60,
                },
                Rule {
                    keywords: &["disk", "storage", "quota"],
                    text: "Storage volume is approaching its provisioned limit",
                    confidence: 55,
                },
            ],
            Rule {
                keywords: &[],
                text: "Autoscaling limits are set below current peak demand",
                confidence: 40,
            },
        ),
    }
}

fn draft(rule: &Rule, evidence: Vec<String>) -> HypothesisDraft {
    HypothesisDraft {
        text: rule.text.to_string(),
        confidence: Value::from(rule.confidence),
        evidence,
    }
}

impl HeuristicSuggester {
    /// The synchronous core of [`HypothesisSuggester::suggest`].
    pub fn candidates(&self, analysis: &AnalysisRecord) -> Vec<HypothesisDraft> {
        let lines: Vec<&str> = analysis
            .content
            .symptoms
            .iter()
            .chain(analysis.content.signals.iter())
            .map(String::as_str)
            .collect();
        let (specific, fallback) = rules(analysis.analysis_type);

        let mut out: Vec<HypothesisDraft> = specific
            .iter()
            .filter_map(|rule| {
                let evidence: Vec<String> = lines
                    .iter()
                    .filter(|line| {
                        let lower = line.to_lowercase();
                        rule.keywords.iter().any(|k| lower.contains(k))
                    })
                    .take(MAX_EVIDENCE)
                    .map(|line| line.to_string())
                    .collect();
                (!evidence.is_empty()).then(|| draft(rule, evidence))
            })
            .collect();

        if out.is_empty() {
            out.push(draft(&fallback, Vec::new()));
        }
        // Already proposed by the author.
        out.retain(|c| {
            !analysis
                .content
                .hypotheses
                .iter()
                .any(|h| h.text.eq_ignore_ascii_case(&c.text))
        });
        out.truncate(MAX_SUGGESTIONS);
        out
    }
}

#[async_trait]
impl HypothesisSuggester for HeuristicSuggester {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn suggest(&self, analysis: &AnalysisRecord) -> Result<Vec<HypothesisDraft>, SuggestError> {
        Ok(self.candidates(analysis))
    }
}
