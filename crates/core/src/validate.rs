//! Shape validation for analysis content.
//!
//! Human input and suggestion-helper output pass through the same checks.
//! All problems are collected so a form can render every field at once.

use crate::content::{AnalysisContent, ContentDraft, Hypothesis, HypothesisDraft};
use crate::error::{check_fields, EngineError, FieldErrors};
use crate::readiness::ReadinessScore;

pub const MAX_LIST_ENTRIES: usize = 50;
pub const MAX_TEXT_CHARS: usize = 2000;
pub const MAX_FEEDBACK_CHARS: usize = 4000;

/// Validate a draft into storable content, or report every offending field.
pub fn validate_content(draft: &ContentDraft) -> Result<AnalysisContent, EngineError> {
    let mut fields = FieldErrors::new();

    let symptoms = validate_text_list("symptoms", &draft.symptoms, &mut fields);
    let signals = validate_text_list("signals", &draft.signals, &mut fields);

    if draft.hypotheses.len() > MAX_LIST_ENTRIES {
        fields.insert(
            "hypotheses".into(),
            format!("at most {} entries allowed", MAX_LIST_ENTRIES),
        );
    }
    let hypotheses: Vec<Hypothesis> = draft
        .hypotheses
        .iter()
        .enumerate()
        .filter_map(|(i, h)| collect_hypothesis(&format!("hypotheses[{}]", i), h, &mut fields))
        .collect();

    let readiness_score = match ReadinessScore::from_json(&draft.readiness_score) {
        Ok(score) => Some(score),
        Err(err) => {
            merge(&mut fields, err);
            None
        }
    };

    check_fields(fields)?;
    Ok(AnalysisContent {
        symptoms,
        signals,
        hypotheses,
        readiness_score: readiness_score.unwrap_or_default(),
    })
}

/// Validate a single hypothesis; `path` prefixes the field keys.
pub fn validate_hypothesis(path: &str, draft: &HypothesisDraft) -> Result<Hypothesis, EngineError> {
    let mut fields = FieldErrors::new();
    let hypothesis = collect_hypothesis(path, draft, &mut fields);
    check_fields(fields)?;
    hypothesis.ok_or_else(|| EngineError::invalid_field(path, "invalid hypothesis"))
}

/// Reviewer feedback: required and bounded when rejecting.
pub fn validate_feedback(feedback: Option<&str>, required: bool) -> Result<Option<String>, EngineError> {
    let trimmed = feedback.map(str::trim).filter(|f| !f.is_empty());
    match trimmed {
        None if required => Err(EngineError::invalid_field(
            "feedback",
            "feedback is required when rejecting",
        )),
        None => Ok(None),
        Some(text) if text.chars().count() > MAX_FEEDBACK_CHARS => Err(EngineError::invalid_field(
            "feedback",
            format!("must be at most {} characters", MAX_FEEDBACK_CHARS),
        )),
        Some(text) => Ok(Some(text.to_string())),
    }
}

fn collect_hypothesis(
    path: &str,
    draft: &HypothesisDraft,
    fields: &mut FieldErrors,
) -> Option<Hypothesis> {
    let before = fields.len();

    let text = check_text(&format!("{}.text", path), &draft.text, fields);

    let confidence = match draft.confidence.as_i64() {
        Some(c) if (0..=100).contains(&c) => Some(c as u8),
        Some(_) => {
            fields.insert(
                format!("{}.confidence", path),
                "must be between 0 and 100".into(),
            );
            None
        }
        None => {
            fields.insert(
                format!("{}.confidence", path),
                "must be an integer".into(),
            );
            None
        }
    };

    let evidence = validate_text_list(&format!("{}.evidence", path), &draft.evidence, fields);

    if fields.len() != before {
        return None;
    }
    Some(Hypothesis {
        text: text?,
        confidence: confidence?,
        evidence,
    })
}

fn validate_text_list(field: &str, entries: &[String], fields: &mut FieldErrors) -> Vec<String> {
    if entries.len() > MAX_LIST_ENTRIES {
        fields.insert(
            field.to_string(),
            format!("at most {} entries allowed", MAX_LIST_ENTRIES),
        );
    }
    entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| check_text(&format!("{}[{}]", field, i), entry, fields))
        .collect()
}

fn check_text(field: &str, raw: &str, fields: &mut FieldErrors) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() {
        fields.insert(field.to_string(), "must not be blank".into());
        return None;
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        fields.insert(
            field.to_string(),
            format!("must be at most {} characters", MAX_TEXT_CHARS),
        );
        return None;
    }
    Some(text.to_string())
}

fn merge(fields: &mut FieldErrors, err: EngineError) {
    if let EngineError::ValidationFailed { fields: more } = err {
        fields.extend(more);
    }
}
