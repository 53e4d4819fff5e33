use std::collections::HashSet;

use crate::error::InjuryLensError;

/// Closed set of canonical labels plus the fallback used for anything that
/// cannot be mapped onto them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    labels: Vec<String>,
    normalized: Vec<String>,
    fallback: String,
}

impl Taxonomy {
    /// The fallback is appended to `labels` when not already listed.
    /// Fails when there is no category besides the fallback, or when two
    /// labels collapse to the same normalized form.
    pub fn new<S: Into<String>>(
        labels: impl IntoIterator<Item = S>,
        fallback: impl Into<String>,
    ) -> Result<Self, InjuryLensError> {
        let fallback = fallback.into().trim().to_string();
        if normalize_label(&fallback).is_empty() {
            return Err(InjuryLensError::Config(
                "taxonomy fallback label must not be blank".into(),
            ));
        }

        let mut canonical = Vec::new();
        let mut normalized = Vec::new();
        let mut seen = HashSet::new();
        for label in labels {
            let label: String = label.into().trim().to_string();
            let norm = normalize_label(&label);
            if norm.is_empty() {
                return Err(InjuryLensError::Config(format!(
                    "taxonomy label {label:?} is blank after normalization"
                )));
            }
            if !seen.insert(norm.clone()) {
                return Err(InjuryLensError::Config(format!(
                    "taxonomy label {label:?} duplicates another label"
                )));
            }
            canonical.push(label);
            normalized.push(norm);
        }

        let fallback_norm = normalize_label(&fallback);
        if seen.insert(fallback_norm.clone()) {
            canonical.push(fallback.clone());
            normalized.push(fallback_norm);
        }

        if canonical.len() < 2 {
            return Err(InjuryLensError::Config(
                "taxonomy needs at least one label besides the fallback".into(),
            ));
        }

        // The fallback may have been listed under a different spelling.
        let fallback = canonical
            .iter()
            .zip(&normalized)
            .find(|(_, n)| **n == normalize_label(&fallback))
            .map(|(c, _)| c.clone())
            .unwrap_or(fallback);

        Ok(Self {
            labels: canonical,
            normalized,
            fallback,
        })
    }

    /// All canonical labels, fallback included, in configured order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Canonical labels paired with their normalized forms.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.normalized.iter().map(String::as_str))
    }

    pub fn contains(&self, label: &str) -> bool {
        let norm = normalize_label(label);
        self.normalized.iter().any(|n| *n == norm)
    }
}

/// Canonical comparison form of a label or model response: trimmed, ASCII
/// lower-cased, surrounding punctuation stripped, and runs of whitespace,
/// `_` and `-` collapsed to a single space.
pub fn normalize_label(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let stripped = lowered.trim_matches(|c: char| !c.is_alphanumeric());
    stripped
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
