//! Structured error types shared across the lesionmaps crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`MapsError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (patient ids, paths, shapes, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attaches the patient identifier the error was raised for.
    pub fn with_patient(self, patient_id: impl Into<String>) -> Self {
        self.with_context("patient", patient_id)
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the lesionmaps pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum MapsError {
    /// Invalid or inconsistent run configuration.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Cohort discovery and patient parsing errors.
    #[error("cohort error: {0}")]
    Cohort(ErrorInfo),
    /// Volume reading, writing, or geometry errors.
    #[error("volume error: {0}")]
    Volume(ErrorInfo),
    /// Per-patient metric computation errors.
    #[error("metrics error: {0}")]
    Metrics(ErrorInfo),
    /// Heatmap accumulation engine errors.
    #[error("heatmap error: {0}")]
    Heatmap(ErrorInfo),
    /// External registration or inference collaborator failures.
    #[error("collaborator error: {0}")]
    Collaborator(ErrorInfo),
    /// Cohort-wide table aggregation errors.
    #[error("aggregation error: {0}")]
    Aggregate(ErrorInfo),
}

impl MapsError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            MapsError::Config(info)
            | MapsError::Cohort(info)
            | MapsError::Volume(info)
            | MapsError::Metrics(info)
            | MapsError::Heatmap(info)
            | MapsError::Collaborator(info)
            | MapsError::Aggregate(info) => info,
        }
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_and_hint() {
        let err = MapsError::Metrics(
            ErrorInfo::new("size-read", "failed to load registered mask")
                .with_patient("pat_001")
                .with_hint("check registration outputs"),
        );
        let text = err.to_string();
        assert!(text.contains("size-read"));
        assert!(text.contains("patient=pat_001"));
        assert!(text.contains("check registration outputs"));
    }
}
