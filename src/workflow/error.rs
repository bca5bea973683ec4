//! Error taxonomy for the booking workflow

use thiserror::Error;

use crate::workflow::form::FormField;

/// Errors surfaced by the booking workflow stages.
///
/// Everything except [`WorkflowError::Unauthenticated`] is recoverable: the
/// stage that raised it keeps its prior valid state so the user can retry
/// the failing step alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Missing or invalid {}", format_fields(.fields))]
    Validation { fields: Vec<FormField> },

    #[error("Unknown doctor '{0}'. Pick one from the provider roster")]
    UnknownDoctor(String),

    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("Audio capture failed: {0}")]
    Capture(String),

    #[error("Voice analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Complete the voice analysis before submitting the appointment request")]
    MissingAnalysis,

    #[error("Booking submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Workflow is closed")]
    Closed,
}

impl WorkflowError {
    /// Whether the workflow must terminate and hand control to sign-in.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkflowError::Unauthenticated)
    }
}

fn format_fields(fields: &[FormField]) -> String {
    fields
        .iter()
        .map(|f| f.label())
        .collect::<Vec<_>>()
        .join(", ")
}
