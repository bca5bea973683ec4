//! Review & submit stage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::AppointmentStatus;
use crate::workflow::analysis::VoiceAnalysisReport;
use crate::workflow::form::AppointmentRequest;
use crate::workflow::session::SessionContext;
use crate::workflow::WorkflowError;

/// Everything sent to the scheduling service for one booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSubmission {
    pub patient: SessionContext,
    pub request: AppointmentRequest,
    pub analysis: VoiceAnalysisReport,
    /// Playable reference of the analyzed recording
    pub recording_url: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub appointment_id: String,
    pub status: AppointmentStatus,
    pub doctor_id: String,
    pub date: String,
    pub time: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Scheduling service unavailable: {0}")]
    Unavailable(String),

    #[error("Booking rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SchedulingService: Send + Sync {
    async fn create_booking(
        &self,
        submission: &BookingSubmission,
    ) -> Result<BookingConfirmation, SubmissionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    NotSubmitted,
    Submitting,
    Submitted,
    Failed,
}

impl SubmitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "not submitted",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmitTicket(u64);

/// Submission handed to the caller to send to the scheduling service
#[derive(Debug, Clone)]
pub struct SubmitJob {
    pub ticket: SubmitTicket,
    pub submission: BookingSubmission,
}

#[derive(Default)]
pub struct ReviewStage {
    next_ticket: u64,
    pending: Option<SubmitTicket>,
    confirmation: Option<BookingConfirmation>,
    last_error: Option<String>,
}

impl ReviewStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SubmitStatus {
        if self.confirmation.is_some() {
            SubmitStatus::Submitted
        } else if self.pending.is_some() {
            SubmitStatus::Submitting
        } else if self.last_error.is_some() {
            SubmitStatus::Failed
        } else {
            SubmitStatus::NotSubmitted
        }
    }

    pub fn confirmation(&self) -> Option<&BookingConfirmation> {
        self.confirmation.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Compose the submission.
    ///
    /// The analysis is checked before the form, so a booking without a
    /// report never reaches the scheduling service.
    pub fn begin(
        &mut self,
        patient: &SessionContext,
        request: &AppointmentRequest,
        analysis: Option<&VoiceAnalysisReport>,
        recording_url: Option<&str>,
    ) -> Result<SubmitJob, WorkflowError> {
        let (analysis, recording_url) = match (analysis, recording_url) {
            (Some(analysis), Some(url)) => (analysis, url),
            _ => return Err(WorkflowError::MissingAnalysis),
        };
        request.validate()?;

        if self.confirmation.is_some() {
            return Err(WorkflowError::Closed);
        }
        if let Some(ticket) = self.pending.take() {
            debug!("Superseding submission {:?}", ticket);
        }

        self.next_ticket += 1;
        let ticket = SubmitTicket(self.next_ticket);
        self.pending = Some(ticket);
        self.last_error = None;

        Ok(SubmitJob {
            ticket,
            submission: BookingSubmission {
                patient: patient.clone(),
                request: request.clone(),
                analysis: analysis.clone(),
                recording_url: recording_url.to_string(),
                submitted_at: Utc::now(),
            },
        })
    }

    pub fn finish(
        &mut self,
        ticket: SubmitTicket,
        result: Result<BookingConfirmation, SubmissionError>,
    ) -> Result<BookingConfirmation, WorkflowError> {
        if self.pending != Some(ticket) {
            debug!("Discarding stale submission result {:?}", ticket);
            return Err(WorkflowError::InvalidState {
                action: "complete submission",
                state: "superseded",
            });
        }
        self.pending = None;

        match result {
            Ok(confirmation) => {
                info!(
                    "Appointment {} requested with {} on {} at {}",
                    confirmation.appointment_id,
                    confirmation.doctor_id,
                    confirmation.date,
                    confirmation.time
                );
                self.confirmation = Some(confirmation.clone());
                Ok(confirmation)
            }
            Err(e) => {
                warn!("Booking submission failed: {}", e);
                self.last_error = Some(e.to_string());
                Err(WorkflowError::SubmissionFailed(e.to_string()))
            }
        }
    }

    /// Drop any submission in flight
    pub fn invalidate(&mut self) {
        self.pending = None;
    }
}
