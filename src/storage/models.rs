//! Data models for storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::workflow::analysis::VoiceAnalysisReport;
use crate::workflow::review::BookingSubmission;

/// Lifecycle of an appointment request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Requested by the patient, not yet confirmed
    Pending,
    /// Confirmed by the provider
    Scheduled,
    /// Visit took place
    Completed,
    /// Withdrawn or declined
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("Unknown appointment status: {}", other)),
        }
    }
}

/// A stored appointment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    /// Unique identifier (UUID)
    pub id: String,

    pub patient_id: String,
    pub patient_name: String,
    pub doctor_id: String,

    /// `YYYY-MM-DD`
    pub date: String,

    /// `HH:MM`
    pub time: String,

    pub reason: String,
    pub symptoms: Option<String>,
    pub medical_history: Option<String>,

    pub status: AppointmentStatus,

    /// Playable reference to the voice recording
    pub audio_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// New pending appointment for a submitted booking
    pub fn from_submission(submission: &BookingSubmission) -> Self {
        let request = &submission.request;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id: submission.patient.user_id.clone(),
            patient_name: submission.patient.display_name.clone(),
            doctor_id: request.doctor_id.clone(),
            date: request.date.clone(),
            time: request.time.clone(),
            reason: request.reason.clone(),
            symptoms: non_empty(&request.symptoms),
            medical_history: non_empty(&request.medical_history),
            status: AppointmentStatus::Pending,
            audio_url: Some(submission.recording_url.clone()),
            created_at: submission.submitted_at,
            updated_at: submission.submitted_at,
        }
    }

    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Voice analysis attached to an appointment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub appointment_id: String,
    pub report: VoiceAnalysisReport,
    pub created_at: DateTime<Utc>,
}

/// Listing filter; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub patient_id: Option<String>,
    pub doctor_id: Option<String>,
    pub status: Option<AppointmentStatus>,
}
