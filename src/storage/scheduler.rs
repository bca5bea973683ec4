//! Scheduling service backed by the local database

use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::Settings;
use crate::storage::{Appointment, Database};
use crate::workflow::review::{
    BookingConfirmation, BookingSubmission, SchedulingService, SubmissionError,
};

/// Stores each booking as a pending appointment with its analysis
pub struct SqliteScheduler {
    db_path: PathBuf,
}

impl SqliteScheduler {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.database_path())
    }
}

#[async_trait]
impl SchedulingService for SqliteScheduler {
    async fn create_booking(
        &self,
        submission: &BookingSubmission,
    ) -> Result<BookingConfirmation, SubmissionError> {
        let appointment = Appointment::from_submission(submission);
        let analysis = submission.analysis.clone();
        let db_path = self.db_path.clone();

        let appointment = tokio::task::spawn_blocking(move || -> anyhow::Result<Appointment> {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let db = Database::open_path(&db_path)?;
            db.insert_booking(&appointment, &analysis)?;
            Ok(appointment)
        })
        .await
        .map_err(|e| SubmissionError::Unavailable(format!("storage task failed: {}", e)))?
        .map_err(|e| SubmissionError::Unavailable(format!("{:#}", e)))?;

        tracing::debug!("Stored appointment {}", appointment.id);

        Ok(BookingConfirmation {
            appointment_id: appointment.id,
            status: appointment.status,
            doctor_id: appointment.doctor_id,
            date: appointment.date,
            time: appointment.time,
        })
    }
}
