//! Repository pattern wrapper for database operations
//!
//! Provides a higher-level interface for the appointment dashboards.

use anyhow::Result;

use crate::config::Settings;
use crate::storage::{
    Appointment, AppointmentFilter, AppointmentStatus, Database, DatabaseStats, StoredAnalysis,
};
use crate::workflow::session::{Role, SessionContext};

/// Repository for managing appointments and their analyses
pub struct Repository {
    db: Database,
}

impl Repository {
    /// Create a new repository
    pub fn new(settings: &Settings) -> Result<Self> {
        let db = Database::open(settings)?;
        Ok(Self { db })
    }

    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    /// Appointments visible to a session: patients see their own, doctors
    /// the ones booked with them, admins everything.
    pub fn list_for(
        &self,
        session: &SessionContext,
        filter: AppointmentFilter,
        limit: usize,
    ) -> Result<Vec<Appointment>> {
        self.db.list_appointments(&scope(session, filter), limit)
    }

    /// Find appointment by ID prefix, with its analysis
    pub fn find(&self, prefix: &str) -> Result<Option<(Appointment, Option<StoredAnalysis>)>> {
        let Some(appointment) = self.db.find_appointment_by_prefix(prefix)? else {
            return Ok(None);
        };
        let analysis = self.db.get_analysis(&appointment.id)?;
        Ok(Some((appointment, analysis)))
    }

    /// Like [`Repository::find`], among the appointments the session may see
    pub fn find_for(
        &self,
        session: &SessionContext,
        prefix: &str,
    ) -> Result<Option<(Appointment, Option<StoredAnalysis>)>> {
        let visible = scope(session, AppointmentFilter::default());
        let Some(appointment) = self.db.find_appointment_by_prefix_in(prefix, &visible)? else {
            return Ok(None);
        };
        let analysis = self.db.get_analysis(&appointment.id)?;
        Ok(Some((appointment, analysis)))
    }

    /// Change a status on behalf of a session. Returns the updated appointment.
    pub fn set_status_for(
        &self,
        session: &SessionContext,
        prefix: &str,
        status: AppointmentStatus,
    ) -> Result<Appointment> {
        let Some((mut appointment, _)) = self.find_for(session, prefix)? else {
            anyhow::bail!("Appointment not found: {}", prefix);
        };
        if !can_set_status(session, &appointment, status) {
            anyhow::bail!(
                "A {} cannot mark this appointment {}",
                session.role.as_str(),
                status.as_str()
            );
        }
        self.set_status(&appointment.id, status)?;
        tracing::info!(
            "Appointment {} set to {} by {}",
            appointment.id,
            status.as_str(),
            session.user_id
        );
        appointment.status = status;
        Ok(appointment)
    }

    /// Change the status of an appointment
    pub fn set_status(&self, id: &str, status: AppointmentStatus) -> Result<()> {
        if !self.db.update_status(id, status)? {
            anyhow::bail!("Appointment not found: {}", id);
        }
        Ok(())
    }

    /// Delete an appointment
    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.db.delete_appointment(id)? {
            anyhow::bail!("Appointment not found: {}", id);
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        self.db.get_stats()
    }
}

/// Narrow a filter to what the session may see. Patients and doctors cannot
/// name anyone but themselves.
fn scope(session: &SessionContext, mut filter: AppointmentFilter) -> AppointmentFilter {
    match session.role {
        Role::Patient => filter.patient_id = Some(session.user_id.clone()),
        Role::Doctor => filter.doctor_id = Some(session.user_id.clone()),
        Role::Admin => {}
    }
    filter
}

/// Patients may only withdraw their own requests
pub fn can_set_status(
    session: &SessionContext,
    appointment: &Appointment,
    status: AppointmentStatus,
) -> bool {
    match session.role {
        Role::Patient => {
            appointment.patient_id == session.user_id && status == AppointmentStatus::Cancelled
        }
        Role::Doctor => appointment.doctor_id == session.user_id,
        Role::Admin => true,
    }
}
