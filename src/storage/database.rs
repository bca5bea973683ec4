//! SQLite database management

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::config::Settings;
use crate::storage::models::{Appointment, AppointmentFilter, AppointmentStatus, StoredAnalysis};
use crate::workflow::analysis::{CognitiveLoad, VoiceAnalysisReport};

/// Database wrapper for neurocare
pub struct Database {
    conn: Connection,
}

const CURRENT_SCHEMA_VERSION: i64 = 1;

const APPOINTMENT_COLUMNS: &str = "id, patient_id, patient_name, doctor_id, date, time, reason, \
     symptoms, medical_history, status, audio_url, created_at, updated_at";

impl Database {
    /// Open or create the database
    pub fn open(settings: &Settings) -> Result<Self> {
        let db_path = settings.database_path();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::open_path(&db_path)
    }

    /// Open database at a specific path (useful for testing)
    pub fn open_path(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let current_version = self.schema_version()?;
        if current_version > CURRENT_SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is newer than supported version {}",
                current_version,
                CURRENT_SCHEMA_VERSION
            );
        }

        if current_version < 1 {
            self.migrate_to_v1()?;
            self.set_schema_version(1)?;
        }

        Ok(())
    }

    /// Current schema version tracked in PRAGMA user_version.
    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))?)
    }

    fn set_schema_version(&self, version: i64) -> Result<()> {
        self.conn
            .execute(&format!("PRAGMA user_version = {}", version), [])?;
        Ok(())
    }

    fn migrate_to_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS appointments (
                id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL,
                patient_name TEXT NOT NULL,
                doctor_id TEXT NOT NULL,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                reason TEXT NOT NULL,
                symptoms TEXT,
                medical_history TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                audio_url TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_appointments_patient
                ON appointments(patient_id);
            CREATE INDEX IF NOT EXISTS idx_appointments_doctor
                ON appointments(doctor_id, date, time);
            CREATE INDEX IF NOT EXISTS idx_appointments_status
                ON appointments(status);
            "#,
        )?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS voice_analyses (
                appointment_id TEXT PRIMARY KEY,
                duration_secs INTEGER NOT NULL,
                transcript TEXT NOT NULL,
                speech_rate_wpm INTEGER NOT NULL,
                clarity_score_pct INTEGER NOT NULL,
                confidence_level_pct INTEGER NOT NULL,
                cognitive_load TEXT NOT NULL,
                risk_assessment TEXT NOT NULL,
                recommendations TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                FOREIGN KEY (appointment_id) REFERENCES appointments(id) ON DELETE CASCADE
            );
            "#,
        )?;

        Ok(())
    }

    /// Store an appointment with its voice analysis in one transaction
    pub fn insert_booking(
        &self,
        appointment: &Appointment,
        analysis: &VoiceAnalysisReport,
    ) -> Result<()> {
        let recommendations_json = serde_json::to_string(&analysis.recommendations)?;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO appointments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                APPOINTMENT_COLUMNS
            ),
            params![
                appointment.id,
                appointment.patient_id,
                appointment.patient_name,
                appointment.doctor_id,
                appointment.date,
                appointment.time,
                appointment.reason,
                appointment.symptoms,
                appointment.medical_history,
                appointment.status.as_str(),
                appointment.audio_url,
                appointment.created_at.timestamp(),
                appointment.updated_at.timestamp(),
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO voice_analyses (appointment_id, duration_secs, transcript, speech_rate_wpm,
                clarity_score_pct, confidence_level_pct, cognitive_load, risk_assessment,
                recommendations, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                appointment.id,
                analysis.duration_secs as i64,
                analysis.transcript,
                analysis.speech_rate_wpm,
                analysis.clarity_score_pct,
                analysis.confidence_level_pct,
                analysis.cognitive_load_level.as_str(),
                analysis.risk_assessment,
                recommendations_json,
                appointment.created_at.timestamp(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Get an appointment by ID
    pub fn get_appointment(&self, id: &str) -> Result<Option<Appointment>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {} FROM appointments WHERE id = ?1", APPOINTMENT_COLUMNS),
                params![id],
                Self::row_to_appointment,
            )
            .optional()?;

        Ok(result)
    }

    /// Find the newest appointment whose ID starts with `prefix`
    pub fn find_appointment_by_prefix(&self, prefix: &str) -> Result<Option<Appointment>> {
        self.find_appointment_by_prefix_in(prefix, &AppointmentFilter::default())
    }

    /// Like [`Database::find_appointment_by_prefix`], considering only rows
    /// that match `scope`
    pub fn find_appointment_by_prefix_in(
        &self,
        prefix: &str,
        scope: &AppointmentFilter,
    ) -> Result<Option<Appointment>> {
        let pattern = format!("{}%", prefix);

        let result = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}
                     FROM appointments
                     WHERE id LIKE ?1
                       AND (?2 IS NULL OR patient_id = ?2)
                       AND (?3 IS NULL OR doctor_id = ?3)
                       AND (?4 IS NULL OR status = ?4)
                     ORDER BY created_at DESC
                     LIMIT 1",
                    APPOINTMENT_COLUMNS
                ),
                params![
                    pattern,
                    scope.patient_id,
                    scope.doctor_id,
                    scope.status.map(|s| s.as_str()),
                ],
                Self::row_to_appointment,
            )
            .optional()?;

        Ok(result)
    }

    /// List appointments, soonest visit last
    pub fn list_appointments(
        &self,
        filter: &AppointmentFilter,
        limit: usize,
    ) -> Result<Vec<Appointment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}
             FROM appointments
             WHERE (?1 IS NULL OR patient_id = ?1)
               AND (?2 IS NULL OR doctor_id = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY date DESC, time DESC, created_at DESC
             LIMIT ?4",
            APPOINTMENT_COLUMNS
        ))?;

        let appointments = stmt
            .query_map(
                params![
                    filter.patient_id,
                    filter.doctor_id,
                    filter.status.map(|s| s.as_str()),
                    limit as i64,
                ],
                Self::row_to_appointment,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(appointments)
    }

    /// Update appointment status. Returns false when no such appointment exists.
    pub fn update_status(&self, id: &str, status: AppointmentStatus) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE appointments SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), Utc::now().timestamp()],
        )?;
        Ok(changed > 0)
    }

    /// Delete an appointment and its analysis
    pub fn delete_appointment(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM appointments WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Voice analysis attached to an appointment
    pub fn get_analysis(&self, appointment_id: &str) -> Result<Option<StoredAnalysis>> {
        let result = self
            .conn
            .query_row(
                "SELECT appointment_id, duration_secs, transcript, speech_rate_wpm, clarity_score_pct,
                        confidence_level_pct, cognitive_load, risk_assessment, recommendations, created_at
                 FROM voice_analyses WHERE appointment_id = ?1",
                params![appointment_id],
                |row| {
                    let duration: i64 = row.get(1)?;
                    let load: String = row.get(6)?;
                    let recommendations_json: String = row.get(8)?;
                    let created: i64 = row.get(9)?;

                    Ok(StoredAnalysis {
                        appointment_id: row.get(0)?,
                        report: VoiceAnalysisReport {
                            duration_secs: duration.max(0) as u64,
                            transcript: row.get(2)?,
                            speech_rate_wpm: row.get(3)?,
                            clarity_score_pct: row.get(4)?,
                            confidence_level_pct: row.get(5)?,
                            cognitive_load_level: load.parse().unwrap_or(CognitiveLoad::Low),
                            risk_assessment: row.get(7)?,
                            recommendations: serde_json::from_str(&recommendations_json)
                                .unwrap_or_default(),
                        },
                        created_at: timestamp(created),
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    fn row_to_appointment(row: &rusqlite::Row) -> rusqlite::Result<Appointment> {
        let status_str: String = row.get(9)?;
        let created_timestamp: i64 = row.get(11)?;
        let updated_timestamp: i64 = row.get(12)?;

        Ok(Appointment {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            patient_name: row.get(2)?,
            doctor_id: row.get(3)?,
            date: row.get(4)?,
            time: row.get(5)?,
            reason: row.get(6)?,
            symptoms: row.get(7)?,
            medical_history: row.get(8)?,
            status: status_str.parse().unwrap_or(AppointmentStatus::Pending),
            audio_url: row.get(10)?,
            created_at: timestamp(created_timestamp),
            updated_at: timestamp(updated_timestamp),
        })
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let mut stats = DatabaseStats::default();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM appointments GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (status, count) in counts {
            let count = count as usize;
            stats.total_appointments += count;
            match status.parse() {
                Ok(AppointmentStatus::Pending) => stats.pending += count,
                Ok(AppointmentStatus::Scheduled) => stats.scheduled += count,
                Ok(AppointmentStatus::Completed) => stats.completed += count,
                Ok(AppointmentStatus::Cancelled) => stats.cancelled += count,
                Err(_) => {}
            }
        }

        let analyses: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM voice_analyses", [], |row| row.get(0))?;
        stats.total_analyses = analyses as usize;

        Ok(stats)
    }
}

fn timestamp(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub total_appointments: usize,
    pub pending: usize,
    pub scheduled: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub total_analyses: usize,
}
