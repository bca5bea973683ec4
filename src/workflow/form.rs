//! Appointment form stage

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::workflow::directory::ProviderDirectory;
use crate::workflow::WorkflowError;

/// Quick time slots offered next to the free time entry
pub const QUICK_TIME_SLOTS: [&str; 6] = ["09:00", "10:00", "11:00", "14:00", "15:00", "16:00"];

/// Editable field of an [`AppointmentRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    Date,
    Time,
    DoctorId,
    Reason,
    Symptoms,
    MedicalHistory,
}

impl FormField {
    pub const ALL: [FormField; 6] = [
        FormField::Date,
        FormField::Time,
        FormField::DoctorId,
        FormField::Reason,
        FormField::Symptoms,
        FormField::MedicalHistory,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Time => "time",
            Self::DoctorId => "doctor",
            Self::Reason => "reason",
            Self::Symptoms => "symptoms",
            Self::MedicalHistory => "medical history",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(
            self,
            Self::Date | Self::Time | Self::DoctorId | Self::Reason
        )
    }
}

impl FromStr for FormField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "doctor" | "doctor_id" => Ok(Self::DoctorId),
            "reason" => Ok(Self::Reason),
            "symptoms" => Ok(Self::Symptoms),
            "history" | "medical_history" => Ok(Self::MedicalHistory),
            other => Err(format!(
                "Unknown field '{}'. Expected one of: date, time, doctor, reason, symptoms, history",
                other
            )),
        }
    }
}

/// A patient's scheduling intent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    /// Calendar date, `YYYY-MM-DD`
    pub date: String,
    /// Time of day, `HH:MM`
    pub time: String,
    pub doctor_id: String,
    pub reason: String,
    pub symptoms: String,
    pub medical_history: String,
}

impl AppointmentRequest {
    pub fn get(&self, field: FormField) -> &str {
        match field {
            FormField::Date => &self.date,
            FormField::Time => &self.time,
            FormField::DoctorId => &self.doctor_id,
            FormField::Reason => &self.reason,
            FormField::Symptoms => &self.symptoms,
            FormField::MedicalHistory => &self.medical_history,
        }
    }

    fn slot(&mut self, field: FormField) -> &mut String {
        match field {
            FormField::Date => &mut self.date,
            FormField::Time => &mut self.time,
            FormField::DoctorId => &mut self.doctor_id,
            FormField::Reason => &mut self.reason,
            FormField::Symptoms => &mut self.symptoms,
            FormField::MedicalHistory => &mut self.medical_history,
        }
    }

    /// Fields that block submission, in form order.
    ///
    /// Required fields must be non-blank; date and time must also parse.
    pub fn invalid_fields(&self) -> Vec<FormField> {
        FormField::ALL
            .into_iter()
            .filter(|f| f.is_required())
            .filter(|&f| {
                let value = self.get(f).trim();
                value.is_empty()
                    || match f {
                        FormField::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err(),
                        FormField::Time => NaiveTime::parse_from_str(value, "%H:%M").is_err(),
                        _ => false,
                    }
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        let fields = self.invalid_fields();
        if fields.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation { fields })
        }
    }
}

/// Form stage state
#[derive(Debug, Default)]
pub struct AppointmentForm {
    request: AppointmentRequest,
}

impl AppointmentForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> &AppointmentRequest {
        &self.request
    }

    /// Set one field. Doctor ids must come from the directory roster.
    pub fn update_field(
        &mut self,
        directory: &dyn ProviderDirectory,
        field: FormField,
        value: &str,
    ) -> Result<(), WorkflowError> {
        let value = value.trim();
        if field == FormField::DoctorId
            && !value.is_empty()
            && directory.find_doctor(value).is_none()
        {
            return Err(WorkflowError::UnknownDoctor(value.to_string()));
        }

        *self.request.slot(field) = value.to_string();
        Ok(())
    }
}
