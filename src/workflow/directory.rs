//! Provider directory: the roster of doctors a patient can book with

use serde::{Deserialize, Serialize};

/// A bookable provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub specialty: String,
}

impl Doctor {
    fn new(id: &str, name: &str, specialty: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            specialty: specialty.to_string(),
        }
    }
}

pub trait ProviderDirectory: Send + Sync {
    fn list_doctors(&self) -> Vec<Doctor>;

    fn find_doctor(&self, id: &str) -> Option<Doctor> {
        self.list_doctors().into_iter().find(|d| d.id == id)
    }
}

/// Fixed roster
pub struct StaticDirectory {
    doctors: Vec<Doctor>,
}

impl StaticDirectory {
    pub fn new(doctors: Vec<Doctor>) -> Self {
        Self { doctors }
    }
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new(vec![
            Doctor::new("dr-chen", "Dr. Sarah Chen", "Neurologist"),
            Doctor::new("dr-roberts", "Dr. Michael Roberts", "Cognitive Specialist"),
            Doctor::new("dr-johnson", "Dr. Emily Johnson", "Geriatric Medicine"),
        ])
    }
}

impl ProviderDirectory for StaticDirectory {
    fn list_doctors(&self) -> Vec<Doctor> {
        self.doctors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_resolves_ids() {
        let directory = StaticDirectory::default();
        assert_eq!(directory.list_doctors().len(), 3);
        assert_eq!(
            directory.find_doctor("dr-chen").map(|d| d.specialty),
            Some("Neurologist".to_string())
        );
        assert!(directory.find_doctor("Dr. Sarah Chen").is_none());
    }
}
