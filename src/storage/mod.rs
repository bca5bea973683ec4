//! Storage module for neurocare
//!
//! Appointments and their voice analyses live in SQLite. The scheduling
//! service the booking workflow submits to is backed by this store.

mod database;
mod models;
mod repository;
mod scheduler;

pub use database::{Database, DatabaseStats};
pub use models::{Appointment, AppointmentFilter, AppointmentStatus, StoredAnalysis};
pub use repository::Repository;
pub use scheduler::SqliteScheduler;
