//! TUI screens

pub mod appointment;
pub mod appointments;
pub mod booking;

pub use appointment::AppointmentScreen;
pub use appointments::AppointmentsScreen;
pub use booking::BookingPopup;
