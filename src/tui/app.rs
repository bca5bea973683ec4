//! Main TUI application state and logic

use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use std::time::{Duration, Instant};

use crate::audio::DeviceArbiter;
use crate::cli::commands::require_session;
use crate::cli::wizard::WizardOutcome;
use crate::config::Settings;
use crate::storage::{AppointmentFilter, AppointmentStatus, Repository};
use crate::tui::screens::{AppointmentScreen, AppointmentsScreen, BookingPopup};
use crate::tui::widgets::HelpPopup;
use crate::workflow::directory::StaticDirectory;
use crate::workflow::session::{FileIdentityProvider, SessionContext};
use crate::workflow::{BookingWorkflow, WorkflowDeps, WorkflowError};

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Current screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppScreen {
    Appointments,
    Appointment,
    /// The booking popup, drawn over the appointments list
    Booking,
}

/// Main application state
pub struct App {
    settings: Settings,
    session: SessionContext,
    repo: Repository,
    directory: StaticDirectory,
    arbiter: DeviceArbiter,
    current_screen: AppScreen,
    previous_screen: Option<AppScreen>,
    show_help: bool,
    message: Option<String>,

    // Screen states
    appointments: AppointmentsScreen,
    appointment: AppointmentScreen,
    booking: Option<BookingPopup>,

    last_refresh: Instant,
}

impl App {
    /// Create a new app instance for the signed-in user
    pub fn new(settings: Settings) -> Result<Self> {
        settings.ensure_dirs()?;
        let session = require_session(&settings)?;

        let repo = Repository::new(&settings)?;
        let appointments = repo.list_for(
            &session,
            AppointmentFilter::default(),
            settings.tui.recent_count,
        )?;

        Ok(Self {
            settings,
            session,
            repo,
            directory: StaticDirectory::default(),
            arbiter: DeviceArbiter::new(),
            current_screen: AppScreen::Appointments,
            previous_screen: None,
            show_help: false,
            message: None,
            appointments: AppointmentsScreen::new(appointments),
            appointment: AppointmentScreen::new(),
            booking: None,
            last_refresh: Instant::now(),
        })
    }

    /// Draw the current screen
    pub fn draw(&mut self, frame: &mut Frame) {
        let area = frame.size();
        let message = self.message.as_deref();

        match self.current_screen {
            AppScreen::Appointments | AppScreen::Booking => {
                self.appointments
                    .draw(frame, area, &self.session, &self.directory, message);
            }
            AppScreen::Appointment => {
                self.appointment.draw(frame, area, &self.directory, message);
            }
        }

        if let Some(ref booking) = self.booking {
            booking.draw(frame, area);
        }

        // Draw help popup if active
        if self.show_help {
            HelpPopup::draw(frame, area, self.help_screen(), self.session.role);
        }
    }

    fn help_screen(&self) -> AppScreen {
        if self.booking.is_some() {
            AppScreen::Booking
        } else {
            self.current_screen
        }
    }

    /// Keys go straight to `handle_key` while text is being typed or a popup is open
    pub fn captures_keys(&self) -> bool {
        self.show_help || self.booking.is_some() || self.appointments.is_searching()
    }

    /// Handle key input
    pub async fn handle_key(&mut self, key: KeyCode) -> Result<()> {
        if self.show_help {
            self.show_help = false;
            return Ok(());
        }

        if let Some(booking) = self.booking.as_mut() {
            if key == KeyCode::Char('?') && !booking.is_editing() {
                self.show_help = true;
                return Ok(());
            }
            if let Some(outcome) = booking.handle_key(key).await? {
                self.finish_booking(outcome);
            }
            return Ok(());
        }

        match self.current_screen {
            AppScreen::Appointments => self.handle_appointments_key(key),
            AppScreen::Appointment => self.handle_appointment_key(key),
            AppScreen::Booking => {}
        }

        Ok(())
    }

    /// Handle appointments list key input
    fn handle_appointments_key(&mut self, key: KeyCode) {
        if self.appointments.is_searching() {
            self.appointments.handle_key(key);
            return;
        }

        match key {
            KeyCode::Up | KeyCode::Char('k') => {
                self.appointments.previous();
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.appointments.next();
            }
            KeyCode::Enter => {
                if let Some(id) = self.appointments.selected().map(|a| a.id.clone()) {
                    self.open_appointment(&id);
                }
            }
            KeyCode::Char('/') => {
                self.appointments.start_search();
            }
            KeyCode::Char('r') => self.reload(),
            KeyCode::Char('n') => self.open_booking(),
            KeyCode::Char('c') => self.set_selected_status(AppointmentStatus::Scheduled),
            KeyCode::Char('d') => self.set_selected_status(AppointmentStatus::Completed),
            KeyCode::Char('x') => self.set_selected_status(AppointmentStatus::Cancelled),
            _ => {}
        }
    }

    /// Handle appointment view key input
    fn handle_appointment_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Up | KeyCode::Char('k') => {
                self.appointment.scroll_up();
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.appointment.scroll_down();
            }
            KeyCode::PageUp => {
                self.appointment.page_up();
            }
            KeyCode::PageDown => {
                self.appointment.page_down();
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.appointment.scroll_to_top();
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.appointment.scroll_to_bottom();
            }
            KeyCode::Char('c') => self.set_selected_status(AppointmentStatus::Scheduled),
            KeyCode::Char('d') => self.set_selected_status(AppointmentStatus::Completed),
            KeyCode::Char('x') => self.set_selected_status(AppointmentStatus::Cancelled),
            _ => {}
        }
    }

    /// Open an appointment in the detail view
    fn open_appointment(&mut self, id: &str) {
        match self.repo.find_for(&self.session, id) {
            Ok(Some((appointment, analysis))) => {
                self.appointment.set_appointment(appointment, analysis);
                self.message = None;
                if self.current_screen != AppScreen::Appointment {
                    self.switch_screen(AppScreen::Appointment);
                }
            }
            Ok(None) => self.message = Some(format!("Appointment not found: {}", id)),
            Err(e) => self.message = Some(format!("{:#}", e)),
        }
    }

    fn selected_id(&self) -> Option<String> {
        match self.current_screen {
            AppScreen::Appointment => self.appointment.appointment().map(|a| a.id.clone()),
            _ => self.appointments.selected().map(|a| a.id.clone()),
        }
    }

    fn set_selected_status(&mut self, status: AppointmentStatus) {
        let Some(id) = self.selected_id() else {
            return;
        };

        match self.repo.set_status_for(&self.session, &id, status) {
            Ok(appointment) => {
                self.reload();
                if self.current_screen == AppScreen::Appointment {
                    self.open_appointment(&appointment.id);
                }
                self.message = Some(format!(
                    "Appointment {} is now {}",
                    appointment.short_id(),
                    status.as_str()
                ));
            }
            Err(e) => self.message = Some(format!("{:#}", e)),
        }
    }

    /// Start a booking for the signed-in user
    fn open_booking(&mut self) {
        if self.booking.is_some() {
            return;
        }

        let deps = match WorkflowDeps::from_settings(&self.settings, self.arbiter.clone()) {
            Ok(deps) => deps,
            Err(e) => {
                self.message = Some(format!("{:#}", e));
                return;
            }
        };
        let analysis = deps.analysis.clone();

        let identity = FileIdentityProvider::from_settings(&self.settings);
        match BookingWorkflow::open(&identity, deps) {
            Ok(workflow) => {
                self.message = None;
                self.booking = Some(BookingPopup::new(
                    workflow,
                    analysis,
                    self.settings.tui.show_passage,
                ));
            }
            Err(WorkflowError::Unauthenticated) => {
                self.message = Some("Not signed in. Run `neurocare login` first".to_string());
            }
            Err(e) => self.message = Some(e.to_string()),
        }
    }

    fn finish_booking(&mut self, outcome: WizardOutcome) {
        self.booking = None;
        match outcome {
            WizardOutcome::Submitted(confirmation) => {
                self.reload();
                self.message = Some(format!(
                    "Appointment requested for {} at {} ({})",
                    confirmation.date,
                    confirmation.time,
                    confirmation.status.as_str()
                ));
            }
            WizardOutcome::Cancelled => {
                self.message = Some("Booking cancelled".to_string());
            }
        }
    }

    /// Switch to a different screen
    fn switch_screen(&mut self, screen: AppScreen) {
        self.previous_screen = Some(self.current_screen);
        self.current_screen = screen;
    }

    /// Handle back navigation
    pub fn handle_back(&mut self) {
        self.message = None;
        if let Some(prev) = self.previous_screen.take() {
            self.current_screen = prev;
        } else if self.current_screen != AppScreen::Appointments {
            self.current_screen = AppScreen::Appointments;
        }
    }

    /// Check if app should quit
    pub fn should_quit(&self) -> bool {
        self.current_screen == AppScreen::Appointments && !self.show_help && self.booking.is_none()
    }

    /// Toggle help popup
    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    /// Update app state
    pub async fn update(&mut self) -> Result<()> {
        if let Some(booking) = self.booking.as_mut() {
            booking.update().await;
            return Ok(());
        }

        // Pick up appointments booked or triaged elsewhere
        if self.last_refresh.elapsed() > REFRESH_INTERVAL {
            self.reload();
        }

        Ok(())
    }

    /// Reload the appointments list
    fn reload(&mut self) {
        self.last_refresh = Instant::now();
        match self.repo.list_for(
            &self.session,
            AppointmentFilter::default(),
            self.settings.tui.recent_count,
        ) {
            Ok(appointments) => self.appointments.replace(appointments),
            Err(e) => self.message = Some(format!("{:#}", e)),
        }
    }
}
