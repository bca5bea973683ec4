//! CLI command implementations

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::args::{
    AppointmentsCommand, BookingCommand, ConfigCommand, DaemonCommand, RecordCommand,
};
use crate::config::Settings;
use crate::daemon::client::DaemonClient;
use crate::daemon::ipc::{DaemonRequest, DaemonResponse};
use crate::storage::{
    Appointment, AppointmentFilter, AppointmentStatus, Repository, StoredAnalysis,
};
use crate::workflow::analysis::{AnalysisStatus, VoiceAnalysisReport};
use crate::workflow::capture::{CaptureEvent, CaptureState};
use crate::workflow::directory::{ProviderDirectory, StaticDirectory};
use crate::workflow::form::FormField;
use crate::workflow::review::BookingConfirmation;
use crate::workflow::session::{
    resolve_session, FileIdentityProvider, Role, SessionContext,
};
use crate::workflow::{format_elapsed, WizardStep, WorkflowEvent, WorkflowSnapshot};

/// Session of the signed-in user, or a hint to sign in
pub fn require_session(settings: &Settings) -> Result<SessionContext> {
    let identity = FileIdentityProvider::from_settings(settings);
    resolve_session(&identity).map_err(|_| anyhow::anyhow!("Not signed in. Run `neurocare login` first"))
}

/// Store the session claims
pub fn login(settings: &Settings, user_id: String, name: String, role: Role) -> Result<()> {
    if user_id.trim().is_empty() {
        anyhow::bail!("User ID must not be empty");
    }

    let session = SessionContext {
        user_id: user_id.trim().to_string(),
        display_name: name.trim().to_string(),
        role,
    };
    FileIdentityProvider::from_settings(settings).sign_in(&session)?;

    tracing::info!("Signed in as {} ({})", session.user_id, role.as_str());
    println!(
        "Signed in as {} ({}, {})",
        session.display_name,
        session.user_id,
        role.as_str()
    );
    Ok(())
}

pub fn logout(settings: &Settings) -> Result<()> {
    if FileIdentityProvider::from_settings(settings).sign_out()? {
        println!("Signed out");
    } else {
        println!("Not signed in");
    }
    Ok(())
}

pub fn whoami(settings: &Settings) -> Result<()> {
    let session = require_session(settings)?;
    println!("{} ({})", session.display_name, session.user_id);
    println!("role: {}", session.role.as_str());
    Ok(())
}

/// List the provider roster
pub fn list_doctors() -> Result<()> {
    let directory = StaticDirectory::default();

    println!("{:<12} {:<22} {}", "ID", "Name", "Specialty");
    println!("{}", "-".repeat(56));
    for doctor in directory.list_doctors() {
        println!("{:<12} {:<22} {}", doctor.id, doctor.name, doctor.specialty);
    }
    Ok(())
}

// Booking hosted by the daemon

async fn booking_request(settings: &Settings, request: DaemonRequest) -> Result<WorkflowSnapshot> {
    let mut client = DaemonClient::connect(settings).await?;

    match client.send(request).await? {
        DaemonResponse::Booking(snapshot) => Ok(snapshot),
        DaemonResponse::Error { message } => anyhow::bail!("{}", message),
        _ => anyhow::bail!("Unexpected response from daemon"),
    }
}

async fn booking_event(settings: &Settings, event: WorkflowEvent) -> Result<WorkflowSnapshot> {
    booking_request(settings, DaemonRequest::Booking { event }).await
}

impl From<RecordCommand> for CaptureEvent {
    fn from(cmd: RecordCommand) -> Self {
        match cmd {
            RecordCommand::Start => CaptureEvent::Start,
            RecordCommand::Pause => CaptureEvent::Pause,
            RecordCommand::Resume => CaptureEvent::Resume,
            RecordCommand::Stop => CaptureEvent::Stop,
            RecordCommand::Redo => CaptureEvent::ReRecord,
        }
    }
}

/// Handle booking subcommands
pub async fn booking_command(settings: &Settings, cmd: BookingCommand) -> Result<()> {
    match cmd {
        BookingCommand::Open => {
            let snapshot = booking_request(settings, DaemonRequest::OpenBooking).await?;
            print!("{}", render_snapshot(&snapshot));
        }
        BookingCommand::Show { json } => {
            let snapshot = booking_request(settings, DaemonRequest::GetBooking).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", render_snapshot(&snapshot));
            }
        }
        BookingCommand::Set { field, value } => {
            let field: FormField = field.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let snapshot = booking_event(settings, WorkflowEvent::UpdateField { field, value }).await?;
            println!("{}: {}", field.label(), snapshot.request.get(field));
        }
        BookingCommand::Next => {
            let snapshot = booking_event(settings, WorkflowEvent::Advance).await?;
            print!("{}", render_snapshot(&snapshot));
        }
        BookingCommand::Back => {
            let snapshot = booking_event(settings, WorkflowEvent::Back).await?;
            print!("{}", render_snapshot(&snapshot));
        }
        BookingCommand::Record(record) => {
            let event = CaptureEvent::from(record);
            let snapshot = booking_event(settings, WorkflowEvent::Capture { event }).await?;
            println!("{}", render_capture(&snapshot));
            if snapshot.capture_state == CaptureState::Recording && event == CaptureEvent::Start {
                println!();
                println!("Read this passage aloud:");
                println!("{}", crate::analysis::READING_PASSAGE);
            }
        }
        BookingCommand::Analyze { wait } => {
            let mut snapshot = booking_event(settings, WorkflowEvent::Analyze).await?;
            if wait {
                while snapshot.analysis_status == AnalysisStatus::Analyzing {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    snapshot = booking_request(settings, DaemonRequest::GetBooking).await?;
                }
            }
            match (&snapshot.analysis_status, &snapshot.analysis) {
                (AnalysisStatus::Ready, Some(report)) => print!("{}", render_report(report)),
                (AnalysisStatus::Failed, _) => anyhow::bail!(
                    "{}",
                    snapshot
                        .analysis_error
                        .as_deref()
                        .unwrap_or("Voice analysis failed")
                ),
                (status, _) => println!(
                    "Analysis {}. Check with `neurocare booking show`",
                    status.as_str()
                ),
            }
        }
        BookingCommand::Submit => {
            let snapshot = booking_event(settings, WorkflowEvent::Submit).await?;
            match snapshot.confirmation {
                Some(ref confirmation) => print_confirmation(confirmation),
                None => print!("{}", render_snapshot(&snapshot)),
            }
        }
        BookingCommand::Cancel => {
            booking_event(settings, WorkflowEvent::Cancel).await?;
            println!("Booking cancelled");
        }
    }

    Ok(())
}

fn doctor_label(doctor_id: &str) -> String {
    if doctor_id.is_empty() {
        return "-".to_string();
    }
    match StaticDirectory::default().find_doctor(doctor_id) {
        Some(doctor) => format!("{} ({})", doctor.name, doctor.specialty),
        None => doctor_id.to_string(),
    }
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}

/// One-line recording state, `recording 00:05 / 05:00`
pub fn render_capture(snapshot: &WorkflowSnapshot) -> String {
    let mut line = format!(
        "Recording: {} {} / {}",
        snapshot.capture_state.as_str(),
        format_elapsed(snapshot.elapsed_secs),
        format_elapsed(snapshot.max_recording_secs)
    );
    if let Some(url) = &snapshot.result_url {
        line.push_str(&format!("\n  saved: {}", url));
    }
    line
}

/// Human readable summary of a voice analysis
pub fn render_report(report: &VoiceAnalysisReport) -> String {
    let mut output = String::new();
    output.push_str("Voice analysis\n");
    output.push_str(&format!("  duration:        {}s\n", report.duration_secs));
    output.push_str(&format!("  speech rate:     {} wpm\n", report.speech_rate_wpm));
    output.push_str(&format!("  clarity:         {}%\n", report.clarity_score_pct));
    output.push_str(&format!("  confidence:      {}%\n", report.confidence_level_pct));
    output.push_str(&format!("  cognitive load:  {}\n", report.cognitive_load_level));
    output.push_str(&format!("  assessment:      {}\n", report.risk_assessment));
    if !report.recommendations.is_empty() {
        output.push_str("  recommendations:\n");
        for recommendation in &report.recommendations {
            output.push_str(&format!("    - {}\n", recommendation));
        }
    }
    output
}

/// Full view of a booking
pub fn render_snapshot(snapshot: &WorkflowSnapshot) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "Booking for {} ({})\n",
        snapshot.display_name, snapshot.user_id
    ));

    if snapshot.closed {
        match &snapshot.confirmation {
            Some(c) => output.push_str(&format!("Submitted as appointment {}\n", c.appointment_id)),
            None => output.push_str("Cancelled\n"),
        }
        return output;
    }

    output.push_str(&format!(
        "Step {} of 3: {}\n\n",
        snapshot.step.number(),
        snapshot.step.title()
    ));

    let request = &snapshot.request;
    output.push_str(&format!("  date:      {}\n", or_dash(&request.date)));
    output.push_str(&format!("  time:      {}\n", or_dash(&request.time)));
    output.push_str(&format!("  doctor:    {}\n", doctor_label(&request.doctor_id)));
    output.push_str(&format!("  reason:    {}\n", or_dash(&request.reason)));
    output.push_str(&format!("  symptoms:  {}\n", or_dash(&request.symptoms)));
    output.push_str(&format!("  history:   {}\n", or_dash(&request.medical_history)));
    output.push('\n');

    output.push_str(&render_capture(snapshot));
    output.push('\n');
    output.push_str(&format!("Analysis: {}\n", snapshot.analysis_status.as_str()));
    if let Some(error) = &snapshot.analysis_error {
        output.push_str(&format!("  last error: {}\n", error));
    }
    if let Some(report) = &snapshot.analysis {
        output.push_str(&format!(
            "  {} wpm, clarity {}%, confidence {}%, cognitive load {}\n",
            report.speech_rate_wpm,
            report.clarity_score_pct,
            report.confidence_level_pct,
            report.cognitive_load_level
        ));
    }
    output.push_str(&format!("Submission: {}\n", snapshot.submit_status.as_str()));
    if let Some(error) = &snapshot.submit_error {
        output.push_str(&format!("  last error: {}\n", error));
    }

    let hint = match snapshot.step {
        WizardStep::Details => "Next: `neurocare booking set <field> <value>`, then `neurocare booking next`",
        WizardStep::Voice => "Next: `neurocare booking record start`, `record stop`, `analyze --wait`, then `next`",
        WizardStep::Review => "Next: `neurocare booking submit`",
    };
    output.push('\n');
    output.push_str(hint);
    output.push('\n');
    output
}

pub fn print_confirmation(confirmation: &BookingConfirmation) {
    println!(
        "Appointment request submitted: {}",
        confirmation.appointment_id
    );
    println!(
        "  {} on {} at {} ({})",
        doctor_label(&confirmation.doctor_id),
        confirmation.date,
        confirmation.time,
        confirmation.status.as_str()
    );
}

// Appointments

/// Handle appointments subcommands
pub fn appointments_command(settings: &Settings, cmd: AppointmentsCommand) -> Result<()> {
    let session = require_session(settings)?;
    let repo = Repository::new(settings)?;

    match cmd {
        AppointmentsCommand::List {
            patient,
            doctor,
            status,
            limit,
        } => {
            let filter = AppointmentFilter {
                patient_id: patient,
                doctor_id: doctor,
                status,
            };
            let appointments = repo.list_for(&session, filter, limit)?;

            if appointments.is_empty() {
                println!("No appointments found");
                return Ok(());
            }

            println!(
                "{:<10} {:<12} {:<6} {:<12} {:<18} {:<10} {}",
                "ID", "Date", "Time", "Doctor", "Patient", "Status", "Reason"
            );
            println!("{}", "-".repeat(90));

            for appointment in appointments {
                println!(
                    "{:<10} {:<12} {:<6} {:<12} {:<18} {:<10} {}",
                    appointment.short_id(),
                    appointment.date,
                    appointment.time,
                    truncate(&appointment.doctor_id, 12),
                    truncate(&appointment.patient_name, 18),
                    appointment.status.as_str(),
                    truncate(&appointment.reason, 30)
                );
            }
        }
        AppointmentsCommand::View { id } => {
            let (appointment, analysis) = repo
                .find_for(&session, &id)?
                .with_context(|| format!("Appointment not found: {}", id))?;
            print!("{}", export_as_txt(&appointment, analysis.as_ref()));
        }
        AppointmentsCommand::Status { id, status } => {
            let appointment = repo.set_status_for(&session, &id, status)?;
            println!(
                "Appointment {} is now {}",
                appointment.short_id(),
                status.as_str()
            );
        }
        AppointmentsCommand::Delete { id } => {
            if session.role != Role::Admin {
                anyhow::bail!("Only admins can delete appointments");
            }
            let (appointment, _) = repo
                .find_for(&session, &id)?
                .with_context(|| format!("Appointment not found: {}", id))?;
            repo.delete(&appointment.id)?;
            tracing::info!("Appointment {} deleted by {}", appointment.id, session.user_id);
            println!("Deleted appointment {}", appointment.short_id());
        }
        AppointmentsCommand::Export { id, format, output } => {
            let (appointment, analysis) = repo
                .find_for(&session, &id)?
                .with_context(|| format!("Appointment not found: {}", id))?;

            let content = match format.as_str() {
                "txt" => export_as_txt(&appointment, analysis.as_ref()),
                "json" => export_as_json(&appointment, analysis.as_ref())?,
                _ => anyhow::bail!("Unsupported format: {}. Supported: txt, json", format),
            };

            write_output(content, output)?;
        }
    }

    Ok(())
}

fn write_output(content: String, output: Option<PathBuf>) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Exported to: {}", path.display());
    } else {
        print!("{}", content);
    }
    Ok(())
}

// Daemon

/// Handle daemon subcommands
pub async fn daemon_command(settings: &Settings, cmd: DaemonCommand) -> Result<()> {
    match cmd {
        DaemonCommand::Start { foreground } => {
            if foreground {
                crate::daemon::run_foreground(settings).await?;
            } else {
                crate::daemon::start_daemon(settings)?;
                println!("Daemon started");
            }
        }
        DaemonCommand::Stop => {
            let mut client = DaemonClient::connect(settings).await?;
            client.send(DaemonRequest::Shutdown).await?;
            println!("Daemon stopped");
        }
        DaemonCommand::Restart => {
            if let Ok(mut client) = DaemonClient::connect(settings).await {
                let _ = client.send(DaemonRequest::Shutdown).await;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            crate::daemon::start_daemon(settings)?;
            println!("Daemon restarted");
        }
        DaemonCommand::Status => match DaemonClient::connect(settings).await {
            Ok(mut client) => match client.send(DaemonRequest::GetStatus).await? {
                DaemonResponse::Status(status) => {
                    println!("Daemon is running (PID: {})", status.pid);
                    println!("  uptime: {}", format_elapsed(status.uptime_secs));
                    println!("  analysis: {}", status.analysis_backend);
                    println!(
                        "  microphone: {}",
                        status.mic_holder.as_deref().unwrap_or("free")
                    );
                    match status.booking {
                        Some(booking) if !booking.closed => println!(
                            "  booking: {} at step {} ({})",
                            booking.user_id,
                            booking.step.number(),
                            booking.capture_state.as_str()
                        ),
                        _ => println!("  booking: none"),
                    }
                }
                DaemonResponse::Error { message } => {
                    anyhow::bail!("Failed to get status: {}", message)
                }
                _ => anyhow::bail!("Unexpected response from daemon"),
            },
            Err(_) => {
                println!("Daemon is not running");
            }
        },
    }

    Ok(())
}

/// Handle config subcommands
pub fn config_command(settings: &Settings, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            let toml = toml::to_string_pretty(settings)?;
            println!("{}", toml);
        }
        ConfigCommand::Path => {
            let path = Settings::config_path()?;
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            let path = Settings::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Settings::write_default(&path)?;
            println!("Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

// Diagnostics

#[derive(Serialize)]
struct DiagnoseCheck {
    name: &'static str,
    status: &'static str,
    detail: String,
}

#[derive(Serialize)]
struct DiagnoseReport {
    version: &'static str,
    config_path: Option<String>,
    data_dir: String,
    analysis_backend: String,
    input_devices: Vec<String>,
    session: Option<SessionContext>,
    checks: Vec<DiagnoseCheck>,
    notes: Vec<String>,
}

/// Run diagnostic checks to help troubleshoot local setup issues.
pub async fn run_diagnose(settings: &Settings, json: bool) -> Result<()> {
    let report = collect_diagnose_report(settings);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("neurocare diagnose (v{})", report.version);
    println!(
        "config:   {}",
        report.config_path.as_deref().unwrap_or("(unknown)")
    );
    println!("data dir: {}", report.data_dir);
    println!("analysis: {}", report.analysis_backend);
    match &report.session {
        Some(session) => println!(
            "session:  {} ({})",
            session.user_id,
            session.role.as_str()
        ),
        None => println!("session:  not signed in"),
    }
    println!();

    for check in &report.checks {
        println!("{:<12} {:<8} {}", check.name, check.status, check.detail);
    }

    if !report.input_devices.is_empty() {
        println!();
        println!("Input devices:");
        for device in &report.input_devices {
            println!("  - {}", device);
        }
    }

    if !report.notes.is_empty() {
        println!();
        for note in &report.notes {
            println!("{}", note);
        }
    }

    Ok(())
}

fn collect_diagnose_report(settings: &Settings) -> DiagnoseReport {
    let mut checks = Vec::new();
    let mut notes = Vec::new();

    let config_path = Settings::config_path().ok();
    let config_exists = config_path.as_ref().map(|p| p.exists()).unwrap_or(false);
    checks.push(DiagnoseCheck {
        name: "config",
        status: if config_exists { "ok" } else { "default" },
        detail: if config_exists {
            "loaded from file".to_string()
        } else {
            "no config file; run `neurocare config init` to create one".to_string()
        },
    });

    let input_devices = match crate::audio::list_input_devices() {
        Ok(devices) => {
            checks.push(DiagnoseCheck {
                name: "microphone",
                status: if devices.is_empty() { "missing" } else { "ok" },
                detail: format!("{} input device(s)", devices.len()),
            });
            devices
        }
        Err(e) => {
            checks.push(DiagnoseCheck {
                name: "microphone",
                status: "error",
                detail: format!("{:#}", e),
            });
            Vec::new()
        }
    };

    if !settings.audio.device.is_empty() && !input_devices.contains(&settings.audio.device) {
        notes.push(format!(
            "warning: configured input device '{}' was not found; the default input will be used.",
            settings.audio.device
        ));
    }

    let analysis_backend = match crate::analysis::build_service(settings) {
        Ok(service) => {
            checks.push(DiagnoseCheck {
                name: "analysis",
                status: "ok",
                detail: format!("{} backend", service.name()),
            });
            service.name().to_string()
        }
        Err(e) => {
            checks.push(DiagnoseCheck {
                name: "analysis",
                status: "error",
                detail: format!("{:#}", e),
            });
            "unavailable".to_string()
        }
    };

    let db_path = settings.database_path();
    let database = if db_path.exists() {
        match Repository::new(settings).and_then(|repo| repo.stats()) {
            Ok(stats) => DiagnoseCheck {
                name: "database",
                status: "ok",
                detail: format!(
                    "{} ({} appointments, {} pending, {} analyses)",
                    db_path.display(),
                    stats.total_appointments,
                    stats.pending,
                    stats.total_analyses
                ),
            },
            Err(e) => DiagnoseCheck {
                name: "database",
                status: "error",
                detail: format!("{:#}", e),
            },
        }
    } else {
        DiagnoseCheck {
            name: "database",
            status: "missing",
            detail: db_path.display().to_string(),
        }
    };
    checks.push(database);

    let daemon_running = crate::daemon::running_pid(settings).is_some();
    checks.push(DiagnoseCheck {
        name: "daemon",
        status: if daemon_running { "running" } else { "stopped" },
        detail: settings.socket_path().display().to_string(),
    });

    let identity = FileIdentityProvider::from_settings(settings);
    let session = resolve_session(&identity).ok();
    if session.is_none() {
        notes.push("hint: run `neurocare login --user-id <id> --name <name>` before booking.".to_string());
    }

    DiagnoseReport {
        version: crate::VERSION,
        config_path: config_path.map(|p| p.display().to_string()),
        data_dir: settings.general.data_dir.display().to_string(),
        analysis_backend,
        input_devices,
        session,
        checks,
        notes,
    }
}

// Helper functions

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn export_as_txt(appointment: &Appointment, analysis: Option<&StoredAnalysis>) -> String {
    let mut output = String::new();
    output.push_str(&format!("Appointment: {}\n", appointment.id));
    output.push_str(&format!(
        "Patient: {} ({})\n",
        appointment.patient_name, appointment.patient_id
    ));
    output.push_str(&format!("Doctor: {}\n", doctor_label(&appointment.doctor_id)));
    output.push_str(&format!("When: {} {}\n", appointment.date, appointment.time));
    output.push_str(&format!("Status: {}\n", appointment.status.as_str()));
    output.push_str(&format!("Reason: {}\n", appointment.reason));
    if let Some(symptoms) = &appointment.symptoms {
        output.push_str(&format!("Symptoms: {}\n", symptoms));
    }
    if let Some(history) = &appointment.medical_history {
        output.push_str(&format!("Medical history: {}\n", history));
    }
    if let Some(url) = &appointment.audio_url {
        output.push_str(&format!("Recording: {}\n", url));
    }
    output.push_str(&format!(
        "Requested: {}\n",
        appointment.created_at.format("%Y-%m-%d %H:%M")
    ));
    output.push_str("\n---\n\n");

    match analysis {
        Some(stored) => {
            output.push_str(&render_report(&stored.report));
            output.push_str(&format!("\nTranscript:\n{}\n", stored.report.transcript));
        }
        None => output.push_str("(No voice analysis attached)\n"),
    }

    output
}

fn export_as_json(appointment: &Appointment, analysis: Option<&StoredAnalysis>) -> Result<String> {
    #[derive(serde::Serialize)]
    struct ExportData<'a> {
        appointment: &'a Appointment,
        analysis: Option<&'a VoiceAnalysisReport>,
    }

    let data = ExportData {
        appointment,
        analysis: analysis.map(|a| &a.report),
    };
    Ok(serde_json::to_string_pretty(&data)?)
}
