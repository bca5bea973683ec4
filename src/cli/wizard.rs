//! Interactive booking wizard for `neurocare book`
//!
//! Walks the user through the three booking steps on the terminal. Lines
//! are read on a dedicated thread and handed over through a channel, so the
//! recording clock and a running analysis keep going while we wait for input.

use anyhow::Result;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use crate::analysis::{AnalysisService, READING_PASSAGE};
use crate::audio::DeviceArbiter;
use crate::cli::commands::{print_confirmation, render_report};
use crate::config::Settings;
use crate::workflow::analysis::AnalysisStart;
use crate::workflow::capture::{CaptureEvent, CaptureState};
use crate::workflow::directory::{Doctor, ProviderDirectory};
use crate::workflow::form::{FormField, QUICK_TIME_SLOTS};
use crate::workflow::review::BookingConfirmation;
use crate::workflow::session::FileIdentityProvider;
use crate::workflow::{
    format_elapsed, BookingWorkflow, WizardStep, WorkflowDeps, WorkflowError,
};

/// How a wizard run ended
#[derive(Debug, Clone, PartialEq)]
pub enum WizardOutcome {
    Submitted(BookingConfirmation),
    Cancelled,
}

/// Commands understood during the voice step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Redo,
    Analyze,
    Next,
    Back,
    Status,
    Help,
    Cancel,
}

impl VoiceCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "start" | "record" => Some(Self::Start),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "stop" => Some(Self::Stop),
            "redo" | "rerecord" | "re-record" => Some(Self::Redo),
            "analyze" | "analyse" => Some(Self::Analyze),
            "next" | "n" => Some(Self::Next),
            "back" | "b" => Some(Self::Back),
            "" | "status" => Some(Self::Status),
            "help" | "?" => Some(Self::Help),
            "cancel" | "quit" | "q" | "/cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    fn capture_event(self) -> Option<CaptureEvent> {
        match self {
            Self::Start => Some(CaptureEvent::Start),
            Self::Pause => Some(CaptureEvent::Pause),
            Self::Resume => Some(CaptureEvent::Resume),
            Self::Stop => Some(CaptureEvent::Stop),
            Self::Redo => Some(CaptureEvent::ReRecord),
            _ => None,
        }
    }
}

const VOICE_HELP: &str =
    "Commands: start, pause, resume, stop, redo, analyze, next, back, status, cancel";

/// Resolve a numbered choice: `1`..`6` picks a quick time slot, a roster
/// number picks a doctor. Anything else is taken as typed.
pub fn resolve_choice(field: FormField, input: &str, doctors: &[Doctor]) -> String {
    let input = input.trim();
    let Ok(n) = input.parse::<usize>() else {
        return input.to_string();
    };
    let picked = match field {
        FormField::Time => n
            .checked_sub(1)
            .and_then(|i| QUICK_TIME_SLOTS.get(i))
            .map(|slot| slot.to_string()),
        FormField::DoctorId => n
            .checked_sub(1)
            .and_then(|i| doctors.get(i))
            .map(|d| d.id.clone()),
        _ => None,
    };
    picked.unwrap_or_else(|| input.to_string())
}

/// Read stdin lines on a plain thread
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub struct Wizard {
    workflow: BookingWorkflow,
    analysis: Arc<dyn AnalysisService>,
    input: mpsc::UnboundedReceiver<String>,
    ticker: Interval,
}

impl Wizard {
    /// Must be called within a tokio runtime.
    pub fn new(
        workflow: BookingWorkflow,
        analysis: Arc<dyn AnalysisService>,
        input: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            workflow,
            analysis,
            input,
            ticker,
        }
    }

    pub async fn run(mut self) -> Result<WizardOutcome> {
        println!(
            "Booking an appointment for {}",
            self.workflow.session().display_name
        );

        loop {
            let outcome = match self.workflow.step() {
                WizardStep::Details => self.details_step().await?,
                WizardStep::Voice => self.voice_step().await?,
                WizardStep::Review => self.review_step().await?,
            };
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
    }

    fn cancel(&mut self) -> Result<Option<WizardOutcome>> {
        if !self.workflow.is_closed() {
            self.workflow.cancel()?;
        }
        Ok(Some(WizardOutcome::Cancelled))
    }

    async fn prompt(&mut self, text: &str) -> Option<String> {
        print!("{}", text);
        let _ = std::io::stdout().flush();
        self.input.recv().await.map(|line| line.trim().to_string())
    }

    fn print_header(&self) {
        let step = self.workflow.step();
        println!();
        println!("Step {} of 3: {}", step.number(), step.title());
    }

    async fn details_step(&mut self) -> Result<Option<WizardOutcome>> {
        self.print_header();
        println!("Press Enter to keep the value in brackets, `/cancel` to abandon.");

        let doctors = self.workflow.directory().list_doctors();
        let mut fields = FormField::ALL.to_vec();

        loop {
            for field in fields {
                if field == FormField::DoctorId {
                    for (i, doctor) in doctors.iter().enumerate() {
                        println!(
                            "  {}. {} - {} ({})",
                            i + 1,
                            doctor.id,
                            doctor.name,
                            doctor.specialty
                        );
                    }
                }
                if field == FormField::Time {
                    let slots: Vec<String> = QUICK_TIME_SLOTS
                        .iter()
                        .enumerate()
                        .map(|(i, s)| format!("{}={}", i + 1, s))
                        .collect();
                    println!("  Quick slots: {}", slots.join("  "));
                }

                loop {
                    let current = self.workflow.request().get(field).to_string();
                    let text = prompt_text(field, &current);
                    let Some(input) = self.prompt(&text).await else {
                        return self.cancel();
                    };
                    if input == "/cancel" {
                        return self.cancel();
                    }
                    if input.is_empty() {
                        break;
                    }

                    let value = resolve_choice(field, &input, &doctors);
                    match self.workflow.update_field(field, &value) {
                        Ok(()) => break,
                        Err(e) => println!("  {}", e),
                    }
                }
            }

            match self.workflow.validate_and_advance() {
                Ok(_) => return Ok(None),
                Err(e) => match e {
                    WorkflowError::Validation { fields: ref invalid } => {
                        println!("  {}", e);
                        fields = invalid.clone();
                    }
                    _ => return Err(e.into()),
                },
            }
        }
    }

    async fn voice_step(&mut self) -> Result<Option<WizardOutcome>> {
        self.print_header();
        println!("Record yourself reading this passage aloud:");
        println!();
        println!("  {}", READING_PASSAGE);
        println!();
        println!("{}", VOICE_HELP);

        loop {
            let recording = self.workflow.capture_state() == CaptureState::Recording;

            tokio::select! {
                _ = self.ticker.tick(), if recording => {
                    self.workflow.refresh();
                    match self.workflow.capture(CaptureEvent::Tick).await {
                        Ok(CaptureState::Stopped) => {
                            println!();
                            println!(
                                "Recording stopped at the time limit ({}).",
                                format_elapsed(self.workflow.elapsed_secs())
                            );
                        }
                        Ok(_) => {
                            let elapsed = self.workflow.elapsed_secs();
                            if elapsed % 15 == 0 {
                                println!("  recording {}", format_elapsed(elapsed));
                            }
                        }
                        Err(e) => println!("  {}", e),
                    }
                }
                line = self.input.recv() => {
                    let Some(line) = line else {
                        return self.cancel();
                    };
                    let Some(command) = VoiceCommand::parse(&line) else {
                        println!("Unknown command '{}'. {}", line.trim(), VOICE_HELP);
                        continue;
                    };
                    if let Some(outcome) = self.voice_command(command).await? {
                        return Ok(Some(outcome));
                    }
                    if self.workflow.step() != WizardStep::Voice {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn voice_command(&mut self, command: VoiceCommand) -> Result<Option<WizardOutcome>> {
        if let Some(event) = command.capture_event() {
            self.workflow.refresh();
            match self.workflow.capture(event).await {
                Ok(state) => {
                    if matches!(event, CaptureEvent::Start | CaptureEvent::Resume) {
                        self.ticker.reset();
                    }
                    self.print_capture(state);
                }
                Err(e) => println!("  {}", e),
            }
            return Ok(None);
        }

        match command {
            VoiceCommand::Analyze => return self.analyze().await,
            VoiceCommand::Next => {
                if let Err(e) = self.workflow.advance() {
                    println!("  {}", e);
                }
            }
            VoiceCommand::Back => {
                if let Err(e) = self.workflow.back() {
                    println!("  {}", e);
                }
            }
            VoiceCommand::Status => {
                self.workflow.refresh();
                self.print_capture(self.workflow.capture_state());
            }
            VoiceCommand::Help => println!("{}", VOICE_HELP),
            VoiceCommand::Cancel => return self.cancel(),
            _ => {}
        }
        Ok(None)
    }

    fn print_capture(&self, state: CaptureState) {
        println!(
            "  {} {}",
            state.as_str(),
            format_elapsed(self.workflow.elapsed_secs())
        );
        if state == CaptureState::Stopped {
            if let Some(url) = self.workflow.recording().and_then(|r| r.result_url()) {
                println!("  saved: {}", url);
            }
            println!("  Type `analyze` to analyze the recording, or `redo` to record again.");
        }
    }

    /// Run the analysis while still listening for `cancel`
    async fn analyze(&mut self) -> Result<Option<WizardOutcome>> {
        let job = match self.workflow.begin_analysis() {
            Ok(AnalysisStart::Cached(report)) => {
                print!("{}", render_report(&report));
                return Ok(None);
            }
            Ok(AnalysisStart::Pending(job)) => job,
            Err(e) => {
                println!("  {}", e);
                return Ok(None);
            }
        };

        println!("Analyzing your voice sample...");
        let service = self.analysis.clone();
        let call = service.analyze(job.request);
        tokio::pin!(call);

        loop {
            tokio::select! {
                biased;

                result = &mut call => {
                    match self.workflow.finish_analysis(job.ticket, result) {
                        Ok(report) => {
                            print!("{}", render_report(&report));
                            println!("Type `next` to review and submit.");
                        }
                        Err(e) => println!("  {}. Type `analyze` to retry.", e),
                    }
                    return Ok(None);
                }
                line = self.input.recv() => match line {
                    None => return self.cancel(),
                    Some(line) if VoiceCommand::parse(&line) == Some(VoiceCommand::Cancel) => {
                        return self.cancel();
                    }
                    Some(_) => println!("  Analysis in progress; type `cancel` to abandon the booking."),
                }
            }
        }
    }

    async fn review_step(&mut self) -> Result<Option<WizardOutcome>> {
        self.print_header();

        let request = self.workflow.request().clone();
        let doctor = self
            .workflow
            .directory()
            .find_doctor(&request.doctor_id)
            .map(|d| format!("{} ({})", d.name, d.specialty))
            .unwrap_or_else(|| request.doctor_id.clone());
        println!("  When:    {} at {}", request.date, request.time);
        println!("  Doctor:  {}", doctor);
        println!("  Reason:  {}", request.reason);
        if !request.symptoms.trim().is_empty() {
            println!("  Symptoms: {}", request.symptoms);
        }
        if !request.medical_history.trim().is_empty() {
            println!("  History: {}", request.medical_history);
        }
        if let Some(report) = self.workflow.report() {
            println!();
            print!("{}", render_report(report));
        }
        println!();
        println!("Type `submit` to send the request, `back` to change something, `cancel` to abandon.");

        loop {
            let Some(line) = self.prompt("> ").await else {
                return self.cancel();
            };
            match line.to_lowercase().as_str() {
                "submit" | "s" => match self.workflow.submit().await {
                    Ok(confirmation) => return Ok(Some(WizardOutcome::Submitted(confirmation))),
                    Err(e) => println!("  {}. Type `submit` to retry.", e),
                },
                "back" | "b" => {
                    self.workflow.back()?;
                    return Ok(None);
                }
                "cancel" | "quit" | "q" | "/cancel" => return self.cancel(),
                _ => println!("  Type `submit`, `back` or `cancel`."),
            }
        }
    }
}

fn prompt_text(field: FormField, current: &str) -> String {
    let hint = match field {
        FormField::Date => " (YYYY-MM-DD)",
        FormField::Time => " (HH:MM or slot number)",
        FormField::DoctorId => " (id or number)",
        FormField::Symptoms | FormField::MedicalHistory => " (optional)",
        FormField::Reason => "",
    };
    let mut label = field.label().to_string();
    if let Some(first) = label.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    if current.is_empty() {
        format!("{}{}: ", label, hint)
    } else {
        format!("{}{} [{}]: ", label, hint, current)
    }
}

/// Run the wizard on the terminal
pub async fn run(settings: &Settings) -> Result<()> {
    settings.ensure_dirs()?;

    let identity = FileIdentityProvider::from_settings(settings);
    let deps = WorkflowDeps::from_settings(settings, DeviceArbiter::new())?;
    let analysis = deps.analysis.clone();

    let workflow = match BookingWorkflow::open(&identity, deps) {
        Ok(workflow) => workflow,
        Err(WorkflowError::Unauthenticated) => {
            anyhow::bail!("Not signed in. Run `neurocare login` first")
        }
        Err(e) => return Err(e.into()),
    };

    let outcome = Wizard::new(workflow, analysis, spawn_stdin_reader())
        .run()
        .await?;

    match outcome {
        WizardOutcome::Submitted(confirmation) => print_confirmation(&confirmation),
        WizardOutcome::Cancelled => println!("Booking cancelled"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::directory::StaticDirectory;
    use crate::workflow::test_support::Harness;

    fn scripted(lines: &[&str]) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in lines {
            tx.send(line.to_string()).unwrap();
        }
        rx
    }

    #[test]
    fn voice_commands_parse() {
        assert_eq!(VoiceCommand::parse(" Start "), Some(VoiceCommand::Start));
        assert_eq!(VoiceCommand::parse("re-record"), Some(VoiceCommand::Redo));
        assert_eq!(VoiceCommand::parse(""), Some(VoiceCommand::Status));
        assert_eq!(VoiceCommand::parse("dance"), None);
    }

    #[test]
    fn numbered_choices_resolve() {
        let doctors = StaticDirectory::default().list_doctors();
        assert_eq!(resolve_choice(FormField::Time, "2", &doctors), "10:00");
        assert_eq!(resolve_choice(FormField::Time, "14:30", &doctors), "14:30");
        assert_eq!(resolve_choice(FormField::DoctorId, "1", &doctors), "dr-chen");
        assert_eq!(resolve_choice(FormField::DoctorId, "9", &doctors), "9");
        assert_eq!(resolve_choice(FormField::Reason, "0", &doctors), "0");
    }

    #[test]
    fn prompt_shows_current_value() {
        assert_eq!(prompt_text(FormField::Reason, ""), "Reason: ");
        assert_eq!(
            prompt_text(FormField::Date, "2025-03-01"),
            "Date (YYYY-MM-DD) [2025-03-01]: "
        );
    }

    #[tokio::test]
    async fn scripted_booking_submits() {
        let harness = Harness::new();
        let input = scripted(&[
            "2025-03-01", "2", "1", "checkup", "", "",
            "start", "stop", "next", "analyze", "next",
            "submit",
        ]);

        let outcome = Wizard::new(harness.open(), harness.analysis.clone(), input)
            .run()
            .await
            .unwrap();

        match outcome {
            WizardOutcome::Submitted(confirmation) => {
                assert_eq!(confirmation.doctor_id, "dr-chen");
                assert_eq!(confirmation.time, "10:00");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(harness.scheduler.calls(), 1);
        assert_eq!(harness.media.releases(), 1);
    }

    #[tokio::test]
    async fn invalid_details_are_asked_again() {
        let harness = Harness::new();
        let input = scripted(&[
            "not-a-date", "10:00", "dr-who", "dr-chen", "checkup", "", "",
            "2025-03-01",
            "cancel",
        ]);

        let outcome = Wizard::new(harness.open(), harness.analysis.clone(), input)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, WizardOutcome::Cancelled);
        assert_eq!(harness.scheduler.calls(), 0);
    }

    #[tokio::test]
    async fn end_of_input_cancels_and_releases() {
        let harness = Harness::new();
        let input = scripted(&["2025-03-01", "1", "1", "checkup", "", "", "start"]);

        let outcome = Wizard::new(harness.open(), harness.analysis.clone(), input)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, WizardOutcome::Cancelled);
        assert_eq!(harness.media.releases(), 1);
        assert!(harness.arbiter.holder().is_none());
    }
}
