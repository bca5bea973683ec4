//! Booking popup - the three booking steps on top of the appointments list
//!
//! The popup owns its workflow. Analyses run on a spawned task so the
//! recording clock and the key loop keep going; the result is picked up by
//! `update` once the task is done.

use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::analysis::{AnalysisError, AnalysisService, READING_PASSAGE};
use crate::cli::commands::render_report;
use crate::cli::wizard::WizardOutcome;
use crate::tui::widgets::centered_rect;
use crate::workflow::analysis::{AnalysisStart, AnalysisStatus, AnalysisTicket, VoiceAnalysisReport};
use crate::workflow::capture::{CaptureEvent, CaptureState};
use crate::workflow::form::{FormField, QUICK_TIME_SLOTS};
use crate::workflow::{format_elapsed, BookingWorkflow, WizardStep, WorkflowError};

type PendingAnalysis = (
    AnalysisTicket,
    JoinHandle<Result<VoiceAnalysisReport, AnalysisError>>,
);

pub struct BookingPopup {
    workflow: BookingWorkflow,
    analysis: Arc<dyn AnalysisService>,
    pending: Option<PendingAnalysis>,
    selected_field: usize,
    buffer: String,
    message: Option<String>,
    show_passage: bool,
    last_tick: Instant,
}

impl BookingPopup {
    pub fn new(
        workflow: BookingWorkflow,
        analysis: Arc<dyn AnalysisService>,
        show_passage: bool,
    ) -> Self {
        let buffer = workflow.request().get(FormField::ALL[0]).to_string();
        Self {
            workflow,
            analysis,
            pending: None,
            selected_field: 0,
            buffer,
            message: None,
            show_passage,
            last_tick: Instant::now(),
        }
    }

    pub fn workflow(&self) -> &BookingWorkflow {
        &self.workflow
    }

    /// Keys are text input while the details step is shown
    pub fn is_editing(&self) -> bool {
        self.workflow.step() == WizardStep::Details
    }

    pub fn is_analyzing(&self) -> bool {
        self.pending.is_some()
    }

    fn field(&self) -> FormField {
        FormField::ALL[self.selected_field]
    }

    fn select_field(&mut self, index: usize) {
        self.selected_field = index % FormField::ALL.len();
        self.buffer = self.workflow.request().get(self.field()).to_string();
    }

    pub async fn handle_key(&mut self, key: KeyCode) -> Result<Option<WizardOutcome>> {
        if key == KeyCode::Esc {
            return self.cancel();
        }
        self.message = None;

        match self.workflow.step() {
            WizardStep::Details => {
                self.details_key(key);
                Ok(None)
            }
            WizardStep::Voice => {
                self.voice_key(key).await;
                Ok(None)
            }
            WizardStep::Review => self.review_key(key).await,
        }
    }

    fn cancel(&mut self) -> Result<Option<WizardOutcome>> {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
        if !self.workflow.is_closed() {
            self.workflow.cancel()?;
        }
        Ok(Some(WizardOutcome::Cancelled))
    }

    fn details_key(&mut self, key: KeyCode) {
        let last = FormField::ALL.len() - 1;
        match key {
            KeyCode::Down | KeyCode::Tab => {
                if self.commit() {
                    self.select_field(self.selected_field + 1);
                }
            }
            KeyCode::Up | KeyCode::BackTab => {
                if self.commit() {
                    self.select_field(self.selected_field + last);
                }
            }
            KeyCode::Left => self.cycle_choice(false),
            KeyCode::Right => self.cycle_choice(true),
            KeyCode::Enter => {
                if !self.commit() {
                    return;
                }
                if self.selected_field == last {
                    self.advance_details();
                } else {
                    self.select_field(self.selected_field + 1);
                }
            }
            KeyCode::PageDown => {
                if self.commit() {
                    self.advance_details();
                }
            }
            KeyCode::Char(c) => self.buffer.push(c),
            KeyCode::Backspace => {
                self.buffer.pop();
            }
            _ => {}
        }
    }

    /// Store the edit buffer in the form. False if the value was rejected.
    fn commit(&mut self) -> bool {
        let field = self.field();
        if self.buffer == self.workflow.request().get(field) {
            return true;
        }
        match self.workflow.update_field(field, &self.buffer) {
            Ok(()) => true,
            Err(e) => {
                self.message = Some(e.to_string());
                false
            }
        }
    }

    /// Step through the quick time slots or the doctor roster
    fn cycle_choice(&mut self, forward: bool) {
        let choices: Vec<String> = match self.field() {
            FormField::Time => QUICK_TIME_SLOTS.iter().map(|s| s.to_string()).collect(),
            FormField::DoctorId => self
                .workflow
                .directory()
                .list_doctors()
                .into_iter()
                .map(|d| d.id)
                .collect(),
            _ => return,
        };
        if choices.is_empty() {
            return;
        }

        let next = match choices.iter().position(|c| *c == self.buffer) {
            Some(i) if forward => (i + 1) % choices.len(),
            Some(i) => (i + choices.len() - 1) % choices.len(),
            None if forward => 0,
            None => choices.len() - 1,
        };
        self.buffer = choices[next].clone();
    }

    fn advance_details(&mut self) {
        match self.workflow.validate_and_advance() {
            Ok(_) => {}
            Err(e) => {
                if let WorkflowError::Validation { ref fields } = e {
                    if let Some(pos) = fields
                        .first()
                        .and_then(|f| FormField::ALL.iter().position(|x| x == f))
                    {
                        self.select_field(pos);
                    }
                }
                self.message = Some(e.to_string());
            }
        }
    }

    async fn voice_key(&mut self, key: KeyCode) {
        if self.pending.is_some() {
            self.message = Some("Analysis in progress. Esc abandons the booking".to_string());
            return;
        }

        let event = match key {
            KeyCode::Char('r') => Some(CaptureEvent::Start),
            KeyCode::Char('p') => Some(if self.workflow.capture_state() == CaptureState::Paused {
                CaptureEvent::Resume
            } else {
                CaptureEvent::Pause
            }),
            KeyCode::Char('s') => Some(CaptureEvent::Stop),
            KeyCode::Char('x') => Some(CaptureEvent::ReRecord),
            _ => None,
        };

        if let Some(event) = event {
            self.workflow.refresh();
            match self.workflow.capture(event).await {
                Ok(_) => {
                    if matches!(event, CaptureEvent::Start | CaptureEvent::Resume) {
                        self.last_tick = Instant::now();
                    }
                }
                Err(e) => self.message = Some(e.to_string()),
            }
            return;
        }

        match key {
            KeyCode::Char('a') => self.start_analysis(),
            KeyCode::Char('n') | KeyCode::PageDown => {
                if let Err(e) = self.workflow.advance() {
                    self.message = Some(e.to_string());
                }
            }
            KeyCode::Char('b') | KeyCode::PageUp => self.back(),
            _ => {}
        }
    }

    fn start_analysis(&mut self) {
        match self.workflow.begin_analysis() {
            Ok(AnalysisStart::Cached(_)) => {}
            Ok(AnalysisStart::Pending(job)) => {
                let service = self.analysis.clone();
                let handle = tokio::spawn(async move { service.analyze(job.request).await });
                self.pending = Some((job.ticket, handle));
            }
            Err(e) => self.message = Some(e.to_string()),
        }
    }

    fn back(&mut self) {
        match self.workflow.back() {
            Ok(_) => self.select_field(self.selected_field),
            Err(e) => self.message = Some(e.to_string()),
        }
    }

    async fn review_key(&mut self, key: KeyCode) -> Result<Option<WizardOutcome>> {
        match key {
            KeyCode::Enter | KeyCode::Char('s') => match self.workflow.submit().await {
                Ok(confirmation) => return Ok(Some(WizardOutcome::Submitted(confirmation))),
                Err(e) => self.message = Some(format!("{}. Press Enter to retry", e)),
            },
            KeyCode::Char('b') | KeyCode::PageUp => self.back(),
            _ => {}
        }
        Ok(None)
    }

    /// Pick up finished analyses, evictions and the recording clock
    pub async fn update(&mut self) {
        if self.workflow.is_closed() {
            return;
        }
        self.workflow.refresh();

        if self
            .pending
            .as_ref()
            .is_some_and(|(_, handle)| handle.is_finished())
        {
            if let Some((ticket, handle)) = self.pending.take() {
                let result = handle
                    .await
                    .unwrap_or_else(|e| Err(AnalysisError::Unavailable(e.to_string())));
                if let Err(e) = self.workflow.finish_analysis(ticket, result) {
                    self.message = Some(format!("{}. Press [a] to retry", e));
                }
            }
        }

        if self.workflow.capture_state() == CaptureState::Recording
            && self.last_tick.elapsed() >= Duration::from_secs(1)
        {
            self.last_tick += Duration::from_secs(1);
            match self.workflow.capture(CaptureEvent::Tick).await {
                Ok(CaptureState::Stopped) => {
                    self.message = Some("Recording stopped at the time limit".to_string());
                }
                Ok(_) => {}
                Err(e) => self.message = Some(e.to_string()),
            }
        }
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let popup_area = centered_rect(area, 80, 85);
        frame.render_widget(Clear, popup_area);

        let step = self.workflow.step();
        let block = Block::default()
            .title(format!(" Step {} of 3: {} ", step.number(), step.title()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .style(Style::default().bg(Color::Black));
        let inner = block.inner(popup_area);
        frame.render_widget(block, popup_area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),    // Body
                Constraint::Length(1), // Message
                Constraint::Length(1), // Keys
            ])
            .split(inner);

        let body = match step {
            WizardStep::Details => self.details_lines(),
            WizardStep::Voice => self.voice_lines(),
            WizardStep::Review => self.review_lines(),
        };
        frame.render_widget(Paragraph::new(body).wrap(Wrap { trim: false }), chunks[0]);

        if let Some(ref message) = self.message {
            let message = Paragraph::new(message.as_str()).style(Style::default().fg(Color::Red));
            frame.render_widget(message, chunks[1]);
        }

        let keys: &[(&str, &str)] = match step {
            WizardStep::Details => &[
                ("Tab/↑↓", "Field"),
                ("←/→", "Choose"),
                ("Enter", "Save"),
                ("PgDn", "Next"),
                ("Esc", "Cancel"),
            ],
            WizardStep::Voice => &[
                ("r", "Record"),
                ("p", "Pause"),
                ("s", "Stop"),
                ("x", "Redo"),
                ("a", "Analyze"),
                ("n", "Next"),
                ("b", "Back"),
                ("Esc", "Cancel"),
            ],
            WizardStep::Review => &[("Enter", "Submit"), ("b", "Back"), ("Esc", "Cancel")],
        };
        let spans: Vec<Span> = keys
            .iter()
            .flat_map(|(key, action)| {
                [
                    Span::styled(
                        format!(" {} ", key),
                        Style::default().fg(Color::Black).bg(Color::Cyan),
                    ),
                    Span::raw(format!(" {}  ", action)),
                ]
            })
            .collect();
        frame.render_widget(
            Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
            chunks[2],
        );
    }

    fn details_lines(&self) -> Vec<Line<'static>> {
        let request = self.workflow.request();
        let mut lines = vec![Line::from("")];

        for (i, field) in FormField::ALL.iter().enumerate() {
            let selected = i == self.selected_field;
            let marker = if field.is_required() { "*" } else { " " };
            let label = format!("{} {:<18}{} ", if selected { "▶" } else { " " }, field.label(), marker);

            let value = if selected {
                Span::styled(
                    format!("{}█", self.buffer),
                    Style::default().fg(Color::Yellow),
                )
            } else {
                Span::styled(request.get(*field).to_string(), Style::default().fg(Color::White))
            };
            lines.push(Line::from(vec![
                Span::styled(label, Style::default().fg(Color::DarkGray)),
                value,
            ]));
        }

        lines.push(Line::from(""));
        match self.field() {
            FormField::Time => lines.push(Line::from(Span::styled(
                format!("Quick slots: {}", QUICK_TIME_SLOTS.join("  ")),
                Style::default().fg(Color::DarkGray),
            ))),
            FormField::DoctorId => {
                for doctor in self.workflow.directory().list_doctors() {
                    let style = if doctor.id == self.buffer {
                        Style::default().fg(Color::Cyan).bold()
                    } else {
                        Style::default().fg(Color::DarkGray)
                    };
                    lines.push(Line::from(Span::styled(
                        format!("  {:<12} {} ({})", doctor.id, doctor.name, doctor.specialty),
                        style,
                    )));
                }
            }
            FormField::Date => lines.push(Line::from(Span::styled(
                "Format: YYYY-MM-DD",
                Style::default().fg(Color::DarkGray),
            ))),
            _ => {}
        }

        lines
    }

    fn voice_lines(&self) -> Vec<Line<'static>> {
        let mut lines = Vec::new();

        if self.show_passage {
            lines.push(Line::from(Span::styled(
                "Read this passage aloud:",
                Style::default().fg(Color::Cyan).bold(),
            )));
            lines.push(Line::from(READING_PASSAGE));
            lines.push(Line::from(""));
        }

        let state = self.workflow.capture_state();
        let (indicator, color) = match state {
            CaptureState::Idle => ("○", Color::Gray),
            CaptureState::Recording => ("●", Color::Red),
            CaptureState::Paused => ("‖", Color::Yellow),
            CaptureState::Stopped => ("■", Color::Green),
        };
        let snapshot = self.workflow.snapshot();
        lines.push(Line::from(vec![
            Span::styled(
                format!("{} {}", indicator, state.as_str()),
                Style::default().fg(color).bold(),
            ),
            Span::raw("  "),
            Span::styled(
                format!(
                    "{} / {}",
                    format_elapsed(snapshot.elapsed_secs),
                    format_elapsed(snapshot.max_recording_secs)
                ),
                Style::default().fg(Color::Yellow),
            ),
        ]));
        if let Some(url) = snapshot.result_url {
            lines.push(Line::from(Span::styled(
                format!("Saved: {}", url),
                Style::default().fg(Color::DarkGray),
            )));
        }
        lines.push(Line::from(""));

        match self.workflow.analysis_status() {
            AnalysisStatus::NotStarted => {}
            AnalysisStatus::Analyzing => lines.push(Line::from(Span::styled(
                "Analyzing your voice sample...",
                Style::default().fg(Color::Cyan),
            ))),
            AnalysisStatus::Failed => lines.push(Line::from(Span::styled(
                format!(
                    "Analysis failed: {}",
                    snapshot.analysis_error.as_deref().unwrap_or("unknown error")
                ),
                Style::default().fg(Color::Red),
            ))),
            AnalysisStatus::Ready => {
                if let Some(report) = self.workflow.report() {
                    lines.extend(report_lines(report));
                }
            }
        }

        lines
    }

    fn review_lines(&self) -> Vec<Line<'static>> {
        let request = self.workflow.request();
        let doctor = self
            .workflow
            .directory()
            .find_doctor(&request.doctor_id)
            .map(|d| format!("{} ({})", d.name, d.specialty))
            .unwrap_or_else(|| request.doctor_id.clone());

        let row = |name: &str, value: String| {
            Line::from(vec![
                Span::styled(format!("{:<10}", name), Style::default().fg(Color::DarkGray)),
                Span::raw(value),
            ])
        };
        let optional = |value: &str| {
            if value.trim().is_empty() {
                "-".to_string()
            } else {
                value.to_string()
            }
        };

        let mut lines = vec![
            Line::from(""),
            row("When", format!("{} at {}", request.date, request.time)),
            row("Doctor", doctor),
            row("Reason", request.reason.clone()),
            row("Symptoms", optional(&request.symptoms)),
            row("History", optional(&request.medical_history)),
            Line::from(""),
        ];

        if let Some(report) = self.workflow.report() {
            lines.extend(report_lines(report));
        }
        lines
    }
}

fn report_lines(report: &VoiceAnalysisReport) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        "Voice analysis",
        Style::default().fg(Color::Cyan).bold(),
    ))];
    lines.extend(
        render_report(report)
            .lines()
            .map(|line| Line::from(line.to_string())),
    );
    lines
}

impl Drop for BookingPopup {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }
}
