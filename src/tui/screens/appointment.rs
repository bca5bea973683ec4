//! Appointment screen - details and voice analysis of one appointment

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};

use crate::cli::commands::render_report;
use crate::storage::{Appointment, StoredAnalysis};
use crate::tui::screens::appointments::status_indicator;
use crate::workflow::directory::ProviderDirectory;

/// Appointment screen state
pub struct AppointmentScreen {
    appointment: Option<Appointment>,
    analysis: Option<StoredAnalysis>,
    scroll_offset: usize,
    content_height: usize,
}

impl Default for AppointmentScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentScreen {
    pub fn new() -> Self {
        Self {
            appointment: None,
            analysis: None,
            scroll_offset: 0,
            content_height: 0,
        }
    }

    pub fn set_appointment(&mut self, appointment: Appointment, analysis: Option<StoredAnalysis>) {
        self.appointment = Some(appointment);
        self.analysis = analysis;
        self.scroll_offset = 0;
    }

    pub fn appointment(&self) -> Option<&Appointment> {
        self.appointment.as_ref()
    }

    pub fn draw(
        &mut self,
        frame: &mut Frame,
        area: Rect,
        directory: &dyn ProviderDirectory,
        message: Option<&str>,
    ) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4), // Header
                Constraint::Min(5),    // Body
                Constraint::Length(1), // Status message
                Constraint::Length(3), // Help
            ])
            .split(area);

        // Header
        let header_text = if let Some(ref appointment) = self.appointment {
            let (indicator, color) = status_indicator(appointment.status);
            let doctor = directory
                .find_doctor(&appointment.doctor_id)
                .map(|d| format!("{} ({})", d.name, d.specialty))
                .unwrap_or_else(|| appointment.doctor_id.clone());

            vec![
                Line::from(vec![
                    Span::styled(
                        format!("{} at {}", appointment.date, appointment.time),
                        Style::default().fg(Color::White).bold(),
                    ),
                    Span::raw(" • "),
                    Span::styled(doctor, Style::default().fg(Color::Cyan)),
                ]),
                Line::from(vec![
                    Span::styled(
                        format!("{} {}", indicator, appointment.status.as_str()),
                        Style::default().fg(color),
                    ),
                    Span::raw(" • "),
                    Span::styled(
                        appointment.patient_name.as_str(),
                        Style::default().fg(Color::Yellow),
                    ),
                    Span::raw(" • "),
                    Span::styled(
                        appointment.short_id(),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]),
            ]
        } else {
            vec![Line::from("No appointment selected")]
        };

        let header = Paragraph::new(header_text).block(
            Block::default()
                .title(" Appointment ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Blue)),
        );
        frame.render_widget(header, chunks[0]);

        // Body
        let body_lines = self.body_lines();
        self.content_height = body_lines.len();

        let body_area = chunks[1];
        let visible_height = body_area.height.saturating_sub(2) as usize;

        let body = Paragraph::new(body_lines)
            .wrap(Wrap { trim: false })
            .scroll((self.scroll_offset as u16, 0))
            .block(
                Block::default()
                    .title(" Details ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Blue)),
            );
        frame.render_widget(body, body_area);

        if self.content_height > visible_height {
            let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("↑"))
                .end_symbol(Some("↓"));

            let mut scrollbar_state = ScrollbarState::new(self.content_height)
                .position(self.scroll_offset)
                .viewport_content_length(visible_height);

            frame.render_stateful_widget(
                scrollbar,
                body_area.inner(Margin {
                    horizontal: 0,
                    vertical: 1,
                }),
                &mut scrollbar_state,
            );
        }

        if let Some(message) = message {
            let status = Paragraph::new(message)
                .style(Style::default().fg(Color::Yellow))
                .alignment(Alignment::Center);
            frame.render_widget(status, chunks[2]);
        }

        // Help bar
        let help = Paragraph::new(Line::from(vec![
            Span::styled(" ↑/↓ ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Scroll  "),
            Span::styled(" c/d/x ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Confirm/Done/Cancel  "),
            Span::styled(" Esc ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Back"),
        ]))
        .alignment(Alignment::Center);
        frame.render_widget(help, chunks[3]);
    }

    fn body_lines(&self) -> Vec<Line<'static>> {
        let Some(ref appointment) = self.appointment else {
            return Vec::new();
        };

        let label = |name: &str| Span::styled(format!("{:<10}", name), Style::default().fg(Color::DarkGray));
        let mut lines = vec![
            Line::from(vec![label("Reason"), Span::raw(appointment.reason.clone())]),
            Line::from(vec![
                label("Symptoms"),
                Span::raw(appointment.symptoms.clone().unwrap_or_else(|| "-".to_string())),
            ]),
            Line::from(vec![
                label("History"),
                Span::raw(
                    appointment
                        .medical_history
                        .clone()
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ]),
            Line::from(vec![
                label("Recording"),
                Span::raw(appointment.audio_url.clone().unwrap_or_else(|| "-".to_string())),
            ]),
            Line::from(vec![
                label("Requested"),
                Span::raw(appointment.created_at.format("%Y-%m-%d %H:%M").to_string()),
            ]),
            Line::from(""),
        ];

        match self.analysis {
            Some(ref analysis) => {
                lines.push(Line::from(Span::styled(
                    "Voice analysis",
                    Style::default().fg(Color::Cyan).bold(),
                )));
                lines.extend(
                    render_report(&analysis.report)
                        .lines()
                        .map(|line| Line::from(line.to_string())),
                );
            }
            None => lines.push(Line::from(Span::styled(
                "No voice analysis attached",
                Style::default().fg(Color::DarkGray),
            ))),
        }

        lines
    }

    pub fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        if self.scroll_offset < self.content_height.saturating_sub(1) {
            self.scroll_offset += 1;
        }
    }

    pub fn page_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(10);
    }

    pub fn page_down(&mut self) {
        self.scroll_offset = (self.scroll_offset + 10).min(self.content_height.saturating_sub(1));
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_offset = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = self.content_height.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AppointmentStatus;
    use crate::workflow::analysis::{CognitiveLoad, VoiceAnalysisReport};
    use chrono::Utc;

    fn appointment() -> Appointment {
        let now = Utc::now();
        Appointment {
            id: "0123456789abcdef".to_string(),
            patient_id: "p-1".to_string(),
            patient_name: "Ada".to_string(),
            doctor_id: "dr-chen".to_string(),
            date: "2025-03-01".to_string(),
            time: "10:00".to_string(),
            reason: "Memory check".to_string(),
            symptoms: Some("forgetfulness".to_string()),
            medical_history: None,
            status: AppointmentStatus::Scheduled,
            audio_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn body_includes_analysis_when_attached() {
        let mut screen = AppointmentScreen::new();
        screen.set_appointment(appointment(), None);
        let bare = screen.body_lines().len();

        let analysis = StoredAnalysis {
            appointment_id: "0123456789abcdef".to_string(),
            report: VoiceAnalysisReport {
                duration_secs: 30,
                transcript: "The sun rises".to_string(),
                speech_rate_wpm: 140,
                clarity_score_pct: 85,
                confidence_level_pct: 80,
                cognitive_load_level: CognitiveLoad::Low,
                risk_assessment: "within normal range".to_string(),
                recommendations: vec![],
            },
            created_at: Utc::now(),
        };
        screen.set_appointment(appointment(), Some(analysis));
        assert!(screen.body_lines().len() > bare);
    }

    #[test]
    fn scrolling_is_clamped() {
        let mut screen = AppointmentScreen::new();
        screen.set_appointment(appointment(), None);
        screen.content_height = 5;

        screen.scroll_up();
        assert_eq!(screen.scroll_offset, 0);
        screen.page_down();
        assert_eq!(screen.scroll_offset, 4);
        screen.scroll_down();
        assert_eq!(screen.scroll_offset, 4);
        screen.scroll_to_top();
        assert_eq!(screen.scroll_offset, 0);
    }
}
