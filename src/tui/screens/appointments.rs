//! Appointments screen - list, search and triage appointments

use crossterm::event::KeyCode;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};

use crate::storage::{Appointment, AppointmentStatus};
use crate::workflow::directory::ProviderDirectory;
use crate::workflow::session::{Role, SessionContext};

/// Appointments screen state
pub struct AppointmentsScreen {
    appointments: Vec<Appointment>,
    state: ListState,
    search_mode: bool,
    search_query: String,
    filtered_indices: Vec<usize>,
}

impl AppointmentsScreen {
    pub fn new(appointments: Vec<Appointment>) -> Self {
        let mut screen = Self {
            appointments,
            state: ListState::default(),
            search_mode: false,
            search_query: String::new(),
            filtered_indices: Vec::new(),
        };
        screen.apply_filter();
        screen
    }

    /// Swap in a fresh list, keeping the search and the selected appointment
    pub fn replace(&mut self, appointments: Vec<Appointment>) {
        let selected = self.selected().map(|a| a.id.clone());
        self.appointments = appointments;
        self.apply_filter();

        if let Some(id) = selected {
            if let Some(pos) = self
                .filtered_indices
                .iter()
                .position(|&i| self.appointments[i].id == id)
            {
                self.state.select(Some(pos));
            }
        }
    }

    pub fn draw(
        &mut self,
        frame: &mut Frame,
        area: Rect,
        session: &SessionContext,
        directory: &dyn ProviderDirectory,
        message: Option<&str>,
    ) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title
                Constraint::Length(3), // Search bar
                Constraint::Min(5),    // List
                Constraint::Length(1), // Status message
                Constraint::Length(3), // Help
            ])
            .split(area);

        // Title
        let title = Paragraph::new(Line::from(vec![
            Span::styled("neurocare", Style::default().fg(Color::Cyan).bold()),
            Span::raw("  "),
            Span::styled(&session.display_name, Style::default().fg(Color::White)),
            Span::styled(
                format!(" ({})", session.role.as_str()),
                Style::default().fg(Color::DarkGray),
            ),
        ]))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::BOTTOM));
        frame.render_widget(title, chunks[0]);

        // Search bar
        let search_style = if self.search_mode {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let search_text = if self.search_mode {
            format!("Search: {}█", self.search_query)
        } else if self.search_query.is_empty() {
            "Press [/] to search".to_string()
        } else {
            format!("Search: {}", self.search_query)
        };

        let search = Paragraph::new(search_text)
            .style(search_style)
            .block(Block::default().borders(Borders::ALL).title(" Search "));
        frame.render_widget(search, chunks[1]);

        // Appointments list
        let show_patient = session.role != Role::Patient;
        let items: Vec<ListItem> = self
            .filtered_indices
            .iter()
            .map(|&i| {
                let appointment = &self.appointments[i];
                let (indicator, color) = status_indicator(appointment.status);

                let doctor = directory
                    .find_doctor(&appointment.doctor_id)
                    .map(|d| d.name)
                    .unwrap_or_else(|| appointment.doctor_id.clone());

                let mut spans = vec![
                    Span::styled(indicator, Style::default().fg(color)),
                    Span::raw(" "),
                    Span::styled(
                        format!("{} {}", appointment.date, appointment.time),
                        Style::default().fg(Color::Cyan),
                    ),
                    Span::raw(" "),
                    Span::styled(truncate(&doctor, 22), Style::default().fg(Color::White)),
                    Span::raw(" "),
                ];
                if show_patient {
                    spans.push(Span::styled(
                        truncate(&appointment.patient_name, 18),
                        Style::default().fg(Color::Yellow),
                    ));
                    spans.push(Span::raw(" "));
                }
                spans.push(Span::styled(
                    truncate(&appointment.reason, 30),
                    Style::default().fg(Color::DarkGray),
                ));

                ListItem::new(Line::from(spans))
            })
            .collect();

        let list = List::new(items)
            .block(
                Block::default()
                    .title(format!(" Appointments ({}) ", self.filtered_indices.len()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Blue)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, chunks[2], &mut self.state);

        if let Some(message) = message {
            let status = Paragraph::new(message)
                .style(Style::default().fg(Color::Yellow))
                .alignment(Alignment::Center);
            frame.render_widget(status, chunks[3]);
        }

        // Help bar
        let help = Paragraph::new(Line::from(vec![
            Span::styled(" ↑/↓ ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Navigate  "),
            Span::styled(" Enter ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" View  "),
            Span::styled(" / ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Search  "),
            Span::styled(" n ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Book  "),
            Span::styled(" ? ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Help  "),
            Span::styled(" q ", Style::default().fg(Color::Black).bg(Color::Cyan)),
            Span::raw(" Quit"),
        ]))
        .alignment(Alignment::Center);
        frame.render_widget(help, chunks[4]);
    }

    pub fn next(&mut self) {
        if self.filtered_indices.is_empty() {
            return;
        }

        let i = match self.state.selected() {
            Some(i) if i + 1 < self.filtered_indices.len() => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        if self.filtered_indices.is_empty() {
            return;
        }

        let i = match self.state.selected() {
            Some(0) | None => self.filtered_indices.len() - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn selected(&self) -> Option<&Appointment> {
        self.state
            .selected()
            .and_then(|i| self.filtered_indices.get(i))
            .map(|&i| &self.appointments[i])
    }

    pub fn is_searching(&self) -> bool {
        self.search_mode
    }

    pub fn start_search(&mut self) {
        self.search_mode = true;
    }

    pub fn handle_key(&mut self, key: KeyCode) {
        if !self.search_mode {
            return;
        }

        match key {
            KeyCode::Char(c) => {
                self.search_query.push(c);
                self.apply_filter();
            }
            KeyCode::Backspace => {
                self.search_query.pop();
                self.apply_filter();
            }
            KeyCode::Enter | KeyCode::Esc => {
                self.search_mode = false;
            }
            _ => {}
        }
    }

    fn apply_filter(&mut self) {
        let query = self.search_query.to_lowercase();
        self.filtered_indices = self
            .appointments
            .iter()
            .enumerate()
            .filter(|(_, a)| query.is_empty() || matches_query(a, &query))
            .map(|(i, _)| i)
            .collect();

        if self.filtered_indices.is_empty() {
            self.state.select(None);
        } else {
            self.state.select(Some(0));
        }
    }
}

fn matches_query(appointment: &Appointment, query: &str) -> bool {
    [
        &appointment.reason,
        &appointment.doctor_id,
        &appointment.patient_name,
        &appointment.date,
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(query))
        || appointment.status.as_str() == query
}

pub(crate) fn status_indicator(status: AppointmentStatus) -> (&'static str, Color) {
    match status {
        AppointmentStatus::Pending => ("○", Color::Yellow),
        AppointmentStatus::Scheduled => ("●", Color::Cyan),
        AppointmentStatus::Completed => ("✓", Color::Green),
        AppointmentStatus::Cancelled => ("✗", Color::Red),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:<width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn appointment(id: &str, reason: &str, doctor: &str) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: id.to_string(),
            patient_id: "p-1".to_string(),
            patient_name: "Ada".to_string(),
            doctor_id: doctor.to_string(),
            date: "2025-03-01".to_string(),
            time: "10:00".to_string(),
            reason: reason.to_string(),
            symptoms: None,
            medical_history: None,
            status: AppointmentStatus::Pending,
            audio_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn screen() -> AppointmentsScreen {
        AppointmentsScreen::new(vec![
            appointment("a1", "Memory check", "dr-chen"),
            appointment("a2", "Headaches", "dr-roberts"),
            appointment("a3", "Follow-up", "dr-chen"),
        ])
    }

    #[test]
    fn navigation_wraps() {
        let mut screen = screen();
        assert_eq!(screen.selected().unwrap().id, "a1");

        screen.previous();
        assert_eq!(screen.selected().unwrap().id, "a3");
        screen.next();
        assert_eq!(screen.selected().unwrap().id, "a1");
    }

    #[test]
    fn search_filters_by_reason_and_doctor() {
        let mut screen = screen();
        screen.start_search();
        for c in "chen".chars() {
            screen.handle_key(KeyCode::Char(c));
        }
        assert_eq!(screen.filtered_indices.len(), 2);

        for _ in 0..4 {
            screen.handle_key(KeyCode::Backspace);
        }
        for c in "HEAD".chars() {
            screen.handle_key(KeyCode::Char(c));
        }
        assert_eq!(screen.selected().unwrap().id, "a2");

        screen.handle_key(KeyCode::Enter);
        assert!(!screen.is_searching());
    }

    #[test]
    fn replace_keeps_selection() {
        let mut screen = screen();
        screen.next();
        screen.replace(vec![
            appointment("a0", "New", "dr-chen"),
            appointment("a1", "Memory check", "dr-chen"),
            appointment("a2", "Headaches", "dr-roberts"),
        ]);
        assert_eq!(screen.selected().unwrap().id, "a2");
    }

    #[test]
    fn empty_list_has_no_selection() {
        let mut screen = AppointmentsScreen::new(vec![]);
        screen.next();
        assert!(screen.selected().is_none());
    }

    #[test]
    fn truncate_pads_and_cuts() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("Dr. Michael Roberts", 10), "Dr. Mic...");
    }
}
