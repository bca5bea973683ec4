//! Help popup widget

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::tui::widgets::centered_rect;
use crate::tui::AppScreen;
use crate::workflow::session::Role;

/// Help popup that shows keyboard shortcuts
pub struct HelpPopup;

impl HelpPopup {
    pub fn draw(frame: &mut Frame, area: Rect, screen: AppScreen, role: Role) {
        let popup_area = centered_rect(area, 60, 70);

        // Clear the area behind the popup
        frame.render_widget(Clear, popup_area);

        let (title, shortcuts) = Self::shortcuts(screen, role);

        let mut help_text = vec![
            Line::from(Span::styled(title, Style::default().fg(Color::Cyan).bold())),
            Line::from(""),
        ];
        help_text.extend(shortcuts.into_iter().map(|(key, action)| {
            Line::from(vec![
                Span::styled(format!("{:<8}", key), Style::default().fg(Color::Yellow)),
                Span::raw(action),
            ])
        }));
        help_text.push(Line::from(""));
        help_text.push(Line::from(Span::styled(
            "Press any key to close",
            Style::default().fg(Color::DarkGray),
        )));

        let help = Paragraph::new(help_text).wrap(Wrap { trim: true }).block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .style(Style::default().bg(Color::Black)),
        );

        frame.render_widget(help, popup_area);
    }

    fn shortcuts(screen: AppScreen, role: Role) -> (&'static str, Vec<(&'static str, &'static str)>) {
        match screen {
            AppScreen::Appointments => {
                let mut keys = vec![
                    ("↑/k", "Move up"),
                    ("↓/j", "Move down"),
                    ("Enter", "View appointment"),
                    ("/", "Search appointments"),
                    ("r", "Reload the list"),
                ];
                keys.extend(Self::status_keys(role));
                keys.push(("n", "Book a new appointment"));
                keys.push(("?", "Show this help"));
                keys.push(("q", "Quit application"));
                ("Appointments Shortcuts", keys)
            }
            AppScreen::Appointment => {
                let mut keys = vec![
                    ("↑/k", "Scroll up"),
                    ("↓/j", "Scroll down"),
                    ("PgUp", "Page up"),
                    ("PgDn", "Page down"),
                    ("g", "Go to top"),
                    ("G", "Go to bottom"),
                ];
                keys.extend(Self::status_keys(role));
                keys.push(("Esc", "Go back"));
                ("Appointment Shortcuts", keys)
            }
            AppScreen::Booking => (
                "Booking Shortcuts",
                vec![
                    ("Tab", "Next field (details)"),
                    ("←/→", "Pick a time slot or doctor"),
                    ("Enter", "Save field / submit"),
                    ("PgDn", "Next step"),
                    ("PgUp", "Previous step"),
                    ("r", "Start recording"),
                    ("p", "Pause or resume"),
                    ("s", "Stop recording"),
                    ("x", "Discard and record again"),
                    ("a", "Analyze the recording"),
                    ("Esc", "Cancel the booking"),
                ],
            ),
        }
    }

    fn status_keys(role: Role) -> Vec<(&'static str, &'static str)> {
        match role {
            Role::Patient => vec![("x", "Cancel appointment")],
            Role::Doctor | Role::Admin => vec![
                ("c", "Confirm (scheduled)"),
                ("d", "Mark completed"),
                ("x", "Cancel appointment"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_shortcuts_follow_role() {
        let (_, patient) = HelpPopup::shortcuts(AppScreen::Appointments, Role::Patient);
        assert!(patient.iter().any(|(key, _)| *key == "x"));
        assert!(!patient.iter().any(|(key, _)| *key == "c"));

        let (_, doctor) = HelpPopup::shortcuts(AppScreen::Appointment, Role::Doctor);
        assert!(doctor.iter().any(|(key, _)| *key == "c"));
    }
}
