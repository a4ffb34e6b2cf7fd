//! UI surface of the session
//!
//! The session loop publishes [`UiUpdate`]s; [`ConsoleUi`] renders them as
//! plain lines on a terminal, streaming assistant text in place as it grows.

use serde::Serialize;
use std::io::Write;

use crate::agent_api::{ChatMessage, Role};
use crate::state_machine::State;

pub const ENDED_MESSAGE: &str = "Chat session has ended. Thank you!";

/// UI state for display.
/// Uses tagged union format: { "status": "idle" } or { "status": "recording", "elapsedSecs": 5 }
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle,
    Connecting,
    Arming,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
    },
    Processing,
    Error {
        message: String,
    },
    Ended,
}

/// Convert internal State to UiState
pub fn state_to_ui(state: &State) -> UiState {
    match state {
        State::Idle => UiState::Idle,
        State::Connecting { .. } => UiState::Connecting,
        State::Arming { .. } => UiState::Arming,
        State::Recording { started_at, .. } => UiState::Recording {
            elapsed_secs: started_at.elapsed().as_secs(),
        },
        State::Processing { .. } => UiState::Processing,
        State::Error { message } => UiState::Error {
            message: message.clone(),
        },
        State::Ended => UiState::Ended,
    }
}

/// Everything the session tells the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiUpdate {
    State(UiState),
    /// The full history, at session start or after the server replaced it
    History(Vec<ChatMessage>),
    /// A finished message appended to the history
    Message(ChatMessage),
    /// Assistant text so far for the open message
    AssistantPartial(String),
    Notice(String),
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Agent",
    }
}

fn status_line(state: &UiState) -> Option<String> {
    let line = match state {
        UiState::Idle => "Ready. Press Enter to talk.".to_string(),
        UiState::Connecting => "Connecting...".to_string(),
        UiState::Arming => "Starting microphone...".to_string(),
        // Ticks arrive every second; only show the start and every 10s
        UiState::Recording { elapsed_secs } if elapsed_secs % 10 == 0 => {
            if *elapsed_secs == 0 {
                "Recording... press Enter to stop.".to_string()
            } else {
                format!("Recording ({}s)...", elapsed_secs)
            }
        }
        UiState::Recording { .. } => return None,
        UiState::Processing => "Thinking...".to_string(),
        UiState::Error { message } => format!("Error: {}", message),
        UiState::Ended => return Some(ENDED_MESSAGE.to_string()),
    };
    Some(format!("[{}]", line))
}

/// Line-oriented terminal renderer
#[derive(Debug, Default)]
pub struct ConsoleUi {
    /// Bytes of the open assistant message already written
    partial_written: usize,
    /// An unterminated assistant line is on screen
    line_open: bool,
    /// Messages already printed, in order
    shown: Vec<ChatMessage>,
}

impl ConsoleUi {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_line(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        if self.line_open {
            writeln!(out)?;
            self.line_open = false;
        }
        Ok(())
    }

    fn write_line(&mut self, out: &mut impl Write, line: &str) -> std::io::Result<()> {
        self.close_line(out)?;
        writeln!(out, "{}", line)
    }

    pub fn render(&mut self, update: &UiUpdate, out: &mut impl Write) -> std::io::Result<()> {
        match update {
            UiUpdate::State(state) => {
                if let Some(line) = status_line(state) {
                    self.write_line(out, &line)?;
                }
            }
            // Only messages not yet on screen are printed
            UiUpdate::History(history) => {
                let tail = if history.starts_with(&self.shown) {
                    &history[self.shown.len()..]
                } else {
                    self.write_line(out, "(conversation updated)")?;
                    &history[..]
                };
                for message in tail {
                    self.write_line(out, &format!("{}: {}", speaker(message.role), message.content))?;
                }
                self.partial_written = 0;
                self.shown = history.clone();
            }
            UiUpdate::AssistantPartial(text) => {
                let suffix = text.get(self.partial_written..).unwrap_or(text.as_str());
                if !self.line_open {
                    if self.partial_written == 0 {
                        write!(out, "Agent: ")?;
                    } else {
                        write!(out, "Agent: ...")?;
                    }
                    self.line_open = true;
                }
                write!(out, "{}", suffix)?;
                self.partial_written = text.len();
            }
            UiUpdate::Message(message) => {
                self.shown.push(message.clone());
                if message.role == Role::Assistant && self.partial_written > 0 {
                    if self.line_open {
                        let rest = message.content.get(self.partial_written..).unwrap_or("");
                        writeln!(out, "{}", rest)?;
                        self.line_open = false;
                    }
                    self.partial_written = 0;
                } else {
                    self.write_line(out, &format!("{}: {}", speaker(message.role), message.content))?;
                }
            }
            UiUpdate::Notice(text) => self.write_line(out, &format!("({})", text))?,
        }
        out.flush()
    }
}
