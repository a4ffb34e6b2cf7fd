//! Session state machine
//!
//! Single-writer pattern: every transition goes through `reduce()`, which
//! returns the next state and the effects the session loop must run.
//!
//! ```text
//! Idle ─start─▶ Connecting ─opened─▶ Arming ─capture ok─▶ Recording
//!  ▲                                                          │ stop / 120s
//!  └──────────── turn complete ◀──────── Processing ◀─────────┘
//!
//! any state ─end─▶ Ended (terminal)
//! ```

use std::time::{Duration, Instant};
use uuid::Uuid;

/// Recordings are cut off after this long
pub const MAX_RECORDING: Duration = Duration::from_secs(120);

/// Internal state of the chat session.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, Default)]
pub enum State {
    #[default]
    Idle,
    /// Waiting for the channel to open before capture starts
    Connecting {
        recording_id: Uuid,
    },
    /// Channel open, microphone starting
    Arming {
        recording_id: Uuid,
    },
    Recording {
        recording_id: Uuid,
        started_at: Instant,
    },
    /// Utterance sent; waiting for the agent's turn to complete
    Processing {
        recording_id: Uuid,
    },
    Error {
        message: String,
    },
    /// Chat ended by the user. Terminal.
    Ended,
}

impl State {
    /// Recording id of the workflow in progress, if any
    pub fn recording_id(&self) -> Option<Uuid> {
        match self {
            State::Connecting { recording_id }
            | State::Arming { recording_id }
            | State::Recording { recording_id, .. }
            | State::Processing { recording_id } => Some(*recording_id),
            State::Idle | State::Error { .. } | State::Ended => None,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, State::Recording { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, State::Ended)
    }
}

/// Events that can trigger state transitions.
/// Sent by the user, the channel, the microphone and the playback queue.
#[derive(Debug, Clone)]
pub enum Event {
    /// User asked to record; `channel_open` says whether the channel is already usable
    StartRequested {
        channel_open: bool,
    },
    /// User asked to stop recording
    StopRequested,
    /// User ended the chat
    EndRequested,

    // Channel events (already filtered to the current channel)
    ChannelOpened,
    ChannelFailed {
        err: String,
    },
    ChannelClosed {
        reason: Option<String>,
    },

    // Capture events
    CaptureStartOk {
        id: Uuid,
    },
    CaptureStartFail {
        id: Uuid,
        err: String,
    },
    /// Once a second while recording (includes id to drop stale ticks)
    RecordingTick {
        id: Uuid,
    },

    /// Assistant text finished and every queued chunk has played
    TurnComplete,
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenChannel,
    StartCapture { id: Uuid },
    /// Start forwarding frames of capture `id`
    ArmTransmitter { id: Uuid },
    /// Start sending RecordingTick events every second while recording
    StartRecordingTick { id: Uuid },
    /// Release the microphone and flush frames already captured
    StopCapture { id: Uuid },
    SendStopMarker,
    /// Stop transmitting without a marker (channel is gone)
    AbortTransmit,
    SendEndMarker,
    CloseChannel,
    MarkEnded,
    /// Apply the end-of-session playback policy
    HaltPlayback,
    /// Signal to emit UI state
    EmitUi,
}

fn start(channel_open: bool) -> (State, Vec<Effect>) {
    use Effect::*;

    let id = Uuid::new_v4();
    if channel_open {
        (
            State::Arming { recording_id: id },
            vec![StartCapture { id }, EmitUi],
        )
    } else {
        (
            State::Connecting { recording_id: id },
            vec![OpenChannel, EmitUi],
        )
    }
}

fn stop_recording(recording_id: Uuid) -> (State, Vec<Effect>) {
    use Effect::*;
    (
        State::Processing { recording_id },
        vec![StopCapture { id: recording_id }, SendStopMarker, EmitUi],
    )
}

fn channel_lost(reason: Option<String>) -> String {
    match reason {
        Some(reason) if !reason.is_empty() => format!("Connection closed: {}", reason),
        _ => "Connection closed".to_string(),
    }
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale recording IDs
/// - Nothing leaves Ended
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    match (state, event) {
        // -----------------
        // Ended absorbs everything
        // -----------------
        (Ended, _) => (Ended, vec![]),

        // -----------------
        // End from any live state
        // -----------------
        (_, EndRequested) => {
            let mut effects = vec![MarkEnded];
            match state {
                Arming { recording_id } | Recording { recording_id, .. } => {
                    effects.push(StopCapture { id: *recording_id })
                }
                _ => {}
            }
            effects.extend([SendEndMarker, CloseChannel, HaltPlayback, EmitUi]);
            (Ended, effects)
        }

        // -----------------
        // Start (Idle, Processing and Error accept it)
        // -----------------
        (Idle | Processing { .. } | Error { .. }, StartRequested { channel_open }) => {
            start(channel_open)
        }

        // -----------------
        // Connecting
        // -----------------
        (Connecting { recording_id }, ChannelOpened) => (
            Arming {
                recording_id: *recording_id,
            },
            vec![StartCapture { id: *recording_id }, EmitUi],
        ),
        (Connecting { .. }, ChannelFailed { err }) => (Error { message: err }, vec![EmitUi]),
        (Connecting { .. }, ChannelClosed { reason }) => (
            Error {
                message: channel_lost(reason),
            },
            vec![EmitUi],
        ),
        // Nothing recorded yet; the channel keeps opening for the next start
        (Connecting { .. }, StopRequested) => (Idle, vec![EmitUi]),

        // -----------------
        // Arming
        // -----------------
        (Arming { recording_id }, CaptureStartOk { id }) if *recording_id == id => (
            Recording {
                recording_id: *recording_id,
                started_at: Instant::now(),
            },
            vec![ArmTransmitter { id }, StartRecordingTick { id }, EmitUi],
        ),
        (Arming { recording_id }, CaptureStartFail { id, err }) if *recording_id == id => {
            (Error { message: err }, vec![EmitUi])
        }
        (Arming { recording_id }, ChannelFailed { err }) => (
            Error { message: err },
            vec![StopCapture { id: *recording_id }, EmitUi],
        ),
        (Arming { recording_id }, ChannelClosed { reason }) => (
            Error {
                message: channel_lost(reason),
            },
            vec![StopCapture { id: *recording_id }, EmitUi],
        ),

        // -----------------
        // Recording
        // -----------------
        (Recording { recording_id, .. }, StopRequested) => stop_recording(*recording_id),
        (Recording { recording_id, .. }, ChannelFailed { err }) => (
            Error { message: err },
            vec![StopCapture { id: *recording_id }, AbortTransmit, EmitUi],
        ),
        (Recording { recording_id, .. }, ChannelClosed { reason }) => (
            Error {
                message: channel_lost(reason),
            },
            vec![StopCapture { id: *recording_id }, AbortTransmit, EmitUi],
        ),
        // Tick during recording - update UI and check for max duration
        (
            Recording {
                recording_id,
                started_at,
            },
            RecordingTick { id },
        ) if *recording_id == id => {
            let elapsed = started_at.elapsed();
            if elapsed >= MAX_RECORDING {
                log::warn!(
                    "Recording {} auto-stopped after {:?} (max duration reached)",
                    recording_id,
                    elapsed
                );
                stop_recording(*recording_id)
            } else {
                (state.clone(), vec![EmitUi])
            }
        }

        // -----------------
        // Processing
        // -----------------
        (Processing { .. }, TurnComplete) => (Idle, vec![EmitUi]),
        (Processing { .. }, ChannelFailed { err }) => (Error { message: err }, vec![EmitUi]),
        (Processing { .. }, ChannelClosed { reason }) => (
            Error {
                message: channel_lost(reason),
            },
            vec![EmitUi],
        ),

        // -----------------
        // Idle / Error: channel drops only change what the UI shows
        // -----------------
        (Idle | Error { .. }, ChannelFailed { .. } | ChannelClosed { .. }) => {
            (state.clone(), vec![EmitUi])
        }

        // -----------------
        // Unhandled or stale: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
