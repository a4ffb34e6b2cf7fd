//! Channel abstraction shared by both transports
//!
//! A channel is opened asynchronously: `open()` returns immediately with a
//! fresh channel id, and the outcome arrives later as a [`ChannelEvent`] on
//! the session loop. Events carry the channel id so that anything emitted by
//! a previous channel is recognized as stale and ignored.

use serde::Serialize;
use uuid::Uuid;

use super::protocol::{InboundEvent, OutboundPayload};

/// Lifecycle of the session's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Events emitted by a channel's background task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { channel_id: Uuid },
    Failed { channel_id: Uuid, err: String },
    /// Raw text frame, still to be parsed by the router
    Message { channel_id: Uuid, text: String },
    /// Already-decoded event (request/response transport)
    Inbound { channel_id: Uuid, event: InboundEvent },
    Closed { channel_id: Uuid, reason: Option<String> },
    Errored { channel_id: Uuid, err: String },
}

impl ChannelEvent {
    pub fn channel_id(&self) -> Uuid {
        match self {
            ChannelEvent::Opened { channel_id }
            | ChannelEvent::Failed { channel_id, .. }
            | ChannelEvent::Message { channel_id, .. }
            | ChannelEvent::Inbound { channel_id, .. }
            | ChannelEvent::Closed { channel_id, .. }
            | ChannelEvent::Errored { channel_id, .. } => *channel_id,
        }
    }
}

/// A bidirectional channel to the agent.
///
/// `send` is best-effort: it is a silent no-op returning `false` unless the
/// channel is Open. `close` is immediate and idempotent.
pub trait Channel: Send {
    /// Begin opening a channel. If one is already Open or Connecting, its id is returned.
    fn open(&mut self, endpoint: &str) -> Uuid;
    /// Fold a channel event into the connection state.
    /// Returns `false` if the event belongs to a previous channel.
    fn apply(&mut self, event: &ChannelEvent) -> bool;
    fn state(&self) -> ConnectionState;
    fn send(&mut self, payload: OutboundPayload) -> bool;
    fn close(&mut self);

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}

/// Connection state bookkeeping shared by channel implementations
#[derive(Debug, Default)]
pub struct ChannelStatus {
    state: ConnectionState,
    channel_id: Option<Uuid>,
}

impl ChannelStatus {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        self.channel_id
    }

    /// Current channel id if Open or Connecting
    pub fn live_channel(&self) -> Option<Uuid> {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => self.channel_id,
            _ => None,
        }
    }

    pub fn begin_connecting(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.state = ConnectionState::Connecting;
        self.channel_id = Some(id);
        id
    }

    pub fn mark_closed(&mut self) {
        if self.channel_id.is_some() {
            self.state = ConnectionState::Closed;
        }
        self.channel_id = None;
    }

    pub fn apply(&mut self, event: &ChannelEvent) -> bool {
        if self.channel_id != Some(event.channel_id()) {
            log::debug!("Channel: ignoring stale event {:?}", event);
            return false;
        }

        match event {
            ChannelEvent::Opened { .. } => self.state = ConnectionState::Open,
            ChannelEvent::Failed { .. } | ChannelEvent::Errored { .. } => {
                self.state = ConnectionState::Errored;
                self.channel_id = None;
            }
            ChannelEvent::Closed { .. } => {
                self.state = ConnectionState::Closed;
                self.channel_id = None;
            }
            ChannelEvent::Message { .. } | ChannelEvent::Inbound { .. } => {}
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lifecycle() {
        let mut status = ChannelStatus::default();
        assert_eq!(status.state(), ConnectionState::Disconnected);

        let id = status.begin_connecting();
        assert_eq!(status.state(), ConnectionState::Connecting);
        assert_eq!(status.live_channel(), Some(id));

        assert!(status.apply(&ChannelEvent::Opened { channel_id: id }));
        assert_eq!(status.state(), ConnectionState::Open);

        assert!(status.apply(&ChannelEvent::Closed {
            channel_id: id,
            reason: None
        }));
        assert_eq!(status.state(), ConnectionState::Closed);
        assert_eq!(status.live_channel(), None);
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let mut status = ChannelStatus::default();
        let old = status.begin_connecting();
        status.mark_closed();
        let current = status.begin_connecting();

        assert!(!status.apply(&ChannelEvent::Opened { channel_id: old }));
        assert_eq!(status.state(), ConnectionState::Connecting);

        assert!(status.apply(&ChannelEvent::Failed {
            channel_id: current,
            err: "refused".to_string()
        }));
        assert_eq!(status.state(), ConnectionState::Errored);
    }

    #[test]
    fn test_close_without_channel_keeps_state() {
        let mut status = ChannelStatus::default();
        status.mark_closed();
        assert_eq!(status.state(), ConnectionState::Disconnected);
    }
}
