//! Outbound audio and control markers
//!
//! Frames are forwarded only while Recording and only to an Open channel;
//! anything else is dropped, never buffered. One `stop` marker is sent per
//! recording and one `end` marker per session.

use uuid::Uuid;

use super::channel::Channel;
use super::protocol::{ControlMarker, OutboundPayload};
use crate::audio::AudioFrame;

/// Whether microphone frames are currently being transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    /// Stop requested; the stop marker has not been sent yet
    Stopping,
}

/// Forwards frames and control markers over the session's channel
#[derive(Debug, Default)]
pub struct Transmitter {
    state: RecordingState,
    capture_id: Option<Uuid>,
    frames_sent: u64,
    frames_dropped: u64,
    end_sent: bool,
}

impl Transmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Start transmitting frames from `capture_id`
    pub fn begin(&mut self, capture_id: Uuid) {
        if self.end_sent {
            log::warn!("Transmitter: ignoring begin after session end");
            return;
        }
        self.state = RecordingState::Recording;
        self.capture_id = Some(capture_id);
        self.frames_sent = 0;
        self.frames_dropped = 0;
    }

    /// Forward one frame as a binary payload.
    ///
    /// Returns `false` (frame dropped) unless Recording, the frame belongs to
    /// the current capture, and the channel is Open.
    pub fn send_frame(&mut self, channel: &mut dyn Channel, frame: AudioFrame) -> bool {
        let current = self.state == RecordingState::Recording
            && self.capture_id == Some(frame.capture_id);

        if current && channel.is_open() && channel.send(OutboundPayload::Audio(frame.pcm)) {
            self.frames_sent += 1;
            return true;
        }

        self.frames_dropped += 1;
        if self.frames_dropped % 10 == 1 {
            log::debug!(
                "Transmitter: dropped frame {} ({} dropped this recording)",
                frame.sequence,
                self.frames_dropped
            );
        }
        false
    }

    /// End the utterance: send exactly one `stop` marker.
    ///
    /// Returns whether a marker was sent.
    pub fn stop(&mut self, channel: &mut dyn Channel) -> bool {
        if self.state != RecordingState::Recording {
            return false;
        }
        self.state = RecordingState::Stopping;
        let sent = channel.send(OutboundPayload::Control(ControlMarker::Stop));
        log::info!(
            "Transmitter: recording stopped after {} frames ({} dropped), stop marker sent: {}",
            self.frames_sent,
            self.frames_dropped,
            sent
        );
        self.state = RecordingState::Idle;
        self.capture_id = None;
        sent
    }

    /// Stop transmitting without a marker (the channel is gone)
    pub fn abort(&mut self) {
        if self.state != RecordingState::Idle {
            log::info!("Transmitter: recording aborted");
        }
        self.state = RecordingState::Idle;
        self.capture_id = None;
    }

    /// End the session: send exactly one `end` marker.
    ///
    /// Returns whether a marker was sent.
    pub fn end(&mut self, channel: &mut dyn Channel) -> bool {
        if self.end_sent {
            return false;
        }
        self.end_sent = true;
        self.state = RecordingState::Idle;
        self.capture_id = None;
        channel.send(OutboundPayload::Control(ControlMarker::End))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::streaming::channel::{ChannelEvent, ConnectionState};

    /// Channel double that records what was sent
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        pub state: ConnectionState,
        pub sent: Vec<OutboundPayload>,
    }

    impl RecordingChannel {
        pub(crate) fn open() -> Self {
            Self {
                state: ConnectionState::Open,
                sent: Vec::new(),
            }
        }
    }

    impl Channel for RecordingChannel {
        fn open(&mut self, _endpoint: &str) -> Uuid {
            self.state = ConnectionState::Open;
            Uuid::new_v4()
        }

        fn apply(&mut self, _event: &ChannelEvent) -> bool {
            true
        }

        fn state(&self) -> ConnectionState {
            self.state
        }

        fn send(&mut self, payload: OutboundPayload) -> bool {
            if self.state != ConnectionState::Open {
                return false;
            }
            self.sent.push(payload);
            true
        }

        fn close(&mut self) {
            self.state = ConnectionState::Closed;
        }
    }

    fn frame(capture_id: Uuid, sequence: u64) -> AudioFrame {
        AudioFrame {
            capture_id,
            sequence,
            pcm: vec![sequence as u8; 8192],
        }
    }

    #[test]
    fn test_frames_sent_in_order_while_recording() {
        let mut channel = RecordingChannel::open();
        let mut tx = Transmitter::new();
        let id = Uuid::new_v4();
        tx.begin(id);

        for seq in 0..3 {
            assert!(tx.send_frame(&mut channel, frame(id, seq)));
        }

        assert_eq!(tx.frames_sent(), 3);
        let sent: Vec<u8> = channel
            .sent
            .iter()
            .map(|p| match p {
                OutboundPayload::Audio(pcm) => {
                    assert_eq!(pcm.len(), 8192);
                    pcm[0]
                }
                other => panic!("unexpected payload {:?}", other),
            })
            .collect();
        assert_eq!(sent, vec![0, 1, 2]);
    }

    #[test]
    fn test_frames_dropped_when_idle() {
        let mut channel = RecordingChannel::open();
        let mut tx = Transmitter::new();

        assert!(!tx.send_frame(&mut channel, frame(Uuid::new_v4(), 0)));
        assert!(channel.sent.is_empty());
        assert_eq!(tx.frames_dropped(), 1);
    }

    #[test]
    fn test_frames_dropped_when_channel_not_open() {
        let mut channel = RecordingChannel::default();
        let mut tx = Transmitter::new();
        let id = Uuid::new_v4();
        tx.begin(id);

        assert!(!tx.send_frame(&mut channel, frame(id, 0)));
        assert!(channel.sent.is_empty());
    }

    #[test]
    fn test_stale_capture_frames_dropped() {
        let mut channel = RecordingChannel::open();
        let mut tx = Transmitter::new();
        tx.begin(Uuid::new_v4());

        assert!(!tx.send_frame(&mut channel, frame(Uuid::new_v4(), 0)));
        assert!(channel.sent.is_empty());
    }

    #[test]
    fn test_exactly_one_stop_marker() {
        let mut channel = RecordingChannel::open();
        let mut tx = Transmitter::new();
        let id = Uuid::new_v4();
        tx.begin(id);

        assert!(tx.stop(&mut channel));
        assert!(!tx.stop(&mut channel));
        assert_eq!(tx.state(), RecordingState::Idle);
        assert_eq!(
            channel.sent,
            vec![OutboundPayload::Control(ControlMarker::Stop)]
        );

        // Frames after stop are dropped
        assert!(!tx.send_frame(&mut channel, frame(id, 5)));
        assert_eq!(channel.sent.len(), 1);
    }

    #[test]
    fn test_abort_sends_nothing() {
        let mut channel = RecordingChannel::open();
        let mut tx = Transmitter::new();
        tx.begin(Uuid::new_v4());
        tx.abort();

        assert_eq!(tx.state(), RecordingState::Idle);
        assert!(!tx.stop(&mut channel));
        assert!(channel.sent.is_empty());
    }

    #[test]
    fn test_exactly_one_end_marker() {
        let mut channel = RecordingChannel::open();
        let mut tx = Transmitter::new();
        let id = Uuid::new_v4();
        tx.begin(id);

        assert!(tx.end(&mut channel));
        assert!(!tx.end(&mut channel));
        assert_eq!(channel.sent, vec![OutboundPayload::Control(ControlMarker::End)]);

        // Nothing restarts after end
        tx.begin(id);
        assert_eq!(tx.state(), RecordingState::Idle);
        assert!(!tx.send_frame(&mut channel, frame(id, 0)));
    }
}
