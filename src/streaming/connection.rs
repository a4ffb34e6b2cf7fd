//! WebSocket channel to the voice agent
//!
//! Manages the WebSocket lifecycle for one session.
//!
//! # Connection Flow
//!
//! 1. `open()` - Spawn the channel task; state becomes Connecting
//! 2. Task connects and emits `Opened` (or `Failed`)
//! 3. `send()` - Queue binary audio or text control frames (Open only)
//! 4. Task forwards every inbound text frame as `Message`, in arrival order
//! 5. `close()` - Flush queued frames, send a close frame, stop the task
//!
//! Audio goes through a bounded queue and is dropped when it is full. Control
//! markers and the close request use a separate queue that never drops, and
//! each is written only after the audio queued before it.
//!
//! # Reconnection
//!
//! None. A closed or errored channel stays down until the user starts a new
//! recording, which opens a fresh channel.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use super::channel::{Channel, ChannelEvent, ChannelStatus, ConnectionState};
use super::protocol::OutboundPayload;
use super::StreamingError;

/// Connection timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Audio frames waiting for the socket; beyond this, audio is dropped
const OUTBOUND_CAPACITY: usize = 64;

/// Control frames ride their own unbounded queue and are never dropped.
/// `after` is how many audio frames had been queued when the control frame
/// was sent; the task writes at least that many first.
struct Control {
    after: u64,
    frame: ControlFrame,
}

enum ControlFrame {
    Marker(Message),
    Close,
}

struct Outbound {
    audio: mpsc::Sender<Message>,
    control: mpsc::UnboundedSender<Control>,
    audio_queued: u64,
}

/// Owns the session's single WebSocket channel
pub struct ConnectionManager {
    status: ChannelStatus,
    outbound: Option<Outbound>,
    task: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    frames_dropped: u64,
}

impl ConnectionManager {
    /// Create a manager that reports channel events on `events`
    pub fn new(events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            status: ChannelStatus::default(),
            outbound: None,
            task: None,
            events,
            frames_dropped: 0,
        }
    }

    /// Audio frames dropped because the outbound queue was full
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

impl Channel for ConnectionManager {
    fn open(&mut self, endpoint: &str) -> Uuid {
        if let Some(id) = self.status.live_channel() {
            log::debug!("Connection: channel {} already live, reusing", id);
            return id;
        }

        // Drop any leftover task from a closed channel
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let channel_id = self.status.begin_connecting();
        let (audio_tx, audio_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.outbound = Some(Outbound {
            audio: audio_tx,
            control: control_tx,
            audio_queued: 0,
        });

        log::info!("Connection: opening {} ({})", endpoint, channel_id);
        self.task = Some(tokio::spawn(run_channel(
            channel_id,
            endpoint.to_string(),
            audio_rx,
            control_rx,
            self.events.clone(),
        )));

        channel_id
    }

    fn apply(&mut self, event: &ChannelEvent) -> bool {
        let current = self.status.apply(event);
        if current {
            match event {
                ChannelEvent::Opened { channel_id } => {
                    log::info!("Connection: channel {} open", channel_id)
                }
                ChannelEvent::Failed { err, .. } => {
                    log::warn!("Connection: failed to open: {}", err);
                    self.outbound = None;
                }
                ChannelEvent::Errored { err, .. } => {
                    log::warn!("Connection: channel error: {}", err);
                    self.outbound = None;
                }
                ChannelEvent::Closed { reason, .. } => {
                    log::info!("Connection: channel closed ({:?})", reason);
                    self.outbound = None;
                }
                _ => {}
            }
        }
        current
    }

    fn state(&self) -> ConnectionState {
        self.status.state()
    }

    fn send(&mut self, payload: OutboundPayload) -> bool {
        if self.status.state() != ConnectionState::Open {
            return false;
        }
        let Some(outbound) = self.outbound.as_mut() else {
            return false;
        };

        match payload {
            OutboundPayload::Audio(bytes) => match outbound.audio.try_send(Message::Binary(bytes)) {
                Ok(()) => {
                    outbound.audio_queued += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.frames_dropped += 1;
                    log::debug!(
                        "Connection: outbound queue full, dropped audio frame ({} total)",
                        self.frames_dropped
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            OutboundPayload::Control(marker) => outbound
                .control
                .send(Control {
                    after: outbound.audio_queued,
                    frame: ControlFrame::Marker(Message::Text(marker.as_str().to_string())),
                })
                .is_ok(),
        }
    }

    fn close(&mut self) {
        let Some(channel_id) = self.status.channel_id() else {
            return;
        };

        log::info!("Connection: closing channel {}", channel_id);
        let handed_over = match self.outbound.take() {
            Some(outbound) => outbound
                .control
                .send(Control {
                    after: outbound.audio_queued,
                    frame: ControlFrame::Close,
                })
                .is_ok(),
            None => false,
        };
        // The task is gone or never connected; nothing left to flush
        if !handed_over {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
        self.status.mark_closed();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Background task owning the socket for one channel
async fn run_channel(
    channel_id: Uuid,
    endpoint: String,
    mut audio: mpsc::Receiver<Message>,
    mut control: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let connected = timeout(CONNECTION_TIMEOUT, connect_async(endpoint.as_str()))
        .await
        .map_err(|_| StreamingError::ConnectionFailed("Connection timeout".to_string()))
        .and_then(|r| r.map_err(|e| StreamingError::ConnectionFailed(e.to_string())));

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            let _ = events.send(ChannelEvent::Failed {
                channel_id,
                err: e.to_string(),
            });
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    if events.send(ChannelEvent::Opened { channel_id }).is_err() {
        return;
    }

    let mut audio_written = 0u64;
    let send_failed = |e: tokio_tungstenite::tungstenite::Error| ChannelEvent::Errored {
        channel_id,
        err: StreamingError::SendFailed(e.to_string()).to_string(),
    };

    'session: loop {
        tokio::select! {
            biased;

            command = control.recv() => {
                let Some(Control { after, frame }) = command else {
                    // Manager dropped without closing
                    let _ = write.close().await;
                    break;
                };

                // Audio queued before this control frame goes out first
                while audio_written < after {
                    let Some(message) = audio.recv().await else {
                        break;
                    };
                    if let Err(e) = write.send(message).await {
                        let _ = events.send(send_failed(e));
                        break 'session;
                    }
                    audio_written += 1;
                }

                match frame {
                    ControlFrame::Marker(message) => {
                        if let Err(e) = write.send(message).await {
                            let _ = events.send(send_failed(e));
                            break;
                        }
                    }
                    ControlFrame::Close => {
                        if let Err(e) = write.close().await {
                            log::debug!("Connection: error sending close frame: {}", e);
                        }
                        let _ = events.send(ChannelEvent::Closed {
                            channel_id,
                            reason: Some("closed by client".to_string()),
                        });
                        break;
                    }
                }
            }
            Some(message) = audio.recv() => {
                if let Err(e) = write.send(message).await {
                    let _ = events.send(send_failed(e));
                    break;
                }
                audio_written += 1;
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events
                        .send(ChannelEvent::Message { channel_id, text: text.to_string() })
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = events.send(ChannelEvent::Closed {
                        channel_id,
                        reason: frame.map(|f| f.reason.to_string()),
                    });
                    break;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    log::debug!("Connection: ignoring {} byte binary frame", bytes.len());
                }
                Some(Ok(_)) => {} // ping/pong
                Some(Err(e)) => {
                    let _ = events.send(ChannelEvent::Errored {
                        channel_id,
                        err: StreamingError::ProtocolError(e.to_string()).to_string(),
                    });
                    break;
                }
                None => {
                    let _ = events.send(ChannelEvent::Closed {
                        channel_id,
                        reason: Some(
                            StreamingError::Disconnected("stream ended".to_string()).to_string(),
                        ),
                    });
                    break;
                }
            },
        }
    }

    log::debug!("Connection: channel task {} exiting", channel_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::protocol::ControlMarker;

    #[tokio::test]
    async fn test_send_before_open_is_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = ConnectionManager::new(tx);

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.send(OutboundPayload::Audio(vec![0; 16])));
        assert!(!conn.send(OutboundPayload::Control(ControlMarker::Stop)));
    }

    #[tokio::test]
    async fn test_open_refused_reports_failure() {
        // Bind then drop a listener to get a port nobody is listening on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = ConnectionManager::new(tx);
        let id = conn.open(&format!("ws://{}/ws/audio", addr));
        assert_eq!(conn.state(), ConnectionState::Connecting);

        // Still connecting: sends are dropped
        assert!(!conn.send(OutboundPayload::Audio(vec![1, 2])));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::Failed { channel_id, .. } if channel_id == id));
        assert!(conn.apply(&event));
        assert_eq!(conn.state(), ConnectionState::Errored);
        assert!(!conn.send(OutboundPayload::Audio(vec![1, 2])));
    }

    /// Accept one WebSocket connection and collect what the client sends
    async fn spawn_sink() -> (String, JoinHandle<Vec<Message>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/ws/audio", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                let is_close = message.is_close();
                received.push(message);
                if is_close {
                    break;
                }
            }
            received
        });
        (endpoint, handle)
    }

    async fn open_to(endpoint: &str) -> (ConnectionManager, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = ConnectionManager::new(tx);
        let id = conn.open(endpoint);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::Opened { channel_id } if channel_id == id));
        assert!(conn.apply(&event));
        (conn, rx)
    }

    #[tokio::test]
    async fn test_markers_survive_full_audio_queue() {
        let (endpoint, sink) = spawn_sink().await;
        let (mut conn, _rx) = open_to(&endpoint).await;

        // No await between sends: the channel task cannot drain the queue
        for i in 0..OUTBOUND_CAPACITY {
            assert!(conn.send(OutboundPayload::Audio(vec![i as u8; 4])));
        }
        assert!(!conn.send(OutboundPayload::Audio(vec![0xEE; 4])));
        assert_eq!(conn.frames_dropped(), 1);

        assert!(conn.send(OutboundPayload::Control(ControlMarker::Stop)));
        assert!(conn.send(OutboundPayload::Control(ControlMarker::End)));
        conn.close();

        let received = tokio::time::timeout(Duration::from_secs(10), sink)
            .await
            .expect("sink never saw the close frame")
            .unwrap();

        assert_eq!(received.len(), OUTBOUND_CAPACITY + 3);
        for (i, message) in received[..OUTBOUND_CAPACITY].iter().enumerate() {
            assert_eq!(message, &Message::Binary(vec![i as u8; 4]));
        }
        assert_eq!(received[OUTBOUND_CAPACITY], Message::Text("stop".to_string()));
        assert_eq!(received[OUTBOUND_CAPACITY + 1], Message::Text("end".to_string()));
        assert!(received[OUTBOUND_CAPACITY + 2].is_close());
    }

    #[tokio::test]
    async fn test_marker_follows_audio_queued_before_it() {
        let (endpoint, sink) = spawn_sink().await;
        let (mut conn, _rx) = open_to(&endpoint).await;

        assert!(conn.send(OutboundPayload::Audio(vec![1])));
        assert!(conn.send(OutboundPayload::Audio(vec![2])));
        assert!(conn.send(OutboundPayload::Control(ControlMarker::Stop)));
        assert!(conn.send(OutboundPayload::Audio(vec![3])));
        conn.close();

        let received = tokio::time::timeout(Duration::from_secs(10), sink)
            .await
            .expect("sink never saw the close frame")
            .unwrap();
        let stop_at = received
            .iter()
            .position(|m| m == &Message::Text("stop".to_string()))
            .unwrap();
        assert_eq!(
            received[..stop_at],
            [Message::Binary(vec![1]), Message::Binary(vec![2])]
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = ConnectionManager::new(tx);
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
