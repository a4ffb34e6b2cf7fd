//! Session controller
//!
//! Owns everything belonging to one chat and runs the single-threaded event
//! loop that coordinates it. Four sources are multiplexed with `select!`:
//!
//! ```text
//! user commands ──┐
//! channel events ─┼──▶ SessionController ──▶ reduce() ──▶ effects
//! capture frames ─┤          │
//! internal ───────┘          └──▶ UiUpdate stream
//! (ticks, playback done)
//! ```
//!
//! Playback runs on a blocking thread; its completion comes back as an
//! internal event, so the queue's Idle/Playing flag is only ever touched here.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent_api::ChatMessage;
use crate::audio::{AudioFrame, MicrophoneCapture};
use crate::playback::{AudioPlayer, PlaybackError, PlaybackQueue};
use crate::session::Session;
use crate::settings::{ClientSettings, EndPlaybackPolicy};
use crate::state_machine::{reduce, Effect, Event, State};
use crate::streaming::{
    Channel, ChannelEvent, InboundMessageRouter, RouteOutcome, RouteTargets, TranscriptAssembler,
    Transmitter,
};
use crate::ui::{state_to_ui, UiUpdate};

/// Interval of recording ticks
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Commands from the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// Start if not recording, stop if recording
    Toggle,
    Start,
    Stop,
    /// End the chat (the process keeps running)
    End,
    /// End the chat and leave the loop
    Quit,
}

/// Completions reported back to the loop
#[derive(Debug)]
enum Internal {
    Tick {
        id: Uuid,
    },
    PlaybackFinished {
        batch_id: u64,
        result: Result<(), PlaybackError>,
    },
}

/// Session behaviour knobs, taken from [`ClientSettings`]
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Endpoint handed to `Channel::open`
    pub endpoint: String,
    pub frame_queue_capacity: usize,
    pub auto_restart_after_playback: bool,
    pub end_playback_policy: EndPlaybackPolicy,
}

impl ControllerConfig {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            endpoint: settings.stream_endpoint(),
            frame_queue_capacity: settings.frame_queue_capacity.max(1),
            auto_restart_after_playback: settings.auto_restart_after_playback,
            end_playback_policy: settings.end_playback_policy,
        }
    }
}

pub struct SessionController {
    config: ControllerConfig,
    state: State,
    session: Session,

    channel: Box<dyn Channel>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    transmitter: Transmitter,
    router: InboundMessageRouter,
    assembler: TranscriptAssembler,

    microphone: Box<dyn MicrophoneCapture>,
    frame_tx: mpsc::Sender<AudioFrame>,
    frame_rx: mpsc::Receiver<AudioFrame>,

    queue: PlaybackQueue,
    player: Arc<dyn AudioPlayer>,
    playback_cancel: Option<CancellationToken>,
    playback_task: Option<JoinHandle<()>>,

    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    tick_task: Option<JoinHandle<()>>,

    ui_tx: mpsc::UnboundedSender<UiUpdate>,

    /// `end_of_llm` seen for the current turn
    llm_done: bool,
    quit_requested: bool,
}

impl SessionController {
    /// Build a controller. The returned receiver carries every UI update.
    pub fn new(
        config: ControllerConfig,
        session: Session,
        channel: Box<dyn Channel>,
        channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        microphone: Box<dyn MicrophoneCapture>,
        player: Arc<dyn AudioPlayer>,
    ) -> (Self, mpsc::UnboundedReceiver<UiUpdate>) {
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue_capacity.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let controller = Self {
            config,
            state: State::default(),
            session,
            channel,
            channel_rx,
            transmitter: Transmitter::new(),
            router: InboundMessageRouter::new(),
            assembler: TranscriptAssembler::new(),
            microphone,
            frame_tx,
            frame_rx,
            queue: PlaybackQueue::new(),
            player,
            playback_cancel: None,
            playback_task: None,
            internal_tx,
            internal_rx,
            tick_task: None,
            ui_tx,
            llm_done: false,
            quit_requested: false,
        };
        (controller, ui_rx)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    /// Seed the history (loaded from the server before the loop starts)
    pub fn load_history(&mut self, history: Vec<ChatMessage>) {
        log::info!("Controller: loaded {} history messages", history.len());
        self.session.replace_history(history.clone());
        self.emit(UiUpdate::History(history));
    }

    /// Show an informational line
    pub fn notice(&self, text: impl Into<String>) {
        self.emit(UiUpdate::Notice(text.into()));
    }

    /// Publish the initial state
    pub fn announce(&self) {
        self.emit_state();
    }

    /// Run until `Quit` (or the command stream closes). Returns the finished session.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<UserCommand>) -> Session {
        log::info!("Controller: session {} started", self.session.id());
        self.announce();

        let mut commands_open = true;
        while !(self.quit_requested && self.is_quiescent()) {
            tokio::select! {
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        commands_open = false;
                        self.handle_command(UserCommand::Quit);
                    }
                },
                Some(event) = self.channel_rx.recv() => self.handle_channel_event(event),
                Some(frame) = self.frame_rx.recv() => self.handle_frame(frame),
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
            }
            self.settle();
        }

        self.shutdown();
        log::info!("Controller: session loop ended");
        self.session
    }

    /// Wait for and handle one event from the channel, capture or internal sources.
    /// Returns `false` if every source is closed.
    pub async fn step(&mut self) -> bool {
        tokio::select! {
            Some(event) = self.channel_rx.recv() => self.handle_channel_event(event),
            Some(frame) = self.frame_rx.recv() => self.handle_frame(frame),
            Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
            else => return false,
        }
        self.settle();
        true
    }

    /// Handle a user command immediately
    pub fn handle_command(&mut self, cmd: UserCommand) {
        log::debug!("Controller: command {:?}", cmd);
        match cmd {
            UserCommand::Toggle if self.state.is_recording() => self.process(Event::StopRequested),
            UserCommand::Toggle | UserCommand::Start => self.request_start(),
            UserCommand::Stop => self.process(Event::StopRequested),
            UserCommand::End => self.process(Event::EndRequested),
            UserCommand::Quit => {
                self.process(Event::EndRequested);
                self.quit_requested = true;
            }
        }
        self.settle();
    }

    fn request_start(&mut self) {
        let channel_open = self.channel.is_open();
        self.process(Event::StartRequested { channel_open });
    }

    /// Nothing left that must finish before the loop may exit
    fn is_quiescent(&self) -> bool {
        match self.config.end_playback_policy {
            EndPlaybackPolicy::Discard => true,
            EndPlaybackPolicy::Finish => {
                self.queue.playing_batch().is_none() && self.queue.is_empty()
            }
        }
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        self.apply_channel_event(event);
        // Consume everything already delivered before any drain starts
        while let Ok(event) = self.channel_rx.try_recv() {
            self.apply_channel_event(event);
        }
    }

    fn apply_channel_event(&mut self, event: ChannelEvent) {
        if !self.channel.apply(&event) {
            return;
        }

        match event {
            ChannelEvent::Opened { .. } => self.process(Event::ChannelOpened),
            ChannelEvent::Failed { err, .. } | ChannelEvent::Errored { err, .. } => {
                self.process(Event::ChannelFailed { err })
            }
            ChannelEvent::Closed { reason, .. } => self.process(Event::ChannelClosed { reason }),
            ChannelEvent::Message { text, .. } => {
                let targets = RouteTargets {
                    session: &mut self.session,
                    assembler: &mut self.assembler,
                    queue: &mut self.queue,
                };
                let outcome = self.router.route_text(&text, targets);
                self.handle_route_outcome(outcome);
            }
            ChannelEvent::Inbound { event, .. } => {
                let targets = RouteTargets {
                    session: &mut self.session,
                    assembler: &mut self.assembler,
                    queue: &mut self.queue,
                };
                let outcome = self.router.dispatch(event, targets);
                self.handle_route_outcome(outcome);
            }
        }
    }

    fn handle_route_outcome(&mut self, outcome: RouteOutcome) {
        match outcome {
            RouteOutcome::UserMessage(message) => self.emit(UiUpdate::Message(message)),
            RouteOutcome::AssistantText(text) => self.emit(UiUpdate::AssistantPartial(text)),
            RouteOutcome::AssistantFinished(message) => {
                self.llm_done = true;
                if let Some(message) = message {
                    self.emit(UiUpdate::Message(message));
                }
            }
            RouteOutcome::HistoryReplaced(history) => {
                log::debug!("Controller: history replaced ({} messages)", history.len());
                self.emit(UiUpdate::History(history));
            }
            RouteOutcome::AudioQueued { .. }
            | RouteOutcome::AudioComplete { .. }
            | RouteOutcome::Dropped(_) => {}
        }
    }

    fn handle_frame(&mut self, frame: AudioFrame) {
        self.transmitter.send_frame(self.channel.as_mut(), frame);
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Tick { id } => self.process(Event::RecordingTick { id }),
            Internal::PlaybackFinished { batch_id, result } => {
                if let Err(e) = result {
                    log::warn!("Controller: playback of batch {} failed: {}", batch_id, e);
                }
                if self.queue.playing_batch() == Some(batch_id) {
                    self.playback_cancel = None;
                    self.playback_task = None;
                }
                self.queue.finish_drain(batch_id);
            }
        }
    }

    /// Post-event housekeeping: start a scheduled drain, detect turn completion
    fn settle(&mut self) {
        if self.queue.drain_scheduled() {
            self.start_drain();
        }

        if matches!(self.state, State::Processing { .. }) && self.llm_done && self.queue.is_settled()
        {
            self.llm_done = false;
            self.process(Event::TurnComplete);

            if self.config.auto_restart_after_playback && !self.session.is_ended() {
                log::info!("Controller: auto-restarting recording");
                self.request_start();
            }
        }
    }

    fn start_drain(&mut self) {
        let Some(batch) = self.queue.begin_drain() else {
            return;
        };

        log::info!(
            "Controller: playing batch {} ({} chunks, {} bytes)",
            batch.id,
            batch.chunk_count(),
            batch.byte_len()
        );

        let cancel = CancellationToken::new();
        self.playback_cancel = Some(cancel.clone());

        let player = self.player.clone();
        let tx = self.internal_tx.clone();
        let batch_id = batch.id;
        let chunks = batch.chunks;

        self.playback_task = Some(tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || player.play(&chunks, &cancel))
                .await
                .unwrap_or_else(|e| Err(PlaybackError::Output(format!("playback task failed: {}", e))));
            let _ = tx.send(Internal::PlaybackFinished { batch_id, result });
        }));
    }

    // ========================================================================
    // Reducer + effects
    // ========================================================================

    /// Feed an event through the reducer, including any follow-up events its
    /// effects produce, in order
    fn process(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            log::debug!("Controller: event {:?}", event);

            let old_discriminant = std::mem::discriminant(&self.state);
            let (next, effects) = reduce(&self.state, event);
            if old_discriminant != std::mem::discriminant(&next) {
                log::info!("State transition: {:?} -> {:?}", self.state, next);
            }
            self.state = next;

            for effect in effects {
                self.run_effect(effect, &mut pending);
            }
        }
    }

    fn run_effect(&mut self, effect: Effect, pending: &mut VecDeque<Event>) {
        match effect {
            Effect::OpenChannel => {
                self.channel.open(&self.config.endpoint);
                if self.channel.is_open() {
                    pending.push_back(Event::ChannelOpened);
                }
            }
            Effect::StartCapture { id } => {
                // Frames left over from an earlier capture are stale
                while self.frame_rx.try_recv().is_ok() {}

                match self.microphone.start(id, self.frame_tx.clone()) {
                    Ok(()) => pending.push_back(Event::CaptureStartOk { id }),
                    Err(e) => {
                        log::error!("Controller: microphone start failed: {}", e);
                        pending.push_back(Event::CaptureStartFail {
                            id,
                            err: e.to_string(),
                        });
                    }
                }
            }
            Effect::ArmTransmitter { id } => {
                self.transmitter.begin(id);
                self.llm_done = false;
                self.queue.begin_turn();
            }
            Effect::StartRecordingTick { id } => self.start_tick(id),
            Effect::StopCapture { id } => {
                self.stop_tick();
                self.microphone.stop();
                // Frames captured before stop still belong to the utterance
                while let Ok(frame) = self.frame_rx.try_recv() {
                    if frame.capture_id == id {
                        self.transmitter.send_frame(self.channel.as_mut(), frame);
                    }
                }
            }
            Effect::SendStopMarker => {
                self.transmitter.stop(self.channel.as_mut());
            }
            Effect::AbortTransmit => self.transmitter.abort(),
            Effect::SendEndMarker => {
                self.transmitter.end(self.channel.as_mut());
            }
            Effect::CloseChannel => self.channel.close(),
            Effect::MarkEnded => self.session.mark_ended(),
            Effect::HaltPlayback => self.halt_playback(),
            Effect::EmitUi => self.emit_state(),
        }
    }

    fn halt_playback(&mut self) {
        self.assembler.discard();
        match self.config.end_playback_policy {
            EndPlaybackPolicy::Discard => {
                if let Some(batch_id) = self.queue.discard() {
                    log::info!("Controller: cancelling playback of batch {}", batch_id);
                }
                if let Some(cancel) = self.playback_cancel.take() {
                    cancel.cancel();
                }
            }
            EndPlaybackPolicy::Finish => self.queue.seal(),
        }
    }

    fn start_tick(&mut self, id: Uuid) {
        self.stop_tick();
        let tx = self.internal_tx.clone();
        self.tick_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(Internal::Tick { id }).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_tick(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
    }

    fn emit_state(&self) {
        self.emit(UiUpdate::State(state_to_ui(&self.state)));
    }

    fn emit(&self, update: UiUpdate) {
        // The UI may have gone away; the session carries on regardless
        let _ = self.ui_tx.send(update);
    }

    fn shutdown(&mut self) {
        self.stop_tick();
        self.microphone.stop();
        self.channel.close();
        if let Some(cancel) = self.playback_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
    }
}
