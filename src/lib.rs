pub mod agent_api;
pub mod audio;
pub mod controller;
pub mod playback;
pub mod session;
pub mod settings;
pub mod state_machine;
pub mod streaming;
pub mod transport;
pub mod ui;

use clap::Parser;
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_api::AgentApi;
use audio::CpalMicrophone;
use controller::{ControllerConfig, SessionController, UserCommand};
use playback::{AudioPlayer, CpalPlayer};
use session::Session;
use settings::{load_settings, save_settings, ClientSettings, EndPlaybackPolicy};
use transport::{build_channel, TransportMode};
use ui::{ConsoleUi, UiUpdate};

/// Talk to a voice agent from the terminal
#[derive(Debug, Parser)]
#[command(name = "voice-chat", version, about)]
struct Cli {
    /// Agent server base URL (http:// or https://)
    #[arg(long)]
    server_url: Option<String>,

    #[arg(long, value_enum)]
    transport: Option<TransportMode>,

    /// Resume an existing chat instead of starting a new one
    #[arg(long)]
    session_id: Option<String>,

    /// Start recording again as soon as the agent finishes speaking
    #[arg(long)]
    auto_restart: bool,

    /// What to do with queued agent audio when the chat ends
    #[arg(long, value_enum)]
    end_playback: Option<EndPlaybackPolicy>,

    /// Don't load the chat history on start
    #[arg(long)]
    no_history: bool,

    /// Persist the effective settings before starting
    #[arg(long)]
    save_settings: bool,

    /// Speak TEXT with the agent's voice and exit
    #[arg(long, value_name = "TEXT")]
    say: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut ClientSettings) {
        if let Some(url) = &self.server_url {
            settings.server_url = url.clone();
        }
        if let Some(transport) = self.transport {
            settings.transport = transport;
        }
        if self.auto_restart {
            settings.auto_restart_after_playback = true;
        }
        if let Some(policy) = self.end_playback {
            settings.end_playback_policy = policy;
        }
        if self.no_history {
            settings.load_history_on_start = false;
        }
    }
}

/// Map one line of stdin to a command
fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "r" => Some(UserCommand::Toggle),
        "s" => Some(UserCommand::Stop),
        "e" => Some(UserCommand::End),
        "q" => Some(UserCommand::Quit),
        _ => None,
    }
}

/// Read commands from stdin on a plain thread; stdin reads block.
fn spawn_stdin_reader(commands: mpsc::UnboundedSender<UserCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(cmd) => {
                    if commands.send(cmd).is_err() || cmd == UserCommand::Quit {
                        break;
                    }
                }
                None => eprintln!("Commands: Enter/r = talk, s = stop, e = end chat, q = quit"),
            }
        }
        log::debug!("Stdin reader exiting");
    });
}

async fn render_ui(mut updates: mpsc::UnboundedReceiver<UiUpdate>) {
    let mut console = ConsoleUi::new();
    let mut stdout = std::io::stdout();
    while let Some(update) = updates.recv().await {
        if let Err(e) = console.render(&update, &mut stdout) {
            log::warn!("Failed to write to terminal: {}", e);
        }
    }
}

async fn run_chat(settings: ClientSettings, session_id: Option<String>) -> ExitCode {
    let api = match AgentApi::new(&settings.server_url) {
        Ok(api) => api,
        Err(e) => {
            log::error!("Failed to create agent client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let session = match session_id {
        Some(id) => Session::new(id),
        None => Session::generate(),
    };
    log::info!(
        "Chat session {} ({} transport, {})",
        session.id(),
        settings.transport.as_str(),
        settings.server_url
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let channel = build_channel(
        settings.transport,
        events_tx,
        api.clone(),
        session.id(),
        settings.sample_rate,
    );
    let microphone = Box::new(CpalMicrophone::new(settings.capture_config()));
    let player: Arc<dyn AudioPlayer> = Arc::new(CpalPlayer::new(settings.raw_audio_sample_rate));

    let session_id = session.id().to_string();
    let (mut controller, ui_rx) = SessionController::new(
        ControllerConfig::from_settings(&settings),
        session,
        channel,
        events_rx,
        microphone,
        player,
    );
    let ui_task = tokio::spawn(render_ui(ui_rx));

    if settings.load_history_on_start {
        match api.fetch_history(&session_id).await {
            Ok(history) => controller.load_history(history),
            Err(e) => {
                log::warn!("No previous history: {}", e);
                controller.notice("No previous history");
            }
        }
    }

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(commands_tx);

    let session = controller.run(commands_rx).await;
    if let Err(e) = ui_task.await {
        log::warn!("UI task failed: {}", e);
    }

    log::info!(
        "Chat session {} finished with {} messages",
        session.id(),
        session.history().len()
    );
    ExitCode::SUCCESS
}

async fn say(settings: ClientSettings, text: String) -> ExitCode {
    let result = async {
        let api = AgentApi::new(&settings.server_url)?;
        let url = api.generate_voice(&text).await?;
        api.fetch_audio(&url).await
    }
    .await;

    let audio = match result {
        Ok(audio) => audio,
        Err(e) => {
            log::error!("Text-to-speech failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let player = CpalPlayer::new(settings.raw_audio_sample_rate);
    let played =
        tokio::task::spawn_blocking(move || player.play(&[audio], &CancellationToken::new())).await;
    match played {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            log::error!("Playback failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            log::error!("Playback task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Several TLS backends are linked in; pick one explicitly
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    let mut settings = load_settings();
    settings.apply_env(|key| std::env::var(key).ok());
    cli.apply(&mut settings);
    settings.sanitize();

    if cli.save_settings {
        match save_settings(&settings) {
            Ok(()) => log::info!("Settings saved"),
            Err(e) => log::error!("Failed to save settings: {}", e),
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.say {
        Some(text) => runtime.block_on(say(settings, text)),
        None => runtime.block_on(run_chat(settings, cli.session_id)),
    }
}
