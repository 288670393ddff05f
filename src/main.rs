use anyhow::{anyhow, Context};
use avatar_call_lib::call_engine::TrackKind;
use avatar_call_lib::directory::ContactDirectory;
use avatar_call_lib::{
    init_logging, observe, CallCollaborators, CallConfig, CallEvent, CallObserver,
    CallOrchestrator, CallState, DialMode, ErrorKind, MediaReference, SessionId,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "avatar-call")]
#[command(about = "Video calls with talking avatars")]
struct Cli {
    /// JSON config file, environment variables still apply on top
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON contact list instead of the built-in roster
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Overrides the configured dial mode
    #[arg(short, long, value_parser = ["signaling", "bootstrap"])]
    mode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available contacts
    Contacts,
    /// Call a contact by name and stay connected until Ctrl-C
    Dial { name: String },
}

/// Gibt Lifecycle-Events auf der Konsole aus
struct ConsoleObserver;

impl CallObserver for ConsoleObserver {
    fn on_state_changed(&mut self, _: SessionId, state: CallState) {
        println!("[state] {}", state);
    }

    fn on_media_ready(&mut self, _: SessionId, reference: &MediaReference) {
        println!("[media] ready: {}", reference);
    }

    fn on_remote_track_added(&mut self, _: SessionId, track_id: &str, kind: TrackKind) {
        println!("[peer] {:?} track added: {}", kind, track_id);
    }

    fn on_remote_track_removed(&mut self, _: SessionId, track_id: &str) {
        println!("[peer] track removed: {}", track_id);
    }

    fn on_stalled(&mut self, _: SessionId) {
        println!("[media] stalled");
    }

    fn on_stopped(&mut self, _: SessionId) {
        println!("[call] stopped");
    }

    fn on_error(&mut self, _: SessionId, kind: ErrorKind, detail: &str) {
        eprintln!("[error] {:?}: {}", kind, detail);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let directory = match &cli.contacts {
        Some(path) => ContactDirectory::from_json_file(path)?,
        None => ContactDirectory::builtin(),
    };

    match cli.command {
        Commands::Contacts => {
            for contact in directory.contacts() {
                println!(
                    "{:<8} {:<20} face {}",
                    contact.display_name, contact.one_liner, contact.face_id
                );
            }
            Ok(())
        }
        Commands::Dial { ref name } => {
            let mut config = match &cli.config {
                Some(path) => CallConfig::from_json_file(path)?,
                None => CallConfig::default(),
            }
            .overlay(|key| std::env::var(key).ok())?;
            if let Some(mode) = &cli.mode {
                config.mode = mode.parse::<DialMode>()?;
            }
            dial(config, &directory, name).await
        }
    }
}

async fn dial(config: CallConfig, directory: &ContactDirectory, name: &str) -> anyhow::Result<()> {
    let contact = directory
        .find(name)
        .ok_or_else(|| anyhow!("Unknown contact '{}'", name))?;
    let api_key = std::env::var("SIMLI_API_KEY").context("SIMLI_API_KEY is not set")?;

    let collaborators = CallCollaborators::headless(&config);
    let orchestrator = CallOrchestrator::spawn(config, collaborators);
    let printer = observe(orchestrator.subscribe(), ConsoleObserver);
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.dial(contact.call_parameters(api_key))?;
    println!("Calling {} ({})...", contact.display_name, contact.one_liner);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Hanging up...");
            let _ = orchestrator.end_call().await;
        }
        result = handle.established() => match result {
            Ok(_) => {
                println!("Connected. Press Ctrl-C to hang up.");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        println!("Hanging up...");
                        let _ = orchestrator.end_call().await;
                    }
                    _ = wait_for_idle(&mut events) => {}
                }
            }
            Err(e) => eprintln!("Call failed: {}", e),
        },
    }

    orchestrator.shutdown().await;
    drop(orchestrator);
    let _ = printer.await;
    Ok(())
}

/// Wartet bis der Anruf von selbst endet
async fn wait_for_idle(events: &mut mpsc::UnboundedReceiver<CallEvent>) {
    while let Some(event) = events.recv().await {
        if let CallEvent::StateChanged {
            state: CallState::Idle,
            ..
        } = event
        {
            return;
        }
    }
}
