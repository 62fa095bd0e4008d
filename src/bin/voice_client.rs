//! Voice Client Application
//!
//! Sends a question to the chat endpoint (or replays a captured response),
//! types the reply into the terminal and plays its audio.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicechat_stream::{
    audio::RendererFactory,
    client::{ClientEvent, VoiceClient},
    config::{AppConfig, AudioRoute},
    playback::{ContextFactory, OfflineContextFactory},
    transport::{FileTransport, HttpTransport, Transport},
};

#[derive(Parser)]
#[command(
    name = "voice-client",
    about = "Stream a voice-chat reply: typed text plus gapless audio",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question over HTTP
    Ask {
        /// Text to send
        text: String,

        /// Override the configured endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Feed a captured response body through the pipeline
    Replay {
        /// File holding the raw response frames
        file: PathBuf,

        /// Do not open an audio device
        #[arg(long)]
        silent: bool,

        /// Bytes per simulated network read
        #[arg(long, default_value_t = 512)]
        chunk_size: usize,
    },

    /// List audio output devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Commands::Ask { text, endpoint } => {
            if let Some(endpoint) = endpoint {
                config.transport.endpoint = endpoint;
            }
            let transport = Arc::new(HttpTransport::new(&config.transport)?);
            tracing::info!("Asking {}", transport.endpoint());
            run(config, transport, text, false).await
        }
        Commands::Replay {
            file,
            silent,
            chunk_size,
        } => {
            let transport = Arc::new(FileTransport::new(&file).with_chunk_size(chunk_size));
            tracing::info!("Replaying {}", file.display());
            run(config, transport, file.display().to_string(), silent).await
        }
        Commands::Devices => {
            list_devices();
            Ok(())
        }
    }
}

async fn run(
    config: AppConfig,
    transport: Arc<dyn Transport>,
    text: String,
    silent: bool,
) -> Result<()> {
    let outputs = open_outputs(&config, silent);
    let (client, mut events) = VoiceClient::new(config, transport, outputs.contexts.clone());
    let mut client = match outputs.renderers {
        Some(factory) => client.with_renderer(factory),
        None => client,
    };

    client.submit(text).await;

    let mut printed = 0usize;
    let mut stdout = std::io::stdout();
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                client.stop();
                client.interrupt().await;
                break;
            }
        };
        let Some(event) = event else { break };

        match event {
            ClientEvent::Text(displayed) => {
                let new: String = displayed.chars().skip(printed).collect();
                printed += new.chars().count();
                print!("{}", new);
                stdout.flush()?;
            }
            ClientEvent::Transcript(text) => println!("> {}", text),
            ClientEvent::Status(value) => tracing::info!("Status: {}", value),
            ClientEvent::Notice(message) => eprintln!("[{}]", message),
            ClientEvent::Completed { latency_ms, .. } => {
                println!();
                if let Some(stats) = client.session_stats() {
                    tracing::info!(
                        "Reply in {} ms: {} chars, {} audio chunks ({} bytes), {} bad frames",
                        latency_ms,
                        stats.text_chars,
                        stats.audio_chunks,
                        stats.audio_bytes,
                        stats.protocol_errors
                    );
                }
                drain_audio(&client).await;
                break;
            }
            ClientEvent::Failed(err) => {
                println!();
                eprintln!(
                    "{}",
                    err.kind.user_message().unwrap_or("The reply was interrupted.")
                );
                tracing::error!("{}", err);
                break;
            }
        }
    }

    // Closes a renderer that is still open
    client.interrupt().await;
    Ok(())
}

/// Block until queued and buffered audio has played out
async fn drain_audio(client: &VoiceClient) {
    // Response audio closes a little after completion
    tokio::time::sleep(client.config().stream.audio_close_delay() + Duration::from_millis(50)).await;

    while client.is_playing() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

struct Outputs {
    contexts: Arc<dyn ContextFactory>,
    /// Opens the ring-buffer renderer when a reply first carries audio
    renderers: Option<Arc<dyn RendererFactory>>,
}

#[cfg(feature = "device")]
fn open_outputs(config: &AppConfig, silent: bool) -> Outputs {
    use voicechat_stream::audio::DeviceRendererFactory;
    use voicechat_stream::playback::DeviceContextFactory;

    if silent {
        return offline_outputs();
    }

    let renderers: Option<Arc<dyn RendererFactory>> = match config.stream.audio_route {
        AudioRoute::Renderer => Some(Arc::new(DeviceRendererFactory)),
        AudioRoute::Scheduler => None,
    };
    Outputs {
        contexts: Arc::new(DeviceContextFactory::new(config.playback.device_id.clone())),
        renderers,
    }
}

#[cfg(not(feature = "device"))]
fn open_outputs(config: &AppConfig, silent: bool) -> Outputs {
    if !silent && config.stream.audio_route == AudioRoute::Renderer {
        tracing::warn!("Built without the `device` feature; audio is not played");
    }
    offline_outputs()
}

fn offline_outputs() -> Outputs {
    Outputs {
        contexts: Arc::new(OfflineContextFactory::new()),
        renderers: None,
    }
}

#[cfg(feature = "device")]
fn list_devices() {
    println!("\n=== Output Devices ===");
    for device in voicechat_stream::audio::list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[cfg(not(feature = "device"))]
fn list_devices() {
    println!("Built without the `device` feature; rebuild with `--features device` to list outputs.");
}
