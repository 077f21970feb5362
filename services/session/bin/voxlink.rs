//! Main Entrypoint for the Voxlink CLI
//!
//! This binary is responsible for:
//! 1. Parsing the command line and loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the control client and the local audio devices.
//! 4. Running one session and reporting how it ended.

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxlink_core::{AudioBridge, ControlClient, HttpControlClient};
use voxlink_relay::RelayConfig;
use voxlink_session::{
    SessionController, SessionRequest,
    config::Config,
    devices::{CpalCapture, CpalPlayback, list_devices},
};

#[derive(Debug, Parser)]
#[command(version, about = "Talk to a hosted voice agent from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one session against an agent.
    Run {
        /// Substring of the model name; the first listed match is used.
        #[arg(long, default_value = "ultravox")]
        model: String,
        #[arg(long, default_value = "You are a helpful assistant. Keep answers short.")]
        prompt: String,
        /// How long to keep the session open, in seconds.
        #[arg(long, default_value_t = 60)]
        duration: u64,
        #[arg(long)]
        temperature: Option<f32>,
        /// Skip local audio devices; server messages are still logged.
        #[arg(long)]
        no_audio: bool,
    },
    /// List the models the control API offers.
    Models,
    /// List local audio input and output devices.
    Devices,
}

fn init_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
}

/// Forwards the first `Ctrl+C` to the session as an interrupt.
fn forward_ctrl_c(interrupt: Arc<Notify>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C. Ending session...");
            interrupt.notify_one();
        }
    });
}

async fn build_bridge(config: &Config, no_audio: bool) -> anyhow::Result<AudioBridge> {
    if no_audio {
        return Ok(AudioBridge::null().with_timeout(config.device_timeout));
    }
    let playback = CpalPlayback::open(config.output_device.clone())
        .await
        .context("Failed to open playback device")?;
    let capture = CpalCapture::new(config.input_device.clone());
    Ok(AudioBridge::new(Box::new(capture), Box::new(playback)).with_timeout(config.device_timeout))
}

fn control_client(config: &Config) -> anyhow::Result<HttpControlClient> {
    let api_key = SecretString::from(config.api_key.expose_secret().to_owned());
    HttpControlClient::new(&config.base_url, api_key, config.http_timeout)
        .context("Failed to build control client")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (model, prompt, duration, temperature, no_audio) = match cli.command {
        Command::Devices => {
            init_logging("info");
            let listing = list_devices().context("Failed to enumerate audio devices")?;
            println!("Host: {}", listing.host);
            println!("Inputs (default: {}):", listing.default_input.as_deref().unwrap_or("none"));
            for name in &listing.inputs {
                println!("  {name}");
            }
            println!("Outputs (default: {}):", listing.default_output.as_deref().unwrap_or("none"));
            for name in &listing.outputs {
                println!("  {name}");
            }
            return Ok(());
        }
        Command::Models => {
            let config = Config::from_env().context("Failed to load configuration")?;
            init_logging(&config.log_filter);
            let models = control_client(&config)?
                .list_models()
                .await
                .context("Failed to list models")?;
            for name in models.names() {
                println!("{name}");
            }
            return Ok(());
        }
        Command::Run {
            model,
            prompt,
            duration,
            temperature,
            no_audio,
        } => (model, prompt, duration, temperature, no_audio),
    };

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    init_logging(&config.log_filter);
    info!("Configuration loaded. Preparing session...");

    // --- 3. Initialize Client and Devices ---
    let client = Arc::new(control_client(&config)?);
    let bridge = build_bridge(&config, no_audio).await?;
    let controller = SessionController::new(client, bridge).with_relay_config(RelayConfig {
        close_timeout: config.relay_close_timeout,
        ..Default::default()
    });
    forward_ctrl_c(controller.interrupt_handle());

    // --- 4. Run the Session ---
    let mut request = SessionRequest::new(model, prompt, Duration::from_secs(duration));
    request.agent_options.temperature = temperature;
    let result = controller.run_session(request).await;

    match result.failure_summary() {
        None => {
            info!("Session completed and all resources were released.");
            Ok(())
        }
        Some(summary) => {
            warn!(%summary, "Session did not complete cleanly.");
            anyhow::bail!(summary)
        }
    }
}
