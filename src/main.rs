//! stompws - command-line STOMP client.
//!
//! Subscribes to a destination and prints every message, or sends a single
//! message and exits once it is written (or receipted, with `--receipt`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use stomp_ws::constants::{header, JSON_CONTENT_TYPE};
use stomp_ws::{AckMode, Config, EventSink, Headers, Message, StompClient};
use tokio::sync::mpsc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long `send` waits for CONNECTED before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "stompws")]
#[command(version)]
#[command(about = "STOMP over WebSocket client")]
struct Cli {
    /// Config file (default: <config dir>/stompws/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Broker URL, overrides the config file and STOMPWS_URL
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every message delivered to a destination
    Subscribe {
        destination: String,
        /// Ack mode: auto, client or client-individual
        #[arg(long, default_value = "auto")]
        ack: AckMode,
    },
    /// Send one message to a destination
    Send {
        destination: String,
        message: String,
        /// Request a receipt and wait for it
        #[arg(long)]
        receipt: Option<String>,
        /// Validate MESSAGE as JSON and send it as application/json
        #[arg(long)]
        json: bool,
    },
}

/// Sink forwarding client events to the command loop.
#[derive(Debug)]
struct ChannelSink {
    tx: mpsc::UnboundedSender<CliEvent>,
}

#[derive(Debug)]
enum CliEvent {
    Connected,
    Disconnected,
    Message(Message),
    Receipt(String),
    Error(String),
}

impl ChannelSink {
    fn forward(&self, event: CliEvent) {
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_connected(&self) {
        self.forward(CliEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.forward(CliEvent::Disconnected);
    }

    fn on_message(&self, message: Message) {
        self.forward(CliEvent::Message(message));
    }

    fn on_receipt(&self, receipt_id: &str) {
        self.forward(CliEvent::Receipt(receipt_id.to_string()));
    }

    fn on_error(&self, message: &str, detail: Option<&str>) {
        let text = match detail {
            Some(detail) => format!("{message}: {detail}"),
            None => message.to_string(),
        };
        self.forward(CliEvent::Error(text));
    }

    fn on_heartbeat(&self) {
        log::trace!("heartbeat");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.url {
        config.url = url;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink { tx });
    let client = StompClient::websocket();
    client.open(
        config.connect_request(),
        &sink,
        Some(config.connect_headers()),
    );

    match cli.command {
        Commands::Subscribe { destination, ack } => {
            if let Some(options) = config.reconnect_options() {
                client.schedule_reconnect(options)?;
            }
            run_subscribe(&client, rx, &destination, ack).await?;
        }
        Commands::Send {
            destination,
            message,
            receipt,
            json,
        } => {
            run_send(&client, rx, &destination, &message, receipt.as_deref(), json).await?;
        }
    }

    client.disconnect();
    Ok(())
}

/// Subscribe (again after every reconnect) and print messages until Ctrl-C.
async fn run_subscribe(
    client: &StompClient,
    mut rx: mpsc::UnboundedReceiver<CliEvent>,
    destination: &str,
    ack: AckMode,
) -> Result<()> {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { return Ok(()) };
                match event {
                    CliEvent::Connected => {
                        log::info!("Connected, subscribing to {destination}");
                        if let Err(e) = client.subscribe(destination, ack) {
                            log::warn!("Subscribe failed: {e}");
                        }
                    }
                    CliEvent::Message(message) => {
                        println!("{}", message.body);
                        if ack != AckMode::Auto {
                            let headers = &message.headers;
                            if let Some(id) = headers.get("ack").or_else(|| headers.get("message-id")) {
                                let subscription = headers.get("subscription").map(String::as_str);
                                if let Err(e) = client.ack(id, subscription) {
                                    log::warn!("Ack failed: {e}");
                                }
                            }
                        }
                    }
                    CliEvent::Disconnected => log::warn!("Disconnected from broker"),
                    CliEvent::Error(error) => log::error!("{error}"),
                    CliEvent::Receipt(id) => log::debug!("Receipt {id}"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                log::info!("Interrupted, disconnecting");
                return Ok(());
            }
        }
    }
}

/// Wait for CONNECTED, send one message, then wait for its receipt if asked.
async fn run_send(
    client: &StompClient,
    mut rx: mpsc::UnboundedReceiver<CliEvent>,
    destination: &str,
    message: &str,
    receipt: Option<&str>,
    json: bool,
) -> Result<()> {
    let wait = async {
        while let Some(event) = rx.recv().await {
            match event {
                CliEvent::Connected => {
                    let headers = if json {
                        serde_json::from_str::<serde_json::Value>(message)
                            .context("MESSAGE is not valid JSON")?;
                        let mut headers = Headers::new();
                        headers.insert(header::CONTENT_TYPE.into(), JSON_CONTENT_TYPE.into());
                        Some(headers)
                    } else {
                        None
                    };
                    client.send(message, destination, headers, receipt)?;
                    log::info!("Sent to {destination}");
                    if receipt.is_none() {
                        return Ok(());
                    }
                }
                CliEvent::Receipt(id) if Some(id.as_str()) == receipt => {
                    log::info!("Broker confirmed receipt {id}");
                    return Ok(());
                }
                CliEvent::Error(error) => anyhow::bail!("{error}"),
                CliEvent::Disconnected => anyhow::bail!("Disconnected before the message was sent"),
                CliEvent::Message(_) | CliEvent::Receipt(_) => {}
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::time::timeout(CONNECT_TIMEOUT, wait)
        .await
        .context("Timed out waiting for the broker")?
}
