//! Command line entry point
//!
//! Stands in for the chat session: call intents are read as JSON lines
//! on stdin, and call outcomes and relayed host messages are written as
//! JSON lines on stdout.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use copilot_core::meta;
use copilot_rpc::CallResult;
use crossbeam_channel::{Receiver, select, unbounded};
use serde_json::{Value, json};

use crate::bridge::{BridgeNotification, CallIntent, start_bridge_runtime};
use crate::config::WidgetConfig;
use crate::logging::init_logging;
use crate::relay::ChannelRelay;

#[derive(Parser, Debug, Default)]
#[command(name = "copilot-widget", version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Expected origin of the hosting context
    #[arg(long)]
    pub host_origin: Option<String>,
    /// Widget page URL; its `lwcParentOrigin` query parameter names the host
    #[arg(long)]
    pub widget_url: Option<String>,
    /// First port to listen on
    #[arg(long)]
    pub port: Option<u16>,
    /// Fail calls instead of posting to `*` when the host origin is unknown
    #[arg(long)]
    pub strict_origin: bool,
    /// Fail calls that receive no reply within this many milliseconds
    #[arg(long)]
    pub call_timeout_ms: Option<u64>,
    /// Also write logs to a daily-rolled file
    #[arg(long)]
    pub log_file: bool,
}

impl Cli {
    /// Layer the flags over the loaded config
    pub fn apply(&self, mut config: WidgetConfig) -> Result<WidgetConfig> {
        if let Some(origin) = &self.host_origin {
            config.host_origin = Some(origin.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.strict_origin {
            config.strict_origin = true;
        }
        if let Some(timeout) = self.call_timeout_ms {
            config.call_timeout_ms = Some(timeout);
        }
        if self.log_file {
            config.log_file = true;
        }
        let mut config = config.validated()?;
        if let Some(url) = &self.widget_url {
            config.apply_widget_url(url)?;
        }
        Ok(config)
    }
}

pub fn launch() {
    if let Err(e) = try_launch() {
        eprintln!("{}: {:#}", meta::NAME, e);
        std::process::exit(1);
    }
}

fn try_launch() -> Result<()> {
    let cli = Cli::parse();
    let config = WidgetConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let config = cli.apply(config)?;

    let _guard = init_logging("copilot_app=info,copilot_widget=info", config.log_file)?;
    tracing::info!("{} {} starting", meta::NAME, meta::VERSION);
    if config.host_origin.is_none() {
        tracing::warn!(
            "Hosting origin not configured. Calls will be posted with a wildcard target origin and replies accepted from any origin."
        );
    }

    let (relay, relay_rx) = ChannelRelay::new();
    let (notification_tx, notification_rx) = unbounded();
    let handle = start_bridge_runtime(&config, Arc::new(relay), notification_tx)
        .context("Failed to spawn bridge runtime")?;
    handle.control.start();

    std::thread::Builder::new()
        .name("SessionOutput".to_string())
        .spawn(move || forward_output(relay_rx, notification_rx))
        .context("Failed to spawn output thread")?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CallIntent>(&line) {
            Ok(intent) => {
                let name = intent.name.clone();
                handle.bridge.initiate_call(intent.name, intent.args, move |result: CallResult| {
                    print_line(&json!({ "name": name, "outcome": result }));
                });
            }
            Err(e) => tracing::warn!("Ignoring malformed call intent: {}", e),
        }
    }

    tracing::info!("stdin closed, shutting down");
    handle.shutdown();
    Ok(())
}

fn forward_output(relay_rx: Receiver<Value>, notification_rx: Receiver<BridgeNotification>) {
    loop {
        select! {
            recv(relay_rx) -> message => match message {
                Ok(message) => print_line(&json!({ "relay": message })),
                Err(_) => break,
            },
            recv(notification_rx) -> notification => match notification {
                Ok(notification) => log_notification(notification),
                Err(_) => break,
            },
        }
    }
}

fn log_notification(notification: BridgeNotification) {
    match notification {
        BridgeNotification::ServerStarted { port } => {
            tracing::info!("Widget endpoint listening on ws://127.0.0.1:{}", port)
        }
        BridgeNotification::ServerStopped => tracing::info!("Widget endpoint stopped"),
        BridgeNotification::HostAttached(session) => {
            tracing::info!("Hosting context {} attached from {}", session.session_id, session.origin)
        }
        BridgeNotification::HostDetached { session_id } => {
            tracing::info!("Hosting context {} detached", session_id)
        }
        BridgeNotification::Error { message } => tracing::error!("{}", message),
    }
}

fn print_line(value: &Value) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::error!("Failed to encode output: {}", e),
    }
}
