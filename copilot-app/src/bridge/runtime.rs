//! Bridge runtime - runs the widget endpoint in a background thread
//!
//! The hosting context attaches over WebSocket. The `Origin` header of the
//! handshake is the origin of every message on that connection. Inbound
//! frames go through the [`InboundRouter`]; outbound calls are queued to
//! every attached host matching the call's target origin.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use copilot_rpc::{FunctionCallMessage, TargetOrigin};
use crossbeam_channel::{Receiver, Sender, unbounded};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use uuid::Uuid;

use super::handler::CallBridge;
use super::host::HostChannel;
use super::types::*;
use crate::config::WidgetConfig;
use crate::error::BridgeError;
use crate::relay::{InboundRouter, MessageRelay};

/// Outbound queue depth per attached host
const HOST_QUEUE_DEPTH: usize = 32;

/// Control messages sent to the bridge runtime
#[derive(Debug)]
pub enum BridgeRpc {
    /// Start the widget endpoint
    Start,
    /// Stop the endpoint and detach all hosts
    Stop,
    /// Stop, tear the bridge down and exit the runtime thread
    Shutdown,
}

/// Control handle for the bridge runtime
#[derive(Clone)]
pub struct RuntimeControl {
    tx: Sender<BridgeRpc>,
    rx: Receiver<BridgeRpc>,
}

impl RuntimeControl {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Get the receiver for the runtime to process
    pub fn rx(&self) -> &Receiver<BridgeRpc> {
        &self.rx
    }

    pub fn start(&self) {
        tracing::info!("RuntimeControl: Sending Start message");
        let _ = self.tx.send(BridgeRpc::Start);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(BridgeRpc::Stop);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BridgeRpc::Shutdown);
    }
}

impl Default for RuntimeControl {
    fn default() -> Self {
        Self::new()
    }
}

/// State of an attached host
struct HostClient {
    origin: String,
    tx: mpsc::Sender<String>,
}

/// [`HostChannel`] over the hosts attached to the WebSocket endpoint
#[derive(Clone, Default)]
pub struct WsHostChannel {
    hosts: Arc<RwLock<HashMap<String, HostClient>>>,
}

impl WsHostChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, session_id: String, origin: String, tx: mpsc::Sender<String>) {
        self.hosts.write().insert(session_id, HostClient { origin, tx });
    }

    fn detach(&self, session_id: &str) {
        self.hosts.write().remove(session_id);
    }

    fn detach_all(&self) {
        self.hosts.write().clear();
    }
}

impl HostChannel for WsHostChannel {
    fn is_attached(&self) -> bool {
        !self.hosts.read().is_empty()
    }

    fn post(&self, message: &FunctionCallMessage, target: &TargetOrigin) -> Result<(), BridgeError> {
        let json = serde_json::to_string(message)?;

        let hosts = self.hosts.read();
        let mut matched = 0;
        let mut delivered = 0;
        let mut failure = None;
        for (session_id, host) in hosts.iter().filter(|(_, host)| target.matches(&host.origin)) {
            matched += 1;
            match host.tx.try_send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("Failed to queue call for host {}: {}", session_id, e);
                    failure = Some(e.to_string());
                }
            }
        }

        match (matched, delivered, failure) {
            (0, _, _) => Err(BridgeError::NoMatchingHost(target.to_string())),
            (_, 0, Some(reason)) => Err(BridgeError::Delivery(reason)),
            _ => Ok(()),
        }
    }
}

/// The bridge runtime that manages the widget endpoint
pub struct BridgeRuntime {
    control: RuntimeControl,
    bridge: CallBridge,
    router: InboundRouter,
    host: WsHostChannel,
    notification_tx: Sender<BridgeNotification>,
    base_port: u16,
    port_attempts: u16,
    /// Currently bound port
    port: Arc<RwLock<Option<u16>>>,
}

impl BridgeRuntime {
    pub fn new(
        control: RuntimeControl,
        bridge: CallBridge,
        router: InboundRouter,
        host: WsHostChannel,
        config: &WidgetConfig,
        notification_tx: Sender<BridgeNotification>,
    ) -> Self {
        Self {
            control,
            bridge,
            router,
            host,
            notification_tx,
            base_port: config.port,
            port_attempts: config.port_attempts.max(1),
            port: Arc::new(RwLock::new(None)),
        }
    }

    /// Run the main loop (call this from a dedicated thread)
    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Failed to create tokio runtime: {}", e);
                let _ = self.notification_tx.send(BridgeNotification::Error {
                    message: format!("Failed to create tokio runtime: {}", e),
                });
                return;
            }
        };

        if let Some(timeout) = self.bridge.call_timeout() {
            rt.spawn(Self::sweep_loop(self.bridge.clone(), timeout));
        }

        // Stop flag of the currently running endpoint
        let mut running: Option<Arc<AtomicBool>> = None;

        for msg in self.control.rx().iter() {
            match msg {
                BridgeRpc::Start => {
                    if running.is_some() {
                        tracing::debug!("Bridge endpoint already running");
                        continue;
                    }
                    let stop = Arc::new(AtomicBool::new(false));
                    let result = rt.block_on(Self::do_start(
                        self.base_port,
                        self.port_attempts,
                        self.port.clone(),
                        self.router.clone(),
                        self.host.clone(),
                        self.notification_tx.clone(),
                        stop.clone(),
                    ));
                    match result {
                        Ok(bound_port) => {
                            tracing::info!("Bridge endpoint started on port {}", bound_port);
                            running = Some(stop);
                        }
                        Err(e) => {
                            tracing::error!("Failed to start bridge endpoint: {}", e);
                            let _ = self
                                .notification_tx
                                .send(BridgeNotification::Error { message: e });
                        }
                    }
                }

                BridgeRpc::Stop => {
                    if let Some(stop) = running.take() {
                        self.stop_endpoint(&stop);
                    }
                }

                BridgeRpc::Shutdown => {
                    if let Some(stop) = running.take() {
                        self.stop_endpoint(&stop);
                    }
                    self.bridge.teardown();
                    break;
                }
            }
        }
    }

    fn stop_endpoint(&self, stop: &AtomicBool) {
        stop.store(true, Ordering::SeqCst);
        *self.port.write() = None;
        self.host.detach_all();
        let _ = self.notification_tx.send(BridgeNotification::ServerStopped);
    }

    async fn sweep_loop(bridge: CallBridge, timeout: Duration) {
        let period = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if bridge.is_closed() {
                break;
            }
            let expired = bridge.remove_expired();
            if expired > 0 {
                tracing::debug!(expired, "Swept expired calls");
            }
        }
    }

    async fn do_start(
        base_port: u16,
        port_attempts: u16,
        port: Arc<RwLock<Option<u16>>>,
        router: InboundRouter,
        host: WsHostChannel,
        notification_tx: Sender<BridgeNotification>,
        stop: Arc<AtomicBool>,
    ) -> Result<u16, String> {
        for offset in 0..port_attempts {
            let try_port = base_port.saturating_add(offset);
            match TcpListener::bind(("127.0.0.1", try_port)).await {
                Ok(listener) => {
                    let bound_port = listener
                        .local_addr()
                        .map(|addr| addr.port())
                        .unwrap_or(try_port);
                    *port.write() = Some(bound_port);

                    let _ = notification_tx.send(BridgeNotification::ServerStarted {
                        port: bound_port,
                    });

                    tokio::spawn(Self::accept_loop(listener, router, host, notification_tx, stop));

                    return Ok(bound_port);
                }
                Err(e) => {
                    tracing::debug!("Port {} unavailable: {}", try_port, e);
                }
            }
        }

        Err(format!(
            "Failed to bind to any port in range {}-{}",
            base_port,
            base_port.saturating_add(port_attempts.saturating_sub(1))
        ))
    }

    async fn accept_loop(
        listener: TcpListener,
        router: InboundRouter,
        host: WsHostChannel,
        notification_tx: Sender<BridgeNotification>,
        stop: Arc<AtomicBool>,
    ) {
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::info!("New connection from: {}", addr);
                            let router = router.clone();
                            let host = host.clone();
                            let notification_tx = notification_tx.clone();
                            let stop = stop.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    router,
                                    host,
                                    notification_tx,
                                    stop,
                                ).await {
                                    tracing::error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            if !stop.load(Ordering::SeqCst) {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    // Check stop flag periodically
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        router: InboundRouter,
        host: WsHostChannel,
        notification_tx: Sender<BridgeNotification>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), String> {
        let mut origin: Option<String> = None;
        let ws_stream = accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                origin = request
                    .headers()
                    .get(ORIGIN)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            },
        )
        .await
        .map_err(|e| format!("WebSocket handshake failed: {}", e))?;

        let origin = origin.unwrap_or_else(|| NULL_ORIGIN.to_string());
        let session_id = Uuid::new_v4().to_string();
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(HOST_QUEUE_DEPTH);
        host.attach(session_id.clone(), origin.clone(), tx);

        let _ = notification_tx.send(BridgeNotification::HostAttached(HostSession {
            session_id: session_id.clone(),
            origin: origin.clone(),
            connected_at,
        }));
        tracing::info!("Host attached: {} ({})", session_id, origin);

        let session_id_sender = session_id.clone();
        let stop_sender = stop.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if stop_sender.load(Ordering::SeqCst) {
                    break;
                }
                if write.send(Message::Text(msg.into())).await.is_err() {
                    tracing::warn!("Failed to send message to host {}", session_id_sender);
                    break;
                }
            }
        });

        while let Some(msg_result) = read.next().await {
            if stop.load(Ordering::SeqCst) {
                break;
            }

            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(message) => {
                        router.dispatch(message, &origin);
                    }
                    Err(e) => {
                        tracing::warn!("Dropping non-JSON frame from {}: {}", session_id, e);
                    }
                },
                Ok(Message::Close(_)) => {
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    tracing::trace!("Received ping from {}", session_id);
                }
                Err(e) => {
                    tracing::error!("WebSocket error for {}: {}", session_id, e);
                    break;
                }
                _ => {}
            }
        }

        host.detach(&session_id);
        let _ = notification_tx.send(BridgeNotification::HostDetached {
            session_id: session_id.clone(),
        });
        tracing::info!("Host detached: {}", session_id);

        Ok(())
    }
}

/// A running bridge: the call handle plus control over its runtime thread
pub struct BridgeHandle {
    pub bridge: CallBridge,
    pub control: RuntimeControl,
    thread: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    /// Shut the runtime down and wait for its thread to exit
    pub fn shutdown(mut self) {
        self.control.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Bridge runtime thread panicked");
            }
        }
    }
}

/// Wire up a bridge over the WebSocket endpoint and start its runtime
/// thread. The endpoint itself starts listening on `control.start()`.
pub fn start_bridge_runtime(
    config: &WidgetConfig,
    relay: Arc<dyn MessageRelay>,
    notification_tx: Sender<BridgeNotification>,
) -> std::io::Result<BridgeHandle> {
    let host = WsHostChannel::new();
    let bridge = CallBridge::new(Arc::new(host.clone()), config.bridge_options());
    let router = InboundRouter::new(bridge.clone(), relay);
    let control = RuntimeControl::new();

    let runtime = BridgeRuntime::new(
        control.clone(),
        bridge.clone(),
        router,
        host,
        config,
        notification_tx,
    );
    let thread = std::thread::Builder::new()
        .name("BridgeRuntime".to_string())
        .spawn(move || runtime.run())?;

    Ok(BridgeHandle {
        bridge,
        control,
        thread: Some(thread),
    })
}
