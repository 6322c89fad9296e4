//! Renderer control engine
//!
//! A single task consumes [`ControlEvent`]s in order. Triggers arrive from the
//! frame thread and the API as short fixed sequences, reserved on the queue
//! all at once so they are never interleaved or half-enqueued. SOAP calls run
//! in spawned tasks, together with any name resolution they need; a successful
//! SetAVTransportURI posts a continuation back into the queue so Play is
//! decided with the state current at that time.

use super::avtransport::{AvTransportClient, TransportAction};
use crate::activity::TransportSwitch;
use crate::config::ControlSettings;
use crate::error::UpnpError;
use crate::types::StreamFormat;
use reqwest::Url;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use wavecast_core::{Renderer, RendererRegistry, SelectionStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Enable,
    Disable,
    SelectionChanged,
    SendPlay,
    SendStop,
    /// A renderer accepted our stream URI; Play may follow
    TransportUriAccepted { uuid: String, control_url: String },
}

/// Cloneable, non-blocking entry point into the control engine
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlEvent>,
    /// Serialises reservations so concurrent triggers keep their sequences contiguous
    order: Arc<Mutex<()>>,
}

impl ControlHandle {
    fn enqueue(&self, events: &[ControlEvent]) -> bool {
        let _order = self.order.lock().unwrap_or_else(|e| e.into_inner());

        match self.tx.try_reserve_many(events.len()) {
            Ok(permits) => {
                for (permit, event) in permits.zip(events) {
                    permit.send(event.clone());
                }
                true
            }
            Err(TrySendError::Full(())) => {
                error!("Control queue full, dropping {:?}", events);
                false
            }
            Err(TrySendError::Closed(())) => {
                warn!("Control engine stopped, dropping {:?}", events);
                false
            }
        }
    }

    /// Audio became active: start playback on the selected renderers
    pub fn enable(&self) -> bool {
        self.enqueue(&[ControlEvent::Enable, ControlEvent::SendPlay])
    }

    /// Audio went silent: stop the selected renderers
    pub fn disable(&self) -> bool {
        self.enqueue(&[ControlEvent::SendStop, ControlEvent::Disable])
    }

    /// The persisted selection changed: stop the old set, reload, play the new set
    pub fn configuration_changed(&self) -> bool {
        self.enqueue(&[
            ControlEvent::SendStop,
            ControlEvent::SelectionChanged,
            ControlEvent::SendPlay,
        ])
    }

    /// Load the persisted selection without touching playback
    pub fn reload_selection(&self) -> bool {
        self.enqueue(&[ControlEvent::SelectionChanged])
    }
}

impl TransportSwitch for ControlHandle {
    fn enable(&self) {
        ControlHandle::enable(self);
    }

    fn disable(&self) {
        ControlHandle::disable(self);
    }
}

pub struct ControlEngine {
    rx: mpsc::Receiver<ControlEvent>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
    /// Weak so the queue closes once every handle is gone
    continuations: mpsc::WeakSender<ControlEvent>,
    enabled: bool,
    registry: RendererRegistry,
    store: Arc<dyn SelectionStore>,
    transport: AvTransportClient,
    stream_port: u16,
    advertised_host: Option<String>,
}

impl ControlEngine {
    pub fn new(
        registry: RendererRegistry,
        store: Arc<dyn SelectionStore>,
        settings: &ControlSettings,
        stream_port: u16,
    ) -> Result<(Self, ControlHandle), UpnpError> {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let transport = AvTransportClient::new(settings.soap_timeout())?;

        let engine = Self {
            rx,
            shutdown_tx,
            shutdown_rx,
            continuations: tx.downgrade(),
            enabled: false,
            registry,
            store,
            transport,
            stream_port,
            advertised_host: settings.advertised_host.clone(),
        };
        let handle = ControlHandle {
            tx,
            order: Arc::new(Mutex::new(())),
        };

        Ok((engine, handle))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sender that stops [`run`](Self::run) even while handles are still alive
    pub fn shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Process events until a shutdown is requested or every handle has been dropped
    pub async fn run(mut self) {
        info!("Control engine started");
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = self.shutdown_rx.recv() => {
                    debug!("Control engine shutdown requested");
                    break;
                }
            }
        }
        info!("Control engine stopped");
    }

    pub async fn handle_event(&mut self, event: ControlEvent) {
        debug!("Control event {:?}", event);

        match event {
            ControlEvent::Enable => self.enabled = true,
            ControlEvent::Disable => self.enabled = false,
            ControlEvent::SelectionChanged => self.reload_selection().await,
            ControlEvent::SendPlay => {
                if self.enabled {
                    self.send_transport_uri();
                }
            }
            ControlEvent::SendStop => {
                if self.enabled {
                    self.send_stop();
                }
            }
            ControlEvent::TransportUriAccepted { uuid, control_url } => {
                if !self.enabled {
                    debug!("Disabled since SetAVTransportURI to {}, not playing", uuid);
                } else if !self.registry.is_selected(&uuid) {
                    debug!("Renderer {} deselected since SetAVTransportURI, not playing", uuid);
                } else {
                    self.spawn_action(uuid, control_url, TransportAction::Play { speed: 1 }, None);
                }
            }
        }
    }

    async fn reload_selection(&self) {
        match self.store.get_selected_renderers().await {
            Ok(selection) => {
                self.registry.apply_selection(&selection);
                info!("Selected renderers: {}", selection.len());
            }
            Err(e) => error!("Failed to load selected renderers: {}", e),
        }
    }

    /// Selected renderers that can be controlled, warning about the rest
    fn controllable(&self) -> Vec<(Renderer, String)> {
        self.registry
            .selected()
            .into_iter()
            .filter_map(|renderer| match renderer.control_url.clone().filter(|url| !url.is_empty()) {
                Some(url) => Some((renderer, url)),
                None => {
                    warn!("Renderer {} ({}) has no control URL yet, skipping", renderer.name, renderer.uuid);
                    None
                }
            })
            .collect()
    }

    fn send_transport_uri(&self) {
        for (renderer, control_url) in self.controllable() {
            let transport = self.transport.clone();
            let continuations = self.continuations.clone();
            let advertised_host = self.advertised_host.clone();
            let stream_port = self.stream_port;

            tokio::spawn(async move {
                let Some(uri) = stream_uri(advertised_host.as_deref(), stream_port, &control_url).await
                else {
                    warn!("No local address toward {} ({}), skipping", renderer.name, control_url);
                    return;
                };
                info!("Pointing {} at {}", renderer.name, uri);

                let accepted = ControlEvent::TransportUriAccepted {
                    uuid: renderer.uuid.clone(),
                    control_url: control_url.clone(),
                };
                perform(
                    transport,
                    continuations,
                    renderer.uuid,
                    control_url,
                    TransportAction::SetAvTransportUri { uri },
                    Some(accepted),
                )
                .await;
            });
        }
    }

    fn send_stop(&self) {
        for (renderer, control_url) in self.controllable() {
            info!("Stopping {}", renderer.name);
            self.spawn_action(renderer.uuid, control_url, TransportAction::Stop, None);
        }
    }

    /// Run one SOAP action in the background; on success post `then`, if any
    fn spawn_action(
        &self,
        uuid: String,
        control_url: String,
        action: TransportAction,
        then: Option<ControlEvent>,
    ) {
        tokio::spawn(perform(
            self.transport.clone(),
            self.continuations.clone(),
            uuid,
            control_url,
            action,
            then,
        ));
    }

    /// Stream URI handed to the renderer behind `control_url`
    pub async fn stream_uri(&self, control_url: &str) -> Option<String> {
        stream_uri(self.advertised_host.as_deref(), self.stream_port, control_url).await
    }
}

async fn perform(
    transport: AvTransportClient,
    continuations: mpsc::WeakSender<ControlEvent>,
    uuid: String,
    control_url: String,
    action: TransportAction,
    then: Option<ControlEvent>,
) {
    match transport.send(&control_url, &action).await {
        Ok(()) => {
            debug!("{} accepted by {}", action.name(), uuid);
            if let Some(event) = then {
                match continuations.upgrade() {
                    Some(tx) => {
                        if tx.send(event).await.is_err() {
                            debug!("Control engine gone before {} continuation", action.name());
                        }
                    }
                    None => debug!("Control engine gone before {} continuation", action.name()),
                }
            }
        }
        Err(e) => error!("{} to {} failed: {}", action.name(), uuid, e),
    }
}

async fn stream_uri(advertised_host: Option<&str>, stream_port: u16, control_url: &str) -> Option<String> {
    let path = StreamFormat::Wav.path();

    if let Some(host) = advertised_host {
        return Some(format!("http://{}:{}{}", host, stream_port, path));
    }

    let url = Url::parse(control_url).ok()?;
    let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']');
    let port = url.port_or_known_default()?;

    let renderer = match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next()?,
        Err(e) => {
            debug!("Failed to resolve {}: {}", host, e);
            return None;
        }
    };
    let local = local_ip_toward(renderer)?;

    Some(format!("http://{}{}", SocketAddr::new(local, stream_port), path))
}

/// Local address the OS would use to reach `addr`; UDP connect sends nothing
fn local_ip_toward(addr: SocketAddr) -> Option<IpAddr> {
    let bind = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(addr).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
