//! SSDP discovery of media renderers
//!
//! Two paths feed the registry: a passive listener on the SSDP multicast group
//! picks up `NOTIFY` advertisements, and a periodic active search sends
//! M-SEARCH bursts and reads unicast replies for a bounded window. Either way
//! the announced description is fetched, parsed and merged by uuid.

use super::description::parse_description;
use super::ssdp::{
    build_msearch, parse_message, usn_uuid, Announcement, SsdpMessage, SSDP_MULTICAST_ADDR, SSDP_PORT,
};
use crate::config::DiscoverySettings;
use crate::error::UpnpError;
use anyhow::Result;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use wavecast_core::{MergeOutcome, RendererRegistry, RetireOutcome};

/// A location fetched recently is not fetched again within this bound
const MAX_REFETCH_INTERVAL: Duration = Duration::from_secs(60);
const DATAGRAM_SIZE: usize = 2048;

/// Bind the passive listener on the SSDP port and join the multicast group
fn create_listener_socket() -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    // Other UPnP stacks on this host listen on 1900 too
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT));
    socket.bind(&addr.into())?;
    socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;

    info!("SSDP listener bound to {} and joined {}", addr, SSDP_MULTICAST_ADDR);
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Ephemeral socket for one search; replies come back to it by unicast
fn create_search_socket(ttl: u32) -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&addr.into())?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_nonblocking(true)?;

    Ok(UdpSocket::from_std(socket.into())?)
}

pub struct DiscoveryEngine {
    registry: RendererRegistry,
    settings: DiscoverySettings,
    client: reqwest::Client,
    /// Location -> instant before which it is not fetched again
    recent: Mutex<HashMap<String, Instant>>,
    /// Renderer uuid -> location its description was last fetched from
    locations: Mutex<HashMap<String, String>>,
}

impl DiscoveryEngine {
    pub fn new(registry: RendererRegistry, settings: DiscoverySettings) -> Result<Arc<Self>, UpnpError> {
        let client = reqwest::Client::builder()
            .timeout(settings.description_timeout())
            .build()?;

        Ok(Arc::new(Self {
            registry,
            settings,
            client,
            recent: Mutex::new(HashMap::new()),
            locations: Mutex::new(HashMap::new()),
        }))
    }

    /// Start the passive listener and the search schedule
    pub fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let listener = create_listener_socket()?;

        let listen = {
            let engine = self.clone();
            tokio::spawn(async move { engine.listen(listener).await })
        };
        let search = {
            let engine = self.clone();
            tokio::spawn(async move { engine.search_loop().await })
        };

        Ok(vec![listen, search])
    }

    async fn listen(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = [0u8; DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    let text = String::from_utf8_lossy(&buf[..len]);
                    self.handle_datagram(&text, from);
                }
                Err(e) => {
                    warn!("SSDP listener receive error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn search_loop(self: Arc<Self>) {
        let start = Instant::now() + self.settings.initial_delay();
        let mut ticker = tokio::time::interval_at(start, self.settings.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.search_once().await {
                Ok(replies) => debug!("Search window closed with {} replies", replies),
                Err(e) => warn!("SSDP search failed: {}", e),
            }
        }
    }

    /// Send one M-SEARCH burst and process replies until the search window closes
    pub async fn search_once(self: &Arc<Self>) -> Result<usize> {
        let socket = create_search_socket(self.settings.multicast_ttl)?;
        let request = build_msearch(self.settings.mx_secs);
        let target = SocketAddrV4::new(SSDP_MULTICAST_ADDR, SSDP_PORT);

        for _ in 0..self.settings.burst {
            socket.send_to(request.as_bytes(), target).await?;
        }
        debug!("Sent {} M-SEARCH requests for media renderers", self.settings.burst);

        let deadline = Instant::now() + self.settings.search_window();
        let mut buf = [0u8; DATAGRAM_SIZE];
        let mut replies = 0;

        loop {
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    replies += 1;
                    let text = String::from_utf8_lossy(&buf[..len]);
                    self.handle_datagram(&text, from);
                }
                Ok(Err(e)) => {
                    warn!("Search socket receive error: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(replies)
    }

    /// Parse one datagram; valid announcements spawn a description fetch
    pub fn handle_datagram(self: &Arc<Self>, text: &str, from: SocketAddr) -> Option<JoinHandle<()>> {
        let announcement = match parse_message(text) {
            Ok(SsdpMessage::Available(announcement)) => announcement,
            Ok(SsdpMessage::ByeBye { usn }) => {
                self.retire(usn.as_deref(), from);
                return None;
            }
            Err(UpnpError::UnsupportedMessage(_)) | Err(UpnpError::WrongTarget(_)) => {
                trace!("Ignoring SSDP message from {}", from);
                return None;
            }
            Err(e) => {
                debug!("Discarding SSDP message from {}: {}", from, e);
                return None;
            }
        };

        if !self.should_fetch(&announcement) {
            trace!("Skipping recently fetched {}", announcement.location);
            return None;
        }

        let engine = self.clone();
        Some(tokio::spawn(async move {
            let location = announcement.location.clone();
            if let Err(e) = engine.fetch_and_merge(&announcement).await {
                warn!("Failed to add renderer from {}: {}", location, e);
                engine.forget(&location);
            }
        }))
    }

    fn retire(&self, usn: Option<&str>, from: SocketAddr) {
        let Some(uuid) = usn.and_then(usn_uuid) else {
            debug!("Renderer byebye from {} without a usable USN", from);
            return;
        };

        // A device coming straight back must not wait out the refetch hold
        let location = self
            .locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(uuid);
        if let Some(location) = location {
            self.forget(&location);
        }

        match self.registry.retire(uuid) {
            RetireOutcome::Removed => info!("Renderer {} left the network", uuid),
            RetireOutcome::Detached => {
                info!("Selected renderer {} left the network; keeping its selection", uuid)
            }
            RetireOutcome::Unknown => debug!("Byebye from unknown renderer {}", uuid),
        }
    }

    /// Records the fetch as a side effect when it returns true
    fn should_fetch(&self, announcement: &Announcement) -> bool {
        let now = Instant::now();
        let hold = Duration::from_secs(announcement.max_age as u64).min(MAX_REFETCH_INTERVAL);
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());

        recent.retain(|_, until| *until > now);
        if recent.contains_key(&announcement.location) {
            return false;
        }
        recent.insert(announcement.location.clone(), now + hold);
        true
    }

    fn forget(&self, location: &str) {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(location);
    }

    /// Fetch the description document and merge the renderer it describes
    pub async fn fetch_and_merge(&self, announcement: &Announcement) -> Result<MergeOutcome, UpnpError> {
        debug!("Fetching description from {}", announcement.location);

        let response = self
            .client
            .get(&announcement.location)
            .send()
            .await?
            .error_for_status()?;
        let xml = response.text().await?;

        let description = parse_description(&xml, &announcement.location)?;
        let (uuid, name) = (description.uuid.clone(), description.name.clone());
        let outcome = self.registry.merge(description);
        self.locations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uuid.clone(), announcement.location.clone());

        match outcome {
            MergeOutcome::Inserted => info!("Discovered renderer {} ({})", name, uuid),
            MergeOutcome::Updated => info!("Updated renderer {} ({})", name, uuid),
            MergeOutcome::Unchanged => debug!("Renderer {} ({}) unchanged", name, uuid),
        }
        Ok(outcome)
    }
}
