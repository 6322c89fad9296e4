use super::queue::{FrameQueue, PushOutcome};
use super::{ClientId, Presence};
use crate::error::StreamError;
use crate::types::{SampleFrame, StreamFormat};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct ClientEntry {
    addr: SocketAddr,
    format: StreamFormat,
    queue: Arc<FrameQueue>,
}

/// Snapshot of one connected client
#[derive(Clone, Debug, Serialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub format: StreamFormat,
    pub queued_frames: usize,
    pub overflows: u64,
}

struct Inner {
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
    queue_capacity: usize,
    enqueue_wait: Duration,
    presence: mpsc::UnboundedSender<Presence>,
}

/// Set of streaming clients shared by the HTTP handlers and the frame task
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

impl ClientRegistry {
    /// Create an empty registry. The receiver yields [`Presence`] edges in order.
    pub fn new(
        queue_capacity: usize,
        enqueue_wait: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Presence>) {
        let (presence, presence_rx) = mpsc::unbounded_channel();
        let registry = Self {
            inner: Arc::new(Inner {
                clients: Mutex::new(HashMap::new()),
                queue_capacity,
                enqueue_wait,
                presence,
            }),
        };
        (registry, presence_rx)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientEntry>> {
        self.inner.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a client and allocate its queue.
    ///
    /// The returned session unregisters the client when dropped.
    pub fn connect(
        &self,
        id: ClientId,
        addr: SocketAddr,
        format: StreamFormat,
    ) -> Result<ClientSession, StreamError> {
        let mut clients = self.lock();

        if clients.contains_key(&id) {
            return Err(StreamError::ClientExists(id));
        }

        let queue = Arc::new(FrameQueue::new(self.inner.queue_capacity)?);
        clients.insert(
            id,
            ClientEntry {
                addr,
                format,
                queue: queue.clone(),
            },
        );

        if clients.len() == 1 {
            // Sent under the lock so Active/Idle edges cannot be reordered
            let _ = self.inner.presence.send(Presence::Active);
        }
        info!("{} client {} connected from {} ({} total)", format, id, addr, clients.len());

        Ok(ClientSession {
            id,
            queue,
            registry: self.clone(),
        })
    }

    /// Remove a client. Returns false if it was not registered.
    pub fn disconnect(&self, id: ClientId) -> bool {
        let mut clients = self.lock();

        let Some(entry) = clients.remove(&id) else {
            return false;
        };
        entry.queue.close();

        if clients.is_empty() {
            let _ = self.inner.presence.send(Presence::Idle);
        }
        info!(
            "{} client {} ({}) disconnected ({} remaining)",
            entry.format,
            id,
            entry.addr,
            clients.len()
        );
        true
    }

    /// Offer a frame to every client queue. Returns the number of queues that accepted it.
    pub fn broadcast(&self, frame: &SampleFrame) -> usize {
        let clients = self.lock();
        let mut delivered = 0;

        for (id, entry) in clients.iter() {
            match entry.queue.push(frame.clone(), self.inner.enqueue_wait) {
                PushOutcome::Queued => delivered += 1,
                PushOutcome::ReplacedOldest => {
                    debug!("Queue full for client {}, dropped oldest frame", id);
                    delivered += 1;
                }
                PushOutcome::Dropped => {
                    warn!("Failed to queue frame {} for client {}", frame.sequence, id);
                }
            }
        }

        delivered
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut infos: Vec<ClientInfo> = self
            .lock()
            .iter()
            .map(|(id, entry)| ClientInfo {
                id: *id,
                addr: entry.addr,
                format: entry.format,
                queued_frames: entry.queue.len(),
                overflows: entry.queue.overflows(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

/// A registered client; dropping it disconnects the client
pub struct ClientSession {
    id: ClientId,
    queue: Arc<FrameQueue>,
    registry: ClientRegistry,
}

impl ClientSession {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.registry.disconnect(self.id);
    }
}
