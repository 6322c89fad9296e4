//! HTTP audio streaming to any number of clients
//!
//! Every connected client owns a bounded [`FrameQueue`]. The frame task
//! broadcasts each captured frame into all queues through the
//! [`ClientRegistry`]; the HTTP handlers drain them into chunked response
//! bodies.

pub mod clients;
pub mod queue;
pub mod server;

pub use clients::{ClientInfo, ClientRegistry, ClientSession};
pub use queue::{FrameQueue, PushOutcome};
pub use server::{stream_router, StreamServer, StreamState};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one streaming connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Edge-triggered change in whether any client is connected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    /// The first client connected
    Active,
    /// The last client disconnected
    Idle,
}
