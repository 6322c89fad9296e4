//! UPnP renderer discovery and AVTransport control

pub mod avtransport;
pub mod control;
pub mod description;
pub mod discovery;
pub mod ssdp;

pub use avtransport::{AvTransportClient, TransportAction};
pub use control::{ControlEngine, ControlEvent, ControlHandle};
pub use description::parse_description;
pub use discovery::DiscoveryEngine;
pub use ssdp::{Announcement, AnnouncementKind, SsdpMessage};
