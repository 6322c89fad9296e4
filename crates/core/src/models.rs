use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted selection set, keyed by renderer uuid with the display name as value
pub type SelectedRenderers = BTreeMap<String, String>;

/// A UPnP media renderer known to this device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renderer {
    /// Discovery identity (the value after `uuid:` in the device UDN)
    pub uuid: String,
    pub name: String,
    /// Absolute AVTransport control URL, absent for placeholders created by a selection pass
    pub control_url: Option<String>,
    /// Largest PNG icon advertised by the device
    pub icon_url: Option<String>,
    pub selected: bool,
}

impl Renderer {
    /// Create a bare renderer with no URLs, used when a selected uuid hasn't been discovered yet
    pub fn placeholder(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            control_url: None,
            icon_url: None,
            selected: false,
        }
    }

    /// Build a renderer from a freshly parsed description (unselected)
    pub fn from_description(description: RendererDescription) -> Self {
        Self {
            uuid: description.uuid,
            name: description.name,
            control_url: Some(description.control_url),
            icon_url: description.icon_url,
            selected: false,
        }
    }

    /// Whether transport actions can be sent to this renderer
    pub fn is_controllable(&self) -> bool {
        self.control_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Result of successfully parsing a device description document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererDescription {
    pub uuid: String,
    pub name: String,
    pub control_url: String,
    pub icon_url: Option<String>,
}

/// Outcome of merging a description into the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Outcome of a renderer leaving the network
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetireOutcome {
    /// Unselected; the entry was dropped
    Removed,
    /// Selected; kept as a placeholder without URLs until it reappears
    Detached,
    Unknown,
}
