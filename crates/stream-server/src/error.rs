//! Error types for streaming, discovery and renderer control

use crate::stream::ClientId;
use thiserror::Error;

/// Failures while registering or feeding streaming clients
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Client {0} is already connected")]
    ClientExists(ClientId),

    #[error("Cannot allocate a frame queue of capacity {0}")]
    QueueAllocation(usize),
}

/// Failures in SSDP message handling, description parsing and SOAP control
#[derive(Error, Debug)]
pub enum UpnpError {
    #[error("Not an SSDP message we handle: {0}")]
    UnsupportedMessage(String),

    #[error("Search target or notification type '{0}' is not a media renderer")]
    WrongTarget(String),

    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Invalid max-age in CACHE-CONTROL: '{0}'")]
    InvalidMaxAge(String),

    #[error("Invalid location URL '{0}'")]
    InvalidLocation(String),

    #[error("XML parsing error: {0}")]
    Xml(String),

    #[error("No MediaRenderer device in description")]
    NoRendererDevice,

    #[error("Missing UDN")]
    MissingUuid,

    #[error("Malformed UDN '{0}'")]
    MalformedUuid(String),

    #[error("No AVTransport service with a control URL")]
    NoAvTransport,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{action} failed with status {status}: {body}")]
    SoapStatus {
        action: &'static str,
        status: u16,
        body: String,
    },
}

/// Invalid or unreadable configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
