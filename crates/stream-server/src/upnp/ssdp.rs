//! SSDP wire format: M-SEARCH requests and renderer announcements

use crate::error::UpnpError;
use std::collections::HashMap;
use std::net::Ipv4Addr;

pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

/// Device type searched for and accepted in announcements
pub const MEDIA_RENDERER_TYPE: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// Where an announcement came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnouncementKind {
    /// Unicast reply to our M-SEARCH
    SearchReply,
    /// `NOTIFY` with `NTS: ssdp:alive`
    Alive,
}

/// A renderer advertising its description document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announcement {
    pub kind: AnnouncementKind,
    pub location: String,
    /// Seconds the advertisement stays valid
    pub max_age: u32,
    pub usn: Option<String>,
}

/// A parsed SSDP datagram we care about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SsdpMessage {
    Available(Announcement),
    /// `NOTIFY` with `NTS: ssdp:byebye`
    ByeBye { usn: Option<String> },
}

/// Device uuid from a USN such as `uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1`
pub fn usn_uuid(usn: &str) -> Option<&str> {
    let uuid = usn.trim().strip_prefix("uuid:")?;
    let uuid = uuid.split("::").next().unwrap_or(uuid);
    (!uuid.is_empty()).then_some(uuid)
}

/// Build an M-SEARCH request for media renderers
pub fn build_msearch(mx: u8) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, SSDP_PORT, mx, MEDIA_RENDERER_TYPE
    )
}

/// Header map keyed by upper-cased name; the first occurrence wins
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, &'a str> {
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers
                .entry(name.trim().to_ascii_uppercase())
                .or_insert_with(|| value.trim());
        }
    }
    headers
}

/// Extract `max-age` from a CACHE-CONTROL value such as `max-age=1800`
pub fn parse_max_age(value: &str) -> Result<u32, UpnpError> {
    let invalid = || UpnpError::InvalidMaxAge(value.to_string());

    let directive = value
        .split(',')
        .map(str::trim)
        .find(|d| d.get(..7).is_some_and(|name| name.eq_ignore_ascii_case("max-age")))
        .ok_or_else(invalid)?;

    let (_, seconds) = directive.split_once('=').ok_or_else(invalid)?;
    match seconds.trim().parse::<u32>() {
        Ok(seconds) if seconds > 0 => Ok(seconds),
        _ => Err(invalid()),
    }
}

/// Classify a datagram received on an SSDP socket
pub fn parse_message(text: &str) -> Result<SsdpMessage, UpnpError> {
    let mut lines = text.lines();
    let start_line = lines.next().unwrap_or_default().trim();
    let headers = parse_headers(lines);

    let kind = if start_line.starts_with("HTTP/1.1 200") || start_line.starts_with("HTTP/1.0 200") {
        let target = headers.get("ST").ok_or(UpnpError::MissingHeader("ST"))?;
        if *target != MEDIA_RENDERER_TYPE {
            return Err(UpnpError::WrongTarget(target.to_string()));
        }
        AnnouncementKind::SearchReply
    } else if start_line.starts_with("NOTIFY * HTTP/1.1") {
        let target = headers.get("NT").ok_or(UpnpError::MissingHeader("NT"))?;
        if *target != MEDIA_RENDERER_TYPE {
            return Err(UpnpError::WrongTarget(target.to_string()));
        }
        let nts = headers.get("NTS").ok_or(UpnpError::MissingHeader("NTS"))?;
        match *nts {
            "ssdp:alive" => AnnouncementKind::Alive,
            "ssdp:byebye" => {
                return Ok(SsdpMessage::ByeBye {
                    usn: headers.get("USN").map(|usn| usn.to_string()),
                })
            }
            other => return Err(UpnpError::UnsupportedMessage(format!("NTS {}", other))),
        }
    } else {
        return Err(UpnpError::UnsupportedMessage(start_line.to_string()));
    };

    let location = headers
        .get("LOCATION")
        .filter(|location| !location.is_empty())
        .ok_or(UpnpError::MissingHeader("LOCATION"))?;
    let cache_control = headers
        .get("CACHE-CONTROL")
        .ok_or(UpnpError::MissingHeader("CACHE-CONTROL"))?;

    Ok(SsdpMessage::Available(Announcement {
        kind,
        location: location.to_string(),
        max_age: parse_max_age(cache_control)?,
        usn: headers.get("USN").map(|usn| usn.to_string()),
    }))
}
