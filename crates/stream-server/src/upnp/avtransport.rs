//! AVTransport SOAP actions
//!
//! Only the three actions needed to point a renderer at our stream and start
//! or stop it: SetAVTransportURI, Play and Stop.

use crate::error::UpnpError;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

pub const AV_TRANSPORT_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportAction {
    SetAvTransportUri { uri: String },
    Play { speed: u32 },
    Stop,
}

impl TransportAction {
    pub fn name(&self) -> &'static str {
        match self {
            TransportAction::SetAvTransportUri { .. } => "SetAVTransportURI",
            TransportAction::Play { .. } => "Play",
            TransportAction::Stop => "Stop",
        }
    }

    /// Value of the `SOAPAction` header, quotes included
    pub fn soap_action(&self) -> String {
        format!("\"{}#{}\"", AV_TRANSPORT_SERVICE, self.name())
    }

    /// Full SOAP envelope for this action on instance 0
    pub fn body(&self) -> String {
        let arguments = match self {
            TransportAction::SetAvTransportUri { uri } => format!(
                "<InstanceID>0</InstanceID><CurrentURI>{}</CurrentURI><CurrentURIMetaData></CurrentURIMetaData>",
                escape_xml(uri)
            ),
            TransportAction::Play { speed } => {
                format!("<InstanceID>0</InstanceID><Speed>{}</Speed>", speed)
            }
            TransportAction::Stop => "<InstanceID>0</InstanceID>".to_string(),
        };

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body><u:{action} xmlns:u="{service}">{arguments}</u:{action}></s:Body>
</s:Envelope>"#,
            action = self.name(),
            service = AV_TRANSPORT_SERVICE,
            arguments = arguments,
        )
    }
}

/// Sends transport actions; shared by every renderer
#[derive(Clone)]
pub struct AvTransportClient {
    client: reqwest::Client,
}

impl AvTransportClient {
    pub fn new(timeout: Duration) -> Result<Self, UpnpError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// POST `action` to `control_url`. Anything but HTTP 200 is an error.
    pub async fn send(&self, control_url: &str, action: &TransportAction) -> Result<(), UpnpError> {
        debug!("Sending {} to {}", action.name(), control_url);

        let response = self
            .client
            .post(control_url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPAction", action.soap_action())
            .body(action.body())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(UpnpError::SoapStatus {
                action: action.name(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Escape XML special characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upnp::description::XmlElement;

    #[test]
    fn test_soap_action_header() {
        assert_eq!(
            TransportAction::Play { speed: 1 }.soap_action(),
            "\"urn:schemas-upnp-org:service:AVTransport:1#Play\""
        );
        assert_eq!(
            TransportAction::SetAvTransportUri { uri: String::new() }.soap_action(),
            "\"urn:schemas-upnp-org:service:AVTransport:1#SetAVTransportURI\""
        );
    }

    #[test]
    fn test_set_uri_body_is_escaped_and_well_formed() {
        let action = TransportAction::SetAvTransportUri {
            uri: "http://10.0.0.4/stream.wav?a=1&b=<2>".to_string(),
        };
        let envelope = XmlElement::parse(&action.body()).unwrap();
        let call = envelope.child("Body").unwrap().child("SetAVTransportURI").unwrap();

        assert_eq!(call.child_text("InstanceID"), Some("0"));
        assert_eq!(call.child_text("CurrentURI"), Some("http://10.0.0.4/stream.wav?a=1&b=<2>"));
        assert!(call.child("CurrentURIMetaData").is_some());
    }

    #[test]
    fn test_play_and_stop_bodies() {
        let play = XmlElement::parse(&TransportAction::Play { speed: 1 }.body()).unwrap();
        let call = play.child("Body").unwrap().child("Play").unwrap();
        assert_eq!(call.child_text("Speed"), Some("1"));

        let stop = XmlElement::parse(&TransportAction::Stop.body()).unwrap();
        let call = stop.child("Body").unwrap().child("Stop").unwrap();
        assert_eq!(call.children.len(), 1);
        assert_eq!(call.child_text("InstanceID"), Some("0"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a&b<c>\"d'"), "a&amp;b&lt;c&gt;&quot;d&apos;");
    }
}
