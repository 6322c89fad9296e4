//! UPnP device description parsing
//!
//! The document is read into a small element tree with quick-xml; the
//! lookups below are plain functions over that tree.

use crate::error::UpnpError;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Url;
use wavecast_core::RendererDescription;

/// Device type prefix accepted for renderers, any version
pub const MEDIA_RENDERER_PREFIX: &str = "urn:schemas-upnp-org:device:MediaRenderer:";
/// Service type prefix of the transport service, any version
pub const AV_TRANSPORT_PREFIX: &str = "urn:schemas-upnp-org:service:AVTransport:";

const PNG_MIME: &str = "image/png";

/// Element of a parsed XML document. Namespace prefixes are dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn parse(xml: &str) -> Result<XmlElement, UpnpError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(XmlElement {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Default::default()
                }),
                Ok(Event::Empty(e)) => {
                    let element = XmlElement {
                        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                        ..Default::default()
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = root.or(Some(element)),
                    }
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| UpnpError::Xml(format!("bad text: {}", err)))?;
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Ok(Event::End(_)) => {
                    let Some(element) = stack.pop() else {
                        return Err(UpnpError::Xml("unbalanced end tag".to_string()));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = root.or(Some(element)),
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(UpnpError::Xml(format!(
                        "at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(UpnpError::Xml("unexpected end of document".to_string()));
        }
        root.ok_or_else(|| UpnpError::Xml("empty document".to_string()))
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of the first child called `name`, if non-empty
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|text| !text.is_empty())
    }
}

/// Depth-first search for the first device whose `deviceType` starts with `type_prefix`
pub fn find_device_by_type<'a>(device: &'a XmlElement, type_prefix: &str) -> Option<&'a XmlElement> {
    if device
        .child_text("deviceType")
        .is_some_and(|t| t.starts_with(type_prefix))
    {
        return Some(device);
    }

    device
        .child("deviceList")?
        .children_named("device")
        .find_map(|embedded| find_device_by_type(embedded, type_prefix))
}

/// Strip the `uuid:` prefix from a UDN
pub fn parse_uuid(udn: &str) -> Result<String, UpnpError> {
    let udn = udn.trim();
    match udn.strip_prefix("uuid:") {
        Some(uuid) if !uuid.is_empty() && !uuid.chars().any(char::is_whitespace) => {
            Ok(uuid.to_string())
        }
        _ => Err(UpnpError::MalformedUuid(udn.to_string())),
    }
}

/// Base for relative URLs: `URLBase` if present, else the origin that served the document
pub fn base_url(root: &XmlElement, location: &Url) -> Url {
    if let Some(base) = root.child_text("URLBase").and_then(|b| Url::parse(b).ok()) {
        return base;
    }

    let mut origin = location.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// Absolute control URL of the device's first AVTransport service
pub fn find_control_url(device: &XmlElement, base: &Url) -> Option<String> {
    let service = device
        .child("serviceList")?
        .children_named("service")
        .find(|s| {
            s.child_text("serviceType")
                .is_some_and(|t| t.starts_with(AV_TRANSPORT_PREFIX))
        })?;

    let control = service.child_text("controlURL")?;
    base.join(control).ok().map(String::from)
}

/// Absolute URL of the widest PNG icon; the first one wins ties
pub fn find_icon_url(device: &XmlElement, base: &Url) -> Option<String> {
    let mut best: Option<(u32, &str)> = None;

    for icon in device.child("iconList")?.children_named("icon") {
        if !icon
            .child_text("mimetype")
            .is_some_and(|m| m.eq_ignore_ascii_case(PNG_MIME))
        {
            continue;
        }
        let Some(url) = icon.child_text("url") else {
            continue;
        };
        let width = icon
            .child_text("width")
            .and_then(|w| w.parse::<u32>().ok())
            .unwrap_or(0);

        if best.map_or(true, |(best_width, _)| width > best_width) {
            best = Some((width, url));
        }
    }

    best.and_then(|(_, url)| base.join(url).ok().map(String::from))
}

/// Turn a description document fetched from `location` into a renderer
pub fn parse_description(xml: &str, location: &str) -> Result<RendererDescription, UpnpError> {
    let location_url =
        Url::parse(location).map_err(|_| UpnpError::InvalidLocation(location.to_string()))?;
    let root = XmlElement::parse(xml)?;
    let base = base_url(&root, &location_url);

    let device = root
        .child("device")
        .and_then(|device| find_device_by_type(device, MEDIA_RENDERER_PREFIX))
        .ok_or(UpnpError::NoRendererDevice)?;

    let uuid = parse_uuid(device.child_text("UDN").ok_or(UpnpError::MissingUuid)?)?;
    let control_url = find_control_url(device, &base).ok_or(UpnpError::NoAvTransport)?;
    let name = device
        .child_text("friendlyName")
        .map(str::to_string)
        .unwrap_or_else(|| uuid.clone());

    Ok(RendererDescription {
        uuid,
        name,
        control_url,
        icon_url: find_icon_url(device, &base),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONOS_LIKE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:ZonePlayer:1</deviceType>
    <friendlyName>192.168.1.30 - Sonos One</friendlyName>
    <UDN>uuid:RINCON_000E58A0B1C201400</UDN>
    <iconList>
      <icon><mimetype>image/png</mimetype><width>48</width><height>48</height><url>/img/icon-48.png</url></icon>
    </iconList>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
        <UDN>uuid:RINCON_000E58A0B1C201400_MS</UDN>
      </device>
      <device>
        <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
        <friendlyName>Living Room</friendlyName>
        <UDN>uuid:RINCON_000E58A0B1C201400_MR</UDN>
        <iconList>
          <icon><mimetype>image/jpeg</mimetype><width>512</width><url>/img/big.jpg</url></icon>
          <icon><mimetype>image/png</mimetype><width>120</width><url>/img/a.png</url></icon>
          <icon><mimetype>image/png</mimetype><width>240</width><url>/img/b.png</url></icon>
          <icon><mimetype>image/png</mimetype><width>240</width><url>/img/c.png</url></icon>
        </iconList>
        <serviceList>
          <service>
            <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
            <controlURL>/MediaRenderer/RenderingControl/Control</controlURL>
          </service>
          <service>
            <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
            <controlURL>/MediaRenderer/AVTransport/Control</controlURL>
          </service>
        </serviceList>
      </device>
    </deviceList>
  </device>
</root>"#;

    const LOCATION: &str = "http://192.168.1.30:1400/xml/device_description.xml";

    #[test]
    fn test_parse_embedded_renderer() {
        let description = parse_description(SONOS_LIKE, LOCATION).unwrap();

        assert_eq!(description.uuid, "RINCON_000E58A0B1C201400_MR");
        assert_eq!(description.name, "Living Room");
        assert_eq!(
            description.control_url,
            "http://192.168.1.30:1400/MediaRenderer/AVTransport/Control"
        );
        assert_eq!(
            description.icon_url.as_deref(),
            Some("http://192.168.1.30:1400/img/b.png")
        );
    }

    #[test]
    fn test_url_base_overrides_origin() {
        let xml = r#"<root>
  <URLBase>http://10.0.0.9:8200/</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:2</deviceType>
    <UDN>uuid:5f9ec1b3-ed59-4c3a-9a8e-000000000001</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:2</serviceType>
        <controlURL>ctl/AVTransport</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#;
        let description = parse_description(xml, "http://10.0.0.9:49152/desc.xml").unwrap();

        assert_eq!(description.control_url, "http://10.0.0.9:8200/ctl/AVTransport");
        // Falls back to the uuid when there is no friendly name
        assert_eq!(description.name, "5f9ec1b3-ed59-4c3a-9a8e-000000000001");
        assert_eq!(description.icon_url, None);
    }

    #[test]
    fn test_absolute_control_url_kept() {
        let xml = SONOS_LIKE.replace(
            "/MediaRenderer/AVTransport/Control",
            "http://192.168.1.31:1400/AVT",
        );
        let description = parse_description(&xml, LOCATION).unwrap();
        assert_eq!(description.control_url, "http://192.168.1.31:1400/AVT");
    }

    #[test]
    fn test_missing_av_transport_yields_nothing() {
        let xml = SONOS_LIKE.replace("service:AVTransport:1", "service:ConnectionManager:1");
        assert!(matches!(
            parse_description(&xml, LOCATION),
            Err(UpnpError::NoAvTransport)
        ));
    }

    #[test]
    fn test_missing_or_malformed_uuid() {
        let no_udn = SONOS_LIKE.replace("<UDN>uuid:RINCON_000E58A0B1C201400_MR</UDN>", "");
        assert!(matches!(parse_description(&no_udn, LOCATION), Err(UpnpError::MissingUuid)));

        let bad_udn = SONOS_LIKE.replace("uuid:RINCON_000E58A0B1C201400_MR", "RINCON_no_prefix");
        assert!(matches!(
            parse_description(&bad_udn, LOCATION),
            Err(UpnpError::MalformedUuid(_))
        ));
    }

    #[test]
    fn test_no_renderer_device() {
        let xml = SONOS_LIKE.replace("device:MediaRenderer:1", "device:Basic:1");
        assert!(matches!(
            parse_description(&xml, LOCATION),
            Err(UpnpError::NoRendererDevice)
        ));
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!(parse_uuid("uuid:abc-123").unwrap(), "abc-123");
        assert_eq!(parse_uuid("  uuid:abc-123 ").unwrap(), "abc-123");
        assert!(parse_uuid("uuid:").is_err());
        assert!(parse_uuid("uuid:abc 123").is_err());
        assert!(parse_uuid("abc-123").is_err());
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse_description("<root><device></root>", LOCATION),
            Err(UpnpError::Xml(_))
        ));
        assert!(matches!(
            parse_description(SONOS_LIKE, "not a url"),
            Err(UpnpError::InvalidLocation(_))
        ));
    }

    #[test]
    fn test_element_tree_text_and_namespaces() {
        let root = XmlElement::parse(
            r#"<s:Envelope xmlns:s="x"><s:Body><Name>Tom &amp; Jerry</Name><Empty/></s:Body></s:Envelope>"#,
        )
        .unwrap();
        assert_eq!(root.name, "Envelope");
        let body = root.child("Body").unwrap();
        assert_eq!(body.child_text("Name"), Some("Tom & Jerry"));
        assert!(body.child("Empty").is_some());
        assert_eq!(body.child_text("Empty"), None);
    }
}
