// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Hand-written codec between a [`Service`] and the firewalld-style
//! `<service>` XML document, over `quick_xml`'s pull-based event API.
//!
//! The document shape (attribute-bearing repeated siblings, no wrapper
//! element around the ports/protocols/modules) doesn't fit a serde-derived
//! mapping, so the codec walks `quick_xml` events directly instead.

use crate::error::Error;
use crate::port::PortRange;
use crate::prefix::{Prefix, UNSPECIFIED_IPV4, UNSPECIFIED_IPV6};
use crate::protocol::Protocol;
use crate::service::{Service, ServiceBuilder};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::BufRead;

fn invalid(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidFormat {
        path: name.to_owned(),
        reason: reason.into(),
    }
}

fn attr_value(name: &str, start: &BytesStart, key: &str) -> Result<Option<String>, Error> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| invalid(name, format!("malformed attribute: {}", e)))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| invalid(name, format!("malformed attribute '{}': {}", key, e)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_port_range(name: &str, start: &BytesStart) -> Result<PortRange, Error> {
    let protocol_str = attr_value(name, start, "protocol")?
        .ok_or_else(|| invalid(name, "<port> is missing the 'protocol' attribute"))?;
    let port_str = attr_value(name, start, "port")?
        .ok_or_else(|| invalid(name, "<port> is missing the 'port' attribute"))?;
    let protocol = Protocol::parse(&protocol_str)
        .map_err(|e| invalid(name, format!("<port>: {}", e)))?;

    let (from, to) = match port_str.find('-') {
        Some(idx) => (&port_str[..idx], &port_str[idx + 1..]),
        None => (port_str.as_str(), port_str.as_str()),
    };
    let from: u32 = from
        .parse()
        .map_err(|_| invalid(name, format!("'{}' is not a valid port", from)))?;
    let to: u32 = to
        .parse()
        .map_err(|_| invalid(name, format!("'{}' is not a valid port", to)))?;

    PortRange::new(from, to, protocol).map_err(|e| invalid(name, format!("<port>: {}", e)))
}

fn parse_bare_protocol(name: &str, start: &BytesStart) -> Result<Protocol, Error> {
    let value = attr_value(name, start, "value")?
        .ok_or_else(|| invalid(name, "<protocol> is missing the 'value' attribute"))?;
    Protocol::parse(&value).map_err(|e| invalid(name, format!("<protocol>: {}", e)))
}

fn parse_destination(
    name: &str,
    start: &BytesStart,
) -> Result<(Option<Prefix>, Option<Prefix>), Error> {
    let ipv4 = attr_value(name, start, "ipv4")?;
    let ipv6 = attr_value(name, start, "ipv6")?;
    if ipv4.is_none() && ipv6.is_none() {
        return Err(invalid(
            name,
            "<destination> has neither 'ipv4' nor 'ipv6' attribute",
        ));
    }
    let ipv4 = ipv4
        .map(|s| Prefix::parse(&s))
        .transpose()
        .map_err(|e| invalid(name, format!("<destination ipv4>: {}", e)))?;
    let ipv6 = ipv6
        .map(|s| Prefix::parse(&s))
        .transpose()
        .map_err(|e| invalid(name, format!("<destination ipv6>: {}", e)))?;
    Ok((ipv4, ipv6))
}

/// Parses a firewalld-style `<service>` document into a [`Service`] named
/// `name` (the document itself carries no name; callers derive it from the
/// file stem). `name` also identifies the document in any error raised.
///
/// Tolerates missing optional fields; a missing `<destination>` element
/// expands to both unspecified prefixes. Fails with [`Error::InvalidFormat`]
/// on a wrong root element, a duplicate `port`/`protocol`/`module` entry, or
/// an unparseable protocol, port, or prefix.
pub fn load_service(name: &str, source: impl BufRead) -> Result<Service, Error> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut builder = ServiceBuilder::default();
    builder.name(name.to_owned());

    let mut ports = Vec::new();
    let mut protocols = Vec::new();
    let mut source_ports = Vec::new();
    let mut modules = Vec::new();
    let mut destination_ipv4: Option<Prefix> = None;
    let mut destination_ipv6: Option<Prefix> = None;
    let mut saw_destination = false;

    let mut seen_root = false;
    let mut pending_text: Option<&'static str> = None;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| invalid(name, format!("XML parse error: {}", e)))?
        {
            Event::Eof => break,
            Event::Start(e) if e.name().as_ref() == b"service" => {
                if seen_root {
                    return Err(invalid(name, "more than one root <service> element"));
                }
                seen_root = true;
                if let Some(version) = attr_value(name, &e, "version")? {
                    builder.version(version);
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"service" => {
                if seen_root {
                    return Err(invalid(name, "more than one root <service> element"));
                }
                seen_root = true;
                if let Some(version) = attr_value(name, &e, "version")? {
                    builder.version(version);
                }
            }
            Event::Start(e) if !seen_root => {
                return Err(invalid(
                    name,
                    format!(
                        "expected root element <service>, found <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    ),
                ));
            }
            Event::Start(e) if e.name().as_ref() == b"short" => {
                pending_text = Some("short");
            }
            Event::Start(e) if e.name().as_ref() == b"description" => {
                pending_text = Some("description");
            }
            Event::End(e)
                if e.name().as_ref() == b"short" || e.name().as_ref() == b"description" =>
            {
                pending_text = None;
            }
            Event::Text(text) => {
                if let Some(field) = pending_text {
                    let value = decode_text(name, &text)?;
                    match field {
                        "short" => builder.short_name(value),
                        "description" => builder.description(value),
                        _ => unreachable!(),
                    };
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"port" => {
                ports.push(parse_port_range(name, &e)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"protocol" => {
                protocols.push(parse_bare_protocol(name, &e)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"source-port" => {
                source_ports.push(parse_port_range(name, &e)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"module" => {
                let module = attr_value(name, &e, "name")?
                    .ok_or_else(|| invalid(name, "<module> is missing the 'name' attribute"))?;
                modules.push(module);
            }
            Event::Empty(e) if e.name().as_ref() == b"destination" => {
                saw_destination = true;
                let (ipv4, ipv6) = parse_destination(name, &e)?;
                destination_ipv4 = ipv4;
                destination_ipv6 = ipv6;
            }
            Event::Start(e) if e.name().as_ref() == b"destination" => {
                saw_destination = true;
                let (ipv4, ipv6) = parse_destination(name, &e)?;
                destination_ipv4 = ipv4;
                destination_ipv6 = ipv6;
            }
            Event::End(_) | Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(invalid(name, "document has no root <service> element"));
    }
    if !saw_destination {
        destination_ipv4 = Some(UNSPECIFIED_IPV4);
        destination_ipv6 = Some(UNSPECIFIED_IPV6);
    }

    builder.ports(ports);
    builder.protocols(protocols);
    builder.source_ports(source_ports);
    builder.modules(modules);
    if let Some(ipv4) = destination_ipv4 {
        builder.destination_ipv4(ipv4);
    }
    if let Some(ipv6) = destination_ipv6 {
        builder.destination_ipv6(ipv6);
    }

    builder.build().map_err(|e| invalid(name, e.to_string()))
}

fn decode_text(name: &str, text: &BytesText) -> Result<String, Error> {
    Ok(text
        .unescape()
        .map_err(|e| invalid(name, format!("malformed text content: {}", e)))?
        .into_owned())
}

/// Serializes `service` back into the firewalld-style `<service>` document,
/// two-space indented, UTF-8 encoded. The inverse of [`load_service`] except
/// for the service's `name`, which has no on-document representation.
pub fn emit_service(service: &Service) -> Result<String, Error> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut root = BytesStart::new("service");
    if let Some(version) = service.version() {
        root.push_attribute(("version", version));
    }
    writer
        .write_event(Event::Start(root))
        .map_err(writer_error)?;

    if let Some(short) = service.short_name() {
        write_text_element(&mut writer, "short", short)?;
    }
    if let Some(description) = service.description() {
        write_text_element(&mut writer, "description", description)?;
    }

    for port in service.ports() {
        let mut e = BytesStart::new("port");
        e.push_attribute(("protocol", port.protocol().to_string().as_str()));
        e.push_attribute(("port", port_attr(port).as_str()));
        writer
            .write_event(Event::Empty(e))
            .map_err(writer_error)?;
    }
    for protocol in service.protocols() {
        let mut e = BytesStart::new("protocol");
        e.push_attribute(("value", protocol.to_string().as_str()));
        writer
            .write_event(Event::Empty(e))
            .map_err(writer_error)?;
    }
    for port in service.source_ports() {
        let mut e = BytesStart::new("source-port");
        e.push_attribute(("protocol", port.protocol().to_string().as_str()));
        e.push_attribute(("port", port_attr(port).as_str()));
        writer
            .write_event(Event::Empty(e))
            .map_err(writer_error)?;
    }
    for module in service.modules() {
        let mut e = BytesStart::new("module");
        e.push_attribute(("name", module.as_str()));
        writer
            .write_event(Event::Empty(e))
            .map_err(writer_error)?;
    }

    let both_wildcard = service.destination_ipv4() == Some(UNSPECIFIED_IPV4)
        && service.destination_ipv6() == Some(UNSPECIFIED_IPV6);
    if !both_wildcard && (service.destination_ipv4().is_some() || service.destination_ipv6().is_some())
    {
        let mut e = BytesStart::new("destination");
        if let Some(ipv4) = service.destination_ipv4() {
            e.push_attribute(("ipv4", ipv4.to_string().as_str()));
        }
        if let Some(ipv6) = service.destination_ipv6() {
            e.push_attribute(("ipv6", ipv6.to_string().as_str()));
        }
        writer
            .write_event(Event::Empty(e))
            .map_err(writer_error)?;
    }

    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new("service")))
        .map_err(writer_error)?;

    let bytes = writer.into_inner();
    String::from_utf8(bytes)
        .map_err(|e| Error::Assertion(format!("emitted non-UTF-8 service document: {}", e)))
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    text: &str,
) -> Result<(), Error> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(writer_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(writer_error)?;
    writer
        .write_event(Event::End(quick_xml::events::BytesEnd::new(tag)))
        .map_err(writer_error)?;
    Ok(())
}

fn port_attr(port: &PortRange) -> String {
    if port.is_single_port() {
        port.from().to_string()
    } else {
        format!("{}-{}", port.from(), port.to())
    }
}

fn writer_error(e: quick_xml::Error) -> Error {
    Error::Assertion(format!("XML writer failure: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(from: u32, to: u32) -> PortRange {
        PortRange::new(from, to, Protocol::Tcp).unwrap()
    }

    #[test]
    fn round_trips_a_minimal_service() {
        let svc = ServiceBuilder::default()
            .name("ssh")
            .ports(vec![tcp(22, 22)])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .destination_ipv6(UNSPECIFIED_IPV6)
            .build()
            .unwrap();
        let xml = emit_service(&svc).unwrap();
        assert!(!xml.contains("<destination"));

        let parsed = load_service("ssh", xml.as_bytes()).unwrap();
        assert_eq!(parsed.ports(), svc.ports());
        assert_eq!(parsed.destination_ipv4(), Some(UNSPECIFIED_IPV4));
        assert_eq!(parsed.destination_ipv6(), Some(UNSPECIFIED_IPV6));
    }

    #[test]
    fn missing_destination_expands_to_both_wildcards() {
        let xml = b"<service><port protocol=\"tcp\" port=\"22\"/></service>";
        let svc = load_service("ssh", &xml[..]).unwrap();
        assert_eq!(svc.destination_ipv4(), Some(UNSPECIFIED_IPV4));
        assert_eq!(svc.destination_ipv6(), Some(UNSPECIFIED_IPV6));
    }

    #[test]
    fn restricted_destination_round_trips() {
        let dest = Prefix::parse("10.0.0.0/8").unwrap();
        let svc = ServiceBuilder::default()
            .name("internal")
            .ports(vec![tcp(80, 80)])
            .destination_ipv4(dest)
            .build()
            .unwrap();
        let xml = emit_service(&svc).unwrap();
        assert!(xml.contains("ipv4=\"10.0.0.0/8\""));

        let parsed = load_service("internal", xml.as_bytes()).unwrap();
        assert_eq!(parsed.destination_ipv4(), Some(dest));
        assert_eq!(parsed.destination_ipv6(), None);
    }

    #[test]
    fn destination_with_no_attributes_is_invalid() {
        let xml = b"<service><port protocol=\"tcp\" port=\"22\"/><destination/></service>";
        assert!(load_service("ssh", &xml[..]).is_err());
    }

    #[test]
    fn wrong_root_element_is_invalid_format() {
        let xml = b"<not-a-service/>";
        let err = load_service("ssh", &xml[..]).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }

    #[test]
    fn unknown_protocol_is_invalid_format() {
        let xml = b"<service><port protocol=\"carrier-pigeon\" port=\"22\"/></service>";
        assert!(load_service("ssh", &xml[..]).is_err());
    }

    #[test]
    fn port_range_round_trips() {
        let svc = ServiceBuilder::default()
            .name("range")
            .ports(vec![tcp(1024, 65535)])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .build()
            .unwrap();
        let xml = emit_service(&svc).unwrap();
        assert!(xml.contains("port=\"1024-65535\""));
        let parsed = load_service("range", xml.as_bytes()).unwrap();
        assert_eq!(parsed.ports(), svc.ports());
    }

    #[test]
    fn short_and_description_round_trip() {
        let svc = ServiceBuilder::default()
            .name("ssh")
            .short_name("SSH")
            .description("Secure Shell")
            .ports(vec![tcp(22, 22)])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .build()
            .unwrap();
        let xml = emit_service(&svc).unwrap();
        let parsed = load_service("ssh", xml.as_bytes()).unwrap();
        assert_eq!(parsed.short_name(), Some("SSH"));
        assert_eq!(parsed.description(), Some("Secure Shell"));
    }
}
