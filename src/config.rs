// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The TOML-backed configuration document: directories, zones, the control
//! program path, and the named template sets the synchronizer commits.

use crate::atom::Atom;
use crate::error::Error;
use crate::port::PortRange;
use crate::prefix::{Family, Prefix};
use crate::protocol::Protocol;
use crate::service::{Service, ServiceBuilder};
use crate::target::Target;
use serde::{de, Deserialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

fn default_system_dir() -> PathBuf {
    PathBuf::from("/usr/lib/firewalld/services")
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("/etc/firewalld/services")
}

fn default_firewall_cmd() -> PathBuf {
    PathBuf::from("/usr/bin/firewall-cmd")
}

/// The complete configuration document read at startup.
///
/// Every section beyond `zones` is optional, in the same "every section
/// optional" spirit as this crate's original configuration document.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory system-supplied service files live in.
    #[serde(default = "default_system_dir")]
    pub system_dir: PathBuf,

    /// Directory local overrides and additional services are written to.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// Path to the external firewall control program.
    #[serde(default = "default_firewall_cmd")]
    pub firewall_cmd: PathBuf,

    /// The zone(s) to synchronize into. The value can be non-existent, a
    /// single string, or a sequence of strings.
    ///
    /// # Example
    ///
    /// ```toml
    /// zones = "public"
    /// zones = ["public", "internal"]
    /// ```
    #[serde(default, deserialize_with = "option_string_or_seq_string")]
    pub zones: Option<Vec<String>>,

    /// The named template sets to optimize and commit.
    #[serde(default, rename = "service")]
    pub templates: Vec<TemplateSet>,
}

impl Config {
    /// Parses a configuration document from its TOML source text.
    pub fn parse(source: &str) -> Result<Config, Error> {
        toml::from_str(source).map_err(|e| Error::InvalidFormat {
            path: "<config>".to_owned(),
            reason: e.to_string(),
        })
    }

    /// Reads and parses the configuration document at `path`.
    pub fn load(path: &Path) -> Result<Config, Error> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::InvalidFormat {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// The configured zones, defaulting to `public` when the section is
    /// entirely absent.
    pub fn zones(&self) -> Vec<String> {
        self.zones
            .clone()
            .unwrap_or_else(|| vec!["public".to_owned()])
    }
}

/// One named template: the service metadata every emitted service inherits
/// (§3), plus the raw targets the optimizer reduces.
///
/// ```toml
/// [[service]]
/// name = "ssh"
/// short_name = "SSH"
/// targets = ["0.0.0.0/0 22/tcp", "::/0 22/tcp"]
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TemplateSet {
    /// The template's name; also the file stem of its first emitted service.
    pub name: String,
    /// Opaque free-form version string.
    #[serde(default)]
    pub version: Option<String>,
    /// Opaque free-form short name.
    #[serde(default)]
    pub short_name: Option<String>,
    /// Opaque free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Source port-ranges, formatted `"<from>-<to>/<protocol>"` or
    /// `"<port>/<protocol>"`, inherited unchanged by every emitted service.
    #[serde(default)]
    pub source_ports: Vec<String>,
    /// Kernel helper module names, inherited unchanged by every emitted
    /// service.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Raw desired-policy entries, formatted `"<destination> <port-or-protocol>"`,
    /// e.g. `"10.0.0.0/8 22/tcp"` or `"::/0 esp"`. Reduced by the optimizer
    /// into this template's emitted services.
    #[serde(default)]
    pub targets: Vec<String>,
}

impl TemplateSet {
    /// Parses every entry in `targets`, failing on the first malformed one.
    pub fn parsed_targets(&self) -> Result<Vec<Target>, Error> {
        self.targets.iter().map(|spec| parse_target_spec(spec)).collect()
    }

    /// Builds the template [`Service`] carrying this set's metadata.
    ///
    /// The optimizer only inherits `version`, `short_name`, `description`,
    /// `source_ports`, and `modules` from this value — its own ports,
    /// protocols, and destination exist only to satisfy [`Service`]'s
    /// construction invariants, and are discarded. When `modules` is
    /// non-empty that alone satisfies the invariant; otherwise the first
    /// parsed target stands in as a representative port/destination.
    pub fn template_service(&self) -> Result<Service, Error> {
        let source_ports = self
            .source_ports
            .iter()
            .map(|spec| parse_port_range_spec(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = ServiceBuilder::default()
            .name(self.name.clone())
            .source_ports(source_ports)
            .modules(self.modules.clone());
        if let Some(version) = &self.version {
            builder = builder.version(version.clone());
        }
        if let Some(short_name) = &self.short_name {
            builder = builder.short_name(short_name.clone());
        }
        if let Some(description) = &self.description {
            builder = builder.description(description.clone());
        }

        if self.modules.is_empty() {
            let targets = self.parsed_targets()?;
            let first = targets.first().ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "template '{}' declares no modules and no targets",
                    self.name
                ))
            })?;
            builder = match first.atom() {
                Atom::Port(range) => builder.ports(vec![range]),
                Atom::Protocol(protocol) => builder.protocols(vec![protocol]),
            };
            builder = set_destination(builder, first.destination());
        } else {
            // A representative destination is still required; the
            // unspecified IPv4 prefix is as good as any other, since the
            // optimizer discards it.
            builder = builder.destination_ipv4(crate::prefix::UNSPECIFIED_IPV4);
        }

        builder.build()
    }
}

fn set_destination(builder: ServiceBuilder, destination: Prefix) -> ServiceBuilder {
    match destination.family() {
        Family::Ipv4 => builder.destination_ipv4(destination),
        Family::Ipv6 => builder.destination_ipv6(destination),
    }
}

fn parse_port_range_spec(spec: &str) -> Result<PortRange, Error> {
    let idx = spec
        .find('/')
        .ok_or_else(|| Error::InvalidArgument(format!("'{}' is missing a '/<protocol>' suffix", spec)))?;
    let (port_part, protocol_part) = (&spec[..idx], &spec[idx + 1..]);
    let protocol = Protocol::parse(protocol_part)?;
    let (from, to) = match port_part.find('-') {
        Some(i) => (&port_part[..i], &port_part[i + 1..]),
        None => (port_part, port_part),
    };
    let from: u32 = from
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("'{}' is not a valid port", from)))?;
    let to: u32 = to
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("'{}' is not a valid port", to)))?;
    PortRange::new(from, to, protocol)
}

fn parse_atom_spec(spec: &str) -> Result<Atom, Error> {
    if spec.contains('/') {
        parse_port_range_spec(spec).map(Atom::of_port_range)
    } else {
        Protocol::parse(spec).map(Atom::of_protocol)
    }
}

fn parse_target_spec(spec: &str) -> Result<Target, Error> {
    let mut parts = spec.split_whitespace();
    let dest_str = parts
        .next()
        .ok_or_else(|| Error::InvalidArgument("empty target entry".to_owned()))?;
    let atom_str = parts.next().ok_or_else(|| {
        Error::InvalidArgument(format!("target '{}' is missing a port or protocol", spec))
    })?;
    if parts.next().is_some() {
        return Err(Error::InvalidArgument(format!(
            "target '{}' has trailing content after the port or protocol",
            spec
        )));
    }

    let destination = Prefix::parse(dest_str)?;
    let atom = parse_atom_spec(atom_str)?;
    Ok(Target::new(destination, atom))
}

// Grounded directly on this crate's own `string_or_seq_string`/
// `option_string_or_seq_string` deserializers: the configured value can be a
// bare string or a sequence of strings.
fn string_or_seq_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: de::Deserializer<'de>,
{
    struct StringOrSeqString(PhantomData<Vec<String>>);

    impl<'de> de::Visitor<'de> for StringOrSeqString {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_owned()])
        }

        fn visit_seq<S>(self, visitor: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            de::Deserialize::deserialize(de::value::SeqAccessDeserializer::new(visitor))
        }
    }

    deserializer.deserialize_any(StringOrSeqString(PhantomData))
}

fn option_string_or_seq_string<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: de::Deserializer<'de>,
{
    string_or_seq_string(deserializer).map(Some)
}
