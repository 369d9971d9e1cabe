// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! One daemon-level service record, and the builder used to construct one
//! outside the optimizer.

use crate::atom::Atom;
use crate::error::Error;
use crate::port::PortRange;
use crate::prefix::{Family, Prefix};
use crate::protocol::Protocol;
use crate::target::Target;
use derive_builder::Builder;
use std::collections::BTreeSet;
use std::fmt;

/// One daemon service definition: metadata plus the ports, bare protocols,
/// kernel modules, and up to two (one per family) destinations it applies
/// to.
///
/// Values are immutable once built; `targets()` is computed once at
/// construction time from the Cartesian product of every port-range-or-bare
/// -protocol atom with every non-null destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    name: String,
    version: Option<String>,
    short_name: Option<String>,
    description: Option<String>,
    ports: BTreeSet<PortRange>,
    protocols: BTreeSet<Protocol>,
    source_ports: BTreeSet<PortRange>,
    modules: BTreeSet<String>,
    destination_ipv4: Option<Prefix>,
    destination_ipv6: Option<Prefix>,
    targets: BTreeSet<Target>,
}

/// Intermediate, unvalidated field bag built by [`ServiceBuilder`]'s
/// generated setters, in the same two-step "plain struct, then validate and
/// promote" shape as this crate's `ExposePortBuilder` predecessor.
#[derive(Debug, Clone, Default, Builder)]
#[builder(pattern = "owned", setter(into, strip_option), default)]
#[builder(build_fn(private, name = "build_raw", error = "String"))]
struct RawService {
    name: String,
    version: Option<String>,
    short_name: Option<String>,
    description: Option<String>,
    ports: Vec<PortRange>,
    protocols: Vec<Protocol>,
    source_ports: Vec<PortRange>,
    modules: Vec<String>,
    destination_ipv4: Option<Prefix>,
    destination_ipv6: Option<Prefix>,
}

/// Public name for the generated raw builder; `RawService` stays private so
/// only this validated entry point is reachable from outside the module.
pub use self::RawServiceBuilder as ServiceBuilder;

impl ServiceBuilder {
    /// Validates the §3 invariants and produces the immutable [`Service`],
    /// failing with [`Error::InvalidArgument`] on the first violation found.
    pub fn build(self) -> Result<Service, Error> {
        let raw = self.build_raw().map_err(Error::InvalidArgument)?;
        Service::from_raw(raw)
    }
}

fn dedup_checked<T>(items: Vec<T>, what: &str) -> Result<BTreeSet<T>, Error>
where
    T: Ord + Clone + fmt::Display,
{
    let mut set = BTreeSet::new();
    for item in items {
        if !set.insert(item.clone()) {
            return Err(Error::InvalidArgument(format!(
                "duplicate {} entry: {}",
                what, item
            )));
        }
    }
    Ok(set)
}

impl Service {
    fn from_raw(raw: RawService) -> Result<Service, Error> {
        if raw.name.is_empty() {
            return Err(Error::InvalidArgument("service name must not be empty".into()));
        }

        let ports = dedup_checked(raw.ports, "port")?;
        let protocols = dedup_checked(raw.protocols, "protocol")?;
        let source_ports = dedup_checked(raw.source_ports, "source-port")?;
        let modules = dedup_checked(raw.modules, "module")?;

        if ports.is_empty() && protocols.is_empty() && modules.is_empty() {
            return Err(Error::InvalidArgument(
                "service must declare at least one of ports, protocols or modules".into(),
            ));
        }

        if raw.destination_ipv4.is_none() && raw.destination_ipv6.is_none() {
            return Err(Error::InvalidArgument(
                "service must declare at least one destination".into(),
            ));
        }
        if let Some(ref d) = raw.destination_ipv4 {
            if d.family() != Family::Ipv4 {
                return Err(Error::InvalidArgument(
                    "destination_ipv4 must be of family IPv4".into(),
                ));
            }
        }
        if let Some(ref d) = raw.destination_ipv6 {
            if d.family() != Family::Ipv6 {
                return Err(Error::InvalidArgument(
                    "destination_ipv6 must be of family IPv6".into(),
                ));
            }
        }

        let targets = derive_targets(&ports, &protocols, &raw.destination_ipv4, &raw.destination_ipv6);

        Ok(Service {
            name: raw.name,
            version: non_empty(raw.version),
            short_name: non_empty(raw.short_name),
            description: non_empty(raw.description),
            ports,
            protocols,
            source_ports,
            modules,
            destination_ipv4: raw.destination_ipv4,
            destination_ipv6: raw.destination_ipv6,
            targets,
        })
    }

    /// The service's name; used as file stem and daemon identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque free-form version string, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Opaque free-form short name, if any.
    pub fn short_name(&self) -> Option<&str> {
        self.short_name.as_deref()
    }

    /// Opaque free-form description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The declared port-ranges.
    pub fn ports(&self) -> &BTreeSet<PortRange> {
        &self.ports
    }

    /// The declared bare protocols.
    pub fn protocols(&self) -> &BTreeSet<Protocol> {
        &self.protocols
    }

    /// The declared source port-ranges (client endpoints; carried through
    /// untouched by the optimizer).
    pub fn source_ports(&self) -> &BTreeSet<PortRange> {
        &self.source_ports
    }

    /// Names of helper kernel modules this service requires.
    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// The IPv4 destination, if any.
    pub fn destination_ipv4(&self) -> Option<Prefix> {
        self.destination_ipv4
    }

    /// The IPv6 destination, if any.
    pub fn destination_ipv6(&self) -> Option<Prefix> {
        self.destination_ipv6
    }

    /// The derived target set: the Cartesian product of each port-range or
    /// bare-protocol atom with each non-null destination, in total order.
    /// Empty for a modules-only service.
    pub fn targets(&self) -> &BTreeSet<Target> {
        &self.targets
    }
}

impl PartialOrd for Service {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An arbitrary but total and deterministic order over every field, used
/// only so a [`crate::service_set::ServiceSet`] can compare its `services`
/// as a set (via `BTreeSet<&Service>`) regardless of emission order.
impl Ord for Service {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (
            &self.name,
            &self.version,
            &self.short_name,
            &self.description,
            &self.ports,
            &self.protocols,
            &self.source_ports,
            &self.modules,
            &self.destination_ipv4,
            &self.destination_ipv6,
        )
            .cmp(&(
                &other.name,
                &other.version,
                &other.short_name,
                &other.description,
                &other.ports,
                &other.protocols,
                &other.source_ports,
                &other.modules,
                &other.destination_ipv4,
                &other.destination_ipv6,
            ))
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

fn derive_targets(
    ports: &BTreeSet<PortRange>,
    protocols: &BTreeSet<Protocol>,
    destination_ipv4: &Option<Prefix>,
    destination_ipv6: &Option<Prefix>,
) -> BTreeSet<Target> {
    let atoms: Vec<Atom> = ports
        .iter()
        .copied()
        .map(Atom::of_port_range)
        .chain(protocols.iter().copied().map(Atom::of_protocol))
        .collect();
    let destinations: Vec<Prefix> = destination_ipv4.into_iter().chain(destination_ipv6).copied().collect();

    atoms
        .into_iter()
        .flat_map(|atom| destinations.iter().map(move |dest| Target::new(*dest, atom)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::UNSPECIFIED_IPV4;

    fn tcp(from: u32, to: u32) -> PortRange {
        PortRange::new(from, to, Protocol::Tcp).unwrap()
    }

    #[test]
    fn builds_a_minimal_service() {
        let svc = ServiceBuilder::default()
            .name("ssh")
            .ports(vec![tcp(22, 22)])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .build()
            .unwrap();
        assert_eq!(svc.name(), "ssh");
        assert_eq!(svc.ports().len(), 1);
        assert_eq!(svc.targets().len(), 1);
    }

    #[test]
    fn rejects_empty_name() {
        let result = ServiceBuilder::default()
            .name("")
            .ports(vec![tcp(22, 22)])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_no_ports_protocols_or_modules() {
        let result = ServiceBuilder::default()
            .name("empty")
            .destination_ipv4(UNSPECIFIED_IPV4)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_no_destination() {
        let result = ServiceBuilder::default()
            .name("ssh")
            .ports(vec![tcp(22, 22)])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_wrong_family_destination() {
        let v6 = Prefix::parse("::1/128").unwrap();
        let result = ServiceBuilder::default()
            .name("ssh")
            .ports(vec![tcp(22, 22)])
            .destination_ipv4(v6)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_duplicate_ports() {
        let result = ServiceBuilder::default()
            .name("ssh")
            .ports(vec![tcp(22, 22), tcp(22, 22)])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn modules_only_service_has_empty_targets() {
        let svc = ServiceBuilder::default()
            .name("ipsec")
            .modules(vec!["nf_conntrack_ipsec".to_string()])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .build()
            .unwrap();
        assert!(svc.targets().is_empty());
    }

    #[test]
    fn targets_is_full_cartesian_product() {
        let v6 = Prefix::parse("::/0").unwrap();
        let svc = ServiceBuilder::default()
            .name("dual")
            .ports(vec![tcp(22, 22), tcp(23, 23)])
            .destination_ipv4(UNSPECIFIED_IPV4)
            .destination_ipv6(v6)
            .build()
            .unwrap();
        // 2 atoms x 2 destinations
        assert_eq!(svc.targets().len(), 4);
    }
}
