// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The ports-axis of a [`Target`](crate::target::Target): either a bare
//! protocol (all ports) or a tagged port-range.

use crate::port::PortRange;
use crate::protocol::Protocol;
use std::cmp::Ordering;
use std::fmt;

/// A tagged union of "bare protocol" (all ports of that protocol admitted)
/// and "port-range" (only that range of ports, on a specific protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Atom {
    /// Only the given range of ports on the carried protocol.
    Port(PortRange),
    /// All ports (and non-port traffic) of the given protocol.
    Protocol(Protocol),
}

impl Atom {
    /// Builds a bare-protocol atom.
    pub fn of_protocol(protocol: Protocol) -> Self {
        Atom::Protocol(protocol)
    }

    /// Builds a port-ranged atom.
    pub fn of_port_range(range: PortRange) -> Self {
        Atom::Port(range)
    }

    /// The protocol this atom applies to, regardless of variant.
    pub fn protocol(&self) -> Protocol {
        match self {
            Atom::Port(range) => range.protocol(),
            Atom::Protocol(protocol) => *protocol,
        }
    }

    /// The carried port-range, if this is a port-ranged atom.
    pub fn port_range(&self) -> Option<PortRange> {
        match self {
            Atom::Port(range) => Some(*range),
            Atom::Protocol(_) => None,
        }
    }

    /// `true` iff this atom is the bare-protocol variant.
    pub fn is_bare_protocol(&self) -> bool {
        matches!(self, Atom::Protocol(_))
    }

    /// Coalesces two atoms per §3:
    ///
    /// * different protocols ⇒ none;
    /// * same protocol, one side bare ⇒ the bare atom (absorbs everything);
    /// * both port-ranged ⇒ coalesce of the ranges.
    pub fn coalesce(&self, other: &Atom) -> Option<Atom> {
        if self.protocol() != other.protocol() {
            return None;
        }
        match (self, other) {
            (Atom::Protocol(p), _) | (_, Atom::Protocol(p)) => Some(Atom::Protocol(*p)),
            (Atom::Port(a), Atom::Port(b)) => a.coalesce(b).map(Atom::Port),
        }
    }
}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    /// Port-ranged atoms strictly precede bare-protocol atoms; within each
    /// variant, ordered by port-range then by protocol.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Atom::Port(a), Atom::Port(b)) => a.cmp(b),
            (Atom::Port(_), Atom::Protocol(_)) => Ordering::Less,
            (Atom::Protocol(_), Atom::Port(_)) => Ordering::Greater,
            (Atom::Protocol(a), Atom::Protocol(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Atom::Port(range) => write!(f, "{}", range),
            Atom::Protocol(protocol) => write!(f, "{}", protocol),
        }
    }
}
