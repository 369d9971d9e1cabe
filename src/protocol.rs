// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! A closed enumeration of the protocol keywords this crate understands,
//! matching the IANA protocol-number registry.

use crate::error::Error;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// A single transport or network-layer protocol, identified by its
/// registered keyword.
///
/// Total order is by numeric protocol number: the discriminant of every
/// variant below *is* that number, so the derived [`Ord`] implementation
/// already matches §3's ordering requirement without any custom `cmp`.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    /// Internet Control Message Protocol.
    Icmp = 1,
    /// Internet Group Management Protocol.
    Igmp = 2,
    /// Transmission Control Protocol.
    Tcp = 6,
    /// User Datagram Protocol.
    Udp = 17,
    /// Generic Routing Encapsulation.
    Gre = 47,
    /// Encapsulating Security Payload.
    Esp = 50,
    /// Authentication Header.
    Ah = 51,
    /// ICMP for IPv6.
    #[strum(serialize = "ipv6-icmp")]
    Ipv6Icmp = 58,
    /// Open Shortest Path First.
    Ospf = 89,
    /// Protocol Independent Multicast.
    Pim = 103,
    /// Virtual Router Redundancy Protocol.
    Vrrp = 112,
    /// Layer Two Tunneling Protocol.
    L2tp = 115,
    /// Stream Control Transmission Protocol.
    Sctp = 132,
    /// UDP-Lite.
    #[strum(serialize = "udplite")]
    UdpLite = 136,
}

impl Protocol {
    /// Returns the IANA-registered protocol number for this protocol.
    pub fn number(self) -> u16 {
        self as u16
    }

    /// Parses a protocol keyword, failing with [`Error::InvalidArgument`]
    /// rather than the opaque error `FromStr` would otherwise produce.
    pub fn parse(s: &str) -> Result<Self, Error> {
        Protocol::from_str(s)
            .map_err(|_| Error::InvalidArgument(format!("unknown protocol '{}'", s)))
    }
}
