use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom::number::complete::be_u24;
use nom_derive::*;

use crate::{AttrEmitter, AttrFlags, AttrType, ParseBe};

fn u32_u24(val: u32) -> [u8; 3] {
    [(val >> 16) as u8, (val >> 8) as u8, val as u8]
}

/// PMSI tunnel attribute (RFC 6514) as used for EVPN inclusive multicast.
#[derive(Clone, Copy, NomBE, PartialEq, Eq, Hash)]
pub struct PmsiTunnel {
    pub flags: u8,
    pub tunnel_type: u8,
    #[nom(Parse = "be_u24")]
    pub label: u32,
    pub endpoint: Ipv4Addr,
}

impl PmsiTunnel {
    pub const TYPE_INGRESS_REPLICATION: u8 = 6;

    pub fn ingress_replication(label: u32, endpoint: Ipv4Addr) -> Self {
        Self {
            flags: 0,
            tunnel_type: Self::TYPE_INGRESS_REPLICATION,
            label,
            endpoint,
        }
    }
}

impl AttrEmitter for PmsiTunnel {
    fn attr_type(&self) -> AttrType {
        AttrType::PmsiTunnel
    }

    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_optional(true).with_transitive(true)
    }

    fn len(&self) -> Option<usize> {
        Some(9)
    }

    fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.tunnel_type);
        buf.put(&u32_u24(self.label)[..]);
        buf.put(&self.endpoint.octets()[..]);
    }
}

impl fmt::Display for PmsiTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Flags: {}, Tunnel Type: {}, Label: {}, Endpoint: {}",
            self.flags, self.tunnel_type, self.label, self.endpoint,
        )
    }
}

impl fmt::Debug for PmsiTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PMSI Tunnel: {}", self)
    }
}
