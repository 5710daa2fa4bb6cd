use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom_derive::*;

/// Route distinguisher, 2-byte type plus 6-byte value.
#[derive(Clone, Copy, Debug, Default, NomBE, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteDistinguisher {
    pub typ: u16,
    pub val: [u8; 6],
}

impl RouteDistinguisher {
    pub const TYPE_AS: u16 = 0;
    pub const TYPE_IP: u16 = 1;

    pub fn from_as(asn: u16, assigned: u32) -> Self {
        let mut val = [0u8; 6];
        val[0..2].copy_from_slice(&asn.to_be_bytes());
        val[2..6].copy_from_slice(&assigned.to_be_bytes());
        Self {
            typ: Self::TYPE_AS,
            val,
        }
    }

    pub fn from_ip(ip: Ipv4Addr, assigned: u16) -> Self {
        let mut val = [0u8; 6];
        val[0..4].copy_from_slice(&ip.octets());
        val[4..6].copy_from_slice(&assigned.to_be_bytes());
        Self {
            typ: Self::TYPE_IP,
            val,
        }
    }

    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put_u16(self.typ);
        buf.put(&self.val[..]);
    }
}

impl fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.typ {
            Self::TYPE_AS => {
                let asn = u16::from_be_bytes([self.val[0], self.val[1]]);
                let num =
                    u32::from_be_bytes([self.val[2], self.val[3], self.val[4], self.val[5]]);
                write!(f, "{}:{}", asn, num)
            }
            _ => {
                let ip = Ipv4Addr::new(self.val[0], self.val[1], self.val[2], self.val[3]);
                let num = u16::from_be_bytes([self.val[4], self.val[5]]);
                write!(f, "{}:{}", ip, num)
            }
        }
    }
}
