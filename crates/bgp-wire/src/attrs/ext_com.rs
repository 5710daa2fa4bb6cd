use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom_derive::NomBE;

use crate::{AttrEmitter, AttrFlags, AttrType};

pub const EXT_COM_TRANS_TWO_OCTET_AS: u8 = 0x00;
pub const EXT_COM_TRANS_IPV4: u8 = 0x01;
pub const EXT_COM_TRANS_FOUR_OCTET_AS: u8 = 0x02;
pub const EXT_COM_TRANS_OPAQUE: u8 = 0x03;
pub const EXT_COM_TRANS_EXPERIMENTAL: u8 = 0x80;

pub const EXT_COM_SUB_ROUTE_TARGET: u8 = 0x02;
pub const EXT_COM_SUB_ROUTE_ORIGIN: u8 = 0x03;
pub const EXT_COM_SUB_ORIGIN_VN: u8 = 0x71;
pub const EXT_COM_SUB_TUNNEL_ENCAP: u8 = 0x0c;

/// One 64-bit extended community, partitioned by (high, low) type octets.
#[derive(Clone, Copy, Debug, Default, NomBE, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtCommunityValue {
    pub high_type: u8,
    pub low_type: u8,
    pub val: [u8; 6],
}

impl ExtCommunityValue {
    /// Route target in the as:nn form.
    pub fn route_target(asn: u16, val: u32) -> Self {
        let mut v = [0u8; 6];
        v[0..2].copy_from_slice(&asn.to_be_bytes());
        v[2..6].copy_from_slice(&val.to_be_bytes());
        Self {
            high_type: EXT_COM_TRANS_TWO_OCTET_AS,
            low_type: EXT_COM_SUB_ROUTE_TARGET,
            val: v,
        }
    }

    pub fn is_route_target(&self) -> bool {
        (self.high_type == EXT_COM_TRANS_TWO_OCTET_AS
            || self.high_type == EXT_COM_TRANS_IPV4
            || self.high_type == EXT_COM_TRANS_FOUR_OCTET_AS)
            && self.low_type == EXT_COM_SUB_ROUTE_TARGET
    }

    pub fn is_origin_vn(&self) -> bool {
        self.high_type == EXT_COM_TRANS_EXPERIMENTAL && self.low_type == EXT_COM_SUB_ORIGIN_VN
    }

    pub fn is_tunnel_encap(&self) -> bool {
        self.high_type == EXT_COM_TRANS_OPAQUE && self.low_type == EXT_COM_SUB_TUNNEL_ENCAP
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.high_type);
        buf.put_u8(self.low_type);
        buf.put(&self.val[..]);
    }
}

impl fmt::Display for ExtCommunityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.low_type {
            EXT_COM_SUB_ROUTE_TARGET => "rt",
            EXT_COM_SUB_ROUTE_ORIGIN => "soo",
            EXT_COM_SUB_ORIGIN_VN => "origin-vn",
            EXT_COM_SUB_TUNNEL_ENCAP => "encap",
            _ => "ext",
        };
        if self.high_type == EXT_COM_TRANS_TWO_OCTET_AS
            || self.high_type == EXT_COM_TRANS_EXPERIMENTAL
        {
            let asn = u16::from_be_bytes([self.val[0], self.val[1]]);
            let val = u32::from_be_bytes([self.val[2], self.val[3], self.val[4], self.val[5]]);
            write!(f, "{kind}:{asn}:{val}")
        } else {
            let ip = Ipv4Addr::new(self.val[0], self.val[1], self.val[2], self.val[3]);
            let val = u16::from_be_bytes([self.val[4], self.val[5]]);
            write!(f, "{kind}:{ip}:{val}")
        }
    }
}

#[derive(Clone, Default, NomBE, PartialEq, Eq, Hash)]
pub struct ExtCommunity(pub Vec<ExtCommunityValue>);

impl ExtCommunity {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, val: ExtCommunityValue) {
        self.0.push(val);
        self.0.sort();
        self.0.dedup();
    }

    pub fn route_targets(&self) -> impl Iterator<Item = &ExtCommunityValue> {
        self.0.iter().filter(|v| v.is_route_target())
    }

    pub fn has_tunnel_encap(&self) -> bool {
        self.0.iter().any(|v| v.is_tunnel_encap())
    }
}

impl AttrEmitter for ExtCommunity {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_optional(true).with_transitive(true)
    }

    fn attr_type(&self) -> AttrType {
        AttrType::ExtendedCom
    }

    fn len(&self) -> Option<usize> {
        Some(self.0.len() * 8)
    }

    fn emit(&self, buf: &mut BytesMut) {
        for val in &self.0 {
            val.encode(buf);
        }
    }
}

impl fmt::Display for ExtCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self
            .0
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        write!(f, "{v}")
    }
}

impl fmt::Debug for ExtCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtCommunity: {}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_target_classification() {
        let rt = ExtCommunityValue::route_target(64512, 100);
        assert!(rt.is_route_target());
        assert!(!rt.is_tunnel_encap());
        assert_eq!(rt.to_string(), "rt:64512:100");
    }
}
