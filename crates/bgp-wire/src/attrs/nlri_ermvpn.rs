use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom::IResult;
use nom::error::{ErrorKind, make_error};
use nom::number::complete::be_u8;
use nom_derive::*;

use crate::{ParseBe, ParseNlri, RouteDistinguisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErmVpnRouteType {
    NativeRoute,
    LocalTreeRoute,
    GlobalTreeRoute,
    Unknown(u8),
}

impl From<ErmVpnRouteType> for u8 {
    fn from(val: ErmVpnRouteType) -> u8 {
        use ErmVpnRouteType::*;
        match val {
            NativeRoute => 0,
            LocalTreeRoute => 1,
            GlobalTreeRoute => 2,
            Unknown(v) => v,
        }
    }
}

impl From<u8> for ErmVpnRouteType {
    fn from(val: u8) -> Self {
        use ErmVpnRouteType::*;
        match val {
            0 => NativeRoute,
            1 => LocalTreeRoute,
            2 => GlobalTreeRoute,
            v => Unknown(v),
        }
    }
}

/// Edge-replicated multicast VPN NLRI: typed, with RD, router id and the
/// (group, source) pair of the tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErmVpnNlri {
    pub route_type: ErmVpnRouteType,
    pub rd: RouteDistinguisher,
    pub router_id: Ipv4Addr,
    pub group: Ipv4Addr,
    pub source: Ipv4Addr,
}

impl ErmVpnNlri {
    const BODY_LEN: u8 = 20;

    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(self.route_type.into());
        buf.put_u8(Self::BODY_LEN);
        self.rd.emit(buf);
        buf.put(&self.router_id.octets()[..]);
        buf.put(&self.group.octets()[..]);
        buf.put(&self.source.octets()[..]);
    }
}

impl ParseNlri<ErmVpnNlri> for ErmVpnNlri {
    fn parse_nlri(input: &[u8]) -> IResult<&[u8], ErmVpnNlri> {
        let (input, typ) = be_u8(input)?;
        let (input, length) = be_u8(input)?;
        if length != Self::BODY_LEN || input.len() < length as usize {
            return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
        }
        let (input, rd) = RouteDistinguisher::parse_be(input)?;
        let (input, router_id) = Ipv4Addr::parse_be(input)?;
        let (input, group) = Ipv4Addr::parse_be(input)?;
        let (input, source) = Ipv4Addr::parse_be(input)?;
        Ok((
            input,
            ErmVpnNlri {
                route_type: typ.into(),
                rd,
                router_id,
                group,
                source,
            },
        ))
    }
}

impl fmt::Display for ErmVpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-[{}]-{},{},{}",
            u8::from(self.route_type),
            self.rd,
            self.router_id,
            self.group,
            self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ermvpn_roundtrip() {
        let nlri = ErmVpnNlri {
            route_type: ErmVpnRouteType::GlobalTreeRoute,
            rd: RouteDistinguisher::from_ip("192.168.0.10".parse().unwrap(), 2),
            router_id: "192.168.0.10".parse().unwrap(),
            group: "239.1.1.1".parse().unwrap(),
            source: "10.0.0.1".parse().unwrap(),
        };
        let mut buf = BytesMut::new();
        nlri.emit(&mut buf);
        let (rest, parsed) = ErmVpnNlri::parse_nlri(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, nlri);
    }
}
