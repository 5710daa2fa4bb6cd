use nom::Parser;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use nom::error::{ErrorKind, make_error};
use nom::number::complete::{be_u8, be_u32, be_u128};
use nom_derive::*;

use crate::{
    Afi, AttrEmitter, AttrFlags, AttrType, ErmVpnNlri, EvpnNlri, Family, ParseNlri, RTargetNlri,
    Safi, Vpnv4Nlri, many0_complete, parse_evpn_nlri,
};

#[derive(Clone, Debug, NomBE)]
pub struct MpReachHeader {
    pub afi: Afi,
    pub safi: Safi,
    pub nhop_len: u8,
}

/// MP_REACH_NLRI: per-family typed NLRI list plus the family's nexthop form.
#[derive(Clone, Debug, PartialEq)]
pub enum MpReachAttr {
    Vpnv4 {
        nexthop: Ipv4Addr,
        routes: Vec<Vpnv4Nlri>,
    },
    Evpn {
        nexthop: IpAddr,
        routes: Vec<EvpnNlri>,
    },
    ErmVpn {
        nexthop: Ipv4Addr,
        routes: Vec<ErmVpnNlri>,
    },
    RTarget {
        nexthop: Ipv4Addr,
        routes: Vec<RTargetNlri>,
    },
}

impl MpReachAttr {
    pub fn family(&self) -> Family {
        match self {
            MpReachAttr::Vpnv4 { .. } => Family::InetVpn,
            MpReachAttr::Evpn { .. } => Family::Evpn,
            MpReachAttr::ErmVpn { .. } => Family::ErmVpn,
            MpReachAttr::RTarget { .. } => Family::RTarget,
        }
    }

    pub fn parse_nlri(input: &[u8]) -> nom::IResult<&[u8], Self> {
        if input.len() < 4 {
            return Err(nom::Err::Error(make_error(input, ErrorKind::Eof)));
        }
        let (input, header) = MpReachHeader::parse_be(input)?;
        match (header.afi, header.safi) {
            (Afi::Ip, Safi::MplsVpn) => {
                // Nexthop is RD (always zero) + IPv4 address.
                if header.nhop_len != 12 {
                    return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
                }
                let (input, _rd) = nom::bytes::complete::take(8usize).parse(input)?;
                let (input, nhop) = be_u32(input)?;
                let (input, _snpa) = be_u8(input)?;
                let (input, routes) =
                    many0_complete(Vpnv4Nlri::parse_nlri).parse(input)?;
                Ok((
                    input,
                    MpReachAttr::Vpnv4 {
                        nexthop: Ipv4Addr::from(nhop),
                        routes,
                    },
                ))
            }
            (Afi::L2vpn, Safi::Evpn) => {
                if header.nhop_len != 4 && header.nhop_len != 16 {
                    return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
                }
                let (input, nexthop) = if header.nhop_len == 4 {
                    let (input, addr) = be_u32(input)?;
                    (input, IpAddr::V4(Ipv4Addr::from(addr)))
                } else {
                    let (input, addr) = be_u128(input)?;
                    (input, IpAddr::V6(Ipv6Addr::from(addr)))
                };
                let (input, _snpa) = be_u8(input)?;
                let (input, routes) = many0_complete(parse_evpn_nlri).parse(input)?;
                let routes = routes.into_iter().flatten().collect();
                Ok((input, MpReachAttr::Evpn { nexthop, routes }))
            }
            (Afi::Ip, Safi::ErmVpn) => {
                if header.nhop_len != 4 {
                    return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
                }
                let (input, nhop) = be_u32(input)?;
                let (input, _snpa) = be_u8(input)?;
                let (input, routes) =
                    many0_complete(ErmVpnNlri::parse_nlri).parse(input)?;
                Ok((
                    input,
                    MpReachAttr::ErmVpn {
                        nexthop: Ipv4Addr::from(nhop),
                        routes,
                    },
                ))
            }
            (Afi::Ip, Safi::RTarget) => {
                if header.nhop_len != 4 {
                    return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
                }
                let (input, nhop) = be_u32(input)?;
                let (input, _snpa) = be_u8(input)?;
                let (input, routes) =
                    many0_complete(RTargetNlri::parse_nlri).parse(input)?;
                Ok((
                    input,
                    MpReachAttr::RTarget {
                        nexthop: Ipv4Addr::from(nhop),
                        routes,
                    },
                ))
            }
            _ => Err(nom::Err::Error(make_error(input, ErrorKind::NoneOf))),
        }
    }
}

impl AttrEmitter for MpReachAttr {
    fn attr_type(&self) -> AttrType {
        AttrType::MpReachNlri
    }

    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_optional(true)
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn emit(&self, buf: &mut BytesMut) {
        let afi_safi = self.family().afi_safi();
        buf.put_u16(afi_safi.afi.into());
        buf.put_u8(afi_safi.safi.into());
        match self {
            MpReachAttr::Vpnv4 { nexthop, routes } => {
                buf.put_u8(12);
                buf.put(&[0u8; 8][..]);
                buf.put(&nexthop.octets()[..]);
                buf.put_u8(0);
                for route in routes.iter() {
                    route.emit(buf);
                }
            }
            MpReachAttr::Evpn { nexthop, routes } => {
                match nexthop {
                    IpAddr::V4(addr) => {
                        buf.put_u8(4);
                        buf.put(&addr.octets()[..]);
                    }
                    IpAddr::V6(addr) => {
                        buf.put_u8(16);
                        buf.put(&addr.octets()[..]);
                    }
                }
                buf.put_u8(0);
                for route in routes.iter() {
                    route.emit(buf);
                }
            }
            MpReachAttr::ErmVpn { nexthop, routes } => {
                buf.put_u8(4);
                buf.put(&nexthop.octets()[..]);
                buf.put_u8(0);
                for route in routes.iter() {
                    route.emit(buf);
                }
            }
            MpReachAttr::RTarget { nexthop, routes } => {
                buf.put_u8(4);
                buf.put(&nexthop.octets()[..]);
                buf.put_u8(0);
                for route in routes.iter() {
                    route.emit(buf);
                }
            }
        }
    }
}

impl fmt::Display for MpReachAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpReachAttr::Vpnv4 { nexthop, routes } => {
                for route in routes.iter() {
                    writeln!(f, " {} => {}", route, nexthop)?;
                }
            }
            MpReachAttr::Evpn { nexthop, routes } => {
                for route in routes.iter() {
                    writeln!(f, " {} => {}", route, nexthop)?;
                }
            }
            MpReachAttr::ErmVpn { nexthop, routes } => {
                for route in routes.iter() {
                    writeln!(f, " {} => {}", route, nexthop)?;
                }
            }
            MpReachAttr::RTarget { nexthop, routes } => {
                for route in routes.iter() {
                    writeln!(f, " {} => {}", route, nexthop)?;
                }
            }
        }
        Ok(())
    }
}
