use nom::Parser;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use nom::IResult;
use nom::bytes::complete::take;
use nom::error::{ErrorKind, make_error};
use nom::number::complete::{be_u8, be_u24, be_u32};
use nom_derive::*;

use crate::{RouteDistinguisher, nlri_psize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvpnRouteType {
    EthernetAd,
    MacAdvertisement,
    InclusiveMulticast,
    EthernetSegment,
    Unknown(u8),
}

impl From<EvpnRouteType> for u8 {
    fn from(val: EvpnRouteType) -> u8 {
        use EvpnRouteType::*;
        match val {
            EthernetAd => 1,
            MacAdvertisement => 2,
            InclusiveMulticast => 3,
            EthernetSegment => 4,
            Unknown(val) => val,
        }
    }
}

impl From<u8> for EvpnRouteType {
    fn from(val: u8) -> Self {
        use EvpnRouteType::*;
        match val {
            1 => EthernetAd,
            2 => MacAdvertisement,
            3 => InclusiveMulticast,
            4 => EthernetSegment,
            _ => Unknown(val),
        }
    }
}

/// EVPN type-2 MAC/IP advertisement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EvpnMacAdv {
    pub rd: RouteDistinguisher,
    pub esi: [u8; 10],
    pub ether_tag: u32,
    pub mac: [u8; 6],
    pub ip: Option<Ipv4Addr>,
    pub label: u32,
}

/// EVPN type-3 inclusive multicast ethernet tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EvpnIncMulticast {
    pub rd: RouteDistinguisher,
    pub ether_tag: u32,
    pub originator: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvpnNlri {
    MacAdv(EvpnMacAdv),
    IncMulticast(EvpnIncMulticast),
}

impl EvpnNlri {
    pub fn rd(&self) -> &RouteDistinguisher {
        match self {
            EvpnNlri::MacAdv(v) => &v.rd,
            EvpnNlri::IncMulticast(v) => &v.rd,
        }
    }

    pub fn route_type(&self) -> EvpnRouteType {
        match self {
            EvpnNlri::MacAdv(_) => EvpnRouteType::MacAdvertisement,
            EvpnNlri::IncMulticast(_) => EvpnRouteType::InclusiveMulticast,
        }
    }

    pub fn emit(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        match self {
            EvpnNlri::MacAdv(v) => {
                v.rd.emit(&mut body);
                body.put(&v.esi[..]);
                body.put_u32(v.ether_tag);
                body.put_u8(48);
                body.put(&v.mac[..]);
                match v.ip {
                    Some(ip) => {
                        body.put_u8(32);
                        body.put(&ip.octets()[..]);
                    }
                    None => body.put_u8(0),
                }
                body.put(&[
                    (v.label >> 16) as u8,
                    (v.label >> 8) as u8,
                    v.label as u8,
                ][..]);
            }
            EvpnNlri::IncMulticast(v) => {
                v.rd.emit(&mut body);
                body.put_u32(v.ether_tag);
                match v.originator {
                    IpAddr::V4(ip) => {
                        body.put_u8(32);
                        body.put(&ip.octets()[..]);
                    }
                    IpAddr::V6(ip) => {
                        body.put_u8(128);
                        body.put(&ip.octets()[..]);
                    }
                }
            }
        }
        buf.put_u8(self.route_type().into());
        buf.put_u8(body.len() as u8);
        buf.put(&body[..]);
    }
}

/// Parse one EVPN NLRI element. Types this speaker does not support are
/// consumed via the length byte and yield None.
pub fn parse_evpn_nlri(input: &[u8]) -> IResult<&[u8], Option<EvpnNlri>> {
    let (input, typ) = be_u8(input)?;
    let route_type: EvpnRouteType = typ.into();
    let (input, length) = be_u8(input)?;
    if input.len() < length as usize {
        return Err(nom::Err::Error(make_error(input, ErrorKind::Eof)));
    }
    let (body, input) = input.split_at(length as usize);

    use EvpnRouteType::*;
    match route_type {
        MacAdvertisement => {
            let (body, rd) = RouteDistinguisher::parse_be(body)?;
            let (body, esi) = take(10usize).parse(body)?;
            let (body, ether_tag) = be_u32(body)?;
            let (body, mac_len) = be_u8(body)?;
            if nlri_psize(mac_len) != 6 {
                return Err(nom::Err::Error(make_error(body, ErrorKind::LengthValue)));
            }
            let (body, mac) = take(6usize).parse(body)?;
            let (body, ip_len) = be_u8(body)?;
            let ip_size = nlri_psize(ip_len);
            let (body, ip) = if ip_size == 4 {
                let (body, val) = be_u32(body)?;
                (body, Some(Ipv4Addr::from(val)))
            } else {
                let (body, _) = take(ip_size).parse(body)?;
                (body, None)
            };
            let (_, label) = be_u24(body)?;

            let mut adv = EvpnMacAdv {
                rd,
                esi: [0u8; 10],
                ether_tag,
                mac: [0u8; 6],
                ip,
                label,
            };
            adv.esi.copy_from_slice(esi);
            adv.mac.copy_from_slice(mac);
            Ok((input, Some(EvpnNlri::MacAdv(adv))))
        }
        InclusiveMulticast => {
            let (body, rd) = RouteDistinguisher::parse_be(body)?;
            let (body, ether_tag) = be_u32(body)?;
            let (body, addr_len) = be_u8(body)?;
            let (_, originator) = if addr_len == 32 {
                let (body, val) = be_u32(body)?;
                (body, IpAddr::V4(Ipv4Addr::from(val)))
            } else {
                let (body, val) = take(16usize).parse(body)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(val);
                (body, IpAddr::V6(Ipv6Addr::from(octets)))
            };
            Ok((
                input,
                Some(EvpnNlri::IncMulticast(EvpnIncMulticast {
                    rd,
                    ether_tag,
                    originator,
                })),
            ))
        }
        _ => Ok((input, None)),
    }
}

impl fmt::Display for EvpnNlri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvpnNlri::MacAdv(v) => write!(
                f,
                "2-[{}]-{}-{:02x}{:02x}:{:02x}{:02x}:{:02x}{:02x}",
                v.rd,
                v.ether_tag,
                v.mac[0],
                v.mac[1],
                v.mac[2],
                v.mac[3],
                v.mac[4],
                v.mac[5],
            ),
            EvpnNlri::IncMulticast(v) => {
                write!(f, "3-[{}]-{}-{}", v.rd, v.ether_tag, v.originator)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_adv_roundtrip() {
        let nlri = EvpnNlri::MacAdv(EvpnMacAdv {
            rd: RouteDistinguisher::from_as(64512, 7),
            esi: [0u8; 10],
            ether_tag: 0,
            mac: [0x00, 0x1c, 0x42, 0x1d, 0x71, 0x53],
            ip: None,
            label: 4096,
        });
        let mut buf = BytesMut::new();
        nlri.emit(&mut buf);
        let (rest, parsed) = parse_evpn_nlri(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, Some(nlri));
    }

    #[test]
    fn unsupported_type_is_skipped() {
        // Type 4 (ethernet segment) with a 4-byte body.
        let buf = [4u8, 4, 1, 2, 3, 4, 3, 0];
        let (rest, parsed) = parse_evpn_nlri(&buf).unwrap();
        assert_eq!(parsed, None);
        // The skipped element consumed exactly its length.
        assert_eq!(rest.len(), 2);
    }
}
