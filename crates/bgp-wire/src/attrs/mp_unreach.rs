use nom::Parser;
use std::fmt;

use bytes::{BufMut, BytesMut};
use nom::error::{ErrorKind, make_error};
use nom_derive::*;

use crate::{
    Afi, AttrEmitter, AttrFlags, AttrType, ErmVpnNlri, EvpnNlri, Family, ParseNlri, RTargetNlri,
    Safi, Vpnv4Nlri, many0_complete, parse_evpn_nlri,
};

#[derive(Clone, Debug, NomBE)]
pub struct MpUnreachHeader {
    pub afi: Afi,
    pub safi: Safi,
}

/// MP_UNREACH_NLRI. The empty-list form is the End-of-RIB marker for the
/// family.
#[derive(Clone, Debug, PartialEq)]
pub enum MpUnreachAttr {
    Vpnv4(Vec<Vpnv4Nlri>),
    Evpn(Vec<EvpnNlri>),
    ErmVpn(Vec<ErmVpnNlri>),
    RTarget(Vec<RTargetNlri>),
}

impl MpUnreachAttr {
    pub fn family(&self) -> Family {
        match self {
            MpUnreachAttr::Vpnv4(_) => Family::InetVpn,
            MpUnreachAttr::Evpn(_) => Family::Evpn,
            MpUnreachAttr::ErmVpn(_) => Family::ErmVpn,
            MpUnreachAttr::RTarget(_) => Family::RTarget,
        }
    }

    /// End-of-RIB for the family: an MP_UNREACH with no NLRI.
    pub fn eor(family: Family) -> Option<Self> {
        match family {
            Family::InetVpn => Some(MpUnreachAttr::Vpnv4(Vec::new())),
            Family::Evpn => Some(MpUnreachAttr::Evpn(Vec::new())),
            Family::ErmVpn => Some(MpUnreachAttr::ErmVpn(Vec::new())),
            Family::RTarget => Some(MpUnreachAttr::RTarget(Vec::new())),
            Family::Inet => None,
        }
    }

    pub fn is_eor(&self) -> bool {
        match self {
            MpUnreachAttr::Vpnv4(v) => v.is_empty(),
            MpUnreachAttr::Evpn(v) => v.is_empty(),
            MpUnreachAttr::ErmVpn(v) => v.is_empty(),
            MpUnreachAttr::RTarget(v) => v.is_empty(),
        }
    }

    pub fn parse_nlri(input: &[u8]) -> nom::IResult<&[u8], Self> {
        if input.len() < 3 {
            return Err(nom::Err::Error(make_error(input, ErrorKind::Eof)));
        }
        let (input, header) = MpUnreachHeader::parse_be(input)?;
        match (header.afi, header.safi) {
            (Afi::Ip, Safi::MplsVpn) => {
                let (input, withdraws) =
                    many0_complete(Vpnv4Nlri::parse_nlri).parse(input)?;
                Ok((input, MpUnreachAttr::Vpnv4(withdraws)))
            }
            (Afi::L2vpn, Safi::Evpn) => {
                let (input, withdraws) = many0_complete(parse_evpn_nlri).parse(input)?;
                let withdraws = withdraws.into_iter().flatten().collect();
                Ok((input, MpUnreachAttr::Evpn(withdraws)))
            }
            (Afi::Ip, Safi::ErmVpn) => {
                let (input, withdraws) =
                    many0_complete(ErmVpnNlri::parse_nlri).parse(input)?;
                Ok((input, MpUnreachAttr::ErmVpn(withdraws)))
            }
            (Afi::Ip, Safi::RTarget) => {
                let (input, withdraws) =
                    many0_complete(RTargetNlri::parse_nlri).parse(input)?;
                Ok((input, MpUnreachAttr::RTarget(withdraws)))
            }
            _ => Err(nom::Err::Error(make_error(input, ErrorKind::NoneOf))),
        }
    }
}

impl AttrEmitter for MpUnreachAttr {
    fn attr_type(&self) -> AttrType {
        AttrType::MpUnreachNlri
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
            MpUnreachAttr::Vpnv4(withdraws) => {
                for withdraw in withdraws.iter() {
                    withdraw.emit(buf);
                }
            }
            MpUnreachAttr::Evpn(withdraws) => {
                for withdraw in withdraws.iter() {
                    withdraw.emit(buf);
                }
            }
            MpUnreachAttr::ErmVpn(withdraws) => {
                for withdraw in withdraws.iter() {
                    withdraw.emit(buf);
                }
            }
            MpUnreachAttr::RTarget(withdraws) => {
                for withdraw in withdraws.iter() {
                    withdraw.emit(buf);
                }
            }
        }
    }
}

impl fmt::Display for MpUnreachAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eor() {
            return writeln!(f, " EoR: {}", self.family());
        }
        match self {
            MpUnreachAttr::Vpnv4(withdraws) => {
                for withdraw in withdraws.iter() {
                    writeln!(f, " withdraw {}", withdraw)?;
                }
            }
            MpUnreachAttr::Evpn(withdraws) => {
                for withdraw in withdraws.iter() {
                    writeln!(f, " withdraw {}", withdraw)?;
                }
            }
            MpUnreachAttr::ErmVpn(withdraws) => {
                for withdraw in withdraws.iter() {
                    writeln!(f, " withdraw {}", withdraw)?;
                }
            }
            MpUnreachAttr::RTarget(withdraws) => {
                for withdraw in withdraws.iter() {
                    writeln!(f, " withdraw {}", withdraw)?;
                }
            }
        }
        Ok(())
    }
}
