use nom::Parser;
use std::collections::BTreeSet;

use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom_derive::*;

use crate::{
    AsPath, AtomicAggregate, AttrSet, AttributeFlags, Community, EdgeDiscovery, EdgeForwarding,
    ExtCommunity, LocalPref, Med, MpReachAttr, MpUnreachAttr, NexthopAttr, Origin, ParseBe,
    PmsiTunnel, WireError,
};

use super::Aggregator;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AttrType {
    Origin,
    AsPath,
    NextHop,
    Med,
    LocalPref,
    AtomicAggregate,
    Aggregator,
    Community,
    MpReachNlri,
    MpUnreachNlri,
    ExtendedCom,
    PmsiTunnel,
    EdgeDiscovery,
    EdgeForwarding,
    Unknown(u8),
}

impl From<u8> for AttrType {
    fn from(attr_type: u8) -> Self {
        use AttrType::*;
        match attr_type {
            1 => Origin,
            2 => AsPath,
            3 => NextHop,
            4 => Med,
            5 => LocalPref,
            6 => AtomicAggregate,
            7 => Aggregator,
            8 => Community,
            14 => MpReachNlri,
            15 => MpUnreachNlri,
            16 => ExtendedCom,
            22 => PmsiTunnel,
            241 => EdgeDiscovery,
            242 => EdgeForwarding,
            v => Unknown(v),
        }
    }
}

impl From<AttrType> for u8 {
    fn from(attr_type: AttrType) -> Self {
        use AttrType::*;
        match attr_type {
            Origin => 1,
            AsPath => 2,
            NextHop => 3,
            Med => 4,
            LocalPref => 5,
            AtomicAggregate => 6,
            Aggregator => 7,
            Community => 8,
            MpReachNlri => 14,
            MpUnreachNlri => 15,
            ExtendedCom => 16,
            PmsiTunnel => 22,
            EdgeDiscovery => 241,
            EdgeForwarding => 242,
            Unknown(v) => v,
        }
    }
}

impl AttrType {
    /// Body size for attributes whose wire length is fixed.
    fn fixed_len(&self) -> Option<usize> {
        use AttrType::*;
        match self {
            Origin => Some(1),
            NextHop => Some(4),
            Med => Some(4),
            LocalPref => Some(4),
            AtomicAggregate => Some(0),
            Aggregator => Some(6),
            _ => None,
        }
    }
}

/// An unrecognized optional transitive attribute, carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownAttr {
    pub flags: u8,
    pub attr_type: u8,
    pub data: Vec<u8>,
}

pub struct ParsedAttrs {
    pub attrs: AttrSet,
    pub mp_reach: Option<MpReachAttr>,
    pub mp_unreach: Option<MpUnreachAttr>,
}

/// Parse the path-attribute block of an UPDATE, enforcing the RFC 4271 §6.3
/// rules: duplicate codes, flag bits, fixed lengths, origin and nexthop
/// value checks, unrecognized well-known attributes.
pub fn parse_bgp_update_attributes(
    input: &[u8],
    length: u16,
) -> Result<(&[u8], ParsedAttrs), WireError> {
    if input.len() < length as usize {
        return Err(WireError::Truncated {
            type_name: "BgpPathAttribute",
            needed: length as usize - input.len(),
        });
    }
    let (attr_block, input) = input.split_at(length as usize);
    let mut remaining = attr_block;

    let mut seen: BTreeSet<u8> = BTreeSet::new();
    let mut attrs = AttrSet::default();
    let mut mp_reach: Option<MpReachAttr> = None;
    let mut mp_unreach: Option<MpUnreachAttr> = None;

    while !remaining.is_empty() {
        let attr_head = remaining;
        let (rest, flags_byte) = be_u8::<_, nom::error::Error<&[u8]>>(remaining)
            .map_err(WireError::from)?;
        let flags = AttributeFlags::from_bits_retain(flags_byte);
        let (rest, type_byte) = be_u8::<_, nom::error::Error<&[u8]>>(rest)
            .map_err(WireError::from)?;
        let attr_type: AttrType = type_byte.into();

        let (rest, attr_len) = if flags.is_extended() {
            let (rest, bytes) = take::<_, _, nom::error::Error<&[u8]>>(2usize)
                .parse(rest)
                .map_err(WireError::from)?;
            (rest, u16::from_be_bytes([bytes[0], bytes[1]]))
        } else {
            let (rest, len) =
                be_u8::<_, nom::error::Error<&[u8]>>(rest).map_err(WireError::from)?;
            (rest, len as u16)
        };

        if rest.len() < attr_len as usize {
            return Err(WireError::MalformedAttributeList);
        }
        let (payload, rest) = rest.split_at(attr_len as usize);

        // One appearance per attribute code.
        if !seen.insert(type_byte) {
            return Err(WireError::MalformedAttributeList);
        }

        // Flag bits must agree with the attribute's category.
        let header_len = attr_head.len() - rest.len();
        if let Some(expected) = AttributeFlags::expected(type_byte) {
            let significant = flags & (AttributeFlags::OPTIONAL | AttributeFlags::TRANSITIVE);
            if significant != expected {
                return Err(WireError::AttributeFlagsError {
                    attr_type: type_byte,
                    data: attr_head[..header_len].to_vec(),
                });
            }
        } else if !flags.is_optional() {
            // A well-known attribute this speaker does not recognize.
            return Err(WireError::UnrecognizedWellKnownAttribute(type_byte));
        }

        // Fixed-size attributes must carry exactly their size.
        if let Some(fixed) = attr_type.fixed_len() {
            if attr_len as usize != fixed {
                return Err(WireError::AttributeLengthError {
                    attr_type: type_byte,
                    data: attr_head[..header_len].to_vec(),
                });
            }
        }

        match attr_type {
            AttrType::Origin => {
                let val = payload[0];
                let origin =
                    Origin::try_from_u8(val).ok_or(WireError::InvalidOrigin(val))?;
                attrs.origin = Some(origin);
            }
            AttrType::AsPath => {
                let (_, aspath) = AsPath::parse_be(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| WireError::MalformedAsPath)?;
                attrs.aspath = Some(aspath);
            }
            AttrType::NextHop => {
                let (_, nexthop) = NexthopAttr::parse_be(payload).map_err(WireError::from)?;
                if nexthop.nexthop.is_unspecified() {
                    return Err(WireError::InvalidNexthop);
                }
                attrs.nexthop = Some(nexthop);
            }
            AttrType::Med => {
                let (_, med) = Med::parse_be(payload).map_err(WireError::from)?;
                attrs.med = Some(med);
            }
            AttrType::LocalPref => {
                let (_, local_pref) = LocalPref::parse_be(payload).map_err(WireError::from)?;
                attrs.local_pref = Some(local_pref);
            }
            AttrType::AtomicAggregate => {
                attrs.atomic_aggregate = Some(AtomicAggregate::new());
            }
            AttrType::Aggregator => {
                let (_, aggregator) = Aggregator::parse_be(payload).map_err(WireError::from)?;
                attrs.aggregator = Some(aggregator);
            }
            AttrType::Community => {
                let (_, com) = Community::parse_be(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                        WireError::OptionalAttributeError(type_byte)
                    })?;
                attrs.com = Some(com);
            }
            AttrType::ExtendedCom => {
                let (_, ecom) = ExtCommunity::parse_be(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                        WireError::OptionalAttributeError(type_byte)
                    })?;
                attrs.ecom = Some(ecom);
            }
            AttrType::PmsiTunnel => {
                let (_, pmsi) = PmsiTunnel::parse_be(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                        WireError::OptionalAttributeError(type_byte)
                    })?;
                attrs.pmsi_tunnel = Some(pmsi);
            }
            AttrType::EdgeDiscovery => {
                let (_, edge) = EdgeDiscovery::parse_be(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                        WireError::OptionalAttributeError(type_byte)
                    })?;
                attrs.edge_discovery = Some(edge);
            }
            AttrType::EdgeForwarding => {
                let (_, edge) = EdgeForwarding::parse_be(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                        WireError::OptionalAttributeError(type_byte)
                    })?;
                attrs.edge_forwarding = Some(edge);
            }
            AttrType::MpReachNlri => {
                let (_, reach) = MpReachAttr::parse_nlri(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                        WireError::OptionalAttributeError(type_byte)
                    })?;
                mp_reach = Some(reach);
            }
            AttrType::MpUnreachNlri => {
                let (_, unreach) = MpUnreachAttr::parse_nlri(payload)
                    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                        WireError::OptionalAttributeError(type_byte)
                    })?;
                mp_unreach = Some(unreach);
            }
            AttrType::Unknown(code) => {
                // Optional bit checked above, so this is optional. Only the
                // transitive ones are carried.
                if flags.is_transitive() {
                    attrs.unknown.push(UnknownAttr {
                        flags: flags_byte,
                        attr_type: code,
                        data: payload.to_vec(),
                    });
                }
            }
        }
        remaining = rest;
    }

    Ok((
        input,
        ParsedAttrs {
            attrs,
            mp_reach,
            mp_unreach,
        },
    ))
}
