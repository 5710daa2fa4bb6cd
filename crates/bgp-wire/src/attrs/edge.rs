use nom::Parser;
use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom::IResult;
use nom_derive::*;

use crate::{AttrEmitter, AttrFlags, AttrType, ParseBe, many0_complete};

/// One labeled edge in a multicast distribution tree.
#[derive(Clone, Copy, Debug, NomBE, PartialEq, Eq, Hash)]
pub struct Edge {
    pub address: Ipv4Addr,
    pub label_begin: u32,
    pub label_end: u32,
}

/// Edge discovery attribute carried on ERMVPN routes: the set of candidate
/// edges with their label ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EdgeDiscovery {
    pub edges: Vec<Edge>,
}

impl AttrEmitter for EdgeDiscovery {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_optional(true).with_transitive(true)
    }

    fn attr_type(&self) -> AttrType {
        AttrType::EdgeDiscovery
    }

    fn len(&self) -> Option<usize> {
        Some(self.edges.len() * 12)
    }

    fn emit(&self, buf: &mut BytesMut) {
        for edge in self.edges.iter() {
            buf.put(&edge.address.octets()[..]);
            buf.put_u32(edge.label_begin);
            buf.put_u32(edge.label_end);
        }
    }
}

impl ParseBe<EdgeDiscovery> for EdgeDiscovery {
    fn parse_be(input: &[u8]) -> IResult<&[u8], EdgeDiscovery> {
        let (input, edges) = many0_complete(Edge::parse_be).parse(input)?;
        Ok((input, EdgeDiscovery { edges }))
    }
}

impl fmt::Display for EdgeDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for edge in self.edges.iter() {
            write!(
                f,
                " {}:{}-{}",
                edge.address, edge.label_begin, edge.label_end
            )?;
        }
        Ok(())
    }
}

/// One forwarding entry: the labels to use towards an adjacent edge.
#[derive(Clone, Copy, Debug, NomBE, PartialEq, Eq, Hash)]
pub struct ForwardingEdge {
    pub inbound_address: Ipv4Addr,
    pub inbound_label: u32,
    pub outbound_address: Ipv4Addr,
    pub outbound_label: u32,
}

/// Edge forwarding attribute: the labels chosen for a multicast tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EdgeForwarding {
    pub edges: Vec<ForwardingEdge>,
}

impl AttrEmitter for EdgeForwarding {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_optional(true).with_transitive(true)
    }

    fn attr_type(&self) -> AttrType {
        AttrType::EdgeForwarding
    }

    fn len(&self) -> Option<usize> {
        Some(self.edges.len() * 16)
    }

    fn emit(&self, buf: &mut BytesMut) {
        for edge in self.edges.iter() {
            buf.put(&edge.inbound_address.octets()[..]);
            buf.put_u32(edge.inbound_label);
            buf.put(&edge.outbound_address.octets()[..]);
            buf.put_u32(edge.outbound_label);
        }
    }
}

impl ParseBe<EdgeForwarding> for EdgeForwarding {
    fn parse_be(input: &[u8]) -> IResult<&[u8], EdgeForwarding> {
        let (input, edges) = many0_complete(ForwardingEdge::parse_be).parse(input)?;
        Ok((input, EdgeForwarding { edges }))
    }
}

impl fmt::Display for EdgeForwarding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for edge in self.edges.iter() {
            write!(
                f,
                " {}:{}->{}:{}",
                edge.inbound_address, edge.inbound_label, edge.outbound_address,
                edge.outbound_label
            )?;
        }
        Ok(())
    }
}
