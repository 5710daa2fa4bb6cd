use nom::Parser;
use std::fmt;

use bytes::{BufMut, BytesMut};
use nom::IResult;
use nom::multi::count;
use nom::number::complete::be_u16;
use nom_derive::*;

use crate::{AttrType, ParseBe, many0_complete};

use super::{AttrEmitter, AttrFlags};

pub const AS_SET: u8 = 1;
pub const AS_SEQUENCE: u8 = 2;

/// RFC 4271 path length: each AS_SEQUENCE member counts one, a whole
/// AS_SET counts one.
fn segment_length(typ: u8, asn_count: usize) -> u32 {
    match typ {
        AS_SEQUENCE => asn_count as u32,
        AS_SET => 1,
        _ => 0,
    }
}

#[derive(Debug, NomBE)]
pub struct AsSegmentHeader {
    pub typ: u8,
    pub length: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AsSegment {
    pub typ: u8,
    pub asn: Vec<u16>,
}

impl AsSegment {
    pub fn new(typ: u8) -> Self {
        Self {
            typ,
            asn: Vec::new(),
        }
    }

    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(self.typ);
        buf.put_u8(self.asn.len() as u8);
        self.asn.iter().for_each(|x| buf.put_u16(*x));
    }
}

impl fmt::Display for AsSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self
            .asn
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        match self.typ {
            AS_SET => write!(f, "{{{v}}}"),
            _ => write!(f, "{v}"),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct AsPath {
    pub segs: Vec<AsSegment>,
}

impl AsPath {
    pub fn new() -> Self {
        Self { segs: Vec::new() }
    }

    /// Path length per RFC 4271 tie-break rules.
    pub fn length(&self) -> u32 {
        self.segs
            .iter()
            .map(|seg| segment_length(seg.typ, seg.asn.len()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    /// Leftmost AS of the leftmost AS_SEQUENCE segment.
    pub fn neighbor_as(&self) -> Option<u16> {
        let seg = self.segs.first()?;
        if seg.typ != AS_SEQUENCE {
            return None;
        }
        seg.asn.first().copied()
    }

    pub fn contains(&self, asn: u16) -> bool {
        self.segs.iter().any(|seg| seg.asn.contains(&asn))
    }

    /// Return a copy with `asn` prepended, merging into the leftmost
    /// AS_SEQUENCE when one exists.
    pub fn prepend(&self, asn: u16) -> AsPath {
        let mut path = self.clone();
        match path.segs.first_mut() {
            Some(seg) if seg.typ == AS_SEQUENCE && seg.asn.len() < 255 => {
                seg.asn.insert(0, asn);
            }
            _ => {
                let mut seg = AsSegment::new(AS_SEQUENCE);
                seg.asn.push(asn);
                path.segs.insert(0, seg);
            }
        }
        path
    }
}

impl AttrEmitter for AsPath {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_transitive(true)
    }

    fn attr_type(&self) -> AttrType {
        AttrType::AsPath
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn emit(&self, buf: &mut BytesMut) {
        self.segs.iter().for_each(|x| x.emit(buf));
    }
}

fn parse_as_segment(input: &[u8]) -> IResult<&[u8], AsSegment> {
    let (input, header) = AsSegmentHeader::parse_be(input)?;
    if header.typ != AS_SET && header.typ != AS_SEQUENCE {
        return Err(nom::Err::Error(nom::error::make_error(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    let (input, asns) = count(be_u16, header.length as usize).parse(input)?;
    Ok((
        input,
        AsSegment {
            typ: header.typ,
            asn: asns,
        },
    ))
}

impl ParseBe<AsPath> for AsPath {
    fn parse_be(input: &[u8]) -> IResult<&[u8], AsPath> {
        let (input, segs) = many0_complete(parse_as_segment).parse(input)?;
        Ok((input, AsPath { segs }))
    }
}

impl fmt::Display for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self
            .segs
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        write!(f, "{v}")
    }
}

impl fmt::Debug for AsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS Path: {}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(asns: &[u16]) -> AsSegment {
        AsSegment {
            typ: AS_SEQUENCE,
            asn: asns.to_vec(),
        }
    }

    #[test]
    fn length_counts_set_as_one() {
        let path = AsPath {
            segs: vec![
                seq(&[64512, 64513]),
                AsSegment {
                    typ: AS_SET,
                    asn: vec![100, 200, 300],
                },
            ],
        };
        assert_eq!(path.length(), 3);
    }

    #[test]
    fn neighbor_as_is_leftmost() {
        let path = AsPath {
            segs: vec![seq(&[64512, 64513])],
        };
        assert_eq!(path.neighbor_as(), Some(64512));
        assert!(AsPath::new().neighbor_as().is_none());
    }

    #[test]
    fn prepend_merges_into_sequence() {
        let path = AsPath {
            segs: vec![seq(&[64513])],
        };
        let path = path.prepend(64512);
        assert_eq!(path.segs.len(), 1);
        assert_eq!(path.segs[0].asn, vec![64512, 64513]);
    }

    #[test]
    fn wire_roundtrip() {
        let path = AsPath {
            segs: vec![seq(&[64512, 64513])],
        };
        let mut buf = BytesMut::new();
        path.emit(&mut buf);
        let (rest, parsed) = AsPath::parse_be(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, path);
    }
}
