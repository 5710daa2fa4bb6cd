use std::fmt;

use bytes::{BufMut, BytesMut};
use nom::IResult;
use nom::error::{ErrorKind, make_error};
use nom::number::complete::{be_u8, be_u32};
use nom_derive::*;

use crate::{ExtCommunityValue, ParseNlri};

/// Route-target membership NLRI (RFC 4684): origin AS plus the target
/// extended community the speaker wants to receive. The zero-length form
/// is the default (match everything) route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RTargetNlri {
    pub origin_as: u32,
    pub target: ExtCommunityValue,
}

impl RTargetNlri {
    const PREFIX_LEN: u8 = 96;

    pub fn new(origin_as: u32, target: ExtCommunityValue) -> Self {
        Self { origin_as, target }
    }

    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(Self::PREFIX_LEN);
        buf.put_u32(self.origin_as);
        self.target.encode(buf);
    }
}

impl ParseNlri<RTargetNlri> for RTargetNlri {
    fn parse_nlri(input: &[u8]) -> IResult<&[u8], RTargetNlri> {
        let (input, plen) = be_u8(input)?;
        if plen != Self::PREFIX_LEN {
            return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
        }
        let (input, origin_as) = be_u32(input)?;
        let (input, target) = ExtCommunityValue::parse_be(input)?;
        Ok((input, RTargetNlri { origin_as, target }))
    }
}

impl fmt::Display for RTargetNlri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin_as, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtarget_roundtrip() {
        let nlri = RTargetNlri::new(64512, ExtCommunityValue::route_target(64512, 8000001));
        let mut buf = BytesMut::new();
        nlri.emit(&mut buf);
        let (rest, parsed) = RTargetNlri::parse_nlri(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, nlri);
    }
}
