use nom::Parser;
use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use ipnet::Ipv4Net;
use nom::IResult;
use nom::bytes::complete::take;
use nom::error::{ErrorKind, make_error};
use nom::number::complete::be_u8;
use nom_derive::*;

use crate::{Label, ParseNlri, RouteDistinguisher, nlri_psize};

/// Labeled VPN-IPv4 NLRI: 3-octet label, 8-octet RD, variable prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Vpnv4Nlri {
    pub label: Label,
    pub rd: RouteDistinguisher,
    pub prefix: Ipv4Net,
}

impl Vpnv4Nlri {
    pub fn emit(&self, buf: &mut BytesMut) {
        let plen = self.prefix.prefix_len() + 88;
        buf.put_u8(plen);
        buf.put(&self.label.to_bytes()[..]);
        self.rd.emit(buf);
        let psize = nlri_psize(self.prefix.prefix_len());
        buf.put(&self.prefix.addr().octets()[0..psize]);
    }
}

impl ParseNlri<Vpnv4Nlri> for Vpnv4Nlri {
    fn parse_nlri(input: &[u8]) -> IResult<&[u8], Vpnv4Nlri> {
        // Label (3) + RD (8) + IPv4 prefix (0-4), so plen >= 88.
        let (input, mut plen) = be_u8(input)?;

        let (input, label) = take(3usize).parse(input)?;
        let label = Label::from(label);

        let (input, rd) = RouteDistinguisher::parse_be(input)?;

        if plen < 88 {
            return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
        }
        plen -= 88;
        let psize = nlri_psize(plen);
        if psize > 4 || psize > input.len() {
            return Err(nom::Err::Error(make_error(input, ErrorKind::LengthValue)));
        }

        let mut paddr = [0u8; 4];
        paddr[..psize].copy_from_slice(&input[..psize]);
        let (input, _) = take(psize).parse(input)?;
        let prefix = Ipv4Net::new(Ipv4Addr::from(paddr), plen)
            .map_err(|_| nom::Err::Error(make_error(input, ErrorKind::Verify)))?;

        Ok((input, Vpnv4Nlri { label, rd, prefix }))
    }
}

impl fmt::Display for Vpnv4Nlri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]:{} label {}",
            self.rd, self.prefix, self.label.label
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpnv4_roundtrip() {
        let nlri = Vpnv4Nlri {
            label: Label::new(1000),
            rd: RouteDistinguisher::from_as(64512, 1),
            prefix: "10.1.1.0/24".parse().unwrap(),
        };
        let mut buf = BytesMut::new();
        nlri.emit(&mut buf);
        let (rest, parsed) = Vpnv4Nlri::parse_nlri(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, nlri);
    }
}
