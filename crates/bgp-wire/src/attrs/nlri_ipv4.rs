use nom::Parser;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use ipnet::Ipv4Net;
use nom::IResult;
use nom::bytes::complete::take;
use nom::error::{ErrorKind, make_error};
use nom::number::complete::be_u8;
use nom_derive::*;

use crate::{ParseNlri, many0_complete, nlri_psize};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Ipv4Nlri {
    pub prefix: Ipv4Net,
}

impl Ipv4Nlri {
    pub fn new(prefix: Ipv4Net) -> Self {
        Self { prefix }
    }

    pub fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(self.prefix.prefix_len());
        let psize = nlri_psize(self.prefix.prefix_len());
        buf.put(&self.prefix.addr().octets()[0..psize]);
    }
}

impl ParseNlri<Ipv4Nlri> for Ipv4Nlri {
    fn parse_nlri(input: &[u8]) -> IResult<&[u8], Ipv4Nlri> {
        let (input, plen) = be_u8(input)?;
        if plen > 32 {
            return Err(nom::Err::Error(make_error(input, ErrorKind::Verify)));
        }
        let psize = nlri_psize(plen);
        if input.len() < psize {
            return Err(nom::Err::Error(make_error(input, ErrorKind::Eof)));
        }
        let mut paddr = [0u8; 4];
        paddr[..psize].copy_from_slice(&input[..psize]);
        let (input, _) = take(psize).parse(input)?;
        let prefix = Ipv4Net::new(Ipv4Addr::from(paddr), plen)
            .map_err(|_| nom::Err::Error(make_error(input, ErrorKind::Verify)))?;
        Ok((input, Ipv4Nlri { prefix }))
    }
}

pub fn parse_bgp_nlri_ipv4(input: &[u8], length: u16) -> IResult<&[u8], Vec<Ipv4Nlri>> {
    if input.len() < length as usize {
        return Err(nom::Err::Error(make_error(input, ErrorKind::Eof)));
    }
    let (nlri, input) = input.split_at(length as usize);
    let (_, nlris) = many0_complete(Ipv4Nlri::parse_nlri).parse(nlri)?;
    Ok((input, nlris))
}

impl std::fmt::Display for Ipv4Nlri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix)
    }
}
