use nom::Parser;
use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use nom_derive::*;

use crate::{BgpCaps, BgpHeader, CapabilityPacket, WireError, many0_complete};

pub const BGP_VERSION: u8 = 4;

const OPT_PARAM_CAPABILITY: u8 = 2;

#[derive(Debug, PartialEq, NomBE)]
pub struct OpenPacket {
    pub header: BgpHeader,
    pub version: u8,
    pub asn: u16,
    pub hold_time: u16,
    pub bgp_id: [u8; 4],
    pub opt_param_len: u8,
    #[nom(Ignore)]
    pub caps: BgpCaps,
}

impl OpenPacket {
    pub fn new(
        header: BgpHeader,
        asn: u16,
        hold_time: u16,
        identifier: &Ipv4Addr,
        caps: BgpCaps,
    ) -> OpenPacket {
        OpenPacket {
            header,
            version: BGP_VERSION,
            asn,
            hold_time,
            bgp_id: identifier.octets(),
            opt_param_len: 0,
            caps,
        }
    }

    pub fn identifier(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.bgp_id)
    }

    pub fn parse_packet(input: &[u8]) -> Result<(&[u8], OpenPacket), WireError> {
        let (input, mut packet) = OpenPacket::parse_be(input).map_err(WireError::from)?;
        if packet.version != BGP_VERSION {
            return Err(WireError::UnsupportedVersion(packet.version));
        }
        let len = packet.opt_param_len as usize;
        if input.len() != len {
            return Err(WireError::BadMessageLength(packet.header.length));
        }
        let (opts, input) = input.split_at(len);

        // Optional parameter loop; only the capability block is understood.
        let mut caps: Vec<Vec<CapabilityPacket>> = Vec::new();
        let mut rest = opts;
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(WireError::BadMessageLength(packet.header.length));
            }
            let param_type = rest[0];
            let param_len = rest[1] as usize;
            let rest_body = &rest[2..];
            if param_type != OPT_PARAM_CAPABILITY {
                return Err(WireError::UnsupportedOptionalParameter(param_type));
            }
            if rest_body.len() < param_len {
                return Err(WireError::BadMessageLength(packet.header.length));
            }
            let (body, remain) = rest_body.split_at(param_len);
            let (_, parsed) = many0_complete(CapabilityPacket::parse_cap)
                .parse(body)
                .map_err(WireError::from)?;
            caps.push(parsed);
            rest = remain;
        }
        packet.caps = BgpCaps::from(caps);
        Ok((input, packet))
    }
}

impl From<OpenPacket> for BytesMut {
    fn from(open: OpenPacket) -> Self {
        let mut buf = BytesMut::new();
        let header: BytesMut = open.header.into();
        buf.put(&header[..]);
        buf.put_u8(open.version);
        buf.put_u16(open.asn);
        buf.put_u16(open.hold_time);
        buf.put(&open.bgp_id[..]);

        // Each capability lands in its own optional parameter block.
        let mut opt_buf = BytesMut::new();
        open.caps.emit(&mut opt_buf);

        buf.put_u8(opt_buf.len() as u8);
        buf.put(&opt_buf[..]);

        const LENGTH_POS: std::ops::Range<usize> = 16..18;
        let length: u16 = buf.len() as u16;
        buf[LENGTH_POS].copy_from_slice(&length.to_be_bytes());

        buf
    }
}

impl fmt::Display for OpenPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Open: AS {} hold {} id {}",
            self.asn,
            self.hold_time,
            self.identifier()
        )?;
        write!(f, "{}", self.caps)
    }
}
