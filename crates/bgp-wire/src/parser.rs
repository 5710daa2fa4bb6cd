use nom_derive::*;

use crate::{
    BGP_HEADER_LEN, BGP_MARKER_LEN, BGP_PACKET_LEN, BgpHeader, BgpPacket, BgpType,
    NotificationPacket, OpenPacket, UpdatePacket, WireError, peek_bgp_length,
};

pub fn nlri_psize(plen: u8) -> usize {
    plen.div_ceil(8).into()
}

const BGP_OPEN_MIN_LEN: u16 = 29;
const BGP_NOTIFICATION_MIN_LEN: u16 = 21;

impl BgpPacket {
    /// Decode one complete framed message. The session layer must have
    /// accumulated at least `peek_bgp_length` bytes. Header checks run in
    /// RFC 4271 §6.1 order: marker, length, type.
    pub fn parse_packet(input: &[u8]) -> Result<(&[u8], BgpPacket), WireError> {
        if input.len() < BGP_HEADER_LEN as usize {
            return Err(WireError::Truncated {
                type_name: "BgpHeader",
                needed: BGP_HEADER_LEN as usize - input.len(),
            });
        }
        if !input[..BGP_MARKER_LEN].iter().all(|b| *b == 0xff) {
            return Err(WireError::ConnectionNotSync);
        }
        let length = peek_bgp_length(input).unwrap_or(0);
        if length < BGP_HEADER_LEN as usize || length > BGP_PACKET_LEN || length > input.len() {
            return Err(WireError::BadMessageLength(length as u16));
        }
        let raw_type = input[18];
        if !(1..=4).contains(&raw_type) {
            return Err(WireError::BadMessageType(raw_type));
        }

        let typ: BgpType = match raw_type {
            1 => BgpType::Open,
            2 => BgpType::Update,
            3 => BgpType::Notification,
            _ => BgpType::Keepalive,
        };
        match typ {
            BgpType::Open => {
                if length < BGP_OPEN_MIN_LEN as usize {
                    return Err(WireError::BadMessageLength(length as u16));
                }
                let (input, packet) = OpenPacket::parse_packet(input)?;
                Ok((input, BgpPacket::Open(Box::new(packet))))
            }
            BgpType::Update => {
                let (input, packet) = UpdatePacket::parse_packet(input)?;
                Ok((input, BgpPacket::Update(Box::new(packet))))
            }
            BgpType::Notification => {
                if length < BGP_NOTIFICATION_MIN_LEN as usize {
                    return Err(WireError::BadMessageLength(length as u16));
                }
                let (input, packet) =
                    NotificationPacket::parse_packet(input).map_err(WireError::from)?;
                Ok((input, BgpPacket::Notification(packet)))
            }
            BgpType::Keepalive | BgpType::Max => {
                if length != BGP_HEADER_LEN as usize {
                    return Err(WireError::BadMessageLength(length as u16));
                }
                let (input, header) = BgpHeader::parse_be(input).map_err(WireError::from)?;
                Ok((input, BgpPacket::Keepalive(header)))
            }
        }
    }
}
