use bytes::{BufMut, BytesMut};
use nom_derive::*;

use crate::{NotificationPacket, OpenPacket, UpdatePacket};

pub const BGP_PACKET_LEN: usize = 4096;
pub const BGP_HEADER_LEN: u16 = 19;
pub const BGP_MARKER_LEN: usize = 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, NomBE)]
pub enum BgpType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
    Max = 5,
}

#[derive(Debug, Clone, PartialEq, NomBE)]
pub struct BgpHeader {
    pub marker: [u8; BGP_MARKER_LEN],
    pub length: u16,
    pub typ: BgpType,
}

impl BgpHeader {
    pub fn new(typ: BgpType, length: u16) -> Self {
        Self {
            marker: [0xffu8; BGP_MARKER_LEN],
            length,
            typ,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.marker.iter().all(|b| *b == 0xff)
    }
}

impl From<BgpHeader> for BytesMut {
    fn from(header: BgpHeader) -> Self {
        let mut buf = BytesMut::new();
        buf.put(&header.marker[..]);
        buf.put_u16(header.length);
        buf.put_u8(header.typ as u8);
        buf
    }
}

/// Message-length probe used by the session layer to accumulate a complete
/// message before decode. Returns None until the length field (bytes 16..18)
/// has arrived.
pub fn peek_bgp_length(input: &[u8]) -> Option<usize> {
    let len = input.get(16..18)?;
    Some(u16::from_be_bytes([len[0], len[1]]) as usize)
}

#[derive(Debug)]
pub enum BgpPacket {
    Open(Box<OpenPacket>),
    Keepalive(BgpHeader),
    Notification(NotificationPacket),
    Update(Box<UpdatePacket>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_needs_length_field() {
        assert_eq!(peek_bgp_length(&[0xff; 17]), None);
        let mut buf = vec![0xffu8; 16];
        buf.extend_from_slice(&[0x00, 0x13]);
        assert_eq!(peek_bgp_length(&buf), Some(19));
    }
}
