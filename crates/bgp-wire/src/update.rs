use std::fmt;

use bytes::{BufMut, BytesMut};
use nom::number::complete::be_u16;
use nom_derive::*;

use crate::{
    AttrEmitter, AttrSet, BGP_HEADER_LEN, BgpHeader, BgpType, Ipv4Nlri, MpReachAttr, MpUnreachAttr,
    WireError, parse_bgp_nlri_ipv4, parse_bgp_update_attributes,
};

#[derive(Clone)]
pub struct UpdatePacket {
    pub header: BgpHeader,
    pub withdraws: Vec<Ipv4Nlri>,
    pub attrs: Option<AttrSet>,
    pub mp_reach: Option<MpReachAttr>,
    pub mp_unreach: Option<MpUnreachAttr>,
    pub nlri: Vec<Ipv4Nlri>,
}

impl Default for UpdatePacket {
    fn default() -> Self {
        Self {
            header: BgpHeader::new(BgpType::Update, BGP_HEADER_LEN),
            withdraws: Vec::new(),
            attrs: None,
            mp_reach: None,
            mp_unreach: None,
            nlri: Vec::new(),
        }
    }
}

impl UpdatePacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// The empty UPDATE is the End-of-RIB marker for IPv4 unicast.
    pub fn is_inet_eor(&self) -> bool {
        self.withdraws.is_empty()
            && self.nlri.is_empty()
            && self.attrs.is_none()
            && self.mp_reach.is_none()
            && self.mp_unreach.is_none()
    }

    /// True when the UPDATE announces reachability (IPv4 NLRI or MP_REACH).
    pub fn has_reach(&self) -> bool {
        !self.nlri.is_empty() || self.mp_reach.is_some()
    }

    pub fn parse_packet(input: &[u8]) -> Result<(&[u8], UpdatePacket), WireError> {
        let total_len = input.len();
        let mut packet = UpdatePacket::new();
        let (input, header) = BgpHeader::parse_be(input).map_err(WireError::from)?;
        packet.header = header;

        let (input, withdraw_len) =
            be_u16::<_, nom::error::Error<&[u8]>>(input).map_err(WireError::from)?;
        let (input, withdraws) =
            parse_bgp_nlri_ipv4(input, withdraw_len).map_err(|_| WireError::InvalidNetworkField)?;
        packet.withdraws = withdraws;

        let (input, attr_len) =
            be_u16::<_, nom::error::Error<&[u8]>>(input).map_err(WireError::from)?;
        let input = if attr_len > 0 {
            let (input, parsed) = parse_bgp_update_attributes(input, attr_len)?;
            packet.attrs = Some(parsed.attrs);
            packet.mp_reach = parsed.mp_reach;
            packet.mp_unreach = parsed.mp_unreach;
            input
        } else {
            input
        };

        let consumed = total_len - input.len();
        let nlri_len = packet
            .header
            .length
            .checked_sub(consumed as u16)
            .ok_or(WireError::BadMessageLength(packet.header.length))?;
        let (input, nlri) =
            parse_bgp_nlri_ipv4(input, nlri_len).map_err(|_| WireError::InvalidNetworkField)?;
        packet.nlri = nlri;

        Ok((input, packet))
    }
}

impl From<UpdatePacket> for BytesMut {
    fn from(update: UpdatePacket) -> Self {
        let mut buf = BytesMut::new();
        let header: BytesMut = update.header.into();
        buf.put(&header[..]);

        // Withdrawn routes, length back-patched.
        let withdraw_len_pos = buf.len();
        buf.put_u16(0u16);
        for nlri in update.withdraws.iter() {
            nlri.emit(&mut buf);
        }
        let withdraw_len: u16 = (buf.len() - withdraw_len_pos - 2) as u16;
        buf[withdraw_len_pos..withdraw_len_pos + 2].copy_from_slice(&withdraw_len.to_be_bytes());

        // Path attributes, length back-patched.
        let attr_len_pos = buf.len();
        buf.put_u16(0u16);
        if let Some(attrs) = &update.attrs {
            attrs.attr_emit(&mut buf);
        }
        if let Some(mp_reach) = &update.mp_reach {
            mp_reach.attr_emit(&mut buf);
        }
        if let Some(mp_unreach) = &update.mp_unreach {
            mp_unreach.attr_emit(&mut buf);
        }
        let attr_len: u16 = (buf.len() - attr_len_pos - 2) as u16;
        buf[attr_len_pos..attr_len_pos + 2].copy_from_slice(&attr_len.to_be_bytes());

        // IPv4 unicast reachability.
        for nlri in update.nlri.iter() {
            nlri.emit(&mut buf);
        }

        const LENGTH_POS: std::ops::Range<usize> = 16..18;
        let length: u16 = buf.len() as u16;
        buf[LENGTH_POS].copy_from_slice(&length.to_be_bytes());

        buf
    }
}

impl fmt::Debug for UpdatePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self)
    }
}

impl fmt::Display for UpdatePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Update:")?;
        if let Some(attrs) = &self.attrs {
            write!(f, "{}", attrs)?;
        }
        if !self.nlri.is_empty() {
            writeln!(f, " Reach:")?;
            for nlri in self.nlri.iter() {
                writeln!(f, "  {}", nlri)?;
            }
        }
        if !self.withdraws.is_empty() {
            writeln!(f, " Unreach:")?;
            for nlri in self.withdraws.iter() {
                writeln!(f, "  {}", nlri)?;
            }
        }
        if let Some(mp_reach) = &self.mp_reach {
            write!(f, "{}", mp_reach)?;
        }
        if let Some(mp_unreach) = &self.mp_unreach {
            write!(f, "{}", mp_unreach)?;
        }
        if self.is_inet_eor() {
            writeln!(f, " EoR: inet")?;
        }
        Ok(())
    }
}
