use bytes::BytesMut;
use nom::IResult;
use nom_derive::*;

use super::*;

#[derive(Debug, Default, PartialEq, NomBE, Clone)]
pub struct CapabilityHeader {
    pub code: u8,
    pub length: u8,
}

impl CapabilityHeader {
    pub fn new(code: CapCode, length: u8) -> Self {
        Self {
            code: code.into(),
            length,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum CapabilityPacket {
    MultiProtocol(CapMultiProtocol),
    GracefulRestart(CapRestart),
    Unknown(CapUnknown),
}

impl CapabilityPacket {
    pub fn parse_cap(input: &[u8]) -> IResult<&[u8], CapabilityPacket> {
        let (input, cap_header) = CapabilityHeader::parse_be(input)?;
        if input.len() < cap_header.length as usize {
            return Err(nom::Err::Error(nom::error::make_error(
                input,
                nom::error::ErrorKind::Eof,
            )));
        }
        let (cap, input) = input.split_at(cap_header.length as usize);
        let packet = match cap_header.code.into() {
            CapCode::MultiProtocol => {
                let (_, v) = CapMultiProtocol::parse_be(cap)?;
                CapabilityPacket::MultiProtocol(v)
            }
            CapCode::GracefulRestart => {
                let (_, v) = CapRestart::parse_be(cap)?;
                CapabilityPacket::GracefulRestart(v)
            }
            CapCode::Unknown(code) => CapabilityPacket::Unknown(CapUnknown {
                code,
                data: cap.to_vec(),
            }),
        };
        Ok((input, packet))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::MultiProtocol(m) => m.emit(buf, false),
            Self::GracefulRestart(m) => m.emit(buf, false),
            Self::Unknown(m) => m.emit(buf, false),
        }
    }
}
