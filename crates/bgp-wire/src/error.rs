use thiserror::Error;

use crate::notification::{HeaderError, NotifyCode, OpenError, UpdateError};

/// Decode failure with enough context to build the NOTIFICATION the RFC
/// requires: (code, subcode) plus the offending bytes for the data field.
#[derive(Error, Debug, PartialEq)]
pub enum WireError {
    #[error("connection not synchronized")]
    ConnectionNotSync,

    #[error("bad message length {0}")]
    BadMessageLength(u16),

    #[error("bad message type {0}")]
    BadMessageType(u8),

    #[error("unsupported version number {0}")]
    UnsupportedVersion(u8),

    #[error("unacceptable hold time {0}")]
    UnacceptableHoldTime(u16),

    #[error("unsupported optional parameter {0}")]
    UnsupportedOptionalParameter(u8),

    #[error("bad bgp identifier")]
    BadBgpIdentifier,

    #[error("malformed attribute list")]
    MalformedAttributeList,

    #[error("unrecognized well-known attribute {0}")]
    UnrecognizedWellKnownAttribute(u8),

    #[error("missing well-known attribute {0}")]
    MissingWellKnownAttribute(u8),

    #[error("attribute flags error for type {attr_type}")]
    AttributeFlagsError { attr_type: u8, data: Vec<u8> },

    #[error("attribute length error for type {attr_type}")]
    AttributeLengthError { attr_type: u8, data: Vec<u8> },

    #[error("invalid origin value {0}")]
    InvalidOrigin(u8),

    #[error("invalid nexthop attribute")]
    InvalidNexthop,

    #[error("optional attribute error for type {0}")]
    OptionalAttributeError(u8),

    #[error("invalid network field")]
    InvalidNetworkField,

    #[error("malformed as path")]
    MalformedAsPath,

    #[error("truncated {type_name}: need {needed} more bytes")]
    Truncated {
        type_name: &'static str,
        needed: usize,
    },
}

impl WireError {
    /// Map to the RFC 4271 (code, subcode, data) triple for NOTIFICATION.
    pub fn to_notify(&self) -> (NotifyCode, u8, Vec<u8>) {
        use WireError::*;
        match self {
            ConnectionNotSync => (
                NotifyCode::MsgHeaderError,
                HeaderError::ConnectionNotSynced as u8,
                Vec::new(),
            ),
            BadMessageLength(len) => (
                NotifyCode::MsgHeaderError,
                HeaderError::BadMessageLength as u8,
                len.to_be_bytes().to_vec(),
            ),
            BadMessageType(typ) => (
                NotifyCode::MsgHeaderError,
                HeaderError::BadMessageType as u8,
                vec![*typ],
            ),
            // Data carries the largest version this speaker supports.
            UnsupportedVersion(_) => (
                NotifyCode::OpenMsgError,
                OpenError::UnsupportedVersionNumber as u8,
                vec![0x00, 0x04],
            ),
            UnacceptableHoldTime(hold) => (
                NotifyCode::OpenMsgError,
                OpenError::UnacceptableHoldTime as u8,
                hold.to_be_bytes().to_vec(),
            ),
            UnsupportedOptionalParameter(param) => (
                NotifyCode::OpenMsgError,
                OpenError::UnsupportedOptionalParameter as u8,
                vec![*param],
            ),
            BadBgpIdentifier => (
                NotifyCode::OpenMsgError,
                OpenError::BadBgpIdentifier as u8,
                Vec::new(),
            ),
            MalformedAttributeList => (
                NotifyCode::UpdateMsgError,
                UpdateError::MalformedAttributeList as u8,
                Vec::new(),
            ),
            UnrecognizedWellKnownAttribute(typ) => (
                NotifyCode::UpdateMsgError,
                UpdateError::UnrecognizedWellknownAttribute as u8,
                vec![*typ],
            ),
            MissingWellKnownAttribute(typ) => (
                NotifyCode::UpdateMsgError,
                UpdateError::MissingWellknownAttribute as u8,
                vec![*typ],
            ),
            AttributeFlagsError { data, .. } => (
                NotifyCode::UpdateMsgError,
                UpdateError::AttributeFlagsError as u8,
                data.clone(),
            ),
            AttributeLengthError { data, .. } => (
                NotifyCode::UpdateMsgError,
                UpdateError::AttributeLengthError as u8,
                data.clone(),
            ),
            InvalidOrigin(val) => (
                NotifyCode::UpdateMsgError,
                UpdateError::InvalidOriginAttribute as u8,
                vec![*val],
            ),
            InvalidNexthop => (
                NotifyCode::UpdateMsgError,
                UpdateError::InvalidNexthopAttribute as u8,
                Vec::new(),
            ),
            OptionalAttributeError(typ) => (
                NotifyCode::UpdateMsgError,
                UpdateError::OptionalAttributeError as u8,
                vec![*typ],
            ),
            InvalidNetworkField => (
                NotifyCode::UpdateMsgError,
                UpdateError::InvalidNetworkField as u8,
                Vec::new(),
            ),
            MalformedAsPath => (
                NotifyCode::UpdateMsgError,
                UpdateError::MalformedAspath as u8,
                Vec::new(),
            ),
            Truncated { .. } => (
                NotifyCode::MsgHeaderError,
                HeaderError::BadMessageLength as u8,
                Vec::new(),
            ),
        }
    }

    pub fn type_name(&self) -> &'static str {
        use WireError::*;
        match self {
            ConnectionNotSync | BadMessageLength(_) | BadMessageType(_) => "BgpHeader",
            UnsupportedVersion(_)
            | UnacceptableHoldTime(_)
            | UnsupportedOptionalParameter(_)
            | BadBgpIdentifier => "BgpOpen",
            Truncated { type_name, .. } => type_name,
            _ => "BgpUpdate",
        }
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for WireError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(needed) => {
                let needed = match needed {
                    nom::Needed::Unknown => 0,
                    nom::Needed::Size(size) => size.get(),
                };
                WireError::Truncated {
                    type_name: "BgpPacket",
                    needed,
                }
            }
            nom::Err::Error(_) | nom::Err::Failure(_) => WireError::MalformedAttributeList,
        }
    }
}
