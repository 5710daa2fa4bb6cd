use nom::Parser;
use std::fmt::Display;

use super::{BGP_HEADER_LEN, BgpHeader, BgpType};
use bytes::{BufMut, BytesMut};
use nom::IResult;
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom_derive::*;
use serde::Serialize;

#[derive(Debug, Clone, NomBE)]
pub struct NotificationPacket {
    pub header: BgpHeader,
    pub code: NotifyCode,
    pub sub_code: u8,
    #[nom(Ignore)]
    pub data: Vec<u8>,
}

impl Display for NotificationPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            self.code,
            notify_sub_code_str(self.code, self.sub_code)
        )
    }
}

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyCode {
    MsgHeaderError = 1,
    OpenMsgError = 2,
    UpdateMsgError = 3,
    HoldTimerExpired = 4,
    FsmError = 5,
    Cease = 6,
    Unknown(u8),
}

impl NotifyCode {
    pub fn parse_be(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, code) = be_u8(input)?;
        Ok((input, code.into()))
    }
}

impl From<NotifyCode> for u8 {
    fn from(code: NotifyCode) -> Self {
        use NotifyCode::*;
        match code {
            MsgHeaderError => 1,
            OpenMsgError => 2,
            UpdateMsgError => 3,
            HoldTimerExpired => 4,
            FsmError => 5,
            Cease => 6,
            Unknown(v) => v,
        }
    }
}

impl From<u8> for NotifyCode {
    fn from(code: u8) -> Self {
        use NotifyCode::*;
        match code {
            1 => MsgHeaderError,
            2 => OpenMsgError,
            3 => UpdateMsgError,
            4 => HoldTimerExpired,
            5 => FsmError,
            6 => Cease,
            v => Unknown(v),
        }
    }
}

impl Display for NotifyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use NotifyCode::*;
        match self {
            MsgHeaderError => write!(f, "MsgHeaderError"),
            OpenMsgError => write!(f, "OpenMsgError"),
            UpdateMsgError => write!(f, "UpdateMsgError"),
            HoldTimerExpired => write!(f, "HoldTimerExpired"),
            FsmError => write!(f, "FsmError"),
            Cease => write!(f, "Cease"),
            Unknown(v) => write!(f, "Unknown {}", v),
        }
    }
}

pub fn notify_sub_code_str(code: NotifyCode, sub_code: u8) -> String {
    use NotifyCode::*;
    match code {
        MsgHeaderError => sub_header_error_str(sub_code.into()),
        OpenMsgError => sub_open_error_str(sub_code.into()),
        UpdateMsgError => sub_update_error_str(sub_code.into()),
        HoldTimerExpired => "Hold Timer Expired".into(),
        FsmError => "FSM Error".into(),
        Cease => sub_cease_error_str(sub_code.into()),
        Unknown(v) => format!("Unknown {}", v),
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    ConnectionNotSynced = 1,
    BadMessageLength = 2,
    BadMessageType = 3,
}

impl From<u8> for HeaderError {
    fn from(sub_code: u8) -> Self {
        use HeaderError::*;
        match sub_code {
            2 => BadMessageLength,
            3 => BadMessageType,
            _ => ConnectionNotSynced,
        }
    }
}

fn sub_header_error_str(sub_code: HeaderError) -> String {
    use HeaderError::*;
    match sub_code {
        ConnectionNotSynced => "Connection Not Synchronized".into(),
        BadMessageLength => "Bad Message Length".into(),
        BadMessageType => "Bad Message Type".into(),
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenError {
    UnsupportedVersionNumber = 1,
    BadPeerAS = 2,
    BadBgpIdentifier = 3,
    UnsupportedOptionalParameter = 4,
    UnacceptableHoldTime = 6,
    UnsupportedCapability = 7,
}

impl From<u8> for OpenError {
    fn from(sub_code: u8) -> Self {
        use OpenError::*;
        match sub_code {
            2 => BadPeerAS,
            3 => BadBgpIdentifier,
            4 => UnsupportedOptionalParameter,
            6 => UnacceptableHoldTime,
            7 => UnsupportedCapability,
            _ => UnsupportedVersionNumber,
        }
    }
}

fn sub_open_error_str(sub_code: OpenError) -> String {
    use OpenError::*;
    match sub_code {
        UnsupportedVersionNumber => "Unsupported Version Number".into(),
        BadPeerAS => "Bad Peer AS".into(),
        BadBgpIdentifier => "Bad BGP Identifier".into(),
        UnsupportedOptionalParameter => "Unsupported Optional Parameter".into(),
        UnacceptableHoldTime => "Unacceptable Hold Time".into(),
        UnsupportedCapability => "Unsupported Capability".into(),
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    MalformedAttributeList = 1,
    UnrecognizedWellknownAttribute = 2,
    MissingWellknownAttribute = 3,
    AttributeFlagsError = 4,
    AttributeLengthError = 5,
    InvalidOriginAttribute = 6,
    InvalidNexthopAttribute = 8,
    OptionalAttributeError = 9,
    InvalidNetworkField = 10,
    MalformedAspath = 11,
}

impl From<u8> for UpdateError {
    fn from(sub_code: u8) -> Self {
        use UpdateError::*;
        match sub_code {
            2 => UnrecognizedWellknownAttribute,
            3 => MissingWellknownAttribute,
            4 => AttributeFlagsError,
            5 => AttributeLengthError,
            6 => InvalidOriginAttribute,
            8 => InvalidNexthopAttribute,
            9 => OptionalAttributeError,
            10 => InvalidNetworkField,
            11 => MalformedAspath,
            _ => MalformedAttributeList,
        }
    }
}

fn sub_update_error_str(sub_code: UpdateError) -> String {
    use UpdateError::*;
    match sub_code {
        MalformedAttributeList => "Malformed Attribute List".into(),
        UnrecognizedWellknownAttribute => "Unrecognized Wellknown Attribute".into(),
        MissingWellknownAttribute => "Missing Wellknown Attribute".into(),
        AttributeFlagsError => "Attribute Flags Error".into(),
        AttributeLengthError => "Attribute Length Error".into(),
        InvalidOriginAttribute => "Invalid Origin Attribute".into(),
        InvalidNexthopAttribute => "Invalid Nexthop Attribute".into(),
        OptionalAttributeError => "Optional Attribute Error".into(),
        InvalidNetworkField => "Invalid Network Field".into(),
        MalformedAspath => "Malformed AS Path".into(),
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeaseSubCode {
    Unknown = 0,
    MaxPrefixes = 1,
    AdministrativeShutdown = 2,
    PeerDeconfigured = 3,
    AdministrativeReset = 4,
    ConnectionRejected = 5,
    OtherConfigChange = 6,
    ConnectionCollision = 7,
    OutOfResources = 8,
}

impl From<u8> for CeaseSubCode {
    fn from(sub_code: u8) -> Self {
        use CeaseSubCode::*;
        match sub_code {
            1 => MaxPrefixes,
            2 => AdministrativeShutdown,
            3 => PeerDeconfigured,
            4 => AdministrativeReset,
            5 => ConnectionRejected,
            6 => OtherConfigChange,
            7 => ConnectionCollision,
            8 => OutOfResources,
            _ => Unknown,
        }
    }
}

fn sub_cease_error_str(sub_code: CeaseSubCode) -> String {
    use CeaseSubCode::*;
    match sub_code {
        Unknown => "Unspecified".into(),
        MaxPrefixes => "Maximum Number of Prefixes Reached".into(),
        AdministrativeShutdown => "Administrative Shutdown".into(),
        PeerDeconfigured => "Peer De-configured".into(),
        AdministrativeReset => "Administrative Reset".into(),
        ConnectionRejected => "Connection Rejected".into(),
        OtherConfigChange => "Other Configuration Change".into(),
        ConnectionCollision => "Connection Collision Resolution".into(),
        OutOfResources => "Out of Resources".into(),
    }
}

impl NotificationPacket {
    pub fn new(code: NotifyCode, sub_code: u8, data: Vec<u8>) -> Self {
        Self {
            header: BgpHeader::new(BgpType::Notification, BGP_HEADER_LEN),
            code,
            sub_code,
            data,
        }
    }

    pub fn parse_packet(input: &[u8]) -> IResult<&[u8], NotificationPacket> {
        let (input, mut packet) = NotificationPacket::parse_be(input)?;
        let len = packet.header.length - BGP_HEADER_LEN - 2;
        let (input, data) = take(len as usize).parse(input)?;
        packet.data = data.to_vec();
        Ok((input, packet))
    }
}

impl From<NotificationPacket> for BytesMut {
    fn from(notification: NotificationPacket) -> Self {
        let mut buf = BytesMut::new();
        let header: BytesMut = notification.header.into();
        buf.put(&header[..]);
        buf.put_u8(notification.code.into());
        buf.put_u8(notification.sub_code);
        buf.put(&notification.data[..]);

        const LENGTH_POS: std::ops::Range<usize> = 16..18;
        let length: u16 = buf.len() as u16;
        buf[LENGTH_POS].copy_from_slice(&length.to_be_bytes());

        buf
    }
}
