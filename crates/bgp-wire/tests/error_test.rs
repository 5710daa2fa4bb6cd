use bgp_wire::*;
use bytes::{BufMut, BytesMut};
use hex_literal::hex;

#[test]
fn bad_marker_is_connection_not_sync() {
    let mut packet = hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 13 04
"
    );
    packet[0] = 0x00;
    let err = BgpPacket::parse_packet(&packet).unwrap_err();
    assert_eq!(err, WireError::ConnectionNotSync);
    let (code, sub_code, _) = err.to_notify();
    assert_eq!(code, NotifyCode::MsgHeaderError);
    assert_eq!(sub_code, 1);
}

#[test]
fn short_length_is_bad_message_length() {
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 12 04
"
    );
    let err = BgpPacket::parse_packet(PACKET).unwrap_err();
    assert_eq!(err, WireError::BadMessageLength(18));
    let (code, sub_code, data) = err.to_notify();
    assert_eq!(code, NotifyCode::MsgHeaderError);
    assert_eq!(sub_code, 2);
    assert_eq!(data, vec![0x00, 0x12]);
}

#[test]
fn length_beyond_buffer_is_bad_message_length() {
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
01 00 04
"
    );
    let err = BgpPacket::parse_packet(PACKET).unwrap_err();
    assert_eq!(err, WireError::BadMessageLength(256));
}

#[test]
fn unknown_type_is_bad_message_type() {
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 13 09
"
    );
    let err = BgpPacket::parse_packet(PACKET).unwrap_err();
    assert_eq!(err, WireError::BadMessageType(9));
    let (code, sub_code, data) = err.to_notify();
    assert_eq!(code, NotifyCode::MsgHeaderError);
    assert_eq!(sub_code, 3);
    assert_eq!(data, vec![9]);
}

#[test]
fn open_bad_version() {
    // Version 3 in an otherwise well-formed OPEN.
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 1d 01 03 fc 00 00 5a c0 a8 00 0a 00
"
    );
    let err = BgpPacket::parse_packet(PACKET).unwrap_err();
    assert_eq!(err, WireError::UnsupportedVersion(3));
    let (code, sub_code, _) = err.to_notify();
    assert_eq!(code, NotifyCode::OpenMsgError);
    assert_eq!(sub_code, 1);
}

#[test]
fn open_non_capability_parameter() {
    // Optional parameter type 1 (deprecated authentication).
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 21 01 04 fc 00 00 5a c0 a8 00 0a 04
01 02 00 00
"
    );
    let err = BgpPacket::parse_packet(PACKET).unwrap_err();
    assert_eq!(err, WireError::UnsupportedOptionalParameter(1));
    let (code, sub_code, _) = err.to_notify();
    assert_eq!(code, NotifyCode::OpenMsgError);
    assert_eq!(sub_code, 4);
}

/// Frame an UPDATE around a raw path-attribute block.
fn update_with_attrs(attrs: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put(&[0xffu8; 16][..]);
    buf.put_u16(0); // length, patched below
    buf.put_u8(2); // type
    buf.put_u16(0); // withdrawn routes length
    buf.put_u16(attrs.len() as u16);
    buf.put(attrs);
    let length = buf.len() as u16;
    buf[16..18].copy_from_slice(&length.to_be_bytes());
    buf
}

#[test]
fn duplicate_attribute_is_malformed_list() {
    let attrs = hex!("40 01 01 00 40 01 01 00");
    let err = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap_err();
    assert_eq!(err, WireError::MalformedAttributeList);
    let (code, sub_code, _) = err.to_notify();
    assert_eq!(code, NotifyCode::UpdateMsgError);
    assert_eq!(sub_code, 1);
}

#[test]
fn invalid_origin_value() {
    let attrs = hex!("40 01 01 09");
    let err = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap_err();
    assert_eq!(err, WireError::InvalidOrigin(9));
    let (_, sub_code, data) = err.to_notify();
    assert_eq!(sub_code, 6);
    assert_eq!(data, vec![9]);
}

#[test]
fn zero_nexthop_is_invalid() {
    let attrs = hex!("40 03 04 00 00 00 00");
    let err = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap_err();
    assert_eq!(err, WireError::InvalidNexthop);
    let (_, sub_code, _) = err.to_notify();
    assert_eq!(sub_code, 8);
}

#[test]
fn wrong_flags_on_wellknown_attribute() {
    // ORIGIN with the optional bit set.
    let attrs = hex!("c0 01 01 00");
    let err = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap_err();
    assert!(matches!(err, WireError::AttributeFlagsError { attr_type: 1, .. }));
    let (_, sub_code, data) = err.to_notify();
    assert_eq!(sub_code, 4);
    // The data field carries the offending attribute.
    assert_eq!(data, attrs.to_vec());
}

#[test]
fn wrong_length_on_fixed_size_attribute() {
    // ORIGIN with two bytes of payload.
    let attrs = hex!("40 01 02 00 00");
    let err = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap_err();
    assert!(matches!(err, WireError::AttributeLengthError { attr_type: 1, .. }));
    let (_, sub_code, _) = err.to_notify();
    assert_eq!(sub_code, 5);
}

#[test]
fn unknown_wellknown_attribute_is_rejected() {
    // Attribute type 99 without the optional bit.
    let attrs = hex!("40 63 00");
    let err = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap_err();
    assert_eq!(err, WireError::UnrecognizedWellKnownAttribute(99));
    let (_, sub_code, data) = err.to_notify();
    assert_eq!(sub_code, 2);
    assert_eq!(data, vec![99]);
}

#[test]
fn unknown_optional_transitive_attribute_is_carried() {
    // Attribute type 99 with optional + transitive set survives decode.
    let attrs = hex!("c0 63 02 ab cd");
    let (_, packet) = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap();
    let BgpPacket::Update(update) = packet else {
        panic!("packet must be Update");
    };
    let parsed = update.attrs.unwrap();
    assert_eq!(parsed.unknown.len(), 1);
    assert_eq!(parsed.unknown[0].attr_type, 99);
    assert_eq!(parsed.unknown[0].data, vec![0xab, 0xcd]);
}

#[test]
fn truncated_attribute_is_malformed() {
    // ORIGIN claims two bytes but the block ends first.
    let attrs = hex!("40 01 02 00");
    let err = BgpPacket::parse_packet(&update_with_attrs(&attrs)).unwrap_err();
    assert_eq!(err, WireError::MalformedAttributeList);
}
