use bgp_wire::*;
use bytes::BytesMut;
use hex_literal::hex;

#[test]
fn parse_keepalive() {
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 13 04
"
    );
    let (rest, packet) = BgpPacket::parse_packet(PACKET).unwrap();
    assert!(rest.is_empty());
    assert!(matches!(packet, BgpPacket::Keepalive(_)));
}

#[test]
fn parse_notification_collision() {
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 15 03 06 07
"
    );
    let (_, packet) = BgpPacket::parse_packet(PACKET).unwrap();
    let BgpPacket::Notification(notification) = packet else {
        panic!("packet must be Notification");
    };
    assert_eq!(notification.code, NotifyCode::Cease);
    assert_eq!(notification.sub_code, 7);
}

#[test]
fn parse_open_with_capabilities() {
    // AS 64512, hold 90, id 192.168.0.10, MP inet + graceful restart.
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 2b 01 04 fc 00 00 5a c0 a8 00 0a 0e
02 06 01 04 00 01 00 01
02 04 40 02 00 00
"
    );
    let (rest, packet) = BgpPacket::parse_packet(PACKET).unwrap();
    assert!(rest.is_empty());
    let BgpPacket::Open(open) = packet else {
        panic!("packet must be Open");
    };
    assert_eq!(open.asn, 64512);
    assert_eq!(open.hold_time, 90);
    assert_eq!(open.identifier(), "192.168.0.10".parse::<std::net::Ipv4Addr>().unwrap());
    let inet = AfiSafi::new(Afi::Ip, Safi::Unicast);
    assert!(open.caps.has_family(&inet));
    let restart = open.caps.restart.as_ref().expect("graceful restart cap");
    assert_eq!(restart.restart_time(), 0);
}

#[test]
fn open_emit_parse_roundtrip() {
    let mut caps = BgpCaps::default();
    for family in Family::ALL.iter() {
        let afi_safi = family.afi_safi();
        caps.mp.insert(
            afi_safi,
            CapMultiProtocol::new(&afi_safi.afi, &afi_safi.safi),
        );
    }
    caps.restart = Some(CapRestart::signalling_only());

    let header = BgpHeader::new(BgpType::Open, BGP_HEADER_LEN);
    let open = OpenPacket::new(
        header,
        64512,
        90,
        &"192.168.0.10".parse().unwrap(),
        caps.clone(),
    );
    let bytes: BytesMut = open.into();

    let (rest, packet) = BgpPacket::parse_packet(&bytes).unwrap();
    assert!(rest.is_empty());
    let BgpPacket::Open(open) = packet else {
        panic!("packet must be Open");
    };
    assert_eq!(open.asn, 64512);
    assert_eq!(open.caps.mp.len(), Family::ALL.len());
    assert_eq!(open.caps.restart, caps.restart);
}

#[test]
fn parse_update_ipv4() {
    // Origin IGP, empty AS path, nexthop 127.0.0.127, local-pref 100,
    // NLRI 192.168.1.0/24.
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 30 02 00 00 00 15
40 01 01 00
40 02 00
40 03 04 7f 00 00 7f
40 05 04 00 00 00 64
18 c0 a8 01
"
    );
    let (rest, packet) = BgpPacket::parse_packet(PACKET).unwrap();
    assert!(rest.is_empty());
    let BgpPacket::Update(update) = packet else {
        panic!("packet must be Update");
    };
    let attrs = update.attrs.as_ref().unwrap();
    assert_eq!(attrs.origin, Some(Origin::Igp));
    assert_eq!(attrs.aspath_length(), 0);
    assert_eq!(
        attrs.nexthop.as_ref().map(|n| n.nexthop),
        Some("127.0.0.127".parse().unwrap())
    );
    assert_eq!(attrs.local_pref_value(), 100);
    assert_eq!(update.nlri.len(), 1);
    assert_eq!(update.nlri[0].prefix, "192.168.1.0/24".parse().unwrap());
}

#[test]
fn update_withdraws_one_per_prefix() {
    // Three withdrawn prefixes must each be visited exactly once.
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 23 02 00 0c
18 c0 a8 01
18 c0 a8 02
18 c0 a8 03
00 00
"
    );
    let (_, packet) = BgpPacket::parse_packet(PACKET).unwrap();
    let BgpPacket::Update(update) = packet else {
        panic!("packet must be Update");
    };
    assert_eq!(update.withdraws.len(), 3);
    let prefixes: Vec<String> = update
        .withdraws
        .iter()
        .map(|w| w.prefix.to_string())
        .collect();
    assert_eq!(
        prefixes,
        vec!["192.168.1.0/24", "192.168.2.0/24", "192.168.3.0/24"]
    );
}

#[test]
fn empty_update_is_inet_eor() {
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 17 02 00 00 00 00
"
    );
    let (_, packet) = BgpPacket::parse_packet(PACKET).unwrap();
    let BgpPacket::Update(update) = packet else {
        panic!("packet must be Update");
    };
    assert!(update.is_inet_eor());
}

#[test]
fn parse_vpn_eor_marker() {
    // MP_UNREACH for vpnv4 with no NLRI is End-of-RIB for the family.
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 1d 02 00 00 00 06
80 0f 03 00 01 80
"
    );
    let (_, packet) = BgpPacket::parse_packet(PACKET).unwrap();
    let BgpPacket::Update(update) = packet else {
        panic!("packet must be Update");
    };
    let unreach = update.mp_unreach.as_ref().unwrap();
    assert!(unreach.is_eor());
    assert_eq!(unreach.family(), Family::InetVpn);
}

fn base_attrs() -> AttrSet {
    let mut attrs = AttrSet::default();
    attrs.origin = Some(Origin::Igp);
    attrs.aspath = Some(AsPath::new());
    attrs.local_pref = Some(LocalPref::new(100));
    attrs
}

fn roundtrip(update: UpdatePacket) -> UpdatePacket {
    let bytes: BytesMut = update.into();
    let (rest, packet) = BgpPacket::parse_packet(&bytes).unwrap();
    assert!(rest.is_empty());
    match packet {
        BgpPacket::Update(update) => *update,
        _ => panic!("packet must be Update"),
    }
}

#[test]
fn vpnv4_reach_roundtrip() {
    let mut update = UpdatePacket::new();
    update.attrs = Some(base_attrs());
    update.mp_reach = Some(MpReachAttr::Vpnv4 {
        nexthop: "10.0.0.1".parse().unwrap(),
        routes: vec![Vpnv4Nlri {
            label: Label::new(1000),
            rd: RouteDistinguisher::from_as(64512, 1),
            prefix: "10.1.1.0/24".parse().unwrap(),
        }],
    });
    let parsed = roundtrip(update);
    let Some(MpReachAttr::Vpnv4 { nexthop, routes }) = parsed.mp_reach else {
        panic!("mp_reach must be vpnv4");
    };
    assert_eq!(nexthop, "10.0.0.1".parse::<std::net::Ipv4Addr>().unwrap());
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].label.label, 1000);
    assert_eq!(routes[0].rd, RouteDistinguisher::from_as(64512, 1));
    assert_eq!(routes[0].prefix, "10.1.1.0/24".parse().unwrap());
}

#[test]
fn evpn_reach_roundtrip() {
    let mac = EvpnNlri::MacAdv(EvpnMacAdv {
        rd: RouteDistinguisher::from_ip("192.168.0.10".parse().unwrap(), 5),
        esi: [0u8; 10],
        ether_tag: 0,
        mac: [0x00, 0x1c, 0x42, 0x1d, 0x71, 0x53],
        ip: None,
        label: 4096,
    });
    let mut update = UpdatePacket::new();
    update.attrs = Some(base_attrs());
    update.mp_reach = Some(MpReachAttr::Evpn {
        nexthop: "10.0.0.1".parse().unwrap(),
        routes: vec![mac.clone()],
    });
    let parsed = roundtrip(update);
    let Some(MpReachAttr::Evpn { routes, .. }) = parsed.mp_reach else {
        panic!("mp_reach must be evpn");
    };
    assert_eq!(routes, vec![mac]);
}

#[test]
fn rtarget_reach_roundtrip() {
    let nlri = RTargetNlri::new(64512, ExtCommunityValue::route_target(64512, 8000001));
    let mut update = UpdatePacket::new();
    update.attrs = Some(base_attrs());
    update.mp_reach = Some(MpReachAttr::RTarget {
        nexthop: "192.168.0.10".parse().unwrap(),
        routes: vec![nlri],
    });
    let parsed = roundtrip(update);
    let Some(MpReachAttr::RTarget { routes, .. }) = parsed.mp_reach else {
        panic!("mp_reach must be rtarget");
    };
    assert_eq!(routes, vec![nlri]);
}

#[test]
fn ermvpn_reach_roundtrip() {
    let nlri = ErmVpnNlri {
        route_type: ErmVpnRouteType::GlobalTreeRoute,
        rd: RouteDistinguisher::from_ip("192.168.0.10".parse().unwrap(), 2),
        router_id: "192.168.0.10".parse().unwrap(),
        group: "239.1.1.1".parse().unwrap(),
        source: "10.0.0.1".parse().unwrap(),
    };
    let mut update = UpdatePacket::new();
    update.attrs = Some(base_attrs());
    update.mp_reach = Some(MpReachAttr::ErmVpn {
        nexthop: "10.0.0.1".parse().unwrap(),
        routes: vec![nlri.clone()],
    });
    let parsed = roundtrip(update);
    let Some(MpReachAttr::ErmVpn { routes, .. }) = parsed.mp_reach else {
        panic!("mp_reach must be ermvpn");
    };
    assert_eq!(routes, vec![nlri]);
}

#[test]
fn update_attr_roundtrip_preserves_values() {
    let mut attrs = base_attrs();
    let mut seg = AsSegment::new(AS_SEQUENCE);
    seg.asn = vec![64512, 64513];
    attrs.aspath.as_mut().unwrap().segs.push(seg);
    attrs.med = Some(Med::new(50));
    attrs.nexthop = Some(NexthopAttr::new("127.0.0.127".parse().unwrap()));
    let mut com = Community::new();
    com.push((64512u32 << 16) | 100);
    attrs.com = Some(com.clone());
    let mut ecom = ExtCommunity::new();
    ecom.push(ExtCommunityValue::route_target(64512, 100));
    attrs.ecom = Some(ecom.clone());

    let mut update = UpdatePacket::new();
    update.attrs = Some(attrs.clone());
    update.nlri = vec![Ipv4Nlri::new("192.168.1.0/24".parse().unwrap())];

    let parsed = roundtrip(update);
    let parsed_attrs = parsed.attrs.unwrap();
    assert_eq!(parsed_attrs.origin, attrs.origin);
    assert_eq!(parsed_attrs.aspath, attrs.aspath);
    assert_eq!(parsed_attrs.med, attrs.med);
    assert_eq!(parsed_attrs.com, Some(com));
    assert_eq!(parsed_attrs.ecom, Some(ecom));
    assert_eq!(parsed.nlri.len(), 1);
}

#[test]
fn message_length_probe() {
    assert_eq!(peek_bgp_length(&[]), None);
    assert_eq!(peek_bgp_length(&[0xff; 17]), None);
    const PACKET: &[u8] = &hex!(
        "
ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff ff
00 13 04
"
    );
    assert_eq!(peek_bgp_length(PACKET), Some(19));
}
