use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use bgp_wire::{
    AfiSafi, BGP_HEADER_LEN, BgpCaps, BgpHeader, BgpType, CapMultiProtocol, CapRestart, CeaseSubCode,
    Family, NotificationPacket, NotifyCode, OpenError, OpenPacket, UpdatePacket, WireError,
    notify_sub_code_str,
};

use crate::context::{Task, Timer};

use super::fsm::{Event, State};
use super::inst::Message;
use super::route::{PathFlags, PathPeer, PeerKey, PeerType};
use super::session::{Session, SessionKind};
use super::timer;

#[derive(Serialize, Debug, Default, Clone, Copy)]
pub struct PeerCounter {
    pub sent: u64,
    pub rcvd: u64,
}

/// Per-category error counters surfaced through introspection.
#[derive(Serialize, Debug, Default, Clone, Copy)]
pub struct PeerErrorCounters {
    pub connect_error: u64,
    pub hold_timer_expired: u64,
    pub open_error: u64,
    pub update_error: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct NotificationInfo {
    pub code: u8,
    pub sub_code: u8,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PeerTimers {
    pub connect_retry: Option<Timer>,
    pub open_delay: Option<Timer>,
    pub hold: Option<Timer>,
    pub keepalive: Option<Timer>,
    pub idle_hold: Option<Timer>,
    pub eor_deferral: Option<Timer>,
}

impl PeerTimers {
    pub fn cancel_all(&mut self) {
        self.connect_retry = None;
        self.open_delay = None;
        self.hold = None;
        self.keepalive = None;
        self.idle_hold = None;
        self.eor_deferral = None;
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub families: Vec<Family>,
    pub timer: timer::Config,
    pub vendor: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            families: vec![Family::Inet],
            timer: timer::Config::default(),
            vendor: String::new(),
        }
    }
}

/// Durable configured neighbor. Transport sessions come and go underneath
/// it; at most one becomes the negotiated session.
pub struct Peer {
    pub ident: IpAddr,
    pub name: String,
    pub key: PeerKey,
    pub index: usize,
    pub instance: String,

    pub local_as: u32,
    pub peer_as: u32,
    pub local_identifier: Ipv4Addr,
    pub remote_identifier: Ipv4Addr,
    pub peer_port: u16,

    pub config: PeerConfig,
    pub negotiated_families: Vec<Family>,
    pub hold_time: u16,
    pub keepalive_time: u16,

    pub state: State,
    pub last_state: State,
    pub last_state_change: DateTime<Utc>,
    pub last_event: &'static str,

    pub admin_down: bool,
    pub deleted: bool,

    // Transport sessions. Active and passive coexist only during
    // collision resolution; `session` is the negotiated one.
    pub session: Option<Session>,
    pub active_session: Option<Session>,
    pub passive_session: Option<Session>,
    pub defunct: Vec<Session>,
    pub connect_task: Option<Task<()>>,
    pub connect_epoch: u64,
    serial_gen: u64,

    pub timers: PeerTimers,
    pub connect_attempts: u32,
    pub idle_hold_ms: u64,

    pub flap_count: u64,
    pub last_flap: Option<DateTime<Utc>>,
    pub counters: [PeerCounter; BgpType::Max as usize],
    pub error_counters: PeerErrorCounters,
    pub last_notification_in: Option<NotificationInfo>,
    pub last_notification_out: Option<NotificationInfo>,

    pub membership_req_pending: u32,
    pub vpn_tables_registered: bool,
    pub eor_sent: BTreeSet<Family>,
    pub eor_received: BTreeSet<Family>,

    pub tx: mpsc::Sender<Message>,
}

impl Peer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ident: IpAddr,
        name: &str,
        uuid: &str,
        index: usize,
        local_as: u32,
        local_identifier: Ipv4Addr,
        peer_as: u32,
        tx: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            ident,
            name: name.to_string(),
            key: PeerKey::new(ident, uuid),
            index,
            instance: super::instance::MASTER_INSTANCE.to_string(),
            local_as,
            peer_as,
            local_identifier,
            remote_identifier: Ipv4Addr::UNSPECIFIED,
            peer_port: super::BGP_PORT,
            config: PeerConfig::default(),
            negotiated_families: Vec::new(),
            hold_time: timer::Config::DEFAULT_HOLD_TIME as u16,
            keepalive_time: (timer::Config::DEFAULT_HOLD_TIME / 3) as u16,
            state: State::Idle,
            last_state: State::Idle,
            last_state_change: Utc::now(),
            last_event: "",
            admin_down: false,
            deleted: false,
            session: None,
            active_session: None,
            passive_session: None,
            defunct: Vec::new(),
            connect_task: None,
            connect_epoch: 0,
            serial_gen: 0,
            timers: PeerTimers::default(),
            connect_attempts: 0,
            idle_hold_ms: 0,
            flap_count: 0,
            last_flap: None,
            counters: [PeerCounter::default(); BgpType::Max as usize],
            error_counters: PeerErrorCounters::default(),
            last_notification_in: None,
            last_notification_out: None,
            membership_req_pending: 0,
            vpn_tables_registered: false,
            eor_sent: BTreeSet::new(),
            eor_received: BTreeSet::new(),
            tx,
        }
    }

    pub fn next_serial(&mut self) -> u64 {
        self.serial_gen += 1;
        self.serial_gen
    }

    pub fn peer_type(&self) -> PeerType {
        if self.local_as == self.peer_as {
            PeerType::IBgp
        } else {
            PeerType::EBgp
        }
    }

    pub fn is_ibgp(&self) -> bool {
        self.peer_type() == PeerType::IBgp
    }

    pub fn is_ebgp(&self) -> bool {
        self.peer_type() == PeerType::EBgp
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_established() && !self.admin_down && !self.deleted
    }

    /// Capability bag snapshot attached to paths learned from this peer.
    pub fn path_peer(&self) -> PathPeer {
        PathPeer {
            key: self.key.clone(),
            bgp_id: self.remote_identifier,
            peer_type: self.peer_type(),
            is_xmpp: false,
            is_ready: self.is_ready(),
        }
    }

    pub fn family_negotiated(&self, family: Family) -> bool {
        self.negotiated_families.contains(&family)
    }

    /// The opaque vendor tag; "contrail" marks a control-node peer.
    pub fn is_control_node(&self) -> bool {
        self.config.vendor == "contrail"
    }

    /// Session lookup by serial, used to validate session-scoped events.
    pub fn session_by_serial(&self, serial: u64) -> Option<&Session> {
        [
            self.session.as_ref(),
            self.active_session.as_ref(),
            self.passive_session.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|s| s.serial == serial)
    }

    pub fn has_session(&self, serial: u64) -> bool {
        self.session_by_serial(serial).is_some()
    }

    /// Move a closed session to the defunct list and post the deferred
    /// delete event; the transport is freed only when that event drains.
    pub fn defer_session_delete(&mut self, session: Session) {
        let serial = session.serial;
        self.defunct.push(session);
        let _ = self
            .tx
            .try_send(Message::Event(self.ident, Event::DeleteSession(serial)));
    }

    pub fn close_all_sessions(&mut self) {
        if let Some(session) = self.session.take() {
            self.defer_session_delete(session);
        }
        if let Some(session) = self.active_session.take() {
            self.defer_session_delete(session);
        }
        if let Some(session) = self.passive_session.take() {
            self.defer_session_delete(session);
        }
        self.connect_task = None;
    }

    /// Grow the idle hold time across repeated flaps, capped. The first
    /// start is immediate; the first flap begins the progression.
    pub fn bump_idle_hold(&mut self) {
        self.idle_hold_ms = if self.idle_hold_ms == 0 {
            self.config.timer.initial_idle_hold_ms()
        } else {
            self.idle_hold_ms
                .saturating_mul(2)
                .min(timer::Config::MAX_IDLE_HOLD_TIME_MS)
        };
    }

    pub fn reset_idle_hold(&mut self) {
        self.idle_hold_ms = 0;
    }

    /// A peer is destroyed only when its sessions are closed and all of
    /// its per-RIB memberships are withdrawn.
    pub fn may_delete(&self) -> bool {
        self.deleted
            && self.session.is_none()
            && self.active_session.is_none()
            && self.passive_session.is_none()
            && self.defunct.is_empty()
            && self.membership_req_pending == 0
    }
}

// ---- message transmit paths ----

const GR_RESTART_TIME: u16 = 120;

pub fn build_open(peer: &Peer) -> OpenPacket {
    let header = BgpHeader::new(BgpType::Open, BGP_HEADER_LEN);
    let mut caps = BgpCaps::default();
    for family in peer.config.families.iter() {
        let afi_safi = family.afi_safi();
        caps.mp.insert(
            afi_safi,
            CapMultiProtocol::new(&afi_safi.afi, &afi_safi.safi),
        );
    }
    // Graceful restart is signalling-only (restart time zero) unless the
    // environment explicitly enables restart behavior.
    caps.restart = if std::env::var("BGP_GRACEFUL_RESTART_ENABLE").is_ok() {
        let values = peer
            .config
            .families
            .iter()
            .map(|family| {
                let afi_safi = family.afi_safi();
                bgp_wire::RestartValue::new(afi_safi.afi, afi_safi.safi)
            })
            .collect();
        Some(CapRestart::with_time(GR_RESTART_TIME, values))
    } else {
        Some(CapRestart::signalling_only())
    };

    OpenPacket::new(
        header,
        peer.local_as as u16,
        peer.config.timer.hold_time() as u16,
        &peer.local_identifier,
        caps,
    )
}

fn session_send(session: Option<&Session>, bytes: BytesMut) -> bool {
    match session {
        Some(session) => session.send(bytes),
        None => false,
    }
}

pub fn send_open_on(peer: &mut Peer, kind: SessionKind) {
    let open = build_open(peer);
    let bytes: BytesMut = open.into();
    let session = match kind {
        SessionKind::Active => peer.active_session.as_mut(),
        SessionKind::Passive => peer.passive_session.as_mut(),
    };
    if let Some(session) = session {
        if session.send(bytes) {
            session.open_sent = true;
            peer.counters[BgpType::Open as usize].sent += 1;
        }
    }
}

pub fn send_keepalive(peer: &mut Peer) {
    let session = peer.session.as_ref().or(peer.passive_session.as_ref());
    let Some(session) = session else {
        return;
    };
    // Backpressure: keepalives are suspended while the writer is
    // backlogged. The hold timer still runs on the remote side.
    if !session.is_send_ready() {
        return;
    }
    let header = BgpHeader::new(BgpType::Keepalive, BGP_HEADER_LEN);
    let bytes: BytesMut = header.into();
    if session.send(bytes) {
        peer.counters[BgpType::Keepalive as usize].sent += 1;
    }
}

/// Send a NOTIFICATION on a specific live session.
pub fn send_notification_on(
    peer: &mut Peer,
    serial: u64,
    code: NotifyCode,
    sub_code: u8,
    data: Vec<u8>,
) {
    let notification = NotificationPacket::new(code, sub_code, data);
    let text = format!("{}", notification);
    let bytes: BytesMut = notification.into();
    if session_send(peer.session_by_serial(serial), bytes) {
        peer.counters[BgpType::Notification as usize].sent += 1;
        peer.last_notification_out = Some(NotificationInfo {
            code: code.into(),
            sub_code,
            text,
            at: Utc::now(),
        });
    }
}

/// Send a NOTIFICATION on whatever session is current.
pub fn send_notification(peer: &mut Peer, code: NotifyCode, sub_code: u8, data: Vec<u8>) {
    let serial = peer
        .session
        .as_ref()
        .or(peer.passive_session.as_ref())
        .or(peer.active_session.as_ref())
        .map(|s| s.serial);
    if let Some(serial) = serial {
        send_notification_on(peer, serial, code, sub_code, data);
    }
}

pub fn send_update(peer: &mut Peer, update: UpdatePacket) {
    if std::env::var("BGP_SKIP_UPDATE_SEND").is_ok() {
        return;
    }
    let Some(session) = peer.session.as_ref() else {
        return;
    };
    let bytes: BytesMut = update.into();
    if session.send(bytes) {
        peer.counters[BgpType::Update as usize].sent += 1;
    }
}

/// Record an inbound NOTIFICATION for diagnostics.
pub fn note_notification_in(peer: &mut Peer, packet: &NotificationPacket) {
    peer.counters[BgpType::Notification as usize].rcvd += 1;
    peer.last_notification_in = Some(NotificationInfo {
        code: packet.code.into(),
        sub_code: packet.sub_code,
        text: notify_sub_code_str(packet.code, packet.sub_code),
        at: Utc::now(),
    });
}

// ---- OPEN validation and negotiation ----

pub enum OpenCheck {
    Ok,
    Reject(NotifyCode, u8, Vec<u8>),
}

pub fn open_validate(peer: &Peer, open: &OpenPacket) -> OpenCheck {
    if open.identifier().is_unspecified() {
        return OpenCheck::Reject(
            NotifyCode::OpenMsgError,
            OpenError::BadBgpIdentifier as u8,
            Vec::new(),
        );
    }
    if open.asn as u32 != peer.peer_as {
        return OpenCheck::Reject(
            NotifyCode::OpenMsgError,
            OpenError::BadPeerAS as u8,
            Vec::new(),
        );
    }
    if open.hold_time > 0 && open.hold_time < 3 {
        return OpenCheck::Reject(
            NotifyCode::OpenMsgError,
            OpenError::UnacceptableHoldTime as u8,
            open.hold_time.to_be_bytes().to_vec(),
        );
    }
    OpenCheck::Ok
}

/// Negotiate hold time and address families from a valid OPEN.
pub fn open_negotiate(peer: &mut Peer, open: &OpenPacket) {
    peer.remote_identifier = open.identifier();

    // Hold time: zero disables; otherwise the minimum of both sides.
    if open.hold_time == 0 {
        peer.hold_time = 0;
        peer.keepalive_time = 0;
    } else {
        peer.hold_time = std::cmp::min(open.hold_time, peer.config.timer.hold_time() as u16);
        peer.keepalive_time = peer.hold_time / 3;
    }

    // Families: intersection of configured and received multiprotocol
    // capabilities. A remote without any MP capability is IPv4 unicast
    // only.
    let inet = AfiSafi::new(bgp_wire::Afi::Ip, bgp_wire::Safi::Unicast);
    peer.negotiated_families = peer
        .config
        .families
        .iter()
        .copied()
        .filter(|family| {
            let afi_safi = family.afi_safi();
            if open.caps.mp.is_empty() {
                afi_safi == inet
            } else {
                open.caps.has_family(&afi_safi)
            }
        })
        .collect();
}

// ---- UPDATE semantic validation ----

/// Validate an UPDATE against the session-dependent rules and derive the
/// flags to be set on the resulting paths. Errors become a NOTIFICATION
/// and drop the session to Idle.
pub fn update_validate(peer: &Peer, update: &UpdatePacket) -> Result<PathFlags, WireError> {
    let mut flags = PathFlags::empty();
    let Some(attrs) = update.attrs.as_ref() else {
        if update.has_reach() {
            return Err(WireError::MissingWellKnownAttribute(1));
        }
        return Ok(flags);
    };

    if update.has_reach() {
        if attrs.origin.is_none() {
            return Err(WireError::MissingWellKnownAttribute(1));
        }
        if attrs.aspath.is_none() {
            return Err(WireError::MissingWellKnownAttribute(2));
        }
        if !update.nlri.is_empty() && attrs.nexthop.is_none() {
            return Err(WireError::MissingWellKnownAttribute(3));
        }
        if peer.is_ibgp() && attrs.local_pref.is_none() {
            return Err(WireError::MissingWellKnownAttribute(5));
        }
    }

    if let Some(aspath) = attrs.aspath.as_ref() {
        if peer.is_ebgp() {
            if aspath.is_empty() {
                return Err(WireError::MalformedAsPath);
            }
            // The leftmost AS must be the neighbor's; a mismatch makes the
            // path infeasible without bouncing the session.
            if aspath.neighbor_as() != Some(peer.peer_as as u16) {
                flags |= PathFlags::NO_NEIGHBOR_AS;
            }
        }
        if aspath.contains(peer.local_as as u16) {
            flags |= PathFlags::AS_PATH_LOOPED;
        }
    }

    Ok(flags)
}

/// Reject an unwanted inbound connection with a NOTIFICATION, then close.
pub fn reject_connection(stream: TcpStream, code: NotifyCode, sub_code: u8) {
    use std::time::Duration;
    use tokio::time::timeout;

    tokio::spawn(async move {
        let notification = NotificationPacket::new(code, sub_code, Vec::new());
        let bytes: BytesMut = notification.into();
        let mut stream = stream;
        // Bounded so a wedged remote cannot pin the fd.
        let _ = timeout(Duration::from_secs(5), async {
            let _ = stream.write_all(&bytes).await;
            let _ = stream.shutdown().await;
        })
        .await;
    });
}

pub fn cease(sub_code: CeaseSubCode) -> u8 {
    sub_code as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgp_wire::{AsPath, AsSegment, AttrSet, LocalPref, NexthopAttr, Origin, AS_SEQUENCE};

    fn test_peer(local_as: u32, peer_as: u32) -> Peer {
        let (tx, _rx) = mpsc::channel(8);
        Peer::new(
            "10.0.0.1".parse().unwrap(),
            "peer1",
            "uuid-1",
            0,
            local_as,
            "192.168.0.10".parse().unwrap(),
            peer_as,
            tx,
        )
    }

    fn open_with(asn: u16, hold_time: u16, id: [u8; 4]) -> OpenPacket {
        let header = BgpHeader::new(BgpType::Open, BGP_HEADER_LEN);
        OpenPacket {
            header,
            version: 4,
            asn,
            hold_time,
            bgp_id: id,
            opt_param_len: 0,
            caps: BgpCaps::default(),
        }
    }

    fn update_with_reach(attrs: AttrSet) -> UpdatePacket {
        let mut update = UpdatePacket::new();
        update.attrs = Some(attrs);
        update.nlri = vec![bgp_wire::Ipv4Nlri::new("192.168.1.0/24".parse().unwrap())];
        update
    }

    fn base_attrs(asns: &[u16]) -> AttrSet {
        let mut attrs = AttrSet::default();
        attrs.origin = Some(Origin::Igp);
        let mut aspath = AsPath::new();
        if !asns.is_empty() {
            let mut seg = AsSegment::new(AS_SEQUENCE);
            seg.asn = asns.to_vec();
            aspath.segs.push(seg);
        }
        attrs.aspath = Some(aspath);
        attrs.nexthop = Some(NexthopAttr::new("127.0.0.127".parse().unwrap()));
        attrs.local_pref = Some(LocalPref::new(100));
        attrs
    }

    #[test]
    fn open_rejects_zero_identifier() {
        let peer = test_peer(64512, 64512);
        let open = open_with(64512, 90, [0, 0, 0, 0]);
        assert!(matches!(
            open_validate(&peer, &open),
            OpenCheck::Reject(NotifyCode::OpenMsgError, 3, _)
        ));
    }

    #[test]
    fn open_rejects_small_hold_time() {
        let peer = test_peer(64512, 64512);
        for hold in [1u16, 2] {
            let open = open_with(64512, hold, [192, 168, 0, 11]);
            assert!(matches!(
                open_validate(&peer, &open),
                OpenCheck::Reject(NotifyCode::OpenMsgError, 6, _)
            ));
        }
        // Zero disables the hold timer and is acceptable.
        let open = open_with(64512, 0, [192, 168, 0, 11]);
        assert!(matches!(open_validate(&peer, &open), OpenCheck::Ok));
    }

    #[test]
    fn hold_time_negotiates_to_minimum() {
        let mut peer = test_peer(64512, 64512);
        let open = open_with(64512, 30, [192, 168, 0, 11]);
        open_negotiate(&mut peer, &open);
        assert_eq!(peer.hold_time, 30);
        assert_eq!(peer.keepalive_time, 10);

        let open = open_with(64512, 0, [192, 168, 0, 11]);
        open_negotiate(&mut peer, &open);
        assert_eq!(peer.hold_time, 0);
        assert_eq!(peer.keepalive_time, 0);
    }

    #[test]
    fn update_requires_origin_and_aspath_for_reach() {
        let peer = test_peer(64512, 64512);
        let mut attrs = base_attrs(&[]);
        attrs.origin = None;
        let update = update_with_reach(attrs);
        assert_eq!(
            update_validate(&peer, &update),
            Err(WireError::MissingWellKnownAttribute(1))
        );
    }

    #[test]
    fn update_requires_local_pref_on_ibgp() {
        let peer = test_peer(64512, 64512);
        let mut attrs = base_attrs(&[]);
        attrs.local_pref = None;
        let update = update_with_reach(attrs);
        assert_eq!(
            update_validate(&peer, &update),
            Err(WireError::MissingWellKnownAttribute(5))
        );
    }

    #[test]
    fn ebgp_empty_aspath_is_malformed() {
        let peer = test_peer(64512, 64513);
        let update = update_with_reach(base_attrs(&[]));
        assert_eq!(update_validate(&peer, &update), Err(WireError::MalformedAsPath));
    }

    #[test]
    fn ebgp_wrong_neighbor_as_sets_flag() {
        let peer = test_peer(64512, 64513);
        let update = update_with_reach(base_attrs(&[64999]));
        let flags = update_validate(&peer, &update).unwrap();
        assert!(flags.contains(PathFlags::NO_NEIGHBOR_AS));
    }

    #[test]
    fn own_as_in_path_sets_loop_flag() {
        let peer = test_peer(64512, 64513);
        let update = update_with_reach(base_attrs(&[64513, 64512]));
        let flags = update_validate(&peer, &update).unwrap();
        assert!(flags.contains(PathFlags::AS_PATH_LOOPED));
    }

    #[test]
    fn eor_update_has_no_mandatory_attrs() {
        let peer = test_peer(64512, 64512);
        let update = UpdatePacket::new();
        assert!(update_validate(&peer, &update).is_ok());
    }
}
