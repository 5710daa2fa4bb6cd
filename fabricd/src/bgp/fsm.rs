use std::net::IpAddr;

use serde::Serialize;
use tokio::net::TcpStream;

use bgp_wire::{
    BgpType, CeaseSubCode, Family, NotificationPacket, NotifyCode, OpenPacket, UpdatePacket,
    WireError,
};

use crate::context::Task;

use super::inst::{Bgp, Message};
use super::peer::{
    self, OpenCheck, Peer, note_notification_in, open_negotiate, open_validate, reject_connection,
    send_keepalive, send_notification, send_notification_on, send_open_on, update_validate,
};
use super::route::PathFlags;
use super::session::{Session, SessionKind};
use super::timer;

#[derive(Debug, Eq, PartialEq, Clone, Copy, Serialize)]
pub enum State {
    Idle,
    Active,
    Connect,
    OpenSent,
    OpenConfirm,
    Established,
}

impl State {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Active => "Active",
            Self::Connect => "Connect",
            Self::OpenSent => "OpenSent",
            Self::OpenConfirm => "OpenConfirm",
            Self::Established => "Established",
        }
    }

    pub fn is_established(&self) -> bool {
        *self == State::Established
    }
}

/// State-machine input. Session-scoped events carry the session serial and
/// connect results carry the attempt epoch; both act as the validator that
/// discards events which raced with a cancel or a close.
#[derive(Debug)]
pub enum Event {
    Start,
    Stop(u8),
    ConnectRetryExpired,
    HoldTimerExpired,
    KeepaliveExpired,
    OpenDelayExpired,
    IdleHoldExpired,
    EorDeferralExpired,
    Connected(u64, TcpStream),
    ConnectFail(u64),
    PassiveOpen(TcpStream),
    TcpClose(u64),
    DeleteSession(u64),
    SendReady(u64),
    BgpOpen(u64, Box<OpenPacket>),
    BgpKeepalive(u64),
    BgpUpdate(u64, Box<UpdatePacket>),
    BgpNotification(u64, NotificationPacket),
    ParseError(u64, WireError),
}

impl Event {
    pub fn name(&self) -> &'static str {
        use Event::*;
        match self {
            Start => "Start",
            Stop(_) => "Stop",
            ConnectRetryExpired => "ConnectRetryExpired",
            HoldTimerExpired => "HoldTimerExpired",
            KeepaliveExpired => "KeepaliveExpired",
            OpenDelayExpired => "OpenDelayExpired",
            IdleHoldExpired => "IdleHoldExpired",
            EorDeferralExpired => "EorDeferralExpired",
            Connected(_, _) => "TcpConnected",
            ConnectFail(_) => "TcpConnectFail",
            PassiveOpen(_) => "TcpPassiveOpen",
            TcpClose(_) => "TcpClose",
            DeleteSession(_) => "TcpDeleteSession",
            SendReady(_) => "SendReady",
            BgpOpen(_, _) => "BgpOpen",
            BgpKeepalive(_) => "BgpKeepalive",
            BgpUpdate(_, _) => "BgpUpdate",
            BgpNotification(_, _) => "BgpNotification",
            ParseError(_, _) => "BgpParseError",
        }
    }
}

enum FsmEffect {
    None,
    RouteUpdate(Box<UpdatePacket>, PathFlags),
    RegisterVpnTables,
}

/// Re-checked at dequeue time: an event whose timer was cancelled or whose
/// session is gone no longer applies and is dropped without a transition.
fn validate(peer: &Peer, event: &Event) -> bool {
    use Event::*;
    match event {
        Connected(epoch, _) | ConnectFail(epoch) => {
            *epoch == peer.connect_epoch && peer.state == State::Connect
        }
        ConnectRetryExpired => {
            peer.timers.connect_retry.is_some() && peer.passive_session.is_none()
        }
        OpenDelayExpired => peer.timers.open_delay.is_some(),
        IdleHoldExpired => peer.timers.idle_hold.is_some(),
        HoldTimerExpired => peer.timers.hold.is_some(),
        KeepaliveExpired => peer.timers.keepalive.is_some(),
        EorDeferralExpired => peer.timers.eor_deferral.is_some(),
        TcpClose(serial) | SendReady(serial) | BgpKeepalive(serial) => peer.has_session(*serial),
        BgpOpen(serial, _)
        | BgpUpdate(serial, _)
        | BgpNotification(serial, _)
        | ParseError(serial, _) => peer.has_session(*serial),
        _ => true,
    }
}

/// Single entry point for all state-machine events of one peer. Events for
/// one peer are serialized through the server queue, so this runs to
/// completion without interleaving.
pub fn fsm(bgp: &mut Bgp, ident: IpAddr, event: Event) {
    let Some(peer) = bgp.peers.get_mut(&ident) else {
        return;
    };
    if !validate(peer, &event) {
        return;
    }
    peer.last_event = event.name();

    let prev_state = peer.state;
    let (next_state, effect) = dispatch(peer, event);
    peer.state = next_state;

    // Side effects that need the full server (route updates, table joins).
    match effect {
        FsmEffect::None => {}
        FsmEffect::RouteUpdate(update, flags) => {
            bgp.route_update_from_peer(ident, *update, flags);
        }
        FsmEffect::RegisterVpnTables => {
            bgp.register_vpn_tables(ident);
        }
    }

    // Transition consequences.
    let (became_established, left_established) = {
        let Some(peer) = bgp.peers.get_mut(&ident) else {
            return;
        };
        if prev_state == peer.state {
            return;
        }
        peer.last_state = prev_state;
        peer.last_state_change = chrono::Utc::now();
        tracing::info!(
            "bgp peer {}: {} -> {}",
            ident,
            prev_state.to_str(),
            peer.state.to_str()
        );

        update_timers(peer);

        if peer.state == State::OpenConfirm && prev_state != State::OpenConfirm {
            send_keepalive(peer);
        }

        let became = !prev_state.is_established() && peer.state.is_established();
        let left = prev_state.is_established() && !peer.state.is_established();
        if became {
            peer.connect_attempts = 0;
            peer.reset_idle_hold();
        } else if left {
            // Flap accounting happens after the state is set so observers
            // that wait on the flap count see a consistent state.
            peer.flap_count += 1;
            peer.last_flap = Some(chrono::Utc::now());
            peer.bump_idle_hold();
        }
        (became, left)
    };

    if became_established {
        bgp.register_all_tables(ident);
    } else if left_established {
        bgp.peer_down(ident);
    }
}

fn dispatch(peer: &mut Peer, event: Event) -> (State, FsmEffect) {
    use Event::*;
    match event {
        Start => (fsm_start(peer), FsmEffect::None),
        Stop(sub_code) => (fsm_stop(peer, sub_code), FsmEffect::None),
        ConnectRetryExpired => (fsm_connect_retry_expired(peer), FsmEffect::None),
        HoldTimerExpired => (fsm_holdtimer_expired(peer), FsmEffect::None),
        KeepaliveExpired => (fsm_keepalive_expired(peer), FsmEffect::None),
        OpenDelayExpired => (fsm_open_delay_expired(peer), FsmEffect::None),
        IdleHoldExpired => (fsm_idle_hold_expired(peer), FsmEffect::None),
        EorDeferralExpired => fsm_eor_deferral_expired(peer),
        Connected(_, stream) => (fsm_connected(peer, stream), FsmEffect::None),
        ConnectFail(_) => (fsm_conn_fail(peer), FsmEffect::None),
        PassiveOpen(stream) => (fsm_passive_open(peer, stream), FsmEffect::None),
        TcpClose(serial) => (fsm_tcp_close(peer, serial), FsmEffect::None),
        DeleteSession(serial) => (fsm_delete_session(peer, serial), FsmEffect::None),
        SendReady(serial) => (fsm_send_ready(peer, serial), FsmEffect::None),
        BgpOpen(serial, open) => (fsm_bgp_open(peer, serial, *open), FsmEffect::None),
        BgpKeepalive(serial) => (fsm_bgp_keepalive(peer, serial), FsmEffect::None),
        BgpUpdate(serial, update) => fsm_bgp_update(peer, serial, update),
        BgpNotification(_, packet) => (fsm_bgp_notification(peer, packet), FsmEffect::None),
        ParseError(serial, err) => (fsm_parse_error(peer, serial, err), FsmEffect::None),
    }
}

fn fsm_start(peer: &mut Peer) -> State {
    if peer.admin_down || peer.deleted {
        return State::Idle;
    }
    match peer.state {
        State::Idle => {
            if peer.idle_hold_ms == 0 {
                State::Active
            } else {
                if peer.timers.idle_hold.is_none() {
                    peer.timers.idle_hold = Some(timer::start_idle_hold_timer(peer));
                }
                State::Idle
            }
        }
        state => state,
    }
}

fn fsm_stop(peer: &mut Peer, sub_code: u8) -> State {
    if peer.session.is_some() || peer.active_session.is_some() || peer.passive_session.is_some() {
        send_notification(peer, NotifyCode::Cease, sub_code, Vec::new());
    }
    State::Idle
}

fn fsm_idle_hold_expired(peer: &mut Peer) -> State {
    peer.timers.idle_hold = None;
    if peer.state == State::Idle && !peer.admin_down && !peer.deleted {
        State::Active
    } else {
        peer.state
    }
}

fn fsm_connect_retry_expired(peer: &mut Peer) -> State {
    peer.timers.connect_retry = None;
    if peer.state != State::Active {
        return peer.state;
    }
    start_active_connect(peer);
    State::Connect
}

fn start_active_connect(peer: &mut Peer) {
    peer.connect_epoch += 1;
    peer.connect_attempts += 1;
    let epoch = peer.connect_epoch;
    let ident = peer.ident;
    let port = peer.peer_port;
    let tx = peer.tx.clone();
    peer.connect_task = Some(Task::spawn(async move {
        let addr = match ident {
            IpAddr::V4(addr) => format!("{}:{}", addr, port),
            IpAddr::V6(addr) => format!("[{}]:{}", addr, port),
        };
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = tx
                    .send(Message::Event(ident, Event::Connected(epoch, stream)))
                    .await;
            }
            Err(_) => {
                let _ = tx
                    .send(Message::Event(ident, Event::ConnectFail(epoch)))
                    .await;
            }
        }
    }));
}

fn fsm_connected(peer: &mut Peer, stream: TcpStream) -> State {
    peer.connect_task = None;
    let serial = peer.next_serial();
    let session = Session::start(stream, serial, SessionKind::Active, peer.ident, peer.tx.clone());
    peer.active_session = Some(session);
    send_open_on(peer, SessionKind::Active);
    State::OpenSent
}

fn fsm_conn_fail(peer: &mut Peer) -> State {
    peer.error_counters.connect_error += 1;
    peer.connect_task = None;
    State::Active
}

fn fsm_passive_open(peer: &mut Peer, stream: TcpStream) -> State {
    match peer.state {
        State::Idle => {
            // Not ready for a session yet; close with TCP reset semantics.
            drop(stream);
            State::Idle
        }
        State::Active | State::Connect => {
            let serial = peer.next_serial();
            let session =
                Session::start(stream, serial, SessionKind::Passive, peer.ident, peer.tx.clone());
            if let Some(old) = peer.passive_session.replace(session) {
                peer.defer_session_delete(old);
            }
            peer.timers.connect_retry = None;
            peer.timers.open_delay = Some(timer::start_open_delay_timer(peer));
            peer.state
        }
        State::OpenSent => {
            // Keep the session for collision resolution and send our OPEN
            // on it so both sides can converge.
            let serial = peer.next_serial();
            let session =
                Session::start(stream, serial, SessionKind::Passive, peer.ident, peer.tx.clone());
            if let Some(old) = peer.passive_session.replace(session) {
                peer.defer_session_delete(old);
            }
            send_open_on(peer, SessionKind::Passive);
            State::OpenSent
        }
        State::OpenConfirm | State::Established => {
            reject_connection(
                stream,
                NotifyCode::Cease,
                peer::cease(CeaseSubCode::ConnectionRejected),
            );
            peer.state
        }
    }
}

fn fsm_open_delay_expired(peer: &mut Peer) -> State {
    peer.timers.open_delay = None;
    if peer.passive_session.is_none() {
        return peer.state;
    }
    match peer.state {
        State::Active => {
            send_open_on(peer, SessionKind::Passive);
            State::OpenSent
        }
        State::Connect => {
            // Abandon the unestablished active attempt in favor of the
            // passive session.
            peer.connect_task = None;
            peer.connect_epoch += 1;
            send_open_on(peer, SessionKind::Passive);
            State::OpenSent
        }
        state => state,
    }
}

fn fsm_bgp_open(peer: &mut Peer, serial: u64, open: OpenPacket) -> State {
    peer.counters[BgpType::Open as usize].rcvd += 1;

    match peer.state {
        State::Idle => peer.state,
        State::OpenConfirm | State::Established => {
            // A second OPEN on a live session is a state machine error.
            send_notification_on(peer, serial, NotifyCode::FsmError, 0, Vec::new());
            State::Idle
        }
        State::Active | State::Connect => {
            if let OpenCheck::Reject(code, sub_code, data) = open_validate(peer, &open) {
                peer.error_counters.open_error += 1;
                send_notification_on(peer, serial, code, sub_code, data);
                return State::Idle;
            }
            // OPEN arrived on the passive session before the open delay
            // expired: answer it and move to OpenConfirm directly.
            peer.timers.open_delay = None;
            if peer
                .passive_session
                .as_ref()
                .map(|s| !s.open_sent)
                .unwrap_or(false)
            {
                send_open_on(peer, SessionKind::Passive);
            }
            peer.connect_task = None;
            peer.connect_epoch += 1;
            open_negotiate(peer, &open);
            assign_session(peer, SessionKind::Passive);
            State::OpenConfirm
        }
        State::OpenSent => {
            if let OpenCheck::Reject(code, sub_code, data) = open_validate(peer, &open) {
                peer.error_counters.open_error += 1;
                send_notification_on(peer, serial, code, sub_code, data);
                return State::Idle;
            }

            let on_passive = peer
                .passive_session
                .as_ref()
                .map(|s| s.serial == serial)
                .unwrap_or(false);

            if peer.active_session.is_some() && peer.passive_session.is_some() {
                // Connection collision: the side with the higher identifier
                // keeps the connection it initiated.
                let passive_wins = peer.local_identifier < open.identifier();
                if passive_wins {
                    if let Some(active) = peer.active_session.take() {
                        send_collision_close(peer, active);
                    }
                    if on_passive {
                        open_negotiate(peer, &open);
                        assign_session(peer, SessionKind::Passive);
                        return State::OpenConfirm;
                    }
                    // OPEN was on the losing active session; wait for the
                    // remote's OPEN on the surviving passive session.
                    if peer
                        .passive_session
                        .as_ref()
                        .map(|s| !s.open_sent)
                        .unwrap_or(false)
                    {
                        send_open_on(peer, SessionKind::Passive);
                    }
                    return State::OpenSent;
                } else {
                    if let Some(passive) = peer.passive_session.take() {
                        send_collision_close(peer, passive);
                    }
                    if !on_passive {
                        open_negotiate(peer, &open);
                        assign_session(peer, SessionKind::Active);
                        return State::OpenConfirm;
                    }
                    return State::OpenSent;
                }
            }

            open_negotiate(peer, &open);
            let kind = if on_passive {
                SessionKind::Passive
            } else {
                SessionKind::Active
            };
            assign_session(peer, kind);
            State::OpenConfirm
        }
    }
}

/// NOTIFICATION(Cease/ConnectionCollision) on the losing session, then
/// schedule its destruction.
fn send_collision_close(peer: &mut Peer, session: Session) {
    let serial = session.serial;
    // The session is already detached; push it back temporarily so the
    // notification send path can find it by serial.
    peer.defunct.push(session);
    let notification = NotificationPacket::new(
        NotifyCode::Cease,
        peer::cease(CeaseSubCode::ConnectionCollision),
        Vec::new(),
    );
    let bytes: bytes::BytesMut = notification.into();
    if let Some(session) = peer.defunct.iter().find(|s| s.serial == serial)
        && session.send(bytes)
    {
        peer.counters[BgpType::Notification as usize].sent += 1;
    }
    let _ = peer
        .tx
        .try_send(Message::Event(peer.ident, Event::DeleteSession(serial)));
}

fn assign_session(peer: &mut Peer, kind: SessionKind) {
    let session = match kind {
        SessionKind::Active => peer.active_session.take(),
        SessionKind::Passive => peer.passive_session.take(),
    };
    if let Some(session) = session {
        if let Some(old) = peer.session.replace(session) {
            peer.defer_session_delete(old);
        }
    }
    // Whatever remains of the other flavor is no longer wanted.
    if let Some(other) = peer.active_session.take() {
        peer.defer_session_delete(other);
    }
    if let Some(other) = peer.passive_session.take() {
        peer.defer_session_delete(other);
    }
}

fn fsm_bgp_keepalive(peer: &mut Peer, serial: u64) -> State {
    peer.counters[BgpType::Keepalive as usize].rcvd += 1;
    match peer.state {
        State::OpenConfirm => {
            let negotiated = peer
                .session
                .as_ref()
                .map(|s| s.serial == serial)
                .unwrap_or(false);
            if negotiated {
                timer::refresh_hold_timer(peer);
                State::Established
            } else {
                State::OpenConfirm
            }
        }
        State::Established => {
            timer::refresh_hold_timer(peer);
            State::Established
        }
        State::OpenSent => {
            send_notification_on(peer, serial, NotifyCode::FsmError, 1, Vec::new());
            State::Idle
        }
        state => state,
    }
}

fn fsm_bgp_update(peer: &mut Peer, serial: u64, update: Box<UpdatePacket>) -> (State, FsmEffect) {
    peer.counters[BgpType::Update as usize].rcvd += 1;

    if peer.state != State::Established {
        // UPDATE before the session is up is a state machine error.
        send_notification_on(peer, serial, NotifyCode::FsmError, 0, Vec::new());
        return (State::Idle, FsmEffect::None);
    }
    let negotiated = peer
        .session
        .as_ref()
        .map(|s| s.serial == serial)
        .unwrap_or(false);
    if !negotiated {
        return (State::Established, FsmEffect::None);
    }

    timer::refresh_hold_timer(peer);

    let flags = match update_validate(peer, &update) {
        Ok(flags) => flags,
        Err(err) => {
            peer.error_counters.update_error += 1;
            let (code, sub_code, data) = err.to_notify();
            send_notification_on(peer, serial, code, sub_code, data);
            return (State::Idle, FsmEffect::None);
        }
    };

    // End-of-RIB bookkeeping; receipt of the route-target marker releases
    // the deferred VPN table joins.
    let mut effect = FsmEffect::None;
    if update.is_inet_eor() {
        peer.eor_received.insert(Family::Inet);
        return (State::Established, FsmEffect::None);
    }
    if let Some(unreach) = update.mp_unreach.as_ref()
        && unreach.is_eor()
    {
        let family = unreach.family();
        peer.eor_received.insert(family);
        if family == Family::RTarget && !peer.vpn_tables_registered {
            peer.timers.eor_deferral = None;
            effect = FsmEffect::RegisterVpnTables;
        }
        return (State::Established, effect);
    }

    (
        State::Established,
        FsmEffect::RouteUpdate(update, flags),
    )
}

fn fsm_bgp_notification(peer: &mut Peer, packet: NotificationPacket) -> State {
    note_notification_in(peer, &packet);
    State::Idle
}

fn fsm_parse_error(peer: &mut Peer, serial: u64, err: WireError) -> State {
    match err {
        WireError::ConnectionNotSync
        | WireError::BadMessageLength(_)
        | WireError::BadMessageType(_) => {
            peer.error_counters.open_error += 1;
        }
        WireError::UnsupportedVersion(_)
        | WireError::UnacceptableHoldTime(_)
        | WireError::UnsupportedOptionalParameter(_)
        | WireError::BadBgpIdentifier => {
            peer.error_counters.open_error += 1;
        }
        _ => {
            peer.error_counters.update_error += 1;
        }
    }
    let (code, sub_code, data) = err.to_notify();
    tracing::warn!(
        "bgp peer {}: parse error in {}: {}",
        peer.ident,
        err.type_name(),
        err
    );
    send_notification_on(peer, serial, code, sub_code, data);
    State::Idle
}

fn fsm_holdtimer_expired(peer: &mut Peer) -> State {
    peer.error_counters.hold_timer_expired += 1;
    send_notification(peer, NotifyCode::HoldTimerExpired, 0, Vec::new());
    State::Idle
}

fn fsm_keepalive_expired(peer: &mut Peer) -> State {
    if peer.state == State::OpenConfirm || peer.state == State::Established {
        send_keepalive(peer);
    }
    peer.state
}

fn fsm_tcp_close(peer: &mut Peer, serial: u64) -> State {
    let negotiated = peer
        .session
        .as_ref()
        .map(|s| s.serial == serial)
        .unwrap_or(false);
    if negotiated {
        return State::Idle;
    }

    if peer
        .active_session
        .as_ref()
        .map(|s| s.serial == serial)
        .unwrap_or(false)
    {
        if let Some(session) = peer.active_session.take() {
            peer.defer_session_delete(session);
        }
        return match peer.state {
            State::OpenSent if peer.passive_session.is_some() => State::OpenSent,
            State::Idle => State::Idle,
            _ => State::Active,
        };
    }

    if peer
        .passive_session
        .as_ref()
        .map(|s| s.serial == serial)
        .unwrap_or(false)
    {
        if let Some(session) = peer.passive_session.take() {
            peer.defer_session_delete(session);
        }
        return match peer.state {
            State::Connect => State::Connect,
            State::OpenSent if peer.active_session.is_some() => State::OpenSent,
            State::Idle => State::Idle,
            _ => State::Active,
        };
    }

    peer.state
}

/// The deferred destruction point: the transport is freed only when this
/// event reaches the head of the peer's queue, so earlier events that
/// reference the serial have already drained.
fn fsm_delete_session(peer: &mut Peer, serial: u64) -> State {
    peer.defunct.retain(|s| s.serial != serial);
    peer.state
}

fn fsm_send_ready(peer: &mut Peer, _serial: u64) -> State {
    if peer.state == State::Established
        && peer.timers.keepalive.is_none()
        && peer.keepalive_time > 0
    {
        peer.timers.keepalive = Some(timer::start_keepalive_timer(peer));
    }
    peer.state
}

fn fsm_eor_deferral_expired(peer: &mut Peer) -> (State, FsmEffect) {
    peer.timers.eor_deferral = None;
    if peer.state == State::Established && !peer.vpn_tables_registered {
        (peer.state, FsmEffect::RegisterVpnTables)
    } else {
        (peer.state, FsmEffect::None)
    }
}

/// Arm and cancel timers for the state just entered.
pub fn update_timers(peer: &mut Peer) {
    use State::*;
    match peer.state {
        Idle => {
            peer.timers.cancel_all();
            peer.close_all_sessions();
            if !peer.admin_down && !peer.deleted {
                if peer.idle_hold_ms == 0 {
                    let _ = peer
                        .tx
                        .try_send(Message::Event(peer.ident, Event::Start));
                } else {
                    peer.timers.idle_hold = Some(timer::start_idle_hold_timer(peer));
                }
            }
        }
        Active => {
            peer.timers.idle_hold = None;
            peer.timers.hold = None;
            peer.timers.keepalive = None;
            peer.timers.open_delay = None;
            if peer.passive_session.is_none() && peer.timers.connect_retry.is_none() {
                peer.timers.connect_retry = Some(timer::start_connect_retry_timer(peer));
            }
        }
        Connect => {
            peer.timers.idle_hold = None;
            peer.timers.connect_retry = None;
            peer.timers.hold = None;
            peer.timers.keepalive = None;
        }
        OpenSent => {
            peer.timers.idle_hold = None;
            peer.timers.connect_retry = None;
            peer.timers.open_delay = None;
            peer.timers.keepalive = None;
            // The remote may be slow to answer; run the long fixed hold.
            peer.timers.hold = Some(timer::start_open_sent_hold_timer(peer));
        }
        OpenConfirm => {
            peer.timers.connect_retry = None;
            peer.timers.open_delay = None;
            peer.timers.hold = if peer.hold_time > 0 {
                Some(timer::start_hold_timer(peer))
            } else {
                None
            };
            peer.timers.keepalive = if peer.keepalive_time > 0 {
                Some(timer::start_keepalive_timer(peer))
            } else {
                None
            };
        }
        Established => {
            peer.timers.idle_hold = None;
            peer.timers.connect_retry = None;
            peer.timers.open_delay = None;
            if peer.timers.hold.is_none() && peer.hold_time > 0 {
                peer.timers.hold = Some(timer::start_hold_timer(peer));
            }
            if peer.timers.keepalive.is_none() && peer.keepalive_time > 0 {
                peer.timers.keepalive = Some(timer::start_keepalive_timer(peer));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_keeps_passive_on_smaller_local_id() {
        // S3: the side with the numerically smaller identifier keeps the
        // passive session.
        let local: std::net::Ipv4Addr = "192.168.0.10".parse().unwrap();
        let remote: std::net::Ipv4Addr = "192.168.0.11".parse().unwrap();
        assert!(local < remote);
        // Decision mirrored from fsm_bgp_open.
        let passive_wins = local < remote;
        assert!(passive_wins);
        let passive_wins = remote < local;
        assert!(!passive_wins);
    }

    #[test]
    fn state_names() {
        assert_eq!(State::Idle.to_str(), "Idle");
        assert_eq!(State::Established.to_str(), "Established");
        assert!(State::Established.is_established());
        assert!(!State::OpenConfirm.is_established());
    }
}

#[cfg(test)]
mod io_tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use super::*;
    use crate::bgp::config::{ConfigEvent, ConfigOp, NeighborConfig};

    fn neighbor(address: &str) -> NeighborConfig {
        NeighborConfig {
            name: "test-peer".to_string(),
            uuid: "uuid-test".to_string(),
            peer_address: address.parse().unwrap(),
            peer_port: crate::bgp::BGP_PORT,
            peer_as: 64512,
            local_as: 64512,
            local_identifier: "192.168.0.10".parse().unwrap(),
            families: vec![bgp_wire::Family::Inet],
            hold_time: None,
            admin_down: false,
            vendor: String::new(),
            instance: "master".to_string(),
        }
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn connected_sends_open_and_enters_open_sent() {
        let mut bgp = Bgp::new(1);
        let ident: IpAddr = "127.0.0.1".parse().unwrap();
        bgp.process_config_event(ConfigEvent::Neighbor(ConfigOp::Add, neighbor("127.0.0.1")));
        {
            let peer = bgp.peers.get_mut(&ident).unwrap();
            peer.state = State::Connect;
            peer.connect_epoch = 7;
        }

        let (local, mut remote) = socket_pair().await;
        fsm(&mut bgp, ident, Event::Connected(7, local));

        let peer = bgp.peers.get(&ident).unwrap();
        assert_eq!(peer.state, State::OpenSent);
        assert_eq!(peer.counters[bgp_wire::BgpType::Open as usize].sent, 1);
        assert!(peer.active_session.is_some());
        assert!(peer.timers.hold.is_some());

        // The remote end receives a well-formed OPEN.
        let mut buf = vec![0u8; 4096];
        let n = timeout(Duration::from_secs(2), remote.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n >= 29);
        assert!(buf[..16].iter().all(|b| *b == 0xff));
        assert_eq!(buf[18], 1);
    }

    #[tokio::test]
    async fn stale_connected_event_is_discarded() {
        let mut bgp = Bgp::new(1);
        let ident: IpAddr = "127.0.0.1".parse().unwrap();
        bgp.process_config_event(ConfigEvent::Neighbor(ConfigOp::Add, neighbor("127.0.0.1")));
        {
            let peer = bgp.peers.get_mut(&ident).unwrap();
            peer.state = State::Connect;
            peer.connect_epoch = 8;
        }

        let (local, _remote) = socket_pair().await;
        // Epoch 7 raced with a cancel; the validator drops it.
        fsm(&mut bgp, ident, Event::Connected(7, local));
        let peer = bgp.peers.get(&ident).unwrap();
        assert_eq!(peer.state, State::Connect);
        assert!(peer.active_session.is_none());
    }

    #[tokio::test]
    async fn passive_open_in_active_arms_open_delay() {
        let mut bgp = Bgp::new(1);
        let ident: IpAddr = "127.0.0.1".parse().unwrap();
        bgp.process_config_event(ConfigEvent::Neighbor(ConfigOp::Add, neighbor("127.0.0.1")));
        {
            let peer = bgp.peers.get_mut(&ident).unwrap();
            peer.state = State::Active;
        }

        let (local, _remote) = socket_pair().await;
        fsm(&mut bgp, ident, Event::PassiveOpen(local));

        let peer = bgp.peers.get(&ident).unwrap();
        assert_eq!(peer.state, State::Active);
        assert!(peer.passive_session.is_some());
        assert!(peer.timers.open_delay.is_some());
        assert!(peer.timers.connect_retry.is_none());
    }

    #[tokio::test]
    async fn passive_open_in_established_is_rejected() {
        let mut bgp = Bgp::new(1);
        let ident: IpAddr = "127.0.0.1".parse().unwrap();
        bgp.process_config_event(ConfigEvent::Neighbor(ConfigOp::Add, neighbor("127.0.0.1")));
        {
            let peer = bgp.peers.get_mut(&ident).unwrap();
            peer.state = State::Established;
        }

        let (local, mut remote) = socket_pair().await;
        fsm(&mut bgp, ident, Event::PassiveOpen(local));

        let peer = bgp.peers.get(&ident).unwrap();
        assert_eq!(peer.state, State::Established);
        assert!(peer.passive_session.is_none());

        // The intruding connection gets Cease/ConnectionRejected.
        let mut buf = vec![0u8; 64];
        let n = timeout(Duration::from_secs(2), remote.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n >= 21);
        assert_eq!(buf[18], 3);
        assert_eq!(buf[19], 6);
        assert_eq!(buf[20], 5);
    }

    #[tokio::test]
    async fn hold_timer_expiry_notifies_and_goes_idle() {
        let mut bgp = Bgp::new(1);
        let ident: IpAddr = "127.0.0.1".parse().unwrap();
        bgp.process_config_event(ConfigEvent::Neighbor(ConfigOp::Add, neighbor("127.0.0.1")));

        let (local, mut remote) = socket_pair().await;
        {
            let peer = bgp.peers.get_mut(&ident).unwrap();
            peer.state = State::Established;
            let serial = peer.next_serial();
            let session = crate::bgp::session::Session::start(
                local,
                serial,
                SessionKind::Active,
                ident,
                peer.tx.clone(),
            );
            peer.session = Some(session);
            peer.timers.hold = Some(timer::start_hold_timer(peer));
        }

        fsm(&mut bgp, ident, Event::HoldTimerExpired);

        let peer = bgp.peers.get(&ident).unwrap();
        assert_eq!(peer.state, State::Idle);
        assert_eq!(peer.flap_count, 1);
        assert_eq!(peer.error_counters.hold_timer_expired, 1);

        // NOTIFICATION(HoldTimerExpired) went out before the close.
        let mut buf = vec![0u8; 64];
        let n = timeout(Duration::from_secs(2), remote.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n >= 21);
        assert_eq!(buf[18], 3);
        assert_eq!(buf[19], 4);
    }
}
