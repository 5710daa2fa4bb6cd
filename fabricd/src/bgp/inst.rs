use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Sender};

use bgp_wire::{
    AttrSet, CeaseSubCode, Family, Label, LocalPref, MpReachAttr, MpUnreachAttr, NotifyCode,
    UpdatePacket, Vpnv4Nlri,
};

use crate::context::Task;

use super::attr_store::BgpAttrStore;
use super::condition::ConditionListener;
use super::config::{ConfigChannel, ConfigEvent};
use super::fsm::{Event, fsm};
use super::instance::{MASTER_INSTANCE, RoutingInstance};
use super::lifetime::LifetimeManager;
use super::membership::{MembershipEvent, MembershipManager};
use super::peer::{self, cease, send_update};
use super::route::{Path, PathFlags, PathSource, PeerKey};
use super::table::{DbRequest, RouteChange, RouteKey, Table, TableId};

#[derive(Debug)]
pub enum ShowRequest {
    Neighbors(Sender<String>),
    Tables(Sender<String>),
}

pub enum Message {
    Event(IpAddr, Event),
    Accept(TcpStream, SocketAddr),
    Config(ConfigEvent),
    Membership(MembershipEvent),
    TableRequest(TableId, DbRequest),
    WalkTable(TableId),
    ConditionPurge(TableId),
    RetryDelete,
    Show(ShowRequest),
}

/// The speaker. One event loop drains the message queue, which yields the
/// serialization guarantees the subsystems rely on: events for one peer
/// run in enqueue order, table mutations never interleave, and config
/// operations serialize against everything else.
pub struct Bgp {
    pub asn: u32,
    pub local_asn: u32,
    pub router_id: Ipv4Addr,
    pub hold_time: u16,
    pub admin_down: bool,
    pub shutdown: bool,
    pub port: u16,
    pub partition_count: usize,

    pub peers: BTreeMap<IpAddr, Peer>,
    pub instances: BTreeMap<String, RoutingInstance>,
    pub attr_store: BgpAttrStore,
    pub membership: MembershipManager,
    pub condition: ConditionListener,
    pub lifetime: LifetimeManager,

    pub tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    pub cm: ConfigChannel,

    listen_task: Option<Task<()>>,
    pub listen_err: Option<anyhow::Error>,
    peer_index_gen: usize,
}

pub use super::peer::Peer;

impl Bgp {
    pub fn new(partition_count: usize) -> Self {
        let (tx, rx) = mpsc::channel(8192);
        let mut instances = BTreeMap::new();
        instances.insert(
            MASTER_INSTANCE.to_string(),
            RoutingInstance::master(partition_count),
        );
        Self {
            asn: 0,
            local_asn: 0,
            router_id: Ipv4Addr::UNSPECIFIED,
            hold_time: 0,
            admin_down: false,
            shutdown: false,
            port: super::BGP_PORT,
            partition_count,
            peers: BTreeMap::new(),
            instances,
            attr_store: BgpAttrStore::new(),
            membership: MembershipManager::new(),
            condition: ConditionListener::new(),
            lifetime: LifetimeManager::new(),
            tx,
            rx,
            cm: ConfigChannel::new(),
            listen_task: None,
            listen_err: None,
            peer_index_gen: 0,
        }
    }

    pub fn post_event(&self, ident: IpAddr, event: Event) {
        let _ = self.tx.try_send(Message::Event(ident, event));
    }

    pub fn next_peer_index(&mut self) -> usize {
        self.peer_index_gen += 1;
        self.peer_index_gen
    }

    pub fn table(&self, id: &TableId) -> Option<&Table> {
        self.instances.get(&id.instance)?.table(id.family)
    }

    pub fn table_mut(&mut self, id: &TableId) -> Option<&mut Table> {
        self.instances.get_mut(&id.instance)?.table_mut(id.family)
    }

    /// Run a closure with the table detached from the instance, so table
    /// callbacks (listeners, walkers) may borrow the rest of the server.
    fn with_table<R>(
        &mut self,
        id: &TableId,
        f: impl FnOnce(&mut Bgp, &mut Table) -> R,
    ) -> Option<R> {
        let mut table = self
            .instances
            .get_mut(&id.instance)?
            .tables
            .remove(&id.family)?;
        let result = f(self, &mut table);
        if let Some(instance) = self.instances.get_mut(&id.instance) {
            instance.tables.insert(id.family, table);
        }
        Some(result)
    }

    /// Queue a table mutation for the next loop iteration. This is the
    /// entry point for callbacks running under a table's own context
    /// (listeners, walkers, match actions), where the table is detached
    /// and a synchronous request would be lost.
    pub fn enqueue_table_request(&self, id: &TableId, req: DbRequest) {
        let _ = self.tx.try_send(Message::TableRequest(id.clone(), req));
    }

    /// Apply a table mutation now, under the table's serialization, and
    /// fan resulting best-path changes out to the joined peers.
    pub fn table_request(&mut self, id: &TableId, req: DbRequest) {
        let change = self.with_table(id, |bgp, table| table.process_request(bgp, req));
        if let Some(Some(change)) = change {
            self.apply_route_change(id, &change);
        }
        self.retry_delete_if_pending(id);
    }

    pub fn run_table_walk(&mut self, id: &TableId) {
        let changes = self.with_table(id, |bgp, table| table.run_walk(bgp));
        if let Some(changes) = changes {
            for change in changes {
                self.apply_route_change(id, &change);
            }
        }
        self.retry_delete_if_pending(id);
    }

    fn retry_delete_if_pending(&mut self, id: &TableId) {
        if self
            .table(id)
            .map(|table| table.deleted && table.may_delete())
            .unwrap_or(false)
        {
            self.retry_delete();
        }
    }

    // ---- inbound UPDATE processing ----

    /// Turn a validated UPDATE into per-family table requests. Withdrawn
    /// prefixes are processed exactly once each.
    pub fn route_update_from_peer(
        &mut self,
        ident: IpAddr,
        update: UpdatePacket,
        flags: PathFlags,
    ) {
        let Some(peer) = self.peers.get(&ident) else {
            return;
        };
        let path_peer = peer.path_peer();
        let peer_key = path_peer.key.clone();
        let instance = peer.instance.clone();

        let attrs = update.attrs.clone().map(|attrs| self.attr_store.locate(attrs));

        // IPv4 unicast withdrawals.
        let inet_table = TableId::new(&instance, Family::Inet);
        for withdraw in update.withdraws.iter() {
            self.table_request(
                &inet_table,
                DbRequest::RemovePath {
                    key: RouteKey::Inet(withdraw.prefix),
                    peer: Some(peer_key.clone()),
                    path_id: 0,
                    source: PathSource::Bgp,
                },
            );
        }

        // IPv4 unicast reachability.
        if !update.nlri.is_empty()
            && let Some(attrs) = attrs.clone()
        {
            for nlri in update.nlri.iter() {
                let mut path = Path::new(Some(path_peer.clone()), PathSource::Bgp, attrs.clone());
                path.flags = flags;
                self.table_request(
                    &inet_table,
                    DbRequest::AddPath {
                        key: RouteKey::Inet(nlri.prefix),
                        path,
                    },
                );
            }
        }

        // Multiprotocol reachability.
        if let Some(reach) = update.mp_reach.as_ref()
            && let Some(attrs) = attrs.clone()
        {
            self.mp_reach_from_peer(&instance, &path_peer, flags, attrs, reach);
        }

        // Multiprotocol withdrawals.
        if let Some(unreach) = update.mp_unreach.as_ref() {
            let table = TableId::new(&instance, unreach.family());
            let keys: Vec<RouteKey> = match unreach {
                MpUnreachAttr::Vpnv4(withdraws) => withdraws
                    .iter()
                    .map(|w| RouteKey::InetVpn(w.rd, w.prefix))
                    .collect(),
                MpUnreachAttr::Evpn(withdraws) => {
                    withdraws.iter().cloned().map(RouteKey::Evpn).collect()
                }
                MpUnreachAttr::ErmVpn(withdraws) => {
                    withdraws.iter().cloned().map(RouteKey::ErmVpn).collect()
                }
                MpUnreachAttr::RTarget(withdraws) => {
                    withdraws.iter().copied().map(RouteKey::RTarget).collect()
                }
            };
            for key in keys {
                self.table_request(
                    &table,
                    DbRequest::RemovePath {
                        key,
                        peer: Some(peer_key.clone()),
                        path_id: 0,
                        source: PathSource::Bgp,
                    },
                );
            }
        }
    }

    fn mp_reach_from_peer(
        &mut self,
        instance: &str,
        path_peer: &super::route::PathPeer,
        flags: PathFlags,
        attrs: Arc<AttrSet>,
        reach: &MpReachAttr,
    ) {
        let table = TableId::new(instance, reach.family());
        match reach {
            MpReachAttr::Vpnv4 { nexthop, routes } => {
                let attrs = self.attr_store.replace_nexthop_and_locate(&attrs, *nexthop);
                // VPN paths without a tunnel encapsulation community are
                // unusable for forwarding.
                let mut flags = flags;
                if !attrs.ecom.as_ref().map(|e| e.has_tunnel_encap()).unwrap_or(false) {
                    flags |= PathFlags::NO_TUNNEL_ENCAP;
                }
                for route in routes.iter() {
                    let mut path =
                        Path::new(Some(path_peer.clone()), PathSource::Bgp, attrs.clone());
                    path.flags = flags;
                    path.label = route.label.label;
                    self.table_request(
                        &table,
                        DbRequest::AddPath {
                            key: RouteKey::InetVpn(route.rd, route.prefix),
                            path,
                        },
                    );
                }
            }
            MpReachAttr::Evpn { nexthop, routes } => {
                let attrs = match nexthop {
                    IpAddr::V4(addr) => self.attr_store.replace_nexthop_and_locate(&attrs, *addr),
                    IpAddr::V6(_) => attrs,
                };
                for route in routes.iter() {
                    let mut path =
                        Path::new(Some(path_peer.clone()), PathSource::Bgp, attrs.clone());
                    path.flags = flags;
                    self.table_request(
                        &table,
                        DbRequest::AddPath {
                            key: RouteKey::Evpn(route.clone()),
                            path,
                        },
                    );
                }
            }
            MpReachAttr::ErmVpn { nexthop, routes } => {
                let attrs = self.attr_store.replace_nexthop_and_locate(&attrs, *nexthop);
                for route in routes.iter() {
                    let mut path =
                        Path::new(Some(path_peer.clone()), PathSource::Bgp, attrs.clone());
                    path.flags = flags;
                    self.table_request(
                        &table,
                        DbRequest::AddPath {
                            key: RouteKey::ErmVpn(route.clone()),
                            path,
                        },
                    );
                }
            }
            MpReachAttr::RTarget { nexthop, routes } => {
                let attrs = self.attr_store.replace_nexthop_and_locate(&attrs, *nexthop);
                for route in routes.iter() {
                    let mut path =
                        Path::new(Some(path_peer.clone()), PathSource::Bgp, attrs.clone());
                    path.flags = flags;
                    self.table_request(
                        &table,
                        DbRequest::AddPath {
                            key: RouteKey::RTarget(*route),
                            path,
                        },
                    );
                }
            }
        }
    }

    // ---- outbound advertisement ----

    /// Fan a best-path change out to every peer joined to the table,
    /// except the path's own source.
    pub fn apply_route_change(&mut self, id: &TableId, change: &RouteChange) {
        let members = self.membership.members_of(id);
        let source_key = change
            .new_best
            .as_ref()
            .or(change.old_best.as_ref())
            .and_then(|path| path.peer.as_ref())
            .map(|peer| peer.key.clone());
        for member in members {
            if let Some(source) = source_key.as_ref()
                && self
                    .peers
                    .get(&member)
                    .map(|p| &p.key == source)
                    .unwrap_or(false)
            {
                continue;
            }
            match change.new_best.as_ref() {
                Some(best) => self.advertise_path(member, id, &change.key, Some(best)),
                None => {
                    let withdraw_label = change.old_best.as_ref().map(|p| p.label).unwrap_or(0);
                    self.withdraw_path(member, id, &change.key, withdraw_label);
                }
            }
        }
    }

    /// Export policy applied towards one peer: IBGP keeps attributes and
    /// defaults local-pref; EBGP prepends the local AS and drops it.
    fn export_attrs(&mut self, ident: IpAddr, attrs: &Arc<AttrSet>) -> Option<Arc<AttrSet>> {
        let peer = self.peers.get(&ident)?;
        let mut export = (**attrs).clone();
        if peer.is_ebgp() {
            let aspath = export.aspath.take().unwrap_or_default();
            export.aspath = Some(aspath.prepend(peer.local_as as u16));
            export.local_pref = None;
        } else if export.local_pref.is_none() {
            export.local_pref = Some(LocalPref::default());
        }
        Some(self.attr_store.locate(export))
    }

    pub fn advertise_path(
        &mut self,
        ident: IpAddr,
        id: &TableId,
        key: &RouteKey,
        best: Option<&Path>,
    ) {
        let Some(best) = best else {
            return;
        };
        if !self
            .peers
            .get(&ident)
            .map(|p| p.state.is_established())
            .unwrap_or(false)
        {
            return;
        }
        // Split horizon: never reflect a path back at its source.
        if let Some(source) = best.peer.as_ref()
            && self
                .peers
                .get(&ident)
                .map(|p| p.key == source.key)
                .unwrap_or(false)
        {
            return;
        }
        let Some(attrs) = self.export_attrs(ident, &best.attrs) else {
            return;
        };

        let mut update = UpdatePacket::new();
        match key {
            RouteKey::Inet(prefix) => {
                update.attrs = Some((*attrs).clone());
                update.nlri = vec![bgp_wire::Ipv4Nlri::new(*prefix)];
            }
            RouteKey::InetVpn(rd, prefix) => {
                let nexthop = attrs
                    .nexthop
                    .as_ref()
                    .map(|n| n.nexthop)
                    .unwrap_or(Ipv4Addr::UNSPECIFIED);
                let mut mp_attrs = (*attrs).clone();
                mp_attrs.nexthop = None;
                update.attrs = Some(mp_attrs);
                update.mp_reach = Some(MpReachAttr::Vpnv4 {
                    nexthop,
                    routes: vec![Vpnv4Nlri {
                        label: Label::new(best.label),
                        rd: *rd,
                        prefix: *prefix,
                    }],
                });
            }
            RouteKey::Evpn(nlri) => {
                let nexthop = attrs
                    .nexthop
                    .as_ref()
                    .map(|n| n.nexthop)
                    .unwrap_or(Ipv4Addr::UNSPECIFIED);
                let mut mp_attrs = (*attrs).clone();
                mp_attrs.nexthop = None;
                update.attrs = Some(mp_attrs);
                update.mp_reach = Some(MpReachAttr::Evpn {
                    nexthop: IpAddr::V4(nexthop),
                    routes: vec![nlri.clone()],
                });
            }
            RouteKey::ErmVpn(nlri) => {
                let nexthop = attrs
                    .nexthop
                    .as_ref()
                    .map(|n| n.nexthop)
                    .unwrap_or(Ipv4Addr::UNSPECIFIED);
                let mut mp_attrs = (*attrs).clone();
                mp_attrs.nexthop = None;
                update.attrs = Some(mp_attrs);
                update.mp_reach = Some(MpReachAttr::ErmVpn {
                    nexthop,
                    routes: vec![nlri.clone()],
                });
            }
            RouteKey::RTarget(nlri) => {
                let nexthop = attrs
                    .nexthop
                    .as_ref()
                    .map(|n| n.nexthop)
                    .unwrap_or(self.router_id);
                let mut mp_attrs = (*attrs).clone();
                mp_attrs.nexthop = None;
                update.attrs = Some(mp_attrs);
                update.mp_reach = Some(MpReachAttr::RTarget {
                    nexthop,
                    routes: vec![*nlri],
                });
            }
        }
        tracing::debug!("advertise {} {} to {}", id, key, ident);
        if let Some(peer) = self.peers.get_mut(&ident) {
            send_update(peer, update);
        }
    }

    pub fn withdraw_path(&mut self, ident: IpAddr, id: &TableId, key: &RouteKey, label: u32) {
        if !self
            .peers
            .get(&ident)
            .map(|p| p.state.is_established())
            .unwrap_or(false)
        {
            return;
        }
        let mut update = UpdatePacket::new();
        match key {
            RouteKey::Inet(prefix) => {
                update.withdraws = vec![bgp_wire::Ipv4Nlri::new(*prefix)];
            }
            RouteKey::InetVpn(rd, prefix) => {
                update.mp_unreach = Some(MpUnreachAttr::Vpnv4(vec![Vpnv4Nlri {
                    label: Label::new(label),
                    rd: *rd,
                    prefix: *prefix,
                }]));
            }
            RouteKey::Evpn(nlri) => {
                update.mp_unreach = Some(MpUnreachAttr::Evpn(vec![nlri.clone()]));
            }
            RouteKey::ErmVpn(nlri) => {
                update.mp_unreach = Some(MpUnreachAttr::ErmVpn(vec![nlri.clone()]));
            }
            RouteKey::RTarget(nlri) => {
                update.mp_unreach = Some(MpUnreachAttr::RTarget(vec![*nlri]));
            }
        }
        tracing::debug!("withdraw {} {} from {}", id, key, ident);
        if let Some(peer) = self.peers.get_mut(&ident) {
            send_update(peer, update);
        }
    }

    /// Signal the end of the initial RIB transfer for every family the
    /// peer has joined, once all membership walks have completed.
    pub fn send_eor_for_joined(&mut self, ident: IpAddr) {
        let Some(peer) = self.peers.get(&ident) else {
            return;
        };
        let instance = peer.instance.clone();
        let families = peer.negotiated_families.clone();
        for family in families {
            let table = TableId::new(&instance, family);
            if !self.membership.is_member(ident, &table) {
                continue;
            }
            let Some(peer) = self.peers.get_mut(&ident) else {
                return;
            };
            if peer.eor_sent.contains(&family) {
                continue;
            }
            let mut update = UpdatePacket::new();
            if family != Family::Inet {
                update.mp_unreach = MpUnreachAttr::eor(family);
            }
            peer.eor_sent.insert(family);
            send_update(peer, update);
        }
    }

    // ---- transport accept ----

    /// Inbound accept policy: only configured, admin-up, live peers get a
    /// session; everything else is rejected with a specific Cease.
    pub fn accept(&mut self, stream: TcpStream, sockaddr: SocketAddr) {
        let ident = sockaddr.ip();
        if self.shutdown {
            peer::reject_connection(
                stream,
                NotifyCode::Cease,
                cease(CeaseSubCode::ConnectionRejected),
            );
            return;
        }
        match self.peers.get(&ident) {
            None => {
                // No configured neighbor at that address.
                drop(stream);
            }
            Some(peer) if peer.deleted => {
                peer::reject_connection(
                    stream,
                    NotifyCode::Cease,
                    cease(CeaseSubCode::PeerDeconfigured),
                );
            }
            Some(peer) if peer.admin_down => {
                peer::reject_connection(
                    stream,
                    NotifyCode::Cease,
                    cease(CeaseSubCode::AdministrativeShutdown),
                );
            }
            Some(_) => {
                self.post_event(ident, Event::PassiveOpen(stream));
            }
        }
    }

    pub async fn listen(&mut self) -> anyhow::Result<()> {
        let tx = self.tx.clone();
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        tracing::info!("bgp listening on 0.0.0.0:{}", self.port);
        self.listen_task = Some(Task::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, sockaddr)) => {
                        if tx.send(Message::Accept(socket, sockaddr)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!("bgp accept error: {}", err);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        }));
        Ok(())
    }

    pub fn process_msg(&mut self, msg: Message) {
        match msg {
            Message::Event(ident, event) => {
                fsm(self, ident, event);
            }
            Message::Accept(socket, sockaddr) => {
                self.accept(socket, sockaddr);
            }
            Message::Config(event) => {
                self.process_config_event(event);
            }
            Message::Membership(event) => {
                self.process_membership_event(event);
            }
            Message::TableRequest(id, req) => {
                self.table_request(&id, req);
            }
            Message::WalkTable(id) => {
                self.run_table_walk(&id);
            }
            Message::ConditionPurge(id) => {
                self.condition_purge(&id);
            }
            Message::RetryDelete => {
                self.process_retry_delete();
            }
            Message::Show(request) => match request {
                ShowRequest::Neighbors(tx) => {
                    let out = self.show_neighbors();
                    let _ = tx.try_send(out);
                }
                ShowRequest::Tables(tx) => {
                    let out = self.show_tables();
                    let _ = tx.try_send(out);
                }
            },
        }
    }

    pub async fn event_loop(&mut self) {
        if let Err(err) = self.listen().await {
            tracing::error!("bgp listen failed: {}", err);
            self.listen_err = Some(err);
        }
        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.process_msg(msg),
                        None => break,
                    }
                }
                msg = self.cm.rx.recv() => {
                    if let Some(event) = msg {
                        self.process_msg(Message::Config(event));
                    }
                }
            }
        }
    }
}

pub fn serve(mut bgp: Bgp) {
    tokio::spawn(async move {
        bgp.event_loop().await;
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bgp::config::{ConfigEvent, ConfigOp, NeighborConfig};
    use crate::bgp::fsm::State;
    use bgp_wire::{AsPath, AsSegment, Ipv4Nlri, NexthopAttr, Origin, AS_SEQUENCE};

    pub(crate) fn neighbor_config(address: &str, peer_as: u32) -> NeighborConfig {
        NeighborConfig {
            name: format!("peer-{}", address),
            uuid: format!("uuid-{}", address),
            peer_address: address.parse().unwrap(),
            peer_port: super::super::BGP_PORT,
            peer_as,
            local_as: 64512,
            local_identifier: "192.168.0.10".parse().unwrap(),
            families: vec![Family::Inet, Family::InetVpn, Family::RTarget],
            hold_time: None,
            admin_down: false,
            vendor: "contrail".to_string(),
            instance: "master".to_string(),
        }
    }

    fn bgp_with_peer(address: &str) -> Bgp {
        let mut bgp = Bgp::new(2);
        bgp.asn = 64512;
        bgp.local_asn = 64512;
        bgp.router_id = "192.168.0.10".parse().unwrap();
        bgp.process_config_event(ConfigEvent::Neighbor(
            ConfigOp::Add,
            neighbor_config(address, 64512),
        ));
        bgp
    }

    fn update_with_routes(prefixes: &[&str]) -> UpdatePacket {
        let mut attrs = AttrSet::default();
        attrs.origin = Some(Origin::Igp);
        attrs.aspath = Some(AsPath::new());
        attrs.nexthop = Some(NexthopAttr::new("127.0.0.127".parse().unwrap()));
        attrs.local_pref = Some(LocalPref::new(100));
        let mut update = UpdatePacket::new();
        update.attrs = Some(attrs);
        update.nlri = prefixes
            .iter()
            .map(|p| Ipv4Nlri::new(p.parse().unwrap()))
            .collect();
        update
    }

    fn withdraw_of(prefixes: &[&str]) -> UpdatePacket {
        let mut update = UpdatePacket::new();
        update.withdraws = prefixes
            .iter()
            .map(|p| Ipv4Nlri::new(p.parse().unwrap()))
            .collect();
        update
    }

    #[test]
    fn update_advertise_then_withdraw() {
        let ident: IpAddr = "10.0.0.1".parse().unwrap();
        let mut bgp = bgp_with_peer("10.0.0.1");
        let table = TableId::new("master", Family::Inet);

        let update = update_with_routes(&[
            "192.168.1.0/24",
            "192.168.2.0/24",
            "192.168.3.0/24",
        ]);
        bgp.route_update_from_peer(ident, update, PathFlags::empty());
        assert_eq!(bgp.table(&table).unwrap().route_count(), 3);

        // One withdrawn prefix removes exactly that route.
        bgp.route_update_from_peer(ident, withdraw_of(&["192.168.1.0/24"]), PathFlags::empty());
        assert_eq!(bgp.table(&table).unwrap().route_count(), 2);

        bgp.route_update_from_peer(
            ident,
            withdraw_of(&["192.168.2.0/24", "192.168.3.0/24"]),
            PathFlags::empty(),
        );
        assert_eq!(bgp.table(&table).unwrap().route_count(), 0);
    }

    #[test]
    fn vpn_routes_land_in_vpn_table() {
        let ident: IpAddr = "10.0.0.1".parse().unwrap();
        let mut bgp = bgp_with_peer("10.0.0.1");
        let table = TableId::new("master", Family::InetVpn);

        let mut update = update_with_routes(&[]);
        update.mp_reach = Some(MpReachAttr::Vpnv4 {
            nexthop: "10.0.0.1".parse().unwrap(),
            routes: vec![Vpnv4Nlri {
                label: Label::new(1000),
                rd: bgp_wire::RouteDistinguisher::from_as(64512, 1),
                prefix: "10.1.1.0/24".parse().unwrap(),
            }],
        });
        bgp.route_update_from_peer(ident, update, PathFlags::empty());

        let table_ref = bgp.table(&table).unwrap();
        assert_eq!(table_ref.route_count(), 1);
        let key = RouteKey::InetVpn(
            bgp_wire::RouteDistinguisher::from_as(64512, 1),
            "10.1.1.0/24".parse().unwrap(),
        );
        let route = table_ref.find(&key).unwrap();
        let best = route.best().unwrap();
        assert_eq!(best.label, 1000);
        // No tunnel encapsulation community was attached.
        assert!(best.flags.contains(PathFlags::NO_TUNNEL_ENCAP));
        assert_eq!(
            best.attrs.nexthop.as_ref().map(|n| n.nexthop),
            Some("10.0.0.1".parse().unwrap())
        );
    }

    #[test]
    fn export_prepends_as_for_ebgp() {
        let ident: IpAddr = "10.0.0.2".parse().unwrap();
        let mut bgp = Bgp::new(1);
        bgp.local_asn = 64512;
        bgp.process_config_event(ConfigEvent::Neighbor(
            ConfigOp::Add,
            NeighborConfig {
                peer_as: 64999,
                ..neighbor_config("10.0.0.2", 64999)
            },
        ));

        let mut attrs = AttrSet::default();
        attrs.origin = Some(Origin::Igp);
        let mut seg = AsSegment::new(AS_SEQUENCE);
        seg.asn = vec![64700];
        let mut aspath = AsPath::new();
        aspath.segs.push(seg);
        attrs.aspath = Some(aspath);
        attrs.local_pref = Some(LocalPref::new(100));
        let interned = bgp.attr_store.locate(attrs);

        let exported = bgp.export_attrs(ident, &interned).unwrap();
        let aspath = exported.aspath.as_ref().unwrap();
        assert_eq!(aspath.neighbor_as(), Some(64512));
        assert_eq!(aspath.length(), 2);
        assert!(exported.local_pref.is_none());
    }

    #[test]
    fn export_defaults_local_pref_for_ibgp() {
        let ident: IpAddr = "10.0.0.1".parse().unwrap();
        let mut bgp = bgp_with_peer("10.0.0.1");

        let mut attrs = AttrSet::default();
        attrs.origin = Some(Origin::Igp);
        attrs.aspath = Some(AsPath::new());
        let interned = bgp.attr_store.locate(attrs);

        let exported = bgp.export_attrs(ident, &interned).unwrap();
        assert_eq!(exported.local_pref_value(), 100);
    }

    #[test]
    fn peer_starts_idle_after_config_add() {
        let bgp = bgp_with_peer("10.0.0.1");
        let peer = bgp.peers.get(&"10.0.0.1".parse::<IpAddr>().unwrap()).unwrap();
        assert_eq!(peer.state, State::Idle);
        assert_eq!(peer.peer_as, 64512);
        assert!(peer.is_control_node());
        assert!(peer.config.families.contains(&Family::RTarget));
    }
}
