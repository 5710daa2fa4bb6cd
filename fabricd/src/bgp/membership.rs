use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use bgp_wire::Family;

use super::inst::{Bgp, Message};
use super::route::Route;
use super::table::{RouteKey, TableId};

/// Join or leave one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    Join,
    Leave,
}

#[derive(Debug, Clone)]
pub struct MembershipRequest {
    pub peer: IpAddr,
    pub action: MembershipAction,
}

#[derive(Debug)]
pub enum MembershipEvent {
    RegisterRib { peer: IpAddr, table: TableId },
    UnregisterRib { peer: IpAddr, table: TableId },
    UnregisterPeer { peer: IpAddr },
}

/// Tracks which peers are joined to which tables and serializes the
/// join/leave walks so one peer never sees overlapping add/remove.
/// Requests that arrive while a walk is already queued batch into it: the
/// walk visits every route once and applies the action for all batched
/// peers, which matters when a restart brings many peers up at once.
#[derive(Default)]
pub struct MembershipManager {
    members: BTreeMap<TableId, BTreeSet<IpAddr>>,
    pending: BTreeMap<TableId, Vec<MembershipRequest>>,
}

impl MembershipManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_member(&self, peer: IpAddr, table: &TableId) -> bool {
        self.members
            .get(table)
            .map(|set| set.contains(&peer))
            .unwrap_or(false)
    }

    pub fn members_of(&self, table: &TableId) -> Vec<IpAddr> {
        self.members
            .get(table)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn tables_of(&self, peer: IpAddr) -> Vec<TableId> {
        self.members
            .iter()
            .filter(|(_, set)| set.contains(&peer))
            .map(|(table, _)| table.clone())
            .collect()
    }

    pub fn pending_batch(&self, table: &TableId) -> Vec<MembershipRequest> {
        self.pending.get(table).cloned().unwrap_or_default()
    }

    fn take_batch(&mut self, table: &TableId) -> Vec<MembershipRequest> {
        self.pending.remove(table).unwrap_or_default()
    }

    fn push_request(&mut self, table: &TableId, request: MembershipRequest) -> bool {
        let list = self.pending.entry(table.clone()).or_default();
        let first = list.is_empty();
        list.push(request);
        first
    }
}

impl Bgp {
    pub fn process_membership_event(&mut self, event: MembershipEvent) {
        match event {
            MembershipEvent::RegisterRib { peer, table } => {
                self.membership_request(peer, &table, MembershipAction::Join);
            }
            MembershipEvent::UnregisterRib { peer, table } => {
                self.membership_request(peer, &table, MembershipAction::Leave);
            }
            MembershipEvent::UnregisterPeer { peer } => {
                for table in self.membership.tables_of(peer) {
                    self.membership_request(peer, &table, MembershipAction::Leave);
                }
            }
        }
    }

    /// Queue a join or leave for the peer and schedule the table walk that
    /// realizes it. The peer's pending count gates its own progress (for
    /// example End-of-RIB transmission).
    pub fn membership_request(&mut self, peer: IpAddr, table_id: &TableId, action: MembershipAction) {
        if self.table_mut(table_id).is_none() {
            return;
        }
        if let Some(peer) = self.peers.get_mut(&peer) {
            peer.membership_req_pending += 1;
        }
        let first = self
            .membership
            .push_request(table_id, MembershipRequest { peer, action });
        if first {
            self.membership_walk(table_id);
        }
    }

    fn membership_walk(&mut self, table_id: &TableId) {
        let entry_fn = Box::new(
            move |bgp: &mut Bgp, table: &TableId, key: &RouteKey, route: &mut Route| {
                membership_walk_route(bgp, table, key, route);
            },
        );
        let done_fn = Box::new(move |bgp: &mut Bgp, table: &TableId| {
            membership_walk_done(bgp, table);
        });
        let Some(table) = self.table_mut(table_id) else {
            return;
        };
        let walker_id = table.allocate_walker(entry_fn, done_fn);
        if table.walk_table(walker_id) {
            let _ = self.tx.try_send(Message::WalkTable(table_id.clone()));
        }
    }

    /// Register the peer with the tables of every negotiated family. VPN
    /// family joins are deferred until the remote has told us which route
    /// targets it wants, or a timer gives up waiting.
    pub fn register_all_tables(&mut self, ident: IpAddr) {
        let Some(peer) = self.peers.get_mut(&ident) else {
            return;
        };
        let instance = peer.instance.clone();
        let negotiated = peer.negotiated_families.clone();
        peer.eor_sent.clear();
        peer.eor_received.clear();
        peer.vpn_tables_registered = false;

        if negotiated.contains(&Family::Inet) {
            let table = TableId::new(&instance, Family::Inet);
            self.membership_request(ident, &table, MembershipAction::Join);
        }

        if negotiated.contains(&Family::RTarget) {
            let table = TableId::new(&instance, Family::RTarget);
            self.membership_request(ident, &table, MembershipAction::Join);
            if let Some(peer) = self.peers.get_mut(&ident) {
                peer.timers.eor_deferral = Some(super::timer::start_eor_deferral_timer(peer));
            }
        } else {
            self.register_vpn_tables(ident);
        }
    }

    /// Join the VPN-flavored tables; runs after the route-target exchange
    /// has settled (End-of-RIB received or deferral expired).
    pub fn register_vpn_tables(&mut self, ident: IpAddr) {
        let Some(peer) = self.peers.get_mut(&ident) else {
            return;
        };
        if peer.vpn_tables_registered || !peer.state.is_established() {
            return;
        }
        peer.vpn_tables_registered = true;
        let instance = peer.instance.clone();
        let negotiated = peer.negotiated_families.clone();
        for family in [Family::InetVpn, Family::ErmVpn, Family::Evpn] {
            if negotiated.contains(&family) {
                let table = TableId::new(&instance, family);
                self.membership_request(ident, &table, MembershipAction::Join);
            }
        }
    }

    /// Teardown on leaving Established: withdraw the peer from every table
    /// of its instance. Received paths may exist in tables the peer never
    /// joined (VPN routes are accepted ahead of the deferred join), so the
    /// leave walks sweep all of them, not just the memberships.
    pub fn peer_down(&mut self, ident: IpAddr) {
        let Some(peer) = self.peers.get(&ident) else {
            return;
        };
        let instance = peer.instance.clone();
        let mut tables: Vec<TableId> = self
            .instances
            .get(&instance)
            .map(|inst| inst.tables.values().map(|t| t.id.clone()).collect())
            .unwrap_or_default();
        for table in self.membership.tables_of(ident) {
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
        for table in tables {
            self.membership_request(ident, &table, MembershipAction::Leave);
        }
        self.retry_delete();
    }
}

fn membership_walk_route(bgp: &mut Bgp, table: &TableId, key: &RouteKey, route: &mut Route) {
    let batch = bgp.membership.pending_batch(table);
    for request in batch {
        match request.action {
            MembershipAction::Join => {
                // Initial advertisement of the existing best path.
                let Some(best) = route.best().cloned() else {
                    continue;
                };
                bgp.advertise_path(request.peer, table, key, Some(&best));
            }
            MembershipAction::Leave => {
                let Some(peer_key) = bgp.peers.get(&request.peer).map(|p| p.key.clone()) else {
                    continue;
                };
                route.remove_paths_from(&peer_key);
            }
        }
    }
}

fn membership_walk_done(bgp: &mut Bgp, table: &TableId) {
    let batch = bgp.membership.take_batch(table);
    for request in batch {
        match request.action {
            MembershipAction::Join => {
                bgp.membership
                    .members
                    .entry(table.clone())
                    .or_default()
                    .insert(request.peer);
            }
            MembershipAction::Leave => {
                if let Some(set) = bgp.membership.members.get_mut(table) {
                    set.remove(&request.peer);
                    if set.is_empty() {
                        bgp.membership.members.remove(table);
                    }
                }
            }
        }
        let mut send_eor = false;
        let mut retry = false;
        if let Some(peer) = bgp.peers.get_mut(&request.peer) {
            peer.membership_req_pending = peer.membership_req_pending.saturating_sub(1);
            if peer.membership_req_pending == 0 {
                if request.action == MembershipAction::Join && peer.state.is_established() {
                    send_eor = true;
                } else {
                    retry = true;
                }
            }
        }
        if send_eor {
            bgp.send_eor_for_joined(request.peer);
        } else if retry {
            bgp.retry_delete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_batch_until_walk_runs() {
        let mut mgr = MembershipManager::new();
        let table = TableId::new("master", Family::Inet);
        let first = mgr.push_request(
            &table,
            MembershipRequest {
                peer: "10.0.0.1".parse().unwrap(),
                action: MembershipAction::Join,
            },
        );
        assert!(first);
        let first = mgr.push_request(
            &table,
            MembershipRequest {
                peer: "10.0.0.2".parse().unwrap(),
                action: MembershipAction::Join,
            },
        );
        // The second request joins the batch already scheduled.
        assert!(!first);
        assert_eq!(mgr.pending_batch(&table).len(), 2);
        assert_eq!(mgr.take_batch(&table).len(), 2);
        assert!(mgr.pending_batch(&table).is_empty());
    }

    #[test]
    fn join_batch_walks_once_and_registers_members() {
        use crate::bgp::inst::Bgp;
        use crate::bgp::route::{Path, PathPeer, PathSource, PeerKey, PeerType};
        use crate::bgp::table::{DbRequest, RouteKey};
        use bgp_wire::AttrSet;
        use std::sync::Arc;

        let mut bgp = Bgp::new(1);
        for addr in ["10.0.0.1", "10.0.0.2"] {
            bgp.process_config_event(crate::bgp::config::ConfigEvent::Neighbor(
                crate::bgp::config::ConfigOp::Add,
                crate::bgp::inst::tests::neighbor_config(addr, 64512),
            ));
        }
        let table = TableId::new("master", Family::Inet);
        let source = PathPeer {
            key: PeerKey::new("10.0.0.9".parse().unwrap(), "u9"),
            bgp_id: "192.168.0.9".parse().unwrap(),
            peer_type: PeerType::IBgp,
            is_xmpp: false,
            is_ready: true,
        };
        bgp.table_request(
            &table,
            DbRequest::AddPath {
                key: RouteKey::Inet("192.168.1.0/24".parse().unwrap()),
                path: Path::new(Some(source), PathSource::Bgp, Arc::new(AttrSet::new())),
            },
        );

        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();
        bgp.membership_request(first, &table, MembershipAction::Join);
        bgp.membership_request(second, &table, MembershipAction::Join);
        assert_eq!(bgp.peers.get(&first).unwrap().membership_req_pending, 1);
        assert_eq!(bgp.membership.pending_batch(&table).len(), 2);

        // One walk serves the whole batch.
        bgp.run_table_walk(&table);
        assert!(bgp.membership.is_member(first, &table));
        assert!(bgp.membership.is_member(second, &table));
        assert_eq!(bgp.peers.get(&first).unwrap().membership_req_pending, 0);
        assert_eq!(bgp.peers.get(&second).unwrap().membership_req_pending, 0);

        // Leaving cleans the membership back out.
        bgp.process_membership_event(MembershipEvent::UnregisterPeer { peer: first });
        bgp.run_table_walk(&table);
        assert!(!bgp.membership.is_member(first, &table));
        assert!(bgp.membership.is_member(second, &table));
    }

    #[test]
    fn member_bookkeeping() {
        let mut mgr = MembershipManager::new();
        let table = TableId::new("master", Family::Inet);
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        mgr.members.entry(table.clone()).or_default().insert(peer);
        assert!(mgr.is_member(peer, &table));
        assert_eq!(mgr.members_of(&table), vec![peer]);
        assert_eq!(mgr.tables_of(peer), vec![table]);
    }
}
