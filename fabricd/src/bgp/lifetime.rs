use std::collections::BTreeSet;
use std::net::IpAddr;

use super::inst::{Bgp, Message};
use super::table::TableId;

/// Entities subject to two-phase deletion. Variant order is destruction
/// order: leaves (peers, tables) before their owning instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeleteRef {
    Peer(IpAddr),
    Table(TableId),
    Instance(String),
}

/// Tracks entities whose delete has been requested and re-evaluates them
/// when a dependent's state changes. Destruction happens only when the
/// entity's own may_delete predicate holds.
#[derive(Default)]
pub struct LifetimeManager {
    pending: BTreeSet<DeleteRef>,
}

impl LifetimeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, actor: DeleteRef) -> bool {
        self.pending.insert(actor)
    }

    pub fn is_pending(&self, actor: &DeleteRef) -> bool {
        self.pending.contains(actor)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn snapshot(&self) -> Vec<DeleteRef> {
        self.pending.iter().cloned().collect()
    }

    fn resolved(&mut self, actor: &DeleteRef) {
        self.pending.remove(actor);
    }
}

impl Bgp {
    /// Request deletion of an entity. Shutdown (stopping new work) is the
    /// caller's responsibility; this schedules the destroy evaluation.
    pub fn delete_request(&mut self, actor: DeleteRef) {
        if self.lifetime.request(actor) {
            self.retry_delete();
        }
    }

    /// Edge-trigger a re-evaluation of all pending deletes.
    pub fn retry_delete(&mut self) {
        let _ = self.tx.try_send(Message::RetryDelete);
    }

    /// Evaluate every requested delete, destroying in dependency order
    /// until no further progress is possible.
    pub fn process_retry_delete(&mut self) {
        loop {
            let mut progressed = false;
            for actor in self.lifetime.snapshot() {
                if self.actor_may_delete(&actor) {
                    self.destroy(&actor);
                    self.lifetime.resolved(&actor);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn actor_may_delete(&self, actor: &DeleteRef) -> bool {
        match actor {
            DeleteRef::Peer(ident) => match self.peers.get(ident) {
                Some(peer) => peer.may_delete(),
                None => true,
            },
            DeleteRef::Table(id) => {
                match self
                    .instances
                    .get(&id.instance)
                    .and_then(|instance| instance.table(id.family))
                {
                    Some(table) => table.deleted && table.may_delete(),
                    None => true,
                }
            }
            DeleteRef::Instance(name) => match self.instances.get(name) {
                Some(instance) => {
                    let peers_gone = !self.peers.values().any(|p| &p.instance == name);
                    instance.deleted && instance.may_delete() && peers_gone
                }
                None => true,
            },
        }
    }

    fn destroy(&mut self, actor: &DeleteRef) {
        match actor {
            DeleteRef::Peer(ident) => {
                if let Some(peer) = self.peers.remove(ident) {
                    tracing::info!("bgp peer {} destroyed", peer.ident);
                }
            }
            DeleteRef::Table(id) => {
                if let Some(instance) = self.instances.get_mut(&id.instance) {
                    instance.tables.remove(&id.family);
                    tracing::info!("bgp table {} destroyed", id);
                }
            }
            DeleteRef::Instance(name) => {
                if self.instances.remove(name).is_some() {
                    tracing::info!("routing instance {} destroyed", name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgp::config::{ConfigEvent, ConfigOp, InstanceConfig};
    use crate::bgp::route::{Path, PathPeer, PathSource, PeerKey, PeerType};
    use crate::bgp::table::{DbRequest, RouteKey};
    use bgp_wire::{AttrSet, Family};
    use std::sync::Arc;

    fn blue_instance() -> InstanceConfig {
        InstanceConfig {
            name: "blue".to_string(),
            virtual_network: Some("blue-vn".to_string()),
            vn_index: 1,
            import_targets: vec!["target:64512:1".to_string()],
            export_targets: vec!["target:64512:1".to_string()],
        }
    }

    fn test_path() -> Path {
        let peer = PathPeer {
            key: PeerKey::new("10.0.0.1".parse().unwrap(), "u1"),
            bgp_id: "192.168.0.1".parse().unwrap(),
            peer_type: PeerType::IBgp,
            is_xmpp: false,
            is_ready: true,
        };
        Path::new(Some(peer), PathSource::Bgp, Arc::new(AttrSet::new()))
    }

    #[test]
    fn deleted_peer_is_destroyed_when_clean() {
        let mut bgp = Bgp::new(1);
        let ident: std::net::IpAddr = "10.0.0.1".parse().unwrap();
        bgp.process_config_event(ConfigEvent::Neighbor(
            ConfigOp::Add,
            crate::bgp::inst::tests::neighbor_config("10.0.0.1", 64512),
        ));
        {
            let peer = bgp.peers.get_mut(&ident).unwrap();
            peer.deleted = true;
            assert!(peer.may_delete());
        }
        bgp.delete_request(DeleteRef::Peer(ident));
        bgp.process_retry_delete();
        assert!(bgp.peers.is_empty());
        assert_eq!(bgp.lifetime.pending_count(), 0);
    }

    #[test]
    fn table_destruction_waits_for_routes() {
        let mut bgp = Bgp::new(1);
        bgp.process_config_event(ConfigEvent::Instance(ConfigOp::Add, blue_instance()));
        let table_id = TableId::new("blue", Family::Inet);
        let key = RouteKey::Inet("192.168.1.0/24".parse().unwrap());
        bgp.table_request(
            &table_id,
            DbRequest::AddPath {
                key: key.clone(),
                path: test_path(),
            },
        );

        // Deleting the instance marks everything but cannot destroy a
        // table that still holds a route.
        bgp.process_config_event(ConfigEvent::Instance(ConfigOp::Delete, blue_instance()));
        bgp.process_retry_delete();
        assert!(bgp.instances.contains_key("blue"));
        assert!(bgp.table(&table_id).is_some());

        // Draining the table unblocks the cascade: table first, then the
        // instance.
        bgp.table_request(
            &table_id,
            DbRequest::RemovePath {
                key,
                peer: Some(PeerKey::new("10.0.0.1".parse().unwrap(), "u1")),
                path_id: 0,
                source: PathSource::Bgp,
            },
        );
        bgp.process_retry_delete();
        assert!(!bgp.instances.contains_key("blue"));
        assert_eq!(bgp.lifetime.pending_count(), 0);
    }

    #[test]
    fn destruction_order_is_leaves_first() {
        assert!(DeleteRef::Peer("10.0.0.1".parse().unwrap()) < DeleteRef::Instance("a".into()));
        assert!(
            DeleteRef::Table(TableId::new("a", Family::Inet)) < DeleteRef::Instance("a".into())
        );
    }
}
