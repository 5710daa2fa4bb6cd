use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bgp_wire::{ErmVpnNlri, EvpnNlri, Family, RTargetNlri, RouteDistinguisher};
use ipnet::Ipv4Net;

use super::inst::Bgp;
use super::route::{ListenerId, Path, PathSource, PeerKey, Route};

/// A table is addressed by its owning routing instance and family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId {
    pub instance: String,
    pub family: Family,
}

impl TableId {
    pub fn new(instance: &str, family: Family) -> Self {
        Self {
            instance: instance.to_string(),
            family,
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance, self.family)
    }
}

/// Union prefix key across the supported address families.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteKey {
    Inet(Ipv4Net),
    InetVpn(RouteDistinguisher, Ipv4Net),
    ErmVpn(ErmVpnNlri),
    Evpn(EvpnNlri),
    RTarget(RTargetNlri),
}

impl RouteKey {
    pub fn family(&self) -> Family {
        match self {
            RouteKey::Inet(_) => Family::Inet,
            RouteKey::InetVpn(_, _) => Family::InetVpn,
            RouteKey::ErmVpn(_) => Family::ErmVpn,
            RouteKey::Evpn(_) => Family::Evpn,
            RouteKey::RTarget(_) => Family::RTarget,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Inet(prefix) => write!(f, "{}", prefix),
            RouteKey::InetVpn(rd, prefix) => write!(f, "[{}]:{}", rd, prefix),
            RouteKey::ErmVpn(nlri) => write!(f, "{}", nlri),
            RouteKey::Evpn(nlri) => write!(f, "{}", nlri),
            RouteKey::RTarget(nlri) => write!(f, "{}", nlri),
        }
    }
}

/// Mutation requests accepted by a table.
pub enum DbRequest {
    AddPath {
        key: RouteKey,
        path: Path,
    },
    RemovePath {
        key: RouteKey,
        peer: Option<PeerKey>,
        path_id: u32,
        source: PathSource,
    },
    Notify {
        key: RouteKey,
    },
}

/// Best-path delta produced by a request or a walk; the server loop turns
/// these into advertisements towards joined peers.
pub struct RouteChange {
    pub key: RouteKey,
    pub old_best: Option<Path>,
    pub new_best: Option<Path>,
}

fn same_best(a: &Option<Path>, b: &Option<Path>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            Arc::ptr_eq(&a.attrs, &b.attrs)
                && a.same_origin(b.peer.as_ref().map(|p| &p.key), b.path_id, b.source)
                && a.label == b.label
                && a.flags == b.flags
        }
        _ => false,
    }
}

/// Listeners are invoked synchronously under the table's serialization for
/// every route notification.
pub trait TableListener: Send {
    fn notify(&mut self, bgp: &mut Bgp, table: &TableId, key: &RouteKey, route: &mut Route);
}

pub type WalkerId = usize;
pub type WalkFn = Box<dyn FnMut(&mut Bgp, &TableId, &RouteKey, &mut Route) + Send>;
pub type WalkDoneFn = Box<dyn FnOnce(&mut Bgp, &TableId) + Send>;

struct Walker {
    entry_fn: WalkFn,
    done_fn: Option<WalkDoneFn>,
}

#[derive(Default)]
pub struct Partition {
    pub entries: BTreeMap<RouteKey, Route>,
}

/// Per-family prefix table, partitioned by a stable hash of the key.
/// All mutation flows through `process_request`; walks visit every route
/// once and run at most one at a time per table.
pub struct Table {
    pub id: TableId,
    pub ecmp: bool,
    pub deleted: bool,
    partitions: Vec<Partition>,
    listeners: BTreeMap<ListenerId, Box<dyn TableListener>>,
    next_listener_id: ListenerId,
    walkers: BTreeMap<WalkerId, Walker>,
    next_walker_id: WalkerId,
    pending_walks: BTreeSet<WalkerId>,
    walk_posted: bool,
}

impl Table {
    pub fn new(id: TableId, partition_count: usize) -> Self {
        let mut partitions = Vec::with_capacity(partition_count.max(1));
        partitions.resize_with(partition_count.max(1), Partition::default);
        Self {
            id,
            ecmp: false,
            deleted: false,
            partitions,
            listeners: BTreeMap::new(),
            next_listener_id: 0,
            walkers: BTreeMap::new(),
            next_walker_id: 0,
            pending_walks: BTreeSet::new(),
            walk_posted: false,
        }
    }

    fn partition_of(&self, key: &RouteKey) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions.len()
    }

    pub fn find(&self, key: &RouteKey) -> Option<&Route> {
        self.partitions[self.partition_of(key)].entries.get(key)
    }

    pub fn find_mut(&mut self, key: &RouteKey) -> Option<&mut Route> {
        let index = self.partition_of(key);
        self.partitions[index].entries.get_mut(key)
    }

    pub fn route_count(&self) -> usize {
        self.partitions.iter().map(|p| p.entries.len()).sum()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn keys(&self) -> Vec<RouteKey> {
        self.partitions
            .iter()
            .flat_map(|p| p.entries.keys().cloned())
            .collect()
    }

    /// Apply one request under the partition's serialization, invoke the
    /// listeners, and report the best-path delta.
    pub fn process_request(&mut self, bgp: &mut Bgp, req: DbRequest) -> Option<RouteChange> {
        let index = match &req {
            DbRequest::AddPath { key, .. } => self.partition_of(key),
            DbRequest::RemovePath { key, .. } => self.partition_of(key),
            DbRequest::Notify { key } => self.partition_of(key),
        };
        let ecmp = self.ecmp;
        let id = self.id.clone();
        let Table {
            partitions,
            listeners,
            ..
        } = self;
        let partition = &mut partitions[index];

        let request_key = match &req {
            DbRequest::AddPath { key, .. } => key.clone(),
            DbRequest::RemovePath { key, .. } => key.clone(),
            DbRequest::Notify { key } => key.clone(),
        };
        let old_best = partition
            .entries
            .get(&request_key)
            .and_then(|route| route.best())
            .cloned();

        let key = match req {
            DbRequest::AddPath { key, path } => {
                let route = partition.entries.entry(key.clone()).or_default();
                route.insert_path(path, ecmp);
                key
            }
            DbRequest::RemovePath {
                key,
                peer,
                path_id,
                source,
            } => {
                let Some(route) = partition.entries.get_mut(&key) else {
                    return None;
                };
                if !route.remove_path(peer.as_ref(), path_id, source) {
                    return None;
                }
                key
            }
            DbRequest::Notify { key } => {
                if !partition.entries.contains_key(&key) {
                    return None;
                }
                key
            }
        };

        let Some(route) = partition.entries.get_mut(&key) else {
            return None;
        };
        for (_, listener) in listeners.iter_mut() {
            listener.notify(bgp, &id, &key, route);
        }

        let new_best = route.best().cloned();
        if route.is_deletable() {
            partition.entries.remove(&key);
        }

        if same_best(&old_best, &new_best) {
            return None;
        }
        Some(RouteChange {
            key,
            old_best,
            new_best,
        })
    }

    pub fn register(&mut self, listener: Box<dyn TableListener>) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.insert(id, listener);
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn allocate_walker(&mut self, entry_fn: WalkFn, done_fn: WalkDoneFn) -> WalkerId {
        let id = self.next_walker_id;
        self.next_walker_id += 1;
        self.walkers.insert(
            id,
            Walker {
                entry_fn,
                done_fn: Some(done_fn),
            },
        );
        id
    }

    /// Request a walk for an allocated walker. Returns true when the caller
    /// should post a walk message; concurrent requests coalesce into the
    /// already posted walk.
    pub fn walk_table(&mut self, walker_id: WalkerId) -> bool {
        if !self.walkers.contains_key(&walker_id) {
            return false;
        }
        self.pending_walks.insert(walker_id);
        if self.walk_posted {
            return false;
        }
        self.walk_posted = true;
        true
    }

    pub fn release_walker(&mut self, walker_id: WalkerId) {
        self.walkers.remove(&walker_id);
        self.pending_walks.remove(&walker_id);
    }

    pub fn walker_count(&self) -> usize {
        self.walkers.len()
    }

    /// Run one table walk serving every pending request. Each route is
    /// visited once per pending walker; done callbacks fire afterwards.
    pub fn run_walk(&mut self, bgp: &mut Bgp) -> Vec<RouteChange> {
        self.walk_posted = false;
        let pending: Vec<WalkerId> = std::mem::take(&mut self.pending_walks)
            .into_iter()
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }

        let id = self.id.clone();
        let mut changes = Vec::new();
        let Table {
            partitions,
            walkers,
            listeners,
            ..
        } = self;

        for partition in partitions.iter_mut() {
            let keys: Vec<RouteKey> = partition.entries.keys().cloned().collect();
            for key in keys {
                let Some(route) = partition.entries.get_mut(&key) else {
                    continue;
                };
                let old_best = route.best().cloned();
                for walker_id in pending.iter() {
                    if let Some(walker) = walkers.get_mut(walker_id) {
                        (walker.entry_fn)(bgp, &id, &key, route);
                    }
                }
                let new_best = route.best().cloned();
                let changed = !same_best(&old_best, &new_best);
                if changed {
                    for (_, listener) in listeners.iter_mut() {
                        listener.notify(bgp, &id, &key, route);
                    }
                }
                let deletable = route.is_deletable();
                if deletable {
                    partition.entries.remove(&key);
                }
                if changed {
                    changes.push(RouteChange {
                        key,
                        old_best,
                        new_best,
                    });
                }
            }
        }

        // Walkers are one-shot: run the completion callback and release.
        for walker_id in pending.iter() {
            if let Some(mut walker) = walkers.remove(walker_id)
                && let Some(done_fn) = walker.done_fn.take()
            {
                done_fn(bgp, &id);
            }
        }

        changes
    }

    /// A table can be destroyed only when nothing references it anymore.
    pub fn may_delete(&self) -> bool {
        self.route_count() == 0 && self.listeners.is_empty() && self.walkers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::bgp::inst::Bgp;
    use crate::bgp::route::{PathPeer, PeerType};
    use bgp_wire::{AttrSet, LocalPref, Origin};

    fn test_table() -> Table {
        Table::new(TableId::new("master", Family::Inet), 4)
    }

    fn test_bgp() -> Bgp {
        Bgp::new(1)
    }

    fn peer(addr: &str, pref_uuid: &str) -> PathPeer {
        PathPeer {
            key: PeerKey::new(addr.parse().unwrap(), pref_uuid),
            bgp_id: addr.parse().unwrap(),
            peer_type: PeerType::IBgp,
            is_xmpp: false,
            is_ready: true,
        }
    }

    fn path_with_pref(peer: PathPeer, pref: u32) -> Path {
        let mut attrs = AttrSet::new();
        attrs.origin = Some(Origin::Igp);
        attrs.local_pref = Some(LocalPref::new(pref));
        Path::new(Some(peer), PathSource::Bgp, Arc::new(attrs))
    }

    fn inet_key(prefix: &str) -> RouteKey {
        RouteKey::Inet(prefix.parse().unwrap())
    }

    #[test]
    fn add_then_remove_path() {
        let mut bgp = test_bgp();
        let mut table = test_table();
        let key = inet_key("192.168.1.0/24");

        let change = table.process_request(
            &mut bgp,
            DbRequest::AddPath {
                key: key.clone(),
                path: path_with_pref(peer("10.0.0.1", "u1"), 100),
            },
        );
        assert!(change.is_some());
        assert_eq!(table.route_count(), 1);
        assert!(table.find(&key).is_some());

        let change = table.process_request(
            &mut bgp,
            DbRequest::RemovePath {
                key: key.clone(),
                peer: Some(PeerKey::new("10.0.0.1".parse().unwrap(), "u1")),
                path_id: 0,
                source: PathSource::Bgp,
            },
        );
        let change = change.expect("withdraw must report a change");
        assert!(change.new_best.is_none());
        assert_eq!(table.route_count(), 0);
    }

    #[test]
    fn best_path_change_is_reported_once() {
        let mut bgp = test_bgp();
        let mut table = test_table();
        let key = inet_key("192.168.1.0/24");

        table.process_request(
            &mut bgp,
            DbRequest::AddPath {
                key: key.clone(),
                path: path_with_pref(peer("10.0.0.1", "u1"), 100),
            },
        );
        // A better path becomes best.
        let change = table.process_request(
            &mut bgp,
            DbRequest::AddPath {
                key: key.clone(),
                path: path_with_pref(peer("10.0.0.2", "u2"), 200),
            },
        );
        let change = change.expect("new best must be reported");
        assert_eq!(
            change.new_best.unwrap().attrs.local_pref_value(),
            200
        );
        // Re-adding the identical losing path leaves the best unchanged.
        let change = table.process_request(
            &mut bgp,
            DbRequest::AddPath {
                key: key.clone(),
                path: path_with_pref(peer("10.0.0.1", "u1"), 100),
            },
        );
        assert!(change.is_none());
    }

    #[test]
    fn listener_sees_every_notification() {
        struct Recorder(Arc<Mutex<Vec<RouteKey>>>);
        impl TableListener for Recorder {
            fn notify(&mut self, _bgp: &mut Bgp, _table: &TableId, key: &RouteKey, _route: &mut Route) {
                self.0.lock().unwrap().push(key.clone());
            }
        }

        let mut bgp = test_bgp();
        let mut table = test_table();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = table.register(Box::new(Recorder(seen.clone())));

        for prefix in ["192.168.1.0/24", "192.168.2.0/24"] {
            table.process_request(
                &mut bgp,
                DbRequest::AddPath {
                    key: inet_key(prefix),
                    path: path_with_pref(peer("10.0.0.1", "u1"), 100),
                },
            );
        }
        assert_eq!(seen.lock().unwrap().len(), 2);

        table.unregister(id);
        table.process_request(
            &mut bgp,
            DbRequest::AddPath {
                key: inet_key("192.168.3.0/24"),
                path: path_with_pref(peer("10.0.0.1", "u1"), 100),
            },
        );
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn concurrent_walk_requests_coalesce() {
        let mut bgp = test_bgp();
        let mut table = test_table();
        for prefix in ["192.168.1.0/24", "192.168.2.0/24", "192.168.3.0/24"] {
            table.process_request(
                &mut bgp,
                DbRequest::AddPath {
                    key: inet_key(prefix),
                    path: path_with_pref(peer("10.0.0.1", "u1"), 100),
                },
            );
        }

        let visited = Arc::new(Mutex::new(0usize));
        let done = Arc::new(Mutex::new(0usize));
        let mut walker_ids = Vec::new();
        for _ in 0..2 {
            let visited = visited.clone();
            let done = done.clone();
            let walker_id = table.allocate_walker(
                Box::new(move |_bgp, _table, _key, _route| {
                    *visited.lock().unwrap() += 1;
                }),
                Box::new(move |_bgp, _table| {
                    *done.lock().unwrap() += 1;
                }),
            );
            walker_ids.push(walker_id);
        }

        // First request schedules the walk; the second coalesces.
        assert!(table.walk_table(walker_ids[0]));
        assert!(!table.walk_table(walker_ids[1]));

        table.run_walk(&mut bgp);
        // Each of the two walkers visited each of the three routes once and
        // produced exactly one completion.
        assert_eq!(*visited.lock().unwrap(), 6);
        assert_eq!(*done.lock().unwrap(), 2);
        assert_eq!(table.walker_count(), 0);

        // A drained table runs no further walk.
        let changes = table.run_walk(&mut bgp);
        assert!(changes.is_empty());
    }

    #[test]
    fn walk_reports_mutations() {
        let mut bgp = test_bgp();
        let mut table = test_table();
        let key = inet_key("192.168.1.0/24");
        let peer_key = PeerKey::new("10.0.0.1".parse().unwrap(), "u1");
        table.process_request(
            &mut bgp,
            DbRequest::AddPath {
                key: key.clone(),
                path: path_with_pref(peer("10.0.0.1", "u1"), 100),
            },
        );

        let target = peer_key.clone();
        let walker_id = table.allocate_walker(
            Box::new(move |_bgp, _table, _key, route: &mut Route| {
                route.remove_paths_from(&target);
            }),
            Box::new(|_bgp, _table| {}),
        );
        table.walk_table(walker_id);
        let changes = table.run_walk(&mut bgp);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].new_best.is_none());
        assert_eq!(table.route_count(), 0);
        assert!(table.may_delete());
    }

    #[test]
    fn partition_of_is_stable() {
        let table = test_table();
        let key = inet_key("192.168.1.0/24");
        let first = table.partition_of(&key);
        for _ in 0..8 {
            assert_eq!(table.partition_of(&key), first);
        }
    }
}
