use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use bgp_wire::AttrSet;
use bitflags::bitflags;
use serde::Serialize;

pub type ListenerId = usize;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PathFlags: u32 {
        const AS_PATH_LOOPED = 1 << 0;
        const NO_NEIGHBOR_AS = 1 << 1;
        const STALE = 1 << 2;
        const NO_TUNNEL_ENCAP = 1 << 3;
    }
}

/// Stable ordering used as a path-selection tie break: BGP first, locally
/// generated kinds last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PathSource {
    Bgp = 0,
    Xmpp = 1,
    StaticRoute = 2,
    ServiceChain = 3,
    Local = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum PeerType {
    EBgp = 0,
    IBgp = 1,
}

/// Durable identity of a configured neighbor: remote endpoint plus the
/// configuration uuid, ordered for the final path-selection tie break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PeerKey {
    pub address: IpAddr,
    pub uuid: String,
}

impl PeerKey {
    pub fn new(address: IpAddr, uuid: &str) -> Self {
        Self {
            address,
            uuid: uuid.to_string(),
        }
    }
}

/// Capability bag snapshot of the peer a path was learned from. Paths hold
/// this instead of a reference into the peer table; a path with no peer is
/// locally generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPeer {
    pub key: PeerKey,
    pub bgp_id: Ipv4Addr,
    pub peer_type: PeerType,
    pub is_xmpp: bool,
    pub is_ready: bool,
}

#[derive(Debug, Clone)]
pub struct Path {
    pub peer: Option<PathPeer>,
    pub path_id: u32,
    pub source: PathSource,
    pub flags: PathFlags,
    pub attrs: Arc<AttrSet>,
    pub label: u32,
}

impl Path {
    pub fn new(peer: Option<PathPeer>, source: PathSource, attrs: Arc<AttrSet>) -> Self {
        Self {
            peer,
            path_id: 0,
            source,
            flags: PathFlags::empty(),
            attrs,
            label: 0,
        }
    }

    /// A path is feasible when its AS path is clean and its peer, if any,
    /// is still usable.
    pub fn is_feasible(&self) -> bool {
        if self
            .flags
            .intersects(PathFlags::AS_PATH_LOOPED | PathFlags::NO_NEIGHBOR_AS)
        {
            return false;
        }
        match &self.peer {
            Some(peer) => peer.is_ready,
            None => true,
        }
    }

    /// Identity of a path inside one route: who produced it and with which
    /// per-peer disambiguator.
    pub fn same_origin(&self, peer: Option<&PeerKey>, path_id: u32, source: PathSource) -> bool {
        self.peer.as_ref().map(|p| &p.key) == peer
            && self.path_id == path_id
            && self.source == source
    }
}

/// Strict total order over candidate paths; `Ordering::Less` means `a` is
/// preferred. Ties survive only when `ecmp` truncates the comparison after
/// local-pref.
pub fn path_compare(a: &Path, b: &Path, ecmp: bool) -> Ordering {
    // 1. Feasible paths precede infeasible ones.
    match (a.is_feasible(), b.is_feasible()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    // 2. Higher local-pref wins.
    let cmp = b
        .attrs
        .local_pref_value()
        .cmp(&a.attrs.local_pref_value());
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 3. Under ECMP everything beyond local-pref is equal cost.
    if ecmp {
        return Ordering::Equal;
    }

    // 4. Shorter AS path wins.
    let cmp = a.attrs.aspath_length().cmp(&b.attrs.aspath_length());
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 5. IGP < EGP < INCOMPLETE.
    let cmp = a.attrs.origin.cmp(&b.attrs.origin);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 6. MED compares only between paths from the same neighbor AS.
    if a.attrs.neighbor_as().is_some() && a.attrs.neighbor_as() == b.attrs.neighbor_as() {
        let cmp = a.attrs.med_value().cmp(&b.attrs.med_value());
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    match (&a.peer, &b.peer) {
        // 7. Locally generated paths precede received ones.
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        // 8/9. Both local: source order, then path id.
        (None, None) => {
            let cmp = a.source.cmp(&b.source);
            if cmp != Ordering::Equal {
                return cmp;
            }
            return a.path_id.cmp(&b.path_id);
        }
        (Some(peer_a), Some(peer_b)) => {
            // 8. Stable source ordering.
            let cmp = a.source.cmp(&b.source);
            if cmp != Ordering::Equal {
                return cmp;
            }

            // 10. Agent paths precede BGP paths.
            let cmp = peer_b.is_xmpp.cmp(&peer_a.is_xmpp);
            if cmp != Ordering::Equal {
                return cmp;
            }

            // 11. Lower path id.
            let cmp = a.path_id.cmp(&b.path_id);
            if cmp != Ordering::Equal {
                return cmp;
            }

            // 12. EBGP precedes IBGP.
            let cmp = peer_a.peer_type.cmp(&peer_b.peer_type);
            if cmp != Ordering::Equal {
                return cmp;
            }

            // 13. Lower BGP identifier.
            let cmp = peer_a.bgp_id.cmp(&peer_b.bgp_id);
            if cmp != Ordering::Equal {
                return cmp;
            }

            // 14. Lower peer key.
            peer_a.key.cmp(&peer_b.key)
        }
    }
}

/// Opaque per-listener state attached to a route, keyed by listener id.
pub trait DbState: Any + Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send> DbState for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One prefix: the sorted list of candidate paths (best at the front) plus
/// per-listener state slots.
#[derive(Default)]
pub struct Route {
    paths: Vec<Path>,
    state: BTreeMap<ListenerId, Box<dyn DbState>>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<&Path> {
        self.paths.first()
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// Insert or replace the path with the same origin, keeping the list
    /// sorted so index zero stays the best path.
    pub fn insert_path(&mut self, path: Path, ecmp: bool) {
        self.paths.retain(|p| {
            !p.same_origin(
                path.peer.as_ref().map(|peer| &peer.key),
                path.path_id,
                path.source,
            )
        });
        self.paths.push(path);
        self.sort(ecmp);
    }

    pub fn remove_path(
        &mut self,
        peer: Option<&PeerKey>,
        path_id: u32,
        source: PathSource,
    ) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| !p.same_origin(peer, path_id, source));
        before != self.paths.len()
    }

    pub fn remove_paths_from(&mut self, peer: &PeerKey) -> bool {
        let before = self.paths.len();
        self.paths
            .retain(|p| p.peer.as_ref().map(|info| &info.key) != Some(peer));
        before != self.paths.len()
    }

    pub fn find_path(&self, peer: Option<&PeerKey>, path_id: u32, source: PathSource) -> Option<&Path> {
        self.paths
            .iter()
            .find(|p| p.same_origin(peer, path_id, source))
    }

    pub fn sort(&mut self, ecmp: bool) {
        self.paths.sort_by(|a, b| path_compare(a, b, ecmp));
    }

    pub fn set_state(&mut self, id: ListenerId, state: Box<dyn DbState>) {
        self.state.insert(id, state);
    }

    pub fn get_state(&self, id: ListenerId) -> Option<&dyn DbState> {
        self.state.get(&id).map(|s| s.as_ref())
    }

    pub fn get_state_mut(&mut self, id: ListenerId) -> Option<&mut dyn DbState> {
        self.state.get_mut(&id).map(|s| s.as_mut())
    }

    pub fn clear_state(&mut self, id: ListenerId) -> Option<Box<dyn DbState>> {
        self.state.remove(&id)
    }

    pub fn has_state(&self) -> bool {
        !self.state.is_empty()
    }

    /// A route is destroyed only once no paths remain and no listener
    /// holds state on it.
    pub fn is_deletable(&self) -> bool {
        self.paths.is_empty() && self.state.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgp_wire::{AsPath, AsSegment, AttrSet, LocalPref, Med, Origin, AS_SEQUENCE};

    fn attrs(local_pref: u32, aspath: &[u16], origin: Origin, med: u32) -> Arc<AttrSet> {
        let mut set = AttrSet::new();
        set.local_pref = Some(LocalPref::new(local_pref));
        set.origin = Some(origin);
        set.med = Some(Med::new(med));
        let mut path = AsPath::new();
        if !aspath.is_empty() {
            let mut seg = AsSegment::new(AS_SEQUENCE);
            seg.asn = aspath.to_vec();
            path.segs.push(seg);
        }
        set.aspath = Some(path);
        Arc::new(set)
    }

    fn bgp_peer(addr: &str, bgp_id: &str) -> PathPeer {
        PathPeer {
            key: PeerKey::new(addr.parse().unwrap(), "uuid"),
            bgp_id: bgp_id.parse().unwrap(),
            peer_type: PeerType::IBgp,
            is_xmpp: false,
            is_ready: true,
        }
    }

    fn path(peer: Option<PathPeer>, attrs: Arc<AttrSet>) -> Path {
        Path::new(peer, PathSource::Bgp, attrs)
    }

    #[test]
    fn infeasible_sorts_last() {
        let a = attrs(100, &[64512], Origin::Igp, 0);
        let mut looped = path(Some(bgp_peer("10.0.0.1", "192.168.0.1")), a.clone());
        looped.flags |= PathFlags::AS_PATH_LOOPED;
        let clean = path(Some(bgp_peer("10.0.0.2", "192.168.0.2")), a);
        assert_eq!(path_compare(&clean, &looped, false), Ordering::Less);
        assert_eq!(path_compare(&looped, &clean, false), Ordering::Greater);
    }

    #[test]
    fn higher_local_pref_wins() {
        let hi = path(Some(bgp_peer("10.0.0.1", "192.168.0.1")), attrs(200, &[], Origin::Igp, 0));
        let lo = path(Some(bgp_peer("10.0.0.2", "192.168.0.2")), attrs(100, &[], Origin::Igp, 0));
        assert_eq!(path_compare(&hi, &lo, false), Ordering::Less);
    }

    #[test]
    fn ecmp_stops_after_local_pref() {
        let a = path(
            Some(bgp_peer("10.0.0.1", "192.168.0.1")),
            attrs(100, &[64512, 64513], Origin::Igp, 0),
        );
        let b = path(
            Some(bgp_peer("10.0.0.2", "192.168.0.2")),
            attrs(100, &[64512], Origin::Igp, 0),
        );
        assert_eq!(path_compare(&a, &b, true), Ordering::Equal);
        // Without ECMP the shorter AS path decides.
        assert_eq!(path_compare(&b, &a, false), Ordering::Less);
    }

    #[test]
    fn origin_breaks_as_path_tie() {
        let igp = path(
            Some(bgp_peer("10.0.0.1", "192.168.0.1")),
            attrs(100, &[64512], Origin::Igp, 0),
        );
        let incomplete = path(
            Some(bgp_peer("10.0.0.2", "192.168.0.2")),
            attrs(100, &[64513], Origin::Incomplete, 0),
        );
        assert_eq!(path_compare(&igp, &incomplete, false), Ordering::Less);
    }

    #[test]
    fn med_compares_only_same_neighbor_as() {
        let lo_med = path(
            Some(bgp_peer("10.0.0.1", "192.168.0.1")),
            attrs(100, &[64512], Origin::Igp, 10),
        );
        let hi_med = path(
            Some(bgp_peer("10.0.0.2", "192.168.0.2")),
            attrs(100, &[64512], Origin::Igp, 20),
        );
        assert_eq!(path_compare(&lo_med, &hi_med, false), Ordering::Less);

        // Different neighbor AS: MED skipped, falls through to identifier.
        let other_as = path(
            Some(bgp_peer("10.0.0.2", "192.168.0.2")),
            attrs(100, &[64513], Origin::Igp, 5),
        );
        assert_eq!(path_compare(&lo_med, &other_as, false), Ordering::Less);
    }

    #[test]
    fn local_paths_precede_received() {
        let local = Path::new(None, PathSource::Local, attrs(100, &[], Origin::Igp, 0));
        let received = path(
            Some(bgp_peer("10.0.0.1", "192.168.0.1")),
            attrs(100, &[], Origin::Igp, 0),
        );
        assert_eq!(path_compare(&local, &received, false), Ordering::Less);
    }

    #[test]
    fn lower_bgp_id_wins_at_the_end() {
        let lo = path(
            Some(bgp_peer("10.0.0.1", "192.168.0.10")),
            attrs(100, &[], Origin::Igp, 0),
        );
        let hi = path(
            Some(bgp_peer("10.0.0.2", "192.168.0.11")),
            attrs(100, &[], Origin::Igp, 0),
        );
        assert_eq!(path_compare(&lo, &hi, false), Ordering::Less);
    }

    #[test]
    fn total_order_is_antisymmetric() {
        let a = path(
            Some(bgp_peer("10.0.0.1", "192.168.0.10")),
            attrs(100, &[64512], Origin::Igp, 0),
        );
        let b = path(
            Some(bgp_peer("10.0.0.2", "192.168.0.11")),
            attrs(200, &[], Origin::Egp, 5),
        );
        assert_eq!(path_compare(&a, &b, false), path_compare(&b, &a, false).reverse());
    }

    #[test]
    fn route_keeps_best_at_front() {
        let mut route = Route::new();
        route.insert_path(
            path(
                Some(bgp_peer("10.0.0.1", "192.168.0.1")),
                attrs(100, &[], Origin::Igp, 0),
            ),
            false,
        );
        route.insert_path(
            path(
                Some(bgp_peer("10.0.0.2", "192.168.0.2")),
                attrs(200, &[], Origin::Igp, 0),
            ),
            false,
        );
        assert_eq!(route.paths().len(), 2);
        assert_eq!(route.best().unwrap().attrs.local_pref_value(), 200);

        let key = PeerKey::new("10.0.0.2".parse().unwrap(), "uuid");
        assert!(route.remove_path(Some(&key), 0, PathSource::Bgp));
        assert_eq!(route.best().unwrap().attrs.local_pref_value(), 100);
    }

    #[test]
    fn insert_replaces_same_origin() {
        let mut route = Route::new();
        let peer = bgp_peer("10.0.0.1", "192.168.0.1");
        route.insert_path(path(Some(peer.clone()), attrs(100, &[], Origin::Igp, 0)), false);
        route.insert_path(path(Some(peer), attrs(150, &[], Origin::Igp, 0)), false);
        assert_eq!(route.paths().len(), 1);
        assert_eq!(route.best().unwrap().attrs.local_pref_value(), 150);
    }

    #[test]
    fn route_deletable_needs_empty_state() {
        let mut route = Route::new();
        assert!(route.is_deletable());
        route.set_state(1, Box::new(42u32));
        assert!(!route.is_deletable());
        route.clear_state(1);
        assert!(route.is_deletable());
    }
}
