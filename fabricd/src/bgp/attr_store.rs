use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Weak};

use bgp_wire::{AsPath, AttrSet, Community, ExtCommunity, LocalPref, Med, NexthopAttr};

/// Process-wide deduplicating store for interned path attributes. Equal
/// attribute tuples share one allocation; an interned value is immutable
/// and updates go through the replace-and-locate helpers, which hand back
/// a new handle.
#[derive(Debug)]
pub struct BgpAttrStore {
    store: HashMap<AttrSet, Weak<AttrSet>>,
}

impl Default for BgpAttrStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BgpAttrStore {
    pub fn new() -> Self {
        Self {
            store: HashMap::new(),
        }
    }

    pub fn locate(&mut self, attrs: AttrSet) -> Arc<AttrSet> {
        if let Some(weak) = self.store.get(&attrs)
            && let Some(arc) = weak.upgrade()
        {
            return arc;
        }
        let arc = Arc::new(attrs.clone());
        self.store.insert(attrs, Arc::downgrade(&arc));
        arc
    }

    pub fn replace_nexthop_and_locate(
        &mut self,
        attrs: &Arc<AttrSet>,
        nexthop: Ipv4Addr,
    ) -> Arc<AttrSet> {
        let mut clone = (**attrs).clone();
        clone.nexthop = Some(NexthopAttr::new(nexthop));
        self.locate(clone)
    }

    pub fn replace_local_pref_and_locate(
        &mut self,
        attrs: &Arc<AttrSet>,
        local_pref: u32,
    ) -> Arc<AttrSet> {
        let mut clone = (**attrs).clone();
        clone.local_pref = Some(LocalPref::new(local_pref));
        self.locate(clone)
    }

    pub fn replace_med_and_locate(&mut self, attrs: &Arc<AttrSet>, med: u32) -> Arc<AttrSet> {
        let mut clone = (**attrs).clone();
        clone.med = Some(Med::new(med));
        self.locate(clone)
    }

    pub fn replace_aspath_and_locate(
        &mut self,
        attrs: &Arc<AttrSet>,
        aspath: AsPath,
    ) -> Arc<AttrSet> {
        let mut clone = (**attrs).clone();
        clone.aspath = Some(aspath);
        self.locate(clone)
    }

    pub fn replace_community_and_locate(
        &mut self,
        attrs: &Arc<AttrSet>,
        com: Option<Community>,
    ) -> Arc<AttrSet> {
        let mut clone = (**attrs).clone();
        clone.com = com;
        self.locate(clone)
    }

    pub fn replace_ext_community_and_locate(
        &mut self,
        attrs: &Arc<AttrSet>,
        ecom: Option<ExtCommunity>,
    ) -> Arc<AttrSet> {
        let mut clone = (**attrs).clone();
        clone.ecom = ecom;
        self.locate(clone)
    }

    /// Drop entries whose last strong handle is gone.
    pub fn gc(&mut self) {
        self.store.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn refcnt(&self, attrs: &AttrSet) -> usize {
        self.store.get(attrs).map(Weak::strong_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgp_wire::Origin;

    fn attrs_with_pref(pref: u32) -> AttrSet {
        let mut attrs = AttrSet::new();
        attrs.origin = Some(Origin::Igp);
        attrs.local_pref = Some(LocalPref::new(pref));
        attrs
    }

    #[test]
    fn equal_specs_intern_to_same_allocation() {
        let mut store = BgpAttrStore::new();
        let a = store.locate(attrs_with_pref(100));
        let b = store.locate(attrs_with_pref(100));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_produces_new_interned_value() {
        let mut store = BgpAttrStore::new();
        let a = store.locate(attrs_with_pref(100));
        let b = store.replace_local_pref_and_locate(&a, 200);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.local_pref_value(), 200);
        // The original is untouched.
        assert_eq!(a.local_pref_value(), 100);
        // Replacing back yields the original allocation.
        let c = store.replace_local_pref_and_locate(&b, 100);
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn gc_reclaims_dead_entries() {
        let mut store = BgpAttrStore::new();
        let a = store.locate(attrs_with_pref(100));
        drop(a);
        store.gc();
        assert!(store.is_empty());
    }
}
