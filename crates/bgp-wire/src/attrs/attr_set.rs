use std::fmt;

use bytes::BytesMut;

use crate::{
    Aggregator, AsPath, AtomicAggregate, AttrEmitter, Community, EdgeDiscovery, EdgeForwarding,
    ExtCommunity, LocalPref, Med, NexthopAttr, Origin, PmsiTunnel, UnknownAttr,
};

/// The full attribute tuple of one path. Values with equal contents intern
/// to one shared allocation in the daemon's attribute store, so this type
/// is hashable and compared by value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AttrSet {
    pub origin: Option<Origin>,
    pub aspath: Option<AsPath>,
    pub nexthop: Option<NexthopAttr>,
    pub med: Option<Med>,
    pub local_pref: Option<LocalPref>,
    pub atomic_aggregate: Option<AtomicAggregate>,
    pub aggregator: Option<Aggregator>,
    pub com: Option<Community>,
    pub ecom: Option<ExtCommunity>,
    pub pmsi_tunnel: Option<PmsiTunnel>,
    pub edge_discovery: Option<EdgeDiscovery>,
    pub edge_forwarding: Option<EdgeForwarding>,
    pub unknown: Vec<UnknownAttr>,
}

impl AttrSet {
    pub fn new() -> Self {
        AttrSet {
            origin: Some(Origin::default()),
            aspath: Some(AsPath::default()),
            ..Default::default()
        }
    }

    pub fn attr_emit(&self, buf: &mut BytesMut) {
        if let Some(v) = &self.origin {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.aspath {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.nexthop {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.med {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.local_pref {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.atomic_aggregate {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.aggregator {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.com {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.ecom {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.pmsi_tunnel {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.edge_discovery {
            v.attr_emit(buf);
        }
        if let Some(v) = &self.edge_forwarding {
            v.attr_emit(buf);
        }
    }

    pub fn neighbor_as(&self) -> Option<u16> {
        self.aspath.as_ref().and_then(|aspath| aspath.neighbor_as())
    }

    pub fn aspath_length(&self) -> u32 {
        self.aspath.as_ref().map(|aspath| aspath.length()).unwrap_or(0)
    }

    pub fn local_pref_value(&self) -> u32 {
        self.local_pref
            .map(|lp| lp.local_pref)
            .unwrap_or(LocalPref::DEFAULT)
    }

    pub fn med_value(&self) -> u32 {
        self.med.map(|med| med.med).unwrap_or(0)
    }
}

impl fmt::Display for AttrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = &self.origin {
            writeln!(f, " Origin: {}", v)?;
        }
        if let Some(v) = &self.aspath {
            writeln!(f, " AS Path: {}", v)?;
        }
        if let Some(v) = &self.nexthop {
            writeln!(f, " Nexthop: {}", v)?;
        }
        if let Some(v) = &self.med {
            writeln!(f, " MED: {}", v)?;
        }
        if let Some(v) = &self.local_pref {
            writeln!(f, " LocalPref: {}", v)?;
        }
        if self.atomic_aggregate.is_some() {
            writeln!(f, " Atomic Aggregate")?;
        }
        if let Some(v) = &self.aggregator {
            writeln!(f, " Aggregator: {}", v)?;
        }
        if let Some(v) = &self.com {
            writeln!(f, " Community: {}", v)?;
        }
        if let Some(v) = &self.ecom {
            writeln!(f, " ExtCommunity: {}", v)?;
        }
        if let Some(v) = &self.pmsi_tunnel {
            writeln!(f, " PMSI Tunnel: {}", v)?;
        }
        if let Some(v) = &self.edge_discovery {
            writeln!(f, " Edge Discovery:{}", v)?;
        }
        if let Some(v) = &self.edge_forwarding {
            writeln!(f, " Edge Forwarding:{}", v)?;
        }
        Ok(())
    }
}
