use std::collections::{BTreeMap, BTreeSet};

use bgp_wire::{ExtCommunityValue, Family};

use super::table::{Table, TableId};

pub const MASTER_INSTANCE: &str = "master";

/// A routing instance holds one table per address family plus the
/// import/export route-target sets from configuration. The master instance
/// additionally owns the inter-speaker peers and the VPN tables.
pub struct RoutingInstance {
    pub name: String,
    pub virtual_network: Option<String>,
    pub vn_index: i32,
    pub import_targets: BTreeSet<ExtCommunityValue>,
    pub export_targets: BTreeSet<ExtCommunityValue>,
    pub tables: BTreeMap<Family, Table>,
    pub deleted: bool,
}

impl RoutingInstance {
    pub fn new(name: &str, families: &[Family], partition_count: usize) -> Self {
        let mut tables = BTreeMap::new();
        for family in families.iter() {
            let id = TableId::new(name, *family);
            tables.insert(*family, Table::new(id, partition_count));
        }
        Self {
            name: name.to_string(),
            virtual_network: None,
            vn_index: 0,
            import_targets: BTreeSet::new(),
            export_targets: BTreeSet::new(),
            tables,
            deleted: false,
        }
    }

    pub fn master(partition_count: usize) -> Self {
        Self::new(MASTER_INSTANCE, &Family::ALL, partition_count)
    }

    pub fn is_master(&self) -> bool {
        self.name == MASTER_INSTANCE
    }

    pub fn table(&self, family: Family) -> Option<&Table> {
        self.tables.get(&family)
    }

    pub fn table_mut(&mut self, family: Family) -> Option<&mut Table> {
        self.tables.get_mut(&family)
    }

    /// An instance can be destroyed once every table is gone.
    pub fn may_delete(&self) -> bool {
        self.tables.is_empty()
    }
}
