use std::net::{IpAddr, Ipv4Addr};

use bgp_wire::{CeaseSubCode, Family};
use tokio::sync::mpsc::{self, Receiver, Sender};

use super::fsm::Event;
use super::inst::{Bgp, Message};
use super::lifetime::DeleteRef;
use super::peer::{Peer, cease};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOp {
    Add,
    Change,
    Delete,
}

/// Global protocol parameters delivered by the config provider.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub admin_down: bool,
    pub bgp_identifier: Ipv4Addr,
    pub autonomous_system: u32,
    pub local_autonomous_system: u32,
    pub hold_time: u16,
    pub port: u16,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            admin_down: false,
            bgp_identifier: Ipv4Addr::UNSPECIFIED,
            autonomous_system: 0,
            local_autonomous_system: 0,
            hold_time: 0,
            port: super::BGP_PORT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    pub name: String,
    pub virtual_network: Option<String>,
    pub vn_index: i32,
    pub import_targets: Vec<String>,
    pub export_targets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NeighborConfig {
    pub name: String,
    pub uuid: String,
    pub peer_address: IpAddr,
    pub peer_port: u16,
    pub peer_as: u32,
    pub local_as: u32,
    pub local_identifier: Ipv4Addr,
    pub families: Vec<Family>,
    pub hold_time: Option<u16>,
    pub admin_down: bool,
    pub vendor: String,
    pub instance: String,
}

#[derive(Debug)]
pub enum ConfigEvent {
    Protocol(ConfigOp, ProtocolConfig),
    Instance(ConfigOp, InstanceConfig),
    Neighbor(ConfigOp, NeighborConfig),
}

/// Channel over which the external config provider feeds the server.
pub struct ConfigChannel {
    pub tx: Sender<ConfigEvent>,
    pub rx: Receiver<ConfigEvent>,
}

impl Default for ConfigChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1024);
        Self { tx, rx }
    }
}

impl Bgp {
    pub fn process_config_event(&mut self, event: ConfigEvent) {
        match event {
            ConfigEvent::Protocol(op, config) => self.apply_protocol_config(op, config),
            ConfigEvent::Instance(op, config) => self.apply_instance_config(op, config),
            ConfigEvent::Neighbor(op, config) => self.apply_neighbor_config(op, config),
        }
    }

    fn apply_protocol_config(&mut self, op: ConfigOp, config: ProtocolConfig) {
        if op == ConfigOp::Delete {
            return;
        }
        let asn_changed =
            self.asn != config.autonomous_system && config.autonomous_system != 0;
        let id_changed = self.router_id != config.bgp_identifier
            && !config.bgp_identifier.is_unspecified();
        let admin_changed = self.admin_down != config.admin_down;

        if config.autonomous_system != 0 {
            self.asn = config.autonomous_system;
        }
        self.local_asn = if config.local_autonomous_system != 0 {
            config.local_autonomous_system
        } else {
            self.asn
        };
        if !config.bgp_identifier.is_unspecified() {
            self.router_id = config.bgp_identifier;
        }
        if config.hold_time != 0 {
            self.hold_time = config.hold_time;
        }
        self.admin_down = config.admin_down;

        // AS renumbering and identifier changes bounce every session so
        // the next OPEN carries the new values.
        let idents: Vec<IpAddr> = self.peers.keys().copied().collect();
        for ident in idents {
            if let Some(peer) = self.peers.get_mut(&ident) {
                if asn_changed {
                    peer.local_as = self.local_asn;
                }
                if id_changed {
                    peer.local_identifier = self.router_id;
                }
                peer.admin_down = self.admin_down || peer.admin_down;
            }
            if admin_changed && self.admin_down {
                self.post_event(ident, Event::Stop(cease(CeaseSubCode::AdministrativeShutdown)));
            } else if asn_changed || id_changed {
                self.post_event(ident, Event::Stop(cease(CeaseSubCode::OtherConfigChange)));
            }
        }
    }

    fn apply_instance_config(&mut self, op: ConfigOp, config: InstanceConfig) {
        match op {
            ConfigOp::Add => {
                if self.instances.contains_key(&config.name) {
                    return;
                }
                let mut instance = super::instance::RoutingInstance::new(
                    &config.name,
                    &[Family::Inet, Family::ErmVpn, Family::Evpn],
                    self.partition_count,
                );
                instance.virtual_network = config.virtual_network.clone();
                instance.vn_index = config.vn_index;
                instance.import_targets = parse_targets(&config.import_targets);
                instance.export_targets = parse_targets(&config.export_targets);
                tracing::info!("routing instance {} created", instance.name);
                self.instances.insert(config.name.clone(), instance);
            }
            ConfigOp::Change => {
                if let Some(instance) = self.instances.get_mut(&config.name) {
                    instance.virtual_network = config.virtual_network.clone();
                    instance.vn_index = config.vn_index;
                    instance.import_targets = parse_targets(&config.import_targets);
                    instance.export_targets = parse_targets(&config.export_targets);
                }
            }
            ConfigOp::Delete => {
                let Some(instance) = self.instances.get_mut(&config.name) else {
                    return;
                };
                if instance.is_master() {
                    return;
                }
                instance.deleted = true;
                let tables: Vec<TableIdOwned> = instance
                    .tables
                    .values_mut()
                    .map(|table| {
                        table.deleted = true;
                        table.id.clone()
                    })
                    .collect();
                for id in tables {
                    self.delete_request(DeleteRef::Table(id));
                }
                self.delete_request(DeleteRef::Instance(config.name));
            }
        }
    }

    fn apply_neighbor_config(&mut self, op: ConfigOp, config: NeighborConfig) {
        let ident = config.peer_address;
        match op {
            ConfigOp::Add => {
                if self.peers.contains_key(&ident) {
                    return;
                }
                let index = self.next_peer_index();
                let local_as = if config.local_as != 0 {
                    config.local_as
                } else {
                    self.local_asn
                };
                let local_identifier = if config.local_identifier.is_unspecified() {
                    self.router_id
                } else {
                    config.local_identifier
                };
                let mut peer = Peer::new(
                    ident,
                    &config.name,
                    &config.uuid,
                    index,
                    local_as,
                    local_identifier,
                    config.peer_as,
                    self.tx.clone(),
                );
                peer.peer_port = config.peer_port;
                peer.instance = config.instance.clone();
                peer.admin_down = config.admin_down || self.admin_down;
                peer.config.families = if config.families.is_empty() {
                    vec![Family::Inet]
                } else {
                    config.families.clone()
                };
                peer.config.vendor = config.vendor.clone();
                peer.config.timer.hold_time = config.hold_time.or(if self.hold_time > 0 {
                    Some(self.hold_time)
                } else {
                    None
                });
                tracing::info!("bgp peer {} ({}) configured", ident, config.name);
                self.peers.insert(ident, peer);
                self.post_event(ident, Event::Start);
            }
            ConfigOp::Change => {
                let Some(peer) = self.peers.get_mut(&ident) else {
                    return;
                };
                let mut bounce = false;
                if config.peer_as != 0 && peer.peer_as != config.peer_as {
                    peer.peer_as = config.peer_as;
                    bounce = true;
                }
                if config.local_as != 0 && peer.local_as != config.local_as {
                    peer.local_as = config.local_as;
                    bounce = true;
                }
                if !config.local_identifier.is_unspecified()
                    && peer.local_identifier != config.local_identifier
                {
                    peer.local_identifier = config.local_identifier;
                    bounce = true;
                }
                if !config.families.is_empty() && peer.config.families != config.families {
                    peer.config.families = config.families.clone();
                    bounce = true;
                }
                if peer.config.timer.hold_time != config.hold_time {
                    peer.config.timer.hold_time = config.hold_time;
                }
                let was_admin_down = peer.admin_down;
                let admin_down = config.admin_down || self.admin_down;
                peer.admin_down = admin_down;
                if admin_down && !was_admin_down {
                    self.post_event(ident, Event::Stop(cease(CeaseSubCode::AdministrativeShutdown)));
                } else if !admin_down && was_admin_down {
                    self.post_event(ident, Event::Start);
                } else if bounce {
                    self.post_event(ident, Event::Stop(cease(CeaseSubCode::OtherConfigChange)));
                }
            }
            ConfigOp::Delete => {
                {
                    let Some(peer) = self.peers.get_mut(&ident) else {
                        return;
                    };
                    peer.deleted = true;
                }
                tracing::info!("bgp peer {} deconfigured", ident);
                self.post_event(ident, Event::Stop(cease(CeaseSubCode::PeerDeconfigured)));
                self.process_membership_event(super::membership::MembershipEvent::UnregisterPeer {
                    peer: ident,
                });
                self.delete_request(DeleteRef::Peer(ident));
            }
        }
    }
}

type TableIdOwned = super::table::TableId;

fn parse_targets(targets: &[String]) -> std::collections::BTreeSet<bgp_wire::ExtCommunityValue> {
    // Targets come in the "target:<asn>:<nn>" form.
    targets
        .iter()
        .filter_map(|target| {
            let mut parts = target.split(':');
            let tag = parts.next()?;
            if tag != "target" {
                return None;
            }
            let asn: u16 = parts.next()?.parse().ok()?;
            let val: u32 = parts.next()?.parse().ok()?;
            Some(bgp_wire::ExtCommunityValue::route_target(asn, val))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_route_targets() {
        let targets = vec![
            "target:64512:8000001".to_string(),
            "bogus".to_string(),
            "target:64512:8000002".to_string(),
        ];
        let parsed = parse_targets(&targets);
        assert_eq!(parsed.len(), 2);
    }
}
