use serde::Serialize;

use bgp_wire::BgpType;

use super::inst::Bgp;
use super::peer::{NotificationInfo, PeerErrorCounters};

/// Operational view of one neighbor, serialized for show output.
#[derive(Serialize)]
pub struct PeerSummary {
    pub address: String,
    pub name: String,
    pub instance: String,
    pub peer_as: u32,
    pub local_as: u32,
    pub state: &'static str,
    pub last_state: &'static str,
    pub last_state_change: String,
    pub last_event: &'static str,
    pub flap_count: u64,
    pub hold_time: u16,
    pub keepalive_time: u16,
    pub negotiated_families: Vec<String>,
    pub open_sent: u64,
    pub open_rcvd: u64,
    pub update_sent: u64,
    pub update_rcvd: u64,
    pub keepalive_sent: u64,
    pub keepalive_rcvd: u64,
    pub notification_sent: u64,
    pub notification_rcvd: u64,
    pub error_counters: PeerErrorCounters,
    pub last_notification_in: Option<NotificationInfo>,
    pub last_notification_out: Option<NotificationInfo>,
    pub membership_req_pending: u32,
}

#[derive(Serialize)]
pub struct TableSummary {
    pub name: String,
    pub routes: usize,
    pub partitions: usize,
    pub listeners: usize,
    pub walkers: usize,
}

impl Bgp {
    pub fn show_neighbors(&self) -> String {
        let summaries: Vec<PeerSummary> = self
            .peers
            .values()
            .map(|peer| PeerSummary {
                address: peer.ident.to_string(),
                name: peer.name.clone(),
                instance: peer.instance.clone(),
                peer_as: peer.peer_as,
                local_as: peer.local_as,
                state: peer.state.to_str(),
                last_state: peer.last_state.to_str(),
                last_state_change: peer.last_state_change.to_rfc3339(),
                last_event: peer.last_event,
                flap_count: peer.flap_count,
                hold_time: peer.hold_time,
                keepalive_time: peer.keepalive_time,
                negotiated_families: peer
                    .negotiated_families
                    .iter()
                    .map(|f| f.to_string())
                    .collect(),
                open_sent: peer.counters[BgpType::Open as usize].sent,
                open_rcvd: peer.counters[BgpType::Open as usize].rcvd,
                update_sent: peer.counters[BgpType::Update as usize].sent,
                update_rcvd: peer.counters[BgpType::Update as usize].rcvd,
                keepalive_sent: peer.counters[BgpType::Keepalive as usize].sent,
                keepalive_rcvd: peer.counters[BgpType::Keepalive as usize].rcvd,
                notification_sent: peer.counters[BgpType::Notification as usize].sent,
                notification_rcvd: peer.counters[BgpType::Notification as usize].rcvd,
                error_counters: peer.error_counters,
                last_notification_in: peer.last_notification_in.clone(),
                last_notification_out: peer.last_notification_out.clone(),
                membership_req_pending: peer.membership_req_pending,
            })
            .collect();
        serde_json::to_string_pretty(&summaries).unwrap_or_else(|e| format!("show error: {}", e))
    }

    pub fn show_tables(&self) -> String {
        let summaries: Vec<TableSummary> = self
            .instances
            .values()
            .flat_map(|instance| instance.tables.values())
            .map(|table| TableSummary {
                name: table.id.to_string(),
                routes: table.route_count(),
                partitions: table.partition_count(),
                listeners: table.listener_count(),
                walkers: table.walker_count(),
            })
            .collect();
        serde_json::to_string_pretty(&summaries).unwrap_or_else(|e| format!("show error: {}", e))
    }
}
