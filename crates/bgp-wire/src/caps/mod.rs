pub mod typ;
pub use typ::CapCode;

pub mod packet;
pub use packet::{CapabilityHeader, CapabilityPacket};

pub mod mp;
pub use mp::CapMultiProtocol;

pub mod graceful;
pub use graceful::{CapRestart, RestartValue};

pub mod unknown;
pub use unknown::CapUnknown;

pub mod emit;
pub use emit::CapEmit;

use std::collections::BTreeMap;
use std::fmt;

use bytes::BytesMut;

use crate::AfiSafi;

/// Aggregate of the capabilities carried in one OPEN.
#[derive(Default, Debug, PartialEq, Clone)]
pub struct BgpCaps {
    pub mp: BTreeMap<AfiSafi, CapMultiProtocol>,
    pub restart: Option<CapRestart>,
    pub unknown: Vec<CapUnknown>,
}

impl BgpCaps {
    pub fn emit(&self, buf: &mut BytesMut) {
        for (_, v) in self.mp.iter() {
            v.emit(buf, false);
        }
        if let Some(v) = &self.restart {
            v.emit(buf, false);
        }
    }

    pub fn from(caps: Vec<Vec<CapabilityPacket>>) -> Self {
        let mut bgp_caps = BgpCaps::default();
        for cap in caps.into_iter() {
            for c in cap.into_iter() {
                match c {
                    CapabilityPacket::MultiProtocol(v) => {
                        let key = AfiSafi::new(v.afi, v.safi);
                        bgp_caps.mp.insert(key, v);
                    }
                    CapabilityPacket::GracefulRestart(v) => {
                        bgp_caps.restart = Some(v);
                    }
                    CapabilityPacket::Unknown(v) => {
                        bgp_caps.unknown.push(v);
                    }
                }
            }
        }
        bgp_caps
    }

    pub fn has_family(&self, afi_safi: &AfiSafi) -> bool {
        self.mp.contains_key(afi_safi)
    }
}

impl fmt::Display for BgpCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, v) in self.mp.iter() {
            writeln!(f, " {}", v)?;
        }
        if let Some(v) = &self.restart {
            writeln!(f, " {}", v)?;
        }
        Ok(())
    }
}
