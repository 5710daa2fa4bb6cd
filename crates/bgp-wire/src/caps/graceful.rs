use std::fmt;

use bitfield_struct::bitfield;
use bytes::{BufMut, BytesMut};
use nom_derive::*;
use serde::{Deserialize, Serialize};

use crate::{Afi, CapCode, CapEmit, Safi};

#[bitfield(u16, debug = true)]
#[derive(Serialize, Deserialize, PartialEq, NomBE)]
pub struct RestartFlagTime {
    #[bits(12)]
    pub restart_time: u16,
    #[bits(2)]
    pub resvd: u8,
    pub n_flag: bool,
    pub r_flag: bool,
}

#[bitfield(u8, debug = true)]
#[derive(Serialize, Deserialize, PartialEq, NomBE)]
pub struct RestartFlags {
    #[bits(7)]
    pub resvd: u8,
    pub p_flag: bool,
}

#[derive(Debug, PartialEq, Clone, NomBE)]
pub struct RestartValue {
    pub afi: Afi,
    pub safi: Safi,
    pub flags: RestartFlags,
}

impl RestartValue {
    pub fn new(afi: Afi, safi: Safi) -> Self {
        Self {
            afi,
            safi,
            flags: RestartFlags::default(),
        }
    }
}

#[derive(Debug, Default, PartialEq, NomBE, Clone)]
pub struct CapRestart {
    pub flag_time: RestartFlagTime,
    pub values: Vec<RestartValue>,
}

impl CapRestart {
    /// Signalling-only form: restart time zero, no preserved families.
    pub fn signalling_only() -> Self {
        Self {
            flag_time: RestartFlagTime::new().with_restart_time(0),
            values: Vec::new(),
        }
    }

    pub fn with_time(restart_time: u16, values: Vec<RestartValue>) -> Self {
        Self {
            flag_time: RestartFlagTime::new()
                .with_restart_time(restart_time)
                .with_r_flag(true),
            values,
        }
    }

    pub fn restart_time(&self) -> u16 {
        self.flag_time.restart_time()
    }
}

impl CapEmit for CapRestart {
    fn code(&self) -> CapCode {
        CapCode::GracefulRestart
    }

    fn len(&self) -> u8 {
        (2 + self.values.len() * 4) as u8
    }

    fn emit_value(&self, buf: &mut BytesMut) {
        buf.put_u16(self.flag_time.into());
        for val in self.values.iter() {
            buf.put_u16(val.afi.into());
            buf.put_u8(val.safi.into());
            buf.put_u8(val.flags.into());
        }
    }
}

impl fmt::Display for CapRestart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GracefulRestart: restart time:{} R:{} N:{}",
            self.flag_time.restart_time(),
            self.flag_time.r_flag(),
            self.flag_time.n_flag(),
        )?;
        for value in self.values.iter() {
            write!(f, ", {}/{}", value.afi, value.safi)?;
        }
        Ok(())
    }
}
