use std::fmt;

use bytes::{BufMut, BytesMut};
use nom_derive::*;

use super::{CapCode, CapEmit};

#[derive(Debug, Default, PartialEq, Clone, NomBE)]
pub struct CapUnknown {
    #[nom(Ignore)]
    pub code: u8,
    pub data: Vec<u8>,
}

impl CapEmit for CapUnknown {
    fn code(&self) -> CapCode {
        CapCode::Unknown(self.code)
    }

    fn len(&self) -> u8 {
        self.data.len() as u8
    }

    fn emit_value(&self, buf: &mut BytesMut) {
        buf.put(&self.data[..]);
    }
}

impl fmt::Display for CapUnknown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown capability: {}", self.code)
    }
}
