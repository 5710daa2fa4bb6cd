use std::fmt;

use bytes::BytesMut;
use nom_derive::*;

use crate::{AttrEmitter, AttrFlags, AttrType};

#[derive(Clone, Copy, NomBE, PartialEq, Eq, Hash, Default)]
pub struct AtomicAggregate {}

impl AtomicAggregate {
    pub fn new() -> Self {
        Self {}
    }
}

impl AttrEmitter for AtomicAggregate {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_transitive(true)
    }

    fn attr_type(&self) -> AttrType {
        AttrType::AtomicAggregate
    }

    fn len(&self) -> Option<usize> {
        Some(0)
    }

    fn emit(&self, _buf: &mut BytesMut) {
        // Presence only.
    }
}

impl fmt::Display for AtomicAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "")
    }
}

impl fmt::Debug for AtomicAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atomic Aggregate")
    }
}
