use std::collections::BTreeSet;
use std::fmt;

use bytes::{BufMut, BytesMut};
use nom_derive::NomBE;

use crate::{AttrEmitter, AttrFlags, AttrType};

/// Set of 32-bit community tags, kept sorted and unique.
#[derive(Clone, Debug, Default, NomBE, PartialEq, Eq, Hash)]
pub struct Community(pub Vec<u32>);

impl Community {
    pub fn new() -> Self {
        Community(Vec::new())
    }

    pub fn push(&mut self, value: u32) {
        self.0.push(value);
        self.sort_uniq();
    }

    pub fn sort_uniq(&mut self) {
        let coms: BTreeSet<u32> = self.0.iter().cloned().collect();
        self.0 = coms.into_iter().collect();
    }

    pub fn contains(&self, val: &u32) -> bool {
        self.0.contains(val)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AttrEmitter for Community {
    fn attr_flags(&self) -> AttrFlags {
        AttrFlags::new().with_optional(true).with_transitive(true)
    }

    fn attr_type(&self) -> AttrType {
        AttrType::Community
    }

    fn len(&self) -> Option<usize> {
        Some(self.0.len() * 4)
    }

    fn emit(&self, buf: &mut BytesMut) {
        for &community in &self.0 {
            buf.put_u32(community);
        }
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self
            .0
            .iter()
            .map(|x| format!("{}:{}", x >> 16, x & 0xffff))
            .collect::<Vec<String>>()
            .join(" ");
        write!(f, "{v}")
    }
}
