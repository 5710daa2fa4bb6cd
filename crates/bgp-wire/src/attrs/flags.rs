use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct AttributeFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXTENDED = 0x10;
    }
}

impl AttributeFlags {
    pub fn is_optional(&self) -> bool {
        self.contains(AttributeFlags::OPTIONAL)
    }

    pub fn is_transitive(&self) -> bool {
        self.contains(AttributeFlags::TRANSITIVE)
    }

    pub fn is_extended(&self) -> bool {
        self.contains(AttributeFlags::EXTENDED)
    }

    /// The optional/transitive bits the RFC mandates for a known attribute
    /// type, or None when the type is not fixed.
    pub fn expected(attr_type: u8) -> Option<AttributeFlags> {
        use crate::AttrType::*;
        let expected = match attr_type.into() {
            Origin | AsPath | NextHop | LocalPref | AtomicAggregate => {
                AttributeFlags::TRANSITIVE
            }
            Med => AttributeFlags::OPTIONAL,
            Aggregator | Community | ExtendedCom | PmsiTunnel | EdgeDiscovery
            | EdgeForwarding => AttributeFlags::OPTIONAL | AttributeFlags::TRANSITIVE,
            MpReachNlri | MpUnreachNlri => AttributeFlags::OPTIONAL,
            Unknown(_) => return None,
        };
        Some(expected)
    }
}

impl fmt::Display for AttributeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut v: Vec<&str> = Vec::new();
        if self.contains(AttributeFlags::OPTIONAL) {
            v.push("OPTIONAL");
        }
        if self.contains(AttributeFlags::TRANSITIVE) {
            v.push("TRANSITIVE");
        }
        if self.contains(AttributeFlags::PARTIAL) {
            v.push("PARTIAL");
        }
        if self.contains(AttributeFlags::EXTENDED) {
            v.push("EXTENDED");
        }
        write!(f, "{}", v.join("|"))
    }
}

use bitfield_struct::bitfield;

#[bitfield(u8, debug = true)]
#[derive(PartialEq)]
pub struct AttrFlags {
    #[bits(4)]
    pub resvd: u8,
    pub extended: bool,
    pub partial: bool,
    pub transitive: bool,
    pub optional: bool,
}
