//! Stable display identities
//!
//! Physical IDs are derived from the connector port and identification data,
//! so the same connector resolves to the same ID across reconnects. Virtual
//! IDs are handed out per session.
//!
//! Bit layout of a physical ID:
//! - bit 62: stable flag
//! - bits 40..56: PNP manufacturer ID
//! - bits 8..40: model hash
//! - bits 0..8: port

use std::fmt;

/// Port tag for the internal display of a legacy (single-role) device
pub const LEGACY_DISPLAY_TYPE_PRIMARY: u8 = 0;
/// Port tag for the external display of a legacy device
pub const LEGACY_DISPLAY_TYPE_EXTERNAL: u8 = 1;

const FLAG_VIRTUAL: u64 = 1 << 63;
const FLAG_STABLE: u64 = 1 << 62;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalDisplayId(u64);

impl PhysicalDisplayId {
    pub fn from_port(port: u8) -> Self {
        Self::from_edid(port, 0, 0)
    }

    pub fn from_edid(port: u8, manufacturer_id: u16, model_hash: u32) -> Self {
        Self(
            FLAG_STABLE
                | (u64::from(manufacturer_id) << 40)
                | (u64::from(model_hash) << 8)
                | u64::from(port),
        )
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn port(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn manufacturer_id(self) -> u16 {
        ((self.0 >> 40) & 0xFFFF) as u16
    }

    pub fn model_hash(self) -> u32 {
        ((self.0 >> 8) & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Display for PhysicalDisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalDisplayId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalVirtualDisplayId(u64);

impl HalVirtualDisplayId {
    pub fn new(index: u32) -> Self {
        Self(FLAG_VIRTUAL | u64::from(index))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn index(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Display for HalVirtualDisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HalVirtualDisplayId({})", self.index())
    }
}

/// Identity the host compositor uses for any composition target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DisplayId {
    Physical(PhysicalDisplayId),
    Virtual(HalVirtualDisplayId),
}

impl DisplayId {
    pub fn is_virtual(self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    pub fn as_physical(self) -> Option<PhysicalDisplayId> {
        match self {
            Self::Physical(id) => Some(id),
            Self::Virtual(_) => None,
        }
    }

    pub fn as_virtual(self) -> Option<HalVirtualDisplayId> {
        match self {
            Self::Virtual(id) => Some(id),
            Self::Physical(_) => None,
        }
    }
}

impl From<PhysicalDisplayId> for DisplayId {
    fn from(id: PhysicalDisplayId) -> Self {
        Self::Physical(id)
    }
}

impl From<HalVirtualDisplayId> for DisplayId {
    fn from(id: HalVirtualDisplayId) -> Self {
        Self::Virtual(id)
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Physical(id) => id.fmt(f),
            Self::Virtual(id) => id.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_id_fields() {
        let id = PhysicalDisplayId::from_edid(3, 0x4C2D, 0xDEAD_BEEF);
        assert_eq!(id.port(), 3);
        assert_eq!(id.manufacturer_id(), 0x4C2D);
        assert_eq!(id.model_hash(), 0xDEAD_BEEF);
        assert_ne!(id.value() & FLAG_STABLE, 0);
    }

    #[test]
    fn test_legacy_ports_are_distinct() {
        let primary = PhysicalDisplayId::from_port(LEGACY_DISPLAY_TYPE_PRIMARY);
        let external = PhysicalDisplayId::from_port(LEGACY_DISPLAY_TYPE_EXTERNAL);
        assert_ne!(primary, external);
        assert_eq!(primary, PhysicalDisplayId::from_port(0));
    }

    #[test]
    fn test_virtual_never_collides_with_physical() {
        let virt = HalVirtualDisplayId::new(0);
        assert_eq!(virt.index(), 0);
        assert_ne!(virt.value(), PhysicalDisplayId::from_port(0).value());
        assert!(DisplayId::from(virt).is_virtual());
        assert_eq!(DisplayId::from(virt).as_physical(), None);
    }
}
