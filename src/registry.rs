//! Display registry
//!
//! Owns every [`DisplayRecord`], the device-handle to physical-identity map,
//! and the two role slots (internal and external). It never talks to the
//! device; the coordinator does that and then records the outcome here.
//!
//! Records are handed out as `Arc`s so a device call can run without holding
//! the registry lock. Each record carries its own locks:
//! - `vsync_enabled`: held across the enable/disable device call
//! - `vsync_events`: dedup and trace state touched by vsync delivery
//! - `frame`: per-frame negotiation and fence state

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::display_id::{DisplayId, HalVirtualDisplayId, PhysicalDisplayId};
use crate::fence::Fence;
use crate::hal::{HalError, HwcDisplayId, LayerId, Nsecs, Vsync};

/// How hotplugged displays are identified, decided once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiDisplayMode {
    /// No identification data: two fixed roles keyed by port tag.
    Legacy,
    /// Identification data required for every physical display.
    Generalized,
}

impl MultiDisplayMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Generalized => "generalized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayRole {
    Internal,
    External,
}

/// The internal and external slots, filled in arrival order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayRoles {
    pub internal: Option<HwcDisplayId>,
    pub external: Option<HwcDisplayId>,
}

impl DisplayRoles {
    /// First handle ever bound becomes internal, the next distinct one
    /// external. Slots stay put until that handle is destroyed.
    pub fn assign(&mut self, hwc_id: HwcDisplayId) -> Option<DisplayRole> {
        match (self.internal, self.external) {
            (None, _) => {
                self.internal = Some(hwc_id);
                Some(DisplayRole::Internal)
            }
            (Some(internal), _) if internal == hwc_id => Some(DisplayRole::Internal),
            (Some(_), None) => {
                self.external = Some(hwc_id);
                Some(DisplayRole::External)
            }
            (Some(_), Some(external)) if external == hwc_id => Some(DisplayRole::External),
            (Some(_), Some(_)) => None,
        }
    }

    pub fn role_of(&self, hwc_id: HwcDisplayId) -> Option<DisplayRole> {
        if self.internal == Some(hwc_id) {
            Some(DisplayRole::Internal)
        } else if self.external == Some(hwc_id) {
            Some(DisplayRole::External)
        } else {
            None
        }
    }

    pub fn release(&mut self, hwc_id: HwcDisplayId) -> Option<DisplayRole> {
        if self.internal == Some(hwc_id) {
            self.internal = None;
            Some(DisplayRole::Internal)
        } else if self.external == Some(hwc_id) {
            self.external = None;
            Some(DisplayRole::External)
        } else {
            None
        }
    }

    pub fn is_full(&self) -> bool {
        self.internal.is_some() && self.external.is_some()
    }
}

#[derive(Debug, Default)]
pub(crate) struct VsyncEvents {
    pub(crate) last_hw_vsync: Option<Nsecs>,
    pub(crate) trace_toggle: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FrameState {
    pub(crate) validate_was_skipped: bool,
    pub(crate) last_present_fence: Fence,
    pub(crate) release_fences: HashMap<LayerId, Fence>,
    /// Error from fetching release fences during a committed
    /// present-or-validate, reported by the following present.
    pub(crate) present_error: Option<HalError>,
}

/// Mutable state of one composition target
#[derive(Debug)]
pub struct DisplayRecord {
    display_id: DisplayId,
    hwc_id: HwcDisplayId,
    is_virtual: bool,
    connected: AtomicBool,
    vsync_enabled: Mutex<Vsync>,
    vsync_events: Mutex<VsyncEvents>,
    frame: Mutex<FrameState>,
}

impl DisplayRecord {
    fn new(display_id: DisplayId, hwc_id: HwcDisplayId) -> Self {
        Self {
            display_id,
            hwc_id,
            is_virtual: display_id.is_virtual(),
            connected: AtomicBool::new(true),
            vsync_enabled: Mutex::new(Vsync::Disable),
            vsync_events: Mutex::new(VsyncEvents::default()),
            frame: Mutex::new(FrameState::default()),
        }
    }

    pub fn display_id(&self) -> DisplayId {
        self.display_id
    }

    pub fn hwc_id(&self) -> HwcDisplayId {
        self.hwc_id
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn vsync_enabled(&self) -> Vsync {
        *self.vsync_enabled.lock()
    }

    pub(crate) fn vsync_lock(&self) -> MutexGuard<'_, Vsync> {
        self.vsync_enabled.lock()
    }

    pub(crate) fn vsync_events(&self) -> MutexGuard<'_, VsyncEvents> {
        self.vsync_events.lock()
    }

    pub(crate) fn frame(&self) -> MutexGuard<'_, FrameState> {
        self.frame.lock()
    }

    pub fn validate_was_skipped(&self) -> bool {
        self.frame.lock().validate_was_skipped
    }
}

/// All known displays and how device handles map onto them
#[derive(Debug, Default)]
pub struct DisplayRegistry {
    displays: HashMap<DisplayId, Arc<DisplayRecord>>,
    physical_ids: HashMap<HwcDisplayId, PhysicalDisplayId>,
    roles: DisplayRoles,
    multi_display_mode: Option<MultiDisplayMode>,
    next_virtual_index: u32,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reverse lookup from a device handle
    pub fn resolve(&self, hwc_id: HwcDisplayId) -> Option<PhysicalDisplayId> {
        self.physical_ids.get(&hwc_id).copied()
    }

    pub fn get(&self, id: DisplayId) -> Option<Arc<DisplayRecord>> {
        self.displays.get(&id).cloned()
    }

    pub fn contains(&self, id: DisplayId) -> bool {
        self.displays.contains_key(&id)
    }

    pub fn is_connected(&self, id: DisplayId) -> bool {
        self.displays.get(&id).is_some_and(|record| record.is_connected())
    }

    pub fn has_physical_displays(&self) -> bool {
        !self.physical_ids.is_empty()
    }

    pub fn roles(&self) -> DisplayRoles {
        self.roles
    }

    pub fn multi_display_mode(&self) -> Option<MultiDisplayMode> {
        self.multi_display_mode
    }

    /// Fix the identification mode on first use; later calls return the
    /// mode already chosen.
    pub fn decide_multi_display_mode(&mut self, has_identification_data: bool) -> MultiDisplayMode {
        *self.multi_display_mode.get_or_insert_with(|| {
            let mode = if has_identification_data {
                MultiDisplayMode::Generalized
            } else {
                MultiDisplayMode::Legacy
            };
            info!("Switching to {} multi-display mode", mode.name());
            mode
        })
    }

    /// Bind a device handle to a physical identity and mark it connected.
    /// Any older handle bound to the same identity is forgotten.
    pub fn bind_physical(
        &mut self,
        hwc_id: HwcDisplayId,
        id: PhysicalDisplayId,
    ) -> Arc<DisplayRecord> {
        self.physical_ids
            .retain(|&other, bound| other == hwc_id || *bound != id);
        self.physical_ids.insert(hwc_id, id);

        if let Some(role) = self.roles.assign(hwc_id) {
            debug!(hwc_id, ?role, "Display role assigned");
        }

        let record = Arc::new(DisplayRecord::new(id.into(), hwc_id));
        self.displays.insert(id.into(), record.clone());
        record
    }

    pub fn next_virtual_id(&mut self) -> HalVirtualDisplayId {
        let id = HalVirtualDisplayId::new(self.next_virtual_index);
        self.next_virtual_index += 1;
        id
    }

    pub fn bind_virtual(
        &mut self,
        id: HalVirtualDisplayId,
        hwc_id: HwcDisplayId,
    ) -> Arc<DisplayRecord> {
        let record = Arc::new(DisplayRecord::new(id.into(), hwc_id));
        self.displays.insert(id.into(), record.clone());
        record
    }

    pub fn virtual_count(&self) -> usize {
        self.displays.values().filter(|r| r.is_virtual()).count()
    }

    /// Drop a display, its handle mapping and any role slot it held
    pub fn remove(&mut self, id: DisplayId) -> Option<Arc<DisplayRecord>> {
        let record = self.displays.remove(&id)?;
        if !record.is_virtual() {
            if let Some(role) = self.roles.release(record.hwc_id()) {
                debug!(hwc_id = record.hwc_id(), ?role, "Display role released");
            }
            self.physical_ids.remove(&record.hwc_id());
        }
        Some(record)
    }

    /// Fill empty role slots from connected physical displays, lowest
    /// device handle first.
    pub fn reassign_roles(&mut self) -> DisplayRoles {
        let mut candidates: Vec<HwcDisplayId> = self
            .displays
            .values()
            .filter(|r| !r.is_virtual() && r.is_connected())
            .map(|r| r.hwc_id())
            .filter(|&hwc_id| self.roles.role_of(hwc_id).is_none())
            .collect();
        candidates.sort_unstable();

        for hwc_id in candidates {
            if self.roles.is_full() {
                break;
            }
            if let Some(role) = self.roles.assign(hwc_id) {
                info!(hwc_id, ?role, "Display role reassigned");
            }
        }
        self.roles
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<DisplayRecord>> {
        self.displays.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_follow_arrival_order() {
        let mut roles = DisplayRoles::default();
        assert_eq!(roles.assign(10), Some(DisplayRole::Internal));
        assert_eq!(roles.assign(10), Some(DisplayRole::Internal));
        assert_eq!(roles.assign(11), Some(DisplayRole::External));
        assert_eq!(roles.assign(12), None);
        assert!(roles.is_full());

        assert_eq!(roles.release(10), Some(DisplayRole::Internal));
        assert_eq!(roles.internal, None);
        assert_eq!(roles.external, Some(11));
    }

    #[test]
    fn test_bind_and_resolve() {
        let mut registry = DisplayRegistry::new();
        let id = PhysicalDisplayId::from_port(0);

        assert!(!registry.is_connected(id.into()));
        let record = registry.bind_physical(1, id);
        assert!(record.is_connected());
        assert!(!record.is_virtual());
        assert_eq!(registry.resolve(1), Some(id));
        assert!(registry.is_connected(id.into()));
        assert_eq!(registry.roles().internal, Some(1));
    }

    #[test]
    fn test_identity_keeps_single_handle() {
        let mut registry = DisplayRegistry::new();
        let id = PhysicalDisplayId::from_port(5);

        registry.bind_physical(1, id);
        registry.bind_physical(2, id);

        assert_eq!(registry.resolve(1), None);
        assert_eq!(registry.resolve(2), Some(id));
        assert_eq!(registry.get(id.into()).unwrap().hwc_id(), 2);
    }

    #[test]
    fn test_remove_clears_mapping_and_role() {
        let mut registry = DisplayRegistry::new();
        let internal = PhysicalDisplayId::from_port(0);
        let external = PhysicalDisplayId::from_port(1);
        registry.bind_physical(1, internal);
        registry.bind_physical(2, external);

        assert!(registry.remove(internal.into()).is_some());
        assert_eq!(registry.resolve(1), None);
        assert_eq!(registry.roles().internal, None);
        assert_eq!(registry.roles().external, Some(2));
        assert!(registry.remove(internal.into()).is_none());
    }

    #[test]
    fn test_reassign_roles_is_explicit() {
        let mut registry = DisplayRegistry::new();
        registry.bind_physical(1, PhysicalDisplayId::from_port(0));
        registry.bind_physical(2, PhysicalDisplayId::from_port(1));
        registry.bind_physical(3, PhysicalDisplayId::from_port(2));

        registry.remove(PhysicalDisplayId::from_port(0).into());
        assert_eq!(registry.roles().internal, None);

        let roles = registry.reassign_roles();
        assert_eq!(roles.internal, Some(3));
        assert_eq!(roles.external, Some(2));
    }

    #[test]
    fn test_multi_display_mode_is_sticky() {
        let mut registry = DisplayRegistry::new();
        assert_eq!(registry.multi_display_mode(), None);
        assert_eq!(
            registry.decide_multi_display_mode(false),
            MultiDisplayMode::Legacy
        );
        assert_eq!(
            registry.decide_multi_display_mode(true),
            MultiDisplayMode::Legacy
        );
    }

    #[test]
    fn test_virtual_ids_are_per_session() {
        let mut registry = DisplayRegistry::new();
        let first = registry.next_virtual_id();
        let second = registry.next_virtual_id();
        assert_ne!(first, second);

        let record = registry.bind_virtual(first, 100);
        assert!(record.is_virtual());
        assert_eq!(registry.virtual_count(), 1);
        assert_eq!(registry.resolve(100), None);
    }
}
