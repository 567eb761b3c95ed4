//! Hotplug identification
//!
//! Turns device connect/disconnect notifications into stable physical
//! identities. The first unresolved handle decides, for the rest of the
//! process, whether displays are identified from their identification data
//! (generalized mode) or by a fixed port tag (legacy mode).

use tracing::{debug, error, info, warn};

use crate::display_id::{PhysicalDisplayId, LEGACY_DISPLAY_TYPE_EXTERNAL, LEGACY_DISPLAY_TYPE_PRIMARY};
use crate::hal::{Connection, HalError, HwcDisplayId};
use crate::hwcomposer::HwComposer;
use crate::identification::{
    parse_display_identification_data, DisplayIdentificationData, DisplayIdentificationInfo,
};
use crate::registry::{DisplayRoles, MultiDisplayMode};

impl HwComposer {
    /// Handle a device hotplug notification.
    ///
    /// Returns the resolved identity, or `None` when the notification is
    /// ignored (invalid state, unknown handle on disconnect, rejected
    /// connect).
    pub fn on_hotplug(
        &self,
        hwc_id: HwcDisplayId,
        connection: Connection,
    ) -> Option<DisplayIdentificationInfo> {
        match connection {
            Connection::Connected => self.on_hotplug_connect(hwc_id),
            Connection::Disconnected => self.on_hotplug_disconnect(hwc_id),
            Connection::Invalid => None,
        }
    }

    pub fn updates_device_product_info_on_hotplug_reconnect(&self) -> bool {
        self.config.update_device_product_info_on_hotplug_reconnect
    }

    fn on_hotplug_connect(&self, hwc_id: HwcDisplayId) -> Option<DisplayIdentificationInfo> {
        let known = self.to_physical_display_id(hwc_id);
        let info = match known {
            Some(id) => self.reconnect_info(hwc_id, id),
            None => self.resolve_new_display(hwc_id)?,
        };

        if !self.is_connected(info.id.into()) {
            self.allocate_physical_display(hwc_id, info.id);
        }
        info!(hwc_id, display = %info.id, name = %info.name, "Display connected");
        Some(info)
    }

    /// The identity stays as assigned; only product info may be refreshed.
    fn reconnect_info(&self, hwc_id: HwcDisplayId, id: PhysicalDisplayId) -> DisplayIdentificationInfo {
        let mut info = DisplayIdentificationInfo {
            id,
            name: String::new(),
            device_product_info: None,
        };

        if self.config.update_device_product_info_on_hotplug_reconnect {
            let data = self.get_display_identification_data(hwc_id).unwrap_or_default();
            match parse_display_identification_data(data.port, &data.data) {
                Some(parsed) => info.device_product_info = parsed.device_product_info,
                None => error!(hwc_id, "Failed to parse identification data"),
            }
        }
        info
    }

    fn resolve_new_display(&self, hwc_id: HwcDisplayId) -> Option<DisplayIdentificationInfo> {
        let data = self.get_display_identification_data(hwc_id);
        let has_data = data.is_some();

        let (mode, roles) = {
            let mut registry = self.registry.write();
            (registry.decide_multi_display_mode(has_data), registry.roles())
        };

        if should_ignore_hotplug_connect(hwc_id, mode, roles, has_data) {
            return None;
        }

        let is_primary = roles.internal.is_none();
        let mut port = data.as_ref().map_or(0, |d| d.port);
        match mode {
            MultiDisplayMode::Generalized => {
                let bytes = data.as_ref().map_or(&[][..], |d| d.data.as_slice());
                if let Some(info) = parse_display_identification_data(port, bytes) {
                    return Some(info);
                }
                error!(hwc_id, "Failed to parse identification data");
            }
            MultiDisplayMode::Legacy => {
                if has_data {
                    warn!(hwc_id, "Ignoring identification data");
                }
                port = if is_primary {
                    LEGACY_DISPLAY_TYPE_PRIMARY
                } else {
                    LEGACY_DISPLAY_TYPE_EXTERNAL
                };
            }
        }

        Some(DisplayIdentificationInfo {
            id: PhysicalDisplayId::from_port(port),
            name: if is_primary {
                "Internal display".to_string()
            } else {
                "External display".to_string()
            },
            device_product_info: None,
        })
    }

    /// The record is kept; teardown is a later, explicit `destroy_display`.
    fn on_hotplug_disconnect(&self, hwc_id: HwcDisplayId) -> Option<DisplayIdentificationInfo> {
        let Some(id) = self.to_physical_display_id(hwc_id) else {
            error!(hwc_id, "Ignoring disconnection of invalid HWC display");
            return None;
        };

        if let Some(record) = self.registry.read().get(id.into()) {
            record.set_connected(false);
        }
        info!(hwc_id, display = %id, "Display disconnected");

        Some(DisplayIdentificationInfo {
            id,
            name: String::new(),
            device_product_info: None,
        })
    }

    fn get_display_identification_data(
        &self,
        hwc_id: HwcDisplayId,
    ) -> Option<DisplayIdentificationData> {
        match self.composer.get_display_identification_data(hwc_id) {
            Ok(data) => Some(data),
            Err(HalError::Unsupported) => {
                debug!(hwc_id, "Display does not report identification data");
                None
            }
            Err(code) => {
                error!(hwc_id, %code, "getDisplayIdentificationData failed");
                None
            }
        }
    }
}

fn should_ignore_hotplug_connect(
    hwc_id: HwcDisplayId,
    mode: MultiDisplayMode,
    roles: DisplayRoles,
    has_identification_data: bool,
) -> bool {
    match mode {
        MultiDisplayMode::Generalized if !has_identification_data => {
            error!(hwc_id, "Ignoring connection of display without identification data");
            true
        }
        MultiDisplayMode::Legacy if roles.is_full() => {
            error!(hwc_id, "Ignoring connection of tertiary display");
            true
        }
        _ => false,
    }
}
