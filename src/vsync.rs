//! Vsync and power coordination

use tracing::{debug, error, trace, warn};

use crate::display_id::PhysicalDisplayId;
use crate::hal::{
    HwcConfigId, HwcDisplayId, Nsecs, PowerMode, Vsync, VsyncPeriodChangeConstraints,
    VsyncPeriodChangeTimeline,
};
use crate::hwcomposer::{device_call, log_hwc_error, mapped_device_call, HwComposer};
use crate::Result;

impl HwComposer {
    /// Accept a hardware vsync timestamp. Returns false when the event is
    /// dropped: unknown handle, or the same timestamp as the previous event
    /// for this display.
    ///
    /// Runs on the device callback thread and makes no device calls.
    pub fn on_vsync(&self, hwc_id: HwcDisplayId, timestamp: Nsecs) -> bool {
        let Some(id) = self.to_physical_display_id(hwc_id) else {
            error!(hwc_id, "Invalid HWC display");
            return false;
        };
        let Ok(record) = self.record(id.into()) else {
            return false;
        };
        assert!(
            !record.is_virtual(),
            "on_vsync: Invalid operation on virtual display with ID {}",
            id
        );

        let mut events = record.vsync_events();
        // Some devices repeat a timestamp when the panel powers off and on.
        if events.last_hw_vsync == Some(timestamp) {
            warn!(display = %id, timestamp, "Ignoring duplicate VSYNC event from HWC");
            return false;
        }
        events.last_hw_vsync = Some(timestamp);

        trace!(display = %id, toggle = events.trace_toggle, "HW_VSYNC");
        events.trace_toggle = !events.trace_toggle;
        true
    }

    /// Enable or disable hardware vsync. A request matching the current state
    /// makes no device call. The display's vsync lock is held across the
    /// device call so concurrent toggles can't diverge from the device.
    pub fn set_vsync_enabled(&self, id: PhysicalDisplayId, enabled: Vsync) -> Result<()> {
        let record = self.record(id.into())?;
        assert!(
            !record.is_virtual(),
            "set_vsync_enabled: Invalid operation on virtual display with ID {}",
            id
        );

        let mut current = record.vsync_lock();
        if *current == enabled {
            return Ok(());
        }

        device_call(
            "setVsyncEnabled",
            id.into(),
            self.composer.set_vsync_enabled(record.hwc_id(), enabled),
        )?;
        *current = enabled;

        trace!(display = %id, on = enabled == Vsync::Enable, "HW_VSYNC_ON");
        Ok(())
    }

    /// Device failures are logged, not returned. Doze modes fall back to
    /// `On` when the display can't doze.
    pub fn set_power_mode(&self, id: PhysicalDisplayId, mode: PowerMode) -> Result<()> {
        let record = self.record(id.into())?;
        assert!(
            !record.is_virtual(),
            "set_power_mode: Invalid operation on virtual display with ID {}",
            id
        );
        let hwc_id = record.hwc_id();

        let mode = match mode {
            PowerMode::Off | PowerMode::On => mode,
            PowerMode::Doze | PowerMode::DozeSuspend => {
                let supports_doze = self.composer.get_doze_support(hwc_id).unwrap_or_else(|code| {
                    log_hwc_error("supportsDoze", id.into(), code);
                    false
                });
                if supports_doze {
                    mode
                } else {
                    PowerMode::On
                }
            }
            PowerMode::OnSuspend => {
                debug!(display = %id, %mode, "setPowerMode: Not calling HWC");
                return Ok(());
            }
        };

        debug!(display = %id, %mode, "setPowerMode: Calling HWC");
        if let Err(code) = self.composer.set_power_mode(hwc_id, mode) {
            log_hwc_error(&format!("setPowerMode({})", mode), id.into(), code);
        }
        Ok(())
    }

    /// Switch refresh rate. `Unsupported`, `BadConfig` and `BadParameter`
    /// come back as their own error kinds.
    pub fn set_active_mode_with_constraints(
        &self,
        id: PhysicalDisplayId,
        config: HwcConfigId,
        constraints: &VsyncPeriodChangeConstraints,
    ) -> Result<VsyncPeriodChangeTimeline> {
        let record = self.record(id.into())?;
        mapped_device_call(
            "setActiveConfigWithConstraints",
            id.into(),
            self.composer
                .set_active_config_with_constraints(record.hwc_id(), config, constraints),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::config::HwcConfig;
    use crate::hal::{Connection, HalError};
    use crate::sim::{SimComposer, SimDisplay};
    use crate::Error;

    fn setup() -> (Arc<SimComposer>, Arc<HwComposer>, PhysicalDisplayId) {
        let sim = Arc::new(SimComposer::new());
        sim.add_display(1, SimDisplay::default());
        let hwc = Arc::new(HwComposer::new(sim.clone(), HwcConfig::default()));
        let info = hwc.on_hotplug(1, Connection::Connected).unwrap();
        sim.clear_calls();
        (sim, hwc, info.id)
    }

    #[test]
    fn test_duplicate_vsync_is_dropped() {
        let (_sim, hwc, id) = setup();

        assert!(hwc.on_vsync(1, 16_000_000));
        assert!(!hwc.on_vsync(1, 16_000_000));
        assert!(hwc.on_vsync(1, 32_000_000));

        let record = hwc.record(id.into()).unwrap();
        let events = record.vsync_events();
        assert_eq!(events.last_hw_vsync, Some(32_000_000));
        // Two accepted events flip the toggle twice.
        assert!(!events.trace_toggle);
    }

    #[test]
    fn test_vsync_for_unknown_handle() {
        let (_sim, hwc, _id) = setup();
        assert!(!hwc.on_vsync(77, 1));
    }

    #[test]
    fn test_vsync_enable_is_idempotent() {
        let (sim, hwc, id) = setup();

        hwc.set_vsync_enabled(id, Vsync::Enable).unwrap();
        hwc.set_vsync_enabled(id, Vsync::Enable).unwrap();
        assert_eq!(sim.count_calls("setVsyncEnabled"), 1);

        hwc.set_vsync_enabled(id, Vsync::Disable).unwrap();
        assert_eq!(sim.count_calls("setVsyncEnabled"), 2);
        assert_eq!(hwc.record(id.into()).unwrap().vsync_enabled(), Vsync::Disable);
    }

    #[test]
    fn test_vsync_failure_keeps_recorded_state() {
        let (sim, hwc, id) = setup();
        sim.fail_next("setVsyncEnabled", HalError::BadParameter);

        assert!(hwc.set_vsync_enabled(id, Vsync::Enable).is_err());
        assert_eq!(hwc.record(id.into()).unwrap().vsync_enabled(), Vsync::Disable);

        hwc.set_vsync_enabled(id, Vsync::Enable).unwrap();
        assert_eq!(sim.count_calls("setVsyncEnabled"), 2);
    }

    #[test]
    fn test_concurrent_enables_make_one_device_call() {
        let (sim, hwc, id) = setup();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hwc = hwc.clone();
                thread::spawn(move || hwc.set_vsync_enabled(id, Vsync::Enable))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(sim.count_calls("setVsyncEnabled"), 1);
    }

    #[test]
    fn test_doze_falls_back_to_on() {
        let (sim, hwc, id) = setup();

        hwc.set_power_mode(id, PowerMode::Doze).unwrap();
        hwc.set_power_mode(id, PowerMode::Off).unwrap();
        assert_eq!(sim.power_modes(1), vec![PowerMode::On, PowerMode::Off]);
        assert_eq!(sim.count_calls("getDozeSupport"), 1);
    }

    #[test]
    fn test_doze_when_supported() {
        let sim = Arc::new(SimComposer::new());
        sim.add_display(
            1,
            SimDisplay {
                doze_support: true,
                ..SimDisplay::default()
            },
        );
        let hwc = HwComposer::new(sim.clone(), HwcConfig::default());
        let id = hwc.on_hotplug(1, Connection::Connected).unwrap().id;

        hwc.set_power_mode(id, PowerMode::DozeSuspend).unwrap();
        hwc.set_power_mode(id, PowerMode::OnSuspend).unwrap();
        assert_eq!(sim.power_modes(1), vec![PowerMode::DozeSuspend]);
    }

    #[test]
    fn test_power_mode_device_error_is_logged_only() {
        let (sim, hwc, id) = setup();
        sim.fail_next("setPowerMode", HalError::BadParameter);
        hwc.set_power_mode(id, PowerMode::On).unwrap();
    }

    #[test]
    fn test_mode_switch_errors_are_distinct() {
        let (sim, hwc, id) = setup();
        let constraints = VsyncPeriodChangeConstraints {
            desired_time_nanos: 1_000,
            seamless_required: true,
        };

        let timeline = hwc.set_active_mode_with_constraints(id, 1, &constraints).unwrap();
        assert!(timeline.new_vsync_applied_time_nanos >= constraints.desired_time_nanos);
        assert_eq!(hwc.get_active_mode(id), Some(1));

        sim.fail_next("setActiveConfigWithConstraints", HalError::BadConfig);
        assert!(matches!(
            hwc.set_active_mode_with_constraints(id, 9, &constraints),
            Err(Error::BadConfig { .. })
        ));

        sim.fail_next("setActiveConfigWithConstraints", HalError::Unsupported);
        assert!(hwc
            .set_active_mode_with_constraints(id, 1, &constraints)
            .unwrap_err()
            .is_unsupported());
    }
}
