//! Present/validate negotiation and per-display fences
//!
//! Once per frame the host calls [`HwComposer::get_device_composition_changes`]
//! and then [`HwComposer::present_and_get_release_fences`]. With skip-validate
//! enabled the first call tries to commit the frame in the same round trip;
//! when that works the second call only flushes queued commands.
//!
//! ```text
//!   presentOrValidate
//!        |
//!        +-- CommittedNoChanges   -> capture fences, done
//!        +-- CommittedWithChanges -> capture fences, query changes, caller accepts
//!        +-- OnlyValidated        -> query changes, accept
//! ```

use std::collections::HashMap;
use std::thread;
use std::time::Instant;

use tracing::{debug, trace};

use crate::composer::PresentOrValidate;
use crate::display_id::DisplayId;
use crate::fence::Fence;
use crate::hal::{
    BufferHandle, ClientTargetProperty, Composition, Dataspace, DisplayRequest, HalError,
    LayerId, LayerRequest, PresentOrValidateState,
};
use crate::hwcomposer::{device_call, log_hwc_error, HwComposer};
use crate::{Error, Result};

/// What the device asks of the caller when it can't composite the frame alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRequestedChanges {
    pub changed_types: HashMap<LayerId, Composition>,
    pub display_requests: DisplayRequest,
    pub layer_requests: HashMap<LayerId, LayerRequest>,
    pub client_target_property: ClientTargetProperty,
}

impl DeviceRequestedChanges {
    pub fn is_empty(&self) -> bool {
        self.changed_types.is_empty()
            && self.display_requests.is_empty()
            && self.layer_requests.is_empty()
    }
}

impl HwComposer {
    /// Negotiate this frame's composition with the device.
    ///
    /// `Ok(None)` means there is nothing to reconcile: the display is
    /// disconnected or the device already presented the frame. A `HasChanges`
    /// answer from the device is a signal to query the changes, never an
    /// error.
    pub fn get_device_composition_changes(
        &self,
        id: DisplayId,
    ) -> Result<Option<DeviceRequestedChanges>> {
        let record = self.record(id)?;
        if !record.is_connected() {
            return Ok(None);
        }
        let hwc_id = record.hwc_id();

        let mut frame = record.frame();
        frame.validate_was_skipped = false;

        let mut accept_changes = true;
        if self.config.skip_validate {
            let outcome = match self.composer.present_or_validate(hwc_id) {
                Ok(outcome) => outcome,
                Err(HalError::HasChanges) => PresentOrValidate {
                    state: PresentOrValidateState::OnlyValidated,
                    present_fence: Fence::NO_FENCE,
                },
                Err(code) => {
                    log_hwc_error("presentOrValidate", id, code);
                    return Err(Error::device("presentOrValidate", id, code));
                }
            };
            debug!(display = %id, state = ?outcome.state, "presentOrValidate");

            if outcome.state.is_committed() {
                let (fences, present_error) = match self.composer.get_release_fences(hwc_id) {
                    Ok(fences) => (fences, None),
                    Err(code) => (HashMap::new(), Some(code)),
                };
                frame.release_fences = fences;
                frame.last_present_fence = outcome.present_fence;
                frame.validate_was_skipped = true;
                frame.present_error = present_error;
            }

            if outcome.state == PresentOrValidateState::CommittedNoChanges {
                debug!(display = %id, "Skip validate succeeded");
                return Ok(None);
            }
            // The frame is already on screen, so a lost release fence set
            // aborts the change query.
            if let Some(code) = frame.present_error {
                log_hwc_error("validate", id, code);
                return Err(Error::device("validate", id, code));
            }
            accept_changes = outcome.state.accepts_changes_implicitly();
        } else {
            match self.composer.validate(hwc_id) {
                Ok(()) | Err(HalError::HasChanges) => {}
                Err(code) => {
                    log_hwc_error("validate", id, code);
                    return Err(Error::device("validate", id, code));
                }
            }
        }
        drop(frame);

        let changed_types = device_call(
            "getChangedCompositionTypes",
            id,
            self.composer.get_changed_composition_types(hwc_id),
        )?;
        let requests = device_call(
            "getRequests",
            id,
            self.composer.get_display_requests(hwc_id),
        )?;
        let client_target_property = self
            .composer
            .get_client_target_property(hwc_id)
            .unwrap_or_else(|code| {
                debug!(display = %id, %code, "No client target property");
                ClientTargetProperty::default()
            });

        let changes = DeviceRequestedChanges {
            changed_types,
            display_requests: requests.display_requests,
            layer_requests: requests.layer_requests,
            client_target_property,
        };

        if accept_changes {
            device_call(
                "acceptChanges",
                id,
                self.composer.accept_display_changes(hwc_id),
            )?;
        }

        Ok(Some(changes))
    }

    /// Present the frame, or only flush queued commands when the device
    /// already committed it during negotiation.
    ///
    /// When presenting, waits until `earliest_present_time` unless the
    /// previous frame's present fence is still pending.
    pub fn present_and_get_release_fences(
        &self,
        id: DisplayId,
        earliest_present_time: Instant,
        previous_present_fence: &Fence,
    ) -> Result<()> {
        let record = self.record(id)?;
        let hwc_id = record.hwc_id();
        let mut frame = record.frame();

        if frame.validate_was_skipped {
            frame.validate_was_skipped = false;
            device_call("executeCommands", id, self.composer.execute_commands())?;
            if let Some(code) = frame.present_error.take() {
                log_hwc_error("present", id, code);
                return Err(Error::device("present", id, code));
            }
            return Ok(());
        }

        frame.last_present_fence = Fence::NO_FENCE;
        if !previous_present_fence.is_pending() {
            let now = Instant::now();
            if earliest_present_time > now {
                trace!(display = %id, "Waiting for earliest present time");
                thread::sleep(earliest_present_time - now);
            }
        }

        frame.last_present_fence = device_call("present", id, self.composer.present(hwc_id))?;
        frame.release_fences = device_call(
            "getReleaseFences",
            id,
            self.composer.get_release_fences(hwc_id),
        )?;
        Ok(())
    }

    /// Hand the device the client-composited target. Ignored when the frame
    /// was already committed by skip-validate.
    pub fn set_client_target(
        &self,
        id: DisplayId,
        slot: u32,
        acquire_fence: &Fence,
        target: Option<BufferHandle>,
        dataspace: Dataspace,
    ) -> Result<()> {
        let record = self.record(id)?;
        if record.validate_was_skipped() {
            return Ok(());
        }
        debug!(display = %id, slot, "setClientTarget");
        device_call(
            "setClientTarget",
            id,
            self.composer
                .set_client_target(record.hwc_id(), slot, target, acquire_fence, dataspace),
        )
    }

    pub fn get_present_fence(&self, id: DisplayId) -> Fence {
        match self.record(id) {
            Ok(record) => record.frame().last_present_fence.clone(),
            Err(_) => Fence::NO_FENCE,
        }
    }

    /// Placeholder fence for layers absent from the last recorded set
    pub fn get_layer_release_fence(&self, id: DisplayId, layer: LayerId) -> Fence {
        let Ok(record) = self.record(id) else {
            return Fence::NO_FENCE;
        };
        let frame = record.frame();
        match frame.release_fences.get(&layer) {
            Some(fence) => fence.clone(),
            None => {
                trace!(display = %id, %layer, "Release fence not found");
                Fence::NO_FENCE
            }
        }
    }

    pub fn record_release_fences(
        &self,
        id: DisplayId,
        fences: HashMap<LayerId, Fence>,
    ) -> Result<()> {
        let record = self.record(id)?;
        record.frame().release_fences = fences;
        Ok(())
    }

    pub fn clear_release_fences(&self, id: DisplayId) -> Result<()> {
        let record = self.record(id)?;
        record.frame().release_fences.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::composer::DisplayRequests;
    use crate::config::HwcConfig;
    use crate::display_id::PhysicalDisplayId;
    use crate::fence::SignalTime;
    use crate::hal::Connection;
    use crate::sim::{SimComposer, SimDisplay};

    const HWC_ID: u64 = 1;

    fn setup(config: HwcConfig) -> (Arc<SimComposer>, HwComposer, DisplayId) {
        let sim = Arc::new(SimComposer::new());
        sim.add_display(HWC_ID, SimDisplay::default());
        let hwc = HwComposer::new(sim.clone(), config);
        let info = hwc.on_hotplug(HWC_ID, Connection::Connected).unwrap();
        sim.clear_calls();
        (sim, hwc, info.id.into())
    }

    fn one_client_layer() -> HashMap<LayerId, Composition> {
        [(LayerId(7), Composition::Client)].into_iter().collect()
    }

    #[test]
    fn test_committed_no_changes_skips_present() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        let release = Fence::signaled(500);
        sim.set_release_fences(HWC_ID, [(LayerId(3), release.clone())].into_iter().collect());
        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::CommittedNoChanges));

        let changes = hwc.get_device_composition_changes(id).unwrap();
        assert!(changes.is_none());
        assert_eq!(sim.count_calls("getChangedCompositionTypes"), 0);
        assert_eq!(sim.count_calls("acceptDisplayChanges"), 0);

        let present_fence = hwc.get_present_fence(id);
        assert!(present_fence.is_valid());
        assert!(hwc.get_layer_release_fence(id, LayerId(3)).same_as(&release));

        hwc.present_and_get_release_fences(id, Instant::now(), &Fence::NO_FENCE)
            .unwrap();
        assert_eq!(sim.count_calls("executeCommands"), 1);
        assert_eq!(sim.count_calls("present"), 0);
        assert!(hwc.get_present_fence(id).same_as(&present_fence));
    }

    #[test]
    fn test_only_validated_queries_and_accepts() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        sim.set_changed_types(HWC_ID, one_client_layer());
        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::OnlyValidated));

        let changes = hwc.get_device_composition_changes(id).unwrap().unwrap();
        assert_eq!(changes.changed_types, one_client_layer());
        assert_eq!(sim.count_calls("acceptDisplayChanges"), 1);
        assert!(!hwc.get_present_fence(id).is_valid());

        hwc.present_and_get_release_fences(id, Instant::now(), &Fence::NO_FENCE)
            .unwrap();
        assert_eq!(sim.count_calls("present"), 1);
        assert!(hwc.get_present_fence(id).is_valid());
    }

    #[test]
    fn test_committed_with_changes_defers_acceptance() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        sim.set_changed_types(HWC_ID, one_client_layer());
        sim.set_display_requests(
            HWC_ID,
            DisplayRequests {
                display_requests: DisplayRequest::FLIP_CLIENT_TARGET,
                layer_requests: [(LayerId(7), LayerRequest::CLEAR_CLIENT_TARGET)]
                    .into_iter()
                    .collect(),
            },
        );
        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::CommittedWithChanges));

        let changes = hwc.get_device_composition_changes(id).unwrap().unwrap();
        assert_eq!(changes.changed_types.len(), 1);
        assert!(changes
            .display_requests
            .contains(DisplayRequest::FLIP_CLIENT_TARGET));
        assert_eq!(changes.layer_requests.len(), 1);
        assert_eq!(sim.count_calls("acceptDisplayChanges"), 0);

        let record = hwc.record(id).unwrap();
        assert!(record.validate_was_skipped());
        assert!(hwc.get_present_fence(id).is_valid());

        hwc.present_and_get_release_fences(id, Instant::now(), &Fence::NO_FENCE)
            .unwrap();
        assert_eq!(sim.count_calls("present"), 0);
        assert_eq!(sim.count_calls("executeCommands"), 1);
    }

    #[test]
    fn test_has_changes_is_not_an_error() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        sim.set_changed_types(HWC_ID, one_client_layer());
        sim.push_present_or_validate(HWC_ID, Err(HalError::HasChanges));

        let changes = hwc.get_device_composition_changes(id).unwrap().unwrap();
        assert_eq!(changes.changed_types, one_client_layer());
        assert_eq!(sim.count_calls("acceptDisplayChanges"), 1);
    }

    #[test]
    fn test_device_error_names_operation() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        sim.push_present_or_validate(HWC_ID, Err(HalError::NoResources));

        let err = hwc.get_device_composition_changes(id).unwrap_err();
        match err {
            Error::Device {
                operation, code, ..
            } => {
                assert_eq!(operation, "presentOrValidate");
                assert_eq!(code, HalError::NoResources);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sim.count_calls("getChangedCompositionTypes"), 0);
    }

    #[test]
    fn test_validate_path_when_skip_disabled() {
        let config = HwcConfig {
            skip_validate: false,
            ..HwcConfig::default()
        };
        let (sim, hwc, id) = setup(config);
        sim.set_changed_types(HWC_ID, one_client_layer());
        sim.fail_next("validate", HalError::HasChanges);

        let changes = hwc.get_device_composition_changes(id).unwrap().unwrap();
        assert_eq!(changes.changed_types.len(), 1);
        assert_eq!(sim.count_calls("presentOrValidate"), 0);
        assert_eq!(sim.count_calls("validate"), 1);
        assert_eq!(sim.count_calls("acceptDisplayChanges"), 1);

        sim.fail_next("validate", HalError::BadLayer);
        let err = hwc.get_device_composition_changes(id).unwrap_err();
        assert_eq!(err.hal_code(), Some(HalError::BadLayer));
    }

    #[test]
    fn test_release_fence_error_surfaces_on_flush() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::CommittedNoChanges));
        sim.fail_next("getReleaseFences", HalError::BadDisplay);

        assert!(hwc.get_device_composition_changes(id).unwrap().is_none());
        let err = hwc
            .present_and_get_release_fences(id, Instant::now(), &Fence::NO_FENCE)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Device { ref operation, code: HalError::BadDisplay, .. } if operation == "present"
        ));
    }

    #[test]
    fn test_release_fence_error_aborts_committed_changes() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        sim.set_changed_types(HWC_ID, one_client_layer());
        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::CommittedWithChanges));
        sim.fail_next("getReleaseFences", HalError::BadDisplay);

        let err = hwc.get_device_composition_changes(id).unwrap_err();
        assert!(matches!(
            err,
            Error::Device { ref operation, code: HalError::BadDisplay, .. } if operation == "validate"
        ));
        assert_eq!(sim.count_calls("getChangedCompositionTypes"), 0);
        assert_eq!(sim.count_calls("acceptDisplayChanges"), 0);

        let record = hwc.record(id).unwrap();
        assert!(record.validate_was_skipped());
        assert!(hwc.get_present_fence(id).is_valid());
    }

    #[test]
    fn test_disconnected_display_negotiates_nothing() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        hwc.on_hotplug(HWC_ID, Connection::Disconnected).unwrap();
        sim.clear_calls();

        assert!(hwc.get_device_composition_changes(id).unwrap().is_none());
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_unknown_layer_gets_placeholder() {
        let (_sim, hwc, id) = setup(HwcConfig::default());
        let fence = hwc.get_layer_release_fence(id, LayerId(99));
        assert!(!fence.is_valid());
        assert_eq!(fence.signal_time(), SignalTime::Invalid);

        let unknown = DisplayId::from(PhysicalDisplayId::from_port(9));
        assert!(!hwc.get_present_fence(unknown).is_valid());
        assert!(!hwc.get_layer_release_fence(unknown, LayerId(1)).is_valid());
    }

    #[test]
    fn test_release_fences_outlive_present() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        let first = Fence::pending();
        sim.set_release_fences(HWC_ID, [(LayerId(1), first.clone())].into_iter().collect());
        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::OnlyValidated));

        hwc.get_device_composition_changes(id).unwrap();
        hwc.present_and_get_release_fences(id, Instant::now(), &Fence::NO_FENCE)
            .unwrap();
        assert!(hwc.get_layer_release_fence(id, LayerId(1)).same_as(&first));
        assert!(hwc.get_layer_release_fence(id, LayerId(1)).same_as(&first));

        let second = Fence::signaled(42);
        hwc.record_release_fences(id, [(LayerId(2), second.clone())].into_iter().collect())
            .unwrap();
        assert!(!hwc.get_layer_release_fence(id, LayerId(1)).is_valid());
        assert!(hwc.get_layer_release_fence(id, LayerId(2)).same_as(&second));

        hwc.clear_release_fences(id).unwrap();
        assert!(!hwc.get_layer_release_fence(id, LayerId(2)).is_valid());
    }

    #[test]
    fn test_pacing_waits_only_after_signaled_frame() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        let pending = Fence::pending();
        let target = Duration::from_millis(40);

        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::OnlyValidated));
        hwc.get_device_composition_changes(id).unwrap();
        let start = Instant::now();
        hwc.present_and_get_release_fences(id, start + Duration::from_secs(5), &pending)
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));

        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::OnlyValidated));
        hwc.get_device_composition_changes(id).unwrap();
        let start = Instant::now();
        hwc.present_and_get_release_fences(id, start + target, &Fence::signaled(1))
            .unwrap();
        assert!(start.elapsed() >= target);
    }

    #[test]
    fn test_client_target_ignored_after_skip() {
        let (sim, hwc, id) = setup(HwcConfig::default());
        sim.push_present_or_validate(HWC_ID, Ok(PresentOrValidateState::CommittedNoChanges));
        hwc.get_device_composition_changes(id).unwrap();

        hwc.set_client_target(id, 0, &Fence::NO_FENCE, Some(BufferHandle(1)), Dataspace::SRGB)
            .unwrap();
        assert_eq!(sim.count_calls("setClientTarget"), 0);

        hwc.present_and_get_release_fences(id, Instant::now(), &Fence::NO_FENCE)
            .unwrap();
        hwc.set_client_target(id, 0, &Fence::NO_FENCE, Some(BufferHandle(1)), Dataspace::SRGB)
            .unwrap();
        assert_eq!(sim.count_calls("setClientTarget"), 1);
    }
}
