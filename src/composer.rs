//! Composition device client interface
//!
//! [`Composer`] is the synchronous client for the composition device. The
//! transport that marshals these calls (HIDL/AIDL, libhybris, a test double)
//! lives behind the trait; every call returns either its output or a
//! [`HalError`].
//!
//! Device notifications arrive on the device's own thread through
//! [`HalCallback`]. [`CallbackBridge`] adapts them to the host-facing
//! [`ComposerCallback`], dropping whichever vsync variant is inactive for the
//! device's composer version.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::fence::Fence;
use crate::hal::{
    Attribute, BufferHandle, Capability, ClientTargetProperty, ColorMode, ColorTransform,
    Composition, Connection, ContentSamplingAttributes, ContentType, Dataspace,
    DisplayCapability, DisplayConnectionType, DisplayRequest, DisplayedFrameStats, HalResult,
    HdrCapabilities, HwcConfigId, HwcDisplayId, LayerGenericMetadataKey, LayerId, LayerRequest,
    Nsecs, PixelFormat, PowerMode, PresentOrValidateState, RenderIntent, Vsync,
    VsyncPeriodChangeConstraints, VsyncPeriodChangeTimeline, VsyncPeriodNanos,
};
use crate::identification::DisplayIdentificationData;

/// Output of a combined present-or-validate call
#[derive(Debug, Clone)]
pub struct PresentOrValidate {
    pub state: PresentOrValidateState,
    /// Meaningful only when `state` is committed.
    pub present_fence: Fence,
}

/// Output of a successful virtual display creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualDisplay {
    pub display: HwcDisplayId,
    /// The device may pick a different format than requested.
    pub format: PixelFormat,
}

/// Display and layer requests returned after validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayRequests {
    pub display_requests: DisplayRequest,
    pub layer_requests: HashMap<LayerId, LayerRequest>,
}

/// Synchronous client for the composition device
pub trait Composer: Send + Sync {
    fn get_capabilities(&self) -> Vec<Capability>;
    fn get_layer_generic_metadata_keys(&self) -> HalResult<Vec<LayerGenericMetadataKey>>;
    fn is_vsync_period_switch_supported(&self) -> bool;
    fn register_callback(&self, callback: Arc<dyn HalCallback>);
    fn get_max_virtual_display_count(&self) -> u32;
    fn execute_commands(&self) -> HalResult<()>;
    fn dump_debug_info(&self) -> String;

    // Display lifecycle
    fn create_virtual_display(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        mirror: Option<HwcDisplayId>,
    ) -> HalResult<VirtualDisplay>;
    fn destroy_virtual_display(&self, display: HwcDisplayId) -> HalResult<()>;
    fn get_display_identification_data(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<DisplayIdentificationData>;
    fn get_display_capabilities(&self, display: HwcDisplayId)
        -> HalResult<Vec<DisplayCapability>>;
    fn get_display_connection_type(&self, display: HwcDisplayId)
        -> HalResult<DisplayConnectionType>;

    // Modes
    fn get_display_attribute(
        &self,
        display: HwcDisplayId,
        config: HwcConfigId,
        attribute: Attribute,
    ) -> HalResult<i32>;
    fn get_display_configs(&self, display: HwcDisplayId) -> HalResult<Vec<HwcConfigId>>;
    fn get_active_config(&self, display: HwcDisplayId) -> HalResult<HwcConfigId>;
    fn get_display_vsync_period(&self, display: HwcDisplayId) -> HalResult<VsyncPeriodNanos>;
    fn set_active_config_with_constraints(
        &self,
        display: HwcDisplayId,
        config: HwcConfigId,
        constraints: &VsyncPeriodChangeConstraints,
    ) -> HalResult<VsyncPeriodChangeTimeline>;

    // Layers
    fn create_layer(&self, display: HwcDisplayId) -> HalResult<LayerId>;
    fn destroy_layer(&self, display: HwcDisplayId, layer: LayerId) -> HalResult<()>;

    // Color
    fn get_color_modes(&self, display: HwcDisplayId) -> HalResult<Vec<ColorMode>>;
    fn set_color_mode(
        &self,
        display: HwcDisplayId,
        mode: ColorMode,
        intent: RenderIntent,
    ) -> HalResult<()>;
    fn get_render_intents(
        &self,
        display: HwcDisplayId,
        mode: ColorMode,
    ) -> HalResult<Vec<RenderIntent>>;
    fn get_dataspace_saturation_matrix(
        &self,
        display: HwcDisplayId,
        dataspace: Dataspace,
    ) -> HalResult<[f32; 16]>;
    fn set_color_transform(
        &self,
        display: HwcDisplayId,
        matrix: &[f32; 16],
        hint: ColorTransform,
    ) -> HalResult<()>;

    // Frame pipeline
    fn set_client_target(
        &self,
        display: HwcDisplayId,
        slot: u32,
        target: Option<BufferHandle>,
        acquire_fence: &Fence,
        dataspace: Dataspace,
    ) -> HalResult<()>;
    fn set_output_buffer(
        &self,
        display: HwcDisplayId,
        buffer: BufferHandle,
        release_fence: &Fence,
    ) -> HalResult<()>;
    /// `Err(HasChanges)` means validation succeeded with composition changes.
    fn validate(&self, display: HwcDisplayId) -> HalResult<()>;
    /// `Err(HasChanges)` means validated-only with composition changes.
    fn present_or_validate(&self, display: HwcDisplayId) -> HalResult<PresentOrValidate>;
    fn present(&self, display: HwcDisplayId) -> HalResult<Fence>;
    fn get_changed_composition_types(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<HashMap<LayerId, Composition>>;
    fn get_display_requests(&self, display: HwcDisplayId) -> HalResult<DisplayRequests>;
    fn get_client_target_property(&self, display: HwcDisplayId)
        -> HalResult<ClientTargetProperty>;
    fn accept_display_changes(&self, display: HwcDisplayId) -> HalResult<()>;
    fn get_release_fences(&self, display: HwcDisplayId) -> HalResult<HashMap<LayerId, Fence>>;

    // Power, vsync, brightness
    fn set_vsync_enabled(&self, display: HwcDisplayId, enabled: Vsync) -> HalResult<()>;
    fn get_doze_support(&self, display: HwcDisplayId) -> HalResult<bool>;
    fn set_power_mode(&self, display: HwcDisplayId, mode: PowerMode) -> HalResult<()>;
    fn set_display_brightness(&self, display: HwcDisplayId, brightness: f32) -> HalResult<()>;

    // HDR, sampling, content
    fn get_hdr_capabilities(&self, display: HwcDisplayId) -> HalResult<HdrCapabilities>;
    fn get_supported_per_frame_metadata(&self, display: HwcDisplayId) -> HalResult<i32>;
    fn get_displayed_content_sampling_attributes(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<ContentSamplingAttributes>;
    fn set_displayed_content_sampling_enabled(
        &self,
        display: HwcDisplayId,
        enabled: bool,
        component_mask: u8,
        max_frames: u64,
    ) -> HalResult<()>;
    fn get_displayed_content_sample(
        &self,
        display: HwcDisplayId,
        max_frames: u64,
        timestamp: u64,
    ) -> HalResult<DisplayedFrameStats>;
    fn set_auto_low_latency_mode(&self, display: HwcDisplayId, on: bool) -> HalResult<()>;
    fn get_supported_content_types(&self, display: HwcDisplayId) -> HalResult<Vec<ContentType>>;
    fn set_content_type(&self, display: HwcDisplayId, content_type: ContentType)
        -> HalResult<()>;
    fn set_display_elapse_time(&self, display: HwcDisplayId, timestamp: u64) -> HalResult<()>;
}

/// Raw notifications from the device, one method per HAL callback
pub trait HalCallback: Send + Sync {
    fn on_hotplug(&self, display: HwcDisplayId, connection: Connection);
    fn on_refresh(&self, display: HwcDisplayId);
    /// Composer <= 2.3 vsync
    fn on_vsync(&self, display: HwcDisplayId, timestamp: Nsecs);
    /// Composer >= 2.4 vsync
    fn on_vsync_2_4(&self, display: HwcDisplayId, timestamp: Nsecs, period: VsyncPeriodNanos);
    fn on_vsync_period_timing_changed(
        &self,
        display: HwcDisplayId,
        timeline: &VsyncPeriodChangeTimeline,
    );
    fn on_seamless_possible(&self, display: HwcDisplayId);
}

/// Host compositor side of the device callbacks
pub trait ComposerCallback: Send + Sync {
    fn on_composer_hal_hotplug(&self, display: HwcDisplayId, connection: Connection);
    fn on_composer_hal_refresh(&self, display: HwcDisplayId);
    fn on_composer_hal_vsync(
        &self,
        display: HwcDisplayId,
        timestamp: Nsecs,
        period: Option<VsyncPeriodNanos>,
    );
    fn on_composer_hal_vsync_period_timing_changed(
        &self,
        display: HwcDisplayId,
        timeline: &VsyncPeriodChangeTimeline,
    );
    fn on_composer_hal_seamless_possible(&self, display: HwcDisplayId);
}

/// Forwards device callbacks to the host, keeping only the vsync variant
/// that matches the device's period-switching support.
pub struct CallbackBridge {
    callback: Arc<dyn ComposerCallback>,
    vsync_switching_supported: bool,
}

impl CallbackBridge {
    pub fn new(callback: Arc<dyn ComposerCallback>, vsync_switching_supported: bool) -> Self {
        Self {
            callback,
            vsync_switching_supported,
        }
    }
}

impl fmt::Debug for CallbackBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBridge")
            .field("vsync_switching_supported", &self.vsync_switching_supported)
            .finish_non_exhaustive()
    }
}

impl HalCallback for CallbackBridge {
    fn on_hotplug(&self, display: HwcDisplayId, connection: Connection) {
        self.callback.on_composer_hal_hotplug(display, connection);
    }

    fn on_refresh(&self, display: HwcDisplayId) {
        self.callback.on_composer_hal_refresh(display);
    }

    fn on_vsync(&self, hwc_display: HwcDisplayId, timestamp: Nsecs) {
        if self.vsync_switching_supported {
            warn!(hwc_display, "Unexpected onVsync callback on composer >= 2.4, ignoring");
            return;
        }
        self.callback.on_composer_hal_vsync(hwc_display, timestamp, None);
    }

    fn on_vsync_2_4(&self, hwc_display: HwcDisplayId, timestamp: Nsecs, period: VsyncPeriodNanos) {
        if !self.vsync_switching_supported {
            warn!(hwc_display, "Unexpected onVsync_2_4 callback on composer <= 2.3, ignoring");
            return;
        }
        self.callback
            .on_composer_hal_vsync(hwc_display, timestamp, Some(period));
    }

    fn on_vsync_period_timing_changed(
        &self,
        display: HwcDisplayId,
        timeline: &VsyncPeriodChangeTimeline,
    ) {
        self.callback
            .on_composer_hal_vsync_period_timing_changed(display, timeline);
    }

    fn on_seamless_possible(&self, display: HwcDisplayId) {
        self.callback.on_composer_hal_seamless_possible(display);
    }
}
