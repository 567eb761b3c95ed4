//! The composer coordinator
//!
//! [`HwComposer`] sits between the host compositor and a [`Composer`]
//! client. This file holds construction, display lookups, lifecycle and the
//! plain query/setter pass-throughs. Hotplug handling lives in `hotplug.rs`,
//! the per-frame negotiation and fences in `present.rs`, vsync and power in
//! `vsync.rs`.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::composer::{CallbackBridge, Composer, ComposerCallback};
use crate::config::HwcConfig;
use crate::display_id::{DisplayId, HalVirtualDisplayId, PhysicalDisplayId};
use crate::fence::Fence;
use crate::hal::{
    Attribute, BufferHandle, Capability, ColorMode, ColorTransform, ContentSamplingAttributes,
    ContentType, Dataspace, DisplayCapability, DisplayConnectionType, DisplayedFrameStats,
    HalError, HalResult, HdrCapabilities, HwcConfigId, HwcDisplayId, LayerId, Nsecs, PixelFormat,
    RenderIntent,
};
use crate::registry::{DisplayRecord, DisplayRegistry, DisplayRoles};
use crate::{Error, Result};

const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// One display config with its attributes; -1 marks an attribute the device
/// failed to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwcDisplayMode {
    pub hwc_id: HwcConfigId,
    pub width: i32,
    pub height: i32,
    pub vsync_period: i32,
    pub dpi_x: i32,
    pub dpi_y: i32,
    pub config_group: i32,
}

/// A virtual display the device agreed to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedVirtualDisplay {
    pub id: HalVirtualDisplayId,
    pub format: PixelFormat,
}

pub(crate) fn log_hwc_error(operation: &str, display_id: DisplayId, code: HalError) {
    error!(operation, display = %display_id, %code, "Device call failed");
}

/// Log a failed device call and keep its code verbatim
pub(crate) fn device_call<T>(
    operation: &str,
    display: DisplayId,
    result: HalResult<T>,
) -> Result<T> {
    result.map_err(|code| {
        log_hwc_error(operation, display, code);
        Error::device(operation, display, code)
    })
}

/// Log a failed device call, surfacing unsupported/bad-parameter/bad-config
/// as their own error kinds
pub(crate) fn mapped_device_call<T>(
    operation: &str,
    display: DisplayId,
    result: HalResult<T>,
) -> Result<T> {
    result.map_err(|code| {
        log_hwc_error(operation, display, code);
        Error::from_hal(operation, display, code)
    })
}

/// Coordinates displays, frames and fences for one composition device
pub struct HwComposer {
    pub(crate) composer: Arc<dyn Composer>,
    pub(crate) config: HwcConfig,
    capabilities: HashSet<Capability>,
    supported_layer_generic_metadata: HashMap<String, bool>,
    registered_callback: AtomicBool,
    pub(crate) registry: RwLock<DisplayRegistry>,
}

impl HwComposer {
    /// Wrap a device client. Device capabilities and layer metadata keys are
    /// read here, once.
    pub fn new(composer: Arc<dyn Composer>, config: HwcConfig) -> Self {
        info!(
            service = %config.composer_service_name,
            "Creating HwComposer"
        );

        let capabilities: HashSet<Capability> = composer.get_capabilities().into_iter().collect();
        debug!(?capabilities, "Loaded composer capabilities");

        let supported_layer_generic_metadata = match composer.get_layer_generic_metadata_keys() {
            Ok(keys) => keys.into_iter().map(|k| (k.name, k.mandatory)).collect(),
            Err(HalError::Unsupported) => HashMap::new(),
            Err(code) => {
                error!(%code, "getLayerGenericMetadataKeys failed");
                HashMap::new()
            }
        };

        Self {
            composer,
            config,
            capabilities,
            supported_layer_generic_metadata,
            registered_callback: AtomicBool::new(false),
            registry: RwLock::new(DisplayRegistry::new()),
        }
    }

    pub fn config(&self) -> &HwcConfig {
        &self.config
    }

    /// Register the host callback with the device. Only the first call has
    /// any effect.
    pub fn set_callback(&self, callback: Arc<dyn ComposerCallback>) {
        if self.registered_callback.swap(true, Ordering::AcqRel) {
            warn!("Callback already registered. Ignored extra registration attempt.");
            return;
        }
        let bridge = CallbackBridge::new(callback, self.composer.is_vsync_period_switch_supported());
        self.composer.register_callback(Arc::new(bridge));
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_display_capability(&self, id: DisplayId, capability: DisplayCapability) -> bool {
        let Ok(record) = self.record(id) else {
            return false;
        };
        device_call(
            "getDisplayCapabilities",
            id,
            self.composer.get_display_capabilities(record.hwc_id()),
        )
        .map(|caps| caps.contains(&capability))
        .unwrap_or(false)
    }

    pub fn get_supported_layer_generic_metadata(&self) -> &HashMap<String, bool> {
        &self.supported_layer_generic_metadata
    }

    /// Look up a record, logging unknown IDs
    pub(crate) fn record(&self, id: DisplayId) -> Result<Arc<DisplayRecord>> {
        self.registry.read().get(id).ok_or_else(|| {
            error!(display = %id, "Invalid display");
            Error::InvalidDisplay(id)
        })
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub fn to_physical_display_id(&self, hwc_id: HwcDisplayId) -> Option<PhysicalDisplayId> {
        self.registry.read().resolve(hwc_id)
    }

    pub fn from_physical_display_id(&self, id: PhysicalDisplayId) -> Option<HwcDisplayId> {
        self.registry
            .read()
            .get(id.into())
            .filter(|record| !record.is_virtual())
            .map(|record| record.hwc_id())
    }

    pub fn from_virtual_display_id(&self, id: HalVirtualDisplayId) -> Option<HwcDisplayId> {
        self.registry
            .read()
            .get(id.into())
            .filter(|record| record.is_virtual())
            .map(|record| record.hwc_id())
    }

    pub fn is_connected(&self, id: DisplayId) -> bool {
        self.registry.read().is_connected(id)
    }

    pub fn internal_hwc_display_id(&self) -> Option<HwcDisplayId> {
        self.registry.read().roles().internal
    }

    pub fn external_hwc_display_id(&self) -> Option<HwcDisplayId> {
        self.registry.read().roles().external
    }

    pub fn max_virtual_display_count(&self) -> u32 {
        self.composer.get_max_virtual_display_count()
    }

    pub fn max_virtual_display_dimension(&self) -> u32 {
        self.config.max_virtual_display_dimension
    }

    /// Create a device-side virtual target and register it under a fresh
    /// identity. Resolution checks happen before any device call.
    pub fn allocate_virtual_display(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        mirror: Option<PhysicalDisplayId>,
    ) -> Result<AllocatedVirtualDisplay> {
        if width == 0 || height == 0 {
            error!(width, height, "allocateVirtualDisplay: Invalid resolution");
            return Err(Error::InvalidArgument(format!(
                "invalid resolution {}x{}",
                width, height
            )));
        }

        let max = self.config.max_virtual_display_dimension;
        if max > 0 && (width > max || height > max) {
            error!(
                width,
                height, max, "allocateVirtualDisplay: Resolution exceeds maximum dimension"
            );
            return Err(Error::InvalidArgument(format!(
                "resolution {}x{} exceeds maximum dimension {}",
                width, height, max
            )));
        }

        let max_count = self.composer.get_max_virtual_display_count();
        if max_count > 0 && self.registry.read().virtual_count() >= max_count as usize {
            error!(max_count, "allocateVirtualDisplay: No virtual display slots left");
            return Err(Error::NoResources(format!(
                "all {} virtual displays in use",
                max_count
            )));
        }

        let hwc_mirror = mirror.and_then(|id| {
            let hwc_id = self.from_physical_display_id(id);
            if hwc_id.is_none() {
                warn!(mirror = %id, "Mirror source is not a known physical display");
            }
            hwc_id
        });

        let id = self.registry.write().next_virtual_id();
        let created = device_call(
            "createVirtualDisplay",
            id.into(),
            self.composer
                .create_virtual_display(width, height, format, hwc_mirror),
        )?;

        self.registry.write().bind_virtual(id, created.display);
        info!(display = %id, hwc_id = created.display, width, height, "Allocated virtual display");

        Ok(AllocatedVirtualDisplay {
            id,
            format: created.format,
        })
    }

    /// Bind a hotplugged device handle to its resolved identity
    pub fn allocate_physical_display(&self, hwc_id: HwcDisplayId, id: PhysicalDisplayId) {
        self.registry.write().bind_physical(hwc_id, id);
        info!(display = %id, hwc_id, "Allocated physical display");
    }

    /// Tear a display down. Role slots it held are cleared, not refilled;
    /// see [`HwComposer::reassign_display_roles`].
    pub fn destroy_display(&self, id: DisplayId) -> Result<()> {
        let removed = self.registry.write().remove(id);
        let Some(record) = removed else {
            error!(display = %id, "Invalid display");
            return Err(Error::InvalidDisplay(id));
        };

        if record.is_virtual() {
            if let Err(code) = self.composer.destroy_virtual_display(record.hwc_id()) {
                log_hwc_error("destroyVirtualDisplay", id, code);
            }
        }
        info!(display = %id, hwc_id = record.hwc_id(), "Destroyed display");
        Ok(())
    }

    pub fn reassign_display_roles(&self) -> DisplayRoles {
        self.registry.write().reassign_roles()
    }

    // ------------------------------------------------------------------
    // Layers
    // ------------------------------------------------------------------

    pub fn create_layer(&self, id: DisplayId) -> Result<LayerId> {
        let record = self.record(id)?;
        device_call("createLayer", id, self.composer.create_layer(record.hwc_id()))
    }

    pub fn destroy_layer(&self, id: DisplayId, layer: LayerId) -> Result<()> {
        let record = self.record(id)?;
        device_call(
            "destroyLayer",
            id,
            self.composer.destroy_layer(record.hwc_id(), layer),
        )?;
        record.frame().release_fences.remove(&layer);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    fn get_attribute(
        &self,
        id: DisplayId,
        hwc_id: HwcDisplayId,
        config: HwcConfigId,
        attribute: Attribute,
    ) -> i32 {
        device_call(
            "getDisplayAttribute",
            id,
            self.composer.get_display_attribute(hwc_id, config, attribute),
        )
        .unwrap_or(-1)
    }

    pub fn get_modes(&self, id: PhysicalDisplayId) -> Vec<HwcDisplayMode> {
        let display = DisplayId::from(id);
        let Ok(record) = self.record(display) else {
            return Vec::new();
        };
        let hwc_id = record.hwc_id();

        let Ok(configs) = device_call(
            "getDisplayConfigs",
            display,
            self.composer.get_display_configs(hwc_id),
        ) else {
            return Vec::new();
        };

        configs
            .into_iter()
            .map(|config| HwcDisplayMode {
                hwc_id: config,
                width: self.get_attribute(display, hwc_id, config, Attribute::Width),
                height: self.get_attribute(display, hwc_id, config, Attribute::Height),
                vsync_period: self.get_attribute(display, hwc_id, config, Attribute::VsyncPeriod),
                dpi_x: self.get_attribute(display, hwc_id, config, Attribute::DpiX),
                dpi_y: self.get_attribute(display, hwc_id, config, Attribute::DpiY),
                config_group: self.get_attribute(display, hwc_id, config, Attribute::ConfigGroup),
            })
            .collect()
    }

    pub fn get_active_mode(&self, id: PhysicalDisplayId) -> Option<HwcConfigId> {
        let record = self.record(id.into()).ok()?;
        match self.composer.get_active_config(record.hwc_id()) {
            Ok(config) => Some(config),
            Err(HalError::BadConfig) => {
                error!(display = %id, "No active mode");
                None
            }
            Err(code) => {
                log_hwc_error("getActiveConfig", id.into(), code);
                None
            }
        }
    }

    /// Falls back to the role slot when the device can't say
    pub fn get_display_connection_type(&self, id: PhysicalDisplayId) -> DisplayConnectionType {
        let Ok(record) = self.record(id.into()) else {
            return DisplayConnectionType::Internal;
        };

        match self.composer.get_display_connection_type(record.hwc_id()) {
            Ok(kind) => kind,
            Err(code) => {
                debug!(display = %id, %code, "getDisplayConnectionType failed");
                if self.internal_hwc_display_id() == Some(record.hwc_id()) {
                    DisplayConnectionType::Internal
                } else {
                    DisplayConnectionType::External
                }
            }
        }
    }

    pub fn is_vsync_period_switch_supported(&self, id: PhysicalDisplayId) -> bool {
        self.record(id.into()).is_ok() && self.composer.is_vsync_period_switch_supported()
    }

    pub fn get_display_vsync_period(&self, id: PhysicalDisplayId) -> Result<Nsecs> {
        let record = self.record(id.into())?;
        if !self.composer.is_vsync_period_switch_supported() {
            return Err(Error::InvalidOperation(
                "vsync period switching is not supported".to_string(),
            ));
        }
        let period = device_call(
            "getDisplayVsyncPeriod",
            id.into(),
            self.composer.get_display_vsync_period(record.hwc_id()),
        )?;
        Ok(Nsecs::from(period))
    }

    // ------------------------------------------------------------------
    // Color
    // ------------------------------------------------------------------

    pub fn get_color_modes(&self, id: PhysicalDisplayId) -> Vec<ColorMode> {
        let Ok(record) = self.record(id.into()) else {
            return Vec::new();
        };
        device_call(
            "getColorModes",
            id.into(),
            self.composer.get_color_modes(record.hwc_id()),
        )
        .unwrap_or_default()
    }

    pub fn set_active_color_mode(
        &self,
        id: PhysicalDisplayId,
        mode: ColorMode,
        intent: RenderIntent,
    ) -> Result<()> {
        let record = self.record(id.into())?;
        device_call(
            &format!("setColorMode({:?}, {:?})", mode, intent),
            id.into(),
            self.composer.set_color_mode(record.hwc_id(), mode, intent),
        )
    }

    pub fn get_render_intents(&self, id: DisplayId, mode: ColorMode) -> Vec<RenderIntent> {
        let Ok(record) = self.record(id) else {
            return Vec::new();
        };
        device_call(
            "getRenderIntents",
            id,
            self.composer.get_render_intents(record.hwc_id(), mode),
        )
        .unwrap_or_default()
    }

    /// Identity when the display is unknown or the device fails
    pub fn get_dataspace_saturation_matrix(&self, id: DisplayId, dataspace: Dataspace) -> [f32; 16] {
        let Ok(record) = self.record(id) else {
            return IDENTITY_MATRIX;
        };
        device_call(
            "getDataspaceSaturationMatrix",
            id,
            self.composer
                .get_dataspace_saturation_matrix(record.hwc_id(), dataspace),
        )
        .unwrap_or(IDENTITY_MATRIX)
    }

    pub fn set_color_transform(&self, id: DisplayId, matrix: &[f32; 16]) -> Result<()> {
        let record = self.record(id)?;
        let hint = if *matrix == IDENTITY_MATRIX {
            ColorTransform::Identity
        } else {
            ColorTransform::ArbitraryMatrix
        };
        device_call(
            "setColorTransform",
            id,
            self.composer.set_color_transform(record.hwc_id(), matrix, hint),
        )
    }

    // ------------------------------------------------------------------
    // HDR, sampling, brightness, content
    // ------------------------------------------------------------------

    pub fn get_hdr_capabilities(&self, id: DisplayId) -> Result<HdrCapabilities> {
        let record = self.record(id)?;
        device_call(
            "getHdrCapabilities",
            id,
            self.composer.get_hdr_capabilities(record.hwc_id()),
        )
    }

    pub fn get_supported_per_frame_metadata(&self, id: DisplayId) -> i32 {
        let Ok(record) = self.record(id) else {
            return 0;
        };
        device_call(
            "getSupportedPerFrameMetadata",
            id,
            self.composer.get_supported_per_frame_metadata(record.hwc_id()),
        )
        .unwrap_or(0)
    }

    pub fn get_displayed_content_sampling_attributes(
        &self,
        id: DisplayId,
    ) -> Result<ContentSamplingAttributes> {
        let record = self.record(id)?;
        mapped_device_call(
            "getDisplayedContentSamplingAttributes",
            id,
            self.composer
                .get_displayed_content_sampling_attributes(record.hwc_id()),
        )
    }

    pub fn set_display_content_sampling_enabled(
        &self,
        id: DisplayId,
        enabled: bool,
        component_mask: u8,
        max_frames: u64,
    ) -> Result<()> {
        let record = self.record(id)?;
        mapped_device_call(
            "setDisplayContentSamplingEnabled",
            id,
            self.composer.set_displayed_content_sampling_enabled(
                record.hwc_id(),
                enabled,
                component_mask,
                max_frames,
            ),
        )
    }

    pub fn get_displayed_content_sample(
        &self,
        id: DisplayId,
        max_frames: u64,
        timestamp: u64,
    ) -> Result<DisplayedFrameStats> {
        let record = self.record(id)?;
        device_call(
            "getDisplayedContentSample",
            id,
            self.composer
                .get_displayed_content_sample(record.hwc_id(), max_frames, timestamp),
        )
    }

    pub fn set_display_brightness(&self, id: PhysicalDisplayId, brightness: f32) -> Result<()> {
        let record = self.record(id.into())?;
        mapped_device_call(
            "setDisplayBrightness",
            id.into(),
            self.composer
                .set_display_brightness(record.hwc_id(), brightness),
        )
    }

    pub fn set_auto_low_latency_mode(&self, id: PhysicalDisplayId, on: bool) -> Result<()> {
        let record = self.record(id.into())?;
        mapped_device_call(
            "setAutoLowLatencyMode",
            id.into(),
            self.composer.set_auto_low_latency_mode(record.hwc_id(), on),
        )
    }

    pub fn get_supported_content_types(&self, id: PhysicalDisplayId) -> Result<Vec<ContentType>> {
        let record = self.record(id.into())?;
        device_call(
            "getSupportedContentTypes",
            id.into(),
            self.composer.get_supported_content_types(record.hwc_id()),
        )
    }

    pub fn set_content_type(&self, id: PhysicalDisplayId, content_type: ContentType) -> Result<()> {
        let record = self.record(id.into())?;
        mapped_device_call(
            "setContentType",
            id.into(),
            self.composer.set_content_type(record.hwc_id(), content_type),
        )
    }

    pub fn set_display_elapse_time(&self, id: DisplayId, timestamp: u64) -> Result<()> {
        let record = self.record(id)?;
        mapped_device_call(
            "setDisplayElapseTime",
            id,
            self.composer
                .set_display_elapse_time(record.hwc_id(), timestamp),
        )
    }

    /// Output buffer of a virtual display
    pub fn set_output_buffer(
        &self,
        id: HalVirtualDisplayId,
        acquire_fence: &Fence,
        buffer: BufferHandle,
    ) -> Result<()> {
        let record = self.record(id.into())?;
        assert!(
            record.is_virtual(),
            "set_output_buffer: Invalid operation on physical display with ID {}",
            id
        );
        device_call(
            "setOutputBuffer",
            id.into(),
            self.composer
                .set_output_buffer(record.hwc_id(), buffer, acquire_fence),
        )
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Registry summary followed by the device's own debug text
    pub fn dump(&self) -> String {
        let mut out = String::new();
        {
            let registry = self.registry.read();
            let roles = registry.roles();
            let mode = registry
                .multi_display_mode()
                .map_or("undecided", |m| m.name());
            let _ = writeln!(out, "HwComposer: multi-display mode {}", mode);
            let _ = writeln!(
                out,
                "  internal hwc display: {:?}, external hwc display: {:?}",
                roles.internal, roles.external
            );

            let mut records: Vec<_> = registry.records().cloned().collect();
            records.sort_by_key(|record| record.display_id());
            for record in records {
                let frame = record.frame();
                let _ = writeln!(
                    out,
                    "  {}: hwc={} connected={} virtual={} vsync={:?} validate_skipped={} release_fences={}",
                    record.display_id(),
                    record.hwc_id(),
                    record.is_connected(),
                    record.is_virtual(),
                    record.vsync_enabled(),
                    frame.validate_was_skipped,
                    frame.release_fences.len(),
                );
            }
        }
        out.push_str(&self.composer.dump_debug_info());
        out
    }
}

impl std::fmt::Debug for HwComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwComposer")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("registry", &*self.registry.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimComposer, SimDisplay};

    fn setup(config: HwcConfig) -> (Arc<SimComposer>, HwComposer) {
        let sim = Arc::new(SimComposer::new());
        let hwc = HwComposer::new(sim.clone(), config);
        (sim, hwc)
    }

    #[test]
    fn test_oversized_virtual_display_makes_no_device_call() {
        let config = HwcConfig {
            max_virtual_display_dimension: 1920,
            ..HwcConfig::default()
        };
        let (sim, hwc) = setup(config);
        sim.clear_calls();

        let err = hwc
            .allocate_virtual_display(3840, 1080, PixelFormat::RGBA_8888, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(sim.calls().is_empty());

        let err = hwc
            .allocate_virtual_display(0, 1080, PixelFormat::RGBA_8888, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_unbounded_virtual_dimension() {
        let (sim, hwc) = setup(HwcConfig::default());

        let allocated = hwc
            .allocate_virtual_display(7680, 4320, PixelFormat::RGBA_8888, None)
            .unwrap();
        assert_eq!(sim.count_calls("createVirtualDisplay"), 1);
        assert!(hwc.is_connected(allocated.id.into()));
        assert!(hwc.from_virtual_display_id(allocated.id).is_some());
        assert_eq!(allocated.format, PixelFormat::RGBA_8888);
    }

    #[test]
    fn test_virtual_display_mirrors_physical_handle() {
        let (sim, hwc) = setup(HwcConfig::default());
        let physical = PhysicalDisplayId::from_port(0);
        hwc.allocate_physical_display(7, physical);

        hwc.allocate_virtual_display(640, 480, PixelFormat::RGBA_8888, Some(physical))
            .unwrap();
        assert_eq!(sim.last_virtual_mirror(), Some(Some(7)));
    }

    #[test]
    fn test_virtual_display_count_limit() {
        let (sim, hwc) = setup(HwcConfig::default());
        sim.set_max_virtual_display_count(1);

        hwc.allocate_virtual_display(640, 480, PixelFormat::RGBA_8888, None)
            .unwrap();
        let err = hwc
            .allocate_virtual_display(640, 480, PixelFormat::RGBA_8888, None)
            .unwrap_err();
        assert!(matches!(err, Error::NoResources(_)));
        assert_eq!(sim.count_calls("createVirtualDisplay"), 1);
    }

    #[test]
    fn test_destroy_virtual_display_releases_device_target() {
        let (sim, hwc) = setup(HwcConfig::default());
        let allocated = hwc
            .allocate_virtual_display(640, 480, PixelFormat::RGBA_8888, None)
            .unwrap();

        hwc.destroy_display(allocated.id.into()).unwrap();
        assert_eq!(sim.count_calls("destroyVirtualDisplay"), 1);
        assert!(!hwc.is_connected(allocated.id.into()));
        assert!(matches!(
            hwc.destroy_display(allocated.id.into()),
            Err(Error::InvalidDisplay(_))
        ));
    }

    #[test]
    fn test_invalid_display_queries_are_neutral() {
        let (_sim, hwc) = setup(HwcConfig::default());
        let unknown = PhysicalDisplayId::from_port(9);

        assert!(hwc.get_color_modes(unknown).is_empty());
        assert!(hwc.get_modes(unknown).is_empty());
        assert_eq!(hwc.get_active_mode(unknown), None);
        assert!(!hwc.has_display_capability(unknown.into(), DisplayCapability::Doze));
        assert_eq!(
            hwc.get_display_connection_type(unknown),
            DisplayConnectionType::Internal
        );
        assert!(matches!(
            hwc.set_content_type(unknown, ContentType::Game),
            Err(Error::InvalidDisplay(_))
        ));
    }

    #[test]
    fn test_get_modes_reads_attributes() {
        let (sim, hwc) = setup(HwcConfig::default());
        sim.add_display(3, SimDisplay::default());
        let id = PhysicalDisplayId::from_port(0);
        hwc.allocate_physical_display(3, id);

        let modes = hwc.get_modes(id);
        assert_eq!(modes.len(), 2);
        assert_eq!(modes[0].width, 1080);
        assert_eq!(modes[0].height, 2340);
        assert_eq!(modes[1].vsync_period, 8_333_333);
        assert_eq!(hwc.get_active_mode(id), Some(0));
    }

    #[test]
    fn test_connection_type_falls_back_to_role() {
        let (sim, hwc) = setup(HwcConfig::default());
        sim.add_display(1, SimDisplay::default());
        sim.add_display(2, SimDisplay::default());
        hwc.allocate_physical_display(1, PhysicalDisplayId::from_port(0));
        hwc.allocate_physical_display(2, PhysicalDisplayId::from_port(1));
        sim.fail_next("getDisplayConnectionType", HalError::Unsupported);
        sim.fail_next("getDisplayConnectionType", HalError::Unsupported);

        assert_eq!(
            hwc.get_display_connection_type(PhysicalDisplayId::from_port(0)),
            DisplayConnectionType::Internal
        );
        assert_eq!(
            hwc.get_display_connection_type(PhysicalDisplayId::from_port(1)),
            DisplayConnectionType::External
        );
    }

    #[test]
    fn test_content_type_errors_are_distinct() {
        let (sim, hwc) = setup(HwcConfig::default());
        sim.add_display(1, SimDisplay::default());
        let id = PhysicalDisplayId::from_port(0);
        hwc.allocate_physical_display(1, id);

        sim.fail_next("setContentType", HalError::Unsupported);
        assert!(hwc.set_content_type(id, ContentType::Game).unwrap_err().is_unsupported());

        sim.fail_next("setContentType", HalError::BadParameter);
        assert!(matches!(
            hwc.set_content_type(id, ContentType::Game),
            Err(Error::BadParameter { .. })
        ));

        hwc.set_content_type(id, ContentType::Game).unwrap();
    }

    #[test]
    fn test_color_transform_hint() {
        let (sim, hwc) = setup(HwcConfig::default());
        sim.add_display(1, SimDisplay::default());
        let id = PhysicalDisplayId::from_port(0);
        hwc.allocate_physical_display(1, id);

        hwc.set_color_transform(id.into(), &IDENTITY_MATRIX).unwrap();
        let mut tinted = IDENTITY_MATRIX;
        tinted[0] = 0.5;
        hwc.set_color_transform(id.into(), &tinted).unwrap();

        assert_eq!(
            sim.color_transform_hints(1),
            vec![ColorTransform::Identity, ColorTransform::ArbitraryMatrix]
        );
    }

    #[test]
    fn test_vsync_period_requires_switching_support() {
        let (sim, hwc) = setup(HwcConfig::default());
        sim.add_display(1, SimDisplay::default());
        let id = PhysicalDisplayId::from_port(0);
        hwc.allocate_physical_display(1, id);

        assert!(matches!(
            hwc.get_display_vsync_period(id),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_callback_registers_once() {
        let (sim, hwc) = setup(HwcConfig::default());
        let host = Arc::new(crate::sim::NullCallback);
        hwc.set_callback(host.clone());
        hwc.set_callback(host);
        assert_eq!(sim.count_calls("registerCallback"), 1);
    }

    #[test]
    fn test_capabilities_and_metadata_loaded_at_init() {
        let sim = Arc::new(SimComposer::new());
        sim.set_capabilities(vec![Capability::SkipValidate]);
        sim.set_metadata_keys(vec![crate::hal::LayerGenericMetadataKey {
            name: "com.example.hint".to_string(),
            mandatory: false,
        }]);
        let hwc = HwComposer::new(sim.clone(), HwcConfig::default());

        assert!(hwc.has_capability(Capability::SkipValidate));
        assert!(!hwc.has_capability(Capability::SidebandStream));
        assert_eq!(
            hwc.get_supported_layer_generic_metadata().get("com.example.hint"),
            Some(&false)
        );
        assert_eq!(sim.count_calls("getCapabilities"), 1);
    }

    #[test]
    fn test_dump_includes_device_text() {
        let (sim, hwc) = setup(HwcConfig::default());
        sim.add_display(1, SimDisplay::default());
        hwc.allocate_physical_display(1, PhysicalDisplayId::from_port(0));

        let dump = hwc.dump();
        assert!(dump.contains("hwc=1 connected=true"));
        assert!(dump.contains("SimComposer"));
    }
}
