//! In-memory composition device
//!
//! `SimComposer` implements [`Composer`] without hardware. It keeps a log of
//! every call it receives, lets callers queue failures and present outcomes,
//! and can fire device callbacks (hotplug, vsync, refresh) at the registered
//! [`HalCallback`]. The unit tests and the `hwc-sim` binary both drive it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::composer::{
    Composer, ComposerCallback, DisplayRequests, HalCallback, PresentOrValidate, VirtualDisplay,
};
use crate::fence::Fence;
use crate::hal::{
    Attribute, BufferHandle, Capability, ClientTargetProperty, ColorMode, ColorTransform,
    Composition, Connection, ContentSamplingAttributes, ContentType, Dataspace,
    DisplayCapability, DisplayConnectionType, DisplayedFrameStats, HalError, HalResult, Hdr,
    HdrCapabilities, HwcConfigId, HwcDisplayId, LayerGenericMetadataKey, LayerId, Nsecs,
    PixelFormat, PowerMode, PresentOrValidateState, RenderIntent, Vsync,
    VsyncPeriodChangeConstraints, VsyncPeriodChangeTimeline, VsyncPeriodNanos,
};
use crate::identification::DisplayIdentificationData;

const FIRST_VIRTUAL_HWC_ID: HwcDisplayId = 1000;

const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Build a 128-byte EDID base block: manufactured week 12 of 2021, with an
/// optional display-name descriptor.
pub fn make_edid(pnp: &str, product: u16, name: &str) -> Vec<u8> {
    let mut edid = vec![0u8; 128];
    edid[..8].copy_from_slice(&[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);

    let manufacturer = pnp
        .bytes()
        .take(3)
        .fold(0u16, |acc, b| (acc << 5) | u16::from(b.saturating_sub(b'A' - 1) & 0x1F));
    edid[8..10].copy_from_slice(&manufacturer.to_be_bytes());
    edid[10..12].copy_from_slice(&product.to_le_bytes());
    edid[12..16].copy_from_slice(&1u32.to_le_bytes());
    edid[16] = 12;
    edid[17] = 31;
    edid[18] = 1;
    edid[19] = 4;

    if !name.is_empty() {
        let descriptor = &mut edid[54..72];
        descriptor[3] = 0xFC;
        let mut text = [b' '; 13];
        let bytes = name.as_bytes();
        let len = bytes.len().min(12);
        text[..len].copy_from_slice(&bytes[..len]);
        text[len] = b'\n';
        descriptor[5..18].copy_from_slice(&text);
    }

    let sum = edid[..127].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    edid[127] = 0u8.wrapping_sub(sum);
    edid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub width: i32,
    pub height: i32,
    pub vsync_period: i32,
    pub dpi_x: i32,
    pub dpi_y: i32,
    pub group: i32,
}

/// Static description of a simulated panel
#[derive(Debug, Clone)]
pub struct SimDisplay {
    pub port: u8,
    /// `None` makes the device answer `Unsupported` for identification data.
    pub edid: Option<Vec<u8>>,
    pub configs: Vec<SimConfig>,
    pub active_config: HwcConfigId,
    pub doze_support: bool,
    pub connection_type: DisplayConnectionType,
    pub capabilities: Vec<DisplayCapability>,
    pub color_modes: Vec<ColorMode>,
    pub hdr: HdrCapabilities,
    pub content_types: Vec<ContentType>,
}

impl Default for SimDisplay {
    fn default() -> Self {
        let config = SimConfig {
            width: 1080,
            height: 2340,
            vsync_period: 16_666_666,
            dpi_x: 400,
            dpi_y: 400,
            group: 0,
        };
        Self {
            port: 0,
            edid: None,
            configs: vec![
                config,
                SimConfig {
                    vsync_period: 8_333_333,
                    ..config
                },
            ],
            active_config: 0,
            doze_support: false,
            connection_type: DisplayConnectionType::Internal,
            capabilities: vec![DisplayCapability::Brightness],
            color_modes: vec![ColorMode::Native, ColorMode::Srgb],
            hdr: HdrCapabilities {
                types: vec![Hdr::Hdr10],
                max_luminance: 500.0,
                max_average_luminance: 250.0,
                min_luminance: 0.05,
            },
            content_types: vec![ContentType::Graphics, ContentType::Game],
        }
    }
}

impl SimDisplay {
    pub fn with_edid(port: u8, edid: Vec<u8>) -> Self {
        Self {
            port,
            edid: Some(edid),
            connection_type: DisplayConnectionType::External,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct DisplayState {
    display: SimDisplay,
    is_virtual: bool,
    outcomes: VecDeque<HalResult<PresentOrValidateState>>,
    changed_types: HashMap<LayerId, Composition>,
    requests: DisplayRequests,
    client_target_property: ClientTargetProperty,
    release_fences: HashMap<LayerId, Fence>,
    layers: HashSet<LayerId>,
    next_layer: u64,
    frames: u64,
    vsync: Option<Vsync>,
    power_modes: Vec<PowerMode>,
    color_transform_hints: Vec<ColorTransform>,
}

impl DisplayState {
    fn new(display: SimDisplay, is_virtual: bool) -> Self {
        Self {
            display,
            is_virtual,
            ..Self::default()
        }
    }

    fn active(&self) -> HalResult<&SimConfig> {
        self.display
            .configs
            .get(self.display.active_config as usize)
            .ok_or(HalError::BadConfig)
    }

    fn next_present_fence(&mut self) -> Fence {
        self.frames += 1;
        let period = self.active().map_or(16_666_666, |c| c.vsync_period);
        Fence::signaled(self.frames as Nsecs * Nsecs::from(period))
    }
}

struct SimState {
    displays: HashMap<HwcDisplayId, DisplayState>,
    capabilities: Vec<Capability>,
    metadata_keys: HalResult<Vec<LayerGenericMetadataKey>>,
    vsync_switching: bool,
    max_virtual_displays: u32,
    next_virtual_hwc_id: HwcDisplayId,
    last_virtual_mirror: Option<Option<HwcDisplayId>>,
    failures: HashMap<String, VecDeque<HalError>>,
    calls: Vec<String>,
    callback: Option<Arc<dyn HalCallback>>,
}

impl SimState {
    /// Log the call and pop a queued failure for it
    fn begin(&mut self, operation: &str) -> HalResult<()> {
        self.calls.push(operation.to_string());
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(code) => {
                debug!(operation, %code, "Injected device failure");
                Err(code)
            }
            None => Ok(()),
        }
    }

    fn display(&mut self, display: HwcDisplayId) -> HalResult<&mut DisplayState> {
        self.displays.get_mut(&display).ok_or(HalError::BadDisplay)
    }
}

/// Scriptable stand-in for a composition device
pub struct SimComposer {
    state: Mutex<SimState>,
}

impl Default for SimComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimComposer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                displays: HashMap::new(),
                capabilities: Vec::new(),
                metadata_keys: Err(HalError::Unsupported),
                vsync_switching: false,
                max_virtual_displays: 0,
                next_virtual_hwc_id: FIRST_VIRTUAL_HWC_ID,
                last_virtual_mirror: None,
                failures: HashMap::new(),
                calls: Vec::new(),
                callback: None,
            }),
        }
    }

    pub fn add_display(&self, hwc_id: HwcDisplayId, display: SimDisplay) {
        self.state
            .lock()
            .displays
            .insert(hwc_id, DisplayState::new(display, false));
    }

    pub fn set_capabilities(&self, capabilities: Vec<Capability>) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn set_metadata_keys(&self, keys: Vec<LayerGenericMetadataKey>) {
        self.state.lock().metadata_keys = Ok(keys);
    }

    pub fn set_vsync_period_switch_supported(&self, supported: bool) {
        self.state.lock().vsync_switching = supported;
    }

    pub fn set_max_virtual_display_count(&self, count: u32) {
        self.state.lock().max_virtual_displays = count;
    }

    /// Make the next call to `operation` fail with `code`. Failures queue up.
    pub fn fail_next(&self, operation: &str, code: HalError) {
        self.state
            .lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(code);
    }

    /// Queue the answer to the next present-or-validate on `hwc_id`. With
    /// nothing queued the device commits when no composition changes are
    /// pending and validates only otherwise.
    pub fn push_present_or_validate(
        &self,
        hwc_id: HwcDisplayId,
        outcome: HalResult<PresentOrValidateState>,
    ) {
        if let Some(state) = self.state.lock().displays.get_mut(&hwc_id) {
            state.outcomes.push_back(outcome);
        }
    }

    pub fn set_changed_types(&self, hwc_id: HwcDisplayId, types: HashMap<LayerId, Composition>) {
        if let Some(state) = self.state.lock().displays.get_mut(&hwc_id) {
            state.changed_types = types;
        }
    }

    pub fn set_display_requests(&self, hwc_id: HwcDisplayId, requests: DisplayRequests) {
        if let Some(state) = self.state.lock().displays.get_mut(&hwc_id) {
            state.requests = requests;
        }
    }

    pub fn set_client_target_property(&self, hwc_id: HwcDisplayId, property: ClientTargetProperty) {
        if let Some(state) = self.state.lock().displays.get_mut(&hwc_id) {
            state.client_target_property = property;
        }
    }

    pub fn set_release_fences(&self, hwc_id: HwcDisplayId, fences: HashMap<LayerId, Fence>) {
        if let Some(state) = self.state.lock().displays.get_mut(&hwc_id) {
            state.release_fences = fences;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    pub fn power_modes(&self, hwc_id: HwcDisplayId) -> Vec<PowerMode> {
        self.state
            .lock()
            .displays
            .get(&hwc_id)
            .map(|state| state.power_modes.clone())
            .unwrap_or_default()
    }

    pub fn color_transform_hints(&self, hwc_id: HwcDisplayId) -> Vec<ColorTransform> {
        self.state
            .lock()
            .displays
            .get(&hwc_id)
            .map(|state| state.color_transform_hints.clone())
            .unwrap_or_default()
    }

    pub fn vsync_enabled(&self, hwc_id: HwcDisplayId) -> Option<Vsync> {
        self.state
            .lock()
            .displays
            .get(&hwc_id)
            .and_then(|state| state.vsync)
    }

    pub fn last_virtual_mirror(&self) -> Option<Option<HwcDisplayId>> {
        self.state.lock().last_virtual_mirror
    }

    fn registered_callback(&self) -> Option<Arc<dyn HalCallback>> {
        self.state.lock().callback.clone()
    }

    /// Fire a hotplug notification at the registered callback
    pub fn hotplug(&self, hwc_id: HwcDisplayId, connection: Connection) {
        if let Some(callback) = self.registered_callback() {
            callback.on_hotplug(hwc_id, connection);
        }
    }

    /// Fire a vsync using whichever variant matches period-switch support
    pub fn vsync(&self, hwc_id: HwcDisplayId, timestamp: Nsecs) {
        let (switching, period) = {
            let state = self.state.lock();
            let period = state
                .displays
                .get(&hwc_id)
                .and_then(|d| d.active().ok())
                .map_or(16_666_666, |c| c.vsync_period);
            (state.vsync_switching, period as VsyncPeriodNanos)
        };
        let Some(callback) = self.registered_callback() else {
            return;
        };
        if switching {
            callback.on_vsync_2_4(hwc_id, timestamp, period);
        } else {
            callback.on_vsync(hwc_id, timestamp);
        }
    }

    pub fn refresh(&self, hwc_id: HwcDisplayId) {
        if let Some(callback) = self.registered_callback() {
            callback.on_refresh(hwc_id);
        }
    }
}

impl Composer for SimComposer {
    fn get_capabilities(&self) -> Vec<Capability> {
        let mut state = self.state.lock();
        state.calls.push("getCapabilities".to_string());
        state.capabilities.clone()
    }

    fn get_layer_generic_metadata_keys(&self) -> HalResult<Vec<LayerGenericMetadataKey>> {
        let mut state = self.state.lock();
        state.begin("getLayerGenericMetadataKeys")?;
        state.metadata_keys.clone()
    }

    fn is_vsync_period_switch_supported(&self) -> bool {
        let mut state = self.state.lock();
        state.calls.push("isVsyncPeriodSwitchSupported".to_string());
        state.vsync_switching
    }

    fn register_callback(&self, callback: Arc<dyn HalCallback>) {
        let mut state = self.state.lock();
        state.calls.push("registerCallback".to_string());
        state.callback = Some(callback);
    }

    fn get_max_virtual_display_count(&self) -> u32 {
        let mut state = self.state.lock();
        state.calls.push("getMaxVirtualDisplayCount".to_string());
        state.max_virtual_displays
    }

    fn execute_commands(&self) -> HalResult<()> {
        self.state.lock().begin("executeCommands")
    }

    fn dump_debug_info(&self) -> String {
        let mut state = self.state.lock();
        state.calls.push("dumpDebugInfo".to_string());
        let mut out = format!("SimComposer: {} displays\n", state.displays.len());
        let mut ids: Vec<_> = state.displays.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let display = &state.displays[&id];
            let _ = writeln!(
                out,
                "  hwc display {}: virtual={} frames={} layers={} vsync={:?}",
                id,
                display.is_virtual,
                display.frames,
                display.layers.len(),
                display.vsync
            );
        }
        out
    }

    fn create_virtual_display(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        mirror: Option<HwcDisplayId>,
    ) -> HalResult<VirtualDisplay> {
        let mut state = self.state.lock();
        state.begin("createVirtualDisplay")?;
        state.last_virtual_mirror = Some(mirror);

        let hwc_id = state.next_virtual_hwc_id;
        state.next_virtual_hwc_id += 1;
        let display = SimDisplay {
            configs: vec![SimConfig {
                width: width as i32,
                height: height as i32,
                vsync_period: 16_666_666,
                dpi_x: 0,
                dpi_y: 0,
                group: 0,
            }],
            ..SimDisplay::default()
        };
        state.displays.insert(hwc_id, DisplayState::new(display, true));

        Ok(VirtualDisplay {
            display: hwc_id,
            format,
        })
    }

    fn destroy_virtual_display(&self, display: HwcDisplayId) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("destroyVirtualDisplay")?;
        if !state.display(display)?.is_virtual {
            return Err(HalError::BadDisplay);
        }
        state.displays.remove(&display);
        Ok(())
    }

    fn get_display_identification_data(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<DisplayIdentificationData> {
        let mut state = self.state.lock();
        state.begin("getDisplayIdentificationData")?;
        let d = &state.display(display)?.display;
        match &d.edid {
            Some(data) => Ok(DisplayIdentificationData {
                port: d.port,
                data: data.clone(),
            }),
            None => Err(HalError::Unsupported),
        }
    }

    fn get_display_capabilities(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<Vec<DisplayCapability>> {
        let mut state = self.state.lock();
        state.begin("getDisplayCapabilities")?;
        Ok(state.display(display)?.display.capabilities.clone())
    }

    fn get_display_connection_type(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<DisplayConnectionType> {
        let mut state = self.state.lock();
        state.begin("getDisplayConnectionType")?;
        Ok(state.display(display)?.display.connection_type)
    }

    fn get_display_attribute(
        &self,
        display: HwcDisplayId,
        config: HwcConfigId,
        attribute: Attribute,
    ) -> HalResult<i32> {
        let mut state = self.state.lock();
        state.begin("getDisplayAttribute")?;
        let c = state
            .display(display)?
            .display
            .configs
            .get(config as usize)
            .copied()
            .ok_or(HalError::BadConfig)?;
        match attribute {
            Attribute::Width => Ok(c.width),
            Attribute::Height => Ok(c.height),
            Attribute::VsyncPeriod => Ok(c.vsync_period),
            Attribute::DpiX => Ok(c.dpi_x),
            Attribute::DpiY => Ok(c.dpi_y),
            Attribute::ConfigGroup => Ok(c.group),
            Attribute::Invalid => Err(HalError::BadParameter),
        }
    }

    fn get_display_configs(&self, display: HwcDisplayId) -> HalResult<Vec<HwcConfigId>> {
        let mut state = self.state.lock();
        state.begin("getDisplayConfigs")?;
        let count = state.display(display)?.display.configs.len();
        Ok((0..count as HwcConfigId).collect())
    }

    fn get_active_config(&self, display: HwcDisplayId) -> HalResult<HwcConfigId> {
        let mut state = self.state.lock();
        state.begin("getActiveConfig")?;
        let d = state.display(display)?;
        d.active()?;
        Ok(d.display.active_config)
    }

    fn get_display_vsync_period(&self, display: HwcDisplayId) -> HalResult<VsyncPeriodNanos> {
        let mut state = self.state.lock();
        state.begin("getDisplayVsyncPeriod")?;
        Ok(state.display(display)?.active()?.vsync_period as VsyncPeriodNanos)
    }

    fn set_active_config_with_constraints(
        &self,
        display: HwcDisplayId,
        config: HwcConfigId,
        constraints: &VsyncPeriodChangeConstraints,
    ) -> HalResult<VsyncPeriodChangeTimeline> {
        let mut state = self.state.lock();
        state.begin("setActiveConfigWithConstraints")?;
        let d = state.display(display)?;
        if config as usize >= d.display.configs.len() {
            return Err(HalError::BadConfig);
        }
        d.display.active_config = config;
        Ok(VsyncPeriodChangeTimeline {
            new_vsync_applied_time_nanos: constraints.desired_time_nanos,
            refresh_required: !constraints.seamless_required,
            refresh_time_nanos: constraints.desired_time_nanos,
        })
    }

    fn create_layer(&self, display: HwcDisplayId) -> HalResult<LayerId> {
        let mut state = self.state.lock();
        state.begin("createLayer")?;
        let d = state.display(display)?;
        d.next_layer += 1;
        let layer = LayerId(d.next_layer);
        d.layers.insert(layer);
        Ok(layer)
    }

    fn destroy_layer(&self, display: HwcDisplayId, layer: LayerId) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("destroyLayer")?;
        if state.display(display)?.layers.remove(&layer) {
            Ok(())
        } else {
            Err(HalError::BadLayer)
        }
    }

    fn get_color_modes(&self, display: HwcDisplayId) -> HalResult<Vec<ColorMode>> {
        let mut state = self.state.lock();
        state.begin("getColorModes")?;
        Ok(state.display(display)?.display.color_modes.clone())
    }

    fn set_color_mode(
        &self,
        display: HwcDisplayId,
        mode: ColorMode,
        _intent: RenderIntent,
    ) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setColorMode")?;
        if state.display(display)?.display.color_modes.contains(&mode) {
            Ok(())
        } else {
            Err(HalError::Unsupported)
        }
    }

    fn get_render_intents(
        &self,
        display: HwcDisplayId,
        _mode: ColorMode,
    ) -> HalResult<Vec<RenderIntent>> {
        let mut state = self.state.lock();
        state.begin("getRenderIntents")?;
        state.display(display)?;
        Ok(vec![RenderIntent::Colorimetric, RenderIntent::Enhance])
    }

    fn get_dataspace_saturation_matrix(
        &self,
        display: HwcDisplayId,
        _dataspace: Dataspace,
    ) -> HalResult<[f32; 16]> {
        let mut state = self.state.lock();
        state.begin("getDataspaceSaturationMatrix")?;
        state.display(display)?;
        Ok(IDENTITY_MATRIX)
    }

    fn set_color_transform(
        &self,
        display: HwcDisplayId,
        _matrix: &[f32; 16],
        hint: ColorTransform,
    ) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setColorTransform")?;
        state.display(display)?.color_transform_hints.push(hint);
        Ok(())
    }

    fn set_client_target(
        &self,
        display: HwcDisplayId,
        _slot: u32,
        _target: Option<BufferHandle>,
        _acquire_fence: &Fence,
        _dataspace: Dataspace,
    ) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setClientTarget")?;
        state.display(display)?;
        Ok(())
    }

    fn set_output_buffer(
        &self,
        display: HwcDisplayId,
        _buffer: BufferHandle,
        _release_fence: &Fence,
    ) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setOutputBuffer")?;
        if state.display(display)?.is_virtual {
            Ok(())
        } else {
            Err(HalError::Unsupported)
        }
    }

    fn validate(&self, display: HwcDisplayId) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("validate")?;
        if state.display(display)?.changed_types.is_empty() {
            Ok(())
        } else {
            Err(HalError::HasChanges)
        }
    }

    fn present_or_validate(&self, display: HwcDisplayId) -> HalResult<PresentOrValidate> {
        let mut state = self.state.lock();
        state.begin("presentOrValidate")?;
        let d = state.display(display)?;
        let scripted = match d.outcomes.pop_front() {
            Some(outcome) => outcome?,
            None if d.changed_types.is_empty() => PresentOrValidateState::CommittedNoChanges,
            None => PresentOrValidateState::OnlyValidated,
        };
        let present_fence = if scripted.is_committed() {
            d.next_present_fence()
        } else {
            Fence::NO_FENCE
        };
        Ok(PresentOrValidate {
            state: scripted,
            present_fence,
        })
    }

    fn present(&self, display: HwcDisplayId) -> HalResult<Fence> {
        let mut state = self.state.lock();
        state.begin("present")?;
        Ok(state.display(display)?.next_present_fence())
    }

    fn get_changed_composition_types(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<HashMap<LayerId, Composition>> {
        let mut state = self.state.lock();
        state.begin("getChangedCompositionTypes")?;
        Ok(state.display(display)?.changed_types.clone())
    }

    fn get_display_requests(&self, display: HwcDisplayId) -> HalResult<DisplayRequests> {
        let mut state = self.state.lock();
        state.begin("getDisplayRequests")?;
        Ok(state.display(display)?.requests.clone())
    }

    fn get_client_target_property(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<ClientTargetProperty> {
        let mut state = self.state.lock();
        state.begin("getClientTargetProperty")?;
        Ok(state.display(display)?.client_target_property)
    }

    fn accept_display_changes(&self, display: HwcDisplayId) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("acceptDisplayChanges")?;
        let d = state.display(display)?;
        d.changed_types.clear();
        d.requests = DisplayRequests::default();
        Ok(())
    }

    fn get_release_fences(&self, display: HwcDisplayId) -> HalResult<HashMap<LayerId, Fence>> {
        let mut state = self.state.lock();
        state.begin("getReleaseFences")?;
        Ok(state.display(display)?.release_fences.clone())
    }

    fn set_vsync_enabled(&self, display: HwcDisplayId, enabled: Vsync) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setVsyncEnabled")?;
        state.display(display)?.vsync = Some(enabled);
        Ok(())
    }

    fn get_doze_support(&self, display: HwcDisplayId) -> HalResult<bool> {
        let mut state = self.state.lock();
        state.begin("getDozeSupport")?;
        Ok(state.display(display)?.display.doze_support)
    }

    fn set_power_mode(&self, display: HwcDisplayId, mode: PowerMode) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setPowerMode")?;
        let d = state.display(display)?;
        if matches!(mode, PowerMode::Doze | PowerMode::DozeSuspend) && !d.display.doze_support {
            return Err(HalError::Unsupported);
        }
        d.power_modes.push(mode);
        Ok(())
    }

    fn set_display_brightness(&self, display: HwcDisplayId, brightness: f32) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setDisplayBrightness")?;
        let d = state.display(display)?;
        if !d.display.capabilities.contains(&DisplayCapability::Brightness) {
            return Err(HalError::Unsupported);
        }
        if !(-1.0..=1.0).contains(&brightness) {
            return Err(HalError::BadParameter);
        }
        Ok(())
    }

    fn get_hdr_capabilities(&self, display: HwcDisplayId) -> HalResult<HdrCapabilities> {
        let mut state = self.state.lock();
        state.begin("getHdrCapabilities")?;
        Ok(state.display(display)?.display.hdr.clone())
    }

    fn get_supported_per_frame_metadata(&self, display: HwcDisplayId) -> HalResult<i32> {
        let mut state = self.state.lock();
        state.begin("getSupportedPerFrameMetadata")?;
        state.display(display)?;
        Ok(0)
    }

    fn get_displayed_content_sampling_attributes(
        &self,
        display: HwcDisplayId,
    ) -> HalResult<ContentSamplingAttributes> {
        let mut state = self.state.lock();
        state.begin("getDisplayedContentSamplingAttributes")?;
        state.display(display)?;
        Ok(ContentSamplingAttributes {
            format: PixelFormat::RGBA_8888,
            dataspace: Dataspace::SRGB,
            component_mask: 0xF,
        })
    }

    fn set_displayed_content_sampling_enabled(
        &self,
        display: HwcDisplayId,
        _enabled: bool,
        component_mask: u8,
        _max_frames: u64,
    ) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setDisplayedContentSamplingEnabled")?;
        state.display(display)?;
        if component_mask > 0xF {
            return Err(HalError::BadParameter);
        }
        Ok(())
    }

    fn get_displayed_content_sample(
        &self,
        display: HwcDisplayId,
        _max_frames: u64,
        _timestamp: u64,
    ) -> HalResult<DisplayedFrameStats> {
        let mut state = self.state.lock();
        state.begin("getDisplayedContentSample")?;
        Ok(DisplayedFrameStats {
            num_frames: state.display(display)?.frames,
            ..DisplayedFrameStats::default()
        })
    }

    fn set_auto_low_latency_mode(&self, display: HwcDisplayId, _on: bool) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setAutoLowLatencyMode")?;
        let caps = &state.display(display)?.display.capabilities;
        if caps.contains(&DisplayCapability::AutoLowLatencyMode) {
            Ok(())
        } else {
            Err(HalError::Unsupported)
        }
    }

    fn get_supported_content_types(&self, display: HwcDisplayId) -> HalResult<Vec<ContentType>> {
        let mut state = self.state.lock();
        state.begin("getSupportedContentTypes")?;
        Ok(state.display(display)?.display.content_types.clone())
    }

    fn set_content_type(&self, display: HwcDisplayId, content_type: ContentType) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setContentType")?;
        let supported = &state.display(display)?.display.content_types;
        if content_type == ContentType::None || supported.contains(&content_type) {
            Ok(())
        } else {
            Err(HalError::Unsupported)
        }
    }

    fn set_display_elapse_time(&self, display: HwcDisplayId, _timestamp: u64) -> HalResult<()> {
        let mut state = self.state.lock();
        state.begin("setDisplayElapseTime")?;
        state.display(display)?;
        Ok(())
    }
}

/// Host callback that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallback;

impl ComposerCallback for NullCallback {
    fn on_composer_hal_hotplug(&self, _display: HwcDisplayId, _connection: Connection) {}
    fn on_composer_hal_refresh(&self, _display: HwcDisplayId) {}
    fn on_composer_hal_vsync(
        &self,
        _display: HwcDisplayId,
        _timestamp: Nsecs,
        _period: Option<VsyncPeriodNanos>,
    ) {
    }
    fn on_composer_hal_vsync_period_timing_changed(
        &self,
        _display: HwcDisplayId,
        _timeline: &VsyncPeriodChangeTimeline,
    ) {
    }
    fn on_composer_hal_seamless_possible(&self, _display: HwcDisplayId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edid_checksum() {
        let edid = make_edid("GGL", 1, "Panel");
        assert_eq!(edid.len(), 128);
        let sum = edid.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn test_failures_queue_per_operation() {
        let sim = SimComposer::new();
        sim.add_display(1, SimDisplay::default());
        sim.fail_next("present", HalError::NoResources);
        sim.fail_next("present", HalError::BadLayer);

        assert_eq!(sim.present(1).unwrap_err(), HalError::NoResources);
        assert_eq!(sim.present(1).unwrap_err(), HalError::BadLayer);
        assert!(sim.present(1).is_ok());
        assert_eq!(sim.count_calls("present"), 3);
        assert_eq!(sim.present(9).unwrap_err(), HalError::BadDisplay);
    }

    #[test]
    fn test_default_outcome_follows_pending_changes() {
        let sim = SimComposer::new();
        sim.add_display(1, SimDisplay::default());

        let committed = sim.present_or_validate(1).unwrap();
        assert_eq!(committed.state, PresentOrValidateState::CommittedNoChanges);
        assert!(committed.present_fence.is_valid());

        sim.set_changed_types(1, [(LayerId(1), Composition::Client)].into_iter().collect());
        let validated = sim.present_or_validate(1).unwrap();
        assert_eq!(validated.state, PresentOrValidateState::OnlyValidated);
        assert!(!validated.present_fence.is_valid());

        sim.accept_display_changes(1).unwrap();
        assert!(sim.validate(1).is_ok());
    }
}
