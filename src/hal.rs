//! Composer HAL vocabulary
//!
//! Closed sets of codes exchanged with the composition device. The raw
//! integer values match the hwcomposer2 HAL so a transport can convert
//! without lookup tables.

use std::convert::TryFrom;
use std::fmt;

/// Hardware composer display ID type
pub type HwcDisplayId = u64;

/// Hardware composer config ID type
pub type HwcConfigId = u32;

/// Vsync period reported by composer >= 2.4
pub type VsyncPeriodNanos = u32;

/// Timestamps in nanoseconds on the device's monotonic clock
pub type Nsecs = i64;

/// Result of a device call
pub type HalResult<T> = std::result::Result<T, HalError>;

/// HWC2 error codes, minus `NONE` which is the `Ok` side of [`HalResult`]
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalError {
    BadConfig = 1,
    BadDisplay = 2,
    BadLayer = 3,
    BadParameter = 4,
    /// Not a failure: validation produced composition changes to retrieve.
    HasChanges = 5,
    NoResources = 6,
    NotValidated = 7,
    Unsupported = 8,
}

impl HalError {
    /// Convert a raw status into a result. Unknown non-zero codes map to
    /// `NoResources`.
    pub fn check(raw: i32) -> HalResult<()> {
        match raw {
            0 => Ok(()),
            1 => Err(Self::BadConfig),
            2 => Err(Self::BadDisplay),
            3 => Err(Self::BadLayer),
            4 => Err(Self::BadParameter),
            5 => Err(Self::HasChanges),
            7 => Err(Self::NotValidated),
            8 => Err(Self::Unsupported),
            _ => Err(Self::NoResources),
        }
    }

    pub fn is_has_changes(self) -> bool {
        self == Self::HasChanges
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadConfig => "BadConfig",
            Self::BadDisplay => "BadDisplay",
            Self::BadLayer => "BadLayer",
            Self::BadParameter => "BadParameter",
            Self::HasChanges => "HasChanges",
            Self::NoResources => "NoResources",
            Self::NotValidated => "NotValidated",
            Self::Unsupported => "Unsupported",
        };
        write!(f, "{} ({})", name, *self as i32)
    }
}

impl std::error::Error for HalError {}

/// Hotplug connection state
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Invalid = 0,
    Connected = 1,
    Disconnected = 2,
}

/// Vsync enable state
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vsync {
    Invalid = 0,
    Enable = 1,
    Disable = 2,
}

/// Power mode constants
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Off = 0,
    Doze = 1,
    On = 2,
    DozeSuspend = 3,
    OnSuspend = 4,
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "Off",
            Self::Doze => "Doze",
            Self::On => "On",
            Self::DozeSuspend => "DozeSuspend",
            Self::OnSuspend => "OnSuspend",
        };
        f.write_str(name)
    }
}

/// Composition type
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Composition {
    Invalid = 0,
    Client = 1,
    Device = 2,
    SolidColor = 3,
    Cursor = 4,
    Sideband = 5,
}

/// Display-level request bits returned alongside validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DisplayRequest(pub u32);

impl DisplayRequest {
    pub const NONE: Self = Self(0);
    pub const FLIP_CLIENT_TARGET: Self = Self(1 << 0);
    pub const WRITE_CLIENT_TARGET_TO_OUTPUT: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for DisplayRequest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Per-layer request bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LayerRequest(pub u32);

impl LayerRequest {
    pub const CLEAR_CLIENT_TARGET: Self = Self(1 << 0);
}

/// Device-wide capabilities
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Invalid = 0,
    SidebandStream = 1,
    SkipClientColorTransform = 2,
    PresentFenceIsNotReliable = 3,
    SkipValidate = 4,
}

/// Per-display capabilities
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayCapability {
    Invalid = 0,
    SkipClientColorTransform = 1,
    Doze = 2,
    Brightness = 3,
    ProtectedContents = 4,
    AutoLowLatencyMode = 5,
}

/// Display config attributes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Invalid = 0,
    Width = 1,
    Height = 2,
    VsyncPeriod = 3,
    DpiX = 4,
    DpiY = 5,
    ConfigGroup = 7,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    Native = 0,
    StandardBt601_625 = 1,
    StandardBt709 = 5,
    Srgb = 7,
    DisplayP3 = 9,
    Bt2020 = 10,
    Bt2100Pq = 11,
    Bt2100Hlg = 12,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderIntent {
    Colorimetric = 0,
    Enhance = 1,
    ToneMapColorimetric = 2,
    ToneMapEnhance = 3,
}

/// Android dataspace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Dataspace(pub i32);

impl Dataspace {
    pub const UNKNOWN: Self = Self(0);
    pub const SRGB_LINEAR: Self = Self(0x8A_0000);
    pub const SRGB: Self = Self(0x8C_0000);
    pub const DISPLAY_P3: Self = Self(0x88C_0000);
    pub const BT2020_PQ: Self = Self(0x91A_0000);
}

/// HAL pixel format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub i32);

impl PixelFormat {
    pub const UNKNOWN: Self = Self(0);
    pub const RGBA_8888: Self = Self(1);
    pub const RGBX_8888: Self = Self(2);
    pub const RGB_888: Self = Self(3);
    pub const RGB_565: Self = Self(4);
    pub const BGRA_8888: Self = Self(5);
    pub const RGBA_FP16: Self = Self(0x16);
    pub const RGBA_1010102: Self = Self(0x2B);
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    None = 0,
    Graphics = 1,
    Photo = 2,
    Cinema = 3,
    Game = 4,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTransform {
    Identity = 0,
    ArbitraryMatrix = 1,
}

/// How a physical display is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayConnectionType {
    Internal,
    External,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hdr {
    DolbyVision = 1,
    Hdr10 = 2,
    Hlg = 3,
    Hdr10Plus = 4,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HdrCapabilities {
    pub types: Vec<Hdr>,
    pub max_luminance: f32,
    pub max_average_luminance: f32,
    pub min_luminance: f32,
}

/// Constraints for a refresh-rate switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VsyncPeriodChangeConstraints {
    pub desired_time_nanos: Nsecs,
    pub seamless_required: bool,
}

/// When a refresh-rate switch takes effect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VsyncPeriodChangeTimeline {
    pub new_vsync_applied_time_nanos: Nsecs,
    pub refresh_required: bool,
    pub refresh_time_nanos: Nsecs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentSamplingAttributes {
    pub format: PixelFormat,
    pub dataspace: Dataspace,
    pub component_mask: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayedFrameStats {
    pub num_frames: u64,
    pub component_samples: [Vec<u64>; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerGenericMetadataKey {
    pub name: String,
    pub mandatory: bool,
}

/// Format and dataspace the device would like the client target in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientTargetProperty {
    pub pixel_format: PixelFormat,
    pub dataspace: Dataspace,
}

/// Device-assigned layer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Opaque graphics buffer handle; allocation happens elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Outcome of the combined present-or-validate call.
///
/// The device reports it as 0/1/2; anything else is a transport bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOrValidateState {
    /// Validated only; nothing was committed.
    OnlyValidated,
    /// Committed, and no composition-type overrides are pending.
    CommittedNoChanges,
    /// Committed, but the device reports composition changes to reconcile.
    CommittedWithChanges,
}

impl PresentOrValidateState {
    pub fn is_committed(self) -> bool {
        !matches!(self, Self::OnlyValidated)
    }

    /// Whether the coordinator accepts reported changes on the caller's
    /// behalf. A commit with changes leaves acceptance to the caller's next
    /// validate.
    pub fn accepts_changes_implicitly(self) -> bool {
        !matches!(self, Self::CommittedWithChanges)
    }
}

impl TryFrom<u32> for PresentOrValidateState {
    type Error = u32;

    fn try_from(raw: u32) -> std::result::Result<Self, u32> {
        match raw {
            0 => Ok(Self::OnlyValidated),
            1 => Ok(Self::CommittedNoChanges),
            2 => Ok(Self::CommittedWithChanges),
            other => Err(other),
        }
    }
}
