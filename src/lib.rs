//! Composition device coordinator for hwcomposer-style display hardware
//!
//! This library sits between a display compositor and the composition
//! device. It keeps track of which physical and virtual displays exist,
//! negotiates per frame which layers the device can composite itself, paces
//! and sequences presents, and keeps the fences that tell both sides when
//! buffers are ready or free again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Host compositor (frame loop)                │
//! └─────────────────────────────────────────────────────────────┘
//!          │ per-frame negotiation,            ▲ hotplug, vsync,
//!          │ queries and setters               │ refresh callbacks
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HwComposer                            │
//! │  ┌────────────┐ ┌──────────┐ ┌────────────────┐ ┌────────┐  │
//! │  │ Display    │ │ Hotplug  │ │ Present/       │ │ VSync &│  │
//! │  │ Registry   │ │ ident.   │ │ validate +     │ │ power  │  │
//! │  │            │ │          │ │ fences         │ │        │  │
//! │  └────────────┘ └──────────┘ └────────────────┘ └────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     Composer trait (sync)
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │     Device transport (HIDL/AIDL, libhybris, SimComposer)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//! use hwc_coordinator::{Connection, Fence, HwComposer, HwcConfig};
//!
//! let hwc = HwComposer::new(composer, HwcConfig::from_env()?);
//! hwc.set_callback(host.clone());
//!
//! // From the hotplug callback
//! let info = hwc.on_hotplug(hwc_display, Connection::Connected);
//!
//! // Once per frame
//! let changes = hwc.get_device_composition_changes(display)?;
//! hwc.present_and_get_release_fences(display, Instant::now(), &previous_fence)?;
//! let fence = hwc.get_present_fence(display);
//! ```

pub mod composer;
pub mod config;
pub mod display_id;
pub mod error;
pub mod fence;
pub mod hal;
pub mod hotplug;
pub mod hwcomposer;
pub mod identification;
pub mod present;
pub mod registry;
pub mod sim;
pub mod vsync;

pub use composer::{CallbackBridge, Composer, ComposerCallback, HalCallback};
pub use config::HwcConfig;
pub use display_id::{DisplayId, HalVirtualDisplayId, PhysicalDisplayId};
pub use error::Error;
pub use fence::{Fence, SignalTime};
pub use hal::{Connection, HalError, HwcDisplayId, PowerMode, PresentOrValidateState, Vsync};
pub use hwcomposer::{AllocatedVirtualDisplay, HwComposer, HwcDisplayMode};
pub use identification::{DeviceProductInfo, DisplayIdentificationInfo};
pub use present::DeviceRequestedChanges;
pub use registry::{DisplayRole, DisplayRoles, MultiDisplayMode};

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
