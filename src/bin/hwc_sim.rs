//! Drive the coordinator against the simulated device
//!
//! Plugs in one or two displays, runs a handful of frames through the
//! present/validate negotiation, unplugs and tears everything down, then
//! prints the coordinator dump.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hwc_coordinator::composer::ComposerCallback;
use hwc_coordinator::fence::monotonic_now;
use hwc_coordinator::hal::{
    Composition, Dataspace, HwcDisplayId, LayerId, Nsecs, PixelFormat, VsyncPeriodChangeTimeline,
    VsyncPeriodNanos,
};
use hwc_coordinator::sim::{make_edid, SimComposer, SimDisplay};
use hwc_coordinator::{
    Connection, DisplayId, Fence, HwComposer, HwcConfig, PhysicalDisplayId, PowerMode, Vsync,
};

const INTERNAL_HWC_ID: HwcDisplayId = 1;
const EXTERNAL_HWC_ID: HwcDisplayId = 2;

#[derive(Parser, Debug)]
#[command(name = "hwc-sim")]
#[command(about = "Run the composer coordinator against a simulated device", long_about = None)]
struct Args {
    /// Number of frames to run per display
    #[arg(short, long, default_value_t = 6)]
    frames: u32,

    /// Also plug in an external display
    #[arg(short, long)]
    external: bool,

    /// Give displays identification data (generalized multi-display mode)
    #[arg(long)]
    edid: bool,

    /// Device reports vsync period switching (composer 2.4 callbacks)
    #[arg(long)]
    vsync_switching: bool,

    /// TOML config file; defaults to HWC_CONFIG and environment overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the rolling log file
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(short, long)]
    debug: bool,
}

/// Device callbacks are queued and handled on the main thread, the same
/// context that produces frames.
#[derive(Debug)]
enum Event {
    Hotplug(HwcDisplayId, Connection),
    Vsync(HwcDisplayId, Nsecs),
    Refresh(HwcDisplayId),
}

struct Host {
    events: Mutex<Sender<Event>>,
}

impl Host {
    fn send(&self, event: Event) {
        if self.events.lock().send(event).is_err() {
            warn!("Event loop is gone, dropping device callback");
        }
    }
}

impl ComposerCallback for Host {
    fn on_composer_hal_hotplug(&self, display: HwcDisplayId, connection: Connection) {
        self.send(Event::Hotplug(display, connection));
    }

    fn on_composer_hal_refresh(&self, display: HwcDisplayId) {
        self.send(Event::Refresh(display));
    }

    fn on_composer_hal_vsync(
        &self,
        display: HwcDisplayId,
        timestamp: Nsecs,
        _period: Option<VsyncPeriodNanos>,
    ) {
        self.send(Event::Vsync(display, timestamp));
    }

    fn on_composer_hal_vsync_period_timing_changed(
        &self,
        hwc_display: HwcDisplayId,
        timeline: &VsyncPeriodChangeTimeline,
    ) {
        debug!(hwc_display, ?timeline, "Vsync period timing changed");
    }

    fn on_composer_hal_seamless_possible(&self, hwc_display: HwcDisplayId) {
        debug!(hwc_display, "Seamless mode switch possible");
    }
}

#[derive(Default)]
struct Stats {
    vsyncs_accepted: u32,
    vsyncs_dropped: u32,
}

fn drain_events(
    hwc: &HwComposer,
    events: &Receiver<Event>,
    displays: &mut HashMap<HwcDisplayId, PhysicalDisplayId>,
    stats: &mut Stats,
) {
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Hotplug(hwc_id, connection) => {
                let Some(info) = hwc.on_hotplug(hwc_id, connection) else {
                    warn!(hwc_id, ?connection, "Hotplug ignored");
                    continue;
                };
                match connection {
                    Connection::Connected => {
                        info!(hwc_id, display = %info.id, name = %info.name, "Display ready");
                        displays.insert(hwc_id, info.id);
                    }
                    _ => {
                        displays.remove(&hwc_id);
                    }
                }
            }
            Event::Vsync(hwc_id, timestamp) => {
                if hwc.on_vsync(hwc_id, timestamp) {
                    stats.vsyncs_accepted += 1;
                } else {
                    stats.vsyncs_dropped += 1;
                }
            }
            Event::Refresh(hwc_id) => debug!(hwc_id, "Refresh requested"),
        }
    }
}

fn init_logging(args: &Args) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = args.log_dir.clone().unwrap_or_else(|| {
        std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".local/state")))
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("hwc-sim")
    });
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let crash_log = log_dir.join("crash.log");
    std::panic::set_hook(Box::new(move |panic_info| {
        eprintln!("PANIC: {}", panic_info);
        if let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&crash_log)
        {
            use std::io::Write;
            let _ = writeln!(f, "[{}] PANIC: {}", chrono::Local::now(), panic_info);
        }
    }));

    let file_appender = rolling::daily(&log_dir, "hwc-sim.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if args.debug {
        "debug"
    } else {
        "warn,hwc_coordinator=info,hwc_sim=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!(log_path = %log_dir.display(), "hwc-sim starting");
    Ok(guard)
}

fn run_frame(
    sim: &SimComposer,
    hwc: &HwComposer,
    hwc_id: HwcDisplayId,
    id: DisplayId,
    layer: LayerId,
    frame: u32,
    previous_present_fence: &Fence,
) -> Result<Fence> {
    // Every third frame needs client composition for the layer.
    if frame % 3 == 2 {
        sim.set_changed_types(hwc_id, [(layer, Composition::Client)].into_iter().collect());
    }
    sim.set_release_fences(
        hwc_id,
        [(layer, Fence::signaled(monotonic_now()))].into_iter().collect(),
    );

    let changes = hwc.get_device_composition_changes(id)?;
    if let Some(changes) = &changes {
        info!(
            display = %id,
            frame,
            changed = changes.changed_types.len(),
            "Device requested composition changes"
        );
        if changes.changed_types.values().any(|c| *c == Composition::Client) {
            hwc.set_client_target(id, 0, &Fence::NO_FENCE, None, Dataspace::SRGB)?;
        }
    }

    let earliest_present_time = Instant::now() + Duration::from_millis(4);
    hwc.present_and_get_release_fences(id, earliest_present_time, previous_present_fence)?;

    let present_fence = hwc.get_present_fence(id);
    let release_fence = hwc.get_layer_release_fence(id, layer);
    debug!(
        display = %id,
        frame,
        present = ?present_fence.signal_time(),
        release = ?release_fence.signal_time(),
        "Frame done"
    );
    Ok(present_fence)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logging(&args)?;

    let config = match &args.config {
        Some(path) => HwcConfig::load(path)?,
        None => HwcConfig::from_env()?,
    };

    let sim = Arc::new(SimComposer::new());
    sim.set_vsync_period_switch_supported(args.vsync_switching);
    sim.set_max_virtual_display_count(1);
    let (internal, external) = if args.edid {
        (
            SimDisplay::with_edid(0, make_edid("SIM", 0x0001, "Sim Panel")),
            SimDisplay::with_edid(1, make_edid("SIM", 0x0002, "Sim Monitor")),
        )
    } else {
        (SimDisplay::default(), SimDisplay::default())
    };
    sim.add_display(INTERNAL_HWC_ID, internal);
    if args.external {
        sim.add_display(EXTERNAL_HWC_ID, external);
    }

    let hwc = HwComposer::new(sim.clone(), config);
    let (tx, rx) = mpsc::channel();
    hwc.set_callback(Arc::new(Host {
        events: Mutex::new(tx),
    }));

    let mut displays = HashMap::new();
    let mut stats = Stats::default();

    sim.hotplug(INTERNAL_HWC_ID, Connection::Connected);
    if args.external {
        sim.hotplug(EXTERNAL_HWC_ID, Connection::Connected);
    }
    drain_events(&hwc, &rx, &mut displays, &mut stats);

    let mut hwc_ids: Vec<HwcDisplayId> = displays.keys().copied().collect();
    hwc_ids.sort_unstable();

    let mut layers = HashMap::new();
    for &hwc_id in &hwc_ids {
        let id = displays[&hwc_id];
        hwc.set_power_mode(id, PowerMode::On)?;
        hwc.set_vsync_enabled(id, Vsync::Enable)?;
        layers.insert(hwc_id, hwc.create_layer(id.into())?);
        for mode in hwc.get_modes(id) {
            info!(display = %id, ?mode, "Display mode");
        }
    }

    let mirror = displays.get(&INTERNAL_HWC_ID).copied();
    let virtual_display = hwc
        .allocate_virtual_display(1280, 720, PixelFormat::RGBA_8888, mirror)
        .context("allocating virtual display")?;
    info!(display = %virtual_display.id, format = ?virtual_display.format, "Virtual display ready");

    let mut present_fences: HashMap<HwcDisplayId, Fence> = HashMap::new();
    for frame in 0..args.frames {
        for &hwc_id in &hwc_ids {
            let timestamp = monotonic_now();
            sim.vsync(hwc_id, timestamp);
            // Devices sometimes repeat a timestamp; the coordinator drops it.
            if frame == 0 {
                sim.vsync(hwc_id, timestamp);
            }
        }
        drain_events(&hwc, &rx, &mut displays, &mut stats);

        for &hwc_id in &hwc_ids {
            let id: DisplayId = displays[&hwc_id].into();
            let previous = present_fences.remove(&hwc_id).unwrap_or_default();
            let fence = run_frame(&sim, &hwc, hwc_id, id, layers[&hwc_id], frame, &previous)?;
            present_fences.insert(hwc_id, fence);
        }
    }

    info!(
        accepted = stats.vsyncs_accepted,
        dropped = stats.vsyncs_dropped,
        "Vsync summary"
    );

    for &hwc_id in hwc_ids.iter().rev() {
        let id = displays[&hwc_id];
        hwc.set_vsync_enabled(id, Vsync::Disable)?;
        hwc.set_power_mode(id, PowerMode::Off)?;
        sim.hotplug(hwc_id, Connection::Disconnected);
        drain_events(&hwc, &rx, &mut displays, &mut stats);
        hwc.destroy_display(id.into())?;
    }
    hwc.destroy_display(virtual_display.id.into())?;

    println!("{}", hwc.dump());
    Ok(())
}
