//! shadowcap -- run one shadow session from the command line.
//!
//! Usage: `shadowcap [CONFIG]`
//!
//! Captures the desktop at the configured frame interval, drains the updated
//! region the way an encoder would, and logs capture statistics.

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shadowcap::config::{CaptureConfig, Config};
use shadowcap::platform::{create_subsystem, ErrorKind, ShadowSubsystem};
use shadowcap::surface::Surface;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("shadowcap v{}", env!("CARGO_PKG_VERSION"));

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };

    let mut subsystem = create_subsystem(&config)?;
    subsystem.init()?;

    let monitor = subsystem
        .monitors()
        .first()
        .copied()
        .ok_or("backend reported no monitor")?;
    let surface = Arc::new(Surface::new(
        u16::try_from(monitor.width())?,
        u16::try_from(monitor.height())?,
    ));
    subsystem.start(Arc::clone(&surface))?;

    let result = drive(subsystem.as_ref(), &surface, &config.capture);
    subsystem.stop()?;
    subsystem.uninit()?;
    result
}

#[derive(Debug, Default)]
struct FrameStats {
    frames: u64,
    idle: u64,
    errors: u64,
    pixels: u64,
    rects: u64,
}

fn drive(
    subsystem: &dyn ShadowSubsystem,
    surface: &Surface,
    config: &CaptureConfig,
) -> Result<(), Box<dyn Error>> {
    let frame_interval = Duration::from_millis(config.frame_interval_ms);
    let refresh_interval = Duration::from_millis(config.full_refresh_interval_ms);
    let deadline = (config.duration_secs > 0)
        .then(|| Instant::now() + Duration::from_secs(config.duration_secs));
    let polled = !subsystem.features().damage;
    if polled {
        log::info!("capture: no damage events, refreshing every {refresh_interval:?}");
    }

    let mut stats = FrameStats::default();
    let mut last_refresh = Instant::now();
    let mut last_report = Instant::now();

    loop {
        let tick = Instant::now();
        if deadline.is_some_and(|d| tick >= d) {
            break;
        }

        if polled && tick.duration_since(last_refresh) >= refresh_interval {
            subsystem.refresh_full_screen()?;
            last_refresh = tick;
        }

        match subsystem.surface_copy() {
            Ok(Some(rect)) => {
                stats.frames += 1;
                stats.pixels += rect.area();
            }
            Ok(None) => stats.idle += 1,
            Err(e) => match e.kind() {
                ErrorKind::Transient | ErrorKind::DegradedCapability => {
                    log::warn!("capture: {e}");
                    stats.errors += 1;
                }
                ErrorKind::FatalInit | ErrorKind::Lifecycle => return Err(e.into()),
            },
        }

        // Stand-in for the encoder consuming the frame.
        stats.rects += surface.lock().take_updates().rects().len() as u64;

        if last_report.elapsed() >= REPORT_INTERVAL {
            log::info!(
                "capture: {} frames ({} idle, {} failed), {} pixels in {} rects",
                stats.frames,
                stats.idle,
                stats.errors,
                stats.pixels,
                stats.rects
            );
            stats = FrameStats::default();
            last_report = Instant::now();
        }

        thread::sleep(frame_interval.saturating_sub(tick.elapsed()));
    }

    log::info!("capture: session duration reached");
    Ok(())
}
