use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use facegate_core::{Console, Controller, InputDevice, JsonFile, SystemClock, TemplateStore, Vision};
use facegate_hw::{Camera, CameraSource, SysfsButtons};
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod name_input;
mod vision;

use config::Config;
use display::TerminalDisplay;
use name_input::PagedNameInput;
use vision::{HelperProcess, VisionHelper};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the appliance screen; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        store = %config.store_path.display(),
        camera = %config.camera.device,
        vision = %config.vision.command,
        "configuration loaded"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let mut appliance = tokio::task::spawn_blocking(move || run_appliance(config, flag));

    tokio::select! {
        joined = &mut appliance => {
            joined.context("appliance thread panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupt received, stopping at next tick");
            shutdown.store(true, Ordering::Relaxed);
            appliance.await.context("appliance thread panicked")??;
        }
    }

    tracing::info!("facegated stopped");
    Ok(())
}

/// Build the hardware collaborators and run the menu loop to completion.
///
/// Runs on a blocking thread: the poll loop sleeps between ticks and the
/// collaborators are not `Send`, so they are created here.
fn run_appliance(config: Config, shutdown: Arc<AtomicBool>) -> Result<()> {
    let tuning = config.tuning;

    let camera = Camera::open(&config.camera.device, config.camera.width, config.camera.height)
        .with_context(|| format!("failed to open camera {}", config.camera.device))?;
    let buttons = SysfsButtons::open(config.button_pins(), config.buttons.active_low)
        .context("failed to set up gpio buttons")?;

    let mut helper = HelperProcess::new(
        config.vision.command.clone(),
        config.vision.args.clone(),
        Duration::from_millis(config.vision.timeout_ms.into()),
    );
    if let Err(e) = helper.start() {
        tracing::warn!(error = %e, "vision helper not running yet, will retry on demand");
    }
    let helper = VisionHelper::new(helper);
    let vision = Vision::new(
        Box::new(CameraSource::new(camera)),
        Box::new(helper.clone()),
        Box::new(helper),
    );

    let console = Console::new(
        InputDevice::new(Box::new(buttons), &tuning),
        Box::new(TerminalDisplay::new(std::io::stdout(), true)),
        Box::new(SystemClock::new()),
        tuning,
    )
    .with_shutdown(shutdown);

    let (store, status) = TemplateStore::load(JsonFile::new(&config.store_path));

    let mut controller = Controller::new(
        console,
        vision,
        store,
        Box::new(PagedNameInput),
        config.settings(),
    );
    controller.report_load_status(&status);
    controller.run().context("controller stopped with an error")?;
    Ok(())
}
