use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use remapd::broadcast::EventHub;
use remapd::config::DaemonConfig;
use remapd::controller::{ControllerHandle, ControllerSettings};
use remapd::output::UinputSink;
use remapd::persistence::{config_root, watcher, DevicePaths, ProfileStore};
use remapd::switcher::{auto_switch_available, AutoSwitcher, X11Probe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "remapd", version, about = "Remaps joystick keypad input to keyboard and mouse")]
struct Args {
    /// Serial of the target device
    #[arg(long)]
    serial: Option<String>,

    /// Product id of the target device (0x-prefixed hex or decimal); the first
    /// matching device is used. Only needed when the device has no serial.
    #[arg(long, value_parser = parse_product_id)]
    product_id: Option<u16>,

    /// Wait for the device to connect instead of exiting if it is not found
    #[arg(long)]
    wait: bool,

    /// Only log errors
    #[arg(long)]
    quiet: bool,

    /// Daemon config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not switch profiles based on the focused window
    #[arg(long)]
    no_auto_switch: bool,
}

fn parse_product_id(value: &str) -> std::result::Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid product id {:?}: {}", value, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.quiet)?;

    let product_id = args.product_id.filter(|id| *id != 0);
    let identifier = match (&args.serial, product_id) {
        (Some(serial), _) if !serial.is_empty() => serial.clone(),
        (_, Some(product_id)) => product_id.to_string(),
        _ => return Err(eyre!("No input device serial/product-id provided")),
    };

    let config_path = args.config.clone().unwrap_or_else(DaemonConfig::default_path);
    let config = DaemonConfig::load(&config_path).await?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let controller_settings = ControllerSettings {
        serial: args.serial.clone().filter(|s| !s.is_empty()),
        product_id,
        wait: args.wait,
        retry_interval: config.device_retry(),
        input_dir: config.input_dir.clone(),
        event_queue: config.event_queue,
    };

    let Some(session) = ControllerHandle::connect(&controller_settings, &cancel)
        .await
        .map_err(|e| eyre!("Failed to connect to device: {}", e))?
    else {
        info!("Cancelled while waiting for device");
        return Ok(());
    };
    let device_product_id = session
        .product_id()
        .ok_or_else(|| eyre!("Connected device has no product id"))?;

    let paths = DevicePaths::new(&config_root(), &identifier);
    paths
        .ensure_dirs()
        .await
        .map_err(|e| eyre!("Failed to create {}: {}", paths.profiles_dir.display(), e))?;

    let hub = EventHub::new(config.subscriber_capacity);
    let store = Arc::new(ProfileStore::new(paths, device_product_id, hub.clone()));
    store.create_if_missing().await?;
    store.load_metadata().await;
    store.load_all().await?;
    store
        .reload_active()
        .await
        .map_err(|e| eyre!("Failed to load active profile: {}", e))?;

    let watcher_task = tokio::spawn(watcher::watch_profiles(
        store.clone(),
        config.watch_debounce(),
        cancel.clone(),
    ));

    let sink = UinputSink::create(&config.output_name_prefix, &identifier)?;

    let switcher_task = if auto_switch_available(args.no_auto_switch) {
        let switcher = AutoSwitcher::new(store.clone(), X11Probe, config.window_poll());
        Some(tokio::spawn(switcher.run(cancel.clone())))
    } else {
        None
    };

    let controller = ControllerHandle::spawn(
        session,
        store.subscribe_metadata(),
        store.resolver(),
        sink,
        hub,
        &controller_settings,
        cancel.clone(),
    )?;
    info!("Daemon started, press Ctrl+C to stop");

    let result = controller.join().await;
    // the device session ending stops everything else too
    cancel.cancel();

    match watcher_task.await {
        Ok(Err(e)) => warn!("Profile watcher failed: {}", e),
        Err(e) => warn!("Profile watcher task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Some(task) = switcher_task {
        if let Err(e) = task.await {
            warn!("Window watcher task failed: {}", e);
        }
    }

    result.map_err(|e| {
        error!("Device error: {}", e);
        eyre!("Device error: {}", e)
    })
}

fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
            _ = cancel.cancelled() => return,
        };
        info!("Caught {}, shutting down", name);
        cancel.cancel();
    });
    Ok(())
}

fn setup(quiet: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(quiet);
    Ok(())
}

fn log_level(quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(Level::INFO)
}

fn setup_logging_env(quiet: bool) {
    FmtSubscriber::builder()
        .with_max_level(log_level(quiet))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_product_id() {
        assert_eq!(parse_product_id("0x0f3f"), Ok(3903));
        assert_eq!(parse_product_id("0X10BC"), Ok(4284));
        assert_eq!(parse_product_id("4355"), Ok(4355));
        assert!(parse_product_id("0xzz").is_err());
        assert!(parse_product_id("70000").is_err());
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["remapd", "--serial", "AZ1", "--wait", "--no-auto-switch"]);
        assert_eq!(args.serial.as_deref(), Some("AZ1"));
        assert!(args.wait);
        assert!(args.no_auto_switch);
        assert!(!args.quiet);

        let args = Args::parse_from(["remapd", "--product-id", "0x0f3f"]);
        assert_eq!(args.product_id, Some(3903));
    }
}
