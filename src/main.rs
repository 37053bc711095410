use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qus_connect::domain::models::{AppEvent, DeviceId};
use qus_connect::domain::session::SessionAction;
use qus_connect::domain::settings::SettingsService;
use qus_connect::domain::statistics::Metric;
use qus_connect::infrastructure::bluetooth::protocol::obu;
use qus_connect::infrastructure::bluetooth::service::{
    BluetoothService, DeviceRequest, LiveSnapshot, ServiceCommand,
};
use qus_connect::infrastructure::logging::init_logger;
use qus_connect::infrastructure::publisher::{DiscardSink, JsonLinesSink, TrackpointSink};
use qus_connect::infrastructure::replay::{load_capture, ReplayTransport};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Replay captured OBU frames through the ingest pipeline
    Replay {
        /// One hex-encoded frame per line, `#` starts a comment
        capture: PathBuf,
        /// Settings file (defaults to the per-user config file)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Delay between frames
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
        /// Start the session without GNSS
        #[arg(long)]
        no_gnss: bool,
        /// Print published records as JSON lines
        #[arg(long)]
        publish: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        CliCommand::Replay {
            capture,
            config,
            interval_ms,
            no_gnss,
            publish,
        } => replay(capture, config, interval_ms, no_gnss, publish).await,
    }
}

async fn replay(
    capture: PathBuf,
    config: Option<PathBuf>,
    interval_ms: u64,
    no_gnss: bool,
    publish: bool,
) -> Result<()> {
    let mut settings_service = match config {
        Some(path) => SettingsService::from_path(path),
        None => SettingsService::new()?,
    };

    let _logging_guard = init_logger(&settings_service.get().logging)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    {
        let s = settings_service.get_mut();
        // The session has to be running before frames start to flow.
        s.auto_enable_notifications = false;
        if publish {
            s.publisher.enabled = true;
        }
    }
    let profile = settings_service.get().default_profile;
    let settings = Arc::new(Mutex::new(settings_service));

    let frames = load_capture(&capture)?;
    let frame_count = frames.len();
    info!("Loaded {} frames from {}", frame_count, capture.display());

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (transport, replay_done) = ReplayTransport::new(
        frames,
        Duration::from_millis(interval_ms),
        transport_tx.clone(),
    );
    let device = transport.device_id().clone();

    let sink: Box<dyn TrackpointSink> = if publish {
        Box::new(JsonLinesSink::new(std::io::stdout()))
    } else {
        Box::new(DiscardSink)
    };
    let (handle, mut events, service_task) =
        BluetoothService::spawn(transport, transport_tx, transport_rx, settings, sink)?;

    handle.start_scan()?;
    wait_for(&mut events, "discovery", |event| {
        matches!(event, AppEvent::DevicesChanged(devices) if devices.iter().any(|d| d.id == device))
    })
    .await?;

    handle.connect(&device)?;
    wait_for(&mut events, "characteristic discovery", |event| {
        matches!(event, AppEvent::DevicesChanged(devices)
            if devices.iter().any(|d| d.id == device && d.has_characteristic(obu::NUS_TX)))
    })
    .await?;

    for request in [
        DeviceRequest::SyncTime,
        DeviceRequest::SetProfile(profile),
        DeviceRequest::RequestUuid,
        DeviceRequest::RequestInfo,
    ] {
        handle.device(&device, request)?;
    }

    let start = if no_gnss {
        SessionAction::StartWithoutGnss
    } else {
        SessionAction::Start
    };
    handle.session(&device, start)?;
    handle.send(ServiceCommand::EnableNotifications(device.clone()))?;
    wait_for(&mut events, "notifications", |event| {
        matches!(event, AppEvent::NotificationsReady(id) if id == &device)
    })
    .await?;

    let delivered = replay_done.await.context("Replay stream ended early")?;
    let snapshot = handle.snapshot().await?;
    print_summary(&device, frame_count, delivered, &snapshot);

    handle.session(&device, SessionAction::Stop)?;
    handle.disconnect(&device)?;
    handle.shutdown();
    service_task.await?;
    Ok(())
}

/// Wait for the first event matching `predicate`.
async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<AppEvent>,
    step: &str,
    predicate: impl Fn(&AppEvent) -> bool,
) -> Result<AppEvent> {
    let wait = async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
            if let AppEvent::LogMessage(message) = &event {
                debug!("{:?}: {}", message.severity, message.message);
            }
        }
        anyhow::bail!("Bluetooth service stopped during {}", step)
    };

    tokio::time::timeout(STEP_TIMEOUT, wait)
        .await
        .with_context(|| format!("Timed out waiting for {}", step))?
}

fn print_summary(device: &DeviceId, frames: usize, delivered: usize, snapshot: &LiveSnapshot) {
    println!("device:      {}", device);
    println!("frames:      {} of {} delivered", delivered, frames);
    if let Some(id) = snapshot.session.id {
        println!("session:     {}", id);
    }
    println!("state:       {:?}", snapshot.session.state);
    println!("elapsed:     {} s", snapshot.session.elapsed_seconds);

    for metric in Metric::ALL {
        let stat = snapshot.statistics.get(metric);
        let average = stat
            .average()
            .map(|avg| format!("{:.3}", avg))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} avg {:>10}  samples {:>6}  points {:>6}",
            format!("{:?}", metric),
            average,
            stat.count,
            snapshot.buffers.series(metric).len()
        );
    }

    if let Some(record) = snapshot.devices.iter().find(|d| &d.id == device) {
        if let Some(info) = &record.device_info {
            let battery = info.battery();
            println!(
                "battery:     {}% ({} mV), firmware {}",
                battery.level, battery.voltage, info.firmware_version
            );
        }
    }
}
