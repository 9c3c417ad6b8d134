//! Camera node: grabs frames from a V4L2 device until it disappears.

use cam_acquire::{CameraSession, ChannelSink, Format, FourCC, NodeConfig, Published, V4L2Device};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::thread;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device index, overriding the configuration.
    #[arg(short, long)]
    device: Option<u32>,

    /// Capture width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Capture height in pixels.
    #[arg(long, default_value_t = 480)]
    height: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run(Args::parse()) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(index) = args.device {
        config.device_index = index;
    }

    let format = Format::new(args.width, args.height, FourCC::YUYV);
    let device = V4L2Device::open(config.device_index, &format)?;
    info!(
        card = %device.capabilities().card,
        driver = %device.capabilities().driver,
        "Opened camera"
    );

    let sink = ChannelSink::new();
    let mut frames = sink.subscribe();
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(move || loop {
            match frames.blocking_recv() {
                Ok(Published::Frame { frame, info }) => debug!(
                    sequence = frame.metadata.sequence,
                    bytes = frame.data.len(),
                    frame_id = %info.frame_id,
                    "Frame"
                ),
                Ok(Published::ExposureTimes(times)) => {
                    debug!(times = ?times.exposure_times, "Sequence exposure times");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Consumer fell behind"),
                Err(RecvError::Closed) => break,
            }
        });

        // Dropping the session closes the sink and ends the consumer loop.
        let session = CameraSession::new(device, sink, config);
        let result = session.run(&stop);
        drop(session);
        info!("Shutting down");
        result
    })?;

    Ok(())
}
