use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::join;
use qibla_compass::{
    bearing::compute_bearing,
    config::{CompassConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH},
    geo::{great_circle_distance_km, GeoCoordinate},
    location::GpsdLocationProvider,
    magnetic::MagneticData,
    sensor::PollingSensor,
    session::{CompassFrame, CompassSession, ScreenEvent, ScreenEvents},
    storage::TomlStore,
    view_model::{CompassStatus, CompassViewModel},
};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) mod helpers;

mod imu;

#[derive(Parser)]
#[command(name = "qibla-compass", about = "Qibla direction from gpsd and a BNO055")]
struct Cli {
    /// Config file (defaults to $QIBLA_COMPASS_CONFIG or ./qibla-compass.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live compass until interrupted; SIGHUP refreshes the location
    Run {
        /// Print readings as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the Qibla bearing for a position
    Bearing {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },

    /// Take a fix from gpsd and cache it for the next run
    Locate,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = CompassConfig::load(&config_path(&cli)).context("failed to load config")?;

    match &cli.command {
        Commands::Run { json } => cmd_run(&config, *json).await,
        Commands::Bearing { lat, lon } => cmd_bearing(&config, *lat, *lon),
        Commands::Locate => cmd_locate(&config).await,
    }
}

fn gpsd_provider(config: &CompassConfig) -> GpsdLocationProvider {
    GpsdLocationProvider::new(
        config.location.gpsd_addr.clone(),
        config.location.allow,
        config.location.fix_timeout(),
    )
}

fn cmd_bearing(config: &CompassConfig, lat: f64, lon: f64) -> Result<()> {
    let Some(observer) = GeoCoordinate::checked(lat, lon) else {
        bail!("position {lat}, {lon} is out of range");
    };
    let bearing = compute_bearing(observer, config.target);
    let distance = great_circle_distance_km(observer, config.target);
    println!("Qibla bearing: {bearing:.2}° from true north");
    println!("Distance:      {distance:.0} km");
    if let Some(magnetic) = MagneticData::at(observer, 0.0, Utc::now().date_naive()) {
        println!(
            "Declination:   {:.2}° (magnetic bearing {:.2}°)",
            magnetic.declination,
            qibla_compass::normalize_degrees(bearing - f64::from(magnetic.declination))
        );
    }
    Ok(())
}

async fn cmd_locate(config: &CompassConfig) -> Result<()> {
    let store = TomlStore::open(&config.storage.path).context("failed to open store")?;
    let mut view_model = CompassViewModel::mount(store, &config.settings());
    let mut provider = gpsd_provider(config);
    let coordinate = view_model
        .refresh_location(&mut provider, config.location.accuracy)
        .await
        .map_err(|e| anyhow::anyhow!("{} ({e})", e.user_message()))?;
    println!(
        "Location {:.5}, {:.5} cached, Qibla at {:.2}°",
        coordinate.latitude,
        coordinate.longitude,
        view_model.bearing().unwrap_or_default()
    );
    view_model.unmount();
    Ok(())
}

async fn cmd_run(config: &CompassConfig, json: bool) -> Result<()> {
    let settings = config.settings();
    let store = TomlStore::open(&config.storage.path).context("failed to open store")?;

    let mut magnetometer = imu::Bno055Magnetometer::open(config.sensor.i2c_bus)
        .map_err(|e| anyhow::anyhow!("{} ({e})", e.user_message()))?;
    match magnetometer.restore_calibration(&store) {
        Ok(true) => info!("Restored magnetometer calibration"),
        Ok(false) => info!("No stored calibration, move the device in a figure eight"),
        Err(e) => warn!("Ignoring stored calibration: {e:#}"),
    }
    let mut sensor = PollingSensor::new(magnetometer);
    let mut provider = gpsd_provider(config);
    let mut view_model = CompassViewModel::mount(store, &settings);

    let events = ScreenEvents::new();
    let control = events.sender();
    let (frames_tx, frames_rx) = watch::channel(CompassFrame::default());
    let done = CancellationToken::new();

    let session = CompassSession::new(
        &mut view_model,
        &mut sensor,
        &mut provider,
        config.location.accuracy,
        settings.sample_interval,
    );
    let (result, signals, printer) = join!(
        async {
            let result = session.run(events, &frames_tx).await;
            done.cancel();
            result
        },
        handle_signals(control, done.clone()),
        print_frames(frames_rx, json, done.clone()),
    );

    if let Err(e) = sensor
        .with_source(|magnetometer| magnetometer.save_calibration(view_model.store_mut()))
        .await
    {
        warn!("Could not save calibration: {e:#}");
    }
    view_model.unmount();

    signals?;
    printer?;
    result.map_err(|e| anyhow::anyhow!("{} ({e})", e.user_message()))
}

async fn handle_signals(control: mpsc::Sender<ScreenEvent>, done: CancellationToken) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = done.cancelled() => return Ok(()),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing compass");
                control.send(ScreenEvent::Close).await?;
                return Ok(());
            }
            _ = hangup.recv() => {
                control.send(ScreenEvent::RefreshLocation).await?;
            }
        }
    }
}

async fn print_frames(
    mut frames: watch::Receiver<CompassFrame>,
    json: bool,
    done: CancellationToken,
) -> Result<()> {
    let mut last_status = CompassStatus::Locating;
    loop {
        tokio::select! {
            _ = done.cancelled() => return Ok(()),
            changed = frames.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let frame = frames.borrow_and_update().clone();
                if frame.status != last_status {
                    match &frame.status {
                        CompassStatus::Locating => info!("Locating..."),
                        CompassStatus::Ready => info!("Location ready"),
                        CompassStatus::Failed(e) => warn!("{} ({e})", e.user_message()),
                    }
                    last_status = frame.status.clone();
                }
                let Some(reading) = frame.reading else {
                    continue;
                };
                if json {
                    println!("{}", serde_json::to_string(&reading)?);
                } else {
                    println!(
                        "Qibla {:6.1}°  heading {:6.1}°  turn {:7.1}°  ({:.0} km)",
                        reading.bearing, reading.heading, reading.rotation, reading.distance_km
                    );
                }
            }
        }
    }
}
