use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use conegate_control::{doctor, pipeline, Pipeline, TriggerZone};
use conegate_fc::channels::{ActuationChannel, ActuationMap};
use conegate_fc::mav::VehicleLink;
use conegate_fc::relay::{relay_from_config, RelayConfig};
use conegate_fc::{FcConfig, FcError};
use conegate_lidar::rplidar::RplidarSource;
use conegate_lidar::source::RangeSource;
use conegate_lidar::{LidarConfig, RangeSampleSource};
use conegate_vision::worker::InferenceWorker;
use conegate_vision::{detector_from_config, frame_source_from_config, DetectorConfig, FramesConfig};

#[derive(Debug, Parser)]
#[command(name = "conegate", version, about = "Conegate - lidar-gated sign detection and RC override")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the config without touching hardware.
    Doctor,
    Run,
    Lidar { #[command(subcommand)] cmd: LidarCmd },
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum LidarCmd {
    Info,
    Health,
    /// Print samples as they arrive, marking those inside the trigger zone.
    Dump {
        #[arg(long, default_value_t = 360)]
        count: u64,
    },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    Arm,
    Disarm,
    Mode { name: String },
    /// Ask the vehicle to stream a message at the given rate.
    Interval { message_id: u32, hz: f32 },
    /// Hold motion channels 1..6 at neutral.
    Neutral,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    lidar: LidarConfig,
    #[serde(default)]
    zone: TriggerZone,
    frames: Option<FramesConfig>,
    detector: Option<DetectorConfig>,
    #[serde(default)]
    fc: FcConfig,
    #[serde(default)]
    relay: RelayConfig,
    #[serde(default)]
    actuation: ActuationMap,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    // exit directly: a blocking heartbeat wait may still be parked on the socket
    if let Err(e) = dispatch(cli).await {
        if let Some(FcError::UnknownMode { requested, valid }) = e.downcast_ref::<FcError>() {
            eprintln!("unknown mode: {}", requested);
            eprintln!("valid modes:");
            for m in valid {
                eprintln!("  {}", m);
            }
        } else {
            error!("{:#}", e);
        }
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    match cli.cmd {
        Command::Doctor => doctor_cmd(&cfg),
        Command::Run => run(&cfg).await,
        Command::Lidar { cmd } => lidar_cmd(&cfg, cmd).await,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await,
    }
}

fn doctor_cmd(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    doctor::check_lidar(&cfg.lidar)?;
    doctor::check_zone(&cfg.zone)?;
    doctor::check_actuation(&cfg.actuation)?;

    let frames = cfg.frames.as_ref().context("no [frames] config section")?;
    frame_source_from_config(frames)?;
    let det = cfg.detector.as_ref().context("no [detector] config section")?;
    doctor::check_detector(det)?;

    anyhow::ensure!(!cfg.fc.url.is_empty(), "fc.url missing");
    if cfg.relay.enable {
        anyhow::ensure!(!cfg.relay.device.is_empty(), "relay.device missing");
        anyhow::ensure!(cfg.relay.baud > 0, "relay.baud invalid");
    } else {
        info!("doctor: relay disabled");
    }

    info!("doctor: OK");
    Ok(())
}

/// Checks `run` needs before any hardware is opened.
fn preflight(cfg: &Config) -> Result<(&FramesConfig, &DetectorConfig)> {
    doctor::check_zone(&cfg.zone)?;
    doctor::check_actuation(&cfg.actuation)?;
    let frames = cfg.frames.as_ref().context("no [frames] config section")?;
    let det = cfg.detector.as_ref().context("no [detector] config section")?;
    doctor::check_detector(det)?;
    Ok((frames, det))
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let (frames_cfg, det_cfg) = preflight(cfg)?;
    let worker = InferenceWorker::new(
        frame_source_from_config(frames_cfg)?,
        detector_from_config(det_cfg)?,
        det_cfg.thresholds(),
        det_cfg.class_names.clone(),
    );

    let mut source = RangeSource::from_config(&cfg.lidar).await?;

    let mut link = connect_vehicle(&cfg.fc).await?;
    if let Some(mode) = cfg.fc.mode.clone() {
        link = blocking(link, move |l| l.set_mode(&mode).map(|_| ())).await?;
    }
    if cfg.fc.arm_on_start {
        link.arm()?;
    }

    let pipe = Pipeline::new(
        worker,
        ActuationChannel::new(link, cfg.actuation.clone()),
        relay_from_config(&cfg.relay),
    )
    .shared();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("run: ctrl-c handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let outcome = conegate_control::run(&mut source, pipe.clone(), cfg.zone.clone(), shutdown).await;

    if cfg.fc.disarm_on_exit {
        if let Err(e) = pipeline::lock(&pipe).actuation_mut().link_mut().disarm() {
            warn!("run: disarm: {:#}", e);
        }
    }

    let summary = outcome?;
    println!(
        "samples={} in_zone={} triggers={} workers={} dropped={}",
        summary.samples, summary.in_zone, summary.triggers, summary.spawned, summary.dropped
    );
    Ok(())
}

async fn lidar_cmd(cfg: &Config, cmd: LidarCmd) -> Result<()> {
    match cmd {
        LidarCmd::Info => {
            let mut lidar = RplidarSource::open(&cfg.lidar)?;
            let info = lidar.info().await?;
            println!("model={} firmware={}.{:02} hardware={}", info.model, info.firmware.0, info.firmware.1, info.hardware);
            println!("serial={}", info.serial);
            Ok(())
        }
        LidarCmd::Health => {
            let mut lidar = RplidarSource::open(&cfg.lidar)?;
            let h = lidar.health().await?;
            println!("status={:?} error_code={}", h.status, h.error_code);
            Ok(())
        }
        LidarCmd::Dump { count } => {
            let mut source = RangeSource::from_config(&cfg.lidar).await?;
            let mut seen = 0u64;
            let res: Result<()> = async {
                while seen < count {
                    let Some(s) = source.next_sample().await? else { break };
                    seen += 1;
                    let mark = if cfg.zone.in_zone(&s) { " *" } else { "" };
                    println!(
                        "{} q={} {:7.2} deg {:8.1} mm{}{}",
                        s.seq,
                        s.quality,
                        s.angle_deg,
                        s.distance_mm,
                        if s.new_scan { " S" } else { "" },
                        mark
                    );
                }
                Ok(())
            }
            .await;
            source.stop().await?;
            res
        }
    }
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    let link = connect_vehicle(&cfg.fc).await?;
    match cmd {
        FcCmd::Arm => blocking(link, |l| l.arm()).await.map(drop),
        FcCmd::Disarm => blocking(link, |l| l.disarm()).await.map(drop),
        FcCmd::Mode { name } => {
            blocking(link, move |l| {
                let id = l.set_mode(&name)?;
                println!("mode {} ({}) acknowledged", name, id);
                Ok(())
            })
            .await
            .map(drop)
        }
        FcCmd::Interval { message_id, hz } => {
            blocking(link, move |l| l.request_message_interval(message_id, hz)).await.map(drop)
        }
        FcCmd::Neutral => {
            let mut act = ActuationChannel::new(link, cfg.actuation.clone());
            let frame = act.neutralize()?;
            println!("neutral: {:?}", frame.touched());
            Ok(())
        }
    }
}

/// Connect and wait for the vehicle heartbeat, bounded by `fc.heartbeat_timeout_ms`.
async fn connect_vehicle(fc: &FcConfig) -> Result<VehicleLink> {
    let link = VehicleLink::connect(&fc.url, fc.sys_id, fc.comp_id)?;
    let handshake = tokio::task::spawn_blocking(move || {
        let mut link = link;
        link.wait_heartbeat().map(|_| link)
    });
    let joined = match fc.heartbeat_timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), handshake)
            .await
            .map_err(|_| anyhow::anyhow!("no vehicle heartbeat on {} within {}ms", fc.url, ms))?,
        None => handshake.await,
    };
    joined.context("heartbeat task")?
}

/// Run a blocking link operation (ack waits) off the async workers.
async fn blocking<F>(mut link: VehicleLink, f: F) -> Result<VehicleLink>
where
    F: FnOnce(&mut VehicleLink) -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&mut link).map(|()| link))
        .await
        .context("vehicle task")?
}
