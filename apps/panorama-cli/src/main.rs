//! Command-line front-end for the panorama stitcher.
//!
//! ```bash
//! # Two synthetic cameras, tiled, no outputs
//! panorama
//!
//! # Full task from a JSON description, stopping after a minute
//! panorama --config task.json --duration 60
//! ```

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use panorama_engine::create_engine;
use panorama_ipc::{
    command_channel, event_channel, FrameSize, StitchConfig, StopReason, TaskCommand, TaskConfig,
    TaskEvent, VideoSourceConfig,
};

#[derive(Parser, Debug)]
#[command(name = "panorama", version, about = "Live multi-camera panorama stitcher")]
struct Args {
    /// JSON task description; two synthetic cameras when omitted.
    #[arg(short, long, env = "PANORAMA_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(short, long)]
    duration: Option<u64>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print periodic metrics.
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = load_config(args.config.as_ref())?;
    info!(
        sources = config.video.devices.len(),
        stitch = config.stitch.is_some(),
        stream = config.stream.is_some(),
        record = config.record.is_some(),
        "Starting panorama task"
    );

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let engine = thread::Builder::new()
        .name("engine".into())
        .spawn(move || {
            let mut engine = create_engine(command_rx, event_tx);
            engine.run();
        })
        .context("failed to spawn engine thread")?;

    let interrupt_tx = command_tx.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted, shutting down");
        let _ = interrupt_tx.try_send(TaskCommand::Shutdown);
    })
    .context("failed to install Ctrl-C handler")?;

    send_open_commands(&command_tx, config)?;

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut shutdown_sent = false;
    let mut failure: Option<StopReason> = None;

    loop {
        if !shutdown_sent && deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Duration elapsed, shutting down");
            shutdown(&command_tx, &mut shutdown_sent);
        }

        match event_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(TaskEvent::Ready) => info!("Engine ready"),
            Ok(TaskEvent::Log { message }) => println!("{message}"),
            Ok(TaskEvent::SourceFrameRate { fps }) => println!("Video source fps: {fps:.1}"),
            Ok(TaskEvent::StitchFrameRate { fps }) => println!("Video stitch fps: {fps:.1}"),
            Ok(TaskEvent::SubsystemChanged { subsystem, state }) => {
                info!(subsystem = subsystem.name(), ?state, "Subsystem changed");
            }
            Ok(TaskEvent::Resynchronized { spread_us }) => {
                warn!(spread_us, "Sources resynchronized");
            }
            Ok(TaskEvent::Metrics(metrics)) => {
                if args.metrics {
                    println!(
                        "stitch {:.1} fps | captured {} synced {} stitched {} sent {} saved {} | drops {} resyncs {}",
                        metrics.stitch_fps,
                        metrics.frames_captured,
                        metrics.frame_sets_synced,
                        metrics.frames_stitched,
                        metrics.frames_sent,
                        metrics.frames_saved,
                        metrics.queue_drops,
                        metrics.resyncs,
                    );
                }
            }
            Ok(TaskEvent::Status { subsystems, finished }) => {
                info!(?subsystems, finished, "Status");
            }
            Ok(TaskEvent::Finished { reason }) => {
                println!("{}", reason.message());
                if reason != StopReason::UserRequested {
                    failure = Some(reason);
                }
                shutdown(&command_tx, &mut shutdown_sent);
            }
            Ok(TaskEvent::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                error!("Engine exited without shutting down");
                break;
            }
        }
    }

    engine
        .join()
        .map_err(|_| anyhow!("engine thread panicked"))?;

    if let Some(reason) = failure {
        bail!("task failed: {}", reason.message());
    }
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "panorama={level},panorama_engine={level},panorama_capture={level},\
             panorama_render={level},panorama_output={level},panorama_media={level}"
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<TaskConfig> {
    let Some(path) = path else {
        return Ok(demo_config());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn demo_config() -> TaskConfig {
    TaskConfig {
        video: VideoSourceConfig {
            devices: vec![
                "test://pattern".to_string(),
                "test://pattern?hue=96&offset_ms=7".to_string(),
            ],
            frame_size: FrameSize::new(640, 360),
            ..Default::default()
        },
        stitch: Some(StitchConfig {
            frame_size: FrameSize::new(1280, 360),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Queue the open commands in dependency order.
fn send_open_commands(tx: &Sender<TaskCommand>, config: TaskConfig) -> Result<()> {
    let mut commands = vec![TaskCommand::OpenVideoDevices(config.video)];
    commands.extend(config.audio.map(TaskCommand::OpenAudioDevice));
    commands.extend(config.stitch.map(TaskCommand::BeginVideoStitch));
    commands.extend(config.stream.map(TaskCommand::OpenLiveStream));
    commands.extend(config.record.map(TaskCommand::BeginSaveToDisk));
    commands.push(TaskCommand::GetStatus);

    for command in commands {
        tx.send(command).context("engine stopped accepting commands")?;
    }
    Ok(())
}

fn shutdown(tx: &Sender<TaskCommand>, sent: &mut bool) {
    if !*sent {
        *sent = true;
        if let Err(e) = tx.send(TaskCommand::Shutdown) {
            warn!("Failed to send shutdown: {}", e);
        }
    }
}
