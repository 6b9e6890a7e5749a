use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::mpsc;

use mighty_fan_rs::audio::{self, AudioSystem, SourceSpec};
use mighty_fan_rs::config::{Config, DetectorConfig, FanConfig};
use mighty_fan_rs::detector::{
    CalibrationSink, CommandSink, DecodedCommand, DetectorCore, DetectorParams, DetectorSink,
    PerformanceMonitor, PerformanceStatus,
};
use mighty_fan_rs::fan::{FanCommand, FanController, FanIntake, KickSettings, LogPwm, PwmOutput, SysfsPwm};
use mighty_fan_rs::gcode::Transformer;
use mighty_fan_rs::relay::{self, ChannelRelay};

#[derive(Parser, Debug)]
#[command(name = "mighty_fan")]
#[command(about = "Variable fan speed through the printer's buzzer", long_about = None)]
struct Cli {
    /// Runtime configuration overrides (defaults to /etc/default/mightyvariablefan.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Force debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode beep sequences and relay them to the fan controller
    Detect(DetectArgs),
    /// Drive the PWM fan from relayed levels
    Fan(FanArgs),
    /// Detector and fan controller in one process
    Run(RunArgs),
    /// Rewrite fan commands in a G-code file into beep sequences
    Postprocess(PostprocessArgs),
    /// List ALSA capture devices
    ListDevices,
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// Raw S16LE mono PCM file instead of live capture, `-` for stdin
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// ALSA capture device
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    #[arg(long)]
    sensitivity: Option<f32>,
}

impl CaptureArgs {
    fn apply(&self, config: &mut DetectorConfig) {
        if let Some(device) = &self.device {
            config.capture_device = device.clone();
        }
        if let Some(sensitivity) = self.sensitivity {
            config.sensitivity = sensitivity;
        }
    }

    fn source(&self, config: &DetectorConfig) -> SourceSpec {
        match &self.input {
            Some(path) if path.as_os_str() == "-" => SourceSpec::Stdin,
            Some(path) => SourceSpec::File(path.clone()),
            None => SourceSpec::Alsa {
                device: config.capture_device.clone(),
                sample_rate: config.sample_rate,
                chunk_size: config.chunk_size,
            },
        }
    }
}

#[derive(Args, Debug)]
struct DetectArgs {
    #[command(flatten)]
    capture: CaptureArgs,

    /// Collect tuning statistics instead of relaying commands
    #[arg(long)]
    calibrate: bool,

    /// Relay mode: udp, http or none
    #[arg(long, value_name = "MODE")]
    relay: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputKind {
    Sysfs,
    Log,
}

#[derive(Args, Debug)]
struct FanArgs {
    /// Intake UDP address
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    #[arg(long, value_enum, default_value = "sysfs")]
    output: OutputKind,

    /// Sweep the PWM output before serving
    #[arg(long)]
    self_test: bool,
}

impl FanArgs {
    fn apply(&self, config: &mut FanConfig) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    capture: CaptureArgs,

    #[command(flatten)]
    fan: FanArgs,
}

#[derive(Args, Debug)]
struct PostprocessArgs {
    /// G-code file to rewrite
    input: PathBuf,

    /// Output file, stdout if omitted
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Layer height (mm) at which the ramp-up reaches full power
    #[arg(short, long)]
    zmax: Option<f64>,

    /// Ramp-up scale on the first layer
    #[arg(short, long)]
    scale0: Option<f64>,

    /// Seconds to move each sequence ahead of its fan command
    #[arg(short = 't', long)]
    lead_time: Option<f64>,

    #[arg(short, long)]
    feed_factor: Option<f64>,

    #[arg(short = 'l', long)]
    feed_limit_z: Option<f64>,

    /// Split long moves to hit the lead time exactly
    #[arg(long)]
    split_moves: bool,

    #[arg(long, value_name = "LINE")]
    end_marker: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Detect(args) => detect(config, args).await,
        Command::Fan(args) => fan(config, args).await,
        Command::Run(args) => run(config, args).await,
        Command::Postprocess(args) => postprocess(config, args),
        Command::ListDevices => {
            for (name, desc) in audio::list_devices()? {
                println!("{:<30} {}", name, desc);
            }
            Ok(())
        }
    }
}

/// Wait for Ctrl+C or for the detector thread to end by itself.
async fn wait_for_detector<S: DetectorSink + Send + 'static>(system: &AudioSystem<S>) {
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Received Ctrl+C, shutting down...");
                system.stop();
                break;
            }
            _ = poll.tick() => {
                if !system.is_running() {
                    break;
                }
            }
        }
    }

    if system.performance() == Some(PerformanceStatus::Backlogged) {
        log::warn!("Detector was backlogged when it stopped, some commands may have been missed");
    }
}

async fn join_detector<S: DetectorSink + Send + 'static>(system: AudioSystem<S>) -> anyhow::Result<S> {
    tokio::task::spawn_blocking(move || system.join())
        .await
        .context("Detector join task failed")?
}

fn start_detector(
    config: &DetectorConfig,
    capture: &CaptureArgs,
    tx: mpsc::Sender<DecodedCommand>,
) -> anyhow::Result<AudioSystem<CommandSink>> {
    let params = DetectorParams::from_config(config);
    let monitor = PerformanceMonitor::new(
        Duration::from_secs(config.perf_window_secs),
        params.expected_chunk_rate(),
        config.perf_min_rate_ratio,
        config.perf_shortfall_windows,
    );
    let core = DetectorCore::new(params)?;
    AudioSystem::start(capture.source(config), core, CommandSink::new(tx), Some(monitor))
}

async fn detect(mut config: Config, args: DetectArgs) -> anyhow::Result<()> {
    args.capture.apply(&mut config.detector);
    if let Some(mode) = &args.relay {
        config.relay.mode = mode.parse().map_err(anyhow::Error::msg)?;
    }

    if args.calibrate {
        let params = DetectorParams::from_config(&config.detector).for_calibration();
        let sink = CalibrationSink::new(&params);
        let core = DetectorCore::new(params)?;
        log::info!("Calibration running, play the calibration file and press Ctrl+C when done");
        let system = AudioSystem::start(args.capture.source(&config.detector), core, sink, None)?;
        wait_for_detector(&system).await;
        join_detector(system).await?.finish().log_summary();
        return Ok(());
    }

    let (tx, mut rx) = mpsc::channel::<DecodedCommand>(16);
    let relay_task = match relay::from_config(&config.relay).await? {
        Some(relay) => tokio::spawn(relay::run_relay(relay, rx, config.relay.attempts)),
        None => tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                log::info!("Level {} (no relay configured)", command.level);
            }
        }),
    };

    let system = start_detector(&config.detector, &args.capture, tx)?;
    wait_for_detector(&system).await;
    let sink = join_detector(system).await?;
    if sink.dropped() > 0 {
        log::warn!("{} decoded commands were dropped", sink.dropped());
    }
    drop(sink);
    relay_task.await?;
    Ok(())
}

fn open_output(config: &FanConfig, kind: OutputKind) -> anyhow::Result<Box<dyn PwmOutput>> {
    Ok(match kind {
        OutputKind::Sysfs => Box::new(SysfsPwm::open(
            config.pwm_chip,
            config.pwm_channel,
            config.pwm_frequency,
        )?),
        OutputKind::Log => Box::new(LogPwm::default()),
    })
}

/// Controller plus intake. Returns the command sender for in-process producers.
async fn start_fan(
    config: &FanConfig,
    args: &FanArgs,
) -> anyhow::Result<(
    mpsc::Sender<FanCommand>,
    tokio::task::JoinHandle<mighty_fan_rs::Result<()>>,
    tokio::task::JoinHandle<()>,
)> {
    let output = open_output(config, args.output)?;
    let mut controller = FanController::new(KickSettings::from_config(config), output, Instant::now());
    if args.self_test {
        controller.self_test(Duration::from_millis(500)).await;
    }

    let (tx, rx) = mpsc::channel::<FanCommand>(32);
    let intake = FanIntake::bind(&config.listen_addr, tx.clone()).await?;
    let intake_task = tokio::spawn(async move {
        if let Err(e) = intake.run().await {
            log::error!("Fan intake error: {}", e);
        }
    });
    let controller_task = tokio::spawn(controller.run(rx, Duration::from_millis(config.tick_ms)));
    Ok((tx, controller_task, intake_task))
}

async fn fan(mut config: Config, args: FanArgs) -> anyhow::Result<()> {
    args.apply(&mut config.fan);
    let (tx, controller_task, intake_task) = start_fan(&config.fan, &args).await?;

    signal::ctrl_c().await?;
    log::info!("Received Ctrl+C, shutting down...");
    intake_task.abort();
    drop(tx);
    controller_task.await??;
    Ok(())
}

async fn run(mut config: Config, args: RunArgs) -> anyhow::Result<()> {
    args.capture.apply(&mut config.detector);
    args.fan.apply(&mut config.fan);
    let (fan_tx, controller_task, intake_task) = start_fan(&config.fan, &args.fan).await?;

    let (tx, rx) = mpsc::channel::<DecodedCommand>(16);
    let relay = Arc::new(ChannelRelay::new(fan_tx.clone()));
    let relay_task = tokio::spawn(relay::run_relay(relay, rx, config.relay.attempts));

    let system = start_detector(&config.detector, &args.capture, tx)?;
    wait_for_detector(&system).await;
    drop(join_detector(system).await?);
    relay_task.await?;

    intake_task.abort();
    drop(fan_tx);
    controller_task.await??;
    Ok(())
}

fn postprocess(mut config: Config, args: PostprocessArgs) -> anyhow::Result<()> {
    let p = &mut config.postprocess;
    if let Some(v) = args.zmax {
        p.ramp_up_zmax = v;
    }
    if let Some(v) = args.scale0 {
        p.ramp_up_scale0 = v;
    }
    if let Some(v) = args.lead_time {
        p.lead_time = v;
    }
    if let Some(v) = args.feed_factor {
        p.feed_factor = v;
    }
    if let Some(v) = args.feed_limit_z {
        p.feed_limit_z = v;
    }
    if args.split_moves {
        p.split_moves = true;
    }
    if let Some(marker) = args.end_marker {
        p.end_marker = marker;
    }

    let transformer = Transformer::new(config.postprocess)?;
    let input = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;

    // Buffered so a failed transform never leaves a half-written file
    let mut out = Vec::new();
    let report = transformer.transform(BufReader::new(input), &mut out)?;

    match &args.output {
        Some(path) => std::fs::write(path, &out)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout().lock().write_all(&out)?,
    }
    report.log_summary();
    Ok(())
}
