//! Spectral Capture CLI: list capture sources, or capture and print levels.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use spectral_capture::audio::{
    bass_average, list_sources, sub_bass_average, CaptureError, CaptureQueue, CaptureSession,
    CpalSource, SourceError,
};
use spectral_capture::curve::{CurveBufferProxy, DeviceBufferError, DeviceCommandStream, HostBuffer};
use spectral_capture::{ConfigError, PipelineError, SpectrumConfig, SpectrumPipeline, TickDriver};
use thiserror::Error;

/// How often the status line and the device mirror are refreshed
const REPORT_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "spectral-capture")]
#[command(about = "Capture system audio and print its spectrum. Press Enter to quit.")]
struct Cli {
    /// List capture sources and exit
    #[arg(long)]
    list: bool,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture source ID (overrides the config file)
    #[arg(long)]
    source: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Sources(#[from] SourceError),

    #[error(transparent)]
    DeviceBuffer(#[from] DeviceBufferError),
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    if cli.list {
        for source in list_sources()? {
            println!("{:<40} {}", source.id, source.name);
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => SpectrumConfig::load(path)?,
        None => SpectrumConfig::default(),
    };
    if cli.source.is_some() {
        config.source_id = cli.source.clone();
    }

    let queue = Arc::new(CaptureQueue::new(config.queue_capacity, config.overflow_policy));
    let source_id = config.source_id.clone();
    let mut session = CaptureSession::start(
        move || CpalSource::open(source_id.as_deref()),
        queue.clone(),
        config.poll_interval(),
        config.enqueue_empty_markers,
    )?;
    let format = session.format();

    let proxy = Arc::new(CurveBufferProxy::new(
        config.max_buffer_resolution,
        HostBuffer::new(),
    ));
    let mut pipeline = SpectrumPipeline::new(&config, queue.clone(), format);
    pipeline.attach_proxy(proxy.clone());
    let mut driver = TickDriver::start(pipeline, config.tick_period())?;
    let mut stream = DeviceCommandStream::new()?;

    let quit_rx = spawn_stdin_watcher();
    let deadline = cli.duration_secs.map(|s| Instant::now() + Duration::from_secs(s));
    let nyquist = format.sample_rate as f32 / 2.0;

    println!(
        "Capturing {} Hz, {} channels. Press Enter to quit.",
        format.sample_rate, format.channels
    );

    let result = loop {
        match quit_rx.recv_timeout(REPORT_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break Ok(()),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break Ok(());
        }
        if !session.is_running() {
            break match session.last_error() {
                Some(e) => Err(CaptureError::from(e).into()),
                None => Ok(()),
            };
        }

        if let Err(e) = proxy.compute_and_post(&stream) {
            break Err(e.into());
        }
        let spectrum = proxy.snapshot();
        println!(
            "sub-bass {:.3} | bass {:.3} | mid {:.3} | dropped {}",
            sub_bass_average(&spectrum, nyquist),
            bass_average(&spectrum, nyquist),
            proxy.sample(0.5),
            queue.dropped_count()
        );
    };

    driver.stop();
    session.stop();
    stream.stop();
    result
}

/// Signals once when a line (or EOF) arrives on stdin
fn spawn_stdin_watcher() -> mpsc::Receiver<()> {
    let (quit_tx, quit_rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut line = String::new();
        let _ = stdin.lock().read_line(&mut line);
        let _ = quit_tx.send(());
    });
    quit_rx
}
