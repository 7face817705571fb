//! ndnrtc-fetch - consumer tool for NDN-RTC streams.
//!
//! Connects to a local forwarder, runs the consumer engine against the
//! given stream prefix, and optionally dumps decoded frame payloads and
//! periodic statistics. Exits 0 on user interrupt, 2 when the stream's
//! metadata cannot be fetched.

mod stats_writer;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ndnrtc_core::{
    AcceptAllVerifier, Consumer, ConsumerConfig, DecodedImage, FrameDecoder, FrameType, Name,
    NdnRtcError, TcpFace,
};

/// Fetch an NDN-RTC stream.
#[derive(Parser, Debug)]
#[command(name = "ndnrtc-fetch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stream prefix to fetch, e.g. /producer/ndnrtc/v=4/video/camera
    name: String,

    /// Fixed pipeline size; 0 derives it from DRD.
    #[arg(long = "pp-size", default_value_t = 0)]
    pp_size: usize,

    /// Sequence-number stride between fetched samples.
    #[arg(long = "pp-step", default_value_t = 1)]
    pp_step: i32,

    /// Override the producer-declared playback rate, fps.
    #[arg(long = "pbc-rate", default_value_t = 0.)]
    pbc_rate: f64,

    /// Request and decode parity segments.
    #[arg(long = "use-fec")]
    use_fec: bool,

    /// Verification policy file.
    #[arg(long, value_name = "FILE")]
    policy: Option<PathBuf>,

    /// Write fetched frame payloads to this file.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write periodic statistics to this CSV file.
    #[arg(long, value_name = "FILE")]
    stats: Option<PathBuf>,

    /// Log level (none, info, debug, trace).
    #[arg(long, default_value = "info", env = "NDNRTC_LOG_LEVEL")]
    log_level: LogLevel,

    /// Forwarder endpoint.
    #[arg(long, default_value = "127.0.0.1:6363", env = "NDNRTC_FORWARDER")]
    forwarder: String,

    /// Segment wire length the producer publishes with.
    #[arg(long, env = "NDNRTC_SEGMENT_SIZE")]
    segment_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogLevel {
    None,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::None => log::LevelFilter::Off,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Decoder shim that appends every frame payload to the output file before
/// passing it through. Actual codec decoding lives outside this tool.
struct FileDumpDecoder {
    file: std::fs::File,
}

impl FrameDecoder for FileDumpDecoder {
    fn decode(&mut self, payload: &[u8], _frame_type: FrameType) -> Option<DecodedImage> {
        if let Err(e) = self.file.write_all(payload) {
            log::warn!("[fetch] output write failed: {}", e);
        }
        Some(DecodedImage {
            width: 0,
            height: 0,
            data: bytes_copy(payload),
        })
    }
}

fn bytes_copy(payload: &[u8]) -> bytes::Bytes {
    bytes::Bytes::copy_from_slice(payload)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<NdnRtcError>()
                .map(|e| matches!(e, NdnRtcError::MetaUnavailable(_)))
                .unwrap_or(false)
            {
                log::error!("{:#}", e);
                ExitCode::from(2)
            } else {
                log::error!("{:#}", e);
                ExitCode::FAILURE
            }
        }
    }
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(args.log_level.into())
        .format_timestamp_millis();
    if let Ok(path) = std::env::var("NDNRTC_LOG_FILE") {
        match std::fs::File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("cannot open log file {}: {}", path, e),
        }
    }
    builder.init();
}

async fn run(args: Args) -> Result<()> {
    log::info!("ndnrtc-fetch v{}", env!("CARGO_PKG_VERSION"));

    let stream_name = Name::from_uri(&args.name)
        .with_context(|| format!("invalid stream name '{}'", args.name))?;

    let mut config = ConsumerConfig {
        pipeline_size: args.pp_size,
        pipeline_step: args.pp_step,
        playback_rate: args.pbc_rate,
        use_fec: args.use_fec,
        ..Default::default()
    };
    if let Some(segment_size) = args.segment_size {
        config.segment_size = segment_size;
    }

    if args.policy.is_some() {
        // trust policy is a caller-supplied capability; the bundled
        // verifier accepts all signatures
        log::warn!("[fetch] --policy given, but this build verifies with the accept-all capability");
    }

    let decoder: Option<Box<dyn FrameDecoder>> = match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot open output file {}", path.display()))?;
            Some(Box::new(FileDumpDecoder { file }))
        }
        None => None,
    };

    let face_cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let face = TcpFace::connect(&args.forwarder, event_tx, face_cancel.clone())
        .await
        .with_context(|| format!("cannot connect to forwarder at {}", args.forwarder))?;

    let consumer = Consumer::new(
        config,
        &stream_name,
        Box::new(face),
        event_rx,
        Arc::new(AcceptAllVerifier),
        decoder,
    )
    .context("cannot build consumer")?;
    let handle = consumer.handle();

    if let Some(path) = &args.stats {
        let writer = stats_writer::StatsWriter::create(path, handle.stats.clone())
            .with_context(|| format!("cannot open stats file {}", path.display()))?;
        tokio::spawn(writer.run(face_cancel.clone()));
    }

    let mut run_task = tokio::spawn(consumer.run());

    let result = tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("[fetch] interrupted, shutting down");
            handle.shutdown();
            match run_task.await {
                Ok(_) => Ok(()),
                Err(e) => Err(anyhow::anyhow!("consumer task panicked: {}", e)),
            }
        }
        joined = &mut run_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow::anyhow!("consumer task panicked: {}", e)),
        },
    };

    face_cancel.cancel();
    result
}
