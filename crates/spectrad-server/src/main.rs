mod app;
mod banner;
mod build_info;
mod events;
mod fft;
mod input;
mod logging;
mod registry;
mod shutdown;
mod state;
mod ws;

use clap::Parser;
use state::{AppState, StopReason};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "spectrad", version, about = "Real-time SDR spectrum broadcast server")]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose logging for the spectrad crates
    #[arg(long)]
    debug: bool,

    /// Also write daily-rolling log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guards = match logging::init(&logging::LoggingConfig {
        debug: args.debug,
        log_dir: args.log_dir.clone(),
    }) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("logging init failed: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    banner::log_startup_banner();

    let cfg = match spectrad_core::config::load_from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "configuration error");
            return ExitCode::FAILURE;
        }
    };
    let rt = match cfg.runtime() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "configuration error");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        sps = rt.sps,
        fft_size = rt.fft_size,
        fft_result_size = rt.fft_result_size,
        is_real = rt.is_real,
        downsample_levels = rt.downsample_levels,
        audio_max_fft_size = rt.audio_max_fft_size,
        waterfall = rt.waterfall_compression_str(),
        audio = rt.audio_compression_str(),
        "runtime configured"
    );

    let (reader, driver) = match input::open(&cfg.input) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "input driver error");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(driver, "sample input opened");

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("server");
    if cfg.server.threads > 0 {
        builder.worker_threads(cfg.server.threads);
    }
    let runtime = match builder.build() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = ?e, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    let sample_format = cfg.input.driver.format;
    let state = Arc::new(AppState::new(cfg, rt));

    let fft_thread = match fft::spawn(state.clone(), reader, sample_format) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "failed to start ingest");
            return ExitCode::FAILURE;
        }
    };

    let reason = runtime.block_on(async {
        let timer = events::spawn_event_timer(state.clone());
        let result = app::serve(state.clone()).await;
        timer.abort();
        if let Err(e) = result {
            tracing::error!(error = format!("{e:#}"), "server error");
            return StopReason::EndOfStream;
        }
        *state.stop_tx.borrow()
    });

    // The ingest thread may be parked in a blocking stdin read; it dies with
    // the process rather than being joined.
    drop(fft_thread);

    match reason {
        StopReason::Signal | StopReason::Running => {
            tracing::info!("clean shutdown");
            ExitCode::SUCCESS
        }
        StopReason::EndOfStream => ExitCode::FAILURE,
    }
}
