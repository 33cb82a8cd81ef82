mod cli;
mod error;
mod output;
mod utils;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use liveplay_engine::{LiveSession, PlaybackStats, SessionConfig, SessionListener, SessionParts};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::Args,
    error::Result,
    output::{FileSink, HeadlessSurface},
    utils::parse_headers,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = session_config(&args)?;

    let (sink, output) = match args.output_path() {
        Some(path) => FileSink::create(&path).await?,
        None => FileSink::stdout(),
    };
    let closed = output.closed();
    let surface = HeadlessSurface::new(output.buffered());

    let listener: Arc<dyn SessionListener> = Arc::new(|stats: PlaybackStats| {
        info!(
            buffered_secs = stats.buffered_seconds,
            downloaded = stats.downloaded_count,
            "Playback stats"
        );
    });

    let parts = SessionParts::new(Box::new(sink), Box::new(surface));
    let mut session = LiveSession::new(&args.url, parts, listener, config)?;
    info!(url = session.manifest_url(), output = %args.output, "Starting live playback");
    session.start()?;

    let outcome = tokio::select! {
        result = session.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, stopping");
            None
        }
        _ = closed.cancelled() => {
            warn!("Output closed, stopping");
            None
        }
    };
    match outcome {
        Some(result) => result?,
        None => {
            session.stop().await;
            session.wait().await?;
        }
    }

    output.finish().await?;
    info!("Playback finished");
    Ok(())
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut builder = SessionConfig::builder()
        .min_poll_interval(Duration::from_millis(args.min_poll_ms))
        .headers(parse_headers(&args.headers)?)
        .timeout(args.timeout.map(Duration::from_secs));
    if let Some(user_agent) = &args.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    Ok(builder.build())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose > 0),
        )
        .init();
}
