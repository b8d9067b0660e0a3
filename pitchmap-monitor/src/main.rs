//! # Pitchmap Monitor
//!
//! Terminal front-end for the pitch map engine. It binds a session to the
//! default microphone and prints the live key/octave map.
//!
//! ## Architecture
//! - **Main Thread**: owns the session and renders snapshots as they arrive
//! - **Analysis Thread**: started by the session, one frame at a time
//! - **Communication**: a crossbeam subscription channel with a render tick

mod display;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use pitchmap_core::{EngineConfig, Session, SessionState, audio::CpalSource, load_config};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Minimum time between two rendered snapshots.
const RENDER_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "pitchmap-monitor")]
#[command(about = "Live key/octave energy map from the default microphone", long_about = None)]
struct Args {
    /// TOML engine configuration
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short = 's', long, default_value = "30")]
    seconds: u64,

    /// Number of strongest keys to list
    #[arg(short = 't', long, default_value = "5")]
    top: usize,

    /// Print each snapshot as a JSON line instead of the wheel view
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut session = Session::from_config(&config)?;
    let updates = session.subscribe();

    let source = CpalSource::default_input(config.session.expected_sample_rate)?;
    session.start(source, config.session.clone())?;
    log::info!("Monitoring for {} seconds...", args.seconds);

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut last_render: Option<Instant> = None;

    while Instant::now() < deadline {
        match updates.recv_timeout(RENDER_INTERVAL) {
            Ok(snapshot) => {
                if last_render.is_some_and(|t| t.elapsed() < RENDER_INTERVAL) {
                    continue;
                }
                last_render = Some(Instant::now());
                if args.json {
                    println!("{}", serde_json::to_string(snapshot.as_ref())?);
                } else {
                    print!("{}", display::render(&snapshot, args.top));
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if session.state() != SessionState::Active {
                    log::warn!("Input stopped ({:?}); exiting", session.stop_reason());
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    session.stop();
    log::info!("Monitor finished");
    Ok(())
}
