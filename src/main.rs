// src/main.rs
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use log::{error, info};

use lslview::config::ViewerConfig;
use lslview::drivers::{FrameSink, LogSink, PngSnapshotSink, SimulatedResolver, StreamViewer};
use lslview::engine::RefreshScheduler;

fn main() -> Result<()> {
    env_logger::init();
    let config = match std::env::args().nth(1) {
        Some(path) => ViewerConfig::load(&path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => ViewerConfig::default(),
    };
    let validated = config.validate().context("invalid viewer configuration")?;
    let sink: Box<dyn FrameSink> = match &config.snapshot_png {
        Some(path) => Box::new(PngSnapshotSink::new(path)),
        None => Box::new(LogSink::default()),
    };
    let viewer = StreamViewer::open(&validated, Box::new(SimulatedResolver::demo()), sink)
        .context("failed to open a stream")?;
    let mut scheduler = RefreshScheduler::new(validated.refresh_rate_hz)?;
    scheduler.add(viewer);
    let stop = AtomicBool::new(false);
    let ticks = scheduler.run(&stop, config.run_ticks);
    info!(
        "viewer stopped after {ticks} ticks ({} dropped)",
        scheduler.dropped_ticks()
    );
    for viewer in scheduler.blocked() {
        error!(
            "recording of '{}' could not be saved; {} samples were not written",
            viewer.stream_name(),
            viewer.recorder().captured_samples()
        );
    }
    if !scheduler.blocked().is_empty() {
        anyhow::bail!("unsaved recordings; check recording_dir");
    }
    Ok(())
}
