// src/engine.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::drivers::viewer::StreamViewer;
use crate::drivers::ViewerError;

/// Fixed-rate driver for any number of independent viewers.
///
/// Ticks run serially on the calling thread, so no two ticks ever touch the
/// same session at once. When a tick overruns its slot the missed slots are
/// dropped rather than replayed. A viewer whose tick fails is closed and
/// removed; the others keep running. A viewer that cannot close because its
/// recording failed to flush is parked in `blocked` with its data intact.
pub struct RefreshScheduler {
    period: Duration,
    viewers: Vec<StreamViewer>,
    blocked: Vec<StreamViewer>,
    ticks: u64,
    dropped: u64,
}

impl RefreshScheduler {
    pub fn new(refresh_rate_hz: f64) -> Result<Self, ViewerError> {
        if !(refresh_rate_hz.is_finite() && refresh_rate_hz > 0.0) {
            return Err(ViewerError::InvalidConfig(format!(
                "refresh_rate_hz must be positive (got {refresh_rate_hz})"
            )));
        }
        Ok(Self {
            period: Duration::from_secs_f64(1.0 / refresh_rate_hz),
            viewers: Vec::new(),
            blocked: Vec::new(),
            ticks: 0,
            dropped: 0,
        })
    }

    pub fn add(&mut self, viewer: StreamViewer) {
        info!("scheduling viewer '{}'", viewer.stream_name());
        self.viewers.push(viewer);
    }

    pub fn viewers(&self) -> &[StreamViewer] {
        &self.viewers
    }

    /// Viewers whose close is waiting on a recording that could not be written.
    pub fn blocked(&self) -> &[StreamViewer] {
        &self.blocked
    }

    /// Hand the blocked viewers back so the caller can fix the cause and close them again.
    pub fn take_blocked(&mut self) -> Vec<StreamViewer> {
        std::mem::take(&mut self.blocked)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped
    }

    /// Tick every viewer once. Viewers that fail or were closed by a command
    /// are removed.
    pub fn tick_once(&mut self) {
        for mut viewer in std::mem::take(&mut self.viewers) {
            if viewer.is_closed() {
                continue;
            }
            match viewer.tick() {
                Ok(_) if viewer.is_closed() => {}
                Ok(_) => self.viewers.push(viewer),
                Err(e) => {
                    error!("viewer '{}' failed: {e}; closing it", viewer.stream_name());
                    self.close_or_block(viewer);
                }
            }
        }
        self.ticks += 1;
    }

    fn close_or_block(&mut self, mut viewer: StreamViewer) {
        if let Err(e) = viewer.close() {
            error!(
                "closing viewer '{}' failed: {e}; holding {} recorded samples until resolved",
                viewer.stream_name(),
                viewer.recorder().captured_samples()
            );
            self.blocked.push(viewer);
        }
    }

    /// Run until `stop` is set, every viewer has closed, or `max_ticks` ticks
    /// have run. All remaining viewers are closed on the way out.
    pub fn run(&mut self, stop: &AtomicBool, max_ticks: Option<u64>) -> u64 {
        let mut deadline = Instant::now();
        while !stop.load(Ordering::Relaxed) && !self.viewers.is_empty() {
            if max_ticks.map_or(false, |limit| self.ticks >= limit) {
                break;
            }
            self.tick_once();
            deadline += self.period;
            let now = Instant::now();
            if deadline <= now {
                let missed = ((now - deadline).as_nanos() / self.period.as_nanos().max(1)) as u32 + 1;
                debug!("tick overran its slot; dropping {missed} tick(s)");
                self.dropped += u64::from(missed);
                deadline += self.period * missed;
            }
            thread::sleep(deadline.saturating_duration_since(Instant::now()));
        }
        self.shutdown();
        self.ticks
    }

    /// Close every running viewer; failures end up in [`Self::blocked`].
    pub fn shutdown(&mut self) {
        for viewer in std::mem::take(&mut self.viewers) {
            self.close_or_block(viewer);
        }
    }
}
