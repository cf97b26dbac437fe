use std::collections::BTreeSet;

use ndarray::Array2;

use crate::config::{DisplaySettings, PostProcessing};
use crate::drivers::source::Stream;
use crate::types::ViewerCommand;

/// Factor applied by one scale step (`ScaleUp` multiplies, `ScaleDown` divides).
pub const SCALE_STEP: f64 = 0.9;
/// Factor applied by one time-range step (`WidenTimeRange` multiplies, `NarrowTimeRange` divides).
pub const TIME_STEP: f64 = 1.1;

/// Display configuration. Mutated only by control events, never by ingestion.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewportState {
    pub time_range_secs: f64,
    pub rms_range_secs: f64,
    pub data_scale: f64,
    pub page_offset: usize,
    /// 1-based channel indices forming one page.
    pub channel_range: Vec<usize>,
    pub subsample_stride: usize,
    /// 0-based channel indices hidden from plotting.
    pub masked_channels: BTreeSet<usize>,
    pub post: PostProcessing,
    pub units: String,
}
impl ViewportState {
    pub fn from_settings(settings: &DisplaySettings) -> Self {
        Self {
            time_range_secs: settings.time_range_secs,
            rms_range_secs: settings.rms_range_secs,
            data_scale: settings.data_scale,
            page_offset: settings.page_offset,
            channel_range: settings.channel_range.clone(),
            subsample_stride: settings.subsample_stride.max(1),
            masked_channels: BTreeSet::new(),
            post: settings.post,
            units: settings.units.clone(),
        }
    }
    pub fn page_size(&self) -> usize {
        self.channel_range.len().max(1)
    }
}

/// Processed window for the current page, before plotting offsets.
#[derive(Clone, Debug)]
pub struct SignalWindow {
    /// 0-based stream channels, one per row of `data`.
    pub channels: Vec<usize>,
    pub data: Array2<f64>,
    pub time: Vec<f64>,
    pub x_range: (f64, f64),
    pub rms: Vec<f64>,
}

/// What the renderer receives once per tick.
#[derive(Clone, Debug)]
pub struct DisplayFrame {
    pub stream_name: String,
    pub plot_time: Vec<f64>,
    /// channels shown x samples, offsets applied, masked rows NaN.
    pub plot_data: Array2<f64>,
    pub y_ticks: Vec<f64>,
    pub y_tick_labels: Vec<String>,
    pub rms_labels: Vec<String>,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
}

/// Holds the viewport and turns control events into state changes.
pub struct ViewportController {
    state: ViewportState,
    channel_count: usize,
    sample_period: f64,
}
impl ViewportController {
    pub fn new(state: ViewportState) -> Self {
        Self {
            state,
            channel_count: 0,
            sample_period: 0.0,
        }
    }
    pub fn state(&self) -> &ViewportState {
        &self.state
    }
    /// Bind to a (new) stream; keeps every display setting, only re-clamps the page.
    pub fn attach(&mut self, stream: &Stream) {
        self.channel_count = stream.channel_count();
        self.sample_period = 1.0 / stream.sample_rate();
        self.clamp_page();
    }
    pub fn page_count(&self) -> usize {
        let size = self.state.page_size();
        ((self.channel_count + size - 1) / size).max(1)
    }
    pub fn scale_up(&mut self) {
        self.state.data_scale *= SCALE_STEP;
    }
    pub fn scale_down(&mut self) {
        self.state.data_scale /= SCALE_STEP;
    }
    pub fn widen_time_range(&mut self) {
        self.state.time_range_secs *= TIME_STEP;
    }
    pub fn narrow_time_range(&mut self) {
        let narrowed = self.state.time_range_secs / TIME_STEP;
        self.state.time_range_secs = narrowed.max(self.sample_period);
    }
    pub fn page_up(&mut self) {
        self.state.page_offset = self.state.page_offset.saturating_sub(1);
        self.clamp_page();
    }
    pub fn page_down(&mut self) {
        self.state.page_offset += 1;
        self.clamp_page();
    }
    pub fn toggle_channel_mask(&mut self, channel: usize) {
        if !self.state.masked_channels.remove(&channel) {
            self.state.masked_channels.insert(channel);
        }
    }
    pub fn set_post_processing(&mut self, post: PostProcessing) {
        self.state.post = post;
    }
    /// Apply a display command. Returns `false` for commands the viewport does not own.
    pub fn handle(&mut self, command: &ViewerCommand) -> bool {
        match command {
            ViewerCommand::ScaleUp => self.scale_up(),
            ViewerCommand::ScaleDown => self.scale_down(),
            ViewerCommand::WidenTimeRange => self.widen_time_range(),
            ViewerCommand::NarrowTimeRange => self.narrow_time_range(),
            ViewerCommand::PageUp => self.page_up(),
            ViewerCommand::PageDown => self.page_down(),
            ViewerCommand::ToggleChannelMask(channel) => self.toggle_channel_mask(*channel),
            ViewerCommand::SetRereference(on) => self.state.post.rereference = *on,
            ViewerCommand::SetStandardize(on) => self.state.post.standardize = *on,
            ViewerCommand::SetZeroMean(on) => self.state.post.zero_mean = *on,
            _ => return false,
        }
        true
    }
    fn clamp_page(&mut self) {
        self.state.page_offset = self.state.page_offset.min(self.page_count() - 1);
    }
    /// 0-based stream channels of the current page in the user's order,
    /// limited to the stream. Repeated channels appear once.
    pub fn channel_window(&self) -> Vec<usize> {
        let shift = self.state.page_offset * self.state.channel_range.len();
        let mut seen = BTreeSet::new();
        self.state
            .channel_range
            .iter()
            .filter_map(|&one_based| one_based.checked_sub(1))
            .map(|c| c + shift)
            .filter(|&c| c < self.channel_count && seen.insert(c))
            .collect()
    }
    /// Stack the window into plot rows: row `r` is offset by `r * data_scale`,
    /// masked channels keep their row and label but are NaN-filled.
    pub fn render(&self, stream: &Stream, window: &SignalWindow) -> DisplayFrame {
        let scale = self.state.data_scale;
        let mut plot_data = window.data.clone();
        let mut y_ticks = Vec::with_capacity(window.channels.len());
        for (row, &channel) in window.channels.iter().enumerate() {
            let offset = row as f64 * scale;
            y_ticks.push(offset);
            let masked = self.state.masked_channels.contains(&channel);
            plot_data
                .row_mut(row)
                .mapv_inplace(|v| if masked { f64::NAN } else { v + offset });
        }
        let labels = stream.channel_labels();
        let y_tick_labels = window
            .channels
            .iter()
            .map(|&c| labels.get(c).cloned().unwrap_or_else(|| format!("Ch{}", c + 1)))
            .collect();
        let rms_labels = window
            .rms
            .iter()
            .map(|rms| format!("{rms:.1} {}-rms", self.state.units))
            .collect();
        let shown = window.channels.len() as f64;
        DisplayFrame {
            stream_name: stream.name().to_string(),
            plot_time: window.time.clone(),
            plot_data,
            y_ticks,
            y_tick_labels,
            rms_labels,
            x_range: window.x_range,
            y_range: (-scale, shown * scale + scale),
        }
    }
}
