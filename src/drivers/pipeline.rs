use log::trace;

use crate::config::FilterSettings;
use crate::drivers::buffer::RingBuffer;
use crate::drivers::conditioning;
use crate::drivers::filter::FilterBank;
use crate::drivers::source::{Chunk, Stream, StreamInfo};
use crate::drivers::viewport::{SignalWindow, ViewportState};
use crate::drivers::ViewerError;
use crate::recorder::RecordingSession;

/// Per-stream ingestion pipeline: one ring buffer, one filter bank.
pub struct StreamSession {
    stream: Stream,
    buffer: RingBuffer,
    filters: FilterBank,
    last_timestamp: Option<f64>,
}
impl StreamSession {
    pub fn new(
        info: &StreamInfo,
        buffer_range_secs: f64,
        time_range_secs: f64,
        filters: &FilterSettings,
    ) -> Result<Self, ViewerError> {
        let stream = Stream::from_info(info)?;
        let capacity =
            RingBuffer::capacity_for(stream.sample_rate(), buffer_range_secs, time_range_secs);
        let filters = FilterBank::design(filters, stream.sample_rate(), stream.channel_count())?;
        Ok(Self {
            buffer: RingBuffer::new(stream.channel_count(), capacity),
            filters,
            stream,
            last_timestamp: None,
        })
    }
    pub fn stream(&self) -> &Stream {
        &self.stream
    }
    pub fn buffer(&self) -> &RingBuffer {
        &self.buffer
    }
    pub fn filters(&self) -> &FilterBank {
        &self.filters
    }
    pub fn filters_mut(&mut self) -> &mut FilterBank {
        &mut self.filters
    }
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }
    /// Sanitise, hand the raw chunk to the recorder, filter and buffer it.
    /// Returns the number of samples taken in; an empty chunk is a no-op.
    pub fn ingest(
        &mut self,
        mut chunk: Chunk,
        recorder: Option<&mut RecordingSession>,
    ) -> Result<usize, ViewerError> {
        if chunk.is_empty() {
            return Ok(0);
        }
        chunk.validate(self.stream.channel_count())?;
        chunk.sanitize();
        if let Some(recorder) = recorder {
            recorder.capture(&chunk);
        }
        let filtered = self.filters.apply(chunk.samples.view());
        self.buffer.append(filtered.view())?;
        self.last_timestamp = chunk.timestamps.last().copied();
        trace!("ingested {} samples from '{}'", chunk.len(), self.stream.name());
        Ok(chunk.len())
    }
    /// Raw samples the current time range asks for.
    pub fn samples_to_get(&self, time_range_secs: f64) -> usize {
        let wanted = (self.stream.sample_rate() * time_range_secs).round() as usize;
        wanted.min(self.buffer.capacity())
    }
    /// Extract and condition the display window for `channels`.
    ///
    /// The x-axis ends at `last_timestamp - local_now` and spans
    /// `samples_to_get` samples; the plotted points cover whatever is buffered,
    /// anchored at the right edge.
    pub fn window(
        &self,
        viewport: &ViewportState,
        channels: &[usize],
        local_now: f64,
    ) -> Result<SignalWindow, ViewerError> {
        let rate = self.stream.sample_rate();
        let stride = viewport.subsample_stride.max(1);
        let samples_to_get = self.samples_to_get(viewport.time_range_secs).max(1);
        let points = (samples_to_get + stride - 1) / stride;
        let mut data = self.buffer.read_window(points, stride, channels)?;
        let channels: Vec<usize> = channels
            .iter()
            .copied()
            .filter(|&c| c < self.stream.channel_count())
            .collect();

        conditioning::apply(&mut data, viewport.post);

        let x_max = self.last_timestamp.unwrap_or(local_now) - local_now;
        let x_min = x_max - (samples_to_get - 1) as f64 / rate;
        let n = data.ncols();
        let first = x_max - (n.saturating_sub(1) * stride) as f64 / rate;
        let time = linspace(first, x_max, n);

        let rms_points = ((viewport.rms_range_secs * rate / stride as f64).round() as usize).max(1);
        let rms = conditioning::channel_rms(&data, rms_points);
        Ok(SignalWindow {
            channels,
            data,
            time,
            x_range: (x_min, x_max),
            rms,
        })
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![end],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
