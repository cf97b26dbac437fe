use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use log::{debug, warn};
use ndarray::Array2;
use once_cell::sync::Lazy;
use rand::Rng;

use crate::drivers::ViewerError;

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic local clock in seconds, shared by the whole process.
pub fn local_clock() -> f64 {
    CLOCK_ORIGIN.elapsed().as_secs_f64()
}

/// Metadata reported by a source for one stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub name: String,
    pub sample_rate: f64,
    pub channel_count: usize,
    pub channel_labels: Vec<String>,
}

/// Immutable description of the stream a session was built from.
/// Labels always match the channel count.
#[derive(Clone, Debug, PartialEq)]
pub struct Stream {
    name: String,
    sample_rate: f64,
    channel_labels: Vec<String>,
}
impl Stream {
    pub fn from_info(info: &StreamInfo) -> Result<Self, ViewerError> {
        if !(info.sample_rate.is_finite() && info.sample_rate > 0.0) {
            return Err(ViewerError::InvalidSampleRate(info.sample_rate));
        }
        let channel_labels = if info.channel_labels.len() == info.channel_count {
            info.channel_labels.clone()
        } else {
            warn!(
                "stream '{}' reports {} labels for {} channels; using numbered labels",
                info.name,
                info.channel_labels.len(),
                info.channel_count
            );
            numbered_labels(info.channel_count)
        };
        Ok(Self {
            name: info.name.clone(),
            sample_rate: info.sample_rate,
            channel_labels,
        })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }
    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }
}

pub fn numbered_labels(channel_count: usize) -> Vec<String> {
    (1..=channel_count).map(|n| format!("Ch{n}")).collect()
}

/// One pull worth of samples: `samples` is channels x n, `timestamps` has n entries.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub samples: Array2<f64>,
    pub timestamps: Vec<f64>,
}
impl Chunk {
    pub fn new(samples: Array2<f64>, timestamps: Vec<f64>) -> Self {
        Self {
            samples,
            timestamps,
        }
    }
    pub fn empty(channel_count: usize) -> Self {
        Self {
            samples: Array2::zeros((channel_count, 0)),
            timestamps: Vec::new(),
        }
    }
    pub fn channel_count(&self) -> usize {
        self.samples.nrows()
    }
    pub fn len(&self) -> usize {
        self.samples.ncols()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.ncols() == 0
    }
    pub fn validate(&self, channel_count: usize) -> Result<(), ViewerError> {
        if self.channel_count() != channel_count {
            return Err(ViewerError::ChannelMismatch {
                expected: channel_count,
                actual: self.channel_count(),
            });
        }
        if self.timestamps.len() != self.len() {
            return Err(ViewerError::TimestampMismatch {
                samples: self.len(),
                timestamps: self.timestamps.len(),
            });
        }
        Ok(())
    }
    /// Replace NaN and infinities with zero.
    pub fn sanitize(&mut self) {
        self.samples.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    }
}

/// Open connection to one stream. Pulls must not block for long; an empty
/// chunk means "nothing new yet".
pub trait StreamInlet {
    fn info(&self) -> &StreamInfo;
    fn pull_chunk(&mut self) -> Result<Chunk, ViewerError>;
    fn local_clock(&self) -> f64 {
        local_clock()
    }
}

/// Discovery side of a source.
pub trait StreamResolver {
    fn resolve_streams(&mut self, timeout: Duration) -> Result<Vec<StreamInfo>, ViewerError>;
    fn open_inlet(
        &mut self,
        stream_name: &str,
        buffer_range_secs: f64,
    ) -> Result<Box<dyn StreamInlet>, ViewerError>;
}

/// In-memory inlet useful for tests and deterministic playback.
pub struct ManualInlet {
    info: StreamInfo,
    queue: VecDeque<Chunk>,
    clock: Option<f64>,
}
impl ManualInlet {
    pub fn new(info: StreamInfo, chunks: impl IntoIterator<Item = Chunk>) -> Self {
        Self {
            info,
            queue: chunks.into_iter().collect(),
            clock: None,
        }
    }
    /// Pin `local_clock()` to a fixed value.
    pub fn with_clock(mut self, now: f64) -> Self {
        self.clock = Some(now);
        self
    }
}
impl StreamInlet for ManualInlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }
    fn pull_chunk(&mut self) -> Result<Chunk, ViewerError> {
        Ok(self
            .queue
            .pop_front()
            .unwrap_or_else(|| Chunk::empty(self.info.channel_count)))
    }
    fn local_clock(&self) -> f64 {
        self.clock.unwrap_or_else(local_clock)
    }
}

/// Resolver over a fixed set of in-memory streams.
#[derive(Default)]
pub struct ManualResolver {
    streams: Vec<StreamInfo>,
    chunks: HashMap<String, Vec<Chunk>>,
    clock: Option<f64>,
}
impl ManualResolver {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_stream(mut self, info: StreamInfo, chunks: Vec<Chunk>) -> Self {
        self.chunks.insert(info.name.clone(), chunks);
        self.streams.push(info);
        self
    }
    pub fn with_clock(mut self, now: f64) -> Self {
        self.clock = Some(now);
        self
    }
}
impl StreamResolver for ManualResolver {
    fn resolve_streams(&mut self, _timeout: Duration) -> Result<Vec<StreamInfo>, ViewerError> {
        Ok(self.streams.clone())
    }
    fn open_inlet(
        &mut self,
        stream_name: &str,
        _buffer_range_secs: f64,
    ) -> Result<Box<dyn StreamInlet>, ViewerError> {
        let info = self
            .streams
            .iter()
            .find(|s| s.name == stream_name)
            .cloned()
            .ok_or_else(|| ViewerError::StreamNotFound(stream_name.to_string()))?;
        let chunks = self.chunks.remove(stream_name).unwrap_or_default();
        let inlet = ManualInlet::new(info, chunks);
        Ok(match self.clock {
            Some(now) => Box::new(inlet.with_clock(now)),
            None => Box::new(inlet),
        })
    }
}

/// Synthetic EEG-like stream: a per-channel rhythm plus broadband noise,
/// produced at the nominal rate as the local clock advances.
pub struct SimulatedInlet {
    info: StreamInfo,
    rhythm_hz: f64,
    amplitude: f64,
    noise: f64,
    emitted: u64,
    started_at: f64,
    max_chunk: usize,
}
impl SimulatedInlet {
    pub fn new(info: StreamInfo, buffer_range_secs: f64) -> Self {
        let max_chunk = ((buffer_range_secs * info.sample_rate).ceil() as usize).max(1);
        Self {
            info,
            rhythm_hz: 10.0,
            amplitude: 20.0,
            noise: 5.0,
            emitted: 0,
            started_at: local_clock(),
            max_chunk,
        }
    }
    fn generate(&mut self, n: usize) -> Chunk {
        let mut rng = rand::thread_rng();
        let channels = self.info.channel_count;
        let rate = self.info.sample_rate;
        let mut samples = Array2::zeros((channels, n));
        let mut timestamps = Vec::with_capacity(n);
        for i in 0..n {
            let t = (self.emitted + i as u64) as f64 / rate;
            timestamps.push(self.started_at + t);
            for c in 0..channels {
                let phase = c as f64 * PI / 8.0;
                let rhythm = self.amplitude * (2.0 * PI * self.rhythm_hz * t + phase).sin();
                samples[[c, i]] = rhythm + rng.gen_range(-self.noise..self.noise);
            }
        }
        self.emitted += n as u64;
        Chunk::new(samples, timestamps)
    }
}
impl StreamInlet for SimulatedInlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }
    fn pull_chunk(&mut self) -> Result<Chunk, ViewerError> {
        let elapsed = local_clock() - self.started_at;
        let due = (elapsed * self.info.sample_rate).floor() as u64;
        let pending = due.saturating_sub(self.emitted) as usize;
        if pending > self.max_chunk {
            // The inlet only holds `buffer_range_secs` of data; older samples are lost.
            debug!(
                "simulated stream '{}' dropped {} samples",
                self.info.name,
                pending - self.max_chunk
            );
            self.emitted += (pending - self.max_chunk) as u64;
        }
        Ok(self.generate(pending.min(self.max_chunk)))
    }
}

/// Resolver handing out simulated inlets.
pub struct SimulatedResolver {
    streams: Vec<StreamInfo>,
}
impl SimulatedResolver {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        Self { streams }
    }
    /// Two demo streams: an 8-channel EEG at 250 Hz and a 16-channel one at 500 Hz.
    pub fn demo() -> Self {
        Self::new(vec![
            StreamInfo {
                name: "SimEEG".into(),
                sample_rate: 250.0,
                channel_count: 8,
                channel_labels: ["Fp1", "Fp2", "C3", "C4", "P7", "P8", "O1", "O2"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            StreamInfo {
                name: "SimEEG16".into(),
                sample_rate: 500.0,
                channel_count: 16,
                channel_labels: Vec::new(),
            },
        ])
    }
}
impl StreamResolver for SimulatedResolver {
    fn resolve_streams(&mut self, _timeout: Duration) -> Result<Vec<StreamInfo>, ViewerError> {
        Ok(self.streams.clone())
    }
    fn open_inlet(
        &mut self,
        stream_name: &str,
        buffer_range_secs: f64,
    ) -> Result<Box<dyn StreamInlet>, ViewerError> {
        let info = self
            .streams
            .iter()
            .find(|s| s.name == stream_name)
            .cloned()
            .ok_or_else(|| ViewerError::StreamNotFound(stream_name.to_string()))?;
        Ok(Box::new(SimulatedInlet::new(info, buffer_range_secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn info(labels: &[&str], channels: usize) -> StreamInfo {
        StreamInfo {
            name: "test".into(),
            sample_rate: 100.0,
            channel_count: channels,
            channel_labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }
    #[test]
    fn mismatched_labels_fall_back_to_numbered() {
        let stream = Stream::from_info(&info(&["a", "b", "c"], 4)).unwrap();
        assert_eq!(stream.channel_labels(), ["Ch1", "Ch2", "Ch3", "Ch4"]);
        assert_eq!(stream.channel_count(), 4);
    }
    #[test]
    fn matching_labels_are_kept() {
        let stream = Stream::from_info(&info(&["a", "b"], 2)).unwrap();
        assert_eq!(stream.channel_labels(), ["a", "b"]);
    }
    #[test]
    fn zero_sample_rate_is_rejected() {
        let mut bad = info(&["a"], 1);
        bad.sample_rate = 0.0;
        assert!(matches!(
            Stream::from_info(&bad),
            Err(ViewerError::InvalidSampleRate(_))
        ));
    }
    #[test]
    fn sanitize_replaces_non_finite() {
        let mut chunk = Chunk::new(
            Array2::from_shape_vec((1, 3), vec![f64::NAN, 1.0, f64::INFINITY]).unwrap(),
            vec![0.0, 0.1, 0.2],
        );
        chunk.sanitize();
        assert_eq!(chunk.samples.row(0).to_vec(), vec![0.0, 1.0, 0.0]);
    }
    #[test]
    fn validate_catches_shape_errors() {
        let chunk = Chunk::new(Array2::zeros((2, 3)), vec![0.0; 2]);
        assert!(matches!(
            chunk.validate(3),
            Err(ViewerError::ChannelMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            chunk.validate(2),
            Err(ViewerError::TimestampMismatch { .. })
        ));
    }
    #[test]
    fn manual_inlet_drains_then_returns_empty() {
        let mut inlet = ManualInlet::new(
            info(&["a"], 1),
            vec![Chunk::new(Array2::zeros((1, 4)), vec![0.0; 4])],
        )
        .with_clock(3.0);
        assert_eq!(inlet.pull_chunk().unwrap().len(), 4);
        assert!(inlet.pull_chunk().unwrap().is_empty());
        assert_eq!(inlet.local_clock(), 3.0);
    }
    #[test]
    fn resolver_reports_unknown_streams() {
        let mut resolver = ManualResolver::new().with_stream(info(&["a"], 1), vec![]);
        assert!(resolver.open_inlet("test", 1.0).is_ok());
        assert!(matches!(
            resolver.open_inlet("missing", 1.0),
            Err(ViewerError::StreamNotFound(_))
        ));
    }
    #[test]
    fn simulated_inlet_produces_well_formed_chunks() {
        let mut resolver = SimulatedResolver::demo();
        let mut inlet = resolver.open_inlet("SimEEG", 2.0).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let chunk = inlet.pull_chunk().unwrap();
        assert!(chunk.validate(8).is_ok());
        assert!(chunk.samples.iter().all(|v| v.is_finite()));
    }
}
