use ndarray::{Array2, ArrayView2};

use crate::drivers::ViewerError;

/// Smallest buffer ever allocated, in samples per channel.
pub const MIN_CAPACITY: usize = 100;

/// Fixed-capacity circular store holding the most recent samples of every channel.
///
/// Absolute sample `i` lives in column `i % capacity`. The buffer never
/// reallocates; a new stream gets a new buffer.
pub struct RingBuffer {
    data: Array2<f64>, // channels x capacity
    write_cursor: u64,
}
impl RingBuffer {
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        Self {
            data: Array2::zeros((channel_count, capacity.max(1))),
            write_cursor: 0,
        }
    }
    /// Capacity covering `max(buffer_range, time_range)` seconds, floored at [`MIN_CAPACITY`].
    pub fn capacity_for(sample_rate: f64, buffer_range_secs: f64, time_range_secs: f64) -> usize {
        let seconds = buffer_range_secs.max(time_range_secs);
        ((seconds * sample_rate).round() as usize).max(MIN_CAPACITY)
    }
    pub fn channel_count(&self) -> usize {
        self.data.nrows()
    }
    pub fn capacity(&self) -> usize {
        self.data.ncols()
    }
    /// Total samples ever written.
    pub fn write_cursor(&self) -> u64 {
        self.write_cursor
    }
    /// Samples currently retrievable.
    pub fn len(&self) -> usize {
        self.write_cursor.min(self.capacity() as u64) as usize
    }
    pub fn is_empty(&self) -> bool {
        self.write_cursor == 0
    }
    /// Append a channels x n chunk. When `n` exceeds the capacity only the last
    /// `capacity` columns survive, exactly as if written one at a time.
    pub fn append(&mut self, chunk: ArrayView2<f64>) -> Result<(), ViewerError> {
        if chunk.nrows() != self.channel_count() {
            return Err(ViewerError::ChannelMismatch {
                expected: self.channel_count(),
                actual: chunk.nrows(),
            });
        }
        let n = chunk.ncols();
        let capacity = self.capacity();
        let skip = n.saturating_sub(capacity);
        for j in skip..n {
            let pos = ((self.write_cursor + j as u64) % capacity as u64) as usize;
            self.data.column_mut(pos).assign(&chunk.column(j));
        }
        self.write_cursor += n as u64;
        Ok(())
    }
    /// Read the newest `min(points * stride, write_cursor, capacity)` samples,
    /// oldest to newest, keeping every `stride`-th sample counted back from the
    /// newest one. Channels outside `[0, channel_count)` are dropped silently.
    pub fn read_window(
        &self,
        points: usize,
        stride: usize,
        channels: &[usize],
    ) -> Result<Array2<f64>, ViewerError> {
        if self.write_cursor == 0 {
            return Err(ViewerError::InsufficientData);
        }
        let stride = stride.max(1);
        let rows: Vec<usize> = channels
            .iter()
            .copied()
            .filter(|&c| c < self.channel_count())
            .collect();
        let span = points.saturating_mul(stride).min(self.len());
        let count = (span + stride - 1) / stride;
        let capacity = self.capacity() as u64;
        let mut out = Array2::zeros((rows.len(), count));
        for k in 0..count {
            // k = 0 is the oldest kept sample
            let back = (count - 1 - k) * stride;
            let absolute = self.write_cursor - 1 - back as u64;
            let pos = (absolute % capacity) as usize;
            for (r, &c) in rows.iter().enumerate() {
                out[[r, k]] = self.data[[c, pos]];
            }
        }
        Ok(out)
    }
}
