use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};

use crate::drivers::viewport::DisplayFrame;
use crate::drivers::ViewerError;

/// Rendering side of a viewer. Receives one frame per presented tick.
pub trait FrameSink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), ViewerError>;
    /// Called once when the viewer closes.
    fn release(&mut self) -> Result<(), ViewerError> {
        Ok(())
    }
}

/// Logs a one-line summary of every frame.
#[derive(Default)]
pub struct LogSink {
    frames: u64,
}
impl FrameSink for LogSink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), ViewerError> {
        self.frames += 1;
        debug!(
            "[{}] frame {}: {} channels x {} points, x {:.3}..{:.3}, rms [{}]",
            frame.stream_name,
            self.frames,
            frame.plot_data.nrows(),
            frame.plot_data.ncols(),
            frame.x_range.0,
            frame.x_range.1,
            frame.rms_labels.join(", ")
        );
        Ok(())
    }
    fn release(&mut self) -> Result<(), ViewerError> {
        info!("log sink released after {} frames", self.frames);
        Ok(())
    }
}

/// Keeps every presented frame; clones share the same storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    frames: Rc<RefCell<Vec<DisplayFrame>>>,
    released: Rc<RefCell<bool>>,
}
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn frames(&self) -> Vec<DisplayFrame> {
        self.frames.borrow().clone()
    }
    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }
    pub fn last(&self) -> Option<DisplayFrame> {
        self.frames.borrow().last().cloned()
    }
    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }
}
impl FrameSink for MemorySink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), ViewerError> {
        self.frames.borrow_mut().push(frame.clone());
        Ok(())
    }
    fn release(&mut self) -> Result<(), ViewerError> {
        *self.released.borrow_mut() = true;
        Ok(())
    }
}
