// src/drivers/mod.rs
pub mod buffer;
pub mod conditioning;
pub mod design;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod plot;
pub mod sink;
pub mod source;
pub mod viewer;
pub mod viewport;
pub use buffer::RingBuffer;
pub use design::{design_bandpass, design_lowpass, frequency_response, moving_average};
pub use error::ViewerError;
pub use filter::{FilterBank, FilterKernel};
pub use pipeline::StreamSession;
pub use plot::{render_frame_png, PlotStyle, PngSnapshotSink};
pub use sink::{FrameSink, LogSink, MemorySink};
pub use source::{
    local_clock, Chunk, ManualInlet, ManualResolver, SimulatedInlet, SimulatedResolver, Stream,
    StreamInfo, StreamInlet, StreamResolver,
};
pub use viewer::StreamViewer;
pub use viewport::{DisplayFrame, SignalWindow, ViewportController, ViewportState};
