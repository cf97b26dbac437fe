use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use log::{info, warn};

use crate::config::{FilterSettings, ValidatedConfig};
use crate::drivers::pipeline::StreamSession;
use crate::drivers::sink::FrameSink;
use crate::drivers::source::{StreamInlet, StreamResolver};
use crate::drivers::viewport::{ViewportController, ViewportState};
use crate::drivers::ViewerError;
use crate::recorder::RecordingSession;
use crate::types::{ViewerCommand, ViewerNotice};

/// One open stream with its display: source inlet, ingestion session,
/// viewport, optional recording and the frame sink it renders into.
pub struct StreamViewer {
    resolver: Box<dyn StreamResolver>,
    inlet: Box<dyn StreamInlet>,
    session: StreamSession,
    controller: ViewportController,
    recorder: RecordingSession,
    sink: Box<dyn FrameSink>,
    commands: Receiver<ViewerCommand>,
    command_tx: Sender<ViewerCommand>,
    notices: Option<Sender<ViewerNotice>>,
    buffer_range_secs: f64,
    filters: FilterSettings,
    paused: bool,
    closed: bool,
}

impl StreamViewer {
    /// Resolve streams and open the configured one (or the first one found).
    pub fn open(
        config: &ValidatedConfig,
        mut resolver: Box<dyn StreamResolver>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self, ViewerError> {
        let timeout = Duration::from_secs_f64(config.resolve_timeout_secs);
        let streams = resolver.resolve_streams(timeout)?;
        if streams.is_empty() {
            return Err(ViewerError::SourceUnavailable);
        }
        let info = match &config.stream_name {
            Some(name) => streams
                .into_iter()
                .find(|s| &s.name == name)
                .ok_or_else(|| ViewerError::StreamNotFound(name.clone()))?,
            None => streams
                .into_iter()
                .next()
                .ok_or(ViewerError::SourceUnavailable)?,
        };
        let inlet = resolver.open_inlet(&info.name, config.buffer_range_secs)?;
        let session = StreamSession::new(
            inlet.info(),
            config.buffer_range_secs,
            config.display.time_range_secs,
            &config.filters,
        )?;
        let mut controller = ViewportController::new(ViewportState::from_settings(&config.display));
        controller.attach(session.stream());
        info!(
            "opened stream '{}' ({} channels @ {} Hz, {} samples buffered)",
            session.stream().name(),
            session.stream().channel_count(),
            session.stream().sample_rate(),
            session.buffer().capacity()
        );
        let (command_tx, commands) = mpsc::channel();
        Ok(Self {
            resolver,
            inlet,
            session,
            controller,
            recorder: RecordingSession::new(&config.recording_dir),
            sink,
            commands,
            command_tx,
            notices: None,
            buffer_range_secs: config.buffer_range_secs,
            filters: config.filters.clone(),
            paused: false,
            closed: false,
        })
    }

    /// Route status messages to `tx`.
    pub fn with_notices(mut self, tx: Sender<ViewerNotice>) -> Self {
        self.notices = Some(tx);
        self
    }

    /// Handle for queueing commands; they are applied at the start of the next tick.
    pub fn command_sender(&self) -> Sender<ViewerCommand> {
        self.command_tx.clone()
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }
    pub fn viewport(&self) -> &ViewportState {
        self.controller.state()
    }
    pub fn recorder(&self) -> &RecordingSession {
        &self.recorder
    }
    pub fn stream_name(&self) -> &str {
        self.session.stream().name()
    }
    pub fn is_paused(&self) -> bool {
        self.paused
    }
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn notify(&self, notice: ViewerNotice) {
        if let Some(tx) = &self.notices {
            tx.send(notice).ok();
        }
    }

    /// Apply one command immediately.
    pub fn handle(&mut self, command: ViewerCommand) -> Result<(), ViewerError> {
        if self.closed {
            return Err(ViewerError::SessionClosed);
        }
        if self.controller.handle(&command) {
            return Ok(());
        }
        match command {
            ViewerCommand::SwitchStream(name) => self.switch_stream(&name),
            ViewerCommand::SelectFilter(name) => self.session.filters_mut().select_kernel(&name),
            ViewerCommand::TogglePause => {
                self.paused = !self.paused;
                let state = if self.paused { "paused" } else { "resumed" };
                info!("viewer '{}' {state}", self.stream_name());
                self.notify(ViewerNotice::Log(format!("{} {state}", self.stream_name())));
                Ok(())
            }
            ViewerCommand::StartRecording(label) => {
                let path = self.recorder.start(&label);
                self.notify(ViewerNotice::Log(format!("recording to {}", path.display())));
                self.notify(ViewerNotice::RecordingStatus(true));
                Ok(())
            }
            ViewerCommand::StopRecording => {
                let labels = self.session.stream().channel_labels().to_vec();
                if let Some(path) = self.recorder.stop(&labels)? {
                    self.notify(ViewerNotice::Log(format!("saved {}", path.display())));
                }
                self.notify(ViewerNotice::RecordingStatus(false));
                Ok(())
            }
            ViewerCommand::Close => self.close(),
            // display commands were consumed by the controller above
            _ => Ok(()),
        }
    }

    /// Replace the session with one for `name`. The new session is fully
    /// built before the old one is dropped, so a failure leaves the viewer as it was.
    pub fn switch_stream(&mut self, name: &str) -> Result<(), ViewerError> {
        if self.recorder.is_recording() {
            return Err(ViewerError::StreamSwitchWhileRecording);
        }
        let inlet = self.resolver.open_inlet(name, self.buffer_range_secs)?;
        let session = StreamSession::new(
            inlet.info(),
            self.buffer_range_secs,
            self.controller.state().time_range_secs,
            &self.filters,
        )?;
        self.inlet = inlet;
        self.session = session;
        self.controller.attach(self.session.stream());
        info!("switched to stream '{name}'");
        self.notify(ViewerNotice::StreamSwitched(name.to_string()));
        Ok(())
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let described = format!("{command:?}");
            if let Err(e) = self.handle(command) {
                warn!("command {described} rejected: {e}");
                self.notify(ViewerNotice::Rejected(format!("{described}: {e}")));
            }
            if self.closed {
                break;
            }
        }
    }

    /// One refresh: apply queued commands, pull and ingest, then render and
    /// present unless paused. Returns whether a frame was presented.
    pub fn tick(&mut self) -> Result<bool, ViewerError> {
        if self.closed {
            return Err(ViewerError::SessionClosed);
        }
        self.drain_commands();
        if self.closed {
            return Ok(false);
        }
        let chunk = self.inlet.pull_chunk()?;
        self.session.ingest(chunk, Some(&mut self.recorder))?;
        if self.paused {
            return Ok(false);
        }
        let channels = self.controller.channel_window();
        let now = self.inlet.local_clock();
        let window = match self.session.window(self.controller.state(), &channels, now) {
            Ok(window) => window,
            Err(ViewerError::InsufficientData) => return Ok(false),
            Err(e) => return Err(e),
        };
        let frame = self.controller.render(self.session.stream(), &window);
        self.sink.present(&frame)?;
        Ok(true)
    }

    /// Flush any running recording, then release the sink. If the flush
    /// fails the viewer stays open and the captured data is kept.
    pub fn close(&mut self) -> Result<(), ViewerError> {
        if self.closed {
            return Ok(());
        }
        if self.recorder.is_recording() {
            let labels = self.session.stream().channel_labels().to_vec();
            if let Err(e) = self.recorder.stop(&labels) {
                self.notify(ViewerNotice::CloseBlocked(format!(
                    "{} samples kept: {e}",
                    self.recorder.captured_samples()
                )));
                return Err(e);
            }
            self.notify(ViewerNotice::RecordingStatus(false));
        }
        self.closed = true;
        let released = self.sink.release();
        info!("viewer '{}' closed", self.stream_name());
        self.notify(ViewerNotice::Closed);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewerConfig;
    use crate::drivers::sink::MemorySink;
    use crate::drivers::source::{Chunk, ManualResolver, StreamInfo};
    use ndarray::Array2;
    use std::fs;
    use std::path::PathBuf;

    fn info(name: &str, channels: usize) -> StreamInfo {
        StreamInfo {
            name: name.into(),
            sample_rate: 100.0,
            channel_count: channels,
            channel_labels: Vec::new(),
        }
    }

    fn chunk(channels: usize, n: usize) -> Chunk {
        Chunk::new(
            Array2::from_shape_fn((channels, n), |(c, i)| (c * 10 + i) as f64),
            (0..n).map(|i| i as f64 / 100.0).collect(),
        )
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lslview-viewer-{name}-{}", std::process::id()));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(recording_dir: PathBuf) -> ValidatedConfig {
        ViewerConfig {
            recording_dir,
            ..ViewerConfig::default()
        }
        .validate()
        .unwrap()
    }

    fn resolver() -> ManualResolver {
        ManualResolver::new()
            .with_stream(info("a", 2), vec![chunk(2, 100)])
            .with_stream(info("b", 4), vec![chunk(4, 50)])
            .with_clock(1.0)
    }

    fn open(sink: &MemorySink) -> StreamViewer {
        StreamViewer::open(
            &config(std::env::temp_dir()),
            Box::new(resolver()),
            Box::new(sink.clone()),
        )
        .unwrap()
    }

    #[test]
    fn open_requires_a_stream() {
        let result = StreamViewer::open(
            &config(std::env::temp_dir()),
            Box::new(ManualResolver::new()),
            Box::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(ViewerError::SourceUnavailable)));

        let mut named = config(std::env::temp_dir());
        named.stream_name = Some("missing".into());
        let result = StreamViewer::open(&named, Box::new(resolver()), Box::new(MemorySink::new()));
        assert!(matches!(result, Err(ViewerError::StreamNotFound(name)) if name == "missing"));
    }

    #[test]
    fn tick_presents_a_frame() {
        let sink = MemorySink::new();
        let mut viewer = open(&sink);
        assert_eq!(viewer.stream_name(), "a");
        assert!(viewer.tick().unwrap());
        let frame = sink.last().unwrap();
        assert_eq!(frame.stream_name, "a");
        assert_eq!(frame.plot_data.nrows(), 2);
        assert_eq!(frame.plot_data.ncols(), 100);
        assert_eq!(frame.y_tick_labels, vec!["Ch1", "Ch2"]);
        assert!((frame.x_range.1 - (0.99 - 1.0)).abs() < 1e-9);
        assert_eq!(frame.rms_labels.len(), 2);
    }

    #[test]
    fn nothing_is_presented_before_data_arrives() {
        let sink = MemorySink::new();
        let mut viewer = StreamViewer::open(
            &config(std::env::temp_dir()),
            Box::new(ManualResolver::new().with_stream(info("a", 2), Vec::new())),
            Box::new(sink.clone()),
        )
        .unwrap();
        assert!(!viewer.tick().unwrap());
        assert!(sink.is_empty());
    }

    #[test]
    fn commands_apply_at_the_next_tick() {
        let sink = MemorySink::new();
        let mut viewer = open(&sink);
        let tx = viewer.command_sender();
        let scale = viewer.viewport().data_scale;
        tx.send(ViewerCommand::ScaleUp).unwrap();
        assert_eq!(viewer.viewport().data_scale, scale);
        viewer.tick().unwrap();
        assert!(viewer.viewport().data_scale < scale);
    }

    #[test]
    fn switch_is_rejected_while_recording() {
        let sink = MemorySink::new();
        let mut viewer = StreamViewer::open(
            &config(scratch_dir("reject")),
            Box::new(resolver()),
            Box::new(sink.clone()),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel();
        viewer = viewer.with_notices(tx);
        viewer.handle(ViewerCommand::StartRecording("rest".into())).unwrap();
        let err = viewer.switch_stream("b").unwrap_err();
        assert!(matches!(err, ViewerError::StreamSwitchWhileRecording));
        assert_eq!(viewer.stream_name(), "a");

        viewer.command_sender().send(ViewerCommand::SwitchStream("b".into())).unwrap();
        viewer.tick().unwrap();
        assert_eq!(viewer.stream_name(), "a");
        assert!(rx.try_iter().any(|n| matches!(n, ViewerNotice::Rejected(_))));
    }

    #[test]
    fn switch_keeps_display_settings() {
        let sink = MemorySink::new();
        let mut viewer = open(&sink);
        viewer.handle(ViewerCommand::ScaleUp).unwrap();
        viewer.handle(ViewerCommand::WidenTimeRange).unwrap();
        viewer.handle(ViewerCommand::ToggleChannelMask(1)).unwrap();
        viewer.tick().unwrap();
        let before = viewer.viewport().clone();

        viewer.switch_stream("b").unwrap();
        assert_eq!(viewer.stream_name(), "b");
        assert_eq!(viewer.session().stream().channel_count(), 4);
        assert_eq!(viewer.session().buffer().write_cursor(), 0);
        assert_eq!(viewer.viewport(), &before);

        assert!(viewer.tick().unwrap());
        let frame = sink.last().unwrap();
        assert_eq!(frame.plot_data.nrows(), 4);
        assert!(frame.plot_data.row(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn failed_switch_leaves_the_viewer_unchanged() {
        let sink = MemorySink::new();
        let mut viewer = open(&sink);
        let err = viewer.switch_stream("nope").unwrap_err();
        assert!(matches!(err, ViewerError::StreamNotFound(_)));
        assert_eq!(viewer.stream_name(), "a");
        assert!(viewer.tick().unwrap());
    }

    #[test]
    fn paused_viewer_keeps_ingesting() {
        let sink = MemorySink::new();
        let mut viewer = open(&sink);
        viewer.handle(ViewerCommand::TogglePause).unwrap();
        assert!(!viewer.tick().unwrap());
        assert_eq!(viewer.session().buffer().write_cursor(), 100);
        assert!(sink.is_empty());
        viewer.handle(ViewerCommand::TogglePause).unwrap();
        assert!(viewer.tick().unwrap());
    }

    #[test]
    fn unknown_filter_is_rejected_without_closing() {
        let sink = MemorySink::new();
        let (tx, rx) = mpsc::channel();
        let mut viewer = open(&sink).with_notices(tx);
        viewer.command_sender().send(ViewerCommand::SelectFilter("notch".into())).unwrap();
        assert!(viewer.tick().unwrap());
        assert!(!viewer.is_closed());
        let notices: Vec<_> = rx.try_iter().collect();
        assert!(matches!(&notices[..], [ViewerNotice::Rejected(_)]));
    }

    #[test]
    fn close_flushes_the_recording_and_releases_the_sink() {
        let dir = scratch_dir("close");
        let sink = MemorySink::new();
        let mut viewer = StreamViewer::open(
            &config(dir.clone()),
            Box::new(resolver()),
            Box::new(sink.clone()),
        )
        .unwrap();
        viewer.handle(ViewerCommand::StartRecording("close".into())).unwrap();
        viewer.tick().unwrap();
        viewer.close().unwrap();
        assert!(viewer.is_closed());
        assert!(sink.is_released());
        assert!(!viewer.recorder().is_recording());
        let written: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("recording_close_"))
            .collect();
        assert_eq!(written.len(), 1);
        let text = fs::read_to_string(written[0].path()).unwrap();
        assert_eq!(text.lines().count(), 101);
        assert!(matches!(viewer.tick(), Err(ViewerError::SessionClosed)));
    }

    #[test]
    fn close_keeps_data_when_flush_fails() {
        let sink = MemorySink::new();
        let mut viewer = StreamViewer::open(
            &config(scratch_dir("flush").join("missing/dir")),
            Box::new(resolver()),
            Box::new(sink.clone()),
        )
        .unwrap();
        viewer.handle(ViewerCommand::StartRecording("x".into())).unwrap();
        viewer.tick().unwrap();
        assert!(matches!(viewer.close(), Err(ViewerError::Recording(_))));
        assert!(!viewer.is_closed());
        assert!(!sink.is_released());
        assert_eq!(viewer.recorder().captured_samples(), 100);
    }
}
