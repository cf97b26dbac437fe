use std::io::Cursor;
use std::path::PathBuf;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use log::info;
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::drivers::error::ViewerError;
use crate::drivers::sink::FrameSink;
use crate::drivers::viewport::DisplayFrame;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 700,
            background: RGBColor(10, 10, 10),
            palette: vec![BLUE, RED, GREEN, CYAN, MAGENTA, YELLOW, WHITE],
        }
    }
}
/// Draw one stacked multi-channel frame. Masked (NaN) rows are skipped;
/// isolated NaN samples split a trace into segments.
pub fn render_frame_png(frame: &DisplayFrame, style: PlotStyle) -> Result<Vec<u8>, ViewerError> {
    if frame.plot_time.is_empty() || frame.plot_data.nrows() == 0 {
        return Err(ViewerError::Plot("display frame has no samples".into()));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let (x_min, x_max) = widen(frame.x_range);
        let (y_min, y_max) = widen(frame.y_range);
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(
                frame.stream_name.as_str(),
                ("sans-serif", 20).into_font().color(&WHITE),
            )
            .set_label_area_size(LabelAreaPosition::Left, 70)
            .set_label_area_size(LabelAreaPosition::Right, 110)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
        let tick_label = |y: &f64| nearest_label(&frame.y_ticks, &frame.y_tick_labels, *y);
        chart
            .configure_mesh()
            .light_line_style(&WHITE.mix(0.1))
            .y_labels(frame.y_ticks.len().max(2) * 2 + 1)
            .y_label_formatter(&tick_label)
            .x_desc("Time (s)")
            .axis_desc_style(("sans-serif", 14).into_font().color(&WHITE))
            .label_style(("sans-serif", 12).into_font().color(&WHITE))
            .draw()?;
        for (row, trace) in frame.plot_data.rows().into_iter().enumerate() {
            if trace.iter().all(|v| v.is_nan()) {
                continue;
            }
            let color = style.palette[row % style.palette.len()];
            for segment in finite_segments(&frame.plot_time, trace.iter().copied()) {
                chart.draw_series(LineSeries::new(segment, &color))?;
            }
            if let (Some(label), Some(&offset)) = (frame.rms_labels.get(row), frame.y_ticks.get(row)) {
                chart.draw_series(std::iter::once(Text::new(
                    label.clone(),
                    (x_max, offset),
                    ("sans-serif", 12).into_font().color(&color),
                )))?;
            }
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn widen(range: (f64, f64)) -> (f64, f64) {
    if (range.1 - range.0).abs() < f64::EPSILON {
        (range.0 - 0.5, range.1 + 0.5)
    } else {
        range
    }
}
fn nearest_label(ticks: &[f64], labels: &[String], y: f64) -> String {
    let spacing = if ticks.len() > 1 { (ticks[1] - ticks[0]).abs() } else { 1.0 };
    ticks
        .iter()
        .zip(labels)
        .find(|(tick, _)| (*tick - y).abs() < spacing * 0.25)
        .map(|(_, label)| label.clone())
        .unwrap_or_default()
}
fn finite_segments(
    time: &[f64],
    values: impl Iterator<Item = f64>,
) -> Vec<Vec<(f64, f64)>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for (&t, v) in time.iter().zip(values) {
        if v.is_finite() {
            current.push((t, v));
        } else if !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ViewerError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| ViewerError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
/// Keeps the latest frame and writes it as a PNG when the viewer closes.
pub struct PngSnapshotSink {
    path: PathBuf,
    style: PlotStyle,
    latest: Option<DisplayFrame>,
}
impl PngSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            style: PlotStyle::default(),
            latest: None,
        }
    }
    pub fn with_style(mut self, style: PlotStyle) -> Self {
        self.style = style;
        self
    }
}
impl FrameSink for PngSnapshotSink {
    fn present(&mut self, frame: &DisplayFrame) -> Result<(), ViewerError> {
        self.latest = Some(frame.clone());
        Ok(())
    }
    fn release(&mut self) -> Result<(), ViewerError> {
        let Some(frame) = self.latest.take() else {
            return Ok(());
        };
        let png = render_frame_png(&frame, self.style.clone())?;
        std::fs::write(&self.path, png)?;
        info!("snapshot written to {}", self.path.display());
        Ok(())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    fn empty_frame() -> DisplayFrame {
        DisplayFrame {
            stream_name: "eeg".into(),
            plot_time: Vec::new(),
            plot_data: Array2::zeros((0, 0)),
            y_ticks: Vec::new(),
            y_tick_labels: Vec::new(),
            rms_labels: Vec::new(),
            x_range: (0.0, 0.0),
            y_range: (0.0, 0.0),
        }
    }
    #[test]
    fn empty_frame_is_rejected() {
        let err = render_frame_png(&empty_frame(), PlotStyle::default()).unwrap_err();
        assert!(matches!(err, ViewerError::Plot(_)));
    }
    #[test]
    fn release_without_frames_writes_nothing() {
        let path = std::env::temp_dir().join(format!("lslview-none-{}.png", std::process::id()));
        let mut sink = PngSnapshotSink::new(&path);
        sink.release().unwrap();
        assert!(!path.exists());
    }
    #[test]
    fn nan_samples_split_segments() {
        let time = [0.0, 1.0, 2.0, 3.0, 4.0];
        let values = [1.0, f64::NAN, 2.0, 3.0, f64::NAN];
        let segments = finite_segments(&time, values.into_iter());
        assert_eq!(segments, vec![vec![(0.0, 1.0)], vec![(2.0, 2.0), (3.0, 3.0)]]);
    }
    #[test]
    fn tick_labels_resolve_to_nearest_channel() {
        let ticks = [0.0, 150.0, 300.0];
        let labels = ["Fz".to_string(), "Cz".to_string(), "Pz".to_string()];
        assert_eq!(nearest_label(&ticks, &labels, 150.0), "Cz");
        assert_eq!(nearest_label(&ticks, &labels, 75.0), "");
    }
}
