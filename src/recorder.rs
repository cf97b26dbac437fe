use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::drivers::{Chunk, ViewerError};

/// Append-only capture of raw (pre-filter) chunks, flushed to CSV on stop.
pub struct RecordingSession {
    dir: PathBuf,
    target: Option<PathBuf>,
    chunks: Vec<Chunk>,
}

impl RecordingSession {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            target: None,
            chunks: Vec::new(),
        }
    }

    pub fn start(&mut self, label: &str) -> PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = self.dir.join(format!("recording_{label}_{timestamp}.csv"));
        if self.is_recording() {
            warn!("recording already running; keeping target {:?}", self.target);
        } else {
            info!("recording started: {}", path.display());
            self.target = Some(path.clone());
        }
        self.target.clone().unwrap_or(path)
    }

    pub fn is_recording(&self) -> bool {
        self.target.is_some()
    }

    pub fn captured_samples(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub fn capture(&mut self, chunk: &Chunk) {
        if self.is_recording() && !chunk.is_empty() {
            self.chunks.push(chunk.clone());
        }
    }

    /// Finish the recording and write it out. On failure the captured chunks
    /// stay in memory and the recording remains active so a retry loses nothing.
    pub fn stop(&mut self, labels: &[String]) -> Result<Option<PathBuf>, ViewerError> {
        let Some(path) = self.target.clone() else {
            return Ok(None);
        };
        write_csv(&path, labels, &self.chunks)
            .map_err(|e| ViewerError::Recording(format!("{}: {e}", path.display())))?;
        info!(
            "recording saved: {} ({} samples)",
            path.display(),
            self.captured_samples()
        );
        self.chunks.clear();
        self.target = None;
        Ok(Some(path))
    }
}

fn write_csv(path: &Path, labels: &[String], chunks: &[Chunk]) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write!(w, "timestamp")?;
    for label in labels {
        write!(w, ",{label}")?;
    }
    writeln!(w)?;
    for chunk in chunks {
        for (i, t) in chunk.timestamps.iter().enumerate() {
            write!(w, "{t:.6}")?;
            for value in chunk.samples.column(i) {
                write!(w, ",{value}")?;
            }
            writeln!(w)?;
        }
    }
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::fs;

    fn chunk(start: f64) -> Chunk {
        Chunk::new(
            Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            vec![start, start + 0.5],
        )
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lslview-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn captures_only_while_recording() {
        let mut rec = RecordingSession::new(scratch_dir("idle"));
        rec.capture(&chunk(0.0));
        assert_eq!(rec.captured_samples(), 0);
        assert_eq!(rec.stop(&[]).unwrap(), None);
    }

    #[test]
    fn stop_writes_csv() {
        let dir = scratch_dir("csv");
        let mut rec = RecordingSession::new(&dir);
        rec.start("rest");
        rec.capture(&chunk(1.0));
        rec.capture(&chunk(2.0));
        assert_eq!(rec.captured_samples(), 4);
        let path = rec.stop(&["Fz".into(), "Cz".into()]).unwrap().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,Fz,Cz");
        assert_eq!(lines[1], "1.000000,1,3");
        assert_eq!(lines[2], "1.500000,2,4");
        assert_eq!(lines.len(), 5);
        assert!(!rec.is_recording());
        fs::remove_file(path).ok();
    }

    #[test]
    fn failed_flush_keeps_data() {
        let mut rec = RecordingSession::new(scratch_dir("missing").join("does/not/exist"));
        rec.start("x");
        rec.capture(&chunk(0.0));
        assert!(matches!(rec.stop(&[]), Err(ViewerError::Recording(_))));
        assert!(rec.is_recording());
        assert_eq!(rec.captured_samples(), 2);
    }
}
