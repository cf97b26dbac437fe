use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;

use crate::drivers::ViewerError;

/// `frequency_filter` as written in the config file: a scalar moving-average
/// length (0 disables filtering) or a `[r0, r1, f0, f1]` band in Hz.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FrequencyFilterSpec {
    Scalar(f64),
    List(Vec<f64>),
}
impl Default for FrequencyFilterSpec {
    fn default() -> Self {
        FrequencyFilterSpec::Scalar(0.0)
    }
}
impl FrequencyFilterSpec {
    pub fn resolve(&self) -> Result<FrequencyFilter, ViewerError> {
        match self {
            FrequencyFilterSpec::Scalar(len) => {
                if !len.is_finite() || *len < 0.0 {
                    return Err(ViewerError::InvalidFilterSpec(format!(
                        "moving-average length must be a non-negative number (got {len})"
                    )));
                }
                let len = len.round() as usize;
                Ok(if len <= 1 {
                    FrequencyFilter::Off
                } else {
                    FrequencyFilter::MovingAverage(len)
                })
            }
            FrequencyFilterSpec::List(values) => match values.as_slice() {
                [] => Ok(FrequencyFilter::Off),
                [len] => FrequencyFilterSpec::Scalar(*len).resolve(),
                [r0, r1, f0, f1] => {
                    let band = [*r0, *r1, *f0, *f1];
                    let ordered = band.iter().all(|v| v.is_finite())
                        && *r0 >= 0.0
                        && r0 < r1
                        && r1 <= f0
                        && f0 < f1;
                    if !ordered {
                        return Err(ViewerError::InvalidFilterSpec(format!(
                            "band {band:?} must be increasing non-negative frequencies"
                        )));
                    }
                    Ok(FrequencyFilter::Band(band))
                }
                other => Err(ViewerError::InvalidFilterSpec(format!(
                    "expected a scalar or 4 frequencies, got {} values",
                    other.len()
                ))),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrequencyFilter {
    Off,
    MovingAverage(usize),
    Band([f64; 4]),
}

/// Everything needed to design a stream's filter bank.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterSettings {
    pub frequency: FrequencyFilter,
    pub attenuation_db: f64,
    pub minimum_phase: bool,
    pub lowpass_hz: Option<f64>,
}

/// Signal conditioning toggles, applied in this field order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostProcessing {
    pub rereference: bool,
    pub standardize: bool,
    pub zero_mean: bool,
}
impl Default for PostProcessing {
    fn default() -> Self {
        Self {
            rereference: false,
            standardize: false,
            zero_mean: true,
        }
    }
}

/// Raw viewer configuration as read from JSON. Every key is optional.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub stream_name: Option<String>,
    pub buffer_range_secs: f64,
    pub time_range_secs: f64,
    pub rms_range_secs: f64,
    pub data_scale: f64,
    pub channel_range: Vec<usize>,
    pub refresh_rate_hz: f64,
    pub frequency_filter: FrequencyFilterSpec,
    pub rereference: bool,
    pub standardize: bool,
    pub zero_mean: bool,
    pub page_offset: usize,
    pub subsample_stride: usize,
    pub attenuation_db: f64,
    pub minimum_phase: bool,
    pub lowpass_hz: Option<f64>,
    pub units: String,
    pub resolve_timeout_secs: f64,
    pub recording_dir: PathBuf,
    pub run_ticks: Option<u64>,
    pub snapshot_png: Option<PathBuf>,
}
impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            stream_name: None,
            buffer_range_secs: 10.0,
            time_range_secs: 5.0,
            rms_range_secs: 1.0,
            data_scale: 150.0,
            channel_range: (1..=32).collect(),
            refresh_rate_hz: 10.0,
            frequency_filter: FrequencyFilterSpec::default(),
            rereference: false,
            standardize: false,
            zero_mean: true,
            page_offset: 0,
            subsample_stride: 1,
            attenuation_db: 20.0,
            minimum_phase: true,
            lowpass_hz: None,
            units: "uV".into(),
            resolve_timeout_secs: 0.5,
            recording_dir: PathBuf::from("."),
            run_ticks: None,
            snapshot_png: None,
        }
    }
}
impl ViewerConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ViewerError> {
        Ok(serde_json::from_str(text)?)
    }
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ViewerError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
    /// Check ranges and resolve the filter spec. Nothing starts with a config
    /// that fails here.
    pub fn validate(&self) -> Result<ValidatedConfig, ViewerError> {
        let positive = [
            ("buffer_range_secs", self.buffer_range_secs),
            ("time_range_secs", self.time_range_secs),
            ("rms_range_secs", self.rms_range_secs),
            ("data_scale", self.data_scale),
            ("refresh_rate_hz", self.refresh_rate_hz),
            ("attenuation_db", self.attenuation_db),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ViewerError::InvalidConfig(format!(
                    "{key} must be positive (got {value})"
                )));
            }
        }
        if self.resolve_timeout_secs < 0.0 || !self.resolve_timeout_secs.is_finite() {
            return Err(ViewerError::InvalidConfig(
                "resolve_timeout_secs must be non-negative".into(),
            ));
        }
        if self.subsample_stride == 0 {
            return Err(ViewerError::InvalidConfig(
                "subsample_stride must be at least 1".into(),
            ));
        }
        // 1-based, user order kept, repeats dropped
        let mut seen = BTreeSet::new();
        let channel_range: Vec<usize> = self
            .channel_range
            .iter()
            .copied()
            .filter(|c| seen.insert(*c))
            .collect();
        if channel_range.is_empty() || channel_range.contains(&0) {
            return Err(ViewerError::InvalidConfig(
                "channel_range must list 1-based channel indices".into(),
            ));
        }
        if self.buffer_range_secs < self.time_range_secs {
            warn!(
                "buffer_range_secs ({}) is shorter than time_range_secs ({}); the buffer will cover the time range",
                self.buffer_range_secs, self.time_range_secs
            );
        }
        let frequency = self.frequency_filter.resolve()?;
        if let Some(cutoff) = self.lowpass_hz {
            if !(cutoff.is_finite() && cutoff > 0.0) {
                return Err(ViewerError::InvalidFilterSpec(format!(
                    "lowpass_hz must be positive (got {cutoff})"
                )));
            }
        }
        Ok(ValidatedConfig {
            stream_name: self.stream_name.clone(),
            buffer_range_secs: self.buffer_range_secs,
            resolve_timeout_secs: self.resolve_timeout_secs,
            refresh_rate_hz: self.refresh_rate_hz,
            recording_dir: self.recording_dir.clone(),
            filters: FilterSettings {
                frequency,
                attenuation_db: self.attenuation_db,
                minimum_phase: self.minimum_phase,
                lowpass_hz: self.lowpass_hz,
            },
            display: DisplaySettings {
                time_range_secs: self.time_range_secs,
                rms_range_secs: self.rms_range_secs,
                data_scale: self.data_scale,
                channel_range,
                page_offset: self.page_offset,
                subsample_stride: self.subsample_stride,
                post: PostProcessing {
                    rereference: self.rereference,
                    standardize: self.standardize,
                    zero_mean: self.zero_mean,
                },
                units: self.units.clone(),
            },
        })
    }
}

/// Initial display state handed to the viewport.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplaySettings {
    pub time_range_secs: f64,
    pub rms_range_secs: f64,
    pub data_scale: f64,
    pub channel_range: Vec<usize>,
    pub page_offset: usize,
    pub subsample_stride: usize,
    pub post: PostProcessing,
    pub units: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedConfig {
    pub stream_name: Option<String>,
    pub buffer_range_secs: f64,
    pub resolve_timeout_secs: f64,
    pub refresh_rate_hz: f64,
    pub recording_dir: PathBuf,
    pub filters: FilterSettings,
    pub display: DisplaySettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = ViewerConfig::default().validate().unwrap();
        assert_eq!(config.display.channel_range.len(), 32);
        assert_eq!(config.filters.frequency, FrequencyFilter::Off);
        assert!(config.display.post.zero_mean);
    }

    #[test]
    fn parses_band_filter_from_json() {
        let config = ViewerConfig::from_json_str(
            r#"{"stream_name": "EEG", "frequency_filter": [1, 2, 29, 31], "channel_range": [3, 1, 3, 2]}"#,
        )
        .unwrap()
        .validate()
        .unwrap();
        assert_eq!(config.stream_name.as_deref(), Some("EEG"));
        assert_eq!(
            config.filters.frequency,
            FrequencyFilter::Band([1.0, 2.0, 29.0, 31.0])
        );
        assert_eq!(config.display.channel_range, vec![3, 1, 2]);
    }

    #[test]
    fn scalar_filter_is_moving_average() {
        let config = ViewerConfig::from_json_str(r#"{"frequency_filter": 5}"#).unwrap();
        assert_eq!(
            config.validate().unwrap().filters.frequency,
            FrequencyFilter::MovingAverage(5)
        );
    }

    #[test]
    fn wrong_length_filter_is_rejected() {
        let config = ViewerConfig::from_json_str(r#"{"frequency_filter": [1, 2, 3]}"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ViewerError::InvalidFilterSpec(_))
        ));
    }

    #[test]
    fn zero_stride_is_rejected() {
        let config = ViewerConfig {
            subsample_stride: 0,
            ..ViewerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ViewerError::InvalidConfig(_))));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            ViewerConfig::from_json_str("{not json"),
            Err(ViewerError::Config(_))
        ));
    }
}
