//! Post-processing applied to an extracted display window (channels x samples).
//!
//! Order is fixed when several toggles are on:
//! 1. common-average re-reference (per sample, across channels);
//! 2. standardisation (per channel, divide by its standard deviation);
//! 3. zero-mean (per channel, subtract its mean).
//!
//! Re-referencing must come before zero-meaning and standardisation sits
//! between them, so the composition is `zero_mean(standardize(rereference(x)))`.
use ndarray::{Array2, Axis};

use crate::config::PostProcessing;

pub fn apply(window: &mut Array2<f64>, post: PostProcessing) {
    if post.rereference {
        rereference(window);
    }
    if post.standardize {
        standardize(window);
    }
    if post.zero_mean {
        zero_mean(window);
    }
}

/// Subtract, per sample, the mean across all channels of the window.
pub fn rereference(window: &mut Array2<f64>) {
    if window.nrows() == 0 {
        return;
    }
    for mut column in window.axis_iter_mut(Axis(1)) {
        let mean = column.sum() / column.len() as f64;
        column.mapv_inplace(|v| v - mean);
    }
}

/// Divide each channel by its sample standard deviation. Flat channels are left as-is.
pub fn standardize(window: &mut Array2<f64>) {
    for mut row in window.axis_iter_mut(Axis(0)) {
        let values = row.to_vec();
        let std = std_dev(&values);
        if std.is_finite() && std > 0.0 {
            row.mapv_inplace(|v| v / std);
        }
    }
}

/// Subtract each channel's own mean.
pub fn zero_mean(window: &mut Array2<f64>) {
    for mut row in window.axis_iter_mut(Axis(0)) {
        if row.is_empty() {
            continue;
        }
        let mean = row.sum() / row.len() as f64;
        row.mapv_inplace(|v| v - mean);
    }
}

/// RMS about the mean of each channel over its last `points` samples.
pub fn channel_rms(window: &Array2<f64>, points: usize) -> Vec<f64> {
    let n = window.ncols();
    let start = n - points.min(n);
    window
        .axis_iter(Axis(0))
        .map(|row| {
            let tail: Vec<f64> = row.iter().skip(start).copied().collect();
            rms_about_mean(&tail)
        })
        .collect()
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// `sqrt(mean((x - mean(x))^2))`; zero for an empty slice.
pub fn rms_about_mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    let power = data
        .iter()
        .map(|v| {
            let delta = v - m;
            delta * delta
        })
        .sum::<f64>()
        / data.len() as f64;
    power.sqrt()
}

/// Sample standard deviation (n - 1 in the denominator).
fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data
        .iter()
        .map(|v| {
            let delta = v - m;
            delta * delta
        })
        .sum::<f64>()
        / (data.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn window() -> Array2<f64> {
        Array2::from_shape_vec(
            (3, 5),
            vec![
                1.0, 4.0, 2.0, 8.0, 5.0, //
                0.0, 0.0, 3.0, 0.0, 12.0, //
                -2.0, 1.0, 1.0, 6.0, 0.0,
            ],
        )
        .unwrap()
    }

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>) {
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12, "{x} vs {y}");
        }
    }

    #[test]
    fn rereference_zeroes_the_channel_mean() {
        let mut w = window();
        rereference(&mut w);
        for column in w.axis_iter(Axis(1)) {
            assert!(column.sum().abs() < 1e-12);
        }
    }

    #[test]
    fn fixed_order_is_rereference_then_zero_mean() {
        let post = PostProcessing {
            rereference: true,
            standardize: false,
            zero_mean: true,
        };
        let mut actual = window();
        apply(&mut actual, post);

        let mut expected = window();
        rereference(&mut expected);
        zero_mean(&mut expected);
        assert_close(&actual, &expected);
    }

    #[test]
    fn standardize_sits_between_rereference_and_zero_mean() {
        let post = PostProcessing {
            rereference: true,
            standardize: true,
            zero_mean: true,
        };
        let mut actual = window();
        apply(&mut actual, post);

        let mut expected = window();
        rereference(&mut expected);
        standardize(&mut expected);
        zero_mean(&mut expected);
        assert_close(&actual, &expected);

        let mut reversed = window();
        zero_mean(&mut reversed);
        standardize(&mut reversed);
        rereference(&mut reversed);
        let differs = actual
            .iter()
            .zip(reversed.iter())
            .any(|(a, b)| (a - b).abs() > 1e-6);
        assert!(differs);
    }

    #[test]
    fn standardize_gives_unit_deviation_and_skips_flat_channels() {
        let mut w = Array2::from_shape_vec((2, 4), vec![1.0, 3.0, 5.0, 7.0, 2.0, 2.0, 2.0, 2.0]).unwrap();
        standardize(&mut w);
        assert!((std_dev(&w.row(0).to_vec()) - 1.0).abs() < 1e-12);
        assert_eq!(w.row(1).to_vec(), vec![2.0; 4]);
    }

    #[test]
    fn rms_of_offset_sinusoid_is_amplitude_over_root_two() {
        let rate = 250.0;
        let amplitude = 3.0;
        let n = 500;
        let w = Array2::from_shape_fn((1, n), |(_, i)| {
            7.0 + amplitude * (2.0 * PI * 10.0 * i as f64 / rate).sin()
        });
        // last second = 10 full periods
        let rms = channel_rms(&w, 250);
        assert!((rms[0] - amplitude / 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn rms_window_is_clamped_to_available_samples() {
        let w = Array2::from_shape_vec((1, 2), vec![1.0, -1.0]).unwrap();
        assert!((channel_rms(&w, 100)[0] - 1.0).abs() < 1e-12);
        assert_eq!(rms_about_mean(&[]), 0.0);
    }
}
