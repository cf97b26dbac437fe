//! Closed-form kernel design routines.
//!
//! Everything here is a pure function of its numeric arguments:
//! - band-pass: windowed FIR by frequency sampling, Kaiser window sized from the
//!   narrowest transition band and the stopband attenuation, optionally folded
//!   to minimum phase through the real cepstrum;
//! - low-pass: second-order Butterworth section (IIR);
//! - moving average: boxcar FIR.
use std::f64::consts::{FRAC_1_SQRT_2, PI};

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::drivers::ViewerError;

/// Floor applied to magnitudes before taking logarithms.
const MAGNITUDE_FLOOR: f64 = 1e-10;

/// Kaiser window shape parameter for a stopband attenuation in dB.
pub fn kaiser_beta(attenuation_db: f64) -> f64 {
    if attenuation_db < 21.0 {
        0.0
    } else if attenuation_db <= 50.0 {
        0.5842 * (attenuation_db - 21.0).powf(0.4) + 0.07886 * (attenuation_db - 21.0)
    } else {
        0.1102 * (attenuation_db - 8.7)
    }
}

/// Odd window length for a transition width given as a fraction of Nyquist.
pub fn kaiser_length(attenuation_db: f64, transition: f64) -> usize {
    let numerator = (attenuation_db - 7.95).max(1.0);
    let n = (numerator / (2.285 * PI * transition)).ceil() as usize + 1;
    if n % 2 == 0 {
        n + 1
    } else {
        n.max(3)
    }
}

pub fn kaiser_window(len: usize, beta: f64) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = bessel_i0(beta);
    let last = (len - 1) as f64;
    (0..len)
        .map(|n| {
            let r = 2.0 * n as f64 / last - 1.0;
            bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom
        })
        .collect()
}

// Zeroth-order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..200 {
        term *= half / k as f64;
        let add = term * term;
        sum += add;
        if add < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Band-pass kernel for `band = [r0, r1, f0, f1]` in Hz: stopband up to `r0`,
/// rising to unity between `r0` and `r1`, passband to `f0`, falling to the
/// stopband at `f1`.
pub fn design_bandpass(
    band: [f64; 4],
    sample_rate: f64,
    attenuation_db: f64,
    minimum_phase: bool,
) -> Result<Vec<f64>, ViewerError> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(ViewerError::InvalidSampleRate(sample_rate));
    }
    let nyquist = sample_rate / 2.0;
    let [r0, r1, f0, f1] = band;
    let ordered = r0 >= 0.0 && r0 < r1 && r1 <= f0 && f0 < f1 && f1 <= nyquist;
    if !band.iter().all(|v| v.is_finite()) || !ordered {
        return Err(ViewerError::InvalidFilterSpec(format!(
            "band {band:?} must satisfy 0 <= r0 < r1 <= f0 < f1 <= {nyquist}"
        )));
    }
    if !(attenuation_db.is_finite() && attenuation_db > 0.0) {
        return Err(ViewerError::InvalidFilterSpec(format!(
            "attenuation must be positive (got {attenuation_db})"
        )));
    }
    let edges = [0.0, r0 / nyquist, r1 / nyquist, f0 / nyquist, f1 / nyquist, 1.0];
    let gains = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0];
    let transition = (edges[2] - edges[1]).min(edges[4] - edges[3]);
    let window = kaiser_window(
        kaiser_length(attenuation_db, transition),
        kaiser_beta(attenuation_db),
    );
    let taps = fir_from_frequency_samples(&edges, &gains, &window);
    Ok(if minimum_phase {
        to_minimum_phase(&taps)
    } else {
        taps
    })
}

/// Linear-phase FIR whose amplitude response interpolates `gains` at `edges`
/// (fractions of Nyquist), truncated by `window`.
pub fn fir_from_frequency_samples(edges: &[f64], gains: &[f64], window: &[f64]) -> Vec<f64> {
    let order = window.len().saturating_sub(1);
    let grid = order.next_power_of_two().max(512);
    let size = 2 * grid;
    let delay = order as f64 / 2.0;
    let mut spectrum = vec![Complex64::new(0.0, 0.0); size];
    for k in 0..=grid {
        let freq = k as f64 / grid as f64;
        let amplitude = interpolate(edges, gains, freq);
        let phase = -PI * delay * k as f64 / grid as f64;
        spectrum[k] = Complex64::from_polar(amplitude, phase);
    }
    for k in 1..grid {
        spectrum[size - k] = spectrum[k].conj();
    }
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_inverse(size).process(&mut spectrum);
    spectrum
        .iter()
        .zip(window)
        .map(|(c, w)| c.re / size as f64 * w)
        .collect()
}

fn interpolate(edges: &[f64], gains: &[f64], freq: f64) -> f64 {
    for i in 0..edges.len().saturating_sub(1) {
        let (lo, hi) = (edges[i], edges[i + 1]);
        if hi > lo && freq >= lo && freq <= hi {
            return gains[i] + (gains[i + 1] - gains[i]) * (freq - lo) / (hi - lo);
        }
    }
    gains.last().copied().unwrap_or(0.0)
}

/// Minimum-phase kernel with (approximately) the same magnitude response,
/// obtained by folding the real cepstrum onto positive quefrencies.
pub fn to_minimum_phase(taps: &[f64]) -> Vec<f64> {
    let n = taps.len();
    if n < 2 {
        return taps.to_vec();
    }
    let size = (64 * n).next_power_of_two().max(1024);
    let half = size / 2;
    let scale = size as f64;
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut buf: Vec<Complex64> = taps
        .iter()
        .map(|&v| Complex64::new(v, 0.0))
        .chain(std::iter::repeat(Complex64::new(0.0, 0.0)))
        .take(size)
        .collect();
    forward.process(&mut buf);
    for c in buf.iter_mut() {
        *c = Complex64::new(c.norm().max(MAGNITUDE_FLOOR).ln(), 0.0);
    }
    inverse.process(&mut buf);
    for (k, c) in buf.iter_mut().enumerate() {
        let fold = if k == 0 || k == half {
            1.0
        } else if k < half {
            2.0
        } else {
            0.0
        };
        *c = Complex64::new(c.re / scale * fold, 0.0);
    }
    forward.process(&mut buf);
    for c in buf.iter_mut() {
        *c = c.exp();
    }
    inverse.process(&mut buf);
    buf.iter().take(n).map(|c| c.re / scale).collect()
}

/// Second-order Butterworth low-pass as `(b, a)` with `a[0] == 1`.
pub fn design_lowpass(
    cutoff_hz: f64,
    sample_rate: f64,
) -> Result<(Vec<f64>, Vec<f64>), ViewerError> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(ViewerError::InvalidSampleRate(sample_rate));
    }
    let nyquist = sample_rate / 2.0;
    if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < nyquist) {
        return Err(ViewerError::InvalidFilterSpec(format!(
            "low-pass cutoff {cutoff_hz} Hz must lie in (0, {nyquist})"
        )));
    }
    let w0 = 2.0 * PI * cutoff_hz / sample_rate;
    let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
    let cos_w0 = w0.cos();
    let a0 = 1.0 + alpha;
    let b0 = (1.0 - cos_w0) * 0.5 / a0;
    let b = vec![b0, 2.0 * b0, b0];
    let a = vec![1.0, -2.0 * cos_w0 / a0, (1.0 - alpha) / a0];
    Ok((b, a))
}

pub fn moving_average(len: usize) -> Vec<f64> {
    let len = len.max(1);
    vec![1.0 / len as f64; len]
}

/// Magnitude of `b(z) / a(z)` at `freq_hz`.
pub fn frequency_response(b: &[f64], a: &[f64], freq_hz: f64, sample_rate: f64) -> f64 {
    let w = 2.0 * PI * freq_hz / sample_rate;
    let eval = |coeffs: &[f64]| {
        coeffs
            .iter()
            .enumerate()
            .fold(Complex64::new(0.0, 0.0), |acc, (k, &c)| {
                acc + Complex64::from_polar(c, -w * k as f64)
            })
    };
    (eval(b) / eval(a)).norm()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandpass_meets_pass_and_stopband() {
        for minimum_phase in [false, true] {
            let b = design_bandpass([1.0, 2.0, 29.0, 31.0], 250.0, 20.0, minimum_phase).unwrap();
            let pass = frequency_response(&b, &[1.0], 15.0, 250.0);
            let stop = frequency_response(&b, &[1.0], 40.0, 250.0);
            assert!((pass - 1.0).abs() < 0.12, "passband gain {pass}");
            // 20 dB attenuation with a few dB of slack
            assert!(stop < 0.1 * 10f64.powf(3.0 / 20.0), "stopband gain {stop}");
        }
    }

    #[test]
    fn bandpass_is_deterministic() {
        let a = design_bandpass([1.0, 2.0, 29.0, 31.0], 250.0, 20.0, true).unwrap();
        let b = design_bandpass([1.0, 2.0, 29.0, 31.0], 250.0, 20.0, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn narrower_transition_gives_longer_kernel() {
        let wide = design_bandpass([1.0, 4.0, 20.0, 25.0], 250.0, 40.0, false).unwrap();
        let narrow = design_bandpass([1.0, 2.0, 20.0, 21.0], 250.0, 40.0, false).unwrap();
        assert!(narrow.len() > wide.len());
        assert_eq!(wide.len() % 2, 1);
    }

    #[test]
    fn disordered_band_is_rejected() {
        let err = design_bandpass([2.0, 1.0, 29.0, 31.0], 250.0, 20.0, false).unwrap_err();
        assert!(matches!(err, ViewerError::InvalidFilterSpec(_)));
        let err = design_bandpass([1.0, 2.0, 29.0, 200.0], 250.0, 20.0, false).unwrap_err();
        assert!(matches!(err, ViewerError::InvalidFilterSpec(_)));
    }

    #[test]
    fn kaiser_window_is_symmetric_and_peaks_at_centre() {
        let w = kaiser_window(11, 5.0);
        for i in 0..11 {
            assert!((w[i] - w[10 - i]).abs() < 1e-12);
        }
        assert!((w[5] - 1.0).abs() < 1e-12);
        assert!(w[0] < w[5]);
        assert!(kaiser_window(7, 0.0).iter().all(|&v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn lowpass_has_unity_dc_and_half_power_at_cutoff() {
        let (b, a) = design_lowpass(10.0, 250.0).unwrap();
        assert!((frequency_response(&b, &a, 0.0, 250.0) - 1.0).abs() < 1e-9);
        assert!((frequency_response(&b, &a, 10.0, 250.0) - FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(frequency_response(&b, &a, 100.0, 250.0) < 0.05);
    }

    #[test]
    fn moving_average_sums_to_one() {
        let b = moving_average(4);
        assert_eq!(b.len(), 4);
        assert!((b.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(moving_average(0), vec![1.0]);
    }
}
