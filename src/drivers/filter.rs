use log::{debug, info};
use ndarray::{Array2, ArrayView2};

use crate::config::{FilterSettings, FrequencyFilter};
use crate::drivers::design::{design_bandpass, design_lowpass, moving_average};
use crate::drivers::ViewerError;

pub const KERNEL_NONE: &str = "none";
pub const KERNEL_BANDPASS: &str = "bandpass";
pub const KERNEL_MOVING_AVERAGE: &str = "moving-average";
pub const KERNEL_LOWPASS: &str = "lowpass";

#[derive(Clone, Debug, PartialEq)]
pub enum FilterKernel {
    Identity,
    Fir { b: Vec<f64> },
    Iir { b: Vec<f64>, a: Vec<f64> },
}
impl FilterKernel {
    /// Build an IIR kernel, normalising so that `a[0] == 1`.
    pub fn iir(b: Vec<f64>, a: Vec<f64>) -> Result<Self, ViewerError> {
        let a0 = a.first().copied().unwrap_or(0.0);
        if b.is_empty() || a0 == 0.0 || !a0.is_finite() {
            return Err(ViewerError::InvalidFilterSpec(
                "IIR kernel needs non-empty b and a[0] != 0".into(),
            ));
        }
        Ok(FilterKernel::Iir {
            b: b.iter().map(|v| v / a0).collect(),
            a: a.iter().map(|v| v / a0).collect(),
        })
    }
    /// Past inputs and past outputs the kernel needs per channel.
    fn order(&self) -> (usize, usize) {
        match self {
            FilterKernel::Identity => (0, 0),
            FilterKernel::Fir { b } => (b.len().saturating_sub(1), 0),
            FilterKernel::Iir { b, a } => (b.len().saturating_sub(1), a.len().saturating_sub(1)),
        }
    }
    fn fresh_state(&self, channels: usize) -> FilterState {
        let (inputs, outputs) = self.order();
        match self {
            FilterKernel::Identity => FilterState::None,
            FilterKernel::Fir { .. } => FilterState::Fir {
                past_inputs: vec![vec![0.0; inputs]; channels],
            },
            FilterKernel::Iir { .. } => FilterState::Iir {
                past_inputs: vec![vec![0.0; inputs]; channels],
                past_outputs: vec![vec![0.0; outputs]; channels],
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct NamedKernel {
    pub name: String,
    pub kernel: FilterKernel,
}

/// Per-channel history, oldest sample first, sized exactly to the active kernel.
#[derive(Clone, Debug, PartialEq)]
enum FilterState {
    None,
    Fir {
        past_inputs: Vec<Vec<f64>>,
    },
    Iir {
        past_inputs: Vec<Vec<f64>>,
        past_outputs: Vec<Vec<f64>>,
    },
}
impl FilterState {
    fn channels(&self) -> Option<usize> {
        match self {
            FilterState::None => None,
            FilterState::Fir { past_inputs } | FilterState::Iir { past_inputs, .. } => {
                Some(past_inputs.len())
            }
        }
    }
}

/// Selectable set of streaming kernels plus the state of the active one.
pub struct FilterBank {
    kernels: Vec<NamedKernel>,
    active: usize,
    channels: usize,
    state: FilterState,
}
impl FilterBank {
    /// Bank holding only the identity kernel.
    pub fn passthrough(channels: usize) -> Self {
        Self {
            kernels: vec![NamedKernel {
                name: KERNEL_NONE.into(),
                kernel: FilterKernel::Identity,
            }],
            active: 0,
            channels,
            state: FilterState::None,
        }
    }
    /// Design the configured kernels for a stream and activate the frequency filter.
    pub fn design(
        settings: &FilterSettings,
        sample_rate: f64,
        channels: usize,
    ) -> Result<Self, ViewerError> {
        let mut bank = Self::passthrough(channels);
        let selected = match settings.frequency {
            FrequencyFilter::Off => KERNEL_NONE,
            FrequencyFilter::MovingAverage(len) => {
                bank.add_kernel(
                    KERNEL_MOVING_AVERAGE,
                    FilterKernel::Fir {
                        b: moving_average(len),
                    },
                )?;
                KERNEL_MOVING_AVERAGE
            }
            FrequencyFilter::Band(band) => {
                let b = design_bandpass(
                    band,
                    sample_rate,
                    settings.attenuation_db,
                    settings.minimum_phase,
                )?;
                debug!("designed band-pass {band:?} with {} taps", b.len());
                bank.add_kernel(KERNEL_BANDPASS, FilterKernel::Fir { b })?;
                KERNEL_BANDPASS
            }
        };
        if let Some(cutoff) = settings.lowpass_hz {
            let (b, a) = design_lowpass(cutoff, sample_rate)?;
            bank.add_kernel(KERNEL_LOWPASS, FilterKernel::iir(b, a)?)?;
        }
        bank.select_kernel(selected)?;
        Ok(bank)
    }
    /// Register a kernel, replacing any kernel with the same name. Empty
    /// coefficient sets are rejected and IIR kernels are normalised by `a[0]`.
    pub fn add_kernel(&mut self, name: &str, kernel: FilterKernel) -> Result<(), ViewerError> {
        let kernel = match kernel {
            FilterKernel::Fir { b } if b.is_empty() => {
                return Err(ViewerError::InvalidFilterSpec(format!(
                    "FIR kernel '{name}' has no coefficients"
                )));
            }
            FilterKernel::Iir { b, a } => FilterKernel::iir(b, a)?,
            kernel => kernel,
        };
        let named = NamedKernel {
            name: name.to_string(),
            kernel,
        };
        match self.kernels.iter().position(|k| k.name == name) {
            Some(idx) => {
                self.kernels[idx] = named;
                if idx == self.active {
                    self.reset();
                }
            }
            None => self.kernels.push(named),
        }
        Ok(())
    }
    pub fn kernel_names(&self) -> Vec<&str> {
        self.kernels.iter().map(|k| k.name.as_str()).collect()
    }
    pub fn active_name(&self) -> &str {
        &self.kernels[self.active].name
    }
    pub fn active_kernel(&self) -> &FilterKernel {
        &self.kernels[self.active].kernel
    }
    /// Activate a kernel. History from the previous run is discarded even when
    /// re-selecting the same kernel.
    pub fn select_kernel(&mut self, name: &str) -> Result<(), ViewerError> {
        let idx = self
            .kernels
            .iter()
            .position(|k| k.name == name)
            .ok_or_else(|| ViewerError::UnknownKernel(name.to_string()))?;
        self.active = idx;
        self.reset();
        info!("filter kernel '{name}' selected");
        Ok(())
    }
    /// Drop all history; the next chunk starts from zero initial conditions.
    pub fn reset(&mut self) {
        self.state = self.active_kernel().fresh_state(self.channels);
    }
    /// Filter a channels x n chunk along the sample axis, continuing from the
    /// stored history. Non-finite inputs are treated as zero.
    pub fn apply(&mut self, chunk: ArrayView2<f64>) -> Array2<f64> {
        let mut out = chunk.mapv(|v| if v.is_finite() { v } else { 0.0 });
        if chunk.ncols() == 0 {
            return out;
        }
        let stale = self.state.channels().map_or(false, |c| c != chunk.nrows());
        if chunk.nrows() != self.channels || stale {
            debug!(
                "filter state shaped for {} channels, chunk has {}; cold restart",
                self.channels,
                chunk.nrows()
            );
            self.channels = chunk.nrows();
            self.reset();
        }
        let kernel = &self.kernels[self.active].kernel;
        match (kernel, &mut self.state) {
            (FilterKernel::Identity, _) => {}
            (FilterKernel::Fir { b }, FilterState::Fir { past_inputs }) => {
                for (c, history) in past_inputs.iter_mut().enumerate() {
                    let input = out.row(c).to_vec();
                    let filtered = run_channel(b, &[1.0], history, &mut Vec::new(), &input);
                    out.row_mut(c).iter_mut().zip(filtered).for_each(|(o, v)| *o = v);
                }
            }
            (
                FilterKernel::Iir { b, a },
                FilterState::Iir {
                    past_inputs,
                    past_outputs,
                },
            ) => {
                let histories = past_inputs.iter_mut().zip(past_outputs.iter_mut());
                for (c, (xs, ys)) in histories.enumerate() {
                    let input = out.row(c).to_vec();
                    let filtered = run_channel(b, a, xs, ys, &input);
                    out.row_mut(c).iter_mut().zip(filtered).for_each(|(o, v)| *o = v);
                }
            }
            // reset() always builds the state variant matching the kernel
            _ => {}
        }
        out
    }
}

/// Direct form I over one channel. `xs`/`ys` hold the last `len(b)-1` inputs
/// and `len(a)-1` outputs (oldest first) and are updated in place.
fn run_channel(
    b: &[f64],
    a: &[f64],
    xs: &mut Vec<f64>,
    ys: &mut Vec<f64>,
    input: &[f64],
) -> Vec<f64> {
    let nb = b.len();
    let na = a.len();
    let x_ext: Vec<f64> = xs.iter().chain(input).copied().collect();
    let mut y_ext: Vec<f64> = Vec::with_capacity(ys.len() + input.len());
    y_ext.extend_from_slice(ys);
    for i in 0..input.len() {
        let xi = nb - 1 + i;
        let yi = na - 1 + i;
        let mut acc = 0.0;
        for (k, bk) in b.iter().enumerate() {
            acc += bk * x_ext[xi - k];
        }
        for (k, ak) in a.iter().enumerate().skip(1) {
            acc -= ak * y_ext[yi - k];
        }
        y_ext.push(acc);
    }
    xs.clear();
    xs.extend_from_slice(&x_ext[x_ext.len() - (nb - 1)..]);
    ys.clear();
    ys.extend_from_slice(&y_ext[y_ext.len() - (na - 1)..]);
    y_ext.split_off(na - 1)
}
