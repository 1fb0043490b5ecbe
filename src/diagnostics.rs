//! Post-step quantities: mass conservation, velocity magnitude and wake frequency.
use nalgebra::DVector;

use crate::assembly::{Assemble, Coefficients};
use crate::error::Result;
use crate::form::{Form, Operand, Operator, Slot};
use crate::space::{FunctionSpace, SpaceKind};
use crate::Float;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DivergenceNorms {
    /// Area-weighted L2 norm over fluid cells.
    pub l2: Float,
    pub max: Float,
}

/// Discrete divergence of `slot`, evaluated with the same operator the pressure step uses.
pub fn divergence<A: Assemble>(
    assembler: &A,
    pressure: &FunctionSpace,
    fields: &dyn Coefficients,
    slot: Slot,
) -> Result<DivergenceNorms> {
    let form = Form::new(SpaceKind::Pressure).term(1.0, Operator::Divergence, Operand::Field(slot));
    let div = assembler.assemble_vector(&form, fields)?;
    Ok(norms(pressure, &div))
}

fn norms(pressure: &FunctionSpace, div: &DVector<Float>) -> DivergenceNorms {
    let area = pressure.h() * pressure.h();
    let mut sum = 0.0;
    let mut max: Float = 0.0;
    for (k, value) in div.iter().enumerate() {
        if pressure.is_interior(k) {
            sum += area * value * value;
            max = max.max(value.abs());
        }
    }
    DivergenceNorms { l2: sum.sqrt(), max }
}

/// Dominant frequency of a sampled signal, from the spacing of its upward mean crossings.
/// Returns `None` when the signal varies by less than `min_amplitude` around its mean or fewer
/// than two full periods are present.
pub fn dominant_frequency(times: &[Float], values: &[Float], min_amplitude: Float) -> Option<Float> {
    if times.len() != values.len() || values.len() < 4 {
        return None;
    }
    let mean = values.iter().sum::<Float>() / values.len() as Float;
    let amplitude = values
        .iter()
        .map(|v| (v - mean).abs())
        .fold(0.0, Float::max);
    if amplitude <= min_amplitude {
        return None;
    }

    let mut crossings = Vec::new();
    for k in 1..values.len() {
        let (a, b) = (values[k - 1] - mean, values[k] - mean);
        if a < 0.0 && b >= 0.0 {
            let t = times[k - 1] + (times[k] - times[k - 1]) * (-a / (b - a));
            crossings.push(t);
        }
    }
    if crossings.len() < 3 {
        return None;
    }
    let periods = (crossings.len() - 1) as Float;
    let span = crossings[crossings.len() - 1] - crossings[0];
    (span > 0.0).then(|| periods / span)
}

/// `St = f D / U`
pub fn strouhal(frequency: Float, diameter: Float, mean_velocity: Float) -> Float {
    frequency * diameter / mean_velocity
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_frequency_of_sine() {
        let times: Vec<Float> = (0..2000).map(|k| k as Float * 0.005).collect();
        let values: Vec<Float> = times.iter().map(|t| 0.3 + (2.0 * PI * 1.7 * t).sin()).collect();
        let f = dominant_frequency(&times, &values, 1e-3).unwrap();
        assert!((f - 1.7).abs() < 1e-2);
    }

    #[test]
    fn test_steady_signal_has_no_frequency() {
        let times: Vec<Float> = (0..100).map(|k| k as Float).collect();
        let values = vec![1.0; 100];
        assert!(dominant_frequency(&times, &values, 0.0).is_none());

        let ripple: Vec<Float> = times.iter().map(|t| 1.0 + 1e-6 * t.sin()).collect();
        assert!(dominant_frequency(&times, &ripple, 1e-3).is_none());
    }

    #[test]
    fn test_strouhal() {
        assert!((strouhal(3.0, 0.1, 1.0) - 0.3).abs() < 1e-14);
    }
}
