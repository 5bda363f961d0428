//! Reconstruction criteria and the per-step loss record.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::RgbCriterion;
use crate::error::{StageError, StageResult};

fn check_lengths(what: &str, pred: usize, target: usize) -> StageResult<()> {
    if pred != target {
        return Err(StageError::render_output(format!(
            "{} has {} values, expected {}",
            what, pred, target
        )));
    }
    Ok(())
}

/// Mean squared error; zero for empty input.
pub fn mse(pred: &[f32], target: &[f32]) -> StageResult<f64> {
    check_lengths("prediction", pred.len(), target.len())?;
    if pred.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = pred
        .iter()
        .zip(target)
        .map(|(&p, &t)| {
            let d = (p - t) as f64;
            d * d
        })
        .sum();
    Ok(sum / pred.len() as f64)
}

/// Mean absolute error; zero for empty input.
pub fn l1(pred: &[f32], target: &[f32]) -> StageResult<f64> {
    check_lengths("prediction", pred.len(), target.len())?;
    if pred.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = pred
        .iter()
        .zip(target)
        .map(|(&p, &t)| ((p - t) as f64).abs())
        .sum();
    Ok(sum / pred.len() as f64)
}

fn flatten(rgb: &[[f32; 3]]) -> &[f32] {
    rgb.as_flattened()
}

impl RgbCriterion {
    /// Mean over every ray and channel.
    pub fn evaluate(&self, pred: &[[f32; 3]], target: &[[f32; 3]]) -> StageResult<f64> {
        check_lengths("rgb batch", pred.len(), target.len())?;
        match self {
            RgbCriterion::Mse => mse(flatten(pred), flatten(target)),
            RgbCriterion::L1 => l1(flatten(pred), flatten(target)),
        }
    }
}

/// Peak signal-to-noise ratio in dB for values in `[0, 1]`.
///
/// Identical images give `f64::INFINITY`.
pub fn psnr(pred: &[[f32; 3]], target: &[[f32; 3]]) -> StageResult<f64> {
    let err = RgbCriterion::Mse.evaluate(pred, target)?;
    Ok(-10.0 * err.log10())
}

/// Named loss terms of one step, in insertion order, plus the total.
///
/// Serializes as a flat map with the total under `t`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossBreakdown {
    terms: Vec<(String, f64)>,
    total: f64,
}

impl LossBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a term, replacing an earlier one with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.terms.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.terms.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.terms.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn terms(&self) -> &[(String, f64)] {
        &self.terms
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn set_total(&mut self, total: f64) {
        self.total = total;
    }

    /// Terms as `(&str, f64)` pairs, total last, for logging.
    pub fn as_pairs(&self) -> Vec<(&str, f64)> {
        self.terms
            .iter()
            .map(|(n, v)| (n.as_str(), *v))
            .chain(std::iter::once(("t", self.total)))
            .collect()
    }
}

impl Serialize for LossBreakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.terms.len() + 1))?;
        for (name, value) in &self.terms {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("t", &self.total)?;
        map.end()
    }
}

impl fmt::Display for LossBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.terms {
            write!(f, "{} {:.6} ", name, value)?;
        }
        write!(f, "t {:.6}", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mse_and_l1() {
        let pred = [0.0, 0.5, 1.0, 1.0];
        let target = [0.0, 0.0, 0.0, 1.0];
        assert_relative_eq!(mse(&pred, &target).unwrap(), (0.25 + 1.0) / 4.0);
        assert_relative_eq!(l1(&pred, &target).unwrap(), 1.5 / 4.0);
        assert_eq!(mse(&[], &[]).unwrap(), 0.0);
        assert!(matches!(
            mse(&pred, &target[..3]),
            Err(StageError::RenderOutput { .. })
        ));
    }

    #[test]
    fn test_rgb_criterion_averages_channels() {
        let pred = [[1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let target = [[0.0, 0.0, 0.0], [0.0, 0.0, 0.5]];
        assert_relative_eq!(
            RgbCriterion::Mse.evaluate(&pred, &target).unwrap(),
            1.25 / 6.0
        );
        assert_relative_eq!(
            RgbCriterion::L1.evaluate(&pred, &target).unwrap(),
            1.5 / 6.0
        );
    }

    #[test]
    fn test_psnr() {
        let a = [[0.5, 0.5, 0.5]; 4];
        let b = [[0.6, 0.6, 0.6]; 4];
        assert_relative_eq!(psnr(&a, &b).unwrap(), 20.0, epsilon = 1e-4);
        assert_eq!(psnr(&a, &a).unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_breakdown_order_and_serialization() {
        let mut losses = LossBreakdown::new();
        losses.push("mask", 0.25);
        losses.push("eikonal", 0.5);
        losses.push("mask", 0.125);
        losses.set_total(0.625);

        assert_eq!(losses.get("mask"), Some(0.125));
        assert_eq!(losses.get("rf"), None);
        assert_eq!(losses.terms().len(), 2);

        let json = serde_json::to_string(&losses).unwrap();
        assert_eq!(json, r#"{"mask":0.125,"eikonal":0.5,"t":0.625}"#);
        assert_eq!(
            losses.to_string(),
            "mask 0.125000 eikonal 0.500000 t 0.625000"
        );
    }
}
