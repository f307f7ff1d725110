//! Forecast scoring metrics over paired target/prediction slices.

use std::collections::BTreeMap;

use thiserror::Error;

pub const DEFAULT_EPS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    #[error("metric inputs are empty")]
    Empty,
    #[error("length mismatch: {expected} targets, {actual} {what}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("log metrics need non-negative targets; got {value} at index {index}")]
    NegativeTarget { index: usize, value: f64 },
    #[error("weights must sum to a positive value")]
    ZeroWeight,
}

fn check_pair(y_true: &[f64], y_pred: &[f64]) -> Result<(), MetricsError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricsError::LengthMismatch {
            what: "predictions",
            expected: y_true.len(),
            actual: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricsError::Empty);
    }
    Ok(())
}

fn mean_of(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    values.sum::<f64>() / n as f64
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricsError> {
    check_pair(y_true, y_pred)?;
    Ok(mean_of(
        y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()),
        y_true.len(),
    ))
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricsError> {
    check_pair(y_true, y_pred)?;
    Ok(mean_of(
        y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)),
        y_true.len(),
    )
    .sqrt())
}

/// Negative predictions count as zero; `eps` is added to every prediction.
pub fn rmsle(y_true: &[f64], y_pred: &[f64], eps: f64) -> Result<f64, MetricsError> {
    check_pair(y_true, y_pred)?;
    if let Some((index, value)) = y_true.iter().enumerate().find(|(_, v)| **v < 0.0) {
        return Err(MetricsError::NegativeTarget {
            index,
            value: *value,
        });
    }
    Ok(mean_of(
        y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| ((p.max(0.0) + eps).ln_1p() - t.ln_1p()).powi(2)),
        y_true.len(),
    )
    .sqrt())
}

/// Fraction, not percent. Targets below `eps` are lifted to `eps`.
pub fn mape(y_true: &[f64], y_pred: &[f64], eps: f64) -> Result<f64, MetricsError> {
    check_pair(y_true, y_pred)?;
    Ok(mean_of(
        y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| ((t - p) / t.max(eps)).abs()),
        y_true.len(),
    ))
}

pub fn smape(y_true: &[f64], y_pred: &[f64], eps: f64) -> Result<f64, MetricsError> {
    check_pair(y_true, y_pred)?;
    Ok(mean_of(
        y_true.iter().zip(y_pred).map(|(t, p)| {
            let denom = (t.abs() + p.abs()) / 2.0;
            (t - p).abs() / denom.max(eps)
        }),
        y_true.len(),
    ))
}

/// Weighted RMSLE; without weights this is plain [`rmsle`].
pub fn nwrmsle(
    y_true: &[f64],
    y_pred: &[f64],
    weights: Option<&[f64]>,
    eps: f64,
) -> Result<f64, MetricsError> {
    let Some(weights) = weights else {
        return rmsle(y_true, y_pred, eps);
    };
    check_pair(y_true, y_pred)?;
    if weights.len() != y_true.len() {
        return Err(MetricsError::LengthMismatch {
            what: "weights",
            expected: y_true.len(),
            actual: weights.len(),
        });
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(MetricsError::ZeroWeight);
    }

    let weighted: f64 = y_true
        .iter()
        .zip(y_pred)
        .zip(weights)
        .map(|((t, p), w)| {
            let diff = (p.max(0.0) + eps).ln_1p() - (t + eps).ln_1p();
            w * diff * diff
        })
        .sum();
    Ok((weighted / total).sqrt())
}

/// The five unweighted metrics keyed `MAE`, `RMSE`, `RMSLE`, `MAPE`, `SMAPE`,
/// then `extra` on top (an extra with the same key wins).
pub fn summary(
    y_true: &[f64],
    y_pred: &[f64],
    extra: &[(&str, f64)],
) -> Result<BTreeMap<String, f64>, MetricsError> {
    let mut out = BTreeMap::new();
    out.insert("MAE".to_string(), mae(y_true, y_pred)?);
    out.insert("RMSE".to_string(), rmse(y_true, y_pred)?);
    out.insert("RMSLE".to_string(), rmsle(y_true, y_pred, DEFAULT_EPS)?);
    out.insert("MAPE".to_string(), mape(y_true, y_pred, DEFAULT_EPS)?);
    out.insert("SMAPE".to_string(), smape(y_true, y_pred, DEFAULT_EPS)?);
    for (key, value) in extra {
        out.insert((*key).to_string(), *value);
    }
    Ok(out)
}
