use ndarray::{Array1, Array2};
use ndarray_linalg::{Eig, SVD};
use thiserror::Error;

use crate::error::MetaxcanError;

/// Rule deciding which singular values survive the pseudo-inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CutoffPolicy {
    /// Keep `s >= ratio * max(s)`.
    EigenRatio(f64),
    /// Keep `s >= ratio * sum(s)`.
    TraceRatio(f64),
    /// Keep the shortest leading run whose sum exceeds `(1 - tau) * sum(s)`.
    Threshold(f64),
}

impl CutoffPolicy {
    /// Builds the single policy given, rejecting zero or several.
    pub fn from_options(
        eigen_ratio: Option<f64>,
        trace_ratio: Option<f64>,
        threshold: Option<f64>,
    ) -> Result<Self, MetaxcanError> {
        let given: Vec<CutoffPolicy> = [
            eigen_ratio.map(CutoffPolicy::EigenRatio),
            trace_ratio.map(CutoffPolicy::TraceRatio),
            threshold.map(CutoffPolicy::Threshold),
        ]
        .into_iter()
        .flatten()
        .collect();
        match given.as_slice() {
            [policy] => {
                let value = policy.value();
                if !(0.0..=1.0).contains(&value) {
                    return Err(MetaxcanError::Configuration(format!(
                        "cutoff value {value} must lie in [0, 1]"
                    )));
                }
                Ok(*policy)
            }
            [] => Err(MetaxcanError::Configuration(
                "one of cutoff_eigen_ratio, cutoff_trace_ratio or cutoff_threshold is required"
                    .to_string(),
            )),
            _ => Err(MetaxcanError::Configuration(
                "cutoff_eigen_ratio, cutoff_trace_ratio and cutoff_threshold are mutually exclusive"
                    .to_string(),
            )),
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            CutoffPolicy::EigenRatio(v) | CutoffPolicy::TraceRatio(v) | CutoffPolicy::Threshold(v) => {
                *v
            }
        }
    }

    /// Smallest singular value to keep, given values in descending order.
    fn cutoff(&self, singular: &[f64]) -> f64 {
        let max = singular.first().copied().unwrap_or(0.0);
        let total: f64 = singular.iter().sum();
        match self {
            CutoffPolicy::EigenRatio(ratio) => ratio * max,
            CutoffPolicy::TraceRatio(ratio) => ratio * total,
            CutoffPolicy::Threshold(tau) => {
                let target = (1.0 - tau) * total;
                let mut acc = 0.0;
                for &s in singular {
                    acc += s;
                    if acc > target {
                        return s;
                    }
                }
                singular.last().copied().unwrap_or(0.0)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PinvError {
    #[error("matrix has complex eigenvalues")]
    Complex,
    #[error("matrix has no positive singular value")]
    Singular,
    #[error("decomposition failed: {0}")]
    Decomposition(String),
}

#[derive(Debug, Clone)]
pub struct PseudoInverse {
    pub inverse: Array2<f64>,
    pub n_retained: usize,
    /// Singular values below this were discarded.
    pub cutoff: f64,
    pub min_retained: f64,
}

/// Real eigenvalues of a square matrix, descending.
pub fn real_eigenvalues(matrix: &Array2<f64>) -> Result<Vec<f64>, PinvError> {
    if matrix.nrows() == 0 {
        return Ok(Vec::new());
    }
    let (values, _) = matrix
        .eig()
        .map_err(|e| PinvError::Decomposition(e.to_string()))?;
    let scale = values
        .iter()
        .map(|v| v.re.abs())
        .fold(1.0_f64, f64::max);
    if values.iter().any(|v| v.im.abs() > 1e-10 * scale) {
        return Err(PinvError::Complex);
    }
    let mut out: Vec<f64> = values.iter().map(|v| v.re).collect();
    out.sort_by(|a, b| b.total_cmp(a));
    Ok(out)
}

/// Truncated Moore-Penrose inverse of `matrix + ridge * I`.
///
/// The largest singular value is always kept when it is positive.
pub fn truncated_pinv(
    matrix: &Array2<f64>,
    policy: CutoffPolicy,
    ridge: f64,
) -> Result<PseudoInverse, PinvError> {
    let n = matrix.nrows();
    let regularized = matrix + &(Array2::<f64>::eye(n) * ridge);
    let (u, s, vt) = regularized
        .svd(true, true)
        .map_err(|e| PinvError::Decomposition(e.to_string()))?;
    let (Some(u), Some(vt)) = (u, vt) else {
        return Err(PinvError::Decomposition("missing singular vectors".to_string()));
    };
    if s.iter().any(|v| !v.is_finite()) {
        return Err(PinvError::Decomposition(
            "non-finite singular value".to_string(),
        ));
    }

    let singular: Vec<f64> = s.to_vec();
    let max = singular.first().copied().unwrap_or(0.0);
    if max <= 0.0 {
        return Err(PinvError::Singular);
    }
    let cutoff = policy.cutoff(&singular).min(max);

    let inv: Array1<f64> = s.mapv(|v| if v >= cutoff && v > 0.0 { 1.0 / v } else { 0.0 });
    let n_retained = inv.iter().filter(|v| **v != 0.0).count();
    let min_retained = singular
        .iter()
        .copied()
        .filter(|v| *v >= cutoff && *v > 0.0)
        .fold(f64::INFINITY, f64::min);

    let inverse = vt.t().dot(&Array2::from_diag(&inv)).dot(&u.t());
    Ok(PseudoInverse {
        inverse,
        n_retained,
        cutoff,
        min_retained,
    })
}
