//! Continuous feature transforms
//!
//! Power transforms (Yeo-Johnson, Box-Cox) with the lambda chosen by a
//! maximum-likelihood grid search, and quantile transforms mapping values to
//! a uniform or standard normal reference distribution.

use serde::{Deserialize, Serialize};

/// Transform applied to each continuous column before normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformType {
    /// No transformation
    #[default]
    #[serde(rename = "none")]
    Identity,
    /// Yeo-Johnson power transform (works with any data)
    #[serde(rename = "yeo-johnson")]
    YeoJohnson,
    /// Box-Cox power transform, shifted when data is not strictly positive
    #[serde(rename = "box-cox")]
    BoxCox,
    /// Map empirical quantiles onto a standard normal
    #[serde(rename = "quantile_normal")]
    QuantileNormal,
    /// Map empirical quantiles onto [0, 1]
    #[serde(rename = "quantile_uniform")]
    QuantileUniform,
}

/// Upper bound on stored reference quantiles per column
const MAX_QUANTILES: usize = 1000;

/// Probability clip used before the inverse normal CDF
const QUANTILE_EPS: f64 = 1e-7;

/// Fitted parameters of one column's transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    pub kind: TransformType,
    /// Power parameter for Box-Cox and Yeo-Johnson
    pub lambda: Option<f64>,
    /// Added before Box-Cox so every training value is positive
    pub shift: f64,
    /// Sorted reference values for the quantile transforms
    pub references: Vec<f64>,
}

impl TransformParams {
    /// Parameters that leave values unchanged
    pub fn identity() -> Self {
        Self {
            kind: TransformType::Identity,
            lambda: None,
            shift: 0.0,
            references: Vec::new(),
        }
    }

    /// Fit on the non-null training values of a column
    pub fn fit(kind: TransformType, values: &[f64]) -> Self {
        let mut params = Self {
            kind,
            ..Self::identity()
        };
        match kind {
            TransformType::Identity => {}
            TransformType::YeoJohnson => {
                params.lambda = Some(grid_search_lambda(|l| yeojohnson_log_likelihood(values, l)));
            }
            TransformType::BoxCox => {
                let min_val = values.iter().cloned().fold(f64::INFINITY, f64::min);
                params.shift = if min_val.is_finite() && min_val <= 0.0 {
                    -min_val + 1.0
                } else {
                    0.0
                };
                let shifted: Vec<f64> = values.iter().map(|&v| v + params.shift).collect();
                params.lambda = Some(grid_search_lambda(|l| boxcox_log_likelihood(&shifted, l)));
            }
            TransformType::QuantileNormal | TransformType::QuantileUniform => {
                params.references = reference_quantiles(values);
            }
        }
        params
    }

    /// Transform a single value with the frozen parameters
    pub fn apply(&self, x: f64) -> f64 {
        match self.kind {
            TransformType::Identity => x,
            TransformType::YeoJohnson => yeojohnson(x, self.lambda.unwrap_or(1.0)),
            TransformType::BoxCox => boxcox((x + self.shift).max(1e-10), self.lambda.unwrap_or(1.0)),
            TransformType::QuantileUniform => self.empirical_cdf(x),
            TransformType::QuantileNormal => {
                normal_ppf(self.empirical_cdf(x).clamp(QUANTILE_EPS, 1.0 - QUANTILE_EPS))
            }
        }
    }

    /// Position of `x` among the reference quantiles, interpolated to [0, 1]
    fn empirical_cdf(&self, x: f64) -> f64 {
        let refs = &self.references;
        let m = refs.len();
        if m < 2 {
            return 0.5;
        }
        let lo = refs.partition_point(|&q| q < x);
        let hi = refs.partition_point(|&q| q <= x);
        let rank = if hi > lo {
            (lo + hi - 1) as f64 / 2.0
        } else if lo == 0 {
            0.0
        } else if lo == m {
            (m - 1) as f64
        } else {
            let (a, b) = (refs[lo - 1], refs[lo]);
            (lo - 1) as f64 + (x - a) / (b - a)
        };
        rank / (m - 1) as f64
    }
}

fn grid_search_lambda(log_likelihood: impl Fn(f64) -> f64) -> f64 {
    let mut best_lambda = 1.0;
    let mut best_ll = f64::NEG_INFINITY;
    for lambda_int in -20..=20 {
        let lambda = lambda_int as f64 * 0.1;
        let ll = log_likelihood(lambda);
        if ll > best_ll {
            best_ll = ll;
            best_lambda = lambda;
        }
    }
    best_lambda
}

fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|&t| (t - mean).powi(2)).sum::<f64>() / n
}

fn boxcox(x: f64, lambda: f64) -> f64 {
    if lambda.abs() < 1e-10 {
        x.ln()
    } else {
        (x.powf(lambda) - 1.0) / lambda
    }
}

fn boxcox_log_likelihood(values: &[f64], lambda: f64) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let transformed: Vec<f64> = values.iter().map(|&x| boxcox(x, lambda)).collect();
    let var = variance(&transformed);
    if !(var > 0.0) {
        return f64::NEG_INFINITY;
    }
    let log_jacobian: f64 = values.iter().map(|&x| x.ln()).sum();
    -(values.len() as f64) / 2.0 * var.ln() + (lambda - 1.0) * log_jacobian
}

fn yeojohnson(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() < 1e-10 {
            (x + 1.0).ln()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < 1e-10 {
        -(-x + 1.0).ln()
    } else {
        -((-x + 1.0).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

fn yeojohnson_log_likelihood(values: &[f64], lambda: f64) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let transformed: Vec<f64> = values.iter().map(|&x| yeojohnson(x, lambda)).collect();
    let var = variance(&transformed);
    if !(var > 0.0) {
        return f64::NEG_INFINITY;
    }
    let log_jacobian: f64 = values.iter().map(|&x| (x.abs() + 1.0).ln().copysign(x)).sum();
    -(values.len() as f64) / 2.0 * var.ln() + (lambda - 1.0) * log_jacobian
}

/// Evenly spaced quantiles of the sorted values
fn reference_quantiles(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().cloned().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n <= MAX_QUANTILES {
        return sorted;
    }
    (0..MAX_QUANTILES)
        .map(|i| {
            let pos = i as f64 * (n - 1) as f64 / (MAX_QUANTILES - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] * (1.0 - frac) + sorted[hi] * frac
        })
        .collect()
}

/// Inverse CDF of the standard normal (Acklam's rational approximation)
pub fn normal_ppf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
