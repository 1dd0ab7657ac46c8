//! Loss functions returning the value and the gradient w.r.t. the prediction

use ndarray::{Array1, Array2, ArrayView1, Axis};

use super::activation::softmax_rows;

/// Mean squared error over all samples and columns
///
/// Optional per-sample weights scale each row's contribution; the mean is
/// still taken over the full batch.
pub fn mse(
    pred: &Array2<f64>,
    target: &Array2<f64>,
    weights: Option<ArrayView1<f64>>,
) -> (f64, Array2<f64>) {
    let n = (pred.nrows() * pred.ncols()).max(1) as f64;
    let mut diff = pred - target;
    if let Some(w) = weights {
        let w = w.insert_axis(Axis(1));
        let loss = (&diff * &diff * &w).sum() / n;
        diff *= &w;
        return (loss, diff * (2.0 / n));
    }
    let loss = diff.mapv(|v| v * v).sum() / n;
    (loss, diff * (2.0 / n))
}

/// Softmax cross-entropy over integer labels
///
/// Returns the loss, the gradient w.r.t. the logits and the probabilities.
pub fn cross_entropy(
    logits: &Array2<f64>,
    labels: ArrayView1<usize>,
    weights: Option<ArrayView1<f64>>,
) -> (f64, Array2<f64>, Array2<f64>) {
    let n = logits.nrows().max(1) as f64;
    let probs = softmax_rows(logits.view());
    let mut grad = probs.clone();
    let mut loss = 0.0;

    for (i, &label) in labels.iter().enumerate() {
        let w = weights.map_or(1.0, |w| w[i]);
        loss -= w * probs[[i, label]].max(1e-12).ln();
        grad[[i, label]] -= 1.0;
        if w != 1.0 {
            grad.row_mut(i).mapv_inplace(|g| g * w);
        }
    }

    (loss / n, grad / n, probs)
}

/// Fraction of rows whose arg-max matches the label
pub fn accuracy(probs: &Array2<f64>, labels: ArrayView1<usize>) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let predicted = argmax_rows(probs);
    let correct = predicted
        .iter()
        .zip(labels.iter())
        .filter(|(p, l)| p == l)
        .count();
    correct as f64 / labels.len() as f64
}

/// Index of the largest entry in each row
pub fn argmax_rows(x: &Array2<f64>) -> Array1<usize> {
    x.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mse_value_and_gradient() {
        let pred = array![[1.0, 2.0], [3.0, 4.0]];
        let target = array![[1.0, 1.0], [1.0, 1.0]];
        let (loss, grad) = mse(&pred, &target, None);
        assert!((loss - (0.0 + 1.0 + 4.0 + 9.0) / 4.0).abs() < 1e-12);
        assert!((grad[[1, 1]] - 2.0 * 3.0 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_mse() {
        let pred = array![[2.0], [2.0]];
        let target = array![[0.0], [0.0]];
        let w = array![1.0, 0.0];
        let (loss, grad) = mse(&pred, &target, Some(w.view()));
        assert!((loss - 2.0).abs() < 1e-12);
        assert_eq!(grad[[1, 0]], 0.0);
    }

    #[test]
    fn test_cross_entropy_gradient_check() {
        let logits = array![[0.2, -1.0, 0.5], [1.0, 0.1, -0.3]];
        let labels = array![2usize, 0];
        let (_, grad, probs) = cross_entropy(&logits, labels.view(), None);
        assert!((probs.row(0).sum() - 1.0).abs() < 1e-12);

        let h = 1e-6;
        for r in 0..2 {
            for c in 0..3 {
                let mut lp = logits.clone();
                lp[[r, c]] += h;
                let mut lm = logits.clone();
                lm[[r, c]] -= h;
                let numeric = (cross_entropy(&lp, labels.view(), None).0
                    - cross_entropy(&lm, labels.view(), None).0)
                    / (2.0 * h);
                assert!((numeric - grad[[r, c]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_accuracy() {
        let probs = array![[0.9, 0.1], [0.2, 0.8], [0.6, 0.4]];
        let labels = array![0usize, 1, 1];
        assert!((accuracy(&probs, labels.view()) - 2.0 / 3.0).abs() < 1e-12);
    }
}
