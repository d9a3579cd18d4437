//! Small dense linear algebra for per-gene systems
//!
//! Systems are p x p with p the number of model coefficients, so plain
//! Cholesky on `ndarray` matrices is enough.

use ndarray::{Array1, Array2, ArrayView1};

/// Lower-triangular Cholesky factor of a symmetric positive definite matrix
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

fn solve_with_factor(l: &Array2<f64>, b: ArrayView1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let s: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - s) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let s: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - s) / l[[i, i]];
    }
    x
}

/// Solve A x = b for symmetric positive definite A
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let l = cholesky(a)?;
    Some(solve_with_factor(&l, b.view()))
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_spd(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let l = cholesky(a)?;
    let mut inv = Array2::<f64>::zeros((n, n));
    let mut e = Array1::<f64>::zeros(n);
    for j in 0..n {
        e.fill(0.0);
        e[j] = 1.0;
        inv.column_mut(j).assign(&solve_with_factor(&l, e.view()));
    }
    Some(inv)
}

/// ln |A| for symmetric positive definite A
pub fn log_det_spd(a: &Array2<f64>) -> Option<f64> {
    let l = cholesky(a)?;
    Some(2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>())
}

/// X' diag(w) X
pub fn weighted_gram(x: &Array2<f64>, w: &[f64]) -> Array2<f64> {
    let p = x.ncols();
    let mut g = Array2::<f64>::zeros((p, p));
    for (i, row) in x.rows().into_iter().enumerate() {
        let wi = w[i];
        for j in 0..p {
            let v = wi * row[j];
            if v == 0.0 {
                continue;
            }
            for k in 0..p {
                g[[j, k]] += v * row[k];
            }
        }
    }
    g
}

/// Ordinary least squares via the normal equations
pub fn least_squares(x: &Array2<f64>, y: &[f64]) -> Option<Array1<f64>> {
    let ones = vec![1.0; x.nrows()];
    let mut xtx = weighted_gram(x, &ones);
    for j in 0..xtx.nrows() {
        xtx[[j, j]] += 1e-12;
    }
    let xty = x.t().dot(&ArrayView1::from(y));
    solve_spd(&xtx, &xty)
}
