use crate::errors::{GpError, Result};
use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_stats::QuantileExt;

/// Computes differences between each element of x and each element of y
/// resulting in a 2d array of shape (nrows(x) * nrows(y), ncols(x));
/// *Panics* if x and y have not the same column numbers
pub fn pairwise_differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.ncols() == y.ncols());

    let ny = y.nrows();
    let mut result = Array2::zeros((x.nrows() * ny, x.ncols()));
    for (i, x_row) in x.rows().into_iter().enumerate() {
        let diff = &x_row - y;
        result.slice_mut(s![i * ny..(i + 1) * ny, ..]).assign(&diff);
    }
    result
}

/// Check that the points `x` given as a (n, nx) matrix have the `expected` number of components
pub(crate) fn check_ncols<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    expected: usize,
    what: &str,
) -> Result<()> {
    if x.ncols() != expected {
        return Err(GpError::DimensionError(format!(
            "{what} should have {expected} components, got {}",
            x.ncols()
        )));
    }
    Ok(())
}

/// Smallest squared distance between two distinct rows of `x`, None when less than two rows
pub(crate) fn min_squared_distance<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Option<F> {
    let n_obs = x.nrows();
    (0..n_obs.saturating_sub(1))
        .map(|k| {
            let diff = &x.slice(s![k + 1.., ..]) - &x.row(k);
            diff.mapv(|v| v * v)
                .sum_axis(Axis(1))
                .fold(F::infinity(), |acc, &d| if d < acc { d } else { acc })
        })
        .reduce(|acc, d| if d < acc { d } else { acc })
}

/// Lower triangular Cholesky factor `L` of `mat = L.Lt`.
/// Fails with [GpError::IllConditionedCovarianceError] when `mat` is not (numerically)
/// positive definite, i.e. when a squared pivot is below `10 * n * eps * max(diag(mat))`.
/// `name` is used to describe `mat` in the error message.
pub(crate) fn lower_cholesky<F: Float>(mat: &Array2<F>, name: &str) -> Result<Array2<F>> {
    let l = mat.cholesky().map_err(|err| {
        GpError::IllConditionedCovarianceError(format!(
            "Cholesky factorization of {name} failed: {err}"
        ))
    })?;
    // pivots lost in round-off relatively to the largest diagonal entry
    let max_diag = mat.diag().max().ok().copied().unwrap_or_else(F::zero);
    let tol = F::cast(10 * mat.nrows()) * F::epsilon() * max_diag;
    if l
        .diag()
        .iter()
        .any(|v| !v.is_finite() || *v <= F::zero() || *v * *v <= tol)
    {
        return Err(GpError::IllConditionedCovarianceError(format!(
            "{name} is not positive definite (pivot below {tol:e} or non finite)"
        )));
    }
    Ok(l)
}

/// Inverse of the symmetric positive definite matrix `mat` computed
/// from the inverse of its Cholesky factor: `mat^-1 = (L^-1)t.L^-1`
pub(crate) fn cholesky_inverse<F: Float>(mat: &Array2<F>, name: &str) -> Result<Array2<F>> {
    let l = lower_cholesky(mat, name)?;
    let inv_l = l.solve_triangular(&Array2::<F>::eye(mat.nrows()), UPLO::Lower)?;
    if inv_l.iter().any(|v| !v.is_finite()) {
        return Err(GpError::IllConditionedCovarianceError(format!(
            "inverse of the Cholesky factor of {name} is not finite"
        )));
    }
    Ok(inv_l.t().dot(&inv_l))
}

/// Set slightly negative variances to zero, returns the number of clamped values
pub(crate) fn clamp_variances<F: Float>(var: &mut Array1<F>) -> usize {
    let mut n_clamped = 0;
    var.mapv_inplace(|v| {
        if v < F::zero() {
            n_clamped += 1;
            F::zero()
        } else {
            v
        }
    });
    n_clamped
}

/// Make `cov` exactly symmetric and set its slightly negative diagonal entries to zero,
/// returns the number of clamped diagonal values
pub(crate) fn regularize_covariance<F: Float>(cov: &mut Array2<F>) -> usize {
    let half = F::cast(0.5);
    let sym = (&*cov + &cov.t()).mapv(|v| v * half);
    cov.assign(&sym);
    let mut n_clamped = 0;
    cov.diag_mut().mapv_inplace(|v| {
        if v < F::zero() {
            n_clamped += 1;
            F::zero()
        } else {
            v
        }
    });
    n_clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_pairwise_differences() {
        let x = array![[-0.9486833], [-0.82219219]];
        let y = array![
            [-1.26491106],
            [-0.63245553],
            [0.],
            [0.63245553],
            [1.26491106]
        ];
        assert_abs_diff_eq!(
            &array![
                [0.31622777],
                [-0.31622777],
                [-0.9486833],
                [-1.58113883],
                [-2.21359436],
                [0.44271887],
                [-0.18973666],
                [-0.82219219],
                [-1.45464772],
                [-2.08710326]
            ],
            &pairwise_differences(&x, &y),
            epsilon = 1e-6
        )
    }

    #[test]
    fn test_min_squared_distance() {
        let xt = array![[0.5, 1.], [1.2, 0.], [2.0, 3.], [0.7, 1.1]];
        assert_abs_diff_eq!(0.05, min_squared_distance(&xt).unwrap(), epsilon = 1e-12);

        let xt = array![[0.5, 1.], [1.2, 0.], [0.5, 1.]];
        assert_eq!(Some(0.), min_squared_distance(&xt));

        let xt = array![[0.5, 1.]];
        assert_eq!(None, min_squared_distance(&xt));
    }

    #[test]
    fn test_cholesky_inverse() {
        let a = array![[4., 2., 0.6], [2., 5., 1.], [0.6, 1., 3.]];
        let inv_a = cholesky_inverse(&a, "A").expect("A is spd");
        assert_abs_diff_eq!(a.dot(&inv_a), Array2::eye(3), epsilon = 1e-12);
    }

    #[test]
    fn test_cholesky_inverse_not_spd() {
        let a = array![[1., 1.], [1., 1.]];
        assert!(matches!(
            cholesky_inverse(&a, "A"),
            Err(GpError::IllConditionedCovarianceError(_))
        ));
        let a = array![[1., 2.], [2., 1.]];
        assert!(matches!(
            cholesky_inverse(&a, "A"),
            Err(GpError::IllConditionedCovarianceError(_))
        ));
    }

    #[test]
    fn test_cholesky_round_off_pivot() {
        // singular up to round-off: the last pivot is tiny but not zero
        let a = array![[1., 1.], [1., 1. + 1e-15]];
        assert!(matches!(
            lower_cholesky(&a, "A"),
            Err(GpError::IllConditionedCovarianceError(_))
        ));
        for scale in [0.3, 1., 2., 3., 10., 1e3] {
            let a = array![[1., 0.5, 1.], [0.5, 1., 0.5], [1., 0.5, 1.]] * scale;
            assert!(
                matches!(
                    cholesky_inverse(&a, "A"),
                    Err(GpError::IllConditionedCovarianceError(_))
                ),
                "scale = {scale}"
            );
        }
        // small but genuine pivots are kept
        let a = array![[1., 0.999], [0.999, 1.]] * 1e-6;
        assert!(lower_cholesky(&a, "A").is_ok());
    }

    #[test]
    fn test_regularize_covariance() {
        let mut cov = array![[1., 0.5], [0.3, -1e-12]];
        let n = regularize_covariance(&mut cov);
        assert_eq!(1, n);
        assert_abs_diff_eq!(array![[1., 0.4], [0.4, 0.]], cov, epsilon = 1e-15);
        assert_eq!(cov[[0, 1]], cov[[1, 0]]);

        let mut var = array![0.1, -1e-14, 0.];
        assert_eq!(1, clamp_variances(&mut var));
        assert_eq!(array![0.1, 0., 0.], var);
    }
}
