//! A module for covariance kernels used as prior of the GP model.
//!
//! The following kernels are implemented:
//! * squared exponential (RBF),
//! * matern 3/2,
//! * matern 5/2,
//! * squared exponential with automatic relevance determination (ARD),
//!   i.e. one length scale per input component.
//!
//! All kernels are stationary: the covariance between two points only depends on
//! the componentwise differences of the points.

use crate::errors::{GpError, Result};
use crate::utils::{check_ncols, pairwise_differences};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2, Zip};
use std::fmt;

/// Covariance between points returned either as a full matrix or as its diagonal only
#[derive(Clone, Debug, PartialEq)]
pub enum Covariance<F: Float> {
    /// Full (m, n) covariance matrix
    Full(Array2<F>),
    /// Diagonal elements only (m,)
    Diag(Array1<F>),
}

impl<F: Float> Covariance<F> {
    /// Whether the full matrix is available
    pub fn is_full(&self) -> bool {
        matches!(self, Covariance::Full(_))
    }

    /// Diagonal elements of the covariance
    pub fn diag(&self) -> Array1<F> {
        match self {
            Covariance::Full(cov) => cov.diag().to_owned(),
            Covariance::Diag(var) => var.to_owned(),
        }
    }

    /// Full covariance matrix if available
    pub fn into_full(self) -> Option<Array2<F>> {
        match self {
            Covariance::Full(cov) => Some(cov),
            Covariance::Diag(_) => None,
        }
    }

    /// Diagonal elements of the covariance, extracted from the full matrix if needed
    pub fn into_diag(self) -> Array1<F> {
        match self {
            Covariance::Full(cov) => cov.diag().to_owned(),
            Covariance::Diag(var) => var,
        }
    }

    /// Add `noise` on the diagonal
    pub(crate) fn add_noise(self, noise: F) -> Self {
        match self {
            Covariance::Full(mut cov) => {
                cov.diag_mut().mapv_inplace(|v| v + noise);
                Covariance::Full(cov)
            }
            Covariance::Diag(var) => Covariance::Diag(var.mapv(|v| v + noise)),
        }
    }
}

/// A trait for covariance kernels `k(x, x')` used as GP prior
pub trait Kernel<F: Float>: Clone + fmt::Debug + fmt::Display + Send + Sync {
    /// Number of components of the input points
    fn input_dim(&self) -> usize;

    /// Signal variance, i.e. the value of `k(x, x)`
    fn variance(&self) -> F;

    /// Compute covariances given componentwise differences `d` (n, nx) between pairs of points.
    /// Returns the n covariance values.
    fn value(&self, d: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F>;

    /// Compute the (m, n) covariance matrix between `x1` (m, nx) and `x2` (n, nx) points
    fn matrix(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        check_ncols(x1, self.input_dim(), "x1 points")?;
        check_ncols(x2, self.input_dim(), "x2 points")?;
        let d = pairwise_differences(x1, x2);
        Ok(self.value(&d).into_shape((x1.nrows(), x2.nrows()))?)
    }

    /// Compute covariances `k(x1_i, x2_i)` between matched points of `x1` (m, nx) and `x2` (m, nx)
    fn diag(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array1<F>> {
        check_ncols(x1, self.input_dim(), "x1 points")?;
        check_ncols(x2, self.input_dim(), "x2 points")?;
        if x1.nrows() != x2.nrows() {
            return Err(GpError::DimensionError(format!(
                "diagonal covariance requires the same number of points, got {} and {}",
                x1.nrows(),
                x2.nrows()
            )));
        }
        Ok(self.value(&(x1 - x2)))
    }

    /// Compute either the full covariance matrix or only its diagonal when `diag` is true
    fn covariance(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
        diag: bool,
    ) -> Result<Covariance<F>> {
        if diag {
            Ok(Covariance::Diag(self.diag(x1, x2)?))
        } else {
            Ok(Covariance::Full(self.matrix(x1, x2)?))
        }
    }
}

fn check_positive<F: Float>(name: &str, value: F) -> Result<()> {
    if value.is_finite() && value > F::zero() {
        Ok(())
    } else {
        Err(GpError::InvalidValueError(format!(
            "`{name}` should be strictly positive, got {value}"
        )))
    }
}

fn check_input_dim(input_dim: usize) -> Result<()> {
    if input_dim == 0 {
        return Err(GpError::InvalidValueError(
            "`input_dim` cannot be 0!".to_string(),
        ));
    }
    Ok(())
}

/// Apply `f` to each row of `d` in parallel
fn map_rows<F: Float>(
    d: &ArrayBase<impl Data<Elem = F>, Ix2>,
    f: impl Fn(ArrayView1<F>) -> F + Send + Sync,
) -> Array1<F> {
    let mut r = Array1::zeros(d.nrows());
    Zip::from(&mut r)
        .and(d.rows())
        .par_for_each(|r_i, d_i| *r_i = f(d_i));
    r
}

macro_rules! declare_isotropic_kernel {
    ($(#[$meta:meta])* $kernel:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub struct $kernel<F: Float> {
            input_dim: usize,
            length_scale: F,
            variance: F,
        }

        impl<F: Float> $kernel<F> {
            /// Constructor given the input dimension, the length scale and the signal variance.
            /// Fails if the dimension is zero or if hyperparameters are not strictly positive.
            pub fn new(input_dim: usize, length_scale: F, variance: F) -> Result<Self> {
                check_input_dim(input_dim)?;
                check_positive("length_scale", length_scale)?;
                check_positive("variance", variance)?;
                Ok(Self {
                    input_dim,
                    length_scale,
                    variance,
                })
            }

            /// Length scale shared by all input components
            pub fn length_scale(&self) -> F {
                self.length_scale
            }
        }

        impl<F: Float> fmt::Display for $kernel<F> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    f,
                    "{}(dim={}, length_scale={}, variance={})",
                    $name, self.input_dim, self.length_scale, self.variance
                )
            }
        }
    };
}

declare_isotropic_kernel!(
    /// Squared exponential kernel also known as radial basis function (RBF) kernel
    RbfKernel,
    "Rbf"
);

declare_isotropic_kernel!(
    /// Matern 3/2 kernel
    Matern32Kernel,
    "Matern32"
);

declare_isotropic_kernel!(
    /// Matern 5/2 kernel
    Matern52Kernel,
    "Matern52"
);

impl<F: Float> Kernel<F> for RbfKernel<F> {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn variance(&self) -> F {
        self.variance
    }

    /// sigma2 * exp( - r^2 / (2 * l^2) )
    fn value(&self, d: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        let two_l2 = F::cast(2.) * self.length_scale * self.length_scale;
        map_rows(d, |d_i| {
            let r2 = d_i.fold(F::zero(), |acc, v| acc + *v * *v);
            self.variance * F::exp(-r2 / two_l2)
        })
    }
}

impl<F: Float> Kernel<F> for Matern32Kernel<F> {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn variance(&self) -> F {
        self.variance
    }

    /// sigma2 * (1 + sqrt(3) * r / l) * exp( - sqrt(3) * r / l )
    fn value(&self, d: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        let sqrt3 = F::cast(3.).sqrt();
        map_rows(d, |d_i| {
            let r = d_i.fold(F::zero(), |acc, v| acc + *v * *v).sqrt();
            let a = sqrt3 * r / self.length_scale;
            self.variance * (F::one() + a) * F::exp(-a)
        })
    }
}

impl<F: Float> Kernel<F> for Matern52Kernel<F> {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn variance(&self) -> F {
        self.variance
    }

    /// sigma2 * (1 + sqrt(5) * r / l + 5 * r^2 / (3 * l^2)) * exp( - sqrt(5) * r / l )
    fn value(&self, d: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        let sqrt5 = F::cast(5.).sqrt();
        let l = self.length_scale;
        let three_l2 = F::cast(3.) * l * l;
        map_rows(d, |d_i| {
            let r2 = d_i.fold(F::zero(), |acc, v| acc + *v * *v);
            let a = sqrt5 * r2.sqrt() / l;
            self.variance * (F::one() + a + F::cast(5.) * r2 / three_l2) * F::exp(-a)
        })
    }
}

/// Squared exponential kernel with automatic relevance determination:
/// each input component has its own length scale.
#[derive(Clone, Debug, PartialEq)]
pub struct ArdSquaredExponentialKernel<F: Float> {
    length_scales: Array1<F>,
    variance: F,
}

impl<F: Float> ArdSquaredExponentialKernel<F> {
    /// Constructor given one length scale per input component and the signal variance.
    /// The input dimension is the number of given length scales.
    pub fn new(length_scales: Array1<F>, variance: F) -> Result<Self> {
        check_input_dim(length_scales.len())?;
        for l in length_scales.iter() {
            check_positive("length_scales", *l)?;
        }
        check_positive("variance", variance)?;
        Ok(Self {
            length_scales,
            variance,
        })
    }

    /// Constructor with the same length scale for all `input_dim` components
    pub fn isotropic(input_dim: usize, length_scale: F, variance: F) -> Result<Self> {
        check_input_dim(input_dim)?;
        Self::new(Array1::from_elem(input_dim, length_scale), variance)
    }

    /// Length scales of the input components
    pub fn length_scales(&self) -> &Array1<F> {
        &self.length_scales
    }
}

impl<F: Float> Kernel<F> for ArdSquaredExponentialKernel<F> {
    fn input_dim(&self) -> usize {
        self.length_scales.len()
    }

    fn variance(&self) -> F {
        self.variance
    }

    /// sigma2 * exp( - sum_k d_k^2 / (2 * l_k^2) )
    fn value(&self, d: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array1<F> {
        let inv_two_l2 = self
            .length_scales
            .mapv(|l| F::one() / (F::cast(2.) * l * l));
        let r = d.mapv(|v| v * v).dot(&inv_two_l2);
        r.mapv(|v| self.variance * F::exp(-v))
    }
}

impl<F: Float> fmt::Display for ArdSquaredExponentialKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ArdSquaredExponential(length_scales={}, variance={})",
            self.length_scales, self.variance
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa_linalg::eigh::*;
    use ndarray::{array, Array, Axis};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use paste::paste;
    use rand_xoshiro::Xoshiro256Plus;

    fn random_points(n: usize, dim: usize, seed: u64) -> Array2<f64> {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        Array::random_using((n, dim), Uniform::new(-2., 2.), &mut rng)
    }

    macro_rules! test_kernel {
        ($kernel:ident, $build:expr) => {
            paste! {

                #[test]
                fn [<test_ $kernel:snake _symmetry>]() {
                    let kernel: $kernel<f64> = $build;
                    let x = random_points(12, kernel.input_dim(), 42);
                    let k = kernel.matrix(&x, &x).expect("kernel matrix");
                    assert_eq!(&[12, 12], k.shape());
                    assert_abs_diff_eq!(k, k.t(), epsilon = 1e-14);

                    let y = random_points(5, kernel.input_dim(), 43);
                    let kxy = kernel.matrix(&x, &y).expect("kernel matrix");
                    let kyx = kernel.matrix(&y, &x).expect("kernel matrix");
                    assert_eq!(&[12, 5], kxy.shape());
                    assert_abs_diff_eq!(kxy, kyx.t(), epsilon = 1e-14);
                }

                #[test]
                fn [<test_ $kernel:snake _diag>]() {
                    let kernel: $kernel<f64> = $build;
                    let x = random_points(10, kernel.input_dim(), 44);
                    let k = kernel.matrix(&x, &x).expect("kernel matrix");
                    let kdiag = kernel.diag(&x, &x).expect("kernel diagonal");
                    assert_eq!(k.diag(), kdiag);
                    // k(x, x) is exactly the signal variance
                    assert_eq!(Array1::from_elem(10, kernel.variance()), kdiag);

                    let y = random_points(10, kernel.input_dim(), 45);
                    let kxy = kernel.matrix(&x, &y).expect("kernel matrix");
                    let kdiag = kernel.diag(&x, &y).expect("kernel diagonal");
                    assert_abs_diff_eq!(kxy.diag(), kdiag, epsilon = 1e-15);

                    match kernel.covariance(&x, &y, true).expect("covariance") {
                        Covariance::Diag(v) => assert_eq!(kdiag, v),
                        Covariance::Full(_) => panic!("diagonal expected"),
                    }
                    assert!(kernel.covariance(&x, &y, false).expect("covariance").is_full());
                }

                #[test]
                fn [<test_ $kernel:snake _positive_semi_definite>]() {
                    let kernel: $kernel<f64> = $build;
                    let x = random_points(15, kernel.input_dim(), 46);
                    let k = kernel.matrix(&x, &x).expect("kernel matrix");
                    let (eigvals, _) = k.eigh_into().expect("eigen decomposition");
                    assert!(eigvals.iter().all(|v| *v > -1e-10), "{}", eigvals);
                }

                #[test]
                fn [<test_ $kernel:snake _bad_inputs>]() {
                    let kernel: $kernel<f64> = $build;
                    let dim = kernel.input_dim();
                    let x = random_points(4, dim, 47);
                    let bad = random_points(4, dim + 1, 48);
                    assert!(matches!(kernel.matrix(&x, &bad), Err(GpError::DimensionError(_))));
                    assert!(matches!(kernel.matrix(&bad, &bad), Err(GpError::DimensionError(_))));
                    assert!(matches!(kernel.diag(&x, &bad), Err(GpError::DimensionError(_))));
                    let fewer = random_points(3, dim, 49);
                    assert!(matches!(kernel.diag(&x, &fewer), Err(GpError::DimensionError(_))));
                    assert!(kernel.matrix(&x, &fewer).is_ok());
                }
            }
        };
    }

    test_kernel!(RbfKernel, RbfKernel::new(2, 0.7, 1.3).unwrap());
    test_kernel!(Matern32Kernel, Matern32Kernel::new(3, 1.5, 0.4).unwrap());
    test_kernel!(Matern52Kernel, Matern52Kernel::new(1, 0.3, 2.).unwrap());
    test_kernel!(
        ArdSquaredExponentialKernel,
        ArdSquaredExponentialKernel::new(array![0.5, 2., 1.], 1.7).unwrap()
    );

    #[test]
    fn test_kernel_values() {
        let x1 = array![[0., 0.]];
        let x2 = array![[0.6, 0.8]];

        let rbf = RbfKernel::new(2, 1., 2.).unwrap();
        assert_abs_diff_eq!(
            2. * f64::exp(-0.5),
            rbf.matrix(&x1, &x2).unwrap()[[0, 0]],
            epsilon = 1e-15
        );

        let s3 = f64::sqrt(3.);
        let m32 = Matern32Kernel::new(2, 1., 1.).unwrap();
        assert_abs_diff_eq!(
            (1. + s3) * f64::exp(-s3),
            m32.matrix(&x1, &x2).unwrap()[[0, 0]],
            epsilon = 1e-15
        );

        let s5 = f64::sqrt(5.);
        let m52 = Matern52Kernel::new(2, 2., 1.).unwrap();
        let a = s5 / 2.;
        assert_abs_diff_eq!(
            (1. + a + 5. / 12.) * f64::exp(-a),
            m52.matrix(&x1, &x2).unwrap()[[0, 0]],
            epsilon = 1e-15
        );

        let ard = ArdSquaredExponentialKernel::new(array![1., 2.], 3.).unwrap();
        let x2 = array![[1., 2.]];
        assert_abs_diff_eq!(
            3. * f64::exp(-1.),
            ard.matrix(&x1, &x2).unwrap()[[0, 0]],
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_ard_isotropic_equals_rbf() {
        let x = random_points(8, 3, 50);
        let y = random_points(6, 3, 51);
        let rbf = RbfKernel::new(3, 0.8, 1.2).unwrap();
        let ard = ArdSquaredExponentialKernel::isotropic(3, 0.8, 1.2).unwrap();
        assert_abs_diff_eq!(
            rbf.matrix(&x, &y).unwrap(),
            ard.matrix(&x, &y).unwrap(),
            epsilon = 1e-14
        );
    }

    #[test]
    fn test_ard_length_scale_relevance() {
        // a huge length scale makes the kernel insensitive to the second component
        let ard = ArdSquaredExponentialKernel::new(array![1., 1e8], 1.).unwrap();
        let rbf = RbfKernel::new(1, 1., 1.).unwrap();
        let x = array![[0., 0.], [0.5, 10.], [1., -3.]];
        let k = ard.matrix(&x, &x).unwrap();
        let x1 = x.column(0).insert_axis(Axis(1));
        let k1 = rbf.matrix(&x1, &x1).unwrap();
        assert_abs_diff_eq!(k, k1, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_hyperparameters() {
        assert!(matches!(
            RbfKernel::new(1, 0., 1.),
            Err(GpError::InvalidValueError(_))
        ));
        assert!(matches!(
            Matern32Kernel::new(1, 1., -1.),
            Err(GpError::InvalidValueError(_))
        ));
        assert!(matches!(
            Matern52Kernel::new(0, 1., 1.),
            Err(GpError::InvalidValueError(_))
        ));
        assert!(matches!(
            RbfKernel::new(2, f64::NAN, 1.),
            Err(GpError::InvalidValueError(_))
        ));
        assert!(matches!(
            ArdSquaredExponentialKernel::new(array![1., 0.], 1.),
            Err(GpError::InvalidValueError(_))
        ));
        assert!(matches!(
            ArdSquaredExponentialKernel::new(Array1::<f64>::zeros(0), 1.),
            Err(GpError::InvalidValueError(_))
        ));
    }

    #[test]
    fn test_covariance_helpers() {
        let full = Covariance::Full(array![[1., 0.2], [0.2, 3.]]);
        assert_eq!(array![1., 3.], full.diag());
        assert_eq!(
            Covariance::Full(array![[1.5, 0.2], [0.2, 3.5]]),
            full.clone().add_noise(0.5)
        );
        assert_eq!(array![1., 3.], full.into_diag());

        let diag = Covariance::Diag(array![1., 3.]);
        assert!(!diag.is_full());
        assert_eq!(Covariance::Diag(array![1.5, 3.5]), diag.clone().add_noise(0.5));
        assert_eq!(None, diag.into_full());
    }

    #[test]
    fn test_display() {
        let rbf = RbfKernel::new(2, 0.5, 1.).unwrap();
        assert_eq!("Rbf(dim=2, length_scale=0.5, variance=1)", rbf.to_string());
    }
}
