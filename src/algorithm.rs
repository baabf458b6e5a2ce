use crate::errors::{GpError, Result};
use crate::kernels::{Covariance, Kernel};
use crate::parameters::{GpParams, GpValidParams};
use crate::utils::{
    check_ncols, cholesky_inverse, clamp_variances, lower_cholesky, min_squared_distance,
    regularize_covariance,
};

use linfa::prelude::{Dataset, DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::eigh::*;
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

use log::{debug, warn};
use std::fmt;
use std::sync::RwLock;
use std::time::Instant;

/// A GP regression model where observations `y` at training points `X` are modeled as
///
/// `y = f(x) + e`
///
/// where:
/// * `f` is a zero mean gaussian process with covariance given by a kernel `k(x, x')`,
/// * `e` the observation noise ~ `Normal(0, noise_variance)`.
///
/// # Implementation
///
/// At construction, the kernel matrix `K = k(X, X)` and its noisy counterpart
/// `K_y = K + noise_variance * I` are both inverted using their Cholesky factorization.
/// Those inverses are cached and prediction methods only compute cross covariances
/// `k(x, X)` between query points and training points. The fitted model is never updated.
///
/// Predicted variances might be slightly negative depending on machine precision:
/// they are set to zero in that case.
///
/// # Example
///
/// ```no_run
/// use gpreg::{kernels::RbfKernel, GaussianProcess};
/// use linfa::prelude::*;
/// use ndarray::{array, Array, Axis};
///
/// let xt = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
/// let yt = array![0.0, 1.0, 1.5, 0.9, 1.0];
///
/// let gp = GaussianProcess::params(RbfKernel::new(1, 1.0, 1.0).expect("valid kernel"))
///     .noise_variance(1e-4)
///     .fit(&Dataset::new(xt, yt))
///     .expect("GP fitted");
///
/// let xtest = Array::linspace(0., 4., 50).insert_axis(Axis(1));
/// let (mean, var) = gp.predict(&xtest, false).expect("GP prediction");
/// let samples = gp.sample_posterior(&xtest, 5).expect("GP sampling");
/// ```
pub struct GaussianProcess<F: Float, K: Kernel<F>> {
    /// Inverse of the kernel matrix `K` at training points
    inv_k: Array2<F>,
    /// Inverse of the noisy kernel matrix `K + noise_variance * I` at training points
    inv_k_y: Array2<F>,
    /// `K^-1 . y`
    weights: Array1<F>,
    /// `(K + noise_variance * I)^-1 . y`
    weights_y: Array1<F>,
    /// Training dataset (input, output)
    pub(crate) training_data: (Array2<F>, Array1<F>),
    /// Parameters used to fit this model
    pub(crate) params: GpValidParams<F, K>,
    /// Random generator used for sampling
    rng: RwLock<Xoshiro256Plus>,
}

/// Method used to decompose the covariance matrix when sampling trajectories
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GpSamplingMethod {
    /// Cholesky factorization, fails on rank deficient covariance
    Cholesky,
    /// Eigenvalues decomposition, tiny eigenvalues are truncated
    EigenValues,
}

impl<F: Float, K: Kernel<F>> Clone for GaussianProcess<F, K> {
    fn clone(&self) -> Self {
        let rng = match self.rng.read() {
            Ok(rng) => rng.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Self {
            inv_k: self.inv_k.to_owned(),
            inv_k_y: self.inv_k_y.to_owned(),
            weights: self.weights.to_owned(),
            weights_y: self.weights_y.to_owned(),
            training_data: self.training_data.clone(),
            params: self.params.clone(),
            rng: RwLock::new(rng),
        }
    }
}

impl<F: Float, K: Kernel<F>> fmt::Debug for GaussianProcess<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GaussianProcess")
            .field("kernel", &self.params.kernel)
            .field("noise_variance", &self.params.noise_variance)
            .field("seed", &self.params.seed)
            .field("n_train", &self.training_data.0.nrows())
            .finish()
    }
}

impl<F: Float, K: Kernel<F>> fmt::Display for GaussianProcess<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(kernel={}, noise_variance={}, n_train={})",
            self.params.kernel,
            self.params.noise_variance,
            self.training_data.0.nrows()
        )
    }
}

impl<F: Float, K: Kernel<F>> GaussianProcess<F, K> {
    /// Gp parameters contructor
    pub fn params(kernel: K) -> GpParams<F, K> {
        GpParams::new(kernel)
    }

    /// Fit a GP given training points `x` (n, nx), observations `y` (n,), a covariance `kernel`,
    /// the variance of the observation noise and the seed of the random generator used for sampling.
    pub fn new(
        x: Array2<F>,
        y: Array1<F>,
        kernel: K,
        noise_variance: F,
        seed: u64,
    ) -> Result<Self> {
        GpParams::new(kernel)
            .noise_variance(noise_variance)
            .seed(seed)
            .fit(&Dataset::new(x, y))
    }

    /// Predict mean of noisy observations at n given `x` points of nx components
    /// specified as a (n, nx) matrix: `k(x, X) . (K + noise_variance * I)^-1 . y`.
    pub fn predict_mean(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let k = self.cross_covariance(x)?;
        Ok(k.dot(&self.weights_y))
    }

    /// Predict mean and variance of the latent noise-free function `f` at `x` points (n, nx).
    ///
    /// The mean is `k(x, X) . K^-1 . y`. Returns the full (n, n) posterior covariance
    /// matrix when `full_cov` is true, the n variances otherwise.
    pub fn predict_f(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        full_cov: bool,
    ) -> Result<(Array1<F>, Covariance<F>)> {
        let k = self.cross_covariance(x)?;
        let mean = k.dot(&self.weights);
        let cov = self.latent_covariance(x, &k, full_cov)?;
        Ok((mean, cov))
    }

    /// Predict variance of the latent noise-free function `f` at `x` points (n, nx)
    pub fn predict_fvar(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        full_cov: bool,
    ) -> Result<Covariance<F>> {
        let k = self.cross_covariance(x)?;
        self.latent_covariance(x, &k, full_cov)
    }

    /// Predict mean and variance of new noisy observations at `x` points (n, nx).
    ///
    /// Same as [GaussianProcess::predict_f] with the noise variance added
    /// to the (co)variance diagonal.
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        full_cov: bool,
    ) -> Result<(Array1<F>, Covariance<F>)> {
        let (mean, cov) = self.predict_f(x, full_cov)?;
        Ok((mean, cov.add_noise(self.params.noise_variance)))
    }

    /// Predict variance of new noisy observations at `x` points (n, nx)
    pub fn predict_var(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        full_cov: bool,
    ) -> Result<Covariance<F>> {
        Ok(self
            .predict_fvar(x, full_cov)?
            .add_noise(self.params.noise_variance))
    }

    /// Predict the posterior covariance matrix (n1, n2) between predictions
    /// at `x1` (n1, nx) points and at `x2` (n2, nx) points
    pub fn predict_cov(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        let kernel = &self.params.kernel;
        let xt = &self.training_data.0;
        let k1 = kernel.matrix(x1, xt)?;
        let k2 = kernel.matrix(xt, x2)?;
        Ok(kernel.matrix(x1, x2)? - k1.dot(&self.inv_k_y).dot(&k2))
    }

    /// Draw one sample of the zero mean GP prior at `x` points (n, nx).
    /// Training data is not taken into account.
    pub fn prior_sampling(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        let traj = self.sample_prior(x, 1)?;
        Ok(traj.column(0).to_owned())
    }

    /// Sample the GP prior for `n_traj` trajectories at `x` points (n, nx) using
    /// eigenvalues decomposition of the prior covariance. Returns a (n, n_traj) matrix.
    pub fn sample_prior(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
    ) -> Result<Array2<F>> {
        let cov = self.params.kernel.matrix(x, x)?;
        self.sample(Array1::zeros(x.nrows()), cov, n_traj, GpSamplingMethod::EigenValues)
    }

    /// Sample the GP prior for `n_traj` trajectories at `x` points (n, nx) using
    /// Cholesky factorization of the prior covariance. Returns a (n, n_traj) matrix.
    pub fn sample_prior_chol(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
    ) -> Result<Array2<F>> {
        let cov = self.params.kernel.matrix(x, x)?;
        self.sample(Array1::zeros(x.nrows()), cov, n_traj, GpSamplingMethod::Cholesky)
    }

    /// Sample the posterior of the latent function for `n_traj` trajectories at `x` points (n, nx).
    /// Returns a (n, n_traj) matrix.
    pub fn sample_posterior(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
    ) -> Result<Array2<F>> {
        let (mean, cov) = self.predict_f(x, true)?;
        let cov = cov.into_full().ok_or_else(|| {
            GpError::InvalidValueError("full posterior covariance expected".to_string())
        })?;
        self.sample(mean, cov, n_traj, GpSamplingMethod::EigenValues)
    }

    /// Retrieve covariance kernel
    pub fn kernel(&self) -> &K {
        &self.params.kernel
    }

    /// Retrieve variance of the observation noise
    pub fn noise_variance(&self) -> F {
        self.params.noise_variance
    }

    /// Retrieve training dataset (input, output)
    pub fn training_data(&self) -> &(Array2<F>, Array1<F>) {
        &self.training_data
    }

    /// Retrieve parameters used to fit this model
    pub fn params_used(&self) -> &GpValidParams<F, K> {
        &self.params
    }

    /// Retrieve the inverse of the kernel matrix at training points
    pub fn inv_k(&self) -> &Array2<F> {
        &self.inv_k
    }

    /// Retrieve the inverse of the noisy kernel matrix at training points
    pub fn inv_k_y(&self) -> &Array2<F> {
        &self.inv_k_y
    }

    /// Retrieve input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.training_data.0.ncols(), 1)
    }

    /// Compute kernel matrix k(x, X) (n, n_train) between `x` and training points
    fn cross_covariance(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        check_ncols(x, self.training_data.0.ncols(), "Query points")?;
        self.params.kernel.matrix(x, &self.training_data.0)
    }

    /// Compute posterior covariance of the latent function at `x` given `k = k(x, X)`
    fn latent_covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        k: &Array2<F>,
        full_cov: bool,
    ) -> Result<Covariance<F>> {
        let kernel = &self.params.kernel;
        let k_inv = k.dot(&self.inv_k_y);
        if full_cov {
            let mut cov = kernel.matrix(x, x)? - k_inv.dot(&k.t());
            let n_clamped = regularize_covariance(&mut cov);
            if n_clamped > 0 {
                debug!("{n_clamped} negative variance(s) set to zero");
            }
            Ok(Covariance::Full(cov))
        } else {
            let mut var = kernel.diag(x, x)? - (&k_inv * k).sum_axis(Axis(1));
            let n_clamped = clamp_variances(&mut var);
            if n_clamped > 0 {
                debug!("{n_clamped} negative variance(s) set to zero");
            }
            Ok(Covariance::Diag(var))
        }
    }

    /// Sample `n_traj` trajectories of the gaussian distribution `N(mean, cov)` using either
    /// cholesky or eigenvalues decomposition to compute the decomposition of the covariance matrix.
    /// The later one is recommended as cholesky decomposition suffer from occurence of ill-conditioned
    /// matrices when the number of x locations increase.
    fn sample(
        &self,
        mean: Array1<F>,
        cov: Array2<F>,
        n_traj: usize,
        method: GpSamplingMethod,
    ) -> Result<Array2<F>> {
        if n_traj == 0 {
            return Err(GpError::InvalidValueError(
                "Number of trajectories should be at least 1".to_string(),
            ));
        }
        let mut rng = match self.rng.write() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        sample(mean, cov, n_traj, method, &mut *rng)
    }
}

impl<F, D, K> PredictInplace<ArrayBase<D, Ix2>, Array1<F>> for GaussianProcess<F, K>
where
    F: Float,
    D: Data<Elem = F>,
    K: Kernel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        let values = self.predict_mean(x).expect("GP Prediction");
        *y = values;
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros((x.nrows(),))
    }
}

/// Gausssian Process adaptator to implement `linfa::Predict` trait for variance prediction
/// of new noisy observations.
pub struct GpVariancePredictor<'a, F, K>(pub &'a GaussianProcess<F, K>)
where
    F: Float,
    K: Kernel<F>;

impl<F, D, K> PredictInplace<ArrayBase<D, Ix2>, Array1<F>> for GpVariancePredictor<'_, F, K>
where
    F: Float,
    D: Data<Elem = F>,
    K: Kernel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );

        let values = self.0.predict_var(x, false).expect("GP Prediction");
        *y = values.into_diag();
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}

impl<F: Float, K: Kernel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for GpValidParams<F, K>
{
    type Object = GaussianProcess<F, K>;

    /// Fit GP: compute and cache inverses of the kernel matrix and of the noisy kernel matrix
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();

        let n_obs = x.nrows();
        if n_obs == 0 {
            return Err(GpError::InvalidValueError(
                "Training dataset should not be empty".to_string(),
            ));
        }
        if y.len() != n_obs {
            return Err(GpError::DimensionError(format!(
                "Number of training outputs ({}) should match number of training inputs ({})",
                y.len(),
                n_obs
            )));
        }
        check_ncols(x, self.kernel().input_dim(), "Training points")?;

        if min_squared_distance(x) == Some(F::zero()) {
            warn!("Multiple training input points have the same value (at least same row twice).");
            return Err(GpError::IllConditionedCovarianceError(
                "kernel matrix K is singular: duplicated training input points".to_string(),
            ));
        }

        let now = Instant::now();
        let k = self.kernel().matrix(x, x)?;
        let inv_k = cholesky_inverse(&k, "kernel matrix K")?;

        // noise is added on the diagonal of the (n_obs, n_obs) training kernel matrix
        let k_y = &k + &(Array2::<F>::eye(n_obs) * self.noise_variance());
        let inv_k_y = cholesky_inverse(&k_y, "noisy kernel matrix K + noise_variance * I")?;
        debug!("elapsed fit = {:?}", now.elapsed().as_millis());

        let weights = inv_k.dot(y);
        let weights_y = inv_k_y.dot(y);
        Ok(GaussianProcess {
            inv_k,
            inv_k_y,
            weights,
            weights_y,
            training_data: (x.to_owned(), y.to_owned()),
            params: self.clone(),
            rng: RwLock::new(Xoshiro256Plus::seed_from_u64(self.seed())),
        })
    }
}

/// Sample `n_traj` trajectories of `N(mean, cov)` where `mean` is (n,) and `cov` (n, n).
/// Returns a (n, n_traj) matrix.
pub(crate) fn sample<F: Float, R: Rng>(
    mean: Array1<F>,
    cov: Array2<F>,
    n_traj: usize,
    method: GpSamplingMethod,
    rng: &mut R,
) -> Result<Array2<F>> {
    let n_eval = mean.len();
    let c = match method {
        GpSamplingMethod::Cholesky => lower_cholesky(&cov, "sampling covariance matrix")?,
        GpSamplingMethod::EigenValues => {
            let (v, w) = cov.eigh_into()?;
            let v = v.mapv(|x| {
                // We lower bound the float value at 1e-9
                if x < F::cast(1e-9) {
                    return F::zero();
                }
                x.sqrt()
            });
            let d = Array2::from_diag(&v);
            w.dot(&d)
        }
    };
    let ary: Array2<f64> = Array::random_using((n_eval, n_traj), StandardNormal, rng);
    let ary = ary.mapv(|v| F::cast(v));
    Ok(mean.insert_axis(Axis(1)) + c.dot(&ary))
}
