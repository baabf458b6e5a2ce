use crate::errors::{GpError, Result};
use crate::kernels::Kernel;
use linfa::{Float, ParamGuard};

/// Default variance of the observation noise
pub const GP_DEFAULT_NOISE_VARIANCE: f64 = 1e-2;
/// Default seed of the random generator used for sampling
pub const GP_DEFAULT_SEED: u64 = 0;

/// A set of validated GP parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct GpValidParams<F: Float, K: Kernel<F>> {
    /// Covariance kernel used as prior
    pub(crate) kernel: K,
    /// Variance of the observation noise
    pub(crate) noise_variance: F,
    /// Seed of the random generator used for sampling
    pub(crate) seed: u64,
}

impl<F: Float, K: Kernel<F>> GpValidParams<F, K> {
    /// Get covariance kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get the variance of the observation noise
    pub fn noise_variance(&self) -> F {
        self.noise_variance
    }

    /// Get the seed of the random generator
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](crate::GaussianProcess).
pub struct GpParams<F: Float, K: Kernel<F>>(GpValidParams<F, K>);

impl<F: Float, K: Kernel<F>> GpParams<F, K> {
    /// A constructor for GP parameters given a covariance kernel,
    /// noise variance and seed take their default values
    /// ([GP_DEFAULT_NOISE_VARIANCE] and [GP_DEFAULT_SEED]).
    pub fn new(kernel: K) -> GpParams<F, K> {
        Self(GpValidParams {
            kernel,
            noise_variance: F::cast(GP_DEFAULT_NOISE_VARIANCE),
            seed: GP_DEFAULT_SEED,
        })
    }

    /// A constructor for GP parameters from validated parameters
    pub fn new_from_valid(params: &GpValidParams<F, K>) -> Self {
        Self(params.clone())
    }

    /// Set covariance kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set the variance of the observation noise.
    ///
    /// Should be non negative, zero means noise-free observations
    /// which requires a well conditioned kernel matrix.
    pub fn noise_variance(mut self, noise_variance: F) -> Self {
        self.0.noise_variance = noise_variance;
        self
    }

    /// Set the seed of the random generator used to sample the GP
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, K: Kernel<F>> From<GpValidParams<F, K>> for GpParams<F, K> {
    fn from(valid: GpValidParams<F, K>) -> Self {
        GpParams(valid)
    }
}

impl<F: Float, K: Kernel<F>> ParamGuard for GpParams<F, K> {
    type Checked = GpValidParams<F, K>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let noise = self.0.noise_variance;
        if !noise.is_finite() || noise < F::zero() {
            return Err(GpError::InvalidValueError(format!(
                "`noise_variance` should be a non negative value, got {noise}"
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
