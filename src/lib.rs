//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! with pluggable stationary covariance kernels.
//!
//! A GP model is fitted once from training points and observations given a kernel
//! and the variance of the observation noise, then it predicts:
//! * the posterior mean and (co)variance of the latent noise-free function,
//! * the mean and (co)variance of new noisy observations,
//! * posterior covariances between two sets of query points.
//!
//! It can also draw trajectories from the GP prior or from the latent posterior.
//!
//! GP regression is implemented by [GaussianProcess] parameterized by [GpParams].
//! Available kernels are listed in the [kernels] module.
//!
//! The complexity of fitting is O(N^3) in processing time and O(N^2) in memory
//! where N is the number of training points.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod errors;
pub mod kernels;

mod parameters;
mod utils;

pub use algorithm::*;
pub use errors::*;
pub use parameters::*;
pub use utils::pairwise_differences;
