use thiserror::Error;

/// A result type for GP regression algorithm
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`GaussianProcess`](crate::GaussianProcess) or a [`Kernel`](crate::kernels::Kernel)
#[derive(Error, Debug)]
pub enum GpError {
    /// When a hyperparameter or an option has a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When shapes of given arrays are not consistent
    #[error("Dimension error: {0}")]
    DimensionError(String),
    /// When Cholesky factorization of a covariance matrix fails
    #[error("Ill-conditioned covariance: {0}")]
    IllConditionedCovarianceError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When reshaping an array fails
    #[error(transparent)]
    ShapeError(#[from] ndarray::ShapeError),
}
