use thiserror::Error;

/// Coarse classification of an [`Error`], carried by a failed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCoordinate,
    InfeasibleCapacity,
    DistanceMatrixUnavailable,
    Validation,
    ProviderTimeout,
    Config,
    Json,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid coordinate at index {index}: ({latitude}, {longitude})")]
    InvalidCoordinate {
        index: usize,
        latitude: f64,
        longitude: f64,
    },

    #[error(
        "infeasible capacity: {drivers} groups of at least {min_size} points need more than the {points} points available"
    )]
    InfeasibleCapacity {
        min_size: usize,
        drivers: usize,
        points: usize,
    },

    #[error("distance matrix unavailable: {0}")]
    DistanceMatrixUnavailable(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider timed out after {0:?}")]
    ProviderTimeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Error::Validation(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Error::DistanceMatrixUnavailable(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidCoordinate { .. } => ErrorKind::InvalidCoordinate,
            Error::InfeasibleCapacity { .. } => ErrorKind::InfeasibleCapacity,
            Error::DistanceMatrixUnavailable(_) => ErrorKind::DistanceMatrixUnavailable,
            Error::Validation(_) => ErrorKind::Validation,
            Error::ProviderTimeout(_) => ErrorKind::ProviderTimeout,
            Error::Config(_) => ErrorKind::Config,
            Error::Json(_) => ErrorKind::Json,
        }
    }
}

#[cfg(feature = "pyo3")]
impl From<Error> for pyo3::PyErr {
    fn from(err: Error) -> Self {
        use pyo3::exceptions::{PyRuntimeError, PyTimeoutError, PyValueError};
        match err.kind() {
            ErrorKind::InvalidCoordinate
            | ErrorKind::InfeasibleCapacity
            | ErrorKind::Validation
            | ErrorKind::Json => PyValueError::new_err(err.to_string()),
            ErrorKind::ProviderTimeout => PyTimeoutError::new_err(err.to_string()),
            ErrorKind::DistanceMatrixUnavailable | ErrorKind::Config => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}
