//! Error types shared across the operator

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Drain endpoint error: {0}")]
    DrainEndpointError(String),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl Error {
    /// Whether the error is transient and worth a fast requeue.
    ///
    /// Validation failures stay false: the resource will not become valid
    /// until the user edits it.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::ConfigError(_)
            | Error::HttpError(_)
            | Error::DrainEndpointError(_) => true,
            Error::SerializationError(_)
            | Error::ValidationError(_)
            | Error::MissingObjectKey(_)
            | Error::FinalizerError(_) => false,
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(e))
    }
}
