//! Errors for the crate.
//!
//! Misconfiguration is reported by [ConfigError] when a cache or collection is built.  Reads of lazy collections
//! report [LazyError], which is generic over the error type of the computations stored in them.
use crate::bounded_cache::CacheConfigBuilderError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),
    #[error("load factor must be a positive finite number, got {0}")]
    InvalidLoadFactor(f32),
    #[error("invalid cache configuration: {0}")]
    Builder(String),
}

impl From<CacheConfigBuilderError> for ConfigError {
    fn from(e: CacheConfigBuilderError) -> ConfigError {
        ConfigError::Builder(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LazyError<ComputationError> {
    #[error("index {index} is out of bounds for a collection of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("no entry exists for the requested key")]
    MissingKey,
    #[error("computation failed: {0}")]
    Computation(ComputationError),
}

impl<ComputationError> LazyError<ComputationError> {
    /// The computation's own error, if that's what this is.
    pub fn into_computation_error(self) -> Option<ComputationError> {
        match self {
            LazyError::Computation(e) => Some(e),
            _ => None,
        }
    }
}
