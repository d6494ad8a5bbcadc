/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The cache stack was constructed with an invalid configuration.
    #[error("Invalid cache configuration: {0}")]
    Configuration(String),
    /// A cache layer operation failed.
    #[error("[{layer}] cache error for key '{key}': {message}")]
    Operation {
        layer: String,
        key: String,
        message: String,
    },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// One or more layers failed during a fan-out operation.
    ///
    /// The remaining layers were still processed.
    #[error("{} cache layer(s) failed: {}", .0.len(), join_errors(.0))]
    Layers(Vec<CacheError>),
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        layer: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            layer: layer.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Collapse the results of a fan-out into a single outcome.
    pub(crate) fn collect(results: Vec<Result<(), CacheError>>) -> Result<(), CacheError> {
        let failures: Vec<CacheError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::Layers(failures))
        }
    }
}

fn join_errors(errors: &[CacheError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
