/// Errors produced by the `bastion-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A route descriptor failed validation.
    #[error("invalid route '{prefix}': {reason}")]
    InvalidRoute { prefix: String, reason: String },

    /// Two route descriptors share the same prefix.
    #[error("duplicate route prefix '{prefix}'")]
    DuplicateRoute { prefix: String },

    /// A route names a backend with no configured instances.
    #[error("route '{prefix}' names unknown backend '{backend}'")]
    UnknownBackend { prefix: String, backend: String },

    /// A metric could not be registered with the registry.
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}
