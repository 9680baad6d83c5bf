//! Huginn error types
//!
//! Transport outcomes (HTTP status errors, network failures, cancellation)
//! are not errors here: they travel inside [`Response`](crate::Response) as a
//! [`RequestError`](crate::RequestError). `HuginnError` is reserved for
//! configuration mistakes and failures raised by plugin handlers.

/// Huginn error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HuginnError {
    // Plugin graph errors (fatal at executor construction)
    #[error("plugin '{plugin}' depends on '{dependency}', which is not registered")]
    MissingDependency { plugin: String, dependency: String },

    #[error("circular plugin dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("plugin '{0}' is registered more than once")]
    DuplicatePlugin(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Raised by a plugin handler. Propagates to the caller of
    /// `execute()`/`trigger()`; sibling plugins are not isolated from it.
    #[error("plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    // Data errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The spawned request pipeline panicked or was cancelled by the runtime.
    #[error("request task failed: {0}")]
    Task(String),
}

impl HuginnError {
    /// Convenience constructor for plugin handler failures.
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        HuginnError::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a construction-time configuration failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HuginnError::MissingDependency { .. }
                | HuginnError::CircularDependency(_)
                | HuginnError::DuplicatePlugin(_)
                | HuginnError::Configuration(_)
        )
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
