use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for workcell operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for workcell operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A unit of work declared an input or output the pipeline cannot accept
    #[error("invalid declaration of property '{property}' in {work}: {message}")]
    Validation {
        work: String,
        property: String,
        message: String,
    },

    /// A declared location could not be snapshotted or hashed
    #[error("failed to fingerprint '{path}': {message}")]
    Fingerprinting {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Binary serialization/deserialization errors
    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Box<bincode::ErrorKind>,
    },

    /// A build cache entry could not be used
    #[error("cache entry '{key}' is corrupt: {reason}")]
    CacheCorruption { key: String, reason: String },

    /// An immutable workspace no longer matches its recorded metadata
    #[error("workspace '{path}' is corrupted: {message}")]
    WorkspaceCorrupted { path: PathBuf, message: String },

    /// The unit of work itself failed
    #[error("execution of {work} failed: {message}")]
    Execution { work: String, message: String },

    /// Operation timeout errors
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// The build was cancelled before or during the run
    #[error("execution of {work} was cancelled")]
    Cancelled { work: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

// Conversion implementations
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Json {
            message: error.to_string(),
            source: error,
        }
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(error: Box<bincode::ErrorKind>) -> Self {
        Error::Serialization {
            message: error.to_string(),
            source: error,
        }
    }
}

// Helper methods for creating errors with context
impl Error {
    /// Create a validation error for a declared property
    #[must_use]
    pub fn validation(
        work: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Validation {
            work: work.into(),
            property: property.into(),
            message: message.into(),
        }
    }

    /// Create a fingerprinting error
    #[must_use]
    pub fn fingerprinting(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Fingerprinting {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a fingerprinting error caused by an I/O failure
    #[must_use]
    pub fn fingerprinting_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Fingerprinting {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create a cache corruption error
    #[must_use]
    pub fn cache_corruption(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CacheCorruption {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a workspace corruption error
    #[must_use]
    pub fn workspace_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::WorkspaceCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an execution failure
    #[must_use]
    pub fn execution(work: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Execution {
            work: work.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(work: impl Into<String>) -> Self {
        Error::Cancelled { work: work.into() }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error reports a cancelled build rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a lazy message
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_error = e.into();
            Error::Configuration {
                message: format!("{}: {}", message.into(), base_error),
            }
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let base_error = e.into();
            Error::Configuration {
                message: format!("{}: {}", f(), base_error),
            }
        })
    }
}
