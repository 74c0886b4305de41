use thiserror::Error;

/// Errors surfaced while resolving an Iceberg table into scannable files.
///
/// The taxonomy matters for callers: configuration and data-integrity errors
/// are fatal for the whole scan, while missing statistics are never an error
/// (the affected file or manifest is simply retained).
#[derive(Debug, Error)]
pub enum Error {
    /// Required configuration is missing or invalid (e.g. a secret that the
    /// encrypted-range feature depends on).
    #[error("Invalid configuration: {message}")]
    Configuration {
        /// What was missing or wrong
        message: String,
    },

    /// The table metadata or a manifest violates a structural expectation.
    #[error("Invalid metadata in '{path}': {message}")]
    DataIntegrity {
        /// File or manifest the violation was found in
        path: String,
        /// The violated expectation
        message: String,
    },

    /// A feature or format the scan needs is not implemented.
    #[error("Not implemented: {message}")]
    NotImplemented {
        /// Format or feature name
        message: String,
    },

    /// The table-metadata JSON document could not be parsed.
    #[error("Failed to parse table metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A collaborator failed while decoding columnar batches.
    #[error("Batch decode error: {0}")]
    Decode(#[from] arrow_schema::ArrowError),

    /// The payload-file reader failed while materializing delete rows.
    #[error("Payload read error: {0}")]
    Payload(#[from] parquet::errors::ParquetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn integrity(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::DataIntegrity {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_implemented(message: impl Into<String>) -> Self {
        Error::NotImplemented {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
