use thiserror::Error;

/// Convenient result alias for the VEDA features library.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A settings field failed validation after being loaded.
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },

    /// Settings could not be extracted from the environment.
    #[error(transparent)]
    Config(#[from] Box<figment::Error>),

    /// Secrets Manager rejected or failed a request.
    #[error("secrets manager request for {secret_id} failed: {message}")]
    SecretsManager { secret_id: String, message: String },

    /// A secret was retrieved but did not contain usable connection details.
    #[error("secret {secret_id} is malformed: {message}")]
    SecretFormat { secret_id: String, message: String },

    /// Raised when a collection id is not present in the catalog.
    #[error("unknown collection: {id}")]
    UnknownCollection { id: String },

    /// Raised when a feature id is not present in its collection.
    #[error("feature {item_id} not found in collection {collection_id}")]
    UnknownFeature {
        collection_id: String,
        item_id: String,
    },

    /// A query parameter could not be parsed or is out of range.
    #[error("invalid query parameter {parameter}: {reason}")]
    InvalidQuery { parameter: String, reason: String },

    /// Wrapper for database errors.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Wrapper for JSON errors.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Wrapper for IO errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::InvalidSetting`] for the given field.
    pub fn invalid_setting(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build an [`Error::InvalidQuery`] for the given parameter.
    pub fn invalid_query(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
