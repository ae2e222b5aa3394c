use serde_json::json;
use thiserror::Error;
use xchat_store::StoreError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("upload rejected: {0}")]
    Upload(String),

    #[error("storage error: {0}")]
    Store(#[source] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound { .. } => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Forbidden(_) => "forbidden",
            Error::Upload(_) => "upload",
            Error::Store(_) => "store",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }

    /// `{"error": {"kind", "message"}}` body for callers.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string()
            }
        })
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Error::NotFound { kind, id },
            StoreError::Duplicate { kind, id } => {
                Error::Conflict(format!("{} '{}' already exists", kind, id))
            }
            StoreError::Conflict(msg) => Error::Conflict(msg),
            other => Error::Store(other),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<Error>() {
            Ok(err) => return err,
            Err(err) => err,
        };
        match err.downcast::<StoreError>() {
            Ok(err) => err.into(),
            Err(err) => Error::Internal(format!("{:#}", err)),
        }
    }
}
