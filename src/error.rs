use thiserror::Error;

/// Returned when a required field of a message is missing or malformed.
///
/// `kind` names the message variant ("Track", "Alias", ...), `field` the
/// offending field in its declared form ("UserId", "PreviousId", ...), and
/// `value` the rejected value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}.{field}: invalid field value {value:?}")]
pub struct FieldError {
    pub kind: &'static str,
    pub field: &'static str,
    pub value: String,
}

impl FieldError {
    pub(crate) fn new(kind: &'static str, field: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            field,
            value: value.into(),
        }
    }
}

/// Returned by the client constructors when a configuration value is out of
/// range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {field} = {value}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self {
            field,
            value: value.into(),
            reason,
        }
    }
}

/// Top-level error type of the crate.
///
/// Validation and configuration errors are returned synchronously from
/// `enqueue` and the constructors; transport errors are only ever observed
/// through the failure callback after retries are exhausted.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    InvalidField(#[from] FieldError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooBig { size: usize, limit: usize },

    #[error("the client is closed")]
    Closed,

    #[error("too many concurrent upload requests")]
    TooManyRequests,

    #[error("upload rejected with status {status}: {body}")]
    Upload { status: u16, body: String },

    #[error("sending request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("serializing message failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding batch failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store upload failed: {0}")]
    Store(String),
}

impl Error {
    /// True when the operation failed because the client was already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}
