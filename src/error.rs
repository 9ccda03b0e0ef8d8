use thiserror::Error;

/// Search engine errors.
///
/// `MalformedDocument` is normally absorbed at the point a record is read
/// (the record is skipped); it only escapes through APIs that decode a
/// single document. `Cancelled` is reserved for callers that want to
/// surface an abandoned search explicitly; the stream itself terminates
/// silently on cancellation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("malformed document: missing or mistyped field '{0}'")]
    MalformedDocument(&'static str),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("search cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}
