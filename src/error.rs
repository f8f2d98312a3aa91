use std::fmt::Display;

/// shaledb errors.
#[derive(Debug)]
pub enum Error {
    /// An IO error from a filesystem primitive (open, set_len, mmap, rename,
    /// remove, flush). A run file in an unknown state invalidates later
    /// reads, so callers are expected to stop using the store.
    Io(std::io::Error),
    /// Invalid construction parameters.
    Config(String),
    /// The background merge task failed or panicked.
    Merge(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Config(msg) => write!(f, "invalid config: {msg}"),
            Error::Merge(msg) => write!(f, "merge failed: {msg}"),
        }
    }
}

/// A shaledb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Merge(err.to_string())
    }
}
