use std::fmt::Display;

/// CaskDB errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The requested key does not exist in the database.
    KeyNotFound,
    /// An empty key was passed to Get, Put or Delete.
    InvalidKey,
    /// A record was only partially appended. The write offset has been
    /// advanced past the partial bytes; the key directory was not updated
    /// and the operation may be retried.
    PartialWrite,
    /// The stored value bytes do not match the checksum recorded for the key.
    CrcFailed,
    /// A data or hint file could not be parsed, typically a record cut short
    /// in the middle.
    Corruption(String),
    /// An IO error.
    Io(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::InvalidKey => write!(f, "key must not be empty"),
            Error::PartialWrite => write!(f, "record not fully written"),
            Error::CrcFailed => write!(f, "crc check failed, value is corrupted"),
            Error::Corruption(msg) => write!(f, "corrupt data file: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// A CaskDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}
