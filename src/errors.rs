use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

pub type Result<T> = std::result::Result<T, ForestError>;

/// Errors surfaced by training, prediction, merging and (de)serialization.
#[derive(Debug)]
pub enum ForestError {
    /// Malformed input: bad lengths, incompatible options, empty samples.
    InvalidArgument(String),
    /// A key or column offset beyond the bounds of the data.
    OutOfRange(String),
    /// A numeric precondition was violated (weights, thread counts, maps).
    DomainError(String),
    /// Unknown family tag, version mismatch or a truncated stream.
    Serialization(String),
    IO(io::Error),
    /// The user-interrupt predicate returned true during training.
    Cancelled,
}

impl From<io::Error> for ForestError {
    fn from(err: io::Error) -> ForestError {
        ForestError::IO(err)
    }
}

impl From<bincode::Error> for ForestError {
    fn from(err: bincode::Error) -> ForestError {
        ForestError::Serialization(err.to_string())
    }
}

impl Display for ForestError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match *self {
            ForestError::InvalidArgument(ref msg) => write!(f, "Invalid argument: {}", msg),
            ForestError::OutOfRange(ref msg) => write!(f, "Out of range: {}", msg),
            ForestError::DomainError(ref msg) => write!(f, "Domain error: {}", msg),
            ForestError::Serialization(ref msg) => write!(f, "Serialization error: {}", msg),
            ForestError::IO(ref e) => write!(f, "IO error: {}", e),
            ForestError::Cancelled => write!(f, "Interrupted by user"),
        }
    }
}

impl Error for ForestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            ForestError::IO(ref e) => Some(e),
            _ => None,
        }
    }
}
