use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::result;

/// A type alias for `Result<T, dsv::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// A fatal error that stops a parse.
///
/// Only two things are fatal: a contradictory configuration and a failure of
/// the underlying chunk source. Malformed input is never fatal; it is
/// reported through [`ParseError`](crate::ParseError) records carried in the
/// results while parsing continues.
#[derive(Debug)]
pub struct Error(Box<ErrorKind>);

impl Error {
    /// A crate private constructor for `Error`.
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Error(Box::new(kind))
    }

    /// A transport failure, for use by [`RangeFetcher`](crate::RangeFetcher)
    /// implementations.
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Transport { url: url.into(), message: message.into() })
    }

    pub(crate) fn config(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::Config(message.into()))
    }

    /// Return the specific type of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwrap this error into its underlying type.
    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns true if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(*self.0, ErrorKind::Config(_))
    }
}

/// The specific type of a fatal error.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The configuration contradicts itself, for example a comment string
    /// equal to the delimiter.
    Config(String),
    /// An I/O error from a chunk source.
    Io(io::Error),
    /// A transport failure while fetching remote bytes.
    Transport {
        /// The URL being fetched.
        url: String,
        /// What went wrong.
        message: String,
    },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::new(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self.0 {
            ErrorKind::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self.0 {
            ErrorKind::Config(ref msg) => {
                write!(f, "parse configuration error: {}", msg)
            }
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Transport { ref url, ref message } => {
                write!(f, "transport error fetching {}: {}", url, message)
            }
        }
    }
}
