//! Unified error type.

use std::fmt;

/// The error type returned by the server's fallible operations.
///
/// Handler failures are expressed as HTTP [`Response`](crate::Response)
/// values and the logging-context middleware never fails, so this type only
/// surfaces infrastructure failures: binding or adopting a listener.
#[derive(Debug)]
pub struct Error(std::io::Error);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io: {}", self.0)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self(e)
    }
}
