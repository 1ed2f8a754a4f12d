//! Error handling tools

use std::{convert::Infallible, fmt, io::Error as IoError, error::Error as StdError};

pub(crate) type BoxError = Box<
    dyn StdError
    + Send
    + Sync
>;

/// The outcome of a submitted request, delivered to the completion callback.
///
/// Exactly one of these is produced per submitted request. Note that for HTTP
/// requests a non-2xx status is still [`ResponseCode::Success`] at this level;
/// the HTTP status code travels inside the response itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// The engine could not hand the transfer over to the transport driver.
    SendFailure,

    /// The transfer reached a terminal error (refused upgrade, transport
    /// error, malformed response).
    Failure,

    /// The engine shut down before the transfer completed.
    Aborted,

    /// Reserved. Timeouts currently surface as [`ResponseCode::Failure`].
    TimedOut,

    /// The transfer completed and the response is available.
    Success,
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseCode::SendFailure => "send failure",
            ResponseCode::Failure => "failure",
            ResponseCode::Aborted => "aborted",
            ResponseCode::TimedOut => "timed out",
            ResponseCode::Success => "success",
        };
        f.write_str(s)
    }
}

/// Generic transfer error
///
/// This never crosses the completion-callback boundary; it is translated to a
/// [`ResponseCode`] there.
#[derive(Debug)]
pub struct Error {
    /// Inner error object
    pub(crate) inner: BoxError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl Error {
    /// Creates a new [`Error`] from any underlying error
    #[inline]
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self { inner: err.into() }
    }

    /// Creates an [`Error`] from a plain message
    #[inline]
    pub fn message(msg: &'static str) -> Self {
        Self { inner: msg.into() }
    }

    /// Unwraps the inner error
    pub fn into_inner(self) -> BoxError {
        self.inner
    }
}

impl From<Infallible> for Error {
    fn from(infallible: Infallible) -> Error {
        match infallible {}
    }
}

impl From<IoError> for Error {
    #[inline]
    fn from(err: IoError) -> Self {
        Self { inner: err.into() }
    }
}

impl From<hyper::Error> for Error {
    #[inline]
    fn from(err: hyper::Error) -> Self {
        Self { inner: err.into() }
    }
}

impl From<hyper::http::Error> for Error {
    #[inline]
    fn from(err: hyper::http::Error) -> Self {
        Self { inner: err.into() }
    }
}

impl From<hyper_util::client::legacy::Error> for Error {
    #[inline]
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        Self { inner: err.into() }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    #[inline]
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self { inner: err.into() }
    }
}
