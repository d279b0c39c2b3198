//! The `InternalError` type, and the `internal!` macro that builds it.

use std::fmt::{self, Debug, Display};
use std::panic;

/// Internal error (a bug).
#[derive(Debug, Clone)]
pub struct InternalError(Box<InternalErrorRepr>);

/// Internal error (a bug)
#[derive(Debug, Clone)]
struct InternalErrorRepr {
    /// Message, usually built by [`internal!`](crate::internal) like `format!`.
    message: String,
    /// File and line number of the call site.
    location: &'static panic::Location<'static>,
}

impl InternalError {
    /// Create an internal error capturing this call site.
    ///
    /// Prefer [`internal!`](crate::internal), which makes it easy to add
    /// additional context via format parameters.
    #[track_caller]
    pub fn new<S: Into<String>>(message: S) -> Self {
        InternalError(
            InternalErrorRepr {
                message: message.into(),
                location: panic::Location::caller(),
            }
            .into(),
        )
    }
}

impl std::error::Error for InternalError {}

impl Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "internal error (bug): {:?}: {}",
            &self.0.location, &self.0.message
        )
    }
}
