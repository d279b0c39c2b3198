#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(clippy::unwrap_used)]

//! A shared `ErrorKind` taxonomy for the onionpool supervisor.
//!
//! Every fallible operation in the supervisor ultimately boils down to one of
//! a small number of *kinds* of failure: a precondition wasn't met before any
//! host mutation happened, a partially-applied startup step failed, something
//! broke once the pool was already running, or a teardown step itself failed.
//! [`ErrorKind`] names these kinds so that the coordinator (and, eventually,
//! the process exit code) can dispatch on them without string-matching error
//! messages.

mod internal;
mod report;

pub use internal::InternalError;
pub use report::{report_and_exit, Report};

use derive_more::Display;

/// Classification of an error arising from the supervisor's operations.
///
/// Get the kind via [`HasKind::kind`] and compare it to the expected
/// value(s). When forwarding or reporting errors, use the whole error, not
/// just the kind — the error itself carries the detail a human needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[non_exhaustive]
pub enum ErrorKind {
    // --- Precondition: no host mutation has happened yet ---
    /// One of the external binaries the supervisor depends on (the
    /// onion-router, the load balancer, the HTTP filter, or the packet-filter
    /// administration tool) is missing or not executable.
    #[display("required external binary is missing or not executable")]
    MissingBinary,

    /// A template file named in the configuration does not exist on disk.
    #[display("template file not found")]
    TemplateNotFound,

    /// An explicitly-requested port was already in use.
    ///
    /// Unlike automatically-probed ports, an explicit port is never silently
    /// rebound; a conflict here is always fatal.
    #[display("explicitly requested port was already in use")]
    ExplicitPortTaken,

    /// No free port could be found within the bounded scan window.
    #[display("could not find a free port within the scan bound")]
    PortUnavailable,

    /// The supplied configuration was invalid or internally inconsistent.
    #[display("invalid configuration")]
    InvalidConfig,

    // --- Startup: partial state exists, full rollback is expected ---
    /// Deriving the control-port password hash failed.
    #[display("could not derive control-port credentials")]
    CredentialDerivationFailed,

    /// Expanding a config template left an unrecognized placeholder, or
    /// writing the rendered file failed.
    #[display("template rendering failed")]
    TemplateRenderError,

    /// An instance's data directory exists but its ownership could not be
    /// verified as safe to reuse.
    #[display("instance data directory has unexpected ownership")]
    DataDirOwnership,

    /// Spawning a child process failed outright (e.g. `execve` failed).
    #[display("failed to spawn child process")]
    SpawnFailed,

    /// An instance did not become ready within its bootstrap deadline.
    #[display("instance did not finish bootstrapping in time")]
    BootstrapTimeout,

    /// The load balancer or HTTP filter did not become reachable on its
    /// listen port within the probe window.
    #[display("front-end process did not become reachable")]
    FrontEndProbeFailed,

    /// Installing transparent-redirection rules on the host failed.
    #[display("failed to install transparent-redirection rules")]
    RedirectInstallFailed,

    // --- Runtime: failures observed after the pool reached Running ---
    /// An instance failed two consecutive health probes and its in-place
    /// restart did not recover it.
    #[display("instance lost health and could not be recovered")]
    HealthLost,

    /// A child process exited unexpectedly.
    #[display("child process exited unexpectedly")]
    Crashed,

    // --- Teardown ---
    /// A rollback or shutdown step failed to fully restore prior host state.
    #[display("failed to restore host state during teardown")]
    RestoreFailed,

    /// A supposedly impossible condition was reached; this is a bug in the
    /// supervisor itself.
    #[display("internal error (bug)")]
    Internal,

    /// Unclassified error, provided for forward compatibility.
    #[display("unclassified error")]
    Other,
}

/// Errors that can be categorized as belonging to an [`ErrorKind`].
pub trait HasKind {
    /// Return the kind of this error.
    fn kind(&self) -> ErrorKind;
}

impl HasKind for std::convert::Infallible {
    fn kind(&self) -> ErrorKind {
        unreachable!()
    }
}

impl HasKind for InternalError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Create an internal error, including a message like `format!`, and
/// capturing the call site.
///
/// Use this for conditions that the type system or calling convention should
/// already have excluded — e.g. a `RunState` transition being attempted from
/// a state that ought to be unreachable.
#[macro_export]
macro_rules! internal {
    { $( $arg:tt )* } => {
        $crate::InternalError::new(format!($($arg)*))
    }
}
