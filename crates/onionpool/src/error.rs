//! The onionpool supervisor's top-level error type.
//!
//! Every fallible operation in this crate eventually produces an [`Error`].
//! Each variant corresponds to one of the failure kinds enumerated in
//! [`onionpool_error::ErrorKind`]; [`HasKind`] lets the coordinator (and the
//! process exit code) dispatch on the kind without string-matching messages.

use std::path::PathBuf;

use onionpool_error::{ErrorKind, HasKind, InternalError};
use retry_error::RetryError;

/// An error produced by some part of the onionpool supervisor.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required external binary is missing or not executable.
    #[error("required binary {name} not found or not executable at {path}")]
    MissingBinary {
        /// The logical name of the binary (`onion-router`, `load-balancer`, …).
        name: &'static str,
        /// The path that was checked.
        path: PathBuf,
    },

    /// A named template file does not exist.
    #[error("template {0} not found")]
    TemplateNotFound(PathBuf),

    /// An explicitly-requested port was already bound.
    #[error("explicitly requested port {port} was already in use")]
    ExplicitPortTaken {
        /// The offending port.
        port: u16,
    },

    /// No free port was found within the bounded scan.
    #[error("could not find a free port starting from {base} within {scanned} candidates")]
    PortUnavailable {
        /// The port the scan started from.
        base: u16,
        /// How many candidates were probed.
        scanned: u16,
    },

    /// The configuration was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Deriving the control-port password hash failed.
    #[error("control-port credential derivation failed: {0}")]
    CredentialDerivationFailed(String),

    /// Template expansion left an unknown placeholder, or a rendered file
    /// could not be written.
    #[error("template render error: {0}")]
    TemplateRenderError(String),

    /// An instance's data directory exists with unexpected ownership.
    #[error("data directory {0} has unexpected ownership")]
    DataDirOwnership(PathBuf),

    /// Spawning a child process failed.
    #[error("failed to spawn {name}: {source}")]
    SpawnFailed {
        /// The logical name of the process that failed to spawn.
        name: &'static str,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An instance did not reach readiness before its bootstrap deadline.
    #[error("instance {instance} did not bootstrap within {timeout_secs}s")]
    BootstrapTimeout {
        /// Index of the instance that timed out.
        instance: u16,
        /// The configured deadline, in seconds.
        timeout_secs: u64,
    },

    /// The load balancer or HTTP filter never became reachable.
    #[error("{name} did not become reachable on port {port}")]
    FrontEndProbeFailed {
        /// `load-balancer` or `filter`.
        name: &'static str,
        /// The port that was probed.
        port: u16,
    },

    /// Installing transparent-redirection rules failed.
    #[error("failed to install redirection rules: {0}")]
    RedirectInstallFailed(String),

    /// A second `start` was attempted on the redirector while it was already
    /// active.
    #[error("redirection is already active")]
    RedirectAlreadyActive,

    /// An instance lost health and its in-place restart did not recover it.
    #[error("instance {0} lost health and could not be recovered")]
    HealthLost(u16),

    /// A child process exited unexpectedly.
    #[error("instance {instance} exited unexpectedly (code={exit_code:?}, signal={signal:?})")]
    Crashed {
        /// Index of the instance that crashed.
        instance: u16,
        /// The process exit code, if it exited normally.
        exit_code: Option<i32>,
        /// The signal that killed the process, if any.
        signal: Option<i32>,
    },

    /// One or more teardown steps failed to fully restore host state.
    #[error("failed to restore host state during teardown: {0}")]
    RestoreFailed(#[source] RetryError<Error>),

    /// A condition that should be statically excluded was reached.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl AsRef<dyn std::error::Error + 'static> for Error {
    fn as_ref(&self) -> &(dyn std::error::Error + 'static) {
        self
    }
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            MissingBinary { .. } => ErrorKind::MissingBinary,
            TemplateNotFound(_) => ErrorKind::TemplateNotFound,
            ExplicitPortTaken { .. } => ErrorKind::ExplicitPortTaken,
            PortUnavailable { .. } => ErrorKind::PortUnavailable,
            InvalidConfig(_) => ErrorKind::InvalidConfig,
            CredentialDerivationFailed(_) => ErrorKind::CredentialDerivationFailed,
            TemplateRenderError(_) => ErrorKind::TemplateRenderError,
            DataDirOwnership(_) => ErrorKind::DataDirOwnership,
            SpawnFailed { .. } => ErrorKind::SpawnFailed,
            BootstrapTimeout { .. } => ErrorKind::BootstrapTimeout,
            FrontEndProbeFailed { .. } => ErrorKind::FrontEndProbeFailed,
            RedirectInstallFailed(_) | RedirectAlreadyActive => ErrorKind::RedirectInstallFailed,
            HealthLost(_) => ErrorKind::HealthLost,
            Crashed { .. } => ErrorKind::Crashed,
            RestoreFailed(_) => ErrorKind::RestoreFailed,
            Internal(e) => e.kind(),
        }
    }
}

/// Whether an [`Error`] belongs to the "precondition" class: no host
/// mutation can have happened yet, so the coordinator may return directly
/// without running any rollback.
pub fn is_precondition(e: &Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::MissingBinary
            | ErrorKind::TemplateNotFound
            | ErrorKind::ExplicitPortTaken
            | ErrorKind::PortUnavailable
            | ErrorKind::InvalidConfig
    )
}

/// The process exit code to use for a given terminal outcome, per the
/// supervisor's external contract: `0` clean stop, `2` precondition
/// failure, `3` runtime failure with full rollback, `4` runtime failure
/// with a rollback that itself failed.
pub fn exit_code(result: &Result<(), Error>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) if is_precondition(e) => 2,
        Err(Error::RestoreFailed(_)) => 4,
        Err(_) => 3,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn precondition_errors_exit_with_2() {
        let e = Error::ExplicitPortTaken { port: 16379 };
        assert_eq!(exit_code(&Err(e)), 2);
    }

    #[test]
    fn restore_failed_exits_with_4() {
        let inner = RetryError::in_attempt_to("restore host state");
        let e = Error::RestoreFailed(inner);
        assert_eq!(exit_code(&Err(e)), 4);
    }

    #[test]
    fn plain_runtime_error_exits_with_3() {
        let e = Error::HealthLost(0);
        assert_eq!(exit_code(&Err(e)), 3);
    }

    #[test]
    fn ok_exits_with_0() {
        assert_eq!(exit_code(&Ok(())), 0);
    }
}
