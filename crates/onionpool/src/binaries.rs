//! Resolution and existence checking of the external binaries the
//! supervisor invokes.
//!
//! All binaries are resolved to absolute paths at startup and never looked
//! up via `$PATH`: if a path is relative, it is canonicalized against the
//! current working directory once, up front, so that later process spawns
//! are unaffected by a `chdir` anywhere else in the program.

use std::path::{Path, PathBuf};

use crate::cfg::BinariesConfig;
use crate::error::Error;

/// Absolute, existence- and executability-checked paths to every external
/// binary the supervisor may invoke.
#[derive(Debug, Clone)]
pub struct ResolvedBinaries {
    /// The onion-router client.
    pub onion_router: PathBuf,
    /// The TCP load balancer.
    pub load_balancer: PathBuf,
    /// The optional HTTP filter.
    pub filter: Option<PathBuf>,
    /// The packet-filter administration tool.
    pub packet_filter: PathBuf,
}

/// Resolve and validate every configured binary path.
///
/// Fails with [`Error::MissingBinary`] before any host mutation happens if
/// any required binary is absent or not executable.
pub fn resolve(cfg: &BinariesConfig) -> Result<ResolvedBinaries, Error> {
    Ok(ResolvedBinaries {
        onion_router: check(&cfg.onion_router, "onion-router")?,
        load_balancer: check(&cfg.load_balancer, "load-balancer")?,
        filter: cfg
            .filter
            .as_ref()
            .map(|p| check(p, "filter"))
            .transpose()?,
        packet_filter: check(&cfg.packet_filter, "packet-filter")?,
    })
}

/// Canonicalize `path` and verify it names an executable regular file.
fn check(path: &Path, name: &'static str) -> Result<PathBuf, Error> {
    let absolute = std::fs::canonicalize(path).map_err(|_| Error::MissingBinary {
        name,
        path: path.to_path_buf(),
    })?;

    if !is_executable(&absolute) {
        return Err(Error::MissingBinary {
            name,
            path: absolute,
        });
    }

    Ok(absolute)
}

/// Return whether `path` is a regular file with at least one executable bit
/// set for its owner, group, or world.
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// On non-Unix platforms we can't inspect the executable bit directly;
/// existence as a regular file is the best we can verify.
#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
