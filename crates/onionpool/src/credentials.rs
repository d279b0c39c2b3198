//! Control-port credential generation and hashing.
//!
//! The plaintext password is generated once per supervisor run from a
//! cryptographically secure random source and is never persisted beyond the
//! process lifetime; it is held in a [`safelog::Sensitive`] wrapper so that
//! an accidental `{:?}` or `{}` in a log line prints `[scrubbed]` rather
//! than the secret itself. The hashed form is always produced by the
//! onion-router binary's own password-hash subcommand — this supervisor
//! never reimplements that hash.

use safelog::Sensitive;
use tokio_crate::process::Command;

use crate::error::Error;

/// An alphabet with no shell metacharacters and, crucially, no `'`, so the
/// plaintext can be interpolated into a single-quoted shell context
/// (as some onion-router config tooling expects) without escaping.
const ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Minimum plaintext password length.
const MIN_LEN: usize = 20;

/// The control-port credentials for one supervisor run.
#[derive(Clone)]
pub struct Credentials {
    /// The plaintext password, written only into the one rendered config
    /// file that needs it, with mode `0600`.
    pub plaintext: Sensitive<String>,
    /// The onion-router's hashed form of `plaintext`, suitable for
    /// `HashedControlPassword` in a torrc.
    pub hashed: Sensitive<String>,
}

/// Generate a fresh plaintext password from a cryptographically secure
/// random source.
fn generate_plaintext() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..MIN_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Derive `Credentials` by generating a plaintext password and exec-ing
/// `onion_router_path` with `hash_subcommand` to hash it.
///
/// Fails with [`Error::CredentialDerivationFailed`] if the binary cannot be
/// spawned, exits non-zero, or prints nothing usable to stdout.
pub async fn derive(
    onion_router_path: &std::path::Path,
    hash_subcommand: &[&str],
) -> Result<Credentials, Error> {
    let plaintext = generate_plaintext();
    debug_assert!(!plaintext.contains('\''));

    let output = Command::new(onion_router_path)
        .args(hash_subcommand)
        .arg(&plaintext)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::CredentialDerivationFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(Error::CredentialDerivationFailed(format!(
            "password-hash subcommand exited with {:?}",
            output.status.code()
        )));
    }

    let hashed = extract_hash(&output.stdout)
        .ok_or_else(|| Error::CredentialDerivationFailed("no hash line in output".into()))?;

    Ok(Credentials {
        plaintext: Sensitive::new(plaintext),
        hashed: Sensitive::new(hashed),
    })
}

/// Pull the first non-blank line out of the hashing subcommand's stdout.
///
/// Onion-router password-hash subcommands conventionally print one
/// `16:...` style hash line, sometimes preceded by warnings on the same
/// stream; callers should redirect warnings to stderr, but we defensively
/// take the first non-empty line either way.
fn extract_hash(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plaintext_has_no_quote_and_minimum_length() {
        for _ in 0..50 {
            let p = generate_plaintext();
            assert!(p.len() >= MIN_LEN);
            assert!(!p.contains('\''));
        }
    }

    #[test]
    fn extract_hash_takes_first_nonblank_line() {
        let out = b"\n16:ABCDEF0123\nignored second line\n";
        assert_eq!(extract_hash(out).as_deref(), Some("16:ABCDEF0123"));
    }

    #[test]
    fn extract_hash_none_on_blank_output() {
        assert_eq!(extract_hash(b"\n\n  \n"), None);
    }

    #[test]
    fn credentials_never_format_their_plaintext() {
        let creds = Credentials {
            plaintext: Sensitive::new("super-secret-password".to_string()),
            hashed: Sensitive::new("16:ABCDEF0123".to_string()),
        };

        assert_eq!(format!("{}", creds.plaintext), "[scrubbed]");
        assert_eq!(format!("{:?}", creds.plaintext), "[scrubbed]");
        assert_eq!(format!("{}", creds.hashed), "[scrubbed]");
    }
}
