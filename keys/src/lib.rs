//! Shared key material for the launch client and server.
//!
//! Both sides authenticate with the same pinned Ed25519 keypair: the client
//! proves possession of the private key, the server only accepts that exact
//! public key and presents the matching host key. [`load_or_generate`] is the
//! single entry point for obtaining it.

use std::path::Path;

use russh::keys::PrivateKey;
use russh::keys::load_secret_key;
use russh::keys::ssh_key::Algorithm;
use russh::keys::ssh_key::LineEnding;
use russh::keys::ssh_key::rand_core::OsRng;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key at {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: russh::keys::Error,
    },
    #[error("failed to generate key: {0}")]
    Generate(#[source] russh::keys::ssh_key::Error),
    #[error("failed to encode key: {0}")]
    Encode(#[source] russh::keys::ssh_key::Error),
    #[error("failed to write key at {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Loads the keypair from `path`, generating and persisting a fresh Ed25519
/// key on first use. The stored file is OpenSSH-formatted and chmodded 0600.
pub fn load_or_generate(path: &Path) -> Result<PrivateKey, KeyError> {
    if path.exists() {
        return load_secret_key(path, None).map_err(|source| KeyError::Load {
            path: path.display().to_string(),
            source,
        });
    }

    info!(path = %path.display(), "generating new ed25519 key");
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(KeyError::Generate)?;
    let encoded = key.to_openssh(LineEnding::LF).map_err(KeyError::Encode)?;

    let store = |source| KeyError::Store {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(store)?;
    }
    std::fs::write(path, encoded.as_bytes()).map_err(store)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(store)?;
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn generates_then_reloads_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("key");

        let generated = load_or_generate(&path).unwrap();
        assert!(path.exists());

        let reloaded = load_or_generate(&path).unwrap();
        assert_eq!(
            generated.public_key().key_data(),
            reloaded.public_key().key_data()
        );
    }

    #[cfg(unix)]
    #[test]
    fn stored_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        load_or_generate(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, "not a private key").unwrap();

        assert!(matches!(
            load_or_generate(&path),
            Err(KeyError::Load { .. })
        ));
    }
}
