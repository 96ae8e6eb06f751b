//! Local key discovery for authentication and `--public-key`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::{ClientError, ClientResult};

/// Identity file names tried under `~/.ssh`, most preferred first.
pub const DEFAULT_IDENTITIES: [&str; 4] = ["id_ed25519", "id_ecdsa", "id_rsa", "id_dsa"];

pub fn home_dir() -> ClientResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| ClientError::Other("unable to determine the home directory".to_string()))
}

pub fn ssh_dir(home: &Path) -> PathBuf {
    home.join(".ssh")
}

/// Default private keys under `home` that exist.
pub fn default_identities(home: &Path) -> Vec<PathBuf> {
    let dir = ssh_dir(home);
    DEFAULT_IDENTITIES
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect()
}

/// `<identity>.pub` next to a private key.
pub fn public_key_path(identity: &Path) -> PathBuf {
    let mut name = identity.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// Existing public key files for `identities`, or for the default
/// identities when none are given.
pub fn public_key_files(home: &Path, identities: &[PathBuf]) -> Vec<PathBuf> {
    let candidates: Vec<PathBuf> = if identities.is_empty() {
        let dir = ssh_dir(home);
        DEFAULT_IDENTITIES.iter().map(|name| dir.join(name)).collect()
    } else {
        identities.to_vec()
    };
    candidates
        .iter()
        .map(|identity| public_key_path(identity))
        .filter(|path| path.is_file())
        .collect()
}

/// First line of the first readable file, without surrounding whitespace.
pub async fn read_public_key(files: &[PathBuf]) -> ClientResult<String> {
    for file in files {
        match fs::read_to_string(file).await {
            Ok(contents) => {
                let key = contents.lines().next().unwrap_or_default().trim();
                if key.is_empty() {
                    return Err(ClientError::NoPublicKey);
                }
                return Ok(key.to_string());
            }
            Err(err) => debug!(file = %file.display(), ?err, "unreadable public key file"),
        }
    }
    Err(ClientError::NoPublicKey)
}
