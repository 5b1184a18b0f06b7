use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Credential file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

const SERVICE_NAME: &str = "productive-you";
const KEYRING_ACCOUNT: &str = "credential-pair";

/// Access, refresh and CSRF tokens for the current user.
/// Any of them may be missing; an all-empty pair means "logged out".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

impl CredentialPair {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.csrf_token.is_none()
    }

    pub fn with_access_token(mut self, token: String) -> Self {
        self.access_token = Some(token);
        self
    }
}

/// Durable storage for the credential pair.
///
/// `get` never fails: unreadable storage is logged and reported as empty.
/// `set` replaces the stored pair wholesale (last write wins) and `clear`
/// is idempotent.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> CredentialPair;
    fn set(&self, pair: &CredentialPair) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Process-lifetime store backing the `memory` backend.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    pair: Mutex<CredentialPair>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: Mutex::new(pair),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> CredentialPair {
        match self.pair.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, pair: &CredentialPair) -> Result<()> {
        let mut guard = self.pair.lock().unwrap_or_else(|p| p.into_inner());
        *guard = pair.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.set(&CredentialPair::default())
    }
}

/// JSON file in the data directory. Survives restarts.
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    fn read(&self) -> Result<CredentialPair> {
        let path = self.path();
        if !path.exists() {
            return Ok(CredentialPair::default());
        }
        let contents =
            std::fs::read_to_string(&path).context("Failed to read credentials file")?;
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> CredentialPair {
        self.read().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable credentials file");
            CredentialPair::default()
        })
    }

    fn set(&self, pair: &CredentialPair) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create data directory")?;
        let contents = serde_json::to_string_pretty(pair)?;
        let path = self.path();
        let mut file = open_private(&path).context("Failed to open credentials file")?;
        file.write_all(contents.as_bytes())
            .context("Failed to write credentials file")?;
        // A file left over from an older run may still have wider permissions
        restrict_permissions(&path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove credentials file")?;
        }
        Ok(())
    }
}

/// Open for writing, creating the file owner-only so tokens are never
/// readable by other users, even briefly.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(error = %e, "Failed to tighten permissions on credentials file");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// OS keychain entry holding the serialized pair.
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    fn entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, KEYRING_ACCOUNT).context("Failed to create keyring entry")
    }

    fn decode(stored: keyring::Result<String>) -> CredentialPair {
        match stored {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed keychain credentials");
                CredentialPair::default()
            }),
            // Normal logged-out case
            Err(keyring::Error::NoEntry) => CredentialPair::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read credentials from keychain");
                CredentialPair::default()
            }
        }
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> CredentialPair {
        match Self::entry() {
            Ok(entry) => Self::decode(entry.get_password()),
            Err(e) => {
                warn!(error = %e, "Keychain unavailable; treating as logged out");
                CredentialPair::default()
            }
        }
    }

    fn set(&self, pair: &CredentialPair) -> Result<()> {
        let json = serde_json::to_string(pair)?;
        Self::entry()?
            .set_password(&json)
            .context("Failed to store credentials in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credentials from keychain"),
        }
    }
}
