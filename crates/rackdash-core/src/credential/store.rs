// ── Credential persistence ──
//
// The credential record survives restarts so a reboot does not force a
// fresh verification round-trip. The file backend writes atomically
// (temp file + rename) and restricts permissions to the owner.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A usable upstream token and when it was issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(with = "secret_str")]
    pub token: SecretString,
    pub acquired_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: SecretString, acquired_at: DateTime<Utc>) -> Self {
        Self { token, acquired_at }
    }
}

/// What is written to `credential.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    /// Last identity used to authenticate; reused by silent reauthorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable holder for the credential record.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<CredentialRecord>, StoreError>;
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError>;
}

// ── File backend ─────────────────────────────────────────────────

/// JSON file on disk, mode 0600 on Unix.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(&json).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }
}

// ── Memory backend ───────────────────────────────────────────────

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }
}

mod secret_str {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(secret: &SecretString, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(secret.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SecretString, D::Error> {
        String::deserialize(de).map(SecretString::from)
    }
}

/// Short, log-safe rendering of a token.
pub(crate) fn token_preview(token: &SecretString) -> String {
    let exposed = token.expose_secret();
    let prefix: String = exposed.chars().take(6).collect();
    format!("{prefix}…")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record() -> CredentialRecord {
        CredentialRecord {
            credential: Some(Credential::new(
                SecretString::from("tok-abcdef123".to_owned()),
                "2026-01-01T00:00:00Z".parse().unwrap(),
            )),
            identity: Some("admin@example.com".into()),
        }
    }

    #[test]
    fn file_store_round_trips_and_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state").join("credential.json"));

        assert!(store.load().unwrap().is_none());

        store.save(&record()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        let cred = loaded.credential.unwrap();
        assert_eq!(cred.token.expose_secret(), "tok-abcdef123");
        assert_eq!(loaded.identity.as_deref(), Some("admin@example.com"));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        FileStore::new(&path).save(&record()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileStore::new(&path).load(),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn preview_never_shows_whole_token() {
        let token = SecretString::from("abcdefghijkl".to_owned());
        assert_eq!(token_preview(&token), "abcdef…");
    }
}
