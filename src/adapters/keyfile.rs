//! Key file adapter: the data key as 32 raw bytes in a local file.
//!
//! Creation is race-free: the key is written to a private temporary file and
//! then hard-linked onto the target path, which fails if the target already
//! exists. A reader therefore never sees a partially written key, and when two
//! processes race, both end up using the winner's key.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use zeroize::Zeroizing;

use crate::domain::{FieldKey, KEY_LEN};
use crate::ports::{KeyStore, KeyStoreError};

/// Key store backed by a single file.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<FieldKey, KeyStoreError> {
        let bytes = Zeroizing::new(fs::read(&self.path)?);
        Ok(FieldKey::from_bytes(&bytes)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.{:08x}.tmp", std::process::id(), rand::thread_rng().next_u32()));
        self.path.with_file_name(name)
    }

    /// Write `key` to the target path unless a key is already there.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    fn persist_new(&self, key: &FieldKey) -> io::Result<bool> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        let result = write_private(&temp, key.as_bytes()).and_then(|()| {
            match fs::hard_link(&temp, &self.path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e),
            }
        });

        if let Err(e) = fs::remove_file(&temp) {
            tracing::warn!(path = %temp.display(), error = %e, "Could not remove temporary key file");
        }
        result
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl KeyStore for FileKeyStore {
    fn load_or_create(&self) -> Result<FieldKey, KeyStoreError> {
        match self.load() {
            Ok(key) => {
                tracing::debug!(key_fingerprint = %key.fingerprint, "Loaded data key");
                return Ok(key);
            }
            Err(KeyStoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let key = FieldKey::generate();
        if self.persist_new(&key)? {
            tracing::info!(
                path = %self.path.display(),
                key_fingerprint = %key.fingerprint,
                "Generated new data key"
            );
            Ok(key)
        } else {
            tracing::info!("Key file created concurrently, loading it");
            self.load()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_then_reloads_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("medivault.key"));

        let first = store.load_or_create().expect("Should create");
        let second = store.load_or_create().expect("Should reload");
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(fs::read(store.path()).unwrap().len(), KEY_LEN);
    }

    #[test]
    fn test_existing_key_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medivault.key");
        fs::write(&path, [9u8; KEY_LEN]).unwrap();

        let key = FileKeyStore::new(&path).load_or_create().unwrap();
        assert_eq!(key.as_bytes(), &[9u8; KEY_LEN]);
        assert_eq!(fs::read(&path).unwrap(), vec![9u8; KEY_LEN]);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medivault.key");
        fs::write(&path, b"too short").unwrap();

        assert!(matches!(
            FileKeyStore::new(&path).load_or_create(),
            Err(KeyStoreError::Crypto(_))
        ));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        FileKeyStore::new(dir.path().join("k.key")).load_or_create().unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("medivault.key"));
        store.load_or_create().unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_concurrent_creation_agrees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medivault.key");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = FileKeyStore::new(path.clone());
                std::thread::spawn(move || store.load_or_create().unwrap().as_bytes().to_vec())
            })
            .collect();
        let keys: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }
}
