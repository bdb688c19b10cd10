use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::memory::StoreSnapshot;
use crate::modules::encryption::keys::DEFAULT_ITERATIONS;
use crate::modules::encryption::{
    decrypt_data, derive_key_from_passphrase, encrypt_data, generate_random_nonce,
    generate_random_salt,
};

const MAGIC: &[u8; 4] = b"LDS1";
const HEADER_LEN: usize = 4 + 4 + 16 + 12;

/// Highest key-derivation cost a snapshot header may ask for
pub const MAX_ITERATIONS: u32 = DEFAULT_ITERATIONS * 10;

/// Custom error type for snapshot files
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Encryption error: {0}")]
    Encryption(String),
    #[error("Snapshot {0} is in use by another process")]
    Locked(String),
}

/// Exclusive hold on a snapshot file, released on drop.
///
/// Lives in a sibling `.lock` file because saving replaces the snapshot itself.
pub struct SnapshotLock {
    file: File,
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("Failed to release snapshot lock: {}", e);
        }
    }
}

/// Encrypted on-disk copy of a store.
///
/// Load, change and save under one `lock()` so two processes never overwrite
/// each other's changes.
///
/// Layout: magic, PBKDF2 iteration count (big endian), salt, nonce, AES-GCM ciphertext.
pub struct SnapshotFile {
    path: PathBuf,
    iterations: u32,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Key-derivation cost used when saving
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.clamp(1, MAX_ITERATIONS);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock_file(&self) -> Result<File, SnapshotError> {
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?)
    }

    /// Block until this process holds the snapshot exclusively
    pub fn lock(&self) -> Result<SnapshotLock, SnapshotError> {
        let file = self.open_lock_file()?;
        file.lock_exclusive()?;
        log::debug!("Locked snapshot {}", self.path.display());
        Ok(SnapshotLock { file })
    }

    /// Like `lock`, but fails with `Locked` instead of waiting
    pub fn try_lock(&self) -> Result<SnapshotLock, SnapshotError> {
        let file = self.open_lock_file()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(SnapshotLock { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(SnapshotError::Locked(self.path.display().to_string()))
            }
            Err(e) => Err(SnapshotError::Io(e)),
        }
    }

    /// Load the snapshot; a missing file is an empty store
    pub fn load(&self, passphrase: &str) -> Result<StoreSnapshot, SnapshotError> {
        let file_data = match File::open(&self.path) {
            Ok(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                data
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No snapshot at {}, starting empty", self.path.display());
                return Ok(StoreSnapshot::default());
            }
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        // Check if file has the full header before slicing
        if file_data.len() < HEADER_LEN || &file_data[..4] != MAGIC {
            return Err(SnapshotError::InvalidData(
                "not a lending-desk snapshot".to_string(),
            ));
        }
        let mut iteration_bytes = [0u8; 4];
        iteration_bytes.copy_from_slice(&file_data[4..8]);
        let iterations = u32::from_be_bytes(iteration_bytes);
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(SnapshotError::InvalidData(format!(
                "key derivation cost {} is out of range",
                iterations
            )));
        }
        let salt = &file_data[8..24];
        let nonce = &file_data[24..HEADER_LEN];
        let encrypted_data = &file_data[HEADER_LEN..];

        let key = derive_key_from_passphrase(passphrase, salt, iterations);
        let decrypted = decrypt_data(encrypted_data, &key, nonce).map_err(SnapshotError::Encryption)?;

        serde_json::from_slice(&decrypted).map_err(|e| SnapshotError::InvalidData(e.to_string()))
    }

    /// Save the snapshot under a fresh salt and nonce
    pub fn save(&self, snapshot: &StoreSnapshot, passphrase: &str) -> Result<(), SnapshotError> {
        let data =
            serde_json::to_vec(snapshot).map_err(|e| SnapshotError::InvalidData(e.to_string()))?;

        let salt = generate_random_salt();
        let nonce = generate_random_nonce();
        let key = derive_key_from_passphrase(passphrase, &salt, self.iterations);
        let encrypted_data = encrypt_data(&data, &key, &nonce).map_err(SnapshotError::Encryption)?;

        let mut file_data = Vec::with_capacity(HEADER_LEN + encrypted_data.len());
        file_data.extend_from_slice(MAGIC);
        file_data.extend_from_slice(&self.iterations.to_be_bytes());
        file_data.extend_from_slice(&salt);
        file_data.extend_from_slice(&nonce);
        file_data.extend_from_slice(&encrypted_data);

        // Write beside the target, then rename so a crash never leaves half a file
        let staging = self.path.with_extension("tmp");
        File::create(&staging)?.write_all(&file_data)?;
        std::fs::rename(&staging, &self.path)?;

        log::debug!("Snapshot saved to {}", self.path.display());
        Ok(())
    }
}
