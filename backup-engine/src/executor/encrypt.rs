//! Post-copy encryption of sensitive subtrees.
//!
//! Each file under a sensitive folder is replaced by `<name><suffix>`
//! holding a ChaCha20-Poly1305 ciphertext. The sequence read, encrypt,
//! write, delete is not atomic: an interrupted run can leave the plaintext,
//! the ciphertext, or both.
//!
//! Encrypted file layout:
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | magic `PCBK`                           |
//! | 4      | 1    | format version                         |
//! | 5      | 1    | key derivation (0 = sha256, 1 = salted) |
//! | 6      | 16   | salt (zeros for sha256)                |
//! | 22     | 12   | nonce                                  |
//! | 34     | ..   | ciphertext + 16-byte tag               |

use super::report::FileFailure;
use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Default marker appended to encrypted file names
pub const DEFAULT_ENCRYPTED_SUFFIX: &str = ".encrypted";

/// How the file key is obtained from the password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDerivation {
    /// SHA-256 of the password: identical passwords give identical keys
    /// across sessions.
    #[default]
    Sha256,
    /// SHA-256 over a random per-session salt and the password.
    Salted,
}

/// Outcome of the encryption stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EncryptionResult {
    /// No password supplied; the tree is untouched
    Skipped,
    /// Cryptographic support missing; the tree is untouched
    Unavailable { reason: String },
    Completed {
        encrypted: usize,
        already_encrypted: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failures: Vec<FileFailure>,
    },
}

impl EncryptionResult {
    /// Encryption was requested but did not fully happen.
    pub fn is_degraded(&self) -> bool {
        match self {
            EncryptionResult::Skipped => false,
            EncryptionResult::Unavailable { .. } => true,
            EncryptionResult::Completed { failures, .. } => !failures.is_empty(),
        }
    }
}

/// Encrypts designated folders of a session tree in place.
#[derive(Debug, Clone)]
pub struct SensitiveEncryptor {
    suffix: String,
    derivation: KeyDerivation,
}

impl Default for SensitiveEncryptor {
    fn default() -> Self {
        Self::new(DEFAULT_ENCRYPTED_SUFFIX, KeyDerivation::default())
    }
}

impl SensitiveEncryptor {
    pub fn new(suffix: &str, derivation: KeyDerivation) -> Self {
        Self {
            suffix: suffix.to_string(),
            derivation,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Encrypt every file under `session_path/<name>` for each sensitive name.
    pub async fn encrypt(
        &self,
        session_path: &Path,
        sensitive_dirs: &[String],
        password: Option<&str>,
    ) -> EncryptionResult {
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            info!("No password - skipping encryption");
            return EncryptionResult::Skipped;
        };

        self.encrypt_with(session_path, sensitive_dirs, password).await
    }

    #[cfg(feature = "encryption")]
    async fn encrypt_with(
        &self,
        session_path: &Path,
        sensitive_dirs: &[String],
        password: &str,
    ) -> EncryptionResult {
        let key = match cipher::SessionKey::derive(password, self.derivation) {
            Ok(key) => key,
            Err(e) => {
                warn!("Encryption unavailable: {}", e);
                return EncryptionResult::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        let dirs: Vec<_> = sensitive_dirs.iter().map(|d| session_path.join(d)).collect();
        let suffix = self.suffix.clone();

        match tokio::task::spawn_blocking(move || cipher::encrypt_tree(&dirs, &key, &suffix)).await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("Encryption task failed: {}", e);
                EncryptionResult::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    #[cfg(not(feature = "encryption"))]
    async fn encrypt_with(
        &self,
        _session_path: &Path,
        _sensitive_dirs: &[String],
        _password: &str,
    ) -> EncryptionResult {
        let reason = UNAVAILABLE_REASON.to_string();
        warn!("Encryption unavailable: {} ({:?})", reason, self.derivation);
        EncryptionResult::Unavailable { reason }
    }
}

#[cfg(not(feature = "encryption"))]
const UNAVAILABLE_REASON: &str = "built without the `encryption` feature";

/// Decrypt an encrypted file produced by [`SensitiveEncryptor`].
pub fn decrypt_file(path: &Path, password: &str) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    decrypt_bytes(&data, password)
}

/// Decrypt an in-memory encrypted payload.
#[cfg(feature = "encryption")]
pub fn decrypt_bytes(data: &[u8], password: &str) -> Result<Vec<u8>> {
    cipher::decrypt(data, password)
}

#[cfg(not(feature = "encryption"))]
pub fn decrypt_bytes(_data: &[u8], _password: &str) -> Result<Vec<u8>> {
    Err(crate::utils::EngineError::EncryptionUnavailable(
        UNAVAILABLE_REASON.to_string(),
    ))
}

#[cfg(feature = "encryption")]
mod cipher {
    use super::{EncryptionResult, KeyDerivation};
    use crate::executor::report::FileFailure;
    use crate::fs::walker::{walk_directory, WalkOptions};
    use crate::utils::{EngineError, Result};
    use chacha20poly1305::aead::rand_core::RngCore;
    use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
    use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
    use sha2::{Digest, Sha256};
    use std::ffi::OsString;
    use std::fs::{self, File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::path::{Path, PathBuf};
    use tracing::{debug, info, warn};
    use zeroize::Zeroizing;

    const MAGIC: &[u8; 4] = b"PCBK";
    const FORMAT_VERSION: u8 = 1;
    const SALT_LEN: usize = 16;
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;
    const HEADER_LEN: usize = MAGIC.len() + 2 + SALT_LEN + NONCE_LEN;

    impl KeyDerivation {
        fn id(self) -> u8 {
            match self {
                KeyDerivation::Sha256 => 0,
                KeyDerivation::Salted => 1,
            }
        }

        fn from_id(id: u8) -> Option<Self> {
            match id {
                0 => Some(KeyDerivation::Sha256),
                1 => Some(KeyDerivation::Salted),
                _ => None,
            }
        }
    }

    fn derive_key(password: &str, derivation: KeyDerivation, salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; 32]> {
        let mut hasher = Sha256::new();
        if derivation == KeyDerivation::Salted {
            hasher.update(salt);
        }
        hasher.update(password.as_bytes());

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&hasher.finalize());
        key
    }

    /// Key material derived once per session.
    pub(super) struct SessionKey {
        derivation: KeyDerivation,
        salt: [u8; SALT_LEN],
        cipher: ChaCha20Poly1305,
    }

    impl SessionKey {
        pub(super) fn derive(password: &str, derivation: KeyDerivation) -> Result<Self> {
            let mut salt = [0u8; SALT_LEN];
            if derivation == KeyDerivation::Salted {
                OsRng
                    .try_fill_bytes(&mut salt)
                    .map_err(|e| EngineError::EncryptionUnavailable(e.to_string()))?;
            }

            let key = derive_key(password, derivation, &salt);
            Ok(Self {
                derivation,
                salt,
                cipher: ChaCha20Poly1305::new(Key::from_slice(&key[..])),
            })
        }

        pub(super) fn seal(&self, plaintext: &[u8]) -> io::Result<Vec<u8>> {
            let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
            let ciphertext = self
                .cipher
                .encrypt(&nonce, plaintext)
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "encryption failed"))?;

            let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
            out.extend_from_slice(MAGIC);
            out.push(FORMAT_VERSION);
            out.push(self.derivation.id());
            out.extend_from_slice(&self.salt);
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
    }

    pub(super) fn decrypt(data: &[u8], password: &str) -> Result<Vec<u8>> {
        if data.len() < HEADER_LEN + TAG_LEN {
            return Err(EngineError::InvalidCiphertext("file too short".to_string()));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(EngineError::InvalidCiphertext("bad magic".to_string()));
        }
        if data[4] != FORMAT_VERSION {
            return Err(EngineError::InvalidCiphertext(format!(
                "unsupported format version {}",
                data[4]
            )));
        }
        let derivation = KeyDerivation::from_id(data[5]).ok_or_else(|| {
            EngineError::InvalidCiphertext(format!("unknown key derivation {}", data[5]))
        })?;

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&data[6..6 + SALT_LEN]);
        let nonce = Nonce::from_slice(&data[6 + SALT_LEN..HEADER_LEN]);

        let key = derive_key(password, derivation, &salt);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        cipher
            .decrypt(nonce, &data[HEADER_LEN..])
            .map_err(|_| EngineError::DecryptionFailed)
    }

    fn encrypted_path(path: &Path, suffix: &str) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Whether `path` already holds a payload produced by [`SessionKey::seal`].
    pub(super) fn is_sealed(path: &Path) -> io::Result<bool> {
        let mut file = File::open(path)?;
        if file.metadata()?.len() < (HEADER_LEN + TAG_LEN) as u64 {
            return Ok(false);
        }

        let mut header = [0u8; 6];
        file.read_exact(&mut header)?;
        Ok(&header[..MAGIC.len()] == MAGIC
            && header[4] == FORMAT_VERSION
            && KeyDerivation::from_id(header[5]).is_some())
    }

    /// Create `target` exclusively and fill it; a partial file is removed.
    pub(super) fn write_or_discard(
        target: &Path,
        write: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut out = OpenOptions::new().write(true).create_new(true).open(target)?;

        if let Err(e) = write(&mut out) {
            drop(out);
            if let Err(cleanup) = fs::remove_file(target) {
                warn!("Could not remove partial {}: {}", target.display(), cleanup);
            }
            return Err(e);
        }

        Ok(())
    }

    fn encrypt_file(path: &Path, key: &SessionKey, suffix: &str) -> io::Result<()> {
        let plaintext = Zeroizing::new(fs::read(path)?);
        let sealed = key.seal(&plaintext)?;

        write_or_discard(&encrypted_path(path, suffix), |out| {
            out.write_all(&sealed)?;
            out.sync_all()
        })?;

        fs::remove_file(path)
    }

    pub(super) fn encrypt_tree(dirs: &[PathBuf], key: &SessionKey, suffix: &str) -> EncryptionResult {
        let mut encrypted = 0usize;
        let mut already_encrypted = 0usize;
        let mut failures = Vec::new();

        for dir in dirs {
            if !dir.exists() {
                debug!("Sensitive folder absent: {}", dir.display());
                continue;
            }

            let walk = walk_directory(dir, &WalkOptions::default());
            for error in walk.errors {
                warn!("Cannot enumerate {}: {}", error.path.display(), error.error);
                failures.push(FileFailure::from_io(error.path, &error.error));
            }

            // `x.encrypted` sorts after `x`: descending order moves a file
            // out of the way before its plaintext sibling needs the name
            let mut files: Vec<PathBuf> = walk.files.into_iter().map(|f| f.path).collect();
            files.sort_unstable_by(|a, b| b.cmp(a));

            for path in files {
                match is_sealed(&path) {
                    Ok(true) => {
                        already_encrypted += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Could not inspect {}: {}", path.display(), e);
                        failures.push(FileFailure::from_io(&path, &e));
                        continue;
                    }
                }

                match encrypt_file(&path, key, suffix) {
                    Ok(()) => {
                        debug!("Encrypted {}", path.display());
                        encrypted += 1;
                    }
                    Err(e) => {
                        warn!("Could not encrypt {}: {}", path.display(), e);
                        failures.push(FileFailure::from_io(&path, &e));
                    }
                }
            }
        }

        info!(
            "Encryption finished: {} encrypted, {} already encrypted, {} failed",
            encrypted,
            already_encrypted,
            failures.len()
        );

        EncryptionResult::Completed {
            encrypted,
            already_encrypted,
            failures,
        }
    }
}
