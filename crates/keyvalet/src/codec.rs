//! Key material codec.
//!
//! Classifies private key blobs (plaintext vs. passphrase-protected vs.
//! garbage), decrypts protected keys, and re-encrypts plaintext keys at
//! import time by delegating to an external hardening tool.
//!
//! Key blobs are OpenSSH-format private keys — the container `ssh` and
//! `ssh-keygen` themselves produce and consume. Parsing and decryption are
//! pure functions with no state; encryption shells out through the
//! [`HardeningTool`] boundary.

use std::io::Write;
use std::process::Command;

use ssh_key::PrivateKey;

use crate::error::{KeyvaletError, Result};

// ── Classification ────────────────────────────────────────────────────────────

/// Result of inspecting a private key blob.
#[derive(Debug)]
pub enum KeyStatus {
    /// The blob parsed and carries no passphrase protection.
    Unencrypted(Box<PrivateKey>),
    /// The blob parsed but its private section is passphrase-encrypted.
    PassphraseRequired,
    /// The blob is not a recognizable private key.
    Invalid(String),
}

impl KeyStatus {
    /// Classify a key blob. Never fails; malformed input is a
    /// [`KeyStatus::Invalid`] value, not an error.
    pub fn of(blob: &[u8]) -> Self {
        match PrivateKey::from_openssh(blob) {
            Ok(key) if key.is_encrypted() => KeyStatus::PassphraseRequired,
            Ok(key) => KeyStatus::Unencrypted(Box::new(key)),
            Err(e) => KeyStatus::Invalid(e.to_string()),
        }
    }
}

// ── Decryption ────────────────────────────────────────────────────────────────

/// Decrypt a passphrase-protected key blob.
///
/// # Errors
///
/// Returns [`KeyvaletError::AuthFailure`] for a wrong passphrase *and* for a
/// corrupt key — the caller cannot distinguish them, and does not need to.
pub fn decrypt(blob: &[u8], passphrase: &str) -> Result<PrivateKey> {
    let key = PrivateKey::from_openssh(blob).map_err(|_| KeyvaletError::AuthFailure)?;
    if !key.is_encrypted() {
        return Ok(key);
    }
    key.decrypt(passphrase.as_bytes())
        .map_err(|_| KeyvaletError::AuthFailure)
}

// ── Encryption (external hardening tool boundary) ─────────────────────────────

/// External key-hardening transform: plaintext key bytes + passphrase →
/// encrypted key bytes, or failure with diagnostic text.
///
/// Repeated invocations need not be byte-identical (the transform may use a
/// random salt/IV), but the output must always decrypt back with the same
/// passphrase via [`decrypt`].
pub trait HardeningTool {
    fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>>;
}

/// Encrypt a plaintext key blob with a passphrase.
///
/// # Errors
///
/// Rejects an empty passphrase with [`KeyvaletError::EncryptionFailure`]
/// *before* invoking the tool — an empty secret would silently produce an
/// unprotected key. Tool failures are passed through uninspected.
pub fn encrypt(tool: &dyn HardeningTool, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(KeyvaletError::EncryptionFailure(
            "refusing to encrypt with an empty passphrase".into(),
        ));
    }
    tool.encrypt(plaintext, passphrase)
}

/// Production hardening tool: `ssh-keygen -p` against a 0600 scratch file.
#[derive(Debug, Default)]
pub struct SshKeygen;

impl HardeningTool for SshKeygen {
    fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        // ssh-keygen rewrites the key file in place, so stage the plaintext
        // in a private temp directory and read the result back.
        let dir = tempfile::Builder::new()
            .prefix("keyvalet-encrypt-")
            .tempdir()
            .map_err(|e| KeyvaletError::EncryptionFailure(format!("temp dir: {e}")))?;
        let key_path = dir.path().join("key");

        let mut file = std::fs::File::create(&key_path)
            .map_err(|e| KeyvaletError::EncryptionFailure(format!("temp file: {e}")))?;
        set_owner_only(&file)?;
        file.write_all(plaintext)
            .map_err(|e| KeyvaletError::EncryptionFailure(format!("temp file: {e}")))?;
        drop(file);

        let output = Command::new("ssh-keygen")
            .arg("-p")
            .arg("-f")
            .arg(&key_path)
            .args(["-P", "", "-N", passphrase, "-Z", "aes256-ctr"])
            .output()
            .map_err(|e| KeyvaletError::EncryptionFailure(format!("ssh-keygen: {e}")))?;

        if !output.status.success() {
            let mut diag = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if diag.is_empty() {
                diag = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(KeyvaletError::EncryptionFailure(format!(
                "ssh-keygen exited with {}: {diag}",
                output.status
            )));
        }

        std::fs::read(&key_path)
            .map_err(|e| KeyvaletError::EncryptionFailure(format!("read result: {e}")))
    }
}

#[cfg(unix)]
fn set_owner_only(file: &std::fs::File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .map_err(|e| KeyvaletError::EncryptionFailure(format!("chmod: {e}")))
}

#[cfg(not(unix))]
fn set_owner_only(_file: &std::fs::File) -> Result<()> {
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
