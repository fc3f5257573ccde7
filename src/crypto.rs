//! Password-protected coder support: AES-256-GCM decryption with Argon2id
//! key derivation, plus the secret-handling plumbing the pipeline uses to
//! deliver a password to a coder and wipe it afterwards.
//!
//! Key derivation: Argon2id(password, salt) -> 32-byte key, where the
//! 16-byte salt travels in the coder's properties blob so each folder gets a
//! distinct key even when the same password is reused.
//!
//! Encrypted payload layout: [ nonce (12 B) | ciphertext | GCM tag (16 B) ]

use std::io::{Read, Write};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroizing;

use crate::coder::{
    Coder, CoderError, CoderSizes, SetPassword, SetProperties,
};

/// Byte length of the AES-GCM nonce prepended to every encrypted payload.
pub const NONCE_LEN: usize = 12;
/// Byte length of the KDF salt carried in the coder's properties blob.
pub const SALT_LEN: usize = 16;

// ── Secret handling ──────────────────────────────────────────────────────────

/// Password material with its backing memory overwritten on every exit path
/// (normal return, early error return, unwind).
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_str(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the material itself.
        write!(f, "SecretBytes({} byte(s))", self.0.len())
    }
}

/// Supplies the password for a decode call.  Invoked at most once per call,
/// and only when some coder in the graph actually requires it.
pub trait PasswordProvider: Send {
    fn password(&self) -> std::io::Result<SecretBytes>;
}

impl<F> PasswordProvider for F
where
    F: Fn() -> std::io::Result<SecretBytes> + Send,
{
    fn password(&self) -> std::io::Result<SecretBytes> {
        self()
    }
}

// ── Key derivation & payload transforms ──────────────────────────────────────

/// Derive a 256-bit key from a password and salt using Argon2id.
pub fn derive_key(password: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, CoderError> {
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| CoderError::PasswordRejected(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, key.as_mut())
        .map_err(|e| CoderError::PasswordRejected(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` with AES-256-GCM using a random nonce.
///
/// Returns `nonce (12 B) || ciphertext || GCM-tag (16 B)`.  Writer-side
/// counterpart of [`AesCoder`], also used by the test suite to build
/// encrypted folders.
pub fn encrypt_payload(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CoderError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CoderError::Corrupt(e.to_string()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CoderError::Corrupt("encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_payload(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CoderError> {
    if data.len() < NONCE_LEN {
        return Err(CoderError::Corrupt(format!(
            "encrypted payload shorter than the {NONCE_LEN}-byte nonce"
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CoderError::Corrupt(e.to_string()))?;
    let nonce = aes_gcm::Nonce::from_slice(&data[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &data[NONCE_LEN..])
        .map_err(|_| CoderError::Corrupt("GCM tag mismatch: wrong password or corrupted data".into()))
}

// ── AES coder ────────────────────────────────────────────────────────────────

/// AES-256-GCM decryption stage.
///
/// Properties must be applied before the password: the salt from the props
/// blob feeds key derivation.  The derived key survives `reinit` so that
/// repeated members of one solid folder do not re-run the KDF.
#[derive(Default)]
pub struct AesCoder {
    salt: Option<[u8; SALT_LEN]>,
    key: Option<Zeroizing<[u8; 32]>>,
}

impl AesCoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SetProperties for AesCoder {
    fn set_properties(&mut self, props: &[u8]) -> Result<(), CoderError> {
        let salt: [u8; SALT_LEN] = props.try_into().map_err(|_| {
            CoderError::InvalidProperties(format!(
                "AES properties must be the {SALT_LEN}-byte KDF salt, got {} byte(s)",
                props.len()
            ))
        })?;
        if self.salt != Some(salt) {
            self.salt = Some(salt);
            self.key = None; // salt changed, previous key is stale
        }
        Ok(())
    }
}

impl SetPassword for AesCoder {
    fn set_password(&mut self, password: &SecretBytes) -> Result<(), CoderError> {
        let salt = self.salt.ok_or_else(|| {
            CoderError::InvalidProperties("AES coder is missing its KDF salt".into())
        })?;
        self.key = Some(derive_key(password.expose(), &salt)?);
        Ok(())
    }
}

impl Coder for AesCoder {
    fn code(
        &mut self,
        inputs: &mut [&mut (dyn Read + Send)],
        output: &mut (dyn Write + Send),
        sizes: &CoderSizes,
    ) -> Result<u64, CoderError> {
        let key = self.key.as_ref().ok_or(CoderError::PasswordRequired)?;

        // GCM authenticates the whole payload; it cannot be verified
        // incrementally, so the (bounded) input is read in full.
        let mut data = Vec::new();
        if let Some(Some(pack)) = sizes.pack_sizes.first() {
            data.reserve(*pack as usize);
        }
        inputs[0].read_to_end(&mut data)?;

        let plain = decrypt_payload(key, &data)?;
        let n = match sizes.unpack_size {
            Some(limit) => plain.len().min(limit as usize),
            None => plain.len(),
        };
        output.write_all(&plain[..n])?;
        Ok(n as u64)
    }

    fn is_filter(&self) -> bool {
        true
    }

    fn properties(&mut self) -> Option<&mut dyn SetProperties> {
        Some(self)
    }

    fn password(&mut self) -> Option<&mut dyn SetPassword> {
        Some(self)
    }
}
