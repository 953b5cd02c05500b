//! Cryptographic collaborators.
//!
//! - [`EncryptionProvider`] encrypts secret material before it is written to
//!   an event; [`AesGcmEncryption`] is the AES-256-GCM implementation keyed
//!   from the environment.
//! - [`KeyGenerator`] produces web key pairs; [`WebKeyGenerator`] is the
//!   default and covers Ed25519 and ECDSA on P-256/P-384.

use std::fs;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use iam_events::{
    CryptoType, CryptoValue, EllipticCurve, KeyUsage, PublicKeyMaterial, WebKeyConfig,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const AAD: &[u8] = b"iam-key-encryption-v1";
pub const AES_256_GCM: &str = "aes-256-gcm";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("missing key encryption key (set IAM_KEY_ENCRYPTION_KEY or IAM_KEY_ENCRYPTION_KEY_FILE)")]
    MissingKey,
    #[error("invalid key encryption key encoding")]
    InvalidKey,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("unknown encryption key id: {0}")]
    UnknownKey(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("code expired")]
    CodeExpired,
    #[error("code does not match")]
    CodeMismatch,
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

/// Symmetric encryption of secret material at rest.
pub trait EncryptionProvider: Send + Sync {
    /// Algorithm name recorded in produced [`CryptoValue`]s.
    fn algorithm(&self) -> &'static str;

    fn encrypt(&self, plaintext: &[u8]) -> Result<CryptoValue, CryptoError>;

    fn decrypt(&self, value: &CryptoValue) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-GCM with a single operator-managed key.
///
/// `crypted` is the random nonce followed by the ciphertext.
#[derive(Clone)]
pub struct AesGcmEncryption {
    key_id: String,
    key_bytes: [u8; KEY_BYTES],
}

impl std::fmt::Debug for AesGcmEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmEncryption")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

fn decode_key(raw: &str) -> Result<[u8; KEY_BYTES], CryptoError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|_| CryptoError::InvalidKey)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey)
}

fn key_id_for_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)[..8].to_string()
}

impl AesGcmEncryption {
    /// Uses `key_bytes` with an ID derived from its SHA-256 digest.
    pub fn new(key_bytes: [u8; KEY_BYTES]) -> Self {
        Self {
            key_id: key_id_for_bytes(&key_bytes),
            key_bytes,
        }
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    /// Loads the key from `IAM_KEY_ENCRYPTION_KEY` (base64) or the file
    /// named by `IAM_KEY_ENCRYPTION_KEY_FILE`. `IAM_KEY_ENCRYPTION_KEY_ID`
    /// overrides the derived key ID.
    pub fn from_env() -> Result<Self, CryptoError> {
        let key_bytes = if let Ok(raw) = std::env::var("IAM_KEY_ENCRYPTION_KEY") {
            decode_key(&raw)?
        } else if let Ok(path) = std::env::var("IAM_KEY_ENCRYPTION_KEY_FILE") {
            let contents = fs::read_to_string(path).map_err(|_| CryptoError::InvalidKey)?;
            decode_key(&contents)?
        } else {
            return Err(CryptoError::MissingKey);
        };

        let encryption = Self::new(key_bytes);
        Ok(match std::env::var("IAM_KEY_ENCRYPTION_KEY_ID") {
            Ok(key_id) => encryption.with_key_id(key_id),
            Err(_) => encryption,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.key_bytes).map_err(|_| CryptoError::InvalidKey)
    }
}

impl EncryptionProvider for AesGcmEncryption {
    fn algorithm(&self) -> &'static str {
        AES_256_GCM
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<CryptoValue, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: AAD,
                },
            )
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut crypted = nonce_bytes.to_vec();
        crypted.extend_from_slice(&ciphertext);
        Ok(CryptoValue {
            crypto_type: CryptoType::Encryption,
            algorithm: AES_256_GCM.to_string(),
            key_id: self.key_id.clone(),
            crypted,
        })
    }

    fn decrypt(&self, value: &CryptoValue) -> Result<Vec<u8>, CryptoError> {
        if value.algorithm != AES_256_GCM {
            return Err(CryptoError::UnsupportedAlgorithm(value.algorithm.clone()));
        }
        if value.key_id != self.key_id {
            return Err(CryptoError::UnknownKey(value.key_id.clone()));
        }
        if value.crypted.len() < NONCE_BYTES {
            return Err(CryptoError::DecryptFailed);
        }

        let (nonce, ciphertext) = value.crypted.split_at(NONCE_BYTES);
        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: AAD,
                },
            )
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Checks a one-time code stored encrypted at `created_at`.
///
/// Fails with [`CryptoError::CodeExpired`] once `expiry` has elapsed, and
/// with [`CryptoError::CodeMismatch`] if `candidate` differs from the
/// decrypted code.
pub fn verify_code(
    provider: &dyn EncryptionProvider,
    created_at: DateTime<Utc>,
    expiry: Duration,
    code: &CryptoValue,
    candidate: &str,
    now: DateTime<Utc>,
) -> Result<(), CryptoError> {
    if now > created_at + expiry {
        return Err(CryptoError::CodeExpired);
    }
    let plain = provider.decrypt(code)?;
    // Compare digests so the comparison length does not depend on input.
    if Sha256::digest(&plain) != Sha256::digest(candidate.as_bytes()) {
        return Err(CryptoError::CodeMismatch);
    }
    Ok(())
}

/// Generates web key pairs.
pub trait KeyGenerator: Send + Sync {
    /// Returns the encrypted private key and the public key for `key_id`.
    fn generate(
        &self,
        key_id: &str,
        encryption: &dyn EncryptionProvider,
        config: &WebKeyConfig,
    ) -> Result<(CryptoValue, PublicKeyMaterial), CryptoError>;
}

/// Generates keys in process from the OS random source.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebKeyGenerator;

impl KeyGenerator for WebKeyGenerator {
    fn generate(
        &self,
        key_id: &str,
        encryption: &dyn EncryptionProvider,
        config: &WebKeyConfig,
    ) -> Result<(CryptoValue, PublicKeyMaterial), CryptoError> {
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let (secret, key_type, curve, x, y) = match config {
            WebKeyConfig::Ed25519 => {
                let mut seed = [0u8; 32];
                rand::rng().fill_bytes(&mut seed);
                let signing_key = SigningKey::from_bytes(&seed);
                let public = signing_key.verifying_key().to_bytes();
                (
                    signing_key.to_bytes().to_vec(),
                    "OKP",
                    "Ed25519",
                    public.to_vec(),
                    None,
                )
            }
            WebKeyConfig::Ecdsa { curve } => {
                let (secret, x, y) = ec_key_pair(*curve)?;
                (secret, "EC", curve.as_str(), x, Some(y))
            }
        };

        let private_key = encryption.encrypt(&secret)?;
        let public_key = PublicKeyMaterial {
            key_id: key_id.to_string(),
            algorithm: config.algorithm().to_string(),
            usage: KeyUsage::Signing,
            key_type: key_type.to_string(),
            curve: curve.to_string(),
            x: b64.encode(x),
            y: y.map(|y| b64.encode(y)),
        };
        Ok((private_key, public_key))
    }
}

/// Returns the private scalar and the affine public coordinates.
fn ec_key_pair(curve: EllipticCurve) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), CryptoError> {
    match curve {
        EllipticCurve::P256 => {
            let secret = random_secret(32, |bytes| p256::SecretKey::from_slice(bytes).ok())?;
            let point = secret.public_key().to_encoded_point(false);
            Ok((
                secret.to_bytes().to_vec(),
                coordinate(point.x().map(|c| c.as_slice()))?,
                coordinate(point.y().map(|c| c.as_slice()))?,
            ))
        }
        EllipticCurve::P384 => {
            let secret = random_secret(48, |bytes| p384::SecretKey::from_slice(bytes).ok())?;
            let point = secret.public_key().to_encoded_point(false);
            Ok((
                secret.to_bytes().to_vec(),
                coordinate(point.x().map(|c| c.as_slice()))?,
                coordinate(point.y().map(|c| c.as_slice()))?,
            ))
        }
    }
}

/// Draws random bytes until `parse` accepts them as a scalar; zero and values
/// at or above the curve order are rejected.
fn random_secret<K>(len: usize, parse: impl Fn(&[u8]) -> Option<K>) -> Result<K, CryptoError> {
    let mut bytes = vec![0u8; len];
    for _ in 0..4 {
        rand::rng().fill_bytes(&mut bytes);
        if let Some(secret) = parse(&bytes) {
            return Ok(secret);
        }
    }
    Err(CryptoError::KeyGeneration(
        "no valid scalar drawn".to_string(),
    ))
}

fn coordinate(value: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
    value
        .map(<[u8]>::to_vec)
        .ok_or_else(|| CryptoError::KeyGeneration("public key is the identity".to_string()))
}
