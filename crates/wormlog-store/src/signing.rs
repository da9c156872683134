//! Ed25519 implementations of `ChainSigner` and `SignatureVerifier`.
//!
//! Keys live outside the ledger. On disk both halves are a single line of
//! lowercase hex: the 32-byte seed for the private key, the 32-byte
//! compressed point for the public key.
//!
//! Signatures cover the ASCII bytes of the hex digest being signed and are
//! stored as 128 lowercase hex characters.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::info;

use wormlog_contracts::error::{WormError, WormResult};
use wormlog_core::traits::{ChainSigner, SignatureVerifier};

/// File name used by `write_keypair` for the private seed.
pub const PRIVATE_KEY_FILE: &str = "wormlog_signing.key";

/// File name used by `write_keypair` for the public key.
pub const PUBLIC_KEY_FILE: &str = "wormlog_signing.pub";

fn decode_32(hex_str: &str, what: &str) -> WormResult<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim()).map_err(|e| WormError::SigningFailed {
        reason: format!("{what} is not valid hex: {e}"),
    })?;
    bytes.try_into().map_err(|b: Vec<u8>| WormError::SigningFailed {
        reason: format!("{what} must be 32 bytes, got {}", b.len()),
    })
}

fn read_key_file(path: &Path, what: &str) -> WormResult<String> {
    std::fs::read_to_string(path).map_err(|e| WormError::SigningFailed {
        reason: format!("failed to read {what} '{}': {e}", path.display()),
    })
}

/// Signs chain hashes with an Ed25519 private key.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Generate a fresh key from the operating system RNG.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_seed_hex(seed_hex: &str) -> WormResult<Self> {
        Ok(Self::from_seed(decode_32(seed_hex, "private key")?))
    }

    pub fn from_file(path: &Path) -> WormResult<Self> {
        Self::from_seed_hex(&read_key_file(path, "private key file")?)
    }

    /// The matching verifier.
    pub fn verifier(&self) -> Ed25519Verifier {
        Ed25519Verifier {
            key: self.key.verifying_key(),
        }
    }

    fn seed_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }
}

impl ChainSigner for Ed25519Signer {
    fn sign(&self, message: &str) -> WormResult<String> {
        Ok(hex::encode(self.key.sign(message.as_bytes()).to_bytes()))
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }
}

/// Verifies Ed25519 signatures with a public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn from_hex(public_hex: &str) -> WormResult<Self> {
        let bytes = decode_32(public_hex, "public key")?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| WormError::SigningFailed {
            reason: format!("public key is not a valid Ed25519 point: {e}"),
        })?;
        Ok(Self { key })
    }

    pub fn from_file(path: &Path) -> WormResult<Self> {
        Self::from_hex(&read_key_file(path, "public key file")?)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &str, signature: &str) -> bool {
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&bytes);
        self.key.verify(message.as_bytes(), &signature).is_ok()
    }
}

/// Generate a keypair and write it into `dir`. Refuses to overwrite an
/// existing private key.
///
/// Returns `(private_key_path, public_key_path)`.
pub fn write_keypair(dir: &Path) -> WormResult<(PathBuf, PathBuf)> {
    let io_err = |e: std::io::Error| WormError::SigningFailed {
        reason: format!("failed to write keypair in '{}': {e}", dir.display()),
    };

    std::fs::create_dir_all(dir).map_err(io_err)?;
    let private_path = dir.join(PRIVATE_KEY_FILE);
    let public_path = dir.join(PUBLIC_KEY_FILE);
    if private_path.exists() {
        return Err(WormError::SigningFailed {
            reason: format!("refusing to overwrite '{}'", private_path.display()),
        });
    }

    let signer = Ed25519Signer::generate();
    std::fs::write(&private_path, format!("{}\n", signer.seed_hex())).map_err(io_err)?;
    std::fs::write(&public_path, format!("{}\n", signer.public_key_hex())).map_err(io_err)?;

    info!(
        private_key = %private_path.display(),
        public_key = %public_path.display(),
        "generated ed25519 signing keypair"
    );

    Ok((private_path, public_path))
}
