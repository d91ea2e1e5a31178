//! Signature Verification
//!
//! Capability interface for bitstream authenticity checks, with an Ed25519
//! implementation: signatures are Ed25519 over the SHA-256 digest of the
//! image bytes, hex-encoded in a detached `.sig` file.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Outcome of one verification call. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct SignatureVerdict {
    pub valid: bool,
    pub reason: String,
}

impl SignatureVerdict {
    fn valid() -> Self {
        Self {
            valid: true,
            reason: "signature valid".to_string(),
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Trust-anchor capability consumed by the controller.
///
/// Implementations must treat missing inputs as an invalid verdict with a
/// descriptive reason, never as a crash.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, image: &Path, signature: &Path) -> SignatureVerdict;
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid public key material")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("malformed {0}")]
    Malformed(String),
}

/// Ed25519 verifier with a file-based trust anchor.
pub struct Ed25519Verifier {
    public_key_path: PathBuf,
}

impl Ed25519Verifier {
    pub fn new(public_key_path: impl Into<PathBuf>) -> Self {
        Self {
            public_key_path: public_key_path.into(),
        }
    }

    fn load_public_key(&self) -> Result<VerifyingKey, VerifyError> {
        let encoded = fs::read_to_string(&self.public_key_path)?;
        let bytes = hex::decode(encoded.trim())
            .map_err(|_| VerifyError::Malformed("public key encoding".to_string()))?;
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VerifyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyError::InvalidPublicKey)
    }

    fn load_signature(path: &Path) -> Result<Signature, VerifyError> {
        let encoded = fs::read_to_string(path)?;
        let bytes = hex::decode(encoded.trim())
            .map_err(|_| VerifyError::Malformed("signature encoding".to_string()))?;
        let sig_bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| VerifyError::InvalidSignature)?;
        Ok(Signature::from_bytes(&sig_bytes))
    }

    fn check(&self, image: &Path, signature: &Path) -> Result<(), VerifyError> {
        let public_key = self.load_public_key()?;
        let payload = fs::read(image)?;
        let signature = Self::load_signature(signature)?;

        let digest = Sha256::digest(&payload);
        public_key
            .verify(&digest, &signature)
            .map_err(|_| VerifyError::InvalidSignature)?;
        Ok(())
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, image: &Path, signature: &Path) -> SignatureVerdict {
        // Missing inputs are rejections, not errors.
        if !self.public_key_path.exists() {
            return SignatureVerdict::invalid(format!(
                "missing public key file: {}",
                self.public_key_path.display()
            ));
        }
        if !image.exists() {
            return SignatureVerdict::invalid(format!(
                "missing bitstream file: {}",
                image.display()
            ));
        }
        if !signature.exists() {
            return SignatureVerdict::invalid(format!(
                "missing signature file: {}",
                signature.display()
            ));
        }

        match self.check(image, signature) {
            Ok(()) => SignatureVerdict::valid(),
            Err(e) => SignatureVerdict::invalid(format!("signature verification failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use std::fs;
    use tempfile::tempdir;

    fn write_fixtures(dir: &Path, payload: &[u8]) -> (PathBuf, PathBuf, PathBuf) {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);

        let key_path = dir.join("public.key");
        fs::write(&key_path, hex::encode(signing_key.verifying_key().as_bytes())).unwrap();

        let image_path = dir.join("module.bit");
        fs::write(&image_path, payload).unwrap();

        let sig_path = dir.join("module.bit.sig");
        let signature = signing_key.sign(&Sha256::digest(payload));
        fs::write(&sig_path, hex::encode(signature.to_bytes())).unwrap();

        (key_path, image_path, sig_path)
    }

    #[test]
    fn test_valid_signature() {
        let dir = tempdir().unwrap();
        let (key_path, image_path, sig_path) = write_fixtures(dir.path(), b"payload");

        let verifier = Ed25519Verifier::new(key_path);
        let verdict = verifier.verify(&image_path, &sig_path);
        assert!(verdict.valid, "{}", verdict.reason);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let dir = tempdir().unwrap();
        let (key_path, image_path, sig_path) = write_fixtures(dir.path(), b"payload");

        // Flip one bit of the payload, keep the signature.
        let mut payload = fs::read(&image_path).unwrap();
        payload[0] ^= 0x01;
        fs::write(&image_path, payload).unwrap();

        let verifier = Ed25519Verifier::new(key_path);
        let verdict = verifier.verify(&image_path, &sig_path);
        assert!(!verdict.valid);
        assert!(verdict.reason.contains("invalid signature"));
    }

    #[test]
    fn test_missing_signature_file() {
        let dir = tempdir().unwrap();
        let (key_path, image_path, _) = write_fixtures(dir.path(), b"payload");

        let verifier = Ed25519Verifier::new(key_path);
        let verdict = verifier.verify(&image_path, &dir.path().join("absent.sig"));
        assert!(!verdict.valid);
        assert!(verdict.reason.contains("missing signature file"));
    }

    #[test]
    fn test_missing_public_key() {
        let dir = tempdir().unwrap();
        let (_, image_path, sig_path) = write_fixtures(dir.path(), b"payload");

        let verifier = Ed25519Verifier::new(dir.path().join("absent.key"));
        let verdict = verifier.verify(&image_path, &sig_path);
        assert!(!verdict.valid);
        assert!(verdict.reason.contains("missing public key"));
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let dir = tempdir().unwrap();
        let (key_path, image_path, sig_path) = write_fixtures(dir.path(), b"payload");
        fs::write(&sig_path, "not-hex-at-all").unwrap();

        let verifier = Ed25519Verifier::new(key_path);
        let verdict = verifier.verify(&image_path, &sig_path);
        assert!(!verdict.valid);
    }
}
