//! Shared fixtures for integration tests: a deterministic keypair, signed
//! bitstream files, and CRC-targeted payloads.

#![allow(dead_code)]

use bitguard::engine::bitstream::{crc32, Bitstream};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const FIXTURE_KEY: [u8; 32] = [42u8; 32];

/// Write the fixture public key, returning its path.
pub fn write_public_key(dir: &Path) -> PathBuf {
    let signing_key = SigningKey::from_bytes(&FIXTURE_KEY);
    let public_path = dir.join("public.key");
    fs::write(
        &public_path,
        hex::encode(signing_key.verifying_key().as_bytes()),
    )
    .unwrap();
    public_path
}

/// Sign an image with the fixture key, writing `<image>.sig`.
pub fn sign_image(image: &Path) {
    let signing_key = SigningKey::from_bytes(&FIXTURE_KEY);
    let payload = fs::read(image).unwrap();
    let signature = signing_key.sign(&Sha256::digest(&payload));
    fs::write(
        Bitstream::new(image).signature_path(),
        hex::encode(signature.to_bytes()),
    )
    .unwrap();
}

/// Payload whose CRC-32 is (or is not) divisible by 17, so the self-test's
/// content-dependent branch can be forced either way.
pub fn payload_with_crc(divisible_by_17: bool) -> Vec<u8> {
    let base = b"integration-fixture".to_vec();
    for counter in 0u32.. {
        let mut candidate = base.clone();
        candidate.extend_from_slice(&counter.to_le_bytes());
        let divides = crc32(&candidate) % 17 == 0;
        if divides == divisible_by_17 {
            return candidate;
        }
    }
    unreachable!()
}

/// Write a signed image under `dir` and return its path.
pub fn write_signed_image(dir: &Path, name: &str, divisible_by_17: bool) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, payload_with_crc(divisible_by_17)).unwrap();
    sign_image(&path);
    path
}
