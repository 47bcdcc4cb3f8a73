//! Subresource-integrity verification.
//!
//! Accepts SRI metadata such as `sha384-<base64>`, possibly several
//! space-separated tokens with optional `?options`. The first token with a
//! supported algorithm decides; tokens with unknown algorithms are skipped.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::IntegrityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "sha256" => Some(DigestAlgorithm::Sha256),
            "sha384" => Some(DigestAlgorithm::Sha384),
            "sha512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(bytes).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(bytes).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(bytes).to_vec(),
        }
    }
}

/// The digest selected from integrity metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityDigest {
    pub algorithm: DigestAlgorithm,
    pub expected: Vec<u8>,
}

/// Select the first supported digest from SRI metadata.
pub fn parse_integrity(metadata: &str) -> Result<IntegrityDigest, IntegrityError> {
    for token in metadata.split_whitespace() {
        let token = token.split('?').next().unwrap_or_default();
        let Some((prefix, encoded)) = token.split_once('-') else {
            continue;
        };
        let Some(algorithm) = DigestAlgorithm::from_prefix(prefix) else {
            continue;
        };
        let expected = STANDARD.decode(encoded).map_err(|e| IntegrityError::Malformed {
            token: token.to_string(),
            reason: e.to_string(),
        })?;
        return Ok(IntegrityDigest { algorithm, expected });
    }
    Err(IntegrityError::Unsupported(metadata.to_string()))
}

/// Hash `bytes` and compare against `metadata`.
pub fn verify_integrity(bytes: &[u8], metadata: &str) -> Result<(), IntegrityError> {
    let digest = parse_integrity(metadata)?;
    let actual = digest.algorithm.digest(bytes);
    if actual == digest.expected {
        Ok(())
    } else {
        Err(IntegrityError::Mismatch {
            algorithm: digest.algorithm.as_str().to_string(),
            expected: STANDARD.encode(&digest.expected),
            actual: STANDARD.encode(&actual),
        })
    }
}

/// Build SRI metadata for `bytes`.
pub fn integrity_for(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    format!("{}-{}", algorithm.as_str(), STANDARD.encode(algorithm.digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::DiagnosticCode;

    const BODY: &[u8] = b"export default function Card() {}";

    #[test]
    fn test_matching_digest_passes() {
        for algorithm in [DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
            assert!(verify_integrity(BODY, &integrity_for(algorithm, BODY)).is_ok());
        }
    }

    #[test]
    fn test_mismatch_is_reported() {
        let integrity = integrity_for(DigestAlgorithm::Sha384, b"something else");
        let err = verify_integrity(BODY, &integrity).unwrap_err();
        assert_eq!(err.code(), DiagnosticCode::IntegrityMismatch);
    }

    #[test]
    fn test_first_supported_token_wins() {
        let good = integrity_for(DigestAlgorithm::Sha256, BODY);
        let bad = integrity_for(DigestAlgorithm::Sha512, b"other");
        assert!(verify_integrity(BODY, &format!("md5-xyz {}?ct=js {}", good, bad)).is_ok());
        assert!(verify_integrity(BODY, &format!("{} {}", bad, good)).is_err());
    }

    #[test]
    fn test_unsupported_only_fails() {
        let err = verify_integrity(BODY, "md5-abc sha1-def").unwrap_err();
        assert_eq!(err, IntegrityError::Unsupported("md5-abc sha1-def".to_string()));
        assert_eq!(err.code(), DiagnosticCode::IntegrityCheckFailed);
    }

    #[test]
    fn test_malformed_base64() {
        let err = verify_integrity(BODY, "sha256-@@@").unwrap_err();
        assert!(matches!(err, IntegrityError::Malformed { .. }));
    }
}
