//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements S256 code challenge verification per RFC 7636. The `plain`
//! method is not accepted anywhere.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::models::PKCE_METHOD_S256;

/// Compute the S256 challenge for a verifier: `BASE64URL(SHA256(ASCII(verifier)))`.
#[must_use]
pub fn s256_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Verify a PKCE S256 code challenge.
///
/// Computes `BASE64URL(SHA256(code_verifier))` and compares to the stored challenge.
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    s256_challenge(code_verifier) == code_challenge
}

/// Whether a declared `code_challenge_method` is supported.
#[must_use]
pub fn is_supported_method(method: Option<&str>) -> bool {
    method == Some(PKCE_METHOD_S256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s256_valid() {
        // RFC 7636 Appendix B test vector
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert!(verify_s256(verifier, challenge));
        assert_eq!(s256_challenge(verifier), challenge);
    }

    #[test]
    fn test_s256_invalid_verifier() {
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert!(!verify_s256("wrong-verifier", challenge));
    }

    #[test]
    fn test_s256_padded_challenge_rejected() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert!(!verify_s256(verifier, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM="));
    }

    #[test]
    fn test_supported_methods() {
        assert!(is_supported_method(Some("S256")));
        assert!(!is_supported_method(Some("plain")));
        assert!(!is_supported_method(Some("s256")));
        assert!(!is_supported_method(None));
    }
}
