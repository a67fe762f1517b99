//! ES256 access tokens and JWKS publication.
//!
//! Tokens are compact JWS: `base64url(header).base64url(claims).base64url(sig)`.
//! The ECDSA signer emits ASN.1 DER, which JOSE does not accept; [`der_to_jose`]
//! rewrites it into the fixed 64-byte `r || s` form.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use p256::EncodedPoint;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{DerSignature, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::KeyError;
use crate::keys::KeyMaterialProvider;

const ALG_ES256: &str = "ES256";
const COORDINATE_LEN: usize = 32;

/// JOSE header of an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AccessTokenClaims {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() > self.exp
    }
}

/// A public EC key as published in the JWKS document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub kty: String,
    pub crv: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub x: String,
    pub y: String,
}

/// JSON Web Key Set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<EcJwk>,
}

impl JwkSet {
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&EcJwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }
}

/// Reasons an access token fails verification.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not a compact JWS")]
    Malformed,

    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("verification key is not a valid P-256 key")]
    InvalidKey,

    #[error("token signature is invalid")]
    BadSignature,
}

/// Signs access tokens with the server's P-256 key.
pub struct TokenSigner {
    keys: Arc<dyn KeyMaterialProvider>,
    issuer: String,
    key_id: String,
    access_token_ttl: Duration,
}

impl TokenSigner {
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyMaterialProvider>,
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        access_token_ttl: Duration,
    ) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            key_id: key_id.into(),
            access_token_ttl,
        }
    }

    /// Lifetime of issued access tokens, reported as `expires_in`.
    #[must_use]
    pub const fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Build and sign an access token issued at `now`.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` if the signing key cannot be loaded or the signature
    /// cannot be encoded.
    pub async fn issue_access_token(
        &self,
        subject: &str,
        audience: &str,
        scope: Option<&str>,
        client_id: &str,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, KeyError> {
        let keys = self.keys.key_pair().await?;

        let ttl = i64::try_from(self.access_token_ttl.as_secs()).unwrap_or(i64::MAX);
        let iat = now.timestamp();
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_owned(),
            aud: audience.to_owned(),
            iat,
            exp: iat.saturating_add(ttl),
            scope: scope.map(str::to_owned),
            client_id: client_id.to_owned(),
            email: email.map(str::to_owned),
        };
        let header = Header {
            alg: ALG_ES256.to_owned(),
            typ: "JWT".to_owned(),
            kid: Some(self.key_id.clone()),
        };

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let der: DerSignature = keys.signing_key().sign(signing_input.as_bytes());
        let jose = der_to_jose(der.as_bytes())?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(jose)))
    }

    /// The public key set to publish at `/jwks.json`.
    ///
    /// # Errors
    ///
    /// Returns `KeyError` if the key material cannot be loaded.
    pub async fn jwks(&self) -> Result<JwkSet, KeyError> {
        let keys = self.keys.key_pair().await?;
        Ok(JwkSet {
            keys: vec![ec_jwk(keys.verifying_key(), &self.key_id)?],
        })
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("issuer", &self.issuer)
            .field("key_id", &self.key_id)
            .field("access_token_ttl", &self.access_token_ttl)
            .finish()
    }
}

fn ec_jwk(key: &VerifyingKey, kid: &str) -> Result<EcJwk, KeyError> {
    let point = key.to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(KeyError::invalid("EC public key", "point at infinity"));
    };
    Ok(EcJwk {
        kty: "EC".to_owned(),
        crv: "P-256".to_owned(),
        alg: ALG_ES256.to_owned(),
        key_use: "sig".to_owned(),
        kid: kid.to_owned(),
        x: URL_SAFE_NO_PAD.encode(fixed_width(x)),
        y: URL_SAFE_NO_PAD.encode(fixed_width(y)),
    })
}

/// Left-pad (or keep the low-order bytes of) a big-endian integer to 32 bytes.
fn fixed_width(bytes: &[u8]) -> [u8; COORDINATE_LEN] {
    let mut out = [0u8; COORDINATE_LEN];
    let bytes = &bytes[bytes.len().saturating_sub(COORDINATE_LEN)..];
    out[COORDINATE_LEN - bytes.len()..].copy_from_slice(bytes);
    out
}

/// Convert a DER `ECDSA-Sig-Value` into the 64-byte JOSE `r || s` form.
///
/// Each integer has its sign-padding stripped, then is left-padded with zeros
/// (or truncated to its low 32 bytes) to exactly 32 bytes.
///
/// # Errors
///
/// Returns `KeyError::MalformedSignature` if `der` is not a well-formed
/// `SEQUENCE { INTEGER r, INTEGER s }`.
pub fn der_to_jose(der: &[u8]) -> Result<[u8; 64], KeyError> {
    let mut reader = DerReader { input: der };
    let mut body = DerReader {
        input: reader.read_tlv(0x30)?,
    };
    if !reader.input.is_empty() {
        return Err(KeyError::MalformedSignature("trailing bytes after sequence"));
    }
    let r = body.read_tlv(0x02)?;
    let s = body.read_tlv(0x02)?;
    if !body.input.is_empty() {
        return Err(KeyError::MalformedSignature("trailing bytes in sequence"));
    }
    if r.is_empty() || s.is_empty() {
        return Err(KeyError::MalformedSignature("empty integer"));
    }

    let mut jose = [0u8; 64];
    jose[..COORDINATE_LEN].copy_from_slice(&fixed_width(r));
    jose[COORDINATE_LEN..].copy_from_slice(&fixed_width(s));
    Ok(jose)
}

struct DerReader<'a> {
    input: &'a [u8],
}

impl<'a> DerReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], KeyError> {
        if self.input.len() < n {
            return Err(KeyError::MalformedSignature("truncated input"));
        }
        let (head, rest) = self.input.split_at(n);
        self.input = rest;
        Ok(head)
    }

    fn read_tlv(&mut self, tag: u8) -> Result<&'a [u8], KeyError> {
        let [found] = self.take(1)? else {
            return Err(KeyError::MalformedSignature("truncated input"));
        };
        if *found != tag {
            return Err(KeyError::MalformedSignature("unexpected tag"));
        }
        let [first] = self.take(1)? else {
            return Err(KeyError::MalformedSignature("truncated input"));
        };
        let len = match *first {
            short if short < 0x80 => usize::from(short),
            0x81 => match self.take(1)? {
                [long] if *long >= 0x80 => usize::from(*long),
                _ => return Err(KeyError::MalformedSignature("non-minimal length")),
            },
            _ => return Err(KeyError::MalformedSignature("unsupported length form")),
        };
        self.take(len)
    }
}

/// Verify an ES256 token against a published JWK and return its claims.
///
/// Only the signature and algorithm are checked; expiry and audience are the
/// caller's policy.
pub fn verify_access_token(token: &str, jwk: &EcJwk) -> Result<AccessTokenClaims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let header: Header = decode_segment(header_b64)?;
    if header.alg != ALG_ES256 {
        return Err(TokenError::UnsupportedAlgorithm(header.alg));
    }

    let verifying_key = jwk_verifying_key(jwk)?;
    let signature_bytes = URL_SAFE_NO_PAD.decode(signature_b64).map_err(|_| TokenError::Malformed)?;
    let signature = Signature::from_slice(&signature_bytes).map_err(|_| TokenError::BadSignature)?;
    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| TokenError::BadSignature)?;

    decode_segment(claims_b64)
}

fn jwk_verifying_key(jwk: &EcJwk) -> Result<VerifyingKey, TokenError> {
    if jwk.kty != "EC" || jwk.crv != "P-256" {
        return Err(TokenError::InvalidKey);
    }
    let x = decode_coordinate(&jwk.x)?;
    let y = decode_coordinate(&jwk.y)?;
    let point = EncodedPoint::from_affine_coordinates(
        &p256::FieldBytes::from(x),
        &p256::FieldBytes::from(y),
        false,
    );
    VerifyingKey::from_encoded_point(&point).map_err(|_| TokenError::InvalidKey)
}

/// A base64url field element of exactly 32 bytes.
fn decode_coordinate(value: &str) -> Result<[u8; COORDINATE_LEN], TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(value).map_err(|_| TokenError::InvalidKey)?;
    <[u8; COORDINATE_LEN]>::try_from(bytes.as_slice()).map_err(|_| TokenError::InvalidKey)
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
