//! Signing key material for ES256 access tokens.
//!
//! The key pair comes from a [`KeySource`]: PEM files on disk, PEM held in an
//! environment variable (how the secret store hands keys to the process), or
//! PEM supplied inline. Loading is lazy and memoised on success only, so a
//! missing secret makes requests fail with "unavailable" until it appears.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use p256::{PublicKey, SecretKey};
use tokio::sync::OnceCell;

use crate::error::KeyError;

/// Where the server's P-256 key pair is read from.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// PEM files on disk.
    File {
        private_key_path: PathBuf,
        public_key_path: Option<PathBuf>,
    },
    /// PEM documents held in the named environment variables.
    Secret {
        private_key_env: String,
        public_key_env: Option<String>,
    },
    /// PEM documents supplied directly.
    Pem {
        private_key: String,
        public_key: Option<String>,
    },
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File { private_key_path, public_key_path } => f
                .debug_struct("File")
                .field("private_key_path", private_key_path)
                .field("public_key_path", public_key_path)
                .finish(),
            Self::Secret { private_key_env, public_key_env } => f
                .debug_struct("Secret")
                .field("private_key_env", private_key_env)
                .field("public_key_env", public_key_env)
                .finish(),
            Self::Pem { .. } => f.write_str("Pem(<redacted>)"),
        }
    }
}

/// A loaded signing key and its public half.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl KeyPair {
    /// Build a pair from a private key, deriving the public key.
    #[must_use]
    pub fn from_signing_key(signing: SigningKey) -> Self {
        let verifying = *signing.verifying_key();
        Self { signing, verifying }
    }

    /// Parse a PEM private key (PKCS#8 or SEC1) and an optional SPKI public key.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Invalid` for unparseable PEM and `KeyError::Mismatch`
    /// when the public key does not belong to the private key.
    pub fn from_pem(private_pem: &str, public_pem: Option<&str>) -> Result<Self, KeyError> {
        let secret = if private_pem.contains("BEGIN EC PRIVATE KEY") {
            SecretKey::from_sec1_pem(private_pem)
                .map_err(|e| KeyError::invalid("EC private key", e))?
        } else {
            SecretKey::from_pkcs8_pem(private_pem)
                .map_err(|e| KeyError::invalid("EC private key", e))?
        };
        let pair = Self::from_signing_key(SigningKey::from(secret));

        if let Some(public_pem) = public_pem {
            let public = PublicKey::from_public_key_pem(public_pem)
                .map_err(|e| KeyError::invalid("EC public key", e))?;
            if public.to_encoded_point(false) != pair.verifying.to_encoded_point(false) {
                return Err(KeyError::Mismatch);
            }
        }
        Ok(pair)
    }

    #[must_use]
    pub const fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    #[must_use]
    pub const fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").finish()
    }
}

/// Supplies the server's signing key pair.
#[async_trait]
pub trait KeyMaterialProvider: Send + Sync {
    async fn key_pair(&self) -> Result<Arc<KeyPair>, KeyError>;
}

/// Loads the key pair from the configured [`KeySource`] on first use.
pub struct ConfiguredKeyProvider {
    source: Option<KeySource>,
    loaded: OnceCell<Arc<KeyPair>>,
}

impl ConfiguredKeyProvider {
    #[must_use]
    pub fn new(source: Option<KeySource>) -> Self {
        Self {
            source,
            loaded: OnceCell::new(),
        }
    }

    async fn load(&self) -> Result<Arc<KeyPair>, KeyError> {
        let source = self.source.as_ref().ok_or(KeyError::NotConfigured)?;
        let (private_pem, public_pem) = match source {
            KeySource::File { private_key_path, public_key_path } => {
                let private = tokio::fs::read_to_string(private_key_path)
                    .await
                    .map_err(|e| KeyError::unreadable("private key file", e))?;
                let public = match public_key_path {
                    Some(path) => Some(
                        tokio::fs::read_to_string(path)
                            .await
                            .map_err(|e| KeyError::unreadable("public key file", e))?,
                    ),
                    None => None,
                };
                (private, public)
            }
            KeySource::Secret { private_key_env, public_key_env } => {
                let private = std::env::var(private_key_env)
                    .map_err(|e| KeyError::unreadable("private key secret", e))?;
                let public = public_key_env
                    .as_deref()
                    .map(std::env::var)
                    .transpose()
                    .map_err(|e| KeyError::unreadable("public key secret", e))?;
                (private, public)
            }
            KeySource::Pem { private_key, public_key } => (private_key.clone(), public_key.clone()),
        };

        let pair = KeyPair::from_pem(&private_pem, public_pem.as_deref())?;
        tracing::info!("Loaded ES256 signing key");
        Ok(Arc::new(pair))
    }
}

#[async_trait]
impl KeyMaterialProvider for ConfiguredKeyProvider {
    async fn key_pair(&self) -> Result<Arc<KeyPair>, KeyError> {
        self.loaded.get_or_try_init(|| self.load()).await.cloned()
    }
}

/// A provider holding an already-loaded key pair.
pub struct StaticKeyProvider {
    pair: Arc<KeyPair>,
}

impl StaticKeyProvider {
    #[must_use]
    pub fn new(pair: KeyPair) -> Self {
        Self {
            pair: Arc::new(pair),
        }
    }
}

#[async_trait]
impl KeyMaterialProvider for StaticKeyProvider {
    async fn key_pair(&self) -> Result<Arc<KeyPair>, KeyError> {
        Ok(Arc::clone(&self.pair))
    }
}
