//! Records held by the ledgers, the client registry and the user directory.
//!
//! Records are plain values: stores hand out copies and apply mutations
//! only through their own methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only token endpoint auth method accepted for registered clients.
pub const AUTH_METHOD_NONE: &str = "none";

/// The only PKCE method accepted.
pub const PKCE_METHOD_S256: &str = "S256";

/// A dynamically registered public OAuth client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ClientRecord {
    /// Check whether `redirect_uri` is one of the registered URIs (exact match).
    #[must_use]
    pub fn allows_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Last-used time, or creation time for a client that was never used.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_used_at.unwrap_or(self.created_at)
    }
}

/// An authorization request waiting for federated login or consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestRecord {
    /// Correlation token carried through login and consent as `state`.
    pub id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub resource: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    /// The `state` the client sent, returned on the final redirect.
    pub original_state: Option<String>,
    /// Set once the user has been identified.
    pub user_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthRequestRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A single-use, PKCE-bound authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCodeRecord {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub resource: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl AuthorizationCodeRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

/// A rotating, single-use refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: Option<String>,
    pub resource: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    /// Successor issued when this token was redeemed.
    pub rotated_to: Option<String>,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

/// Identity asserted by the federated provider after ID-token verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
}

/// Profile data kept for a federated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub google_sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

impl UserRecord {
    /// Merge a fresh login into an existing profile, keeping the creation time
    /// and any previously known fields the provider did not send again.
    #[must_use]
    pub fn merge_login(
        existing: Option<Self>,
        identity: &FederatedIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        match existing {
            Some(mut user) => {
                if identity.email.is_some() {
                    user.email.clone_from(&identity.email);
                }
                if identity.email_verified.is_some() {
                    user.email_verified = identity.email_verified;
                }
                user.last_login_at = now;
                user
            }
            None => Self {
                user_id: identity.subject.clone(),
                google_sub: identity.subject.clone(),
                email: identity.email.clone(),
                email_verified: identity.email_verified,
                created_at: now,
                last_login_at: now,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn client(last_used_at: Option<DateTime<Utc>>) -> ClientRecord {
        ClientRecord {
            client_id: "c1".into(),
            client_name: None,
            redirect_uris: vec!["https://cb".into(), "https://cb/alt".into()],
            token_endpoint_auth_method: AUTH_METHOD_NONE.into(),
            created_at: DateTime::from_timestamp(1_000, 0).unwrap(),
            last_used_at,
        }
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let c = client(None);
        assert!(c.allows_redirect_uri("https://cb"));
        assert!(c.allows_redirect_uri("https://cb/alt"));
        assert!(!c.allows_redirect_uri("https://cb/"));
        assert!(!c.allows_redirect_uri("https://evil"));
    }

    #[test]
    fn test_last_activity_falls_back_to_creation() {
        assert_eq!(client(None).last_activity(), DateTime::from_timestamp(1_000, 0).unwrap());
        let used = DateTime::from_timestamp(5_000, 0).unwrap();
        assert_eq!(client(Some(used)).last_activity(), used);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let record = AuthRequestRecord {
            id: "r".into(),
            client_id: "c".into(),
            redirect_uri: "https://cb".into(),
            scope: None,
            resource: None,
            code_challenge: "x".into(),
            code_challenge_method: PKCE_METHOD_S256.into(),
            original_state: None,
            user_id: None,
            expires_at: now,
        };
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::seconds(1)));
    }

    #[test]
    fn test_merge_login_keeps_created_at() {
        let first = Utc::now() - Duration::days(3);
        let identity = FederatedIdentity {
            subject: "sub-1".into(),
            email: Some("a@example.com".into()),
            email_verified: Some(true),
        };
        let user = UserRecord::merge_login(None, &identity, first);
        assert_eq!(user.created_at, first);

        let later = Utc::now();
        let relogin = FederatedIdentity {
            subject: "sub-1".into(),
            email: None,
            email_verified: None,
        };
        let merged = UserRecord::merge_login(Some(user), &relogin, later);
        assert_eq!(merged.created_at, first);
        assert_eq!(merged.last_login_at, later);
        assert_eq!(merged.email.as_deref(), Some("a@example.com"));
    }
}
