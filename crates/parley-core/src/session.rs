//! Session and credentials
//!
//! A `Session` pairs the bearer token with the local user's identity.
//! Components never cache credentials: they ask a `CredentialSource` at
//! call time, so a logout or token swap takes effect immediately.

use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::models::UserId;

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user_id: UserId,
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Claims we read from a JWT-shaped token
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    exp: Option<i64>,
}

impl Session {
    /// Create a session from an opaque token and a known user id
    pub fn new(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
            expires_at: None,
        }
    }

    /// Create a session from a JWT-shaped token
    ///
    /// The user id comes from the `sub` claim. The signature is not
    /// verified here; the server does that on every request.
    pub fn from_token(token: &str) -> SyncResult<Self> {
        let mut parts = token.split('.');
        let claims_segment = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(claims), Some(_), None) => claims,
            _ => return Err(SyncError::Auth("token is not a JWT".to_string())),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(claims_segment.trim_end_matches('='))
            .map_err(|e| SyncError::Auth(format!("token claims are not base64: {}", e)))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Auth(format!("token claims are invalid: {}", e)))?;

        if claims.sub.is_empty() {
            return Err(SyncError::Auth("token has an empty subject".to_string()));
        }

        let expires_at = match claims.exp {
            Some(exp) => Some(
                Utc.timestamp_opt(exp, 0)
                    .single()
                    .ok_or_else(|| SyncError::Auth("token expiry is out of range".to_string()))?,
            ),
            None => None,
        };

        let session = Self {
            user_id: UserId::new(claims.sub),
            token: token.to_string(),
            expires_at,
        };

        if session.is_expired() {
            return Err(SyncError::Auth("token has expired".to_string()));
        }

        Ok(session)
    }

    /// Build the session described by the configuration
    ///
    /// An explicit `user_id` wins over the token's `sub` claim, which lets
    /// opaque (non-JWT) tokens work.
    pub fn from_config(config: &Config) -> SyncResult<Self> {
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| SyncError::Auth("no token configured".to_string()))?;

        match config.user_id {
            Some(ref user_id) => Ok(Self::new(user_id.as_str(), token)),
            None => Self::from_token(token),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Check if the token's expiry has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }
}

/// Supplies the current session at call time
pub trait CredentialSource: Send + Sync {
    /// The current valid session, if any
    fn current(&self) -> Option<Session>;
}

/// Credentials held in memory
#[derive(Debug, Default)]
pub struct StaticCredentials {
    session: Mutex<Option<Session>>,
}

impl StaticCredentials {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Credentials from the configured token (empty if none is usable)
    pub fn from_config(config: &Config) -> Self {
        match Session::from_config(config) {
            Ok(session) => Self::new(Some(session)),
            Err(e) => {
                tracing::warn!("No usable credential: {}", e);
                Self::new(None)
            }
        }
    }

    /// Replace the session
    pub fn set(&self, session: Session) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Forget the session
    pub fn clear(&self) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialSource for StaticCredentials {
    fn current(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|s| !s.is_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_from_token_reads_subject() {
        let session = Session::from_token(&jwt(r#"{"sub":"alice"}"#)).unwrap();
        assert_eq!(session.user_id().as_str(), "alice");
        assert!(session.expires_at().is_none());
        assert!(!session.is_expired());
    }

    #[test]
    fn test_from_token_rejects_expired() {
        let err = Session::from_token(&jwt(r#"{"sub":"alice","exp":1000}"#)).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_from_token_accepts_future_expiry() {
        let exp = Utc::now().timestamp() + 3600;
        let session = Session::from_token(&jwt(&format!(r#"{{"sub":"bob","exp":{}}}"#, exp)))
            .unwrap();
        assert_eq!(session.user_id().as_str(), "bob");
        assert!(session.expires_at().is_some());
    }

    #[test]
    fn test_from_token_rejects_garbage() {
        assert!(Session::from_token("not-a-token").unwrap_err().is_auth());
        assert!(Session::from_token("a.!!!.c").unwrap_err().is_auth());
        assert!(Session::from_token(&jwt(r#"{"sub":""}"#))
            .unwrap_err()
            .is_auth());
    }

    #[test]
    fn test_from_config_prefers_explicit_user() {
        let config = Config {
            token: Some("opaque-token".to_string()),
            user_id: Some("carol".to_string()),
            ..Config::default()
        };

        let session = Session::from_config(&config).unwrap();
        assert_eq!(session.user_id().as_str(), "carol");
        assert_eq!(session.token(), "opaque-token");
    }

    #[test]
    fn test_from_config_without_token() {
        let err = Session::from_config(&Config::default()).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new(None);
        assert!(creds.current().is_none());

        creds.set(Session::new("alice", "t"));
        assert_eq!(creds.current().unwrap().user_id().as_str(), "alice");

        creds.clear();
        assert!(creds.current().is_none());
    }
}
