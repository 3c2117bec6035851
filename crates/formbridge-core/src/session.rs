use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::{DEFAULT_SESSION_TTL_HOURS, SessionConfig};

type HmacSha256 = Hmac<Sha256>;

/// How long an OAuth login attempt may take between redirect and callback.
pub const OAUTH_STATE_TTL: Duration = Duration::minutes(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

/// Claims carried by the `token` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: i64,
}

/// Claims carried by the short-lived cookie that ties an OAuth callback to
/// the browser that started the login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthStateClaims {
    pub state: String,
    pub verifier: String,
    pub exp: i64,
}

trait Expiring {
    fn exp(&self) -> i64;
}

impl Expiring for SessionClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl Expiring for OAuthStateClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// Signs and verifies `base64url(json).hex(hmac)` tokens.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            secret: config.secret.as_bytes().to_vec(),
            ttl: config
                .ttl()
                .unwrap_or_else(|| Duration::hours(DEFAULT_SESSION_TTL_HOURS)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue_session(&self, user_id: &str, now: DateTime<Utc>) -> Result<String, SessionError> {
        self.sign(&SessionClaims {
            sub: user_id.to_string(),
            exp: (now + self.ttl).timestamp(),
        })
    }

    pub fn verify_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims, SessionError> {
        self.verify(token, now)
    }

    pub fn issue_oauth_state(
        &self,
        state: &str,
        verifier: &str,
        now: DateTime<Utc>,
    ) -> Result<String, SessionError> {
        self.sign(&OAuthStateClaims {
            state: state.to_string(),
            verifier: verifier.to_string(),
            exp: (now + OAUTH_STATE_TTL).timestamp(),
        })
    }

    pub fn verify_oauth_state(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<OAuthStateClaims, SessionError> {
        self.verify(token, now)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, SessionError> {
        let json = serde_json::to_vec(claims).map_err(|_| SessionError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = hex::encode(self.mac(&payload).finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    fn verify<T>(&self, token: &str, now: DateTime<Utc>) -> Result<T, SessionError>
    where
        T: DeserializeOwned + Expiring,
    {
        let (payload, signature) = token.split_once('.').ok_or(SessionError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| SessionError::Malformed)?;
        self.mac(payload)
            .verify_slice(&signature)
            .map_err(|_| SessionError::InvalidSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::Malformed)?;
        let claims: T = serde_json::from_slice(&json).map_err(|_| SessionError::Malformed)?;
        if claims.exp() <= now.timestamp() {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(payload.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(secret: &str) -> SessionSigner {
        SessionSigner::new(&SessionConfig {
            secret: secret.into(),
            ttl_hours: 2,
            secure_cookies: false,
        })
    }

    #[test]
    fn session_round_trips() {
        let signer = signer("s3cret");
        let now = Utc::now();
        let token = signer.issue_session("user-1", now).expect("sign");

        let claims = signer.verify_session(&token, now).expect("verify");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp, (now + Duration::hours(2)).timestamp());
    }

    #[test]
    fn out_of_range_ttl_falls_back_to_default() {
        for ttl_hours in [i64::MAX, 0, -1] {
            let signer = SessionSigner::new(&SessionConfig {
                secret: "s3cret".into(),
                ttl_hours,
                secure_cookies: false,
            });
            assert_eq!(signer.ttl(), Duration::hours(DEFAULT_SESSION_TTL_HOURS));

            let now = Utc::now();
            let token = signer.issue_session("user-1", now).expect("sign");
            assert!(signer.verify_session(&token, now).is_ok());
        }
    }

    #[test]
    fn expired_sessions_are_rejected() {
        let signer = signer("s3cret");
        let issued = Utc::now() - Duration::hours(3);
        let token = signer.issue_session("user-1", issued).expect("sign");

        assert_eq!(
            signer.verify_session(&token, Utc::now()),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let now = Utc::now();
        let token = signer("s3cret").issue_session("user-1", now).expect("sign");

        assert_eq!(
            signer("other").verify_session(&token, now),
            Err(SessionError::InvalidSignature)
        );

        let (_, signature) = token.split_once('.').expect("dot");
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"admin","exp":99999999999}"#);
        assert_eq!(
            signer("s3cret").verify_session(&format!("{forged_payload}.{signature}"), now),
            Err(SessionError::InvalidSignature)
        );
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let signer = signer("s3cret");
        let now = Utc::now();
        for token in ["", "no-dot", "abc.not-hex", "abc."] {
            assert!(signer.verify_session(token, now).is_err(), "token {token:?}");
        }
        assert_eq!(
            signer.verify_session("no-dot", now),
            Err(SessionError::Malformed)
        );
    }

    #[test]
    fn oauth_state_tokens_are_not_sessions() {
        let signer = signer("s3cret");
        let now = Utc::now();
        let token = signer
            .issue_oauth_state("state-1", "verifier-1", now)
            .expect("sign");

        let claims = signer.verify_oauth_state(&token, now).expect("verify");
        assert_eq!(claims.state, "state-1");
        assert_eq!(claims.verifier, "verifier-1");
        assert_eq!(
            signer.verify_session(&token, now),
            Err(SessionError::Malformed)
        );
        assert_eq!(
            signer.verify_oauth_state(&token, now + Duration::minutes(11)),
            Err(SessionError::Expired)
        );
    }
}
