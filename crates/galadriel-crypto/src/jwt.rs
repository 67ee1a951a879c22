//! rs256 bearer tokens for harvester authentication.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};

use galadriel_types::TrustDomainName;

use crate::{Error, KeyManager, Result};

/// ttl applied when the caller asks for zero.
pub const DEFAULT_JWT_TTL: Duration = Duration::from_secs(10 * 60);

/// claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// issuer
    pub iss: String,
    /// trust domain of the harvester
    pub sub: String,
    /// audiences
    pub aud: Vec<String>,
    /// issued at (unix seconds)
    pub iat: i64,
    /// expiry (unix seconds)
    pub exp: i64,
}

impl Claims {
    /// lifetime the token was issued with.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs((self.exp - self.iat).max(0) as u64)
    }

    /// time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        Duration::from_secs((self.exp - Utc::now().timestamp()).max(0) as u64)
    }

    /// true once less than a third of the lifetime is left.
    pub fn should_renew(&self) -> bool {
        self.remaining() * 3 < self.ttl()
    }

    /// expiry as a timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

/// a freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// compact jws
    pub token: String,
    /// its claims
    pub claims: Claims,
}

/// signs tokens with a key manager key, naming it in the `kid` header.
#[derive(Clone)]
pub struct JwtIssuer {
    key_manager: Arc<dyn KeyManager>,
    kid: String,
    issuer: String,
    audience: Vec<String>,
}

impl JwtIssuer {
    /// create an issuer signing with key `kid`.
    pub fn new(
        key_manager: Arc<dyn KeyManager>,
        kid: impl Into<String>,
        issuer: impl Into<String>,
        audience: Vec<String>,
    ) -> Self {
        Self {
            key_manager,
            kid: kid.into(),
            issuer: issuer.into(),
            audience,
        }
    }

    /// sign a token for `subject`. a zero ttl means [`DEFAULT_JWT_TTL`].
    pub fn issue(&self, subject: &TrustDomainName, ttl: Duration) -> Result<IssuedToken> {
        let ttl = if ttl.is_zero() { DEFAULT_JWT_TTL } else { ttl };
        let key = self
            .key_manager
            .get_key(&self.kid)
            .ok_or_else(|| Error::KeyNotFound(self.kid.clone()))?;

        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        let token = encode(&header, &claims, key.encoding_key())?;
        Ok(IssuedToken { token, claims })
    }
}

/// validates tokens against key manager keys.
#[derive(Clone)]
pub struct JwtValidator {
    key_manager: Arc<dyn KeyManager>,
    expected_audience: Vec<String>,
}

impl JwtValidator {
    /// create a validator requiring every audience in `expected_audience`.
    pub fn new(key_manager: Arc<dyn KeyManager>, expected_audience: Vec<String>) -> Self {
        Self {
            key_manager,
            expected_audience,
        }
    }

    /// verify signature, expiry and audience, returning the claims.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| Error::InvalidToken("missing kid header".to_string()))?;
        let key = self
            .key_manager
            .get_key(&kid)
            .ok_or_else(|| Error::InvalidToken(format!("unknown kid {kid:?}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        // audience is checked below: every expected audience must be present
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iat"]);

        let data = decode::<Claims>(token, key.decoding_key(), &validation)?;
        let claims = data.claims;

        if claims.exp <= Utc::now().timestamp() {
            return Err(Error::InvalidToken("token expired".to_string()));
        }
        for aud in &self.expected_audience {
            if !claims.aud.contains(aud) {
                return Err(Error::AudienceMismatch(aud.clone()));
            }
        }
        Ok(claims)
    }
}
