//! single-use onboarding tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{JoinTokenId, TrustDomainId};

/// a one-shot bearer credential scoped to a trust domain.
///
/// once `used` is set it is never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinToken {
    /// store-assigned id, nil until created
    pub id: JoinTokenId,

    /// random uuid v4 presented by the harvester
    pub token: String,

    /// trust domain the token onboards
    pub trust_domain_id: TrustDomainId,

    /// token is not honoured at or after this instant
    pub expires_at: DateTime<Utc>,

    /// token has been exchanged for a certificate
    pub used: bool,

    /// when this token was created
    pub created_at: DateTime<Utc>,

    /// when this token was last written
    pub updated_at: DateTime<Utc>,
}

impl JoinToken {
    /// mint a fresh token valid for `ttl`.
    pub fn generate(trust_domain_id: TrustDomainId, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: JoinTokenId::nil(),
            token: Uuid::new_v4().to_string(),
            trust_domain_id,
            expires_at: now + ttl,
            used: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// check if the token has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// check if the token may still be exchanged.
    pub fn is_valid(&self) -> bool {
        !self.used && !self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_uuid() {
        let token = JoinToken::generate(TrustDomainId::new_random(), Duration::seconds(60));
        assert!(Uuid::parse_str(&token.token).is_ok());
        assert!(token.is_valid());
    }

    #[test]
    fn test_expired_and_used() {
        let mut token = JoinToken::generate(TrustDomainId::new_random(), Duration::seconds(-1));
        assert!(token.is_expired());
        assert!(!token.is_valid());

        token.expires_at = Utc::now() + Duration::seconds(60);
        token.used = true;
        assert!(!token.is_valid());
    }
}
