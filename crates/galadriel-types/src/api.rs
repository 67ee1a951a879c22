//! json bodies exchanged over the admin, harvester and local surfaces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConsentStatus, RelationshipId, TrustDomain, TrustDomainId};

/// response header set when a bearer jwt is close to expiry.
pub const RENEW_TOKEN_HEADER: &str = "x-galadriel-renew-token";

/// map of trust domain name to bundle digest.
pub type DigestMap = BTreeMap<String, String>;

/// error body returned for every non-401 failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// machine-readable error kind
    pub code: String,
    /// sanitized human-readable detail
    pub message: String,
}

// ─── Admin ───────────────────────────────────────────────────────────────────

/// `PUT /trust-domain`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTrustDomainRequest {
    /// spiffe trust domain name
    pub name: String,
    /// optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// `PUT /trust-domain/{name}`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTrustDomainRequest {
    /// new description
    #[serde(default)]
    pub description: Option<String>,
    /// new onboarding bundle (pem)
    #[serde(default)]
    pub onboarding_bundle: Option<String>,
}

/// trust domain as rendered on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDomainResponse {
    /// trust domain id
    pub id: TrustDomainId,
    /// trust domain name
    pub name: String,
    /// description
    pub description: Option<String>,
    /// spiffe id of the onboarded harvester
    pub harvester_spiffe_id: Option<String>,
    /// onboarding bundle
    pub onboarding_bundle: Option<String>,
    /// creation time
    pub created_at: DateTime<Utc>,
    /// last modification time
    pub updated_at: DateTime<Utc>,
}

impl From<TrustDomain> for TrustDomainResponse {
    fn from(td: TrustDomain) -> Self {
        Self {
            id: td.id,
            name: td.name.into_inner(),
            description: td.description,
            harvester_spiffe_id: td.harvester_spiffe_id,
            onboarding_bundle: td.onboarding_bundle,
            created_at: td.created_at,
            updated_at: td.updated_at,
        }
    }
}

/// `GET /trust-domain/{name}/join-token` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinTokenResponse {
    /// the token to hand to the harvester operator
    pub token: String,
    /// trust domain the token onboards
    pub trust_domain: String,
    /// expiry
    pub expires_at: DateTime<Utc>,
}

/// `PUT /relationships`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRelationshipRequest {
    /// first trust domain
    pub trust_domain_a_name: String,
    /// second trust domain
    pub trust_domain_b_name: String,
}

/// admin `PATCH /relationships/{id}`; absent sides are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRelationshipRequest {
    /// new consent for side a
    #[serde(default)]
    pub trust_domain_a_consent: Option<ConsentStatus>,
    /// new consent for side b
    #[serde(default)]
    pub trust_domain_b_consent: Option<ConsentStatus>,
}

/// relationship as rendered on the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipResponse {
    /// relationship id
    pub id: RelationshipId,
    /// side a id
    pub trust_domain_a_id: TrustDomainId,
    /// side a name
    pub trust_domain_a_name: String,
    /// side b id
    pub trust_domain_b_id: TrustDomainId,
    /// side b name
    pub trust_domain_b_name: String,
    /// side a consent
    pub trust_domain_a_consent: ConsentStatus,
    /// side b consent
    pub trust_domain_b_consent: ConsentStatus,
    /// creation time
    pub created_at: DateTime<Utc>,
    /// last modification time
    pub updated_at: DateTime<Utc>,
}

// ─── Harvester ───────────────────────────────────────────────────────────────

/// `POST /trust-domain/onboard` and `POST /trust-domain/{name}/certificate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// pem pkcs#10 certificate signing request
    pub csr: String,
}

/// an issued harvester client certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateResponse {
    /// pem leaf certificate
    pub certificate: String,
    /// spiffe id bound into the certificate
    pub spiffe_id: String,
    /// not-after of the certificate
    pub expires_at: DateTime<Utc>,
}

/// `GET /trust-domain/{name}/jwt` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtResponse {
    /// compact rs256 jwt
    pub token: String,
    /// `exp` of the token
    pub expires_at: DateTime<Utc>,
}

/// `PUT /trust-domain/{name}/bundles`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutBundleRequest {
    /// trust domain the bundle belongs to
    pub trust_domain: String,
    /// bundle bytes as utf-8 (pem)
    pub trust_bundle: String,
    /// base64 signature over `trust_bundle`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// pem certificate of the signer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_certificate: Option<String>,
    /// base64 sha-256 of `trust_bundle`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// one peer bundle delivered by `/bundles/sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleUpdate {
    /// peer trust domain
    pub trust_domain: String,
    /// bundle bytes as utf-8 (pem)
    pub trust_bundle: String,
    /// base64 sha-256 of `trust_bundle`
    pub digest: String,
    /// base64 signature over `trust_bundle`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// pem certificate of the signer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_certificate: Option<String>,
}

/// `POST /trust-domain/{name}/bundles/sync` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// bundles the caller is missing or holds stale copies of
    pub updates: BTreeMap<String, BundleUpdate>,
    /// every eligible peer and its current digest
    pub state: DigestMap,
}

/// harvester and local `PATCH /relationships/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRequest {
    /// consent for the caller's side
    pub consent_status: ConsentStatus,
}

/// a relationship seen from one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvesterRelationship {
    /// relationship id
    pub id: RelationshipId,
    /// the other trust domain
    pub peer_trust_domain: String,
    /// consent of the caller's side
    pub consent_status: ConsentStatus,
    /// consent of the peer's side
    pub peer_consent_status: ConsentStatus,
    /// creation time
    pub created_at: DateTime<Utc>,
    /// last modification time
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_request_is_flat_map() {
        let body: DigestMap = serde_json::from_str(r#"{"a.test":"abc"}"#).unwrap();
        assert_eq!(body.get("a.test").map(String::as_str), Some("abc"));
        let empty: DigestMap = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_put_bundle_optional_fields() {
        let req: PutBundleRequest =
            serde_json::from_str(r#"{"trust_domain":"a.test","trust_bundle":"BYTES-A"}"#)
                .unwrap();
        assert!(req.signature.is_none());
        assert!(req.digest.is_none());

        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("signature"));
    }

    #[test]
    fn test_consent_request_rejects_unknown_status() {
        assert!(serde_json::from_str::<ConsentRequest>(r#"{"consent_status":"maybe"}"#).is_err());
        let ok: ConsentRequest =
            serde_json::from_str(r#"{"consent_status":"approved"}"#).unwrap();
        assert_eq!(ok.consent_status, ConsentStatus::Approved);
    }
}
