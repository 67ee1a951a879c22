//! trust bundles stored per trust domain.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::{BundleId, TrustDomainId};

/// compute the wire digest of bundle bytes: base64 of their sha-256.
pub fn bundle_digest(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// the trust bundle of one trust domain.
///
/// `digest` always equals [`bundle_digest`] of `data` once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// store-assigned id, nil until created
    pub id: BundleId,

    /// owning trust domain (at most one bundle each)
    pub trust_domain_id: TrustDomainId,

    /// opaque bundle bytes, usually pem x.509 authorities
    pub data: Vec<u8>,

    /// base64 sha-256 of `data`
    pub digest: String,

    /// detached signature over `data`
    pub signature: Option<Vec<u8>>,

    /// pem certificate whose key produced `signature`
    pub signing_certificate: Option<Vec<u8>>,

    /// when this bundle was first stored
    pub created_at: DateTime<Utc>,

    /// when this bundle was last written
    pub updated_at: DateTime<Utc>,
}

impl Bundle {
    /// create an unsigned bundle with its digest filled in.
    pub fn new(trust_domain_id: TrustDomainId, data: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: BundleId::nil(),
            trust_domain_id,
            digest: bundle_digest(&data),
            data,
            signature: None,
            signing_certificate: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// true if the stored digest matches the data.
    pub fn digest_matches(&self) -> bool {
        self.digest == bundle_digest(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_base64_sha256() {
        // sha-256 of the empty string
        assert_eq!(
            bundle_digest(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_new_bundle_digest_matches() {
        let mut bundle = Bundle::new(TrustDomainId::new_random(), b"BYTES-A".to_vec());
        assert!(bundle.digest_matches());
        bundle.data = b"BYTES-B".to_vec();
        assert!(!bundle.digest_matches());
    }
}
