//! access to the colocated spire server.
//!
//! the harvester only needs two things from spire: the local trust bundle and
//! the federation relationships it installs for peers. both go through the
//! [`SpireServer`] trait so the reconciliation loops can run against a fake.

mod grpc;

pub use grpc::GrpcSpireServer;

use std::future::Future;

use galadriel_crypto::x509;
use galadriel_types::bundle_digest;
use thiserror::Error;

/// generated protobuf types and service clients for the spire server api
pub mod pb {
    pub mod spire {
        pub mod api {
            pub mod types {
                tonic::include_proto!("spire.api.types");
            }

            pub mod server {
                pub mod bundle {
                    pub mod v1 {
                        tonic::include_proto!("spire.api.server.bundle.v1");
                    }
                }

                pub mod trustdomain {
                    pub mod v1 {
                        tonic::include_proto!("spire.api.server.trustdomain.v1");
                    }
                }
            }
        }
    }
}

/// errors talking to spire.
#[derive(Debug, Error)]
pub enum SpireError {
    /// the channel could not be set up.
    #[error("spire connection failed: {0}")]
    Connect(#[from] tonic::transport::Error),

    /// spire answered with an error status.
    #[error("spire rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// bundle bytes could not be decoded.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
}

/// the x509 part of a spire trust bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpireBundle {
    /// trust domain the bundle belongs to
    pub trust_domain: String,
    /// der encoded x509 authorities
    pub x509_authorities: Vec<Vec<u8>>,
}

impl SpireBundle {
    /// decode a pem bundle as exchanged through galadriel.
    pub fn from_pem(trust_domain: impl Into<String>, pem: &str) -> Result<Self, SpireError> {
        let x509_authorities = x509::certificates_from_pem(pem.as_bytes())
            .map_err(|e| SpireError::InvalidBundle(e.to_string()))?;
        Ok(Self {
            trust_domain: trust_domain.into(),
            x509_authorities,
        })
    }

    /// pem encoding of the x509 authorities, the form pushed to the server.
    pub fn to_pem(&self) -> String {
        x509::certificates_to_pem(self.x509_authorities.iter().map(Vec::as_slice))
    }

    /// base64 sha-256 of [`Self::to_pem`].
    pub fn digest(&self) -> String {
        bundle_digest(self.to_pem().as_bytes())
    }

    /// true when there are no x509 authorities.
    pub fn is_empty(&self) -> bool {
        self.x509_authorities.is_empty()
    }
}

/// a federation relationship as stored by spire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationRelationship {
    /// peer trust domain
    pub trust_domain: String,
    /// where spire fetches the peer bundle
    pub bundle_endpoint_url: String,
    /// the peer bundle spire currently holds
    pub bundle: Option<SpireBundle>,
}

impl FederationRelationship {
    /// relationship for a peer whose bundle is delivered through galadriel.
    ///
    /// uses the `https_web` profile with endpoint `https://<peer>/`.
    pub fn https_web(bundle: SpireBundle) -> Self {
        Self {
            bundle_endpoint_url: format!("https://{}/", bundle.trust_domain),
            trust_domain: bundle.trust_domain.clone(),
            bundle: Some(bundle),
        }
    }
}

/// outcome of one entry of a batch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// trust domain the entry refers to
    pub trust_domain: String,
    /// grpc status code, 0 on success
    pub code: i32,
    /// status message
    pub message: String,
}

impl BatchItem {
    /// true when spire applied the entry.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// the spire server operations the harvester uses.
pub trait SpireServer: Send + Sync {
    /// the local trust bundle.
    fn get_bundle(&self) -> impl Future<Output = Result<SpireBundle, SpireError>> + Send;

    /// every federation relationship with its bundle.
    fn list_federation_relationships(
        &self,
    ) -> impl Future<Output = Result<Vec<FederationRelationship>, SpireError>> + Send;

    /// create relationships for new peers.
    fn create_federation_relationships(
        &self,
        relationships: Vec<FederationRelationship>,
    ) -> impl Future<Output = Result<Vec<BatchItem>, SpireError>> + Send;

    /// replace the bundles of existing relationships.
    fn update_federation_relationships(
        &self,
        relationships: Vec<FederationRelationship>,
    ) -> impl Future<Output = Result<Vec<BatchItem>, SpireError>> + Send;

    /// delete relationships by peer trust domain.
    fn delete_federation_relationships(
        &self,
        trust_domains: Vec<String>,
    ) -> impl Future<Output = Result<Vec<BatchItem>, SpireError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use galadriel_crypto::{KeyEntry, X509Ca};
    use galadriel_types::KeyType;
    use std::time::Duration;

    fn authority(name: &str) -> Vec<u8> {
        let key = KeyEntry::generate(name, KeyType::Rsa2048).unwrap();
        X509Ca::self_signed(&key, name, Duration::from_secs(3600))
            .unwrap()
            .certificate_der()
            .to_vec()
    }

    #[test]
    fn test_pem_round_trip_keeps_digest() {
        let bundle = SpireBundle {
            trust_domain: "a.test".to_string(),
            x509_authorities: vec![authority("a-1"), authority("a-2")],
        };
        let pem = bundle.to_pem();
        let decoded = SpireBundle::from_pem("a.test", &pem).unwrap();
        assert_eq!(decoded, bundle);
        assert_eq!(decoded.digest(), bundle_digest(pem.as_bytes()));
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        assert!(matches!(
            SpireBundle::from_pem("a.test", "BYTES-A"),
            Err(SpireError::InvalidBundle(_))
        ));
    }

    #[test]
    fn test_https_web_endpoint() {
        let rel = FederationRelationship::https_web(SpireBundle {
            trust_domain: "b.test".to_string(),
            x509_authorities: vec![authority("b")],
        });
        assert_eq!(rel.trust_domain, "b.test");
        assert_eq!(rel.bundle_endpoint_url, "https://b.test/");
        assert!(rel.bundle.is_some());
    }
}
