//! spire server api over its unix socket.

use std::path::Path;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint};
use tower::service_fn;
use tracing::debug;

use super::pb::spire::api::server::bundle::v1 as bundle_pb;
use super::pb::spire::api::server::trustdomain::v1 as trustdomain_pb;
use super::pb::spire::api::types;
use super::{BatchItem, FederationRelationship, SpireBundle, SpireError, SpireServer};

use bundle_pb::bundle_client::BundleClient;
use trustdomain_pb::trust_domain_client::TrustDomainClient;

/// page size used when listing federation relationships
const LIST_PAGE_SIZE: i32 = 200;

/// spire server client speaking grpc over a unix socket.
#[derive(Debug, Clone)]
pub struct GrpcSpireServer {
    bundles: BundleClient<Channel>,
    trust_domains: TrustDomainClient<Channel>,
}

impl GrpcSpireServer {
    /// client for the spire server listening on `path`.
    ///
    /// the socket is dialed on first use and redialed after failures, so the
    /// harvester may start before spire does.
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self, SpireError> {
        let path = path.as_ref().to_owned();

        // the uri is ignored; every connection goes to the unix socket
        let channel = Endpoint::try_from("http://[::]:50051")?.connect_with_connector_lazy(
            service_fn(move |_| {
                let path = path.clone();
                async move {
                    let stream = UnixStream::connect(path).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(stream))
                }
            }),
        );
        Ok(Self::new(channel))
    }

    /// client over an existing channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            bundles: BundleClient::new(channel.clone()),
            trust_domains: TrustDomainClient::new(channel),
        }
    }
}

impl SpireServer for GrpcSpireServer {
    async fn get_bundle(&self) -> Result<SpireBundle, SpireError> {
        let request = tonic::Request::new(bundle_pb::GetBundleRequest { output_mask: None });
        let bundle = self
            .bundles
            .clone()
            .get_bundle(request)
            .await
            .map(|r| r.into_inner())?;
        Ok(bundle_from_pb(bundle))
    }

    async fn list_federation_relationships(
        &self,
    ) -> Result<Vec<FederationRelationship>, SpireError> {
        let mut client = self.trust_domains.clone();
        let mut relationships = Vec::new();
        let mut page_token = String::new();
        loop {
            let request = tonic::Request::new(trustdomain_pb::ListFederationRelationshipsRequest {
                output_mask: None,
                page_size: LIST_PAGE_SIZE,
                page_token,
            });
            let page = client
                .list_federation_relationships(request)
                .await
                .map(|r| r.into_inner())?;
            relationships.extend(
                page.federation_relationships
                    .into_iter()
                    .map(relationship_from_pb),
            );
            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }
        debug!(count = relationships.len(), "listed spire federation relationships");
        Ok(relationships)
    }

    async fn create_federation_relationships(
        &self,
        relationships: Vec<FederationRelationship>,
    ) -> Result<Vec<BatchItem>, SpireError> {
        let names = names_of(&relationships);
        let request = tonic::Request::new(trustdomain_pb::BatchCreateFederationRelationshipRequest {
            federation_relationships: relationships.into_iter().map(relationship_to_pb).collect(),
            output_mask: None,
        });
        let results = self
            .trust_domains
            .clone()
            .batch_create_federation_relationship(request)
            .await
            .map(|r| r.into_inner().results)?;
        Ok(results
            .into_iter()
            .zip(names)
            .map(|(result, requested)| {
                batch_item(
                    result.status,
                    result
                        .federation_relationship
                        .map(|r| r.trust_domain)
                        .filter(|td| !td.is_empty())
                        .unwrap_or(requested),
                )
            })
            .collect())
    }

    async fn update_federation_relationships(
        &self,
        relationships: Vec<FederationRelationship>,
    ) -> Result<Vec<BatchItem>, SpireError> {
        let names = names_of(&relationships);
        // only the bundle changes; endpoint settings made by operators survive
        let request = tonic::Request::new(trustdomain_pb::BatchUpdateFederationRelationshipRequest {
            federation_relationships: relationships.into_iter().map(relationship_to_pb).collect(),
            input_mask: Some(types::FederationRelationshipMask {
                bundle_endpoint_url: false,
                bundle_endpoint_profile: false,
                trust_domain_bundle: true,
            }),
            output_mask: None,
        });
        let results = self
            .trust_domains
            .clone()
            .batch_update_federation_relationship(request)
            .await
            .map(|r| r.into_inner().results)?;
        Ok(results
            .into_iter()
            .zip(names)
            .map(|(result, requested)| {
                batch_item(
                    result.status,
                    result
                        .federation_relationship
                        .map(|r| r.trust_domain)
                        .filter(|td| !td.is_empty())
                        .unwrap_or(requested),
                )
            })
            .collect())
    }

    async fn delete_federation_relationships(
        &self,
        trust_domains: Vec<String>,
    ) -> Result<Vec<BatchItem>, SpireError> {
        let request = tonic::Request::new(trustdomain_pb::BatchDeleteFederationRelationshipRequest {
            trust_domains: trust_domains.clone(),
        });
        let results = self
            .trust_domains
            .clone()
            .batch_delete_federation_relationship(request)
            .await
            .map(|r| r.into_inner().results)?;
        Ok(results
            .into_iter()
            .zip(trust_domains)
            .map(|(result, requested)| {
                let name = if result.trust_domain.is_empty() {
                    requested
                } else {
                    result.trust_domain
                };
                batch_item(result.status, name)
            })
            .collect())
    }
}

// ─── Conversions ─────────────────────────────────────────────────────────────

fn names_of(relationships: &[FederationRelationship]) -> Vec<String> {
    relationships
        .iter()
        .map(|r| r.trust_domain.clone())
        .collect()
}

fn batch_item(status: Option<types::Status>, trust_domain: String) -> BatchItem {
    let status = status.unwrap_or_default();
    BatchItem {
        trust_domain,
        code: status.code,
        message: status.message,
    }
}

fn bundle_from_pb(bundle: types::Bundle) -> SpireBundle {
    SpireBundle {
        trust_domain: bundle.trust_domain,
        x509_authorities: bundle
            .x509_authorities
            .into_iter()
            .map(|c| c.asn1)
            .collect(),
    }
}

fn bundle_to_pb(bundle: SpireBundle) -> types::Bundle {
    types::Bundle {
        trust_domain: bundle.trust_domain,
        x509_authorities: bundle
            .x509_authorities
            .into_iter()
            .map(|asn1| types::X509Certificate {
                asn1,
                tainted: false,
            })
            .collect(),
        ..Default::default()
    }
}

fn relationship_from_pb(rel: types::FederationRelationship) -> FederationRelationship {
    FederationRelationship {
        trust_domain: rel.trust_domain,
        bundle_endpoint_url: rel.bundle_endpoint_url,
        bundle: rel.trust_domain_bundle.map(bundle_from_pb),
    }
}

fn relationship_to_pb(rel: FederationRelationship) -> types::FederationRelationship {
    types::FederationRelationship {
        trust_domain: rel.trust_domain,
        bundle_endpoint_url: rel.bundle_endpoint_url,
        bundle_endpoint_profile: Some(
            types::federation_relationship::BundleEndpointProfile::HttpsWeb(
                types::HttpsWebProfile {},
            ),
        ),
        trust_domain_bundle: rel.bundle.map(bundle_to_pb),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_to_pb_uses_https_web() {
        let rel = FederationRelationship::https_web(SpireBundle {
            trust_domain: "b.test".to_string(),
            x509_authorities: vec![vec![1, 2, 3]],
        });
        let pb = relationship_to_pb(rel.clone());
        assert!(matches!(
            pb.bundle_endpoint_profile,
            Some(types::federation_relationship::BundleEndpointProfile::HttpsWeb(_))
        ));
        assert_eq!(pb.bundle_endpoint_url, "https://b.test/");
        assert_eq!(relationship_from_pb(pb), rel);
    }

    #[test]
    fn test_batch_item_defaults_to_ok() {
        let item = batch_item(None, "a.test".to_string());
        assert!(item.is_ok());

        let item = batch_item(
            Some(types::Status {
                code: 5,
                message: "not found".to_string(),
            }),
            "a.test".to_string(),
        );
        assert!(!item.is_ok());
        assert_eq!(item.message, "not found");
    }
}
