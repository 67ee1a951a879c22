//! http client for the admin surface.

use galadriel_types::api::{
    CreateRelationshipRequest, CreateTrustDomainRequest, ErrorBody, JoinTokenResponse,
    RelationshipResponse, TrustDomainResponse, UpdateTrustDomainRequest,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

/// errors talking to the admin surface.
#[derive(Debug, Error)]
pub enum AdminClientError {
    /// the admin address is not a usable url.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// the request never got a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// the server answered with an error.
    #[error("{status}: {message}")]
    Api {
        /// http status
        status: StatusCode,
        /// server-provided message
        message: String,
    },
}

/// client for the admin surface.
#[derive(Debug, Clone)]
pub struct AdminClient {
    base: Url,
    http: reqwest::Client,
}

impl AdminClient {
    /// create a client for the admin surface at `base`.
    pub fn new(base: &str) -> Result<Self, AdminClientError> {
        Ok(Self {
            base: Url::parse(base)?,
            http: reqwest::Client::new(),
        })
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Option<T>, AdminClientError> {
        let url = self.base.join(path)?;
        let mut req = self.http.request(method, url).query(query);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or(text);
            return Err(AdminClientError::Api { status, message });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(resp.json().await?))
    }

    async fn expect<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, AdminClientError> {
        self.send(method, path, query, body)
            .await?
            .ok_or_else(|| AdminClientError::Api {
                status: StatusCode::NO_CONTENT,
                message: "empty response".to_string(),
            })
    }

    // ─── Trust Domain Operations ─────────────────────────────────────────────

    /// register a trust domain
    pub async fn create_trust_domain(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<TrustDomainResponse, AdminClientError> {
        let body = CreateTrustDomainRequest {
            name: name.to_string(),
            description,
        };
        self.expect(Method::PUT, "/trust-domain", &[], Some(&body))
            .await
    }

    /// fetch a trust domain by name
    pub async fn get_trust_domain(&self, name: &str) -> Result<TrustDomainResponse, AdminClientError> {
        self.expect::<(), _>(Method::GET, &format!("/trust-domain/{name}"), &[], None)
            .await
    }

    /// list every trust domain
    pub async fn list_trust_domains(&self) -> Result<Vec<TrustDomainResponse>, AdminClientError> {
        self.expect::<(), _>(Method::GET, "/trust-domain", &[], None)
            .await
    }

    /// update a trust domain
    pub async fn update_trust_domain(
        &self,
        name: &str,
        update: &UpdateTrustDomainRequest,
    ) -> Result<TrustDomainResponse, AdminClientError> {
        self.expect(
            Method::PUT,
            &format!("/trust-domain/{name}"),
            &[],
            Some(update),
        )
        .await
    }

    /// delete a trust domain
    pub async fn delete_trust_domain(&self, name: &str) -> Result<(), AdminClientError> {
        self.send::<(), serde_json::Value>(
            Method::DELETE,
            &format!("/trust-domain/{name}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    // ─── Join Token Operations ───────────────────────────────────────────────

    /// mint a join token
    pub async fn generate_join_token(
        &self,
        trust_domain: &str,
        ttl: Option<u64>,
    ) -> Result<JoinTokenResponse, AdminClientError> {
        let query: Vec<(&str, String)> = ttl.map(|t| ("ttl", t.to_string())).into_iter().collect();
        self.expect::<(), _>(
            Method::GET,
            &format!("/trust-domain/{trust_domain}/join-token"),
            &query,
            None,
        )
        .await
    }

    // ─── Relationship Operations ─────────────────────────────────────────────

    /// propose a relationship
    pub async fn create_relationship(
        &self,
        trust_domain_a: &str,
        trust_domain_b: &str,
    ) -> Result<RelationshipResponse, AdminClientError> {
        let body = CreateRelationshipRequest {
            trust_domain_a_name: trust_domain_a.to_string(),
            trust_domain_b_name: trust_domain_b.to_string(),
        };
        self.expect(Method::PUT, "/relationships", &[], Some(&body))
            .await
    }

    /// fetch a relationship
    pub async fn get_relationship(&self, id: &str) -> Result<RelationshipResponse, AdminClientError> {
        self.expect::<(), _>(Method::GET, &format!("/relationships/{id}"), &[], None)
            .await
    }

    /// list relationships
    pub async fn list_relationships(
        &self,
        trust_domain: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<RelationshipResponse>, AdminClientError> {
        let mut query = Vec::new();
        if let Some(td) = trust_domain {
            query.push(("trust_domain_name", td.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        self.expect::<(), _>(Method::GET, "/relationships", &query, None)
            .await
    }

    /// delete a relationship
    pub async fn delete_relationship(&self, id: &str) -> Result<(), AdminClientError> {
        self.send::<(), serde_json::Value>(
            Method::DELETE,
            &format!("/relationships/{id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }
}
