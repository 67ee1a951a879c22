//! shared fixtures for server integration tests

#![allow(dead_code)] // not every test file uses every helper

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use galadriel_crypto::{KeyEntry, KeyManager, MemoryKeyManager, harvester_csr, x509};
use galadriel_db::GaladrielDb;
use galadriel_server::{AppState, auth::PeerCertificates, bootstrap};
use galadriel_types::{
    KeyType, ServerConfig, TrustDomainName,
    api::{CertificateResponse, JoinTokenResponse, JwtResponse, RelationshipResponse},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower::ServiceExt;

/// a response with its body read.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "failed to parse body ({}): {e}: {}",
                self.status,
                String::from_utf8_lossy(&self.body)
            )
        })
    }
}

/// an onboarded harvester.
pub struct Harvester {
    pub name: String,
    pub key: Arc<KeyEntry>,
    pub certificate_der: Vec<u8>,
}

impl Harvester {
    pub fn peer_certificates(&self) -> PeerCertificates {
        PeerCertificates(vec![self.certificate_der.clone()])
    }
}

/// server state over a datastore with both routers.
pub struct Fixture {
    pub state: AppState,
    pub admin: Router,
    pub harvester: Router,
    _dir: Option<tempfile::TempDir>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig {
            datastore: "sqlite::memory:".to_string(),
            ..Default::default()
        })
        .await
    }

    /// sqlite on disk, for tests with concurrent writers.
    pub async fn file_backed() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let datastore = format!("sqlite://{}", dir.path().join("datastore.sqlite3").display());
        let mut fx = Self::with_config(ServerConfig {
            datastore,
            ..Default::default()
        })
        .await;
        fx._dir = Some(dir);
        fx
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let db = GaladrielDb::connect(&config.datastore).await.unwrap();
        let key_manager: Arc<dyn KeyManager> = Arc::new(MemoryKeyManager::new());
        let ca = bootstrap::load_x509_ca(
            &config.x509_ca,
            key_manager.as_ref(),
            config.key_manager.key_type,
        )
        .unwrap();
        let state = AppState::new(db, key_manager, ca, config).unwrap();
        Self {
            admin: galadriel_server::create_admin_app(state.clone()),
            harvester: galadriel_server::create_harvester_app(state.clone()),
            state,
            _dir: None,
        }
    }

    // ─── Requests ────────────────────────────────────────────────────────────

    pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        send(&self.admin, json_request(method, uri, body).body_json()).await
    }

    pub async fn harvester_request(&self, request: Request<Body>) -> TestResponse {
        send(&self.harvester, request).await
    }

    /// harvester request authenticated with a bearer token.
    pub async fn with_bearer(
        &self,
        method: Method,
        uri: &str,
        token: &str,
        body: Option<Value>,
    ) -> TestResponse {
        let request = json_request(method, uri, body)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body_json();
        self.harvester_request(request).await
    }

    /// harvester request authenticated with a client certificate.
    pub async fn with_cert(
        &self,
        method: Method,
        uri: &str,
        harvester: &Harvester,
        body: Option<Value>,
    ) -> TestResponse {
        let request = json_request(method, uri, body)
            .extension(harvester.peer_certificates())
            .body_json();
        self.harvester_request(request).await
    }

    // ─── Setup ───────────────────────────────────────────────────────────────

    pub async fn create_trust_domain(&self, name: &str) {
        let resp = self
            .admin(Method::PUT, "/trust-domain", Some(json!({ "name": name })))
            .await;
        assert_eq!(resp.status, StatusCode::OK, "create {name}");
    }

    pub async fn join_token(&self, name: &str) -> String {
        let resp = self
            .admin(
                Method::GET,
                &format!("/trust-domain/{name}/join-token?ttl=60"),
                None,
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        resp.json::<JoinTokenResponse>().token
    }

    /// register a trust domain and onboard its harvester.
    pub async fn onboard(&self, name: &str) -> Harvester {
        self.create_trust_domain(name).await;
        let token = self.join_token(name).await;

        let key = Arc::new(KeyEntry::generate(format!("{name}-harvester"), KeyType::Rsa2048).unwrap());
        let csr = harvester_csr(&key, &TrustDomainName::new(name).unwrap()).unwrap();
        let resp = self
            .with_bearer(
                Method::POST,
                "/trust-domain/onboard",
                &token,
                Some(json!({ "csr": csr })),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK, "onboard {name}");

        let cert: CertificateResponse = resp.json();
        let certificate_der = x509::certificates_from_pem(cert.certificate.as_bytes())
            .unwrap()
            .remove(0);
        Harvester {
            name: name.to_string(),
            key,
            certificate_der,
        }
    }

    pub async fn jwt(&self, harvester: &Harvester) -> String {
        let resp = self
            .with_cert(
                Method::GET,
                &format!("/trust-domain/{}/jwt", harvester.name),
                harvester,
                None,
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        resp.json::<JwtResponse>().token
    }

    pub async fn create_relationship(&self, a: &str, b: &str) -> RelationshipResponse {
        let resp = self
            .admin(
                Method::PUT,
                "/relationships",
                Some(json!({ "trust_domain_a_name": a, "trust_domain_b_name": b })),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        resp.json()
    }

    /// create a relationship and approve both sides through the admin surface.
    pub async fn approved_relationship(&self, a: &str, b: &str) -> RelationshipResponse {
        let rel = self.create_relationship(a, b).await;
        let resp = self
            .admin(
                Method::PATCH,
                &format!("/relationships/{}", rel.id),
                Some(json!({
                    "trust_domain_a_consent": "approved",
                    "trust_domain_b_consent": "approved",
                })),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        resp.json()
    }
}

/// request builder with an optional json body.
pub struct JsonRequest {
    builder: axum::http::request::Builder,
    body: Option<Value>,
}

impl JsonRequest {
    pub fn header(mut self, name: header::HeaderName, value: String) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    pub fn extension<T: Clone + Send + Sync + 'static>(mut self, ext: T) -> Self {
        self.builder = self.builder.extension(ext);
        self
    }

    pub fn body_json(self) -> Request<Body> {
        match self.body {
            Some(body) => self
                .builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => self.builder.body(Body::empty()).unwrap(),
        }
    }
}

pub fn json_request(method: Method, uri: &str, body: Option<Value>) -> JsonRequest {
    JsonRequest {
        builder: Request::builder().method(method).uri(uri),
        body,
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}
