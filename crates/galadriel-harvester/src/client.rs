//! https client for the galadriel server harvester surface.
//!
//! the client authenticates three ways depending on the route: the join token
//! for onboarding, the harvester client certificate for certificate, jwt and
//! bundle pushes, and a cached bearer jwt for everything else.

use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use galadriel_crypto::{KeyEntry, x509};
use galadriel_types::api::{
    CertificateRequest, CertificateResponse, ConsentRequest, DigestMap, ErrorBody,
    HarvesterRelationship, JwtResponse, PutBundleRequest, RENEW_TOKEN_HEADER, SyncResponse,
};
use galadriel_types::{ConsentStatus, HarvesterConfig, RelationshipId, TrustDomainName};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// a cached jwt is replaced once it is this close to expiry (seconds)
const JWT_RENEW_MARGIN_SECS: i64 = 60;

/// errors talking to the galadriel server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// the server address is not a usable url.
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
        /// machine-readable error kind, absent on 401
        code: Option<String>,
        /// server-provided message
        message: String,
    },

    /// the harvester configuration cannot be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// trust bundle or client identity could not be loaded.
    #[error("tls configuration error: {0}")]
    Tls(String),

    /// key or certificate encoding failed.
    #[error(transparent)]
    Crypto(#[from] galadriel_crypto::Error),

    /// io error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// http status of an api error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// true when the server refused the request itself (4xx).
    ///
    /// such failures need operator action and are not retried eagerly.
    pub fn is_rejection(&self) -> bool {
        self.status().is_some_and(|s| s.is_client_error())
    }
}

/// server operations used by the reconciliation loops and the local api.
pub trait ServerApi: Send + Sync {
    /// `PUT /trust-domain/{self}/bundles`
    fn put_bundle(
        &self,
        request: PutBundleRequest,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// `POST /trust-domain/{self}/bundles/sync`
    fn sync_bundles(
        &self,
        known: DigestMap,
    ) -> impl Future<Output = Result<SyncResponse, ClientError>> + Send;

    /// `GET /relationships?consent_status=`
    fn list_relationships(
        &self,
        status: Option<ConsentStatus>,
    ) -> impl Future<Output = Result<Vec<HarvesterRelationship>, ClientError>> + Send;

    /// `PATCH /relationships/{id}`
    fn update_consent(
        &self,
        id: RelationshipId,
        status: ConsentStatus,
    ) -> impl Future<Output = Result<HarvesterRelationship, ClientError>> + Send;
}

#[derive(Debug, Clone)]
struct CachedJwt {
    token: String,
    expires_at: DateTime<Utc>,
    renew: bool,
}

impl CachedJwt {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.renew && self.expires_at - now > TimeDelta::seconds(JWT_RENEW_MARGIN_SECS)
    }
}

/// client for the harvester surface of one galadriel server.
pub struct GaladrielClient {
    base: Url,
    trust_domain: TrustDomainName,
    roots: Vec<reqwest::Certificate>,
    timeout: Duration,
    http: RwLock<reqwest::Client>,
    jwt: Mutex<Option<CachedJwt>>,
}

impl GaladrielClient {
    /// client for `https://<galadriel_server_address>/`.
    pub fn new(config: &HarvesterConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&format!("https://{}/", config.galadriel_server_address))?;
        Self::with_base_url(config, base)
    }

    /// client for an explicit base url.
    pub fn with_base_url(config: &HarvesterConfig, base: Url) -> Result<Self, ClientError> {
        let trust_domain = config
            .trust_domain()
            .map_err(|e| ClientError::Config(e.to_string()))?
            .clone();

        let roots = match &config.server_trust_bundle_path {
            Some(path) => {
                let pem = std::fs::read(path)?;
                x509::certificates_from_pem(&pem)?
                    .iter()
                    .map(|der| {
                        reqwest::Certificate::from_der(der)
                            .map_err(|e| ClientError::Tls(format!("{path:?}: {e}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => Vec::new(),
        };

        let http = build_http(&roots, config.request_timeout, None)?;
        Ok(Self {
            base,
            trust_domain,
            roots,
            timeout: config.request_timeout,
            http: RwLock::new(http),
            jwt: Mutex::new(None),
        })
    }

    /// trust domain this client acts for.
    pub fn trust_domain(&self) -> &TrustDomainName {
        &self.trust_domain
    }

    /// present `certificate_pem` with `key` as client certificate from now on.
    pub fn set_identity(&self, key: &KeyEntry, certificate_pem: &str) -> Result<(), ClientError> {
        let pem = format!("{}{}", key.private_key_pem()?, certificate_pem);
        let identity = reqwest::Identity::from_pem(pem.as_bytes())
            .map_err(|e| ClientError::Tls(format!("invalid client identity: {e}")))?;
        let http = build_http(&self.roots, self.timeout, Some(identity))?;
        *self.http.write().unwrap_or_else(PoisonError::into_inner) = http;
        Ok(())
    }

    fn http(&self) -> reqwest::Client {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.http().request(method, self.base.join(path)?))
    }

    // ─── Credentials ─────────────────────────────────────────────────────────

    /// exchange a join token and csr for the first client certificate.
    pub async fn onboard(
        &self,
        join_token: &str,
        csr: String,
    ) -> Result<CertificateResponse, ClientError> {
        let resp = self
            .request(Method::POST, "/trust-domain/onboard")?
            .bearer_auth(join_token)
            .json(&CertificateRequest { csr })
            .send()
            .await?;
        json(check(resp).await?).await
    }

    /// exchange the current client certificate for a fresh one.
    pub async fn renew_certificate(&self, csr: String) -> Result<CertificateResponse, ClientError> {
        let path = format!("/trust-domain/{}/certificate", self.trust_domain);
        let resp = self
            .request(Method::POST, &path)?
            .json(&CertificateRequest { csr })
            .send()
            .await?;
        json(check(resp).await?).await
    }

    /// mint a bearer jwt with the client certificate.
    pub async fn mint_jwt(&self) -> Result<JwtResponse, ClientError> {
        let path = format!("/trust-domain/{}/jwt", self.trust_domain);
        let resp = self.request(Method::GET, &path)?.send().await?;
        json(check(resp).await?).await
    }

    /// the cached jwt, minting a new one when it is missing, stale or flagged.
    async fn bearer(&self) -> Result<String, ClientError> {
        let mut cached = self.jwt.lock().await;
        if let Some(jwt) = cached.as_ref()
            && jwt.is_fresh(Utc::now())
        {
            return Ok(jwt.token.clone());
        }

        let minted = self.mint_jwt().await?;
        debug!(expires_at = %minted.expires_at, "minted bearer token");
        *cached = Some(CachedJwt {
            token: minted.token.clone(),
            expires_at: minted.expires_at,
            renew: false,
        });
        Ok(minted.token)
    }

    async fn mark_for_renewal(&self, token: &str) {
        let mut cached = self.jwt.lock().await;
        if let Some(jwt) = cached.as_mut()
            && jwt.token == token
        {
            debug!("server asked for a new bearer token");
            jwt.renew = true;
        }
    }

    async fn forget_token(&self, token: &str) {
        let mut cached = self.jwt.lock().await;
        if cached.as_ref().is_some_and(|jwt| jwt.token == token) {
            *cached = None;
        }
    }

    async fn send_with_bearer<B: Serialize>(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<(String, Response), ClientError> {
        let token = self.bearer().await?;
        let mut req = self
            .request(method.clone(), path)?
            .bearer_auth(&token)
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        if resp.headers().contains_key(RENEW_TOKEN_HEADER) {
            self.mark_for_renewal(&token).await;
        }
        Ok((token, resp))
    }

    /// send with the bearer jwt, re-minting once if the server rejects it.
    async fn authorized<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let (token, resp) = self.send_with_bearer(&method, path, query, body).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return json(check(resp).await?).await;
        }

        debug!(path, "bearer token rejected, minting a new one");
        self.forget_token(&token).await;
        let (_, resp) = self.send_with_bearer(&method, path, query, body).await?;
        json(check(resp).await?).await
    }
}

impl ServerApi for GaladrielClient {
    async fn put_bundle(&self, request: PutBundleRequest) -> Result<(), ClientError> {
        let path = format!("/trust-domain/{}/bundles", self.trust_domain);
        let resp = self
            .request(Method::PUT, &path)?
            .json(&request)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn sync_bundles(&self, known: DigestMap) -> Result<SyncResponse, ClientError> {
        let path = format!("/trust-domain/{}/bundles/sync", self.trust_domain);
        self.authorized(Method::POST, &path, &[], Some(&known)).await
    }

    async fn list_relationships(
        &self,
        status: Option<ConsentStatus>,
    ) -> Result<Vec<HarvesterRelationship>, ClientError> {
        let query: Vec<(&str, String)> = status
            .map(|s| ("consent_status", s.to_string()))
            .into_iter()
            .collect();
        self.authorized::<(), _>(Method::GET, "/relationships", &query, None)
            .await
    }

    async fn update_consent(
        &self,
        id: RelationshipId,
        status: ConsentStatus,
    ) -> Result<HarvesterRelationship, ClientError> {
        let body = ConsentRequest {
            consent_status: status,
        };
        self.authorized(
            Method::PATCH,
            &format!("/relationships/{id}"),
            &[],
            Some(&body),
        )
        .await
    }
}

fn build_http(
    roots: &[reqwest::Certificate],
    timeout: Duration,
    identity: Option<reqwest::Identity>,
) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout);
    if !roots.is_empty() {
        builder = builder.tls_built_in_root_certs(false);
        for root in roots {
            builder = builder.add_root_certificate(root.clone());
        }
    }
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    Ok(builder.build()?)
}

/// turn a non-2xx response into [`ClientError::Api`].
async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (Some(body.code), body.message),
        Err(_) if text.is_empty() => (
            None,
            status.canonical_reason().unwrap_or("error").to_string(),
        ),
        Err(_) => (None, text),
    };
    Err(ClientError::Api {
        status,
        code,
        message,
    })
}

async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    Ok(resp.json().await?)
}
