//! authentication for the harvester surface.
//!
//! each harvester route is tagged with exactly one [`AuthMode`]:
//!
//! 1. `JoinToken`: `Authorization: Bearer <token>` naming an unused, unexpired join token
//! 2. `ClientCert`: a tls client certificate issued by the onboarding ca
//! 3. `Jwt`: `Authorization: Bearer <jwt>` minted by this server
//!
//! on success a [`Caller`] is inserted into the request extensions. every
//! credential failure is a 401 with an empty body.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use galadriel_crypto::{Claims, x509};
use galadriel_db::Datastore;
use galadriel_types::{JoinToken, TrustDomain, TrustDomainName, api::RENEW_TOKEN_HEADER};
use tracing::{debug, warn};

use crate::AppState;
use crate::handlers::ApiError;

/// credential kind a route accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// single-use onboarding token
    JoinToken,
    /// mtls client certificate
    ClientCert,
    /// bearer jwt
    Jwt,
}

/// der certificates the tls client presented, leaf first.
///
/// inserted into every request served on a tls connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificates(pub Vec<Vec<u8>>);

impl PeerCertificates {
    /// the leaf certificate, if any was presented.
    pub fn leaf(&self) -> Option<&[u8]> {
        self.0.first().map(Vec::as_slice)
    }
}

/// the authenticated harvester behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    /// trust domain the credential belongs to
    pub trust_domain: TrustDomain,
    /// the join token, in join-token mode
    pub join_token: Option<JoinToken>,
    /// validated claims, in jwt mode
    pub claims: Option<Claims>,
}

impl Caller {
    /// the caller's trust domain name.
    pub fn name(&self) -> &TrustDomainName {
        &self.trust_domain.name
    }

    /// reject callers acting on a trust domain other than their own.
    pub fn require_trust_domain(&self, name: &str) -> Result<(), ApiError> {
        if self.trust_domain.name.as_str() != name {
            return Err(ApiError::forbidden(format!(
                "authenticated as {}, not {}",
                self.trust_domain.name, name
            )));
        }
        Ok(())
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

/// middleware authenticating a request with the route's [`AuthMode`].
///
/// use with `axum::middleware::from_fn_with_state((state, mode), authenticate)`.
pub async fn authenticate(
    State((state, mode)): State<(AppState, AuthMode)>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = match mode {
        AuthMode::JoinToken => join_token_caller(&state, req.headers()).await,
        AuthMode::ClientCert => {
            let peer = req.extensions().get::<PeerCertificates>().cloned();
            client_cert_caller(&state, peer).await
        }
        AuthMode::Jwt => jwt_caller(&state, req.headers()).await,
    };
    let caller = match caller {
        Ok(caller) => caller,
        Err(e) => return e.into_response(),
    };

    let renew = caller.claims.as_ref().is_some_and(Claims::should_renew);
    req.extensions_mut().insert(caller);

    let mut response = next.run(req).await;
    if renew {
        response
            .headers_mut()
            .insert(RENEW_TOKEN_HEADER, HeaderValue::from_static("true"));
    }
    response
}

/// extract a bearer token from the authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// a datastore failure while resolving a credential.
///
/// an unreachable datastore is a 503 so the harvester retries. any other
/// failure rejects the credential like a miss would.
fn lookup_failed(err: galadriel_db::Error) -> ApiError {
    if err.is_transient() {
        return ApiError::from(err);
    }
    warn!(error = %err, "credential lookup failed");
    ApiError::Unauthorized
}

async fn join_token_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    let join_token = state
        .db
        .find_join_token(token)
        .await
        .map_err(lookup_failed)?
        .ok_or(ApiError::Unauthorized)?;
    if !join_token.is_valid() {
        debug!(trust_domain_id = %join_token.trust_domain_id, "join token expired or used");
        return Err(ApiError::Unauthorized);
    }
    let trust_domain = state
        .db
        .find_trust_domain_by_id(join_token.trust_domain_id)
        .await
        .map_err(lookup_failed)?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Caller {
        trust_domain,
        join_token: Some(join_token),
        claims: None,
    })
}

async fn client_cert_caller(
    state: &AppState,
    peer: Option<PeerCertificates>,
) -> Result<Caller, ApiError> {
    let peer = peer.ok_or(ApiError::Unauthorized)?;
    let leaf = peer.leaf().ok_or(ApiError::Unauthorized)?;

    // also checked by the tls verifier during the handshake
    let roots = [state.ca.certificate_der().to_vec()];
    if !x509::chains_to(leaf, &roots).unwrap_or(false) {
        debug!("client certificate not issued by the onboarding ca");
        return Err(ApiError::Unauthorized);
    }
    let not_after = x509::not_after(leaf).map_err(|_| ApiError::Unauthorized)?;
    if not_after <= Utc::now() {
        return Err(ApiError::Unauthorized);
    }

    let spiffe_id = x509::spiffe_id(leaf).map_err(|e| {
        debug!(error = %e, "client certificate without usable spiffe id");
        ApiError::Unauthorized
    })?;
    let trust_domain = state
        .db
        .find_trust_domain_by_name(spiffe_id.trust_domain())
        .await
        .map_err(lookup_failed)?
        .ok_or(ApiError::Unauthorized)?;
    if trust_domain.harvester_spiffe_id.as_deref() != Some(spiffe_id.to_string().as_str()) {
        debug!(%spiffe_id, "spiffe id is not the onboarded harvester");
        return Err(ApiError::Unauthorized);
    }

    Ok(Caller {
        trust_domain,
        join_token: None,
        claims: None,
    })
}

async fn jwt_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    let claims = state.jwt_validator.validate(token).map_err(|e| {
        debug!(error = %e, "rejected jwt");
        ApiError::Unauthorized
    })?;
    let name = TrustDomainName::new(claims.sub.as_str()).map_err(|_| ApiError::Unauthorized)?;
    let trust_domain = state
        .db
        .find_trust_domain_by_name(&name)
        .await
        .map_err(lookup_failed)?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Caller {
        trust_domain,
        join_token: None,
        claims: Some(claims),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(header: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = header {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&headers_with(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&headers_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&headers_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&headers_with(None)), None);
    }

    #[test]
    fn test_lookup_failures() {
        use galadriel_db::Error;

        let unreachable = lookup_failed(Error::Connection("refused".into()));
        assert!(matches!(unreachable, ApiError::Unavailable(_)));

        let corrupt = lookup_failed(Error::InvalidData("bad trust domain name".into()));
        assert!(matches!(corrupt, ApiError::Unauthorized));
        let response = corrupt.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);

        let missing = lookup_failed(Error::NotFound("trust domain".into()));
        assert!(matches!(missing, ApiError::Unauthorized));
    }

    #[test]
    fn test_peer_certificates_leaf() {
        assert!(PeerCertificates::default().leaf().is_none());
        let peer = PeerCertificates(vec![vec![1], vec![2]]);
        assert_eq!(peer.leaf(), Some(&[1u8][..]));
    }
}
