//! harvester surface handlers.
//!
//! every handler runs behind [`crate::auth::authenticate`] and receives the
//! authenticated [`Caller`]. trust-domain scoped paths must name the caller's
//! own trust domain (403 otherwise).

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use galadriel_crypto::{IssuedCertificate, LeafParams};
use galadriel_db::{ConsentChange, Datastore, RelationshipFilter};
use galadriel_types::{
    Bundle, ConsentStatus, Relationship, TrustDomainId,
    api::{
        BundleUpdate, CertificateRequest, CertificateResponse, ConsentRequest, DigestMap,
        HarvesterRelationship, JwtResponse, PutBundleRequest, SyncResponse,
    },
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    ApiError, JsonBody, OptionExt, ResultExt, change_consent, parse_relationship_id,
    trust_domain_names,
};
use crate::AppState;
use crate::auth::Caller;

fn certificate_response(cert: IssuedCertificate, caller: &Caller) -> CertificateResponse {
    CertificateResponse {
        certificate: cert.pem,
        spiffe_id: caller.name().harvester_id().to_string(),
        expires_at: cert.not_after,
    }
}

fn issue_client_certificate(
    state: &AppState,
    caller: &Caller,
    csr: &str,
) -> Result<IssuedCertificate, ApiError> {
    let leaf = LeafParams::harvester(caller.name(), state.config.client_certificate_ttl);
    state.ca.sign_csr(csr, &leaf).map_err(|e| match e {
        galadriel_crypto::Error::InvalidCsr(msg) => {
            ApiError::bad_request(format!("invalid csr: {msg}"))
        }
        other => ApiError::internal(other),
    })
}

fn bundle_update(name: String, bundle: Bundle) -> Result<BundleUpdate, ApiError> {
    Ok(BundleUpdate {
        trust_domain: name,
        trust_bundle: String::from_utf8(bundle.data).map_internal()?,
        digest: bundle.digest,
        signature: bundle.signature.map(|sig| STANDARD.encode(sig)),
        signing_certificate: bundle
            .signing_certificate
            .map(String::from_utf8)
            .transpose()
            .map_internal()?,
    })
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// `POST /trust-domain/onboard`: exchange a join token and a csr for a client
/// certificate.
///
/// the token is consumed with a conditional update, so of two concurrent
/// onboardings with the same token only one succeeds.
pub async fn onboard(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(req): JsonBody<CertificateRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let token = caller.join_token.as_ref().ok_or(ApiError::Unauthorized)?;
    let cert = issue_client_certificate(&state, &caller, &req.csr)?;

    if state.db.consume_join_token(&token.token).await?.is_none() {
        debug!(trust_domain = %caller.name(), "join token consumed concurrently");
        return Err(ApiError::Unauthorized);
    }

    let mut trust_domain = caller.trust_domain.clone();
    trust_domain.harvester_spiffe_id = Some(caller.name().harvester_id().to_string());
    state.db.create_or_update_trust_domain(&trust_domain).await?;

    info!(
        trust_domain = %caller.name(),
        expires_at = %cert.not_after,
        "onboarded harvester"
    );
    Ok(Json(certificate_response(cert, &caller)))
}

/// `POST /trust-domain/{name}/certificate`: renew the client certificate.
pub async fn renew_certificate(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
    JsonBody(req): JsonBody<CertificateRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    caller.require_trust_domain(&name)?;
    let cert = issue_client_certificate(&state, &caller, &req.csr)?;
    info!(trust_domain = %caller.name(), expires_at = %cert.not_after, "renewed client certificate");
    Ok(Json(certificate_response(cert, &caller)))
}

/// `GET /trust-domain/{name}/jwt`: mint a bearer token.
pub async fn mint_jwt(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
) -> Result<Json<JwtResponse>, ApiError> {
    caller.require_trust_domain(&name)?;
    let issued = state
        .jwt_issuer
        .issue(caller.name(), state.config.jwt_ttl)
        .map_internal()?;
    debug!(trust_domain = %caller.name(), exp = issued.claims.exp, "minted jwt");
    Ok(Json(JwtResponse {
        token: issued.token,
        expires_at: issued.claims.expires_at(),
    }))
}

// ─── Bundles ─────────────────────────────────────────────────────────────────

/// `PUT /trust-domain/{name}/bundles`: store the caller's own bundle.
///
/// an empty `trust_bundle` is accepted and ignored.
pub async fn put_bundle(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
    JsonBody(req): JsonBody<PutBundleRequest>,
) -> Result<StatusCode, ApiError> {
    caller.require_trust_domain(&name)?;
    if req.trust_domain != name {
        return Err(ApiError::bad_request(format!(
            "bundle for {} sent to {}",
            req.trust_domain, name
        )));
    }
    if req.trust_bundle.is_empty() {
        return Ok(StatusCode::OK);
    }

    let mut bundle = Bundle::new(caller.trust_domain.id, req.trust_bundle.into_bytes());
    if let Some(digest) = req.digest.filter(|d| !d.is_empty()) {
        bundle.digest = digest;
    }
    bundle.signature = req
        .signature
        .filter(|s| !s.is_empty())
        .map(|s| STANDARD.decode(s))
        .transpose()
        .map_err(|e| ApiError::bad_request(format!("signature is not base64: {e}")))?;
    bundle.signing_certificate = req
        .signing_certificate
        .filter(|c| !c.is_empty())
        .map(String::into_bytes);

    let stored = state.db.create_or_update_bundle(&bundle).await?;
    info!(trust_domain = %caller.name(), digest = %stored.digest, "stored bundle");
    Ok(StatusCode::OK)
}

/// `GET /trust-domain/{name}/bundles`: the caller's stored bundle.
pub async fn get_bundle(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
) -> Result<Json<BundleUpdate>, ApiError> {
    caller.require_trust_domain(&name)?;
    let bundle = state
        .db
        .find_bundle_by_trust_domain_id(caller.trust_domain.id)
        .await?
        .or_not_found(&format!("no bundle stored for {name}"))?;
    Ok(Json(bundle_update(name, bundle)?))
}

/// `POST /trust-domain/{name}/bundles/sync`
///
/// the body maps peers to the digest the caller holds. `state` in the response
/// lists every peer the caller may federate with (both consents approved and a
/// bundle stored); `updates` carries the bundles whose digest differs from the
/// caller's.
pub async fn sync_bundles(
    State(state): State<AppState>,
    caller: Caller,
    Path(name): Path<String>,
    JsonBody(known): JsonBody<DigestMap>,
) -> Result<Json<SyncResponse>, ApiError> {
    caller.require_trust_domain(&name)?;
    let own_id = caller.trust_domain.id;

    let filter =
        RelationshipFilter::for_trust_domain(own_id).with_status(Some(ConsentStatus::Approved));
    let relationships = state.db.list_relationships(&filter).await?;

    let mut response = SyncResponse::default();
    for rel in relationships.iter().filter(|rel| rel.is_fully_approved()) {
        let Some(peer_id) = rel.peer_of(own_id) else {
            continue;
        };
        let Some(peer) = state.db.find_trust_domain_by_id(peer_id).await? else {
            warn!(relationship = %rel.id, "relationship references a missing trust domain");
            continue;
        };
        let Some(bundle) = state.db.find_bundle_by_trust_domain_id(peer_id).await? else {
            debug!(peer = %peer.name, "peer has not pushed a bundle yet");
            continue;
        };

        let peer_name = peer.name.into_inner();
        response
            .state
            .insert(peer_name.clone(), bundle.digest.clone());
        if known.get(&peer_name) != Some(&bundle.digest) {
            response
                .updates
                .insert(peer_name.clone(), bundle_update(peer_name, bundle)?);
        }
    }

    debug!(
        trust_domain = %caller.name(),
        peers = response.state.len(),
        updates = response.updates.len(),
        "bundle sync"
    );
    Ok(Json(response))
}

// ─── Relationships ───────────────────────────────────────────────────────────

/// query for the harvester `GET /relationships`.
#[derive(Debug, Default, Deserialize)]
pub struct ConsentParams {
    /// consent of the caller's side to match
    pub consent_status: Option<String>,
}

fn harvester_relationship(
    rel: Relationship,
    own_id: TrustDomainId,
    names: &HashMap<TrustDomainId, String>,
) -> Option<HarvesterRelationship> {
    let peer_id = rel.peer_of(own_id)?;
    Some(HarvesterRelationship {
        id: rel.id,
        peer_trust_domain: names.get(&peer_id).cloned().unwrap_or_default(),
        consent_status: rel.consent_of(own_id)?,
        peer_consent_status: rel.consent_of(peer_id)?,
        created_at: rel.created_at,
        updated_at: rel.updated_at,
    })
}

/// `GET /relationships?consent_status=`: the caller's relationships.
pub async fn list_relationships(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<ConsentParams>,
) -> Result<Json<Vec<HarvesterRelationship>>, ApiError> {
    let status = params
        .consent_status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<ConsentStatus>)
        .transpose()?;
    let own_id = caller.trust_domain.id;

    let filter = RelationshipFilter::for_trust_domain(own_id).with_status(status);
    let relationships = state.db.list_relationships(&filter).await?;
    let names = trust_domain_names(&state).await?;

    Ok(Json(
        relationships
            .into_iter()
            .filter_map(|rel| harvester_relationship(rel, own_id, &names))
            .collect(),
    ))
}

/// `PATCH /relationships/{id}`: set the consent of the caller's side.
pub async fn update_consent(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ConsentRequest>,
) -> Result<Json<HarvesterRelationship>, ApiError> {
    let id = parse_relationship_id(&id)?;
    let own_id = caller.trust_domain.id;
    let next = req.consent_status;

    let updated = change_consent(&state, id, |rel| {
        let side = rel.side_of(own_id).ok_or_else(|| {
            ApiError::forbidden(format!("{} is not part of relationship {id}", caller.name()))
        })?;
        let expected = rel.consent(side);
        expected.transition(next)?;
        Ok(vec![ConsentChange {
            side,
            expected,
            next,
        }])
    })
    .await?;
    info!(
        relationship = %id,
        trust_domain = %caller.name(),
        consent = %req.consent_status,
        "updated consent"
    );

    let names = trust_domain_names(&state).await?;
    harvester_relationship(updated, own_id, &names)
        .map(Json)
        .ok_or_else(|| ApiError::internal("relationship lost its participant"))
}
