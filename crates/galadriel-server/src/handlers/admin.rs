//! admin surface handlers: trust domains, relationships and join tokens.
//!
//! served on the local admin address only; there is no authentication. on this
//! surface a uniqueness violation is reported as 400 rather than 409.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use galadriel_db::{ConsentChange, Datastore, Pagination, RelationshipFilter};
use galadriel_types::{
    ConsentSide, ConsentStatus, JoinToken, Relationship, TrustDomain, TrustDomainId,
    api::{
        CreateRelationshipRequest, CreateTrustDomainRequest, JoinTokenResponse,
        RelationshipResponse, TrustDomainResponse, UpdateRelationshipRequest,
        UpdateTrustDomainRequest,
    },
};
use serde::Deserialize;
use tracing::info;

use super::{
    ApiError, JsonBody, OptionExt, change_consent, parse_relationship_id,
    parse_trust_domain_name, trust_domain_names,
};
use crate::AppState;

/// join token lifetime when `ttl` is absent.
pub const DEFAULT_JOIN_TOKEN_TTL_SECS: u64 = 600;

/// longest join token lifetime accepted.
pub const MAX_JOIN_TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;

fn admin_error(err: galadriel_db::Error) -> ApiError {
    match err {
        galadriel_db::Error::AlreadyExists(msg) => {
            ApiError::bad_request(format!("already exists: {msg}"))
        }
        other => other.into(),
    }
}

/// look up a trust domain by name. a malformed name cannot be stored, so it is
/// reported as not found.
async fn find_trust_domain(state: &AppState, name: &str) -> Result<TrustDomain, ApiError> {
    let name = parse_trust_domain_name(name)
        .map_err(|_| ApiError::not_found(format!("trust domain {name} not found")))?;
    state
        .db
        .find_trust_domain_by_name(&name)
        .await?
        .or_not_found(&format!("trust domain {name} not found"))
}

// ─── Trust Domains ───────────────────────────────────────────────────────────

/// `GET /trust-domain`
pub async fn list_trust_domains(
    State(state): State<AppState>,
) -> Result<Json<Vec<TrustDomainResponse>>, ApiError> {
    let trust_domains = state.db.list_trust_domains().await?;
    Ok(Json(trust_domains.into_iter().map(Into::into).collect()))
}

/// `PUT /trust-domain`
pub async fn create_trust_domain(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateTrustDomainRequest>,
) -> Result<Json<TrustDomainResponse>, ApiError> {
    let name = parse_trust_domain_name(&req.name)?;
    if state.db.find_trust_domain_by_name(&name).await?.is_some() {
        return Err(ApiError::bad_request(format!(
            "trust domain {name} already exists"
        )));
    }

    let mut trust_domain = TrustDomain::new(name);
    trust_domain.description = req.description;
    let created = state
        .db
        .create_or_update_trust_domain(&trust_domain)
        .await
        .map_err(admin_error)?;

    info!(trust_domain = %created.name, id = %created.id, "created trust domain");
    Ok(Json(created.into()))
}

/// `GET /trust-domain/{name}`
pub async fn get_trust_domain(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TrustDomainResponse>, ApiError> {
    Ok(Json(find_trust_domain(&state, &name).await?.into()))
}

/// `PUT /trust-domain/{name}`
pub async fn update_trust_domain(
    State(state): State<AppState>,
    Path(name): Path<String>,
    JsonBody(req): JsonBody<UpdateTrustDomainRequest>,
) -> Result<Json<TrustDomainResponse>, ApiError> {
    let mut trust_domain = find_trust_domain(&state, &name).await?;
    if let Some(description) = req.description {
        trust_domain.description = Some(description);
    }
    if let Some(bundle) = req.onboarding_bundle {
        trust_domain.onboarding_bundle = Some(bundle);
    }

    let updated = state
        .db
        .create_or_update_trust_domain(&trust_domain)
        .await
        .map_err(admin_error)?;
    info!(trust_domain = %updated.name, "updated trust domain");
    Ok(Json(updated.into()))
}

/// `DELETE /trust-domain/{name}`
///
/// fails with 400 while a relationship or bundle still references it.
pub async fn delete_trust_domain(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let trust_domain = find_trust_domain(&state, &name).await?;
    state
        .db
        .delete_trust_domain(trust_domain.id)
        .await
        .map_err(admin_error)?;
    info!(trust_domain = %trust_domain.name, "deleted trust domain");
    Ok(StatusCode::NO_CONTENT)
}

// ─── Join Tokens ─────────────────────────────────────────────────────────────

/// query for `GET /trust-domain/{name}/join-token`.
#[derive(Debug, Default, Deserialize)]
pub struct JoinTokenParams {
    /// lifetime in seconds
    pub ttl: Option<u64>,
}

/// `GET /trust-domain/{name}/join-token?ttl=<sec>`
pub async fn generate_join_token(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<JoinTokenParams>,
) -> Result<Json<JoinTokenResponse>, ApiError> {
    let ttl = params.ttl.unwrap_or(DEFAULT_JOIN_TOKEN_TTL_SECS);
    if ttl == 0 || ttl > MAX_JOIN_TOKEN_TTL_SECS {
        return Err(ApiError::bad_request(format!(
            "ttl must be between 1 and {MAX_JOIN_TOKEN_TTL_SECS} seconds"
        )));
    }

    // an unknown trust domain is a bad request here, not a 404
    let name = parse_trust_domain_name(&name)?;
    let trust_domain = state
        .db
        .find_trust_domain_by_name(&name)
        .await?
        .or_bad_request(&format!("trust domain {name} does not exist"))?;

    let token = JoinToken::generate(trust_domain.id, chrono::Duration::seconds(ttl as i64));
    let token = state
        .db
        .create_or_update_join_token(&token)
        .await
        .map_err(admin_error)?;

    info!(trust_domain = %name, expires_at = %token.expires_at, "generated join token");
    Ok(Json(JoinTokenResponse {
        token: token.token,
        trust_domain: name.into_inner(),
        expires_at: token.expires_at,
    }))
}

// ─── Relationships ───────────────────────────────────────────────────────────

fn relationship_response(
    rel: Relationship,
    names: &HashMap<TrustDomainId, String>,
) -> RelationshipResponse {
    let name_of = |id: &TrustDomainId| names.get(id).cloned().unwrap_or_default();
    RelationshipResponse {
        id: rel.id,
        trust_domain_a_name: name_of(&rel.trust_domain_a_id),
        trust_domain_a_id: rel.trust_domain_a_id,
        trust_domain_b_name: name_of(&rel.trust_domain_b_id),
        trust_domain_b_id: rel.trust_domain_b_id,
        trust_domain_a_consent: rel.trust_domain_a_consent,
        trust_domain_b_consent: rel.trust_domain_b_consent,
        created_at: rel.created_at,
        updated_at: rel.updated_at,
    }
}

async fn find_relationship(state: &AppState, id: &str) -> Result<Relationship, ApiError> {
    let id = parse_relationship_id(id)?;
    state
        .db
        .find_relationship_by_id(id)
        .await?
        .or_not_found(&format!("relationship {id} not found"))
}

/// `PUT /relationships`
pub async fn create_relationship(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateRelationshipRequest>,
) -> Result<Json<RelationshipResponse>, ApiError> {
    let a = find_trust_domain(&state, &req.trust_domain_a_name).await?;
    let b = find_trust_domain(&state, &req.trust_domain_b_name).await?;
    if a.id == b.id {
        return Err(ApiError::bad_request(
            "a relationship needs two distinct trust domains",
        ));
    }

    let created = state
        .db
        .create_or_update_relationship(&Relationship::new(a.id, b.id))
        .await
        .map_err(admin_error)?;

    info!(
        id = %created.id,
        trust_domain_a = %a.name,
        trust_domain_b = %b.name,
        "created relationship"
    );
    let names = HashMap::from([(a.id, a.name.into_inner()), (b.id, b.name.into_inner())]);
    Ok(Json(relationship_response(created, &names)))
}

/// query for `GET /relationships`.
#[derive(Debug, Default, Deserialize)]
pub struct ListRelationshipsParams {
    /// restrict to relationships this trust domain takes part in
    pub trust_domain_name: Option<String>,
    /// restrict to a consent status
    pub status: Option<String>,
    /// zero-based page number
    pub page_number: Option<u64>,
    /// page size; enables pagination
    pub page_size: Option<u64>,
}

/// `GET /relationships?trust_domain_name=&status=`
pub async fn list_relationships(
    State(state): State<AppState>,
    Query(params): Query<ListRelationshipsParams>,
) -> Result<Json<Vec<RelationshipResponse>>, ApiError> {
    let consent_status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<ConsentStatus>)
        .transpose()?;

    let trust_domain_id = match params.trust_domain_name.as_deref().filter(|s| !s.is_empty()) {
        Some(name) => Some(find_trust_domain(&state, name).await?.id),
        None => None,
    };

    let pagination = match params.page_size {
        Some(0) => return Err(ApiError::bad_request("page_size must be at least 1")),
        Some(page_size) => Some(Pagination {
            page_number: params.page_number.unwrap_or(0),
            page_size,
        }),
        None => None,
    };

    let filter = RelationshipFilter {
        consent_status,
        trust_domain_id,
        pagination,
    };
    let relationships = state.db.list_relationships(&filter).await?;
    let names = trust_domain_names(&state).await?;
    Ok(Json(
        relationships
            .into_iter()
            .map(|rel| relationship_response(rel, &names))
            .collect(),
    ))
}

/// `GET /relationships/{id}`
pub async fn get_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RelationshipResponse>, ApiError> {
    let rel = find_relationship(&state, &id).await?;
    let names = trust_domain_names(&state).await?;
    Ok(Json(relationship_response(rel, &names)))
}

/// `PATCH /relationships/{id}`: operator override of either side's consent.
pub async fn update_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateRelationshipRequest>,
) -> Result<Json<RelationshipResponse>, ApiError> {
    let id = parse_relationship_id(&id)?;
    let requested = [
        (ConsentSide::A, req.trust_domain_a_consent),
        (ConsentSide::B, req.trust_domain_b_consent),
    ];

    let updated = change_consent(&state, id, |rel| {
        let mut changes = Vec::new();
        for (side, next) in requested {
            let Some(next) = next else { continue };
            let expected = rel.consent(side);
            expected.transition(next)?;
            changes.push(ConsentChange {
                side,
                expected,
                next,
            });
        }
        Ok(changes)
    })
    .await?;
    info!(
        id = %updated.id,
        a_consent = %updated.trust_domain_a_consent,
        b_consent = %updated.trust_domain_b_consent,
        "updated relationship consent"
    );
    let names = trust_domain_names(&state).await?;
    Ok(Json(relationship_response(updated, &names)))
}

/// `DELETE /relationships/{id}`
pub async fn delete_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let rel = find_relationship(&state, &id).await?;
    state.db.delete_relationship(rel.id).await?;
    info!(id = %rel.id, "deleted relationship");
    Ok(StatusCode::NO_CONTENT)
}
