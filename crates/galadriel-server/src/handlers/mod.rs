//! http handlers for the galadriel server surfaces.

pub mod admin;
mod error;
pub mod harvester;
mod health;

pub use error::{ApiError, JsonBody, OptionExt, ResultExt};
pub use health::health;

use std::collections::HashMap;

use galadriel_db::{ConsentChange, Datastore};
use galadriel_types::{Relationship, RelationshipId, TrustDomain, TrustDomainId, TrustDomainName};
use tracing::debug;

use crate::AppState;

/// parse a trust domain name from a path or body.
pub(crate) fn parse_trust_domain_name(name: &str) -> Result<TrustDomainName, ApiError> {
    Ok(TrustDomainName::new(name)?)
}

/// parse a relationship id from a path segment.
pub(crate) fn parse_relationship_id(id: &str) -> Result<RelationshipId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid relationship id: {id}")))
}

/// id to name lookup over every trust domain.
pub(crate) async fn trust_domain_names(
    state: &AppState,
) -> Result<HashMap<TrustDomainId, String>, ApiError> {
    Ok(state
        .db
        .list_trust_domains()
        .await?
        .into_iter()
        .map(|td: TrustDomain| (td.id, td.name.into_inner()))
        .collect())
}

/// attempts before a contended consent write gives up.
const CONSENT_ATTEMPTS: usize = 5;

/// read a relationship, plan consent changes against it and apply them with a
/// conditional update, re-reading when another writer got there first.
///
/// `plan` sees the current row and may reject it; an empty plan writes nothing.
pub(crate) async fn change_consent<F>(
    state: &AppState,
    id: RelationshipId,
    mut plan: F,
) -> Result<Relationship, ApiError>
where
    F: FnMut(&Relationship) -> Result<Vec<ConsentChange>, ApiError>,
{
    for attempt in 1..=CONSENT_ATTEMPTS {
        let current = state
            .db
            .find_relationship_by_id(id)
            .await?
            .or_not_found(&format!("relationship {id} not found"))?;
        let changes = plan(&current)?;
        if changes.is_empty() {
            return Ok(current);
        }
        if let Some(updated) = state.db.update_consent(id, &changes).await? {
            return Ok(updated);
        }
        debug!(relationship = %id, attempt, "consent changed underneath, retrying");
    }
    Err(ApiError::Conflict(format!(
        "relationship {id} is being updated concurrently"
    )))
}
