//! trust domain entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TrustDomainId, TrustDomainName};

/// a trust domain registered with the server.
///
/// the name is immutable once created; every other field may be updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDomain {
    /// store-assigned id, nil until created
    pub id: TrustDomainId,

    /// spiffe trust domain name, globally unique
    pub name: TrustDomainName,

    /// free-form operator description
    pub description: Option<String>,

    /// spiffe id bound to the onboarded harvester
    pub harvester_spiffe_id: Option<String>,

    /// pem bundle handed out during onboarding
    pub onboarding_bundle: Option<String>,

    /// when this trust domain was created
    pub created_at: DateTime<Utc>,

    /// when this trust domain was last written
    pub updated_at: DateTime<Utc>,
}

impl TrustDomain {
    /// create a new, not yet stored, trust domain.
    pub fn new(name: TrustDomainName) -> Self {
        let now = Utc::now();
        Self {
            id: TrustDomainId::nil(),
            name,
            description: None,
            harvester_spiffe_id: None,
            onboarding_bundle: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
