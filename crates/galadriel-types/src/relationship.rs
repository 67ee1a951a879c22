//! federation relationships and the per-side consent state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, RelationshipId, TrustDomainId};

/// one side's position on a proposed federation relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
    /// no decision yet
    #[default]
    Pending,
    /// this side accepts the peer's bundle
    Approved,
    /// this side refuses to federate
    Denied,
}

impl ConsentStatus {
    /// all statuses, in display order.
    pub const ALL: [ConsentStatus; 3] = [Self::Approved, Self::Denied, Self::Pending];

    /// the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    /// whether consent may move from `self` to `next`.
    ///
    /// pending may become approved or denied, approved and denied may swap,
    /// and nothing returns to pending. staying in place is always allowed.
    pub fn can_transition_to(&self, next: ConsentStatus) -> bool {
        use ConsentStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Pending, Approved | Denied) => true,
            (Approved, Denied) | (Denied, Approved) => true,
            _ => false,
        }
    }

    /// validate a transition, returning the target on success.
    pub fn transition(self, next: ConsentStatus) -> Result<ConsentStatus, Error> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            other => Err(Error::InvalidConsentStatus(other.to_string())),
        }
    }
}

/// which side of a relationship a consent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsentSide {
    /// `trust_domain_a_*`
    A,
    /// `trust_domain_b_*`
    B,
}

/// an unordered pairing of two trust domains with one consent per side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// store-assigned id, nil until created
    pub id: RelationshipId,

    /// first trust domain of the pair
    pub trust_domain_a_id: TrustDomainId,

    /// second trust domain of the pair
    pub trust_domain_b_id: TrustDomainId,

    /// consent of side a
    pub trust_domain_a_consent: ConsentStatus,

    /// consent of side b
    pub trust_domain_b_consent: ConsentStatus,

    /// when this relationship was created
    pub created_at: DateTime<Utc>,

    /// when this relationship was last written
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// propose a new relationship; both consents start pending.
    pub fn new(a: TrustDomainId, b: TrustDomainId) -> Self {
        let now = Utc::now();
        Self {
            id: RelationshipId::nil(),
            trust_domain_a_id: a,
            trust_domain_b_id: b,
            trust_domain_a_consent: ConsentStatus::Pending,
            trust_domain_b_consent: ConsentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// true if the trust domain is either side of this relationship.
    pub fn involves(&self, td: TrustDomainId) -> bool {
        self.trust_domain_a_id == td || self.trust_domain_b_id == td
    }

    /// the side belonging to `td`, if it participates.
    pub fn side_of(&self, td: TrustDomainId) -> Option<ConsentSide> {
        if self.trust_domain_a_id == td {
            Some(ConsentSide::A)
        } else if self.trust_domain_b_id == td {
            Some(ConsentSide::B)
        } else {
            None
        }
    }

    /// the consent held by one side.
    pub fn consent(&self, side: ConsentSide) -> ConsentStatus {
        match side {
            ConsentSide::A => self.trust_domain_a_consent,
            ConsentSide::B => self.trust_domain_b_consent,
        }
    }

    /// the consent of the side belonging to `td`, if it participates.
    pub fn consent_of(&self, td: TrustDomainId) -> Option<ConsentStatus> {
        if self.trust_domain_a_id == td {
            Some(self.trust_domain_a_consent)
        } else if self.trust_domain_b_id == td {
            Some(self.trust_domain_b_consent)
        } else {
            None
        }
    }

    /// the other side of the relationship, if `td` participates.
    pub fn peer_of(&self, td: TrustDomainId) -> Option<TrustDomainId> {
        if self.trust_domain_a_id == td {
            Some(self.trust_domain_b_id)
        } else if self.trust_domain_b_id == td {
            Some(self.trust_domain_a_id)
        } else {
            None
        }
    }

    /// set the consent of the side belonging to `td`.
    ///
    /// returns `Ok(None)` when `td` is not a participant.
    pub fn set_consent_of(
        &mut self,
        td: TrustDomainId,
        next: ConsentStatus,
    ) -> Result<Option<ConsentStatus>, Error> {
        let slot = if self.trust_domain_a_id == td {
            &mut self.trust_domain_a_consent
        } else if self.trust_domain_b_id == td {
            &mut self.trust_domain_b_consent
        } else {
            return Ok(None);
        };
        *slot = slot.transition(next)?;
        Ok(Some(*slot))
    }

    /// both sides approved, so bundles flow in both directions.
    pub fn is_fully_approved(&self) -> bool {
        self.trust_domain_a_consent == ConsentStatus::Approved
            && self.trust_domain_b_consent == ConsentStatus::Approved
    }
}
