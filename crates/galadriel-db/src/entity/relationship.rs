//! relationship entity for database storage.
//!
//! a relationship references two trust domains. the pair is stored in the order
//! it was proposed; `pair_key` holds the two ids in sorted order and carries the
//! unique index, so `(a, b)` and `(b, a)` collide in the database.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use galadriel_types::{ConsentStatus, Relationship, RelationshipId, TrustDomainId};

use crate::Error;

/// relationship database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "relationships")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub trust_domain_a_id: Uuid,
    pub trust_domain_b_id: Uuid,
    /// `<lower id>:<higher id>`
    pub pair_key: String,
    /// one of pending, approved, denied
    pub trust_domain_a_consent: String,
    /// one of pending, approved, denied
    pub trust_domain_b_consent: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trust_domain::Entity",
        from = "Column::TrustDomainAId",
        to = "super::trust_domain::Column::Id"
    )]
    TrustDomainA,
    #[sea_orm(
        belongs_to = "super::trust_domain::Entity",
        from = "Column::TrustDomainBId",
        to = "super::trust_domain::Column::Id"
    )]
    TrustDomainB,
}

impl ActiveModelBehavior for ActiveModel {}

/// the order-independent key of a trust domain pair.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

fn parse_consent(s: &str) -> Result<ConsentStatus, Error> {
    s.parse().map_err(|e: galadriel_types::Error| Error::InvalidData(e.to_string()))
}

impl TryFrom<Model> for Relationship {
    type Error = Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Relationship {
            id: RelationshipId(model.id),
            trust_domain_a_id: TrustDomainId(model.trust_domain_a_id),
            trust_domain_b_id: TrustDomainId(model.trust_domain_b_id),
            trust_domain_a_consent: parse_consent(&model.trust_domain_a_consent)?,
            trust_domain_b_consent: parse_consent(&model.trust_domain_b_consent)?,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

impl From<&Relationship> for ActiveModel {
    fn from(rel: &Relationship) -> Self {
        ActiveModel {
            id: Set(rel.id.0),
            trust_domain_a_id: Set(rel.trust_domain_a_id.0),
            trust_domain_b_id: Set(rel.trust_domain_b_id.0),
            pair_key: Set(pair_key(rel.trust_domain_a_id.0, rel.trust_domain_b_id.0)),
            trust_domain_a_consent: Set(rel.trust_domain_a_consent.as_str().to_string()),
            trust_domain_b_consent: Set(rel.trust_domain_b_consent.as_str().to_string()),
            created_at: Set(rel.created_at),
            updated_at: Set(rel.updated_at),
        }
    }
}
