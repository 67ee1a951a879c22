//! trust domain entity for database storage.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use galadriel_types::{TrustDomain, TrustDomainId, TrustDomainName};

use crate::Error;

/// trust domain database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "trust_domains")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub description: Option<String>,
    pub harvester_spiffe_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub onboarding_bundle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::bundle::Entity")]
    Bundle,
    #[sea_orm(has_many = "super::join_token::Entity")]
    JoinTokens,
}

impl Related<super::bundle::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bundle.def()
    }
}

impl Related<super::join_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JoinTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for TrustDomain {
    type Error = Error;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let name = TrustDomainName::new(model.name)
            .map_err(|e| Error::InvalidData(e.to_string()))?;
        Ok(TrustDomain {
            id: TrustDomainId(model.id),
            name,
            description: model.description,
            harvester_spiffe_id: model.harvester_spiffe_id,
            onboarding_bundle: model.onboarding_bundle,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

impl From<&TrustDomain> for ActiveModel {
    fn from(td: &TrustDomain) -> Self {
        ActiveModel {
            id: Set(td.id.0),
            name: Set(td.name.as_str().to_string()),
            description: Set(td.description.clone()),
            harvester_spiffe_id: Set(td.harvester_spiffe_id.clone()),
            onboarding_bundle: Set(td.onboarding_bundle.clone()),
            created_at: Set(td.created_at),
            updated_at: Set(td.updated_at),
        }
    }
}
