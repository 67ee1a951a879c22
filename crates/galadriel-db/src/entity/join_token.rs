//! join token entity for database storage.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use galadriel_types::{JoinToken, JoinTokenId, TrustDomainId};

/// join token database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "join_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub token: String,
    pub trust_domain_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trust_domain::Entity",
        from = "Column::TrustDomainId",
        to = "super::trust_domain::Column::Id"
    )]
    TrustDomain,
}

impl Related<super::trust_domain::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrustDomain.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for JoinToken {
    fn from(model: Model) -> Self {
        JoinToken {
            id: JoinTokenId(model.id),
            token: model.token,
            trust_domain_id: TrustDomainId(model.trust_domain_id),
            expires_at: model.expires_at,
            used: model.used,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl From<&JoinToken> for ActiveModel {
    fn from(token: &JoinToken) -> Self {
        ActiveModel {
            id: Set(token.id.0),
            token: Set(token.token.clone()),
            trust_domain_id: Set(token.trust_domain_id.0),
            expires_at: Set(token.expires_at),
            used: Set(token.used),
            created_at: Set(token.created_at),
            updated_at: Set(token.updated_at),
        }
    }
}
