//! bundle entity for database storage.

use chrono::{DateTime, Utc};
use sea_orm::Set;
use sea_orm::entity::prelude::*;

use galadriel_types::{Bundle, BundleId, TrustDomainId};

/// bundle database model.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "bundles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub trust_domain_id: Uuid,
    pub data: Vec<u8>,
    pub digest: String,
    pub signature: Option<Vec<u8>>,
    pub signing_certificate: Option<Vec<u8>>,
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

impl From<Model> for Bundle {
    fn from(model: Model) -> Self {
        Bundle {
            id: BundleId(model.id),
            trust_domain_id: TrustDomainId(model.trust_domain_id),
            data: model.data,
            digest: model.digest,
            signature: model.signature,
            signing_certificate: model.signing_certificate,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl From<&Bundle> for ActiveModel {
    fn from(bundle: &Bundle) -> Self {
        ActiveModel {
            id: Set(bundle.id.0),
            trust_domain_id: Set(bundle.trust_domain_id.0),
            data: Set(bundle.data.clone()),
            digest: Set(bundle.digest.clone()),
            signature: Set(bundle.signature.clone()),
            signing_certificate: Set(bundle.signing_certificate.clone()),
            created_at: Set(bundle.created_at),
            updated_at: Set(bundle.updated_at),
        }
    }
}
