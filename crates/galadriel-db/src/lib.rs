//! datastore for the galadriel server.
//!
//! this crate provides persistent storage for:
//! - Trust domains
//! - Federation relationships
//! - Trust bundles
//! - Join tokens
//!
//! sqlite and postgresql are supported; the engine is chosen by the scheme of
//! the connection string and the schema is migrated on open.

#![warn(missing_docs)]

mod entity;
mod error;
mod migration;

pub use error::Error;

use std::future::Future;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, Database as SeaOrmDatabase,
    DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use sea_orm_migration::MigratorTrait;

use galadriel_types::{
    Bundle, BundleId, ConsentSide, ConsentStatus, JoinToken, JoinTokenId, Relationship, RelationshipId,
    TrustDomain, TrustDomainId, TrustDomainName, bundle_digest,
};

/// result type for datastore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// zero-based page selection for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// page to return, starting at 0
    pub page_number: u64,
    /// rows per page, at least 1
    pub page_size: u64,
}

/// filters for [`Datastore::list_relationships`].
///
/// `consent_status` alone matches relationships where either side holds that
/// consent. `trust_domain_id` alone matches relationships the trust domain takes
/// part in. with both set, the consent of the side belonging to the trust domain
/// must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipFilter {
    /// consent to match
    pub consent_status: Option<ConsentStatus>,
    /// participant to match
    pub trust_domain_id: Option<TrustDomainId>,
    /// page selection; all rows when absent
    pub pagination: Option<Pagination>,
}

impl RelationshipFilter {
    /// relationships the trust domain participates in.
    pub fn for_trust_domain(id: TrustDomainId) -> Self {
        Self {
            trust_domain_id: Some(id),
            ..Default::default()
        }
    }

    /// restrict to a consent status.
    pub fn with_status(mut self, status: Option<ConsentStatus>) -> Self {
        self.consent_status = status;
        self
    }

    fn condition(&self) -> Condition {
        use entity::relationship::Column;

        match (self.trust_domain_id, self.consent_status) {
            (Some(td), Some(status)) => Condition::any()
                .add(
                    Condition::all()
                        .add(Column::TrustDomainAId.eq(td.0))
                        .add(Column::TrustDomainAConsent.eq(status.as_str())),
                )
                .add(
                    Condition::all()
                        .add(Column::TrustDomainBId.eq(td.0))
                        .add(Column::TrustDomainBConsent.eq(status.as_str())),
                ),
            (Some(td), None) => Condition::any()
                .add(Column::TrustDomainAId.eq(td.0))
                .add(Column::TrustDomainBId.eq(td.0)),
            (None, Some(status)) => Condition::any()
                .add(Column::TrustDomainAConsent.eq(status.as_str()))
                .add(Column::TrustDomainBConsent.eq(status.as_str())),
            (None, None) => Condition::all(),
        }
    }
}

/// a compare-and-set on one side's consent.
///
/// applied only while the side still holds `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentChange {
    /// side to write
    pub side: ConsentSide,
    /// consent the caller read
    pub expected: ConsentStatus,
    /// consent to store
    pub next: ConsentStatus,
}

/// datastore trait for galadriel storage operations.
///
/// every mutable entity has a single `create_or_update_*` operation: a nil id
/// inserts and assigns a fresh id, anything else updates the existing row in
/// place. all writes stamp `updated_at`.
pub trait Datastore: Send + Sync {
    // ─── Health Check ─────────────────────────────────────────────────────────

    /// ping the database to verify connectivity.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    // ─── Trust Domain Operations ─────────────────────────────────────────────

    /// create or update a trust domain. the name cannot change on update.
    fn create_or_update_trust_domain(
        &self,
        td: &TrustDomain,
    ) -> impl Future<Output = Result<TrustDomain>> + Send;

    /// get a trust domain by id.
    fn find_trust_domain_by_id(
        &self,
        id: TrustDomainId,
    ) -> impl Future<Output = Result<Option<TrustDomain>>> + Send;

    /// get a trust domain by name.
    fn find_trust_domain_by_name(
        &self,
        name: &TrustDomainName,
    ) -> impl Future<Output = Result<Option<TrustDomain>>> + Send;

    /// list all trust domains ordered by name.
    fn list_trust_domains(&self) -> impl Future<Output = Result<Vec<TrustDomain>>> + Send;

    /// delete a trust domain. fails with [`Error::ForeignKey`] while a
    /// relationship or bundle references it.
    fn delete_trust_domain(&self, id: TrustDomainId) -> impl Future<Output = Result<()>> + Send;

    // ─── Relationship Operations ─────────────────────────────────────────────

    /// create or update a relationship. the pair cannot change on update.
    ///
    /// an update rewrites both consents; use [`Datastore::update_consent`]
    /// where another writer may touch the same row.
    fn create_or_update_relationship(
        &self,
        rel: &Relationship,
    ) -> impl Future<Output = Result<Relationship>> + Send;

    /// apply consent changes in a single conditional update.
    ///
    /// only the named columns are written. returns `Ok(None)` when a side no
    /// longer holds its `expected` consent, leaving the row untouched, and
    /// [`Error::NotFound`] when the relationship is gone.
    fn update_consent(
        &self,
        id: RelationshipId,
        changes: &[ConsentChange],
    ) -> impl Future<Output = Result<Option<Relationship>>> + Send;

    /// get a relationship by id.
    fn find_relationship_by_id(
        &self,
        id: RelationshipId,
    ) -> impl Future<Output = Result<Option<Relationship>>> + Send;

    /// list relationships ordered by creation time.
    fn list_relationships(
        &self,
        filter: &RelationshipFilter,
    ) -> impl Future<Output = Result<Vec<Relationship>>> + Send;

    /// delete a relationship.
    fn delete_relationship(&self, id: RelationshipId) -> impl Future<Output = Result<()>> + Send;

    // ─── Bundle Operations ───────────────────────────────────────────────────

    /// create or update the bundle of a trust domain.
    ///
    /// a nil id replaces any bundle already stored for the trust domain. the
    /// digest must equal the sha-256 of the data.
    fn create_or_update_bundle(&self, bundle: &Bundle)
    -> impl Future<Output = Result<Bundle>> + Send;

    /// get a bundle by id.
    fn find_bundle_by_id(&self, id: BundleId) -> impl Future<Output = Result<Option<Bundle>>> + Send;

    /// get the bundle of a trust domain.
    fn find_bundle_by_trust_domain_id(
        &self,
        id: TrustDomainId,
    ) -> impl Future<Output = Result<Option<Bundle>>> + Send;

    /// list all bundles.
    fn list_bundles(&self) -> impl Future<Output = Result<Vec<Bundle>>> + Send;

    /// delete a bundle.
    fn delete_bundle(&self, id: BundleId) -> impl Future<Output = Result<()>> + Send;

    // ─── Join Token Operations ───────────────────────────────────────────────

    /// create or update a join token. a used token can never become unused.
    fn create_or_update_join_token(
        &self,
        token: &JoinToken,
    ) -> impl Future<Output = Result<JoinToken>> + Send;

    /// get a join token by id.
    fn find_join_token_by_id(
        &self,
        id: JoinTokenId,
    ) -> impl Future<Output = Result<Option<JoinToken>>> + Send;

    /// get a join token by its token string.
    fn find_join_token(&self, token: &str)
    -> impl Future<Output = Result<Option<JoinToken>>> + Send;

    /// list the join tokens of a trust domain.
    fn list_join_tokens(
        &self,
        trust_domain_id: TrustDomainId,
    ) -> impl Future<Output = Result<Vec<JoinToken>>> + Send;

    /// atomically mark an unused, unexpired token as used.
    ///
    /// returns the consumed token, or `None` if it is unknown, expired or
    /// already used. at most one concurrent caller wins.
    fn consume_join_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<JoinToken>>> + Send;

    /// delete a join token.
    fn delete_join_token(&self, id: JoinTokenId) -> impl Future<Output = Result<()>> + Send;
}

/// the main datastore implementation using sea-orm.
#[derive(Clone)]
pub struct GaladrielDb {
    conn: DatabaseConnection,
}

impl GaladrielDb {
    /// open the datastore named by a connection string and migrate it.
    ///
    /// accepted forms: `sqlite://<path>`, `sqlite:<path>`, `sqlite::memory:`,
    /// `postgres://...` and `postgresql://...`.
    pub async fn connect(datastore: &str) -> Result<Self> {
        let url = Self::build_connection_url(datastore)?;
        let conn: DatabaseConnection = SeaOrmDatabase::connect(&url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let db = Self { conn };
        db.migrate().await?;
        tracing::info!(engine = %db.engine(), "datastore ready");
        Ok(db)
    }

    /// create an in-memory sqlite database for testing.
    pub async fn new_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// build a sea-orm compatible connection url from a connection string.
    fn build_connection_url(datastore: &str) -> Result<String> {
        if datastore.starts_with("postgres://") || datastore.starts_with("postgresql://") {
            return Ok(datastore.to_string());
        }
        if datastore == "sqlite::memory:" {
            return Ok(datastore.to_string());
        }
        if datastore.starts_with("sqlite:") {
            // add ?mode=rwc to create the file if it doesn't exist
            if datastore.contains('?') {
                return Ok(datastore.to_string());
            }
            return Ok(format!("{}?mode=rwc", datastore));
        }
        Err(Error::InvalidData(format!(
            "unsupported datastore connection string: {}",
            datastore.split(':').next().unwrap_or_default()
        )))
    }

    /// run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        migration::Migrator::up(&self.conn, None)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;
        Ok(())
    }

    fn engine(&self) -> &'static str {
        match self.conn.get_database_backend() {
            sea_orm::DatabaseBackend::Sqlite => "sqlite",
            sea_orm::DatabaseBackend::Postgres => "postgres",
            sea_orm::DatabaseBackend::MySql => "mysql",
        }
    }
}

/// bundle digests are recomputed on every write rather than trusted.
fn check_digest(bundle: &Bundle) -> Result<()> {
    if bundle.digest != bundle_digest(&bundle.data) {
        return Err(Error::InvalidData(
            "bundle digest does not match sha-256 of data".to_string(),
        ));
    }
    Ok(())
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> Error {
    Error::NotFound(format!("{} {}", kind, id))
}

impl Datastore for GaladrielDb {
    // health check

    async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(())
    }

    // trust domain operations

    async fn create_or_update_trust_domain(&self, td: &TrustDomain) -> Result<TrustDomain> {
        let now = Utc::now();
        let mut td = td.clone();
        td.updated_at = now;

        if td.id.is_nil() {
            td.id = TrustDomainId::new_random();
            td.created_at = now;
            let model: entity::trust_domain::ActiveModel = (&td).into();
            let result = model.insert(&self.conn).await?;
            return result.try_into();
        }

        let existing = entity::trust_domain::Entity::find_by_id(td.id.0)
            .one(&self.conn)
            .await?
            .ok_or_else(|| not_found("trust domain", td.id))?;
        if existing.name != td.name.as_str() {
            return Err(Error::InvalidData(
                "trust domain name cannot be changed".to_string(),
            ));
        }
        td.created_at = existing.created_at;

        let model: entity::trust_domain::ActiveModel = (&td).into();
        let result = model.update(&self.conn).await?;
        result.try_into()
    }

    async fn find_trust_domain_by_id(&self, id: TrustDomainId) -> Result<Option<TrustDomain>> {
        entity::trust_domain::Entity::find_by_id(id.0)
            .one(&self.conn)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_trust_domain_by_name(
        &self,
        name: &TrustDomainName,
    ) -> Result<Option<TrustDomain>> {
        entity::trust_domain::Entity::find()
            .filter(entity::trust_domain::Column::Name.eq(name.as_str()))
            .one(&self.conn)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_trust_domains(&self) -> Result<Vec<TrustDomain>> {
        entity::trust_domain::Entity::find()
            .order_by_asc(entity::trust_domain::Column::Name)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn delete_trust_domain(&self, id: TrustDomainId) -> Result<()> {
        let result = entity::trust_domain::Entity::delete_by_id(id.0)
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(not_found("trust domain", id));
        }
        Ok(())
    }

    // relationship operations

    async fn create_or_update_relationship(&self, rel: &Relationship) -> Result<Relationship> {
        use entity::relationship::Entity;

        if rel.trust_domain_a_id == rel.trust_domain_b_id {
            return Err(Error::InvalidData(
                "a relationship needs two distinct trust domains".to_string(),
            ));
        }

        let now = Utc::now();
        let mut rel = rel.clone();
        rel.updated_at = now;

        if !rel.id.is_nil() {
            let existing = Entity::find_by_id(rel.id.0)
                .one(&self.conn)
                .await?
                .ok_or_else(|| not_found("relationship", rel.id))?;
            if existing.trust_domain_a_id != rel.trust_domain_a_id.0
                || existing.trust_domain_b_id != rel.trust_domain_b_id.0
            {
                return Err(Error::InvalidData(
                    "relationship trust domains cannot be changed".to_string(),
                ));
            }
            rel.created_at = existing.created_at;
            let model: entity::relationship::ActiveModel = (&rel).into();
            let result = model.update(&self.conn).await?;
            return result.try_into();
        }

        rel.id = RelationshipId::new_random();
        rel.created_at = now;

        // (b, a) collides with (a, b) on the pair key index
        let model: entity::relationship::ActiveModel = (&rel).into();
        let result = model.insert(&self.conn).await.map_err(|e| match Error::from(e) {
            Error::AlreadyExists(_) => Error::AlreadyExists(
                "relationship between these trust domains".to_string(),
            ),
            other => other,
        })?;
        result.try_into()
    }

    async fn update_consent(
        &self,
        id: RelationshipId,
        changes: &[ConsentChange],
    ) -> Result<Option<Relationship>> {
        use entity::relationship::{Column, Entity};

        let mut update = Entity::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id.0));
        for change in changes {
            let column = match change.side {
                ConsentSide::A => Column::TrustDomainAConsent,
                ConsentSide::B => Column::TrustDomainBConsent,
            };
            update = update
                .col_expr(column, Expr::value(change.next.as_str()))
                .filter(column.eq(change.expected.as_str()));
        }

        let result = update.exec(&self.conn).await?;
        let current = self
            .find_relationship_by_id(id)
            .await?
            .ok_or_else(|| not_found("relationship", id))?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        Ok(Some(current))
    }

    async fn find_relationship_by_id(&self, id: RelationshipId) -> Result<Option<Relationship>> {
        entity::relationship::Entity::find_by_id(id.0)
            .one(&self.conn)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_relationships(&self, filter: &RelationshipFilter) -> Result<Vec<Relationship>> {
        use entity::relationship::{Column, Entity};

        let query = Entity::find()
            .filter(filter.condition())
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);

        let models = match filter.pagination {
            Some(page) => {
                if page.page_size == 0 {
                    return Err(Error::InvalidData(
                        "page size must be at least 1".to_string(),
                    ));
                }
                query
                    .paginate(&self.conn, page.page_size)
                    .fetch_page(page.page_number)
                    .await?
            }
            None => query.all(&self.conn).await?,
        };

        models.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_relationship(&self, id: RelationshipId) -> Result<()> {
        let result = entity::relationship::Entity::delete_by_id(id.0)
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(not_found("relationship", id));
        }
        Ok(())
    }

    // bundle operations

    async fn create_or_update_bundle(&self, bundle: &Bundle) -> Result<Bundle> {
        use entity::bundle::{Column, Entity};

        check_digest(bundle)?;

        let now = Utc::now();
        let mut bundle = bundle.clone();
        bundle.updated_at = now;

        let txn = self.conn.begin().await?;
        let existing = if bundle.id.is_nil() {
            Entity::find()
                .filter(Column::TrustDomainId.eq(bundle.trust_domain_id.0))
                .one(&txn)
                .await?
        } else {
            let existing = Entity::find_by_id(bundle.id.0)
                .one(&txn)
                .await?
                .ok_or_else(|| not_found("bundle", bundle.id))?;
            if existing.trust_domain_id != bundle.trust_domain_id.0 {
                return Err(Error::InvalidData(
                    "bundle trust domain cannot be changed".to_string(),
                ));
            }
            Some(existing)
        };

        let result = match existing {
            Some(existing) => {
                bundle.id = BundleId(existing.id);
                bundle.created_at = existing.created_at;
                let model: entity::bundle::ActiveModel = (&bundle).into();
                model.update(&txn).await?
            }
            None => {
                bundle.id = BundleId::new_random();
                bundle.created_at = now;
                let model: entity::bundle::ActiveModel = (&bundle).into();
                model.insert(&txn).await?
            }
        };
        txn.commit().await?;
        Ok(result.into())
    }

    async fn find_bundle_by_id(&self, id: BundleId) -> Result<Option<Bundle>> {
        Ok(entity::bundle::Entity::find_by_id(id.0)
            .one(&self.conn)
            .await?
            .map(Into::into))
    }

    async fn find_bundle_by_trust_domain_id(&self, id: TrustDomainId) -> Result<Option<Bundle>> {
        Ok(entity::bundle::Entity::find()
            .filter(entity::bundle::Column::TrustDomainId.eq(id.0))
            .one(&self.conn)
            .await?
            .map(Into::into))
    }

    async fn list_bundles(&self) -> Result<Vec<Bundle>> {
        Ok(entity::bundle::Entity::find()
            .all(&self.conn)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn delete_bundle(&self, id: BundleId) -> Result<()> {
        let result = entity::bundle::Entity::delete_by_id(id.0)
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(not_found("bundle", id));
        }
        Ok(())
    }

    // join token operations

    async fn create_or_update_join_token(&self, token: &JoinToken) -> Result<JoinToken> {
        let now = Utc::now();
        let mut token = token.clone();
        token.updated_at = now;

        if token.id.is_nil() {
            token.id = JoinTokenId::new_random();
            token.created_at = now;
            let model: entity::join_token::ActiveModel = (&token).into();
            let result = model.insert(&self.conn).await?;
            return Ok(result.into());
        }

        let existing = entity::join_token::Entity::find_by_id(token.id.0)
            .one(&self.conn)
            .await?
            .ok_or_else(|| not_found("join token", token.id))?;
        if existing.used && !token.used {
            return Err(Error::InvalidData(
                "a used join token cannot be marked unused".to_string(),
            ));
        }
        token.created_at = existing.created_at;

        let model: entity::join_token::ActiveModel = (&token).into();
        let result = model.update(&self.conn).await?;
        Ok(result.into())
    }

    async fn find_join_token_by_id(&self, id: JoinTokenId) -> Result<Option<JoinToken>> {
        Ok(entity::join_token::Entity::find_by_id(id.0)
            .one(&self.conn)
            .await?
            .map(Into::into))
    }

    async fn find_join_token(&self, token: &str) -> Result<Option<JoinToken>> {
        Ok(entity::join_token::Entity::find()
            .filter(entity::join_token::Column::Token.eq(token))
            .one(&self.conn)
            .await?
            .map(Into::into))
    }

    async fn list_join_tokens(&self, trust_domain_id: TrustDomainId) -> Result<Vec<JoinToken>> {
        Ok(entity::join_token::Entity::find()
            .filter(entity::join_token::Column::TrustDomainId.eq(trust_domain_id.0))
            .order_by_asc(entity::join_token::Column::CreatedAt)
            .all(&self.conn)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn consume_join_token(&self, token: &str) -> Result<Option<JoinToken>> {
        use entity::join_token::{Column, Entity};

        let now = Utc::now();
        let result = Entity::update_many()
            .col_expr(Column::Used, Expr::value(true))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Token.eq(token))
            .filter(Column::Used.eq(false))
            .filter(Column::ExpiresAt.gt(now))
            .exec(&self.conn)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_join_token(token).await
    }

    async fn delete_join_token(&self, id: JoinTokenId) -> Result<()> {
        let Some(model) = entity::join_token::Entity::find_by_id(id.0)
            .one(&self.conn)
            .await?
        else {
            return Err(not_found("join token", id));
        };
        model.delete(&self.conn).await?;
        Ok(())
    }
}
