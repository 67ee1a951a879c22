//! database migrations for galadriel.

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_trust_domains;
mod m20260301_000002_create_relationships;
mod m20260301_000003_create_bundles;
mod m20260301_000004_create_join_tokens;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_trust_domains::Migration),
            Box::new(m20260301_000002_create_relationships::Migration),
            Box::new(m20260301_000003_create_bundles::Migration),
            Box::new(m20260301_000004_create_join_tokens::Migration),
        ]
    }
}
