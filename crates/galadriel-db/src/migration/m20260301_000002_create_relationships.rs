//! create relationships table migration.

use sea_orm_migration::prelude::*;

use super::m20260301_000001_create_trust_domains::TrustDomains;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Relationships::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Relationships::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Relationships::TrustDomainAId).uuid().not_null())
                    .col(ColumnDef::new(Relationships::TrustDomainBId).uuid().not_null())
                    .col(
                        ColumnDef::new(Relationships::PairKey)
                            .string_len(73)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Relationships::TrustDomainAConsent)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Relationships::TrustDomainBConsent)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Relationships::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Relationships::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_relationships_trust_domain_a")
                            .from(Relationships::Table, Relationships::TrustDomainAId)
                            .to(TrustDomains::Table, TrustDomains::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_relationships_trust_domain_b")
                            .from(Relationships::Table, Relationships::TrustDomainBId)
                            .to(TrustDomains::Table, TrustDomains::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // both orderings of a pair share one key
        manager
            .create_index(
                Index::create()
                    .name("idx_relationships_pair")
                    .table(Relationships::Table)
                    .col(Relationships::PairKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_relationships_trust_domain_a")
                    .table(Relationships::Table)
                    .col(Relationships::TrustDomainAId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_relationships_trust_domain_b")
                    .table(Relationships::Table)
                    .col(Relationships::TrustDomainBId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Relationships::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Relationships {
    #[sea_orm(iden = "relationships")]
    Table,
    Id,
    TrustDomainAId,
    TrustDomainBId,
    PairKey,
    TrustDomainAConsent,
    TrustDomainBConsent,
    CreatedAt,
    UpdatedAt,
}
