//! create bundles table migration.

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
                    .table(Bundles::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Bundles::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Bundles::TrustDomainId).uuid().not_null())
                    .col(ColumnDef::new(Bundles::Data).blob().not_null())
                    .col(ColumnDef::new(Bundles::Digest).string_len(64).not_null())
                    .col(ColumnDef::new(Bundles::Signature).blob())
                    .col(ColumnDef::new(Bundles::SigningCertificate).blob())
                    .col(
                        ColumnDef::new(Bundles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bundles::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bundles_trust_domain")
                            .from(Bundles::Table, Bundles::TrustDomainId)
                            .to(TrustDomains::Table, TrustDomains::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // one bundle per trust domain
        manager
            .create_index(
                Index::create()
                    .name("idx_bundles_trust_domain_id")
                    .table(Bundles::Table)
                    .col(Bundles::TrustDomainId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Bundles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Bundles {
    #[sea_orm(iden = "bundles")]
    Table,
    Id,
    TrustDomainId,
    Data,
    Digest,
    Signature,
    SigningCertificate,
    CreatedAt,
    UpdatedAt,
}
