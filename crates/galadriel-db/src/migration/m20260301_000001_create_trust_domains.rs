//! create trust_domains table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TrustDomains::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TrustDomains::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(TrustDomains::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(TrustDomains::Description).string())
                    .col(ColumnDef::new(TrustDomains::HarvesterSpiffeId).string())
                    .col(ColumnDef::new(TrustDomains::OnboardingBundle).text())
                    .col(
                        ColumnDef::new(TrustDomains::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrustDomains::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trust_domains_name")
                    .table(TrustDomains::Table)
                    .col(TrustDomains::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TrustDomains::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum TrustDomains {
    #[sea_orm(iden = "trust_domains")]
    Table,
    Id,
    Name,
    Description,
    HarvesterSpiffeId,
    OnboardingBundle,
    CreatedAt,
    UpdatedAt,
}
