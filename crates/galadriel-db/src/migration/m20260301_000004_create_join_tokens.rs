//! create join_tokens table migration.

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
                    .table(JoinTokens::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(JoinTokens::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(JoinTokens::Token).string_len(64).not_null())
                    .col(ColumnDef::new(JoinTokens::TrustDomainId).uuid().not_null())
                    .col(
                        ColumnDef::new(JoinTokens::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JoinTokens::Used)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(JoinTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(JoinTokens::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_join_tokens_trust_domain")
                            .from(JoinTokens::Table, JoinTokens::TrustDomainId)
                            .to(TrustDomains::Table, TrustDomains::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_join_tokens_token")
                    .table(JoinTokens::Table)
                    .col(JoinTokens::Token)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_join_tokens_trust_domain_id")
                    .table(JoinTokens::Table)
                    .col(JoinTokens::TrustDomainId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JoinTokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum JoinTokens {
    #[sea_orm(iden = "join_tokens")]
    Table,
    Id,
    Token,
    TrustDomainId,
    ExpiresAt,
    Used,
    CreatedAt,
    UpdatedAt,
}
