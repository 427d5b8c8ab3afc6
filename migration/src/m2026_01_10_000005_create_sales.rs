//! Migration to create the sales table, keyed per tenant by order id.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Sales::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Sales::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Sales::TenantId).text().not_null())
                    .col(ColumnDef::new(Sales::NaturalKey).text().not_null())
                    .col(ColumnDef::new(Sales::OrderId).big_integer().not_null())
                    .col(ColumnDef::new(Sales::OrderItemId).big_integer().null())
                    .col(ColumnDef::new(Sales::Tsin).big_integer().null())
                    .col(ColumnDef::new(Sales::Sku).text().null())
                    .col(ColumnDef::new(Sales::ProductTitle).text().null())
                    .col(ColumnDef::new(Sales::Quantity).integer().null())
                    .col(ColumnDef::new(Sales::SellingPrice).double().null())
                    .col(ColumnDef::new(Sales::SaleStatus).text().null())
                    .col(ColumnDef::new(Sales::OrderDate).text().null())
                    .col(ColumnDef::new(Sales::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(Sales::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sales::LastUpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sales::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_sales_tenant_key")
                    .table(Sales::Table)
                    .col(Sales::TenantId)
                    .col(Sales::NaturalKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_sales_tenant_key").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Sales::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Sales {
    Table,
    Id,
    TenantId,
    NaturalKey,
    OrderId,
    OrderItemId,
    Tsin,
    Sku,
    ProductTitle,
    Quantity,
    SellingPrice,
    SaleStatus,
    OrderDate,
    Raw,
    FirstSeenAt,
    LastUpdatedAt,
    CreatedAt,
}
