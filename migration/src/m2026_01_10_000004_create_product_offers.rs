//! Migration to create the product_offers table, keyed per tenant by TSIN.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProductOffers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductOffers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProductOffers::TenantId).text().not_null())
                    .col(ColumnDef::new(ProductOffers::NaturalKey).text().not_null())
                    .col(ColumnDef::new(ProductOffers::TsinId).big_integer().not_null())
                    .col(ColumnDef::new(ProductOffers::OfferId).big_integer().null())
                    .col(ColumnDef::new(ProductOffers::Sku).text().null())
                    .col(ColumnDef::new(ProductOffers::Barcode).text().null())
                    .col(ColumnDef::new(ProductOffers::Title).text().null())
                    .col(ColumnDef::new(ProductOffers::SellingPrice).double().null())
                    .col(ColumnDef::new(ProductOffers::Rrp).double().null())
                    .col(
                        ColumnDef::new(ProductOffers::StockAtTakealot)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(ProductOffers::StockOnWay).big_integer().null())
                    .col(ColumnDef::new(ProductOffers::Status).text().null())
                    .col(ColumnDef::new(ProductOffers::Raw).json_binary().not_null())
                    .col(
                        ColumnDef::new(ProductOffers::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductOffers::LastUpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductOffers::CreatedAt)
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
                    .name("uq_product_offers_tenant_key")
                    .table(ProductOffers::Table)
                    .col(ProductOffers::TenantId)
                    .col(ProductOffers::NaturalKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_product_offers_tenant_key").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ProductOffers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProductOffers {
    Table,
    Id,
    TenantId,
    NaturalKey,
    TsinId,
    OfferId,
    Sku,
    Barcode,
    Title,
    SellingPrice,
    Rrp,
    StockAtTakealot,
    StockOnWay,
    Status,
    Raw,
    FirstSeenAt,
    LastUpdatedAt,
    CreatedAt,
}
