//! Sale entity model
//!
//! Stored copy of a marketplace sale, one row per `(tenant_id, natural_key)`
//! where the natural key is the order id.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sales")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: String,

    /// String form of the order id
    pub natural_key: String,

    pub order_id: i64,

    pub order_item_id: Option<i64>,

    pub tsin: Option<i64>,

    pub sku: Option<String>,

    pub product_title: Option<String>,

    pub quantity: Option<i32>,

    pub selling_price: Option<f64>,

    pub sale_status: Option<String>,

    /// Order date as sent by the API; never rewritten after insert
    pub order_date: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub raw: JsonValue,

    pub first_seen_at: DateTimeWithTimeZone,

    pub last_updated_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
