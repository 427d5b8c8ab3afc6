//! ProductOffer entity model
//!
//! Stored copy of a marketplace offer, one row per `(tenant_id, natural_key)`
//! where the natural key is the offer's TSIN.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "product_offers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: String,

    /// String form of the TSIN
    pub natural_key: String,

    pub tsin_id: i64,

    pub offer_id: Option<i64>,

    pub sku: Option<String>,

    pub barcode: Option<String>,

    pub title: Option<String>,

    pub selling_price: Option<f64>,

    pub rrp: Option<f64>,

    pub stock_at_takealot: Option<i64>,

    pub stock_on_way: Option<i64>,

    pub status: Option<String>,

    /// Latest raw record as returned by the API
    #[sea_orm(column_type = "JsonBinary")]
    pub raw: JsonValue,

    pub first_seen_at: DateTimeWithTimeZone,

    pub last_updated_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
