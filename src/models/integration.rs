//! Integration entity model
//!
//! An integration links a tenant to one marketplace seller account. The API key
//! is stored as AES-256-GCM ciphertext bound to `tenant_id|integration_id`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::sync_job::SyncStrategy;

/// Integration entity representing a tenant's marketplace account
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant (admin account) owning the integration
    pub tenant_id: String,

    /// Human readable name of the seller account
    pub name: String,

    /// Encrypted marketplace API key
    pub api_key_ciphertext: Vec<u8>,

    /// Strategies the scheduled trigger may run for this integration (JSON array)
    #[sea_orm(column_type = "JsonBinary")]
    pub enabled_strategies: JsonValue,

    pub active: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether scheduled runs of `strategy` are enabled. Unknown entries are ignored.
    pub fn strategy_enabled(&self, strategy: SyncStrategy) -> bool {
        self.enabled_strategies
            .as_array()
            .is_some_and(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .any(|s| s == strategy.as_str())
            })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJobs,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
