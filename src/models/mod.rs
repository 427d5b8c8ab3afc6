//! # Data Models
//!
//! This module contains all the data models used throughout the marketsync service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod execution_log;
pub mod integration;
pub mod product_offer;
pub mod sale;
pub mod sync_job;

pub use execution_log::{Entity as ExecutionLog, LogStatus};
pub use integration::Entity as Integration;
pub use product_offer::Entity as ProductOffer;
pub use sale::Entity as Sale;
pub use sync_job::{DataType, Entity as SyncJob, JobStatus, SyncStrategy, TriggerType};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "marketsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
