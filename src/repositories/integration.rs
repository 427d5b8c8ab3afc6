//! Integration repository
//!
//! Tenant-scoped access to marketplace integrations. API keys are encrypted on
//! the way in and only ever decrypted on demand for a chunk.

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use uuid::Uuid;

use crate::crypto::{ApiKey, CryptoError, CryptoKey, decrypt_api_key, encrypt_api_key};
use crate::models::SyncStrategy;
use crate::models::integration::{self, Entity as Integration};

/// Repository for integration database operations
#[derive(Debug, Clone)]
pub struct IntegrationRepository {
    db: DatabaseConnection,
    crypto_key: CryptoKey,
}

impl IntegrationRepository {
    pub fn new(db: DatabaseConnection, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Creates an active integration with an encrypted API key
    pub async fn create(
        &self,
        tenant_id: &str,
        name: &str,
        api_key: &ApiKey,
        strategies: &[SyncStrategy],
    ) -> Result<integration::Model> {
        let id = Uuid::new_v4();
        let ciphertext = encrypt_api_key(&self.crypto_key, tenant_id, id, api_key)
            .context("failed to encrypt integration API key")?;
        let now = Utc::now().fixed_offset();

        let model = integration::ActiveModel {
            id: Set(id),
            tenant_id: Set(tenant_id.to_string()),
            name: Set(name.to_string()),
            api_key_ciphertext: Set(ciphertext),
            enabled_strategies: Set(serde_json::json!(
                strategies.iter().map(|s| s.as_str()).collect::<Vec<_>>()
            )),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(
            integration_id = %model.id,
            tenant_id = %model.tenant_id,
            "Integration created"
        );
        Ok(model)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<integration::Model>, DbErr> {
        Integration::find_by_id(id).one(&self.db).await
    }

    /// Find an integration, ensuring it belongs to the tenant
    pub async fn find_for_tenant(
        &self,
        tenant_id: &str,
        id: Uuid,
    ) -> Result<Option<integration::Model>, DbErr> {
        Integration::find_by_id(id)
            .filter(integration::Column::TenantId.eq(tenant_id))
            .one(&self.db)
            .await
    }

    /// Oldest active integration of a tenant, used when a trigger names none
    pub async fn first_active_for_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<integration::Model>, DbErr> {
        Integration::find()
            .filter(integration::Column::TenantId.eq(tenant_id))
            .filter(integration::Column::Active.eq(true))
            .order_by_asc(integration::Column::CreatedAt)
            .one(&self.db)
            .await
    }

    /// Active integrations across all tenants with `strategy` enabled
    pub async fn list_active(
        &self,
        strategy: SyncStrategy,
    ) -> Result<Vec<integration::Model>, DbErr> {
        let rows = Integration::find()
            .filter(integration::Column::Active.eq(true))
            .order_by_asc(integration::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter(|row| row.strategy_enabled(strategy))
            .collect())
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<integration::Model> {
        let existing = self
            .find(id)
            .await?
            .with_context(|| format!("integration '{id}' not found"))?;

        let mut model: integration::ActiveModel = existing.into();
        model.active = Set(active);
        model.updated_at = Set(Utc::now().fixed_offset());
        Ok(model.update(&self.db).await?)
    }

    pub fn decrypt_api_key(&self, integration: &integration::Model) -> Result<ApiKey, CryptoError> {
        decrypt_api_key(
            &self.crypto_key,
            &integration.tenant_id,
            integration.id,
            &integration.api_key_ciphertext,
        )
        .inspect_err(|_| {
            tracing::error!(
                integration_id = %integration.id,
                tenant_id = %integration.tenant_id,
                "Integration API key decryption failed"
            );
        })
    }
}
