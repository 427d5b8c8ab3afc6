//! # Record Upserter
//!
//! Maps raw marketplace records to stored rows keyed by `(tenant_id, natural_key)`.
//!
//! Each page is deduplicated (last occurrence wins), split into batches of at
//! most `write_batch_limit` records and written one transaction per batch.
//! Every record write runs in its own savepoint so one bad record is counted
//! and logged without rolling back its neighbours.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait, Unchanged,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::MAX_WRITE_BATCH;
use crate::models::{DataType, product_offer, sale};
use crate::telemetry::metric_names;

/// Counts for one page (or any run of pages when summed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub new: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Records handled per transaction, in write order
    pub batch_sizes: Vec<usize>,
}

impl UpsertOutcome {
    pub fn written(&self) -> u64 {
        self.new + self.updated
    }
}

/// Offer as returned by `/v2/offers`. Natural key: TSIN.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OfferRecord {
    pub tsin_id: Option<i64>,
    pub offer_id: Option<i64>,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub title: Option<String>,
    pub selling_price: Option<f64>,
    pub rrp: Option<f64>,
    pub stock_at_takealot_total: Option<i64>,
    pub total_stock_on_way: Option<i64>,
    pub status: Option<String>,
}

/// Sale as returned by `/v2/sales`. Natural key: order id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SaleRecord {
    pub order_id: Option<i64>,
    pub order_item_id: Option<i64>,
    pub tsin: Option<i64>,
    pub sku: Option<String>,
    pub product_title: Option<String>,
    pub quantity: Option<i32>,
    pub selling_price: Option<f64>,
    pub sale_status: Option<String>,
    pub order_date: Option<String>,
}

/// A record type the upserter knows how to key, compare and persist.
#[async_trait]
trait RecordKind: DeserializeOwned + Send + Sync {
    type Row: Send + Sync;

    const LABEL: &'static str;

    fn natural_key(&self) -> Option<String>;

    /// Whether any mutable field differs from the stored row.
    fn differs_from(&self, row: &Self::Row) -> bool;

    async fn load_existing(
        txn: &DatabaseTransaction,
        tenant_id: &str,
        keys: Vec<String>,
    ) -> Result<HashMap<String, Self::Row>, DbErr>;

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        tenant_id: &str,
        key: &str,
        raw: JsonValue,
        now: DateTimeWithTimeZone,
    ) -> Result<(), DbErr>;

    async fn update(
        &self,
        txn: &DatabaseTransaction,
        row: &Self::Row,
        raw: JsonValue,
        now: DateTimeWithTimeZone,
    ) -> Result<(), DbErr>;
}

#[async_trait]
impl RecordKind for OfferRecord {
    type Row = product_offer::Model;

    const LABEL: &'static str = "offer";

    fn natural_key(&self) -> Option<String> {
        self.tsin_id.map(|tsin| tsin.to_string())
    }

    fn differs_from(&self, row: &Self::Row) -> bool {
        self.selling_price != row.selling_price
            || self.rrp != row.rrp
            || self.stock_at_takealot_total != row.stock_at_takealot
            || self.total_stock_on_way != row.stock_on_way
            || self.status != row.status
    }

    async fn load_existing(
        txn: &DatabaseTransaction,
        tenant_id: &str,
        keys: Vec<String>,
    ) -> Result<HashMap<String, Self::Row>, DbErr> {
        Ok(product_offer::Entity::find()
            .filter(product_offer::Column::TenantId.eq(tenant_id))
            .filter(product_offer::Column::NaturalKey.is_in(keys))
            .all(txn)
            .await?
            .into_iter()
            .map(|row| (row.natural_key.clone(), row))
            .collect())
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        tenant_id: &str,
        key: &str,
        raw: JsonValue,
        now: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        let row = product_offer::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id.to_string()),
            natural_key: Set(key.to_string()),
            tsin_id: Set(self.tsin_id.unwrap_or_default()),
            offer_id: Set(self.offer_id),
            sku: Set(self.sku.clone()),
            barcode: Set(self.barcode.clone()),
            title: Set(self.title.clone()),
            selling_price: Set(self.selling_price),
            rrp: Set(self.rrp),
            stock_at_takealot: Set(self.stock_at_takealot_total),
            stock_on_way: Set(self.total_stock_on_way),
            status: Set(self.status.clone()),
            raw: Set(raw),
            first_seen_at: Set(now),
            last_updated_at: Set(now),
            created_at: Set(now),
        };
        product_offer::Entity::insert(row)
            .exec_without_returning(txn)
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        txn: &DatabaseTransaction,
        row: &Self::Row,
        raw: JsonValue,
        now: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        product_offer::ActiveModel {
            id: Unchanged(row.id),
            selling_price: Set(self.selling_price),
            rrp: Set(self.rrp),
            stock_at_takealot: Set(self.stock_at_takealot_total),
            stock_on_way: Set(self.total_stock_on_way),
            status: Set(self.status.clone()),
            raw: Set(raw),
            last_updated_at: Set(now),
            ..Default::default()
        }
        .update(txn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordKind for SaleRecord {
    type Row = sale::Model;

    const LABEL: &'static str = "sale";

    fn natural_key(&self) -> Option<String> {
        self.order_id.map(|id| id.to_string())
    }

    fn differs_from(&self, row: &Self::Row) -> bool {
        self.selling_price != row.selling_price
            || self.quantity != row.quantity
            || self.sale_status != row.sale_status
    }

    async fn load_existing(
        txn: &DatabaseTransaction,
        tenant_id: &str,
        keys: Vec<String>,
    ) -> Result<HashMap<String, Self::Row>, DbErr> {
        Ok(sale::Entity::find()
            .filter(sale::Column::TenantId.eq(tenant_id))
            .filter(sale::Column::NaturalKey.is_in(keys))
            .all(txn)
            .await?
            .into_iter()
            .map(|row| (row.natural_key.clone(), row))
            .collect())
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        tenant_id: &str,
        key: &str,
        raw: JsonValue,
        now: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        let row = sale::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id.to_string()),
            natural_key: Set(key.to_string()),
            order_id: Set(self.order_id.unwrap_or_default()),
            order_item_id: Set(self.order_item_id),
            tsin: Set(self.tsin),
            sku: Set(self.sku.clone()),
            product_title: Set(self.product_title.clone()),
            quantity: Set(self.quantity),
            selling_price: Set(self.selling_price),
            sale_status: Set(self.sale_status.clone()),
            order_date: Set(self.order_date.clone()),
            raw: Set(raw),
            first_seen_at: Set(now),
            last_updated_at: Set(now),
            created_at: Set(now),
        };
        sale::Entity::insert(row).exec_without_returning(txn).await?;
        Ok(())
    }

    async fn update(
        &self,
        txn: &DatabaseTransaction,
        row: &Self::Row,
        raw: JsonValue,
        now: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        // order_date is immutable once stored
        sale::ActiveModel {
            id: Unchanged(row.id),
            selling_price: Set(self.selling_price),
            quantity: Set(self.quantity),
            sale_status: Set(self.sale_status.clone()),
            raw: Set(raw),
            last_updated_at: Set(now),
            ..Default::default()
        }
        .update(txn)
        .await?;
        Ok(())
    }
}

struct Keyed<R> {
    key: String,
    record: R,
    raw: JsonValue,
}

enum WriteResult {
    Inserted,
    Updated,
}

pub struct RecordUpserter {
    db: DatabaseConnection,
    batch_limit: usize,
}

impl RecordUpserter {
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_batch_limit(db, MAX_WRITE_BATCH)
    }

    /// `batch_limit` is clamped to `1..=500`.
    pub fn with_batch_limit(db: DatabaseConnection, batch_limit: usize) -> Self {
        Self {
            db,
            batch_limit: batch_limit.clamp(1, MAX_WRITE_BATCH),
        }
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    /// Upsert one page of raw records for a tenant.
    ///
    /// Per-record problems are counted in the outcome; only batch-level database
    /// failures (begin/commit) are returned as errors.
    pub async fn upsert_page(
        &self,
        tenant_id: &str,
        data_type: DataType,
        records: &[JsonValue],
    ) -> Result<UpsertOutcome, DbErr> {
        let outcome = match data_type {
            DataType::Products => self.upsert_typed::<OfferRecord>(tenant_id, records).await?,
            DataType::Sales => self.upsert_typed::<SaleRecord>(tenant_id, records).await?,
        };

        let dt = data_type.as_str();
        for (label, count) in [
            ("new", outcome.new),
            ("updated", outcome.updated),
            ("skipped", outcome.skipped),
            ("error", outcome.errors),
        ] {
            if count > 0 {
                metrics::counter!(
                    metric_names::RECORDS_UPSERTED,
                    "data_type" => dt,
                    "outcome" => label
                )
                .increment(count);
            }
        }

        Ok(outcome)
    }

    async fn upsert_typed<R: RecordKind>(
        &self,
        tenant_id: &str,
        records: &[JsonValue],
    ) -> Result<UpsertOutcome, DbErr> {
        let mut outcome = UpsertOutcome::default();
        let unique = dedupe::<R>(tenant_id, records, &mut outcome);

        for batch in unique.chunks(self.batch_limit) {
            outcome.batch_sizes.push(batch.len());
            metrics::histogram!(metric_names::UPSERT_BATCH_SIZE).record(batch.len() as f64);
            self.write_batch(tenant_id, batch, &mut outcome).await?;
        }

        tracing::debug!(
            tenant_id,
            kind = R::LABEL,
            new = outcome.new,
            updated = outcome.updated,
            skipped = outcome.skipped,
            errors = outcome.errors,
            batches = outcome.batch_sizes.len(),
            "Page upserted"
        );

        Ok(outcome)
    }

    async fn write_batch<R: RecordKind>(
        &self,
        tenant_id: &str,
        batch: &[Keyed<R>],
        outcome: &mut UpsertOutcome,
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;
        let keys = batch.iter().map(|k| k.key.clone()).collect();
        let existing = R::load_existing(&txn, tenant_id, keys).await?;
        let now = Utc::now().fixed_offset();

        for item in batch {
            let stored = existing.get(&item.key);
            if let Some(row) = stored
                && !item.record.differs_from(row)
            {
                outcome.skipped += 1;
                continue;
            }

            let savepoint = txn.begin().await?;
            let result = match stored {
                None => item
                    .record
                    .insert(&savepoint, tenant_id, &item.key, item.raw.clone(), now)
                    .await
                    .map(|_| WriteResult::Inserted),
                Some(row) => item
                    .record
                    .update(&savepoint, row, item.raw.clone(), now)
                    .await
                    .map(|_| WriteResult::Updated),
            };

            match result {
                Ok(written) => {
                    savepoint.commit().await?;
                    match written {
                        WriteResult::Inserted => outcome.new += 1,
                        WriteResult::Updated => outcome.updated += 1,
                    }
                }
                Err(error) => {
                    savepoint.rollback().await?;
                    outcome.errors += 1;
                    tracing::warn!(
                        tenant_id,
                        kind = R::LABEL,
                        natural_key = %item.key,
                        error = %error,
                        "Record write failed"
                    );
                }
            }
        }

        txn.commit().await
    }
}

/// Parse, key and deduplicate a page. The last occurrence of a key wins.
fn dedupe<R: RecordKind>(
    tenant_id: &str,
    records: &[JsonValue],
    outcome: &mut UpsertOutcome,
) -> Vec<Keyed<R>> {
    let mut slots: Vec<Option<Keyed<R>>> = Vec::with_capacity(records.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());

    for (position, raw) in records.iter().enumerate() {
        let record = match R::deserialize(raw) {
            Ok(record) => record,
            Err(error) => {
                outcome.errors += 1;
                tracing::warn!(tenant_id, kind = R::LABEL, position, %error, "Unparseable record");
                continue;
            }
        };

        let Some(key) = record.natural_key() else {
            outcome.skipped += 1;
            tracing::warn!(tenant_id, kind = R::LABEL, position, "Record without natural key skipped");
            continue;
        };

        if let Some(previous) = index.insert(key.clone(), slots.len()) {
            slots[previous] = None;
            outcome.skipped += 1;
        }
        slots.push(Some(Keyed {
            key,
            record,
            raw: raw.clone(),
        }));
    }

    slots.into_iter().flatten().collect()
}
