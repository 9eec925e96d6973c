use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use procura_core::domain::negotiation::{Negotiation, Vendor, VendorId, VendorQuote};
use procura_core::domain::negotiation::QuoteId;
use procura_core::domain::procurement::{LineItem, ProcurementId};

use crate::{DbPool, StoreError};

#[async_trait]
pub trait NegotiationRepository: Send + Sync {
    /// Creates or replaces the negotiation round. Replacing drops any quotes
    /// from the previous round; a modified request starts collection afresh.
    async fn save_round(&self, negotiation: &Negotiation) -> Result<(), StoreError>;

    async fn find(&self, procurement_id: &ProcurementId)
        -> Result<Option<Negotiation>, StoreError>;

    /// One row per (procurement, vendor); a resubmission replaces the earlier
    /// quote in a single round trip.
    async fn upsert_quote(
        &self,
        procurement_id: &ProcurementId,
        quote: &VendorQuote,
    ) -> Result<(), StoreError>;

    async fn mark_reminded(
        &self,
        procurement_id: &ProcurementId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Conditional write: only the first caller lands the winner. Returns
    /// whether this call performed the finalization.
    async fn finalize(
        &self,
        procurement_id: &ProcurementId,
        winner: &VendorId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn cancel(&self, procurement_id: &ProcurementId) -> Result<(), StoreError>;

    /// Negotiations still collecting quotes, for the reminder sweep.
    async fn list_open(&self) -> Result<Vec<Negotiation>, StoreError>;
}

pub struct SqlNegotiationRepository {
    pool: DbPool,
}

impl SqlNegotiationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Decode(format!("bad {column} timestamp `{value}`: {err}")))
}

fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}

fn row_to_quote(row: &sqlx::sqlite::SqliteRow) -> Result<VendorQuote, StoreError> {
    let vendor_id: String =
        row.try_get("vendor_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let quote_id: String =
        row.try_get("quote_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let total_amount_str: String =
        row.try_get("total_amount").map_err(|e| StoreError::Decode(e.to_string()))?;
    let currency: String =
        row.try_get("currency").map_err(|e| StoreError::Decode(e.to_string()))?;
    let delivery_time: String =
        row.try_get("delivery_time").map_err(|e| StoreError::Decode(e.to_string()))?;
    let items_json: String =
        row.try_get("items_json").map_err(|e| StoreError::Decode(e.to_string()))?;
    let received_at_str: String =
        row.try_get("received_at").map_err(|e| StoreError::Decode(e.to_string()))?;
    let valid_until_str: Option<String> =
        row.try_get("valid_until").map_err(|e| StoreError::Decode(e.to_string()))?;

    let total_amount = Decimal::from_str(&total_amount_str)
        .map_err(|err| StoreError::Decode(format!("bad total_amount `{total_amount_str}`: {err}")))?;
    let items: Vec<LineItem> = serde_json::from_str(&items_json)
        .map_err(|err| StoreError::Decode(format!("bad quote items: {err}")))?;

    Ok(VendorQuote {
        vendor_id: VendorId(vendor_id),
        quote_id: QuoteId(quote_id),
        total_amount,
        currency,
        delivery_time,
        items,
        received_at: parse_timestamp(&received_at_str, "received_at")?,
        valid_until: parse_optional_timestamp(valid_until_str, "valid_until")?,
    })
}

fn row_to_negotiation(
    row: &sqlx::sqlite::SqliteRow,
    quotes: Vec<VendorQuote>,
) -> Result<Negotiation, StoreError> {
    let procurement_id: String =
        row.try_get("procurement_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let vendors_json: String =
        row.try_get("vendors_json").map_err(|e| StoreError::Decode(e.to_string()))?;
    let vendors_contacted: i64 =
        row.try_get("vendors_contacted").map_err(|e| StoreError::Decode(e.to_string()))?;
    let deadline_str: String =
        row.try_get("deadline").map_err(|e| StoreError::Decode(e.to_string()))?;
    let initiated_at_str: String =
        row.try_get("initiated_at").map_err(|e| StoreError::Decode(e.to_string()))?;
    let last_reminder_str: Option<String> =
        row.try_get("last_reminder_sent").map_err(|e| StoreError::Decode(e.to_string()))?;
    let finalized_at_str: Option<String> =
        row.try_get("finalized_at").map_err(|e| StoreError::Decode(e.to_string()))?;
    let winner_vendor_id: Option<String> =
        row.try_get("winner_vendor_id").map_err(|e| StoreError::Decode(e.to_string()))?;
    let cancelled: i64 =
        row.try_get("cancelled").map_err(|e| StoreError::Decode(e.to_string()))?;

    let vendors: Vec<Vendor> = serde_json::from_str(&vendors_json)
        .map_err(|err| StoreError::Decode(format!("bad vendors payload: {err}")))?;

    Ok(Negotiation {
        procurement_id: ProcurementId(procurement_id),
        vendors,
        vendors_contacted: vendors_contacted.max(0) as u32,
        quotes,
        deadline: parse_timestamp(&deadline_str, "deadline")?,
        initiated_at: parse_timestamp(&initiated_at_str, "initiated_at")?,
        last_reminder_sent: parse_optional_timestamp(last_reminder_str, "last_reminder_sent")?,
        finalized_at: parse_optional_timestamp(finalized_at_str, "finalized_at")?,
        winner_vendor_id: winner_vendor_id.map(VendorId),
        cancelled: cancelled != 0,
    })
}

const NEGOTIATION_COLUMNS: &str = "procurement_id, vendors_json, vendors_contacted, deadline,
            initiated_at, last_reminder_sent, finalized_at, winner_vendor_id, cancelled";

impl SqlNegotiationRepository {
    async fn quotes_for(&self, procurement_id: &ProcurementId) -> Result<Vec<VendorQuote>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT vendor_id, quote_id, total_amount, currency, delivery_time, items_json,
                    received_at, valid_until
             FROM negotiation_quote WHERE procurement_id = ? ORDER BY received_at ASC",
        )
        .bind(&procurement_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_quote).collect()
    }
}

#[async_trait]
impl NegotiationRepository for SqlNegotiationRepository {
    async fn save_round(&self, negotiation: &Negotiation) -> Result<(), StoreError> {
        let vendors_json = serde_json::to_string(&negotiation.vendors)
            .map_err(|err| StoreError::Decode(format!("unencodable vendors: {err}")))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO negotiation (procurement_id, vendors_json, vendors_contacted, deadline,
                                      initiated_at, last_reminder_sent, finalized_at,
                                      winner_vendor_id, cancelled)
             VALUES (?, ?, ?, ?, ?, NULL, NULL, NULL, 0)
             ON CONFLICT(procurement_id) DO UPDATE SET
                 vendors_json = excluded.vendors_json,
                 vendors_contacted = excluded.vendors_contacted,
                 deadline = excluded.deadline,
                 initiated_at = excluded.initiated_at,
                 last_reminder_sent = NULL,
                 finalized_at = NULL,
                 winner_vendor_id = NULL,
                 cancelled = 0",
        )
        .bind(&negotiation.procurement_id.0)
        .bind(vendors_json)
        .bind(i64::from(negotiation.vendors_contacted))
        .bind(negotiation.deadline.to_rfc3339())
        .bind(negotiation.initiated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM negotiation_quote WHERE procurement_id = ?")
            .bind(&negotiation.procurement_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find(
        &self,
        procurement_id: &ProcurementId,
    ) -> Result<Option<Negotiation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {NEGOTIATION_COLUMNS} FROM negotiation WHERE procurement_id = ?"
        ))
        .bind(&procurement_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => {
                let quotes = self.quotes_for(procurement_id).await?;
                Ok(Some(row_to_negotiation(r, quotes)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_quote(
        &self,
        procurement_id: &ProcurementId,
        quote: &VendorQuote,
    ) -> Result<(), StoreError> {
        let items_json = serde_json::to_string(&quote.items)
            .map_err(|err| StoreError::Decode(format!("unencodable quote items: {err}")))?;

        sqlx::query(
            "INSERT INTO negotiation_quote (procurement_id, vendor_id, quote_id, total_amount,
                                            currency, delivery_time, items_json, received_at,
                                            valid_until)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(procurement_id, vendor_id) DO UPDATE SET
                 quote_id = excluded.quote_id,
                 total_amount = excluded.total_amount,
                 currency = excluded.currency,
                 delivery_time = excluded.delivery_time,
                 items_json = excluded.items_json,
                 received_at = excluded.received_at,
                 valid_until = excluded.valid_until",
        )
        .bind(&procurement_id.0)
        .bind(&quote.vendor_id.0)
        .bind(&quote.quote_id.0)
        .bind(quote.total_amount.to_string())
        .bind(&quote.currency)
        .bind(&quote.delivery_time)
        .bind(items_json)
        .bind(quote.received_at.to_rfc3339())
        .bind(quote.valid_until.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_reminded(
        &self,
        procurement_id: &ProcurementId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE negotiation SET last_reminder_sent = ? WHERE procurement_id = ?")
            .bind(at.to_rfc3339())
            .bind(&procurement_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finalize(
        &self,
        procurement_id: &ProcurementId,
        winner: &VendorId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE negotiation SET finalized_at = ?, winner_vendor_id = ?
             WHERE procurement_id = ? AND finalized_at IS NULL AND cancelled = 0",
        )
        .bind(at.to_rfc3339())
        .bind(&winner.0)
        .bind(&procurement_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, procurement_id: &ProcurementId) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE negotiation SET cancelled = 1
             WHERE procurement_id = ? AND finalized_at IS NULL",
        )
        .bind(&procurement_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_open(&self) -> Result<Vec<Negotiation>, StoreError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {NEGOTIATION_COLUMNS} FROM negotiation
             WHERE finalized_at IS NULL AND cancelled = 0
             ORDER BY initiated_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut negotiations = Vec::with_capacity(rows.len());
        for row in &rows {
            let procurement_id: String =
                row.try_get("procurement_id").map_err(|e| StoreError::Decode(e.to_string()))?;
            let quotes = self.quotes_for(&ProcurementId(procurement_id)).await?;
            negotiations.push(row_to_negotiation(row, quotes)?);
        }

        Ok(negotiations)
    }
}
