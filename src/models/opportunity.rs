//! Opportunity entity: a single advertised tender/grant/contract.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single advertised tender/grant/contract with its metadata and (optionally)
/// attached documents. `source_url` is unique, providing dedup across runs.
/// `site_id` always equals the owning Job's `site_id`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Opportunity {
    pub id: Uuid,
    pub site_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub value: Option<Decimal>,
    /// ISO-4217 three-letter code, default `"USD"`.
    pub currency: String,
    pub reference_number: Option<String>,
    pub source_url: String,
    pub categories: Vec<String>,
    pub location: Option<String>,
    /// Opaque extraction output, preserved verbatim for downstream consumers.
    pub extracted_payload: serde_json::Value,
    /// `[0, 1]`; see `extractor::confidence`.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    pub const DEFAULT_CURRENCY: &'static str = "USD";
}
