//! Document entity: an attachment downloaded and textified by the Document Processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing state of a Document. Only `object_key` is guaranteed unique;
/// status transitions pending -> processing -> {done, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// An attachment belonging to an Opportunity (I3: a Document exists only if
/// the originating Opportunity exists).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub filename: String,
    /// `pdfs/{YYYYMMDD_HHMMSS}_{md5(url)}.pdf`
    pub object_key: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub extracted_text: Option<String>,
    pub extracted_payload: Option<serde_json::Value>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
