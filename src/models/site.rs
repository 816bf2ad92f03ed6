//! Site entity: a pre-registered scrape target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authentication strategy a Site is configured to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Basic,
    Form,
    Oauth,
    ApiKey,
    Cookie,
}

/// A pre-registered source website with its URL, auth method, and scraping
/// configuration. `url` is unique across the system (I-spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub category: Option<String>,
    pub auth_type: AuthType,
    /// Sealed credential blob, if any. Plaintext never lives here.
    pub encrypted_credentials: Option<Vec<u8>>,
    /// The JSON blob holding auth/pagination/selectors/rate_limit_ms/extraction_hints.
    pub scraping_config: serde_json::Value,
    pub active: bool,
    /// Set by the Scrape Runner when the Compliance Gate blocks the site.
    pub legal_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
