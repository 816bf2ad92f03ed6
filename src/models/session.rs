//! Session entity: persisted authenticated browser state, reused across Jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated browser state: cookies + storage, captured once by the Auth
/// Engine and reused by subsequent Jobs for the same Site until it expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserState {
    pub cookies: Vec<Cookie>,
    pub local_storage: std::collections::HashMap<String, String>,
    pub session_storage: std::collections::HashMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
}

/// `{site_id (primary), cookies[], local_storage{}, session_storage{}, captured_at}`.
/// TTL = 23h, process-wide, shared across jobs for the same site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub site_id: Uuid,
    pub state: BrowserState,
}
