//! Process configuration: `AppConfig` (startup, environment-driven) and
//! `SiteConfig` (per-Site JSON blob), split into `types.rs` / `builder.rs`.

mod builder;
mod types;

pub use builder::{from_env, AppConfigBuilder, ConfigError};
pub use types::{AppConfig, AuthConfig, PaginationConfig, SelectorsConfig, SiteConfig};
