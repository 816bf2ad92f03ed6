//! Persisted entities shared between the Job Queue, Scrape Runner, and the
//! (out-of-scope) HTTP façade.

pub mod credential;
pub mod document;
pub mod job;
pub mod opportunity;
pub mod session;
pub mod site;
pub mod verdict;

pub use credential::CredentialCiphertext;
pub use document::{Document, DocumentStatus};
pub use job::{Job, JobKind, JobStatus};
pub use opportunity::Opportunity;
pub use session::{BrowserState, Session};
pub use site::{AuthType, Site};
pub use verdict::{ComplianceVerdict, RiskLevel};
