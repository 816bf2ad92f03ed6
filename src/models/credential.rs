//! Credential ciphertext: the sealed form of a Site's login material.
//!
//! Never logged, never emitted through any external interface (I4). The
//! plaintext form only ever exists transiently in worker memory, produced by
//! `vault::open` and consumed directly by the Auth Engine.

use serde::{Deserialize, Serialize};

/// Sealed bytes containing a JSON map of credential fields plus the
/// site-specific auth config (selectors, login URL, success indicators).
/// Deliberately has no `Debug` impl that prints its bytes raw; see
/// `vault::SealedBlob` for the wire format.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialCiphertext(pub Vec<u8>);

impl std::fmt::Debug for CredentialCiphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CredentialCiphertext")
            .field(&format!("<{} bytes sealed>", self.0.len()))
            .finish()
    }
}

/// Decrypted credential material, held only in worker memory for the
/// duration of one Auth Engine invocation.
#[derive(Clone, Serialize, Deserialize, zeroize::ZeroizeOnDrop)]
pub struct PlaintextCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    #[zeroize(skip)]
    #[serde(default)]
    pub cookies: Vec<(String, String)>,
}

impl std::fmt::Debug for PlaintextCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaintextCredentials")
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("cookies", &format!("<{} cookies>", self.cookies.len()))
            .finish()
    }
}
