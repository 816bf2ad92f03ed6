//! Auth Engine: drives the five authentication strategies (none, form,
//! basic, API key, cookie) through a live browser page.
//!
//! Follows a page-driving shape (stealth first, navigate, poll for a DOM
//! condition with a bounded timeout) and a fallback-on-error idiom; form
//! field probing generalizes a single hardcoded selector into a
//! prioritized selector list.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chromiumoxide::Page;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::models::credential::PlaintextCredentials;
use crate::models::session::{BrowserState, Cookie};
use crate::models::AuthType;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("a CAPTCHA blocked the login and no solver resolved it")]
    CaptchaBlocked,
    #[error("no login form selectors matched the page")]
    LoginFormNotFound,
    #[error("authentication timed out after {0:?}")]
    AuthTimeout(Duration),
    #[error("{0} authentication is not implemented")]
    NotImplemented(&'static str),
    #[error("browser error: {0}")]
    Browser(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Whether the Scrape Runner should invalidate the cached session and
    /// retry once, versus failing the job outright.
    #[must_use]
    pub fn is_retryable_once(&self) -> bool {
        matches!(self, Self::AuthFailure(_))
    }
}

/// Outcome of one `authenticate` call. `ok=false` carries `error` describing
/// why, harvested from the page where possible.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub ok: bool,
    pub cookies: Vec<Cookie>,
    pub headers: HashMap<String, String>,
    pub error: Option<String>,
}

impl AuthOutcome {
    fn success(cookies: Vec<Cookie>, headers: HashMap<String, String>) -> Self {
        Self {
            ok: true,
            cookies,
            headers,
            error: None,
        }
    }

    /// Bundle this outcome's cookies into a `BrowserState` the Session Store
    /// can cache.
    #[must_use]
    pub fn into_browser_state(self) -> BrowserState {
        BrowserState {
            cookies: self.cookies,
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            captured_at: chrono::Utc::now(),
        }
    }
}

/// Username/password selector candidates tried in order when the site config
/// doesn't provide explicit ones.
const COMMON_USERNAME_SELECTORS: &[&str] = &[
    "input[name=username]",
    "input[name=email]",
    "input[type=email]",
    "input#username",
    "input#email",
    "input[autocomplete=username]",
];

const COMMON_PASSWORD_SELECTORS: &[&str] = &["input[type=password]", "input[name=password]", "input#password"];

const COMMON_SUBMIT_SELECTORS: &[&str] = &[
    "button[type=submit]",
    "input[type=submit]",
    "button#login",
    "button#submit",
];

const CAPTCHA_SELECTORS: &[&str] = &[
    "iframe[src*=recaptcha]",
    "iframe[src*=hcaptcha]",
    ".g-recaptcha",
    "#captcha",
    "[data-sitekey]",
];

const LOGOUT_INDICATORS: &[&str] = &["a[href*=logout]", "a[href*=signout]", "button#logout"];

pub struct AuthEngine {
    http: reqwest::Client,
    challenge_solver_url: Option<String>,
}

impl AuthEngine {
    #[must_use]
    pub fn new(http: reqwest::Client, challenge_solver_url: Option<String>) -> Self {
        Self {
            http,
            challenge_solver_url,
        }
    }

    /// Drive `page` through the strategy named by `auth_type`, producing an
    /// `AuthOutcome` the Scrape Runner caches via the Session Store on success.
    pub async fn authenticate(
        &self,
        page: &Page,
        site_url: &str,
        auth_type: AuthType,
        credentials: Option<&PlaintextCredentials>,
        config: &AuthConfig,
    ) -> Result<AuthOutcome, AuthError> {
        match auth_type {
            AuthType::None => Ok(AuthOutcome::success(Vec::new(), HashMap::new())),
            AuthType::Form => self.authenticate_form(page, credentials, config).await,
            AuthType::Basic => self.authenticate_basic(site_url, credentials).await,
            AuthType::ApiKey => self.authenticate_api_key(site_url, credentials, config).await,
            AuthType::Cookie => self.authenticate_cookie(config),
            AuthType::Oauth => Err(AuthError::NotImplemented("oauth2 authorization-code")),
        }
    }

    async fn authenticate_form(
        &self,
        page: &Page,
        credentials: Option<&PlaintextCredentials>,
        config: &AuthConfig,
    ) -> Result<AuthOutcome, AuthError> {
        let creds = credentials.ok_or_else(|| AuthError::AuthFailure("no credentials configured for form auth".into()))?;
        let login_url = config
            .login_url
            .as_deref()
            .ok_or_else(|| AuthError::AuthFailure("site config is missing auth.login_url".into()))?;

        tokio::time::timeout(Duration::from_secs(15), page.goto(login_url))
            .await
            .map_err(|_| AuthError::AuthTimeout(Duration::from_secs(15)))?
            .map_err(|e| AuthError::Browser(e.to_string()))?;
        let _ = page.wait_for_navigation().await;

        let username_selectors = selector_candidates(config.selectors.get("username"), COMMON_USERNAME_SELECTORS);
        let password_selectors = selector_candidates(config.selectors.get("password"), COMMON_PASSWORD_SELECTORS);

        let username_el = find_first(page, &username_selectors)
            .await
            .ok_or(AuthError::LoginFormNotFound)?;
        let password_el = find_first(page, &password_selectors)
            .await
            .ok_or(AuthError::LoginFormNotFound)?;

        if let Some(username) = creds.username.as_deref() {
            type_with_human_delay(&username_el, username).await.map_err(AuthError::Browser)?;
        }
        if let Some(password) = creds.password.as_deref() {
            type_with_human_delay(&password_el, password).await.map_err(AuthError::Browser)?;
        }

        if captcha_present(page).await {
            match self.solve_captcha(page).await {
                Ok(()) => info!("captcha solved via external solver"),
                Err(e) => {
                    warn!(error = %e, "captcha solver failed or unconfigured");
                    return Err(AuthError::CaptchaBlocked);
                }
            }
        }

        let submit_selectors = selector_candidates(config.selectors.get("submit"), COMMON_SUBMIT_SELECTORS);
        match find_first(page, &submit_selectors).await {
            Some(el) => {
                el.click().await.map_err(|e| AuthError::Browser(e.to_string()))?;
            }
            None => {
                password_el
                    .press_key("Enter")
                    .await
                    .map_err(|e| AuthError::Browser(e.to_string()))?;
            }
        }

        let _ = tokio::time::timeout(Duration::from_secs(15), page.wait_for_navigation()).await;

        if self.confirm_login_success(page, login_url, config).await {
            let cookies = read_cookies(page).await.map_err(|e| AuthError::Browser(e.to_string()))?;
            Ok(AuthOutcome::success(cookies, HashMap::new()))
        } else {
            let error_text = harvest_error_message(page).await;
            Err(AuthError::AuthFailure(error_text.unwrap_or_else(|| "login did not succeed".to_string())))
        }
    }

    async fn confirm_login_success(&self, page: &Page, login_url: &str, config: &AuthConfig) -> bool {
        if let Some(indicator) = config.success_indicator.as_deref()
            && page.find_element(indicator).await.is_ok()
        {
            return true;
        }
        if let Ok(Some(url)) = page.url().await
            && !url.contains(login_url_path(login_url))
        {
            return true;
        }
        for selector in LOGOUT_INDICATORS {
            if page.find_element(*selector).await.is_ok() {
                return true;
            }
        }
        false
    }

    async fn authenticate_basic(
        &self,
        site_url: &str,
        credentials: Option<&PlaintextCredentials>,
    ) -> Result<AuthOutcome, AuthError> {
        let creds = credentials.ok_or_else(|| AuthError::AuthFailure("no credentials configured for basic auth".into()))?;
        let username = creds.username.clone().unwrap_or_default();
        let password = creds.password.clone().unwrap_or_default();

        let response = self
            .http
            .get(site_url)
            .basic_auth(&username, Some(&password))
            .timeout(Duration::from_secs(15))
            .send()
            .await?;

        if response.status().as_u16() < 400 {
            let mut headers = HashMap::new();
            headers.insert(
                "Authorization".to_string(),
                format!("Basic {}", BASE64_STANDARD.encode(format!("{username}:{password}"))),
            );
            Ok(AuthOutcome::success(Vec::new(), headers))
        } else {
            Err(AuthError::AuthFailure(format!("basic auth probe returned {}", response.status())))
        }
    }

    async fn authenticate_api_key(
        &self,
        site_url: &str,
        credentials: Option<&PlaintextCredentials>,
        config: &AuthConfig,
    ) -> Result<AuthOutcome, AuthError> {
        let creds = credentials.ok_or_else(|| AuthError::AuthFailure("no credentials configured for api_key auth".into()))?;
        let api_key = creds
            .api_key
            .clone()
            .ok_or_else(|| AuthError::AuthFailure("credentials are missing api_key".into()))?;

        let test_url = config.test_endpoint.as_deref().unwrap_or(site_url);
        let mut request = self.http.get(test_url).timeout(Duration::from_secs(15));
        let mut headers = HashMap::new();

        if let Some(header_name) = config.header_name.as_deref() {
            request = request.header(header_name, &api_key);
            headers.insert(header_name.to_string(), api_key.clone());
        } else if let Some(query_param) = config.query_param.as_deref() {
            request = request.query(&[(query_param, &api_key)]);
        } else {
            request = request.header("Authorization", format!("Bearer {api_key}"));
            headers.insert("Authorization".to_string(), format!("Bearer {api_key}"));
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(AuthOutcome::success(Vec::new(), headers))
        } else {
            Err(AuthError::AuthFailure(format!("api_key probe returned {}", response.status())))
        }
    }

    fn authenticate_cookie(&self, config: &AuthConfig) -> Result<AuthOutcome, AuthError> {
        if config.cookies.is_empty() {
            return Err(AuthError::AuthFailure("cookie auth configured with no cookies".into()));
        }
        let cookies = config
            .cookies
            .iter()
            .map(|(name, value)| Cookie {
                name: name.clone(),
                value: value.clone(),
                domain: String::new(),
                path: "/".to_string(),
                expires: None,
                http_only: false,
                secure: true,
            })
            .collect();
        Ok(AuthOutcome::success(cookies, HashMap::new()))
    }

    async fn solve_captcha(&self, page: &Page) -> anyhow::Result<()> {
        let solver_url = self
            .challenge_solver_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no challenge-solver URL configured"))?;
        let page_url = page.url().await.ok().flatten().unwrap_or_default();
        let response = self
            .http
            .post(solver_url)
            .json(&serde_json::json!({ "page_url": page_url }))
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        if body.get("solved").and_then(serde_json::Value::as_bool).unwrap_or(false) {
            Ok(())
        } else {
            Err(anyhow::anyhow!("solver reported failure"))
        }
    }
}

fn selector_candidates(configured: Option<&String>, common: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(s) = configured {
        out.push(s.clone());
    }
    out.extend(common.iter().map(|s| (*s).to_string()));
    out
}

async fn find_first(page: &Page, selectors: &[String]) -> Option<chromiumoxide::element::Element> {
    for selector in selectors {
        if let Ok(el) = page.find_element(selector.as_str()).await {
            return Some(el);
        }
    }
    None
}

/// Type `text` character by character with a small randomized delay, mimicking
/// human input speed.
async fn type_with_human_delay(element: &chromiumoxide::element::Element, text: &str) -> Result<(), String> {
    element.click().await.map_err(|e| e.to_string())?;
    for ch in text.chars() {
        element.type_str(ch.to_string()).await.map_err(|e| e.to_string())?;
        let delay_ms = rand::rng().random_range(20..80);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Ok(())
}

async fn captcha_present(page: &Page) -> bool {
    for selector in CAPTCHA_SELECTORS {
        if page.find_element(*selector).await.is_ok() {
            debug!(selector, "captcha element detected before submit");
            return true;
        }
    }
    false
}

async fn harvest_error_message(page: &Page) -> Option<String> {
    const ERROR_SELECTORS: &[&str] = &[".error", ".alert-danger", "[role=alert]", "#login-error"];
    for selector in ERROR_SELECTORS {
        if let Ok(el) = page.find_element(*selector).await
            && let Ok(Some(text)) = el.inner_text().await
            && !text.trim().is_empty()
        {
            return Some(text.trim().to_string());
        }
    }
    None
}

async fn read_cookies(page: &Page) -> Result<Vec<Cookie>, String> {
    let cdp_cookies = page.get_cookies().await.map_err(|e| e.to_string())?;
    Ok(cdp_cookies
        .into_iter()
        .map(|c| Cookie {
            name: c.name,
            value: c.value,
            domain: c.domain,
            path: c.path,
            expires: if c.expires > 0.0 {
                chrono::DateTime::from_timestamp(c.expires as i64, 0)
            } else {
                None
            },
            http_only: c.http_only,
            secure: c.secure,
        })
        .collect())
}

fn login_url_path(login_url: &str) -> String {
    url::Url::parse(login_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| login_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_candidates_prefer_configured_selector() {
        let configured = Some("#my-username".to_string());
        let candidates = selector_candidates(configured.as_ref(), COMMON_USERNAME_SELECTORS);
        assert_eq!(candidates[0], "#my-username");
        assert!(candidates.len() > 1);
    }

    #[test]
    fn cookie_auth_rejects_empty_cookie_list() {
        let engine = AuthEngine::new(reqwest::Client::new(), None);
        let result = engine.authenticate_cookie(&AuthConfig::default());
        assert!(matches!(result, Err(AuthError::AuthFailure(_))));
    }

    #[test]
    fn is_retryable_once_only_for_auth_failure() {
        assert!(AuthError::AuthFailure("x".into()).is_retryable_once());
        assert!(!AuthError::CaptchaBlocked.is_retryable_once());
        assert!(!AuthError::LoginFormNotFound.is_retryable_once());
    }
}
