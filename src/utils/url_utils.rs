//! URL validation utilities.

/// Check if a URL is valid
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    // Skip data URLs, javascript URLs, and other non-http schemes
    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match url::Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
        }
        Err(_) => false,
    }
}

/// Extract the registrable host from a URL, lowercased, for use as a rate-limiter
/// or compliance-cache key.
#[must_use]
pub fn host_key(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(is_valid_url("https://example.gov/tenders"));
        assert!(is_valid_url("http://example.gov/tenders"));
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(!is_valid_url("javascript:alert(1)"));
        assert!(!is_valid_url("data:text/plain;base64,aGk="));
        assert!(!is_valid_url("mailto:a@b.com"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn host_key_lowercases() {
        assert_eq!(
            host_key("https://Example.GOV/x").as_deref(),
            Some("example.gov")
        );
        assert_eq!(host_key("not a url"), None);
    }
}
