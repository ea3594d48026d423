//! HTTP cache key derivation.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Cookie carrying a hash of the client's full context.
pub const CONTEXT_CACHE_COOKIE: &str = "sw-cache-hash";
pub const CURRENCY_COOKIE: &str = "sw-currency";

/// The request dimensions that may influence a cached response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheRequest {
    pub method: String,
    pub uri: String,
    /// Base url of the resolved sales channel domain.
    pub sales_channel_base_url: String,
    pub cookies: BTreeMap<String, String>,
    /// Currency resolved from the sales channel domain.
    pub domain_currency_id: Option<String>,
}

impl CacheRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.sales_channel_base_url = base_url.into();
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_domain_currency(mut self, currency_id: impl Into<String>) -> Self {
        self.domain_currency_id = Some(currency_id.into());
        self
    }

    /// Only safe methods are served from or written to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET") || self.method.eq_ignore_ascii_case("HEAD")
    }
}

/// `"md" + sha256(uri + base_url)`, then narrowed by the first present of:
/// context hash cookie, currency cookie, domain currency.
pub fn generate_cache_key(request: &CacheRequest) -> String {
    let hash = format!(
        "md{}",
        sha256_hex(&format!("{}{}", request.uri, request.sales_channel_base_url))
    );

    let variant = request
        .cookies
        .get(CONTEXT_CACHE_COOKIE)
        .or_else(|| request.cookies.get(CURRENCY_COOKIE))
        .or(request.domain_currency_id.as_ref());

    match variant {
        Some(value) => sha256_hex(&format!("{hash}-{value}")),
        None => hash,
    }
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::{generate_cache_key, CacheRequest, CONTEXT_CACHE_COOKIE, CURRENCY_COOKIE};

    fn request() -> CacheRequest {
        CacheRequest::get("https://shop.test/detail/1").with_base_url("https://shop.test")
    }

    #[test]
    fn irrelevant_cookies_share_a_key() {
        let a = request().with_cookie("session-", "a").with_cookie(CURRENCY_COOKIE, "eur");
        let b = request().with_cookie("session-", "b").with_cookie(CURRENCY_COOKIE, "eur");
        assert_eq!(generate_cache_key(&a), generate_cache_key(&b));
    }

    #[test]
    fn currency_cookie_varies_the_key() {
        let eur = request().with_cookie(CURRENCY_COOKIE, "eur");
        let usd = request().with_cookie(CURRENCY_COOKIE, "usd");
        assert_ne!(generate_cache_key(&eur), generate_cache_key(&usd));
    }

    #[test]
    fn context_hash_takes_priority_over_currency() {
        let with_hash = request()
            .with_cookie(CONTEXT_CACHE_COOKIE, "h1")
            .with_cookie(CURRENCY_COOKIE, "eur");
        let other_currency = request()
            .with_cookie(CONTEXT_CACHE_COOKIE, "h1")
            .with_cookie(CURRENCY_COOKIE, "usd");
        assert_eq!(generate_cache_key(&with_hash), generate_cache_key(&other_currency));
    }

    #[test]
    fn domain_currency_is_the_last_fallback() {
        let plain = generate_cache_key(&request());
        assert!(plain.starts_with("md"));
        assert_eq!(plain.len(), 66);

        let domain = generate_cache_key(&request().with_domain_currency("c1"));
        assert_ne!(plain, domain);
        assert_eq!(domain.len(), 64);
    }

    #[test]
    fn base_url_is_part_of_the_key() {
        let other = CacheRequest::get("https://shop.test/detail/1").with_base_url("https://shop.test/en");
        assert_ne!(generate_cache_key(&request()), generate_cache_key(&other));
    }
}
