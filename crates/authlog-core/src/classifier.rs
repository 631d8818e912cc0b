//! Request classification.
//!
//! Decides whether a request is worth capturing and which tags describe it.
//! Two independent rule sets apply:
//!
//! - **Monitoring gate**: the host belongs to a configured provider, or the
//!   path contains a configured auth endpoint fragment.
//! - **Tags**: provider tag for the host, `oauth` and `token-exchange` for
//!   well-known path fragments, `has-auth-header` when credentials are sent.
//!
//! A request can therefore be monitored through its path without carrying a
//! provider tag. Classification is pure and never fails.

use http::{HeaderMap, Uri};

use crate::config::MonitorConfig;

/// Tag for paths containing `/oauth`.
pub const TAG_OAUTH: &str = "oauth";
/// Tag for paths containing `/token`.
pub const TAG_TOKEN_EXCHANGE: &str = "token-exchange";
/// Tag for requests carrying an `Authorization` header.
pub const TAG_HAS_AUTH_HEADER: &str = "has-auth-header";

/// Outcome of classifying one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Whether the request should be captured.
    pub monitored: bool,
    /// Descriptive tags in rule order, without duplicates.
    pub tags: Vec<String>,
}

impl Classification {
    /// Returns true if the given tag was assigned.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }
}

/// Classifies requests against a [`MonitorConfig`].
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: MonitorConfig,
}

impl Classifier {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Classifies a request by its absolute URL and headers.
    ///
    /// An unparseable URL is treated as unmonitored; only the header rule
    /// can still apply.
    pub fn classify(&self, url: &str, headers: &HeaderMap) -> Classification {
        let mut result = Classification::default();

        if let Ok(uri) = url.parse::<Uri>() {
            let host = uri.host().map(str::to_ascii_lowercase).unwrap_or_default();
            let path = uri.path();

            let mut host_match = false;
            if !host.is_empty() {
                for provider in self.config.providers.iter().filter(|p| p.matches(&host)) {
                    host_match = true;
                    result.tag(&provider.tag);
                }
            }

            result.monitored = host_match || self.path_is_auth(path);

            if path.contains("/oauth") {
                result.tag(TAG_OAUTH);
            }
            if path.contains("/token") {
                result.tag(TAG_TOKEN_EXCHANGE);
            }
        }

        if headers.contains_key(http::header::AUTHORIZATION) {
            result.tag(TAG_HAS_AUTH_HEADER);
        }

        result
    }

    /// Evaluates only the monitoring gate.
    pub fn is_monitored(&self, url: &str) -> bool {
        let Ok(uri) = url.parse::<Uri>() else {
            return false;
        };

        let host = uri.host().map(str::to_ascii_lowercase).unwrap_or_default();
        (!host.is_empty() && self.config.providers.iter().any(|p| p.matches(&host)))
            || self.path_is_auth(uri.path())
    }

    fn path_is_auth(&self, path: &str) -> bool {
        self.config
            .auth_endpoints
            .iter()
            .any(|fragment| path.contains(fragment.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::AUTHORIZATION;

    fn classifier() -> Classifier {
        Classifier::new(MonitorConfig::default())
    }

    fn no_headers() -> HeaderMap {
        HeaderMap::new()
    }

    #[test]
    fn google_token_exchange_tags() {
        let result = classifier().classify(
            "https://accounts.google.com/o/oauth2/token",
            &no_headers(),
        );
        assert!(result.monitored);
        assert_eq!(result.tags, vec!["google-auth", "oauth", "token-exchange"]);
    }

    #[test]
    fn monitored_host_regardless_of_path() {
        let c = classifier();
        for path in ["/", "/v1/charges", "/static/logo.png", "/a/b/c?x=1"] {
            let url = format!("https://api.stripe.com{}", path);
            assert!(c.is_monitored(&url), "{url}");
            assert!(c.classify(&url, &no_headers()).monitored, "{url}");
        }
    }

    #[test]
    fn auth_path_regardless_of_host() {
        let c = classifier();
        for host in ["example.com", "localhost:3000", "10.0.0.7"] {
            let url = format!("http://{}/api/login", host);
            let result = c.classify(&url, &no_headers());
            assert!(result.monitored, "{url}");
            assert!(result.tags.is_empty(), "{url}: {:?}", result.tags);
        }
    }

    #[test]
    fn path_match_gets_no_host_tag() {
        let result = classifier().classify("https://example.com/oauth/authorize", &no_headers());
        assert!(result.monitored);
        assert_eq!(result.tags, vec!["oauth"]);
    }

    #[test]
    fn authorization_header_tag() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());

        let result = classifier().classify("https://example.com/", &headers);
        assert!(!result.monitored);
        assert_eq!(result.tags, vec![TAG_HAS_AUTH_HEADER]);

        let result = classifier().classify("https://graph.facebook.com/me", &headers);
        assert!(result.monitored);
        assert!(result.has_tag("facebook-auth"));
        assert!(result.has_tag(TAG_HAS_AUTH_HEADER));
    }

    #[test]
    fn unrelated_request_is_not_monitored() {
        let result = classifier().classify("https://crates.io/api/v1/crates", &no_headers());
        assert_eq!(result, Classification::default());
    }

    #[test]
    fn host_match_ignores_case_and_port() {
        let c = classifier();
        assert!(c.is_monitored("http://API.Twitter.com:8080/2/tweets"));
    }

    #[test]
    fn unparseable_url_is_unmonitored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic x".parse().unwrap());
        let result = classifier().classify("not a url", &headers);
        assert!(!result.monitored);
        assert_eq!(result.tags, vec![TAG_HAS_AUTH_HEADER]);
    }

    #[test]
    fn query_string_does_not_trigger_path_rules() {
        let result = classifier().classify("http://example.com/search?q=/token", &no_headers());
        assert!(!result.monitored);
        assert!(result.tags.is_empty());
    }

    #[test]
    fn custom_hosts_replace_bundled() {
        let config = MonitorConfig::empty().with_hosts(["sso.corp.io=corp-sso"]);
        let c = Classifier::new(config);
        let result = c.classify("https://sso.corp.io/saml", &no_headers());
        assert!(result.monitored);
        assert_eq!(result.tags, vec!["corp-sso"]);
        assert!(!c.is_monitored("https://accounts.google.com/"));
    }

    #[test]
    fn classify_is_deterministic() {
        let c = classifier();
        let a = c.classify("https://api.stripe.com/v1/tokens", &no_headers());
        let b = c.classify("https://api.stripe.com/v1/tokens", &no_headers());
        assert_eq!(a, b);
    }
}
