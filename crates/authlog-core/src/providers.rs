//! Identity and payment providers whose hosts are always monitored.
//!
//! A provider pairs a host name with the tag attached to every request sent
//! to it. The bundled list covers the common OAuth and API providers; users
//! can replace it with their own `host` or `host=tag` entries.

use serde::{Deserialize, Serialize};

/// A monitored host and the tag its requests receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    /// Host name, matched as a substring of the request host.
    pub host: String,
    /// Tag added to matching requests.
    pub tag: String,
}

impl Provider {
    /// Creates a provider entry.
    pub fn new(host: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            tag: tag.into(),
        }
    }

    /// Parses a `host` or `host=tag` spec.
    ///
    /// A bare host takes the bundled tag when it is a known provider and its
    /// own name otherwise. Returns `None` for a blank spec.
    ///
    /// ```
    /// use authlog_core::Provider;
    ///
    /// assert_eq!(Provider::parse("api.stripe.com").unwrap().tag, "stripe-api");
    /// assert_eq!(Provider::parse("sso.corp.io=corp-sso").unwrap().tag, "corp-sso");
    /// assert_eq!(Provider::parse("auth.example.com").unwrap().tag, "auth.example.com");
    /// assert!(Provider::parse("  ").is_none());
    /// ```
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }

        if let Some((host, tag)) = spec.split_once('=') {
            let (host, tag) = (host.trim(), tag.trim());
            if host.is_empty() {
                return None;
            }
            let tag = if tag.is_empty() { host } else { tag };
            return Some(Self::new(host, tag));
        }

        let host = spec.to_ascii_lowercase();
        Some(
            bundled_providers()
                .into_iter()
                .find(|p| p.host == host)
                .unwrap_or_else(|| Self::new(spec, spec.to_ascii_lowercase())),
        )
    }

    /// Checks whether a request host belongs to this provider.
    ///
    /// `host` must already be lowercase and without a port.
    pub fn matches(&self, host: &str) -> bool {
        host.contains(self.host.as_str())
    }
}

/// Returns the bundled provider list.
pub fn bundled_providers() -> Vec<Provider> {
    vec![
        Provider::new("accounts.google.com", "google-auth"),
        Provider::new("api.stripe.com", "stripe-api"),
        Provider::new("api.twitter.com", "twitter-auth"),
        Provider::new("graph.facebook.com", "facebook-auth"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_tags() {
        let tags: Vec<_> = bundled_providers().into_iter().map(|p| p.tag).collect();
        assert_eq!(
            tags,
            vec!["google-auth", "stripe-api", "twitter-auth", "facebook-auth"]
        );
    }

    #[test]
    fn parse_lowercases_host() {
        let provider = Provider::parse("Accounts.Google.com").unwrap();
        assert_eq!(provider.host, "accounts.google.com");
        assert_eq!(provider.tag, "google-auth");
    }

    #[test]
    fn parse_empty_tag_falls_back_to_host() {
        let provider = Provider::parse("idp.local=").unwrap();
        assert_eq!(provider.tag, "idp.local");
        assert!(Provider::parse("=tag").is_none());
    }

    #[test]
    fn matches_is_substring() {
        let provider = Provider::new("api.stripe.com", "stripe-api");
        assert!(provider.matches("api.stripe.com"));
        assert!(provider.matches("eu.api.stripe.com"));
        assert!(!provider.matches("stripe.com"));
    }
}
