//! Per-site configuration registry with domain-based resolution
//!
//! Sites differ in how they serve images: some require a Referer, some need
//! long waits for lazy-loaded content, some only work through a real
//! browser. Rather than scattering per-site conditionals through the fetch
//! and analysis code, behavior lives in immutable [`SiteConfig`] records
//! resolved once per URL by longest-matching registered domain.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Which fetch strategy a site prefers first
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStrategy {
    /// Direct HTTP GET first, browser fallback second (default)
    #[default]
    Lightweight,
    /// Headless browser first, HTTP GET fallback second
    Browser,
}

/// Static per-site fetch behavior, immutable for the run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Delay after a browser navigation lands on an HTML page (default: 2s)
    #[serde(default = "default_wait_time", with = "duration_ms")]
    pub wait_time: Duration,

    /// How long to wait for an image-bearing element to appear (default: 5s)
    #[serde(default = "default_selector_wait_time", with = "duration_ms")]
    pub selector_wait_time: Duration,

    /// Whether requests to this site need a Referer header
    #[serde(default)]
    pub needs_referer: bool,

    /// Referer value to send; when absent, the site's origin is used
    #[serde(default)]
    pub referer_url: Option<String>,

    /// Extra request headers for this site
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    /// Preferred fetch strategy order
    #[serde(default)]
    pub download_strategy: DownloadStrategy,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            wait_time: default_wait_time(),
            selector_wait_time: default_selector_wait_time(),
            needs_referer: false,
            referer_url: None,
            custom_headers: HashMap::new(),
            download_strategy: DownloadStrategy::default(),
        }
    }
}

/// Lookup table of site configs keyed by domain, with a default fallback
///
/// Resolution is deterministic: the longest registered domain that suffixes
/// the URL's host wins, so `images.example.com` beats `example.com` when
/// both are registered.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SiteRegistry {
    /// Fallback config for hosts with no registered entry
    #[serde(default)]
    pub default: SiteConfig,

    /// Registered per-domain entries
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,
}

impl SiteRegistry {
    /// Resolve the config for a URL by longest-matching registered domain
    ///
    /// A registered domain matches when it equals the URL's host or when the
    /// host ends with `.{domain}`. Unparseable URLs get the default entry.
    pub fn resolve(&self, url: &str) -> &SiteConfig {
        let host = match Url::parse(url) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) => host.to_lowercase(),
                None => return &self.default,
            },
            Err(_) => return &self.default,
        };

        let mut best: Option<(&String, &SiteConfig)> = None;
        for (domain, config) in &self.sites {
            let domain_lower = domain.to_lowercase();
            let matches =
                host == domain_lower || host.ends_with(&format!(".{domain_lower}"));
            if matches {
                match best {
                    Some((current, _)) if current.len() >= domain.len() => {}
                    _ => best = Some((domain, config)),
                }
            }
        }
        best.map(|(_, config)| config).unwrap_or(&self.default)
    }

    /// Register an entry (builder-style convenience for embedding callers)
    pub fn register(&mut self, domain: impl Into<String>, config: SiteConfig) {
        self.sites.insert(domain.into(), config);
    }
}

fn default_wait_time() -> Duration {
    Duration::from_secs(2)
}

fn default_selector_wait_time() -> Duration {
    Duration::from_secs(5)
}

// Duration serialization helper (milliseconds)
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SiteRegistry {
        let mut registry = SiteRegistry::default();
        registry.register(
            "example.com",
            SiteConfig {
                needs_referer: true,
                ..SiteConfig::default()
            },
        );
        registry.register(
            "images.example.com",
            SiteConfig {
                download_strategy: DownloadStrategy::Browser,
                ..SiteConfig::default()
            },
        );
        registry
    }

    #[test]
    fn longest_domain_wins() {
        let registry = registry();
        let config = registry.resolve("https://images.example.com/photo.jpg");
        assert_eq!(config.download_strategy, DownloadStrategy::Browser);
    }

    #[test]
    fn shorter_domain_matches_subdomains_not_registered_more_specifically() {
        let registry = registry();
        let config = registry.resolve("https://cdn.example.com/photo.jpg");
        assert!(config.needs_referer);
        assert_eq!(config.download_strategy, DownloadStrategy::Lightweight);
    }

    #[test]
    fn unknown_host_falls_back_to_default() {
        let registry = registry();
        let config = registry.resolve("https://other.net/a.png");
        assert!(!config.needs_referer);
    }

    #[test]
    fn unparseable_url_falls_back_to_default() {
        let registry = registry();
        let config = registry.resolve("not a url");
        assert!(!config.needs_referer);
    }

    #[test]
    fn suffix_match_requires_label_boundary() {
        let mut registry = SiteRegistry::default();
        registry.register("ample.com", SiteConfig::default());
        // example.com must NOT match the registered ample.com
        let config = registry.resolve("https://example.com/a.png");
        assert!(std::ptr::eq(config, &registry.default));
    }
}
