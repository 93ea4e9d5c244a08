//! Marketplace discovery normalization
//!
//! Turns raw bazaar listings into capability records the dispatcher can
//! route to: reserved-prefix IDs, keyword derivation, and the gateway's
//! markup over the provider price. The HTTP search itself lives in the
//! client crate; everything here is pure.

use crate::capability::{
    Capability, HttpMethod, InputSpec, OutputKind, SourceTier, DISCOVERED_PREFIX,
};
use crate::money::MicroUsd;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Highest provider price the gateway will resell.
pub const PROVIDER_COST_CEILING: MicroUsd = MicroUsd(250_000);

/// Minimum absolute margin over the provider price.
const MIN_MARGIN: MicroUsd = MicroUsd(5_000);

/// Longest slug used in a discovered capability id.
const MAX_SLUG_LEN: usize = 40;

/// Most keywords derived from a listing description.
const MAX_KEYWORDS: usize = 10;

/// Shortest description token kept as a keyword.
const MIN_KEYWORD_LEN: usize = 4;

/// How long a search result set stays cached.
pub const DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Stop-words stripped when deriving a marketplace search term.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "to", "of", "and", "for", "in", "on", "at", "by", "with", "from",
    "this", "that", "it", "i", "my", "me", "we", "our",
];

fn url_like_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r#"https?://[^\s"'<>]+"#) {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern is valid"),
    })
}

fn email_like_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(
        || match Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}") {
            Ok(re) => re,
            Err(_) => unreachable!("static regex pattern is valid"),
        },
    )
}

/// A raw pay-per-call listing as the marketplace returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BazaarListing {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Endpoint URL of the service.
    #[serde(alias = "resource")]
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    /// Provider price in micro-units of the settlement asset.
    #[serde(alias = "maxAmountRequired", alias = "amount")]
    pub price_micros: u64,
    #[serde(default, alias = "payTo")]
    pub pay_to: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    /// Input schema as advertised; passed through unchanged.
    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,
    #[serde(default)]
    pub output: Option<OutputKind>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

/// Derive the marketplace search term from a task: URLs, emails and
/// stop-words stripped, whitespace collapsed. Empty result means discovery
/// is skipped.
pub fn search_term(task: &str) -> Option<String> {
    let without_urls = url_like_regex().replace_all(task, " ");
    let without_emails = email_like_regex().replace_all(&without_urls, " ");
    let lowered = without_emails.to_lowercase();

    let kept: Vec<&str> = lowered
        .split_whitespace()
        .filter(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
            !bare.is_empty() && !STOP_WORDS.contains(&bare)
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}

/// Lowercase alphanumerics and hyphens, capped at 40 chars.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    slug.chars().take(MAX_SLUG_LEN).collect()
}

/// Gateway resale price: `max(2 × provider, provider + $0.005)`, rounded up
/// to the nearest $0.001 so quoted prices stay tidy.
pub fn gateway_price(provider: MicroUsd) -> MicroUsd {
    let doubled = provider.saturating_mul(2);
    let margin = provider.saturating_add(MIN_MARGIN);
    doubled.max(margin).ceil_to_milli()
}

/// Keywords from a listing description: word tokens of four or more
/// characters, first ten.
pub fn keywords_from_description(description: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for token in description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
    {
        if token.len() >= MIN_KEYWORD_LEN && !seen.iter().any(|s| s == token) {
            seen.push(token.to_string());
            if seen.len() == MAX_KEYWORDS {
                break;
            }
        }
    }
    seen
}

/// Whether a listing survives the admission filter: usable endpoint and a
/// provider price at or under the ceiling.
pub fn admissible(listing: &BazaarListing) -> bool {
    if listing.endpoint.trim().is_empty() || url::Url::parse(&listing.endpoint).is_err() {
        return false;
    }
    MicroUsd(listing.price_micros) <= PROVIDER_COST_CEILING
}

/// Normalize an admissible listing into a capability record.
pub fn normalize(listing: &BazaarListing) -> Capability {
    let provider_cost = MicroUsd(listing.price_micros);
    let keywords = {
        let mut kw = keywords_from_description(&listing.description);
        if kw.is_empty() {
            kw = keywords_from_description(&listing.name);
        }
        if kw.is_empty() {
            kw.push(slugify(&listing.name));
        }
        kw
    };
    Capability {
        id: format!("{}{}", DISCOVERED_PREFIX, slugify(&listing.name)),
        name: listing.name.clone(),
        description: listing.description.clone(),
        cost: gateway_price(provider_cost),
        keywords,
        endpoint: listing.endpoint.clone(),
        method: listing.method,
        inputs: listing.inputs.clone(),
        output: listing.output.unwrap_or(OutputKind::Json),
        tier: SourceTier::Discovered,
        provider: None,
        split: None,
        provider_cost: Some(provider_cost),
        pay_to: listing.pay_to.clone(),
        network: listing.network.clone(),
    }
}

/// Shared, TTL-bounded cache of marketplace search results, keyed by the
/// lowercased search term.
#[derive(Debug)]
pub struct DiscoveryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Vec<BazaarListing>)>>,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, term: &str) -> Option<Vec<BazaarListing>> {
        let key = term.to_lowercase();
        let entries = self.lock();
        match entries.get(&key) {
            Some((at, listings)) if at.elapsed() < self.ttl => Some(listings.clone()),
            _ => None,
        }
    }

    pub fn put(&self, term: &str, listings: Vec<BazaarListing>) {
        let key = term.to_lowercase();
        let mut entries = self.lock();
        let ttl = self.ttl;
        entries.retain(|_, (at, _)| at.elapsed() < ttl);
        entries.insert(key, (Instant::now(), listings));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, Vec<BazaarListing>)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new(DISCOVERY_CACHE_TTL)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn listing(name: &str, price_micros: u64) -> BazaarListing {
        BazaarListing {
            name: name.to_string(),
            description: "Detects phishing pages with headless analysis".to_string(),
            endpoint: "https://phish-scan.example/scan".to_string(),
            method: HttpMethod::Get,
            price_micros,
            pay_to: Some("0xfeed".to_string()),
            network: Some("base".to_string()),
            inputs: IndexMap::new(),
            output: None,
        }
    }

    #[test]
    fn test_search_term_strips_noise() {
        let term = search_term("check https://evil.example for phishing on my domain").unwrap();
        assert_eq!(term, "check phishing domain");
        assert!(search_term("the a an of").is_none());
        assert!(search_term("").is_none());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Phish Scan API"), "phish-scan-api");
        assert_eq!(slugify("  weird--name!! "), "weird-name");
        let long = "x".repeat(80);
        assert_eq!(slugify(&long).len(), 40);
    }

    #[test]
    fn test_gateway_price_markup() {
        // Small price: doubling wins, then milli rounding.
        assert_eq!(gateway_price(MicroUsd(10_000)), MicroUsd(20_000));
        // Tiny price: the absolute margin wins. 1000 + 5000 = 6000.
        assert_eq!(gateway_price(MicroUsd(1_000)), MicroUsd(6_000));
        // Odd price rounds up to the next $0.001.
        assert_eq!(gateway_price(MicroUsd(10_500)), MicroUsd(21_000));
        assert_eq!(gateway_price(MicroUsd(10_100)), MicroUsd(21_000));
        // Invariant: gatewayCost >= max(2p, p + 0.005) and divisible by 1000.
        for p in [0u64, 1, 999, 1_000, 7_777, 123_456, 250_000] {
            let g = gateway_price(MicroUsd(p));
            assert!(g.0 >= (2 * p).max(p + 5_000));
            assert_eq!(g.0 % 1_000, 0);
        }
    }

    #[test]
    fn test_admission_filter() {
        assert!(admissible(&listing("ok", 250_000)));
        assert!(!admissible(&listing("too expensive", 250_001)));
        let mut bad = listing("bad endpoint", 1_000);
        bad.endpoint = "not a url".to_string();
        assert!(!admissible(&bad));
    }

    #[test]
    fn test_normalize_shapes_capability() {
        let cap = normalize(&listing("Phish Scan API", 10_000));
        assert_eq!(cap.id, "discovered:phish-scan-api");
        assert_eq!(cap.tier, SourceTier::Discovered);
        assert_eq!(cap.provider_cost, Some(MicroUsd(10_000)));
        assert_eq!(cap.cost, MicroUsd(20_000));
        assert_eq!(cap.gateway_fee(), MicroUsd(10_000));
        assert!(cap.keywords.contains(&"phishing".to_string()));
        assert!(cap.keywords.iter().all(|k| k.len() >= 4));
    }

    #[test]
    fn test_keywords_cap_and_dedup() {
        let kw = keywords_from_description(
            "alpha alpha beta gamma delta epsilon zeta eta theta iota kappa lambda",
        );
        assert_eq!(kw.len(), 10);
        assert_eq!(kw[0], "alpha");
        assert_eq!(kw.iter().filter(|k| *k == "alpha").count(), 1);
    }

    #[test]
    fn test_cache_round_trip() {
        let cache = DiscoveryCache::default();
        assert!(cache.get("phishing scan").is_none());
        cache.put("Phishing Scan", vec![listing("svc", 1_000)]);
        // Lookup is case-insensitive on the term.
        assert_eq!(cache.get("phishing scan").unwrap().len(), 1);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = DiscoveryCache::new(Duration::ZERO);
        cache.put("term", vec![listing("svc", 1_000)]);
        assert!(cache.get("term").is_none());
    }
}
