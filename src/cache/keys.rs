//! Cache key definitions.
//!
//! A [`CacheKey`] addresses one rendered variant of one content item in one
//! storage tier. Digests are SHA-256 over a versioned canonical string, so
//! keys written by one process are found again by the next. The key also
//! carries its content id, which lets a purge find every stored variant even
//! after the variant set has changed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use super::config::CacheConfig;
use crate::domain::content::IdentifierResolver;
use crate::domain::error::ContentError;
use crate::domain::types::{ContentId, Device, Variant, Visitor};

const DIGEST_DOMAIN: &[u8] = b"supercache/v1\n";
const DIGEST_HEX_LEN: usize = 64;

/// Storage tier of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Every cacheable variant, served through the application.
    Dynamic,
    /// Fully static anonymous pages the host can serve without the application.
    Static,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Dynamic, Tier::Static];

    /// Key prefix and on-disk directory name.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Dynamic => "dynamic",
            Tier::Static => "static",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Dynamic => "Dynamic cache",
            Tier::Static => "Static cache",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Tier::ALL.into_iter().find(|tier| tier.as_str() == raw)
    }
}

/// Immutable key of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    tier: Tier,
    content_id: ContentId,
    digest: String,
}

impl CacheKey {
    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    /// Lowercase hex SHA-256 digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The same variant addressed in another tier.
    pub fn in_tier(&self, tier: Tier) -> Self {
        Self {
            tier,
            content_id: self.content_id,
            digest: self.digest.clone(),
        }
    }

    fn from_parts(tier: Tier, content_id: ContentId, digest: &str) -> Option<Self> {
        let valid = digest.len() == DIGEST_HEX_LEN
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self {
            tier,
            content_id,
            digest: digest.to_string(),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.tier.as_str(), self.content_id, self.digest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` is not a cache key")]
pub struct ParseCacheKeyError(pub String);

impl FromStr for CacheKey {
    type Err = ParseCacheKeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.splitn(3, '-');
        let parsed = match (parts.next(), parts.next(), parts.next()) {
            (Some(tier), Some(content_id), Some(digest)) => Tier::parse(tier)
                .zip(content_id.parse::<ContentId>().ok())
                .and_then(|(tier, content_id)| Self::from_parts(tier, content_id, digest)),
            _ => None,
        };
        parsed.ok_or_else(|| ParseCacheKeyError(raw.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("`{0}` is not a usable permalink")]
    Invalid(String),
    #[error("there is no content at `{0}`")]
    NotFound(String),
    #[error(transparent)]
    Content(#[from] ContentError),
}

/// Derives cache keys and maps permalinks to content ids.
#[derive(Clone)]
pub struct KeyIndex {
    resolver: Arc<dyn IdentifierResolver>,
}

impl KeyIndex {
    pub fn new(resolver: Arc<dyn IdentifierResolver>) -> Self {
        Self { resolver }
    }

    /// Dynamic-tier key for one variant of one content item.
    pub fn derive_key(content_id: ContentId, variant: &Variant) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(DIGEST_DOMAIN);
        hasher.update(content_id.get().to_be_bytes());
        hasher.update(b"\n");
        hasher.update(variant.canonical().as_bytes());
        CacheKey {
            tier: Tier::Dynamic,
            content_id,
            digest: hex::encode(hasher.finalize()),
        }
    }

    /// Every variant `config` can currently produce.
    pub fn variants(config: &CacheConfig) -> Vec<Variant> {
        let devices = if config.mobile.enabled {
            all_devices(config)
        } else {
            vec![Device::Desktop]
        };
        cross(devices)
    }

    /// Anonymous variants, which are the only ones the static tier holds.
    pub fn static_variants(config: &CacheConfig) -> Vec<Variant> {
        Self::variants(config)
            .into_iter()
            .filter(Variant::is_anonymous)
            .collect()
    }

    /// Every key that may hold a copy of `content_id`, in both tiers.
    ///
    /// Mobile devices are included even when mobile support is currently off,
    /// so entries written before the switch are still purged.
    pub fn variant_keys(content_id: ContentId, config: &CacheConfig) -> Vec<CacheKey> {
        let variants = cross(all_devices(config));
        let mut keys = Vec::with_capacity(variants.len() * 2);
        for variant in &variants {
            let key = Self::derive_key(content_id, variant);
            if variant.is_anonymous() {
                keys.push(key.in_tier(Tier::Static));
            }
            keys.push(key);
        }
        keys
    }

    /// Resolves a permalink or absolute URL to the content it addresses.
    pub async fn resolve_identifier(&self, raw: &str) -> Result<ContentId, ResolveError> {
        let path = normalize_permalink(raw).ok_or_else(|| ResolveError::Invalid(raw.to_string()))?;
        self.resolver
            .resolve(&path)
            .await?
            .ok_or(ResolveError::NotFound(path))
    }
}

fn all_devices(config: &CacheConfig) -> Vec<Device> {
    let mut devices = vec![Device::Desktop, Device::Mobile];
    devices.extend(config.mobile.groups.iter().cloned().map(Device::MobileGroup));
    devices
}

fn cross(devices: Vec<Device>) -> Vec<Variant> {
    devices
        .into_iter()
        .flat_map(|device| Visitor::ALL.map(|visitor| Variant::new(device.clone(), visitor)))
        .collect()
}

/// Reduces a permalink or URL to its path with leading and trailing slash.
///
/// Scheme, host, query, and fragment are dropped. Returns `None` for blank
/// input.
pub fn normalize_permalink(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let url = match Url::parse(trimmed) {
        Ok(url) if url.has_host() => url,
        _ => Url::parse("http://localhost/").ok()?.join(trimmed).ok()?,
    };

    let mut path = url.path().to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::cache::config::MobileConfig;

    fn mobile_config(groups: &[&str]) -> CacheConfig {
        CacheConfig {
            mobile: MobileConfig {
                enabled: true,
                groups: groups.iter().map(|g| g.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn derive_key_is_stable() {
        let variant = Variant::anonymous_desktop();
        let first = KeyIndex::derive_key(ContentId::new(12), &variant);
        let second = KeyIndex::derive_key(ContentId::new(12), &variant);

        assert_eq!(first, second);
        assert_eq!(first.digest().len(), 64);
        assert!(first.to_string().starts_with("dynamic-12-"));
        assert_eq!(first.content_id(), ContentId::new(12));
    }

    #[test]
    fn distinct_variants_and_ids_get_distinct_keys() {
        let config = mobile_config(&["tablet"]);
        let mut seen = HashSet::new();
        for id in [1, 2, 10] {
            for variant in KeyIndex::variants(&config) {
                assert!(seen.insert(KeyIndex::derive_key(ContentId::new(id), &variant)));
            }
        }
        assert_eq!(seen.len(), 3 * 6);
    }

    #[test]
    fn variants_follow_mobile_support() {
        let desktop_only = KeyIndex::variants(&CacheConfig::default());
        assert_eq!(desktop_only.len(), 2);
        assert!(desktop_only.iter().all(|v| v.device == Device::Desktop));

        let mobile = KeyIndex::variants(&mobile_config(&["tablet", "phone"]));
        assert_eq!(mobile.len(), 8);
        assert_eq!(KeyIndex::static_variants(&mobile_config(&[])).len(), 2);
    }

    #[test]
    fn variant_keys_cover_both_tiers() {
        let keys = KeyIndex::variant_keys(ContentId::new(5), &CacheConfig::default());
        let static_keys = keys.iter().filter(|k| k.tier() == Tier::Static).count();
        let dynamic_keys = keys.iter().filter(|k| k.tier() == Tier::Dynamic).count();

        assert_eq!(dynamic_keys, 4);
        assert_eq!(static_keys, 2);

        let anonymous = KeyIndex::derive_key(ContentId::new(5), &Variant::anonymous_desktop());
        assert!(keys.contains(&anonymous.in_tier(Tier::Static)));
    }

    #[test]
    fn keys_parse_from_their_display_form() {
        let key = KeyIndex::derive_key(ContentId::new(3), &Variant::anonymous_desktop())
            .in_tier(Tier::Static);
        let parsed: CacheKey = key.to_string().parse().expect("parse key");
        assert_eq!(parsed, key);

        assert!("static-3-nothex".parse::<CacheKey>().is_err());
        assert!(format!("static-x-{}", key.digest()).parse::<CacheKey>().is_err());
        assert!(format!("static-{}", key.digest()).parse::<CacheKey>().is_err());
        assert!("bogus-".parse::<CacheKey>().is_err());
    }

    #[test]
    fn permalinks_are_normalized() {
        assert_eq!(
            normalize_permalink("https://example.com/2024/hello-world?utm=x#top").as_deref(),
            Some("/2024/hello-world/")
        );
        assert_eq!(
            normalize_permalink("/about/").as_deref(),
            Some("/about/")
        );
        assert_eq!(normalize_permalink("about").as_deref(), Some("/about/"));
        assert_eq!(normalize_permalink("/").as_deref(), Some("/"));
        assert_eq!(normalize_permalink("   "), None);
    }
}
