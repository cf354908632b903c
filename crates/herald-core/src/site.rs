//! Site registry.
//!
//! A site is a tenant of the broker with its own channel namespace and its
//! own signing secrets. The registry is built once at startup and never
//! changes afterwards.

use crate::topic::TopicKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Per-site configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct SiteConf {
    pub name: String,
    /// Key for subscription signatures.
    pub secret: Vec<u8>,
    /// Key for publish signatures.
    pub post_secret: Vec<u8>,
}

impl SiteConf {
    #[must_use]
    pub fn new(name: impl Into<String>, secret: Vec<u8>, post_secret: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            secret,
            post_secret,
        }
    }

    /// Key of this site's topic for `channel`.
    #[must_use]
    pub fn topic_key(&self, channel: &str) -> TopicKey {
        TopicKey::new(self.name.as_str(), channel)
    }
}

impl fmt::Debug for SiteConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteConf")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Immutable map of site name to configuration.
#[derive(Debug, Clone, Default)]
pub struct Sites {
    sites: HashMap<String, Arc<SiteConf>>,
}

impl Sites {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<SiteConf>> {
        self.sites.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.sites.keys().map(String::as_str)
    }
}

impl FromIterator<SiteConf> for Sites {
    fn from_iter<I: IntoIterator<Item = SiteConf>>(iter: I) -> Self {
        Self {
            sites: iter
                .into_iter()
                .map(|site| (site.name.clone(), Arc::new(site)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let sites: Sites = [
            SiteConf::new("alpha", b"a".to_vec(), b"pa".to_vec()),
            SiteConf::new("beta", b"b".to_vec(), b"pb".to_vec()),
        ]
        .into_iter()
        .collect();

        assert_eq!(sites.len(), 2);
        assert_eq!(sites.get("beta").unwrap().post_secret, b"pb");
        assert!(sites.get("gamma").is_none());
    }

    #[test]
    fn test_topic_keys_are_per_site() {
        let alpha = SiteConf::new("alpha", Vec::new(), Vec::new());
        let beta = SiteConf::new("beta", Vec::new(), Vec::new());
        assert_ne!(alpha.topic_key("news"), beta.topic_key("news"));
        assert_eq!(alpha.topic_key("news").to_string(), "alpha/news");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let site = SiteConf::new("alpha", b"hidden".to_vec(), b"hidden".to_vec());
        assert!(!format!("{site:?}").contains("104"));
    }
}
