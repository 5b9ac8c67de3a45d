//! Topic naming: one logical name, two physical keys.

use crate::config::TopicConfig;

pub const DEFAULT_LIST_SUFFIX: &str = ":list";
pub const DEFAULT_ZSET_SUFFIX: &str = ":zset";

/// A logical queue name.
///
/// Immediate messages live in the list at `{name}{list_suffix}`; delayed
/// messages live in the sorted set at `{name}{zset_suffix}`, scored by their
/// due time. Suffixes are per topic so independent queues in one process
/// never share keys by accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    name: String,
    list_key: String,
    zset_key: String,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_suffixes(name, DEFAULT_LIST_SUFFIX, DEFAULT_ZSET_SUFFIX)
    }

    pub fn with_suffixes(name: impl Into<String>, list_suffix: &str, zset_suffix: &str) -> Self {
        let name = name.into();
        Self {
            list_key: format!("{}{}", name, list_suffix),
            zset_key: format!("{}{}", name, zset_suffix),
            name,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &TopicConfig) -> Self {
        Self::with_suffixes(name, &config.list_suffix, &config.zset_suffix)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the immediate-delivery list.
    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    /// Key of the delayed-delivery sorted set.
    pub fn zset_key(&self) -> &str {
        &self.zset_key
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Topic::new(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic::new(name)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
