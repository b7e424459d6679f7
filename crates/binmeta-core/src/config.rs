//! # Core Configuration
//!
//! Tunables for the reducer, the security vocabulary and the cache.
//! Every field has a default, so an empty TOML table is a valid config.

use crate::primitives::{
    DEFAULT_APPROXIMATE_COUNT_LIMIT, DEFAULT_BUCKET_LIMIT, DEFAULT_MANY_EVENTS_THRESHOLD,
    DEFAULT_SOURCE_VARIANT_LIMIT,
};
use crate::{MetaError, SecurityLabel};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Reducer and cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Maximum bucket count for every grouped aggregation.
    pub bucket_limit: usize,
    /// Maximum submission variants per source.
    pub source_variant_limit: usize,
    /// Event count at which a summary carries a "many events" warning.
    pub many_events_threshold: u64,
    /// Counts above this are approximate unless total hits are requested.
    pub approximate_count_limit: u64,
    pub security: SecurityConfig,
    pub cache: CacheConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bucket_limit: DEFAULT_BUCKET_LIMIT,
            source_variant_limit: DEFAULT_SOURCE_VARIANT_LIMIT,
            many_events_threshold: DEFAULT_MANY_EVENTS_THRESHOLD,
            approximate_count_limit: DEFAULT_APPROXIMATE_COUNT_LIMIT,
            security: SecurityConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Reject configurations the reducer cannot operate with.
    pub fn validate(&self) -> Result<(), MetaError> {
        if self.bucket_limit == 0 {
            return Err(MetaError::ConfigError(
                "bucket_limit must be greater than 0".to_string(),
            ));
        }
        if self.source_variant_limit == 0 {
            return Err(MetaError::ConfigError(
                "source_variant_limit must be greater than 0".to_string(),
            ));
        }
        if self.security.ranks.is_empty() {
            return Err(MetaError::ConfigError(
                "security.ranks must list at least one label".to_string(),
            ));
        }
        Ok(())
    }
}

/// The classification vocabulary, in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub ranks: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ranks: ["UNCLASSIFIED", "RESTRICTED", "CONFIDENTIAL", "SECRET", "TOP SECRET"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SecurityConfig {
    /// The label assigned to events that carry none.
    #[must_use]
    pub fn baseline(&self) -> SecurityLabel {
        SecurityLabel::new(self.ranks.first().cloned().unwrap_or_default())
    }

    /// Domain rank order. Unknown labels sort after known ones, alphabetically.
    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        let rank = |label: &str| self.ranks.iter().position(|r| r == label);
        match (rank(a), rank(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }
}

/// Cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_bucket_limit_rejected() {
        let config = CoreConfig {
            bucket_limit: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(MetaError::ConfigError(_))));
    }

    #[test]
    fn unknown_labels_rank_last() {
        let security = SecurityConfig::default();
        assert_eq!(security.compare("SECRET", "RESTRICTED"), Ordering::Greater);
        assert_eq!(security.compare("ZZZ", "TOP SECRET"), Ordering::Greater);
        assert_eq!(security.compare("AAA", "BBB"), Ordering::Less);
        assert_eq!(security.baseline().as_str(), "UNCLASSIFIED");
    }
}
