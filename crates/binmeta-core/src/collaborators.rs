//! # Collaborators
//!
//! Read-only services the reducer consults besides the event store:
//! - [`Annotations`]: user tags on entities and on feature values
//! - [`PluginRegistry`]: the latest configuration of every known plugin
//!
//! Both ship with simple in-memory implementations.

use crate::{EntityHash, MetaError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// ANNOTATIONS
// =============================================================================

/// A tag attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTag {
    pub tag: String,
    pub owner: String,
    pub timestamp: Timestamp,
    pub security: String,
    /// How many entities carry this tag.
    pub num_entities: u64,
}

/// A tag attached to a (feature name, feature value) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTag {
    pub tag: String,
    pub owner: String,
    pub timestamp: Timestamp,
    pub security: String,
}

/// Source of user annotations.
pub trait Annotations {
    fn entity_tags(&self, hash: &EntityHash) -> Result<Vec<EntityTag>, MetaError>;

    fn feature_tags(&self, name: &str, value: &str) -> Result<Vec<FeatureTag>, MetaError>;
}

/// In-memory annotation store.
#[derive(Debug, Clone, Default)]
pub struct TagStore {
    entity: BTreeMap<EntityHash, Vec<EntityTag>>,
    feature: BTreeMap<(String, String), Vec<FeatureTag>>,
}

impl TagStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag an entity. The shared-entity counts of every tag with the same
    /// text are refreshed.
    pub fn tag_entity(
        &mut self,
        hash: impl Into<EntityHash>,
        tag: impl Into<String>,
        owner: impl Into<String>,
        timestamp: Timestamp,
        security: impl Into<String>,
    ) {
        let tag = tag.into();
        let list = self.entity.entry(hash.into()).or_default();
        if list.iter().any(|t| t.tag == tag) {
            return;
        }
        list.push(EntityTag {
            tag: tag.clone(),
            owner: owner.into(),
            timestamp,
            security: security.into(),
            num_entities: 0,
        });
        list.sort_by(|a, b| a.tag.cmp(&b.tag));

        let count = self
            .entity
            .values()
            .filter(|tags| tags.iter().any(|t| t.tag == tag))
            .count() as u64;
        for t in self.entity.values_mut().flatten().filter(|t| t.tag == tag) {
            t.num_entities = count;
        }
    }

    /// Tag a feature value.
    pub fn tag_feature(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        tag: impl Into<String>,
        owner: impl Into<String>,
        timestamp: Timestamp,
        security: impl Into<String>,
    ) {
        let list = self.feature.entry((name.into(), value.into())).or_default();
        list.push(FeatureTag {
            tag: tag.into(),
            owner: owner.into(),
            timestamp,
            security: security.into(),
        });
        list.sort_by(|a, b| a.tag.cmp(&b.tag).then(a.timestamp.cmp(&b.timestamp)));
    }
}

impl Annotations for TagStore {
    fn entity_tags(&self, hash: &EntityHash) -> Result<Vec<EntityTag>, MetaError> {
        Ok(self.entity.get(hash).cloned().unwrap_or_default())
    }

    fn feature_tags(&self, name: &str, value: &str) -> Result<Vec<FeatureTag>, MetaError> {
        Ok(self
            .feature
            .get(&(name.to_string(), value.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// PLUGIN REGISTRY
// =============================================================================

/// Latest configuration document of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Largest content the plugin accepts, in bytes. `Some(0)` means no
    /// limit; `None` means the plugin never advertised the field.
    #[serde(default)]
    pub max_content_size: Option<u64>,
}

/// Source of plugin configuration documents.
pub trait PluginRegistry {
    fn latest_configs(&self) -> Result<Vec<PluginConfig>, MetaError>;
}

/// A fixed list of plugin configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPluginRegistry {
    pub plugins: Vec<PluginConfig>,
}

impl StaticPluginRegistry {
    #[must_use]
    pub fn new(plugins: Vec<PluginConfig>) -> Self {
        Self { plugins }
    }
}

impl PluginRegistry for StaticPluginRegistry {
    fn latest_configs(&self) -> Result<Vec<PluginConfig>, MetaError> {
        Ok(self.plugins.clone())
    }
}
