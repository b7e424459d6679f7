//! # Entity Summary
//!
//! Collapses the append-only history of one entity into one canonical,
//! deduplicated summary.
//!
//! - [`Section`] and [`SummaryOptions`] select what to compute
//! - [`Summary`] and its records are the produced shape
//! - [`reducer::Reducer`] issues the queries and reduces the buckets
//! - [`diagnostics`] builds the warnings appended to a summary
//!
//! Every section is optional: a section that was not requested is absent
//! from the result, and a requested section of an entity without events is
//! present and empty.

pub mod diagnostics;
pub mod reducer;

pub use diagnostics::{Diagnostic, Severity};
pub use reducer::Reducer;

use crate::collaborators::{EntityTag, FeatureTag};
use crate::{
    Action, Author, EntityDescriptor, EntityHash, FeatureType, FeatureValue, MetaError, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// SECTIONS AND OPTIONS
// =============================================================================

/// A part of the summary a caller can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    Documents,
    Security,
    Sources,
    Features,
    Info,
    Datastreams,
    Instances,
    Parents,
    Children,
    Tags,
    /// Annotate merged features with their tags. Needs `Features`.
    FeatureTags,
    /// Count documents exactly instead of capping the count.
    TotalHits,
}

impl Section {
    pub const ALL: [Section; 12] = [
        Section::Documents,
        Section::Security,
        Section::Sources,
        Section::Features,
        Section::Info,
        Section::Datastreams,
        Section::Instances,
        Section::Parents,
        Section::Children,
        Section::Tags,
        Section::FeatureTags,
        Section::TotalHits,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Security => "security",
            Self::Sources => "sources",
            Self::Features => "features",
            Self::Info => "info",
            Self::Datastreams => "datastreams",
            Self::Instances => "instances",
            Self::Parents => "parents",
            Self::Children => "children",
            Self::Tags => "tags",
            Self::FeatureTags => "feature-tags",
            Self::TotalHits => "total-hits",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|section| section.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| MetaError::InvalidEvent(format!("unknown section '{}'", s)))
    }
}

/// What to summarize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryOptions {
    pub sections: BTreeSet<Section>,
    /// Restrict contributing instances to one author name.
    pub author: Option<String>,
}

impl Default for SummaryOptions {
    /// Every content section; counts stay approximate.
    fn default() -> Self {
        Self {
            sections: Section::ALL
                .into_iter()
                .filter(|s| *s != Section::TotalHits)
                .collect(),
            author: None,
        }
    }
}

impl SummaryOptions {
    #[must_use]
    pub fn only(sections: impl IntoIterator<Item = Section>) -> Self {
        Self {
            sections: sections.into_iter().collect(),
            author: None,
        }
    }

    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    #[must_use]
    pub fn wants(&self, section: Section) -> bool {
        self.sections.contains(&section)
    }
}

// =============================================================================
// SUMMARY RECORDS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentsSummary {
    pub count: u64,
    pub newest: Option<Timestamp>,
    /// The count was capped.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approximate: bool,
}

/// One submission variant of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionVariant {
    pub key: String,
    pub timestamp: Timestamp,
    pub depth: u32,
    pub references: BTreeMap<String, String>,
    pub settings: BTreeMap<String, String>,
    /// Instance key of the representative event.
    pub instance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub name: String,
    pub newest: Option<Timestamp>,
    /// Depth-0 submissions, newest first.
    pub direct: Vec<SubmissionVariant>,
    /// Submissions of an ancestor, newest first.
    pub indirect: Vec<SubmissionVariant>,
}

/// One (name, type, value) feature observation merged across instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedFeature {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: FeatureType,
    pub value: String,
    pub instances: Vec<String>,
    pub labels: Vec<String>,
    /// `(offset, offset + size)` pairs; absent when no observation had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<(u64, u64)>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<FeatureTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoEntry {
    pub instance: String,
    pub info: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastreamSummary {
    pub hash: EntityHash,
    pub labels: Vec<String>,
    pub size: u64,
    pub file_format: Option<String>,
    pub mime: Option<String>,
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub key: String,
    pub author: Author,
    pub action: Action,
    pub timestamp: Timestamp,
    pub num_feature_values: usize,
}

/// A parent or child of the summarized entity.
///
/// `entity` describes the relative. `action`, `author`, `timestamp` and
/// `relationship` describe the derivation between the two, taken from the
/// child's event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeNode {
    pub entity: EntityDescriptor,
    pub action: Action,
    pub author: Author,
    pub timestamp: Timestamp,
    pub relationship: BTreeMap<String, String>,
}

/// The canonical summary of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<DocumentsSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<MergedFeature>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Vec<InfoEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastreams: Option<Vec<DatastreamSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<InstanceSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<RelativeNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<RelativeNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<EntityTag>>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

// =============================================================================
// FEATURE MERGE
// =============================================================================

#[derive(Default)]
struct FeatureAcc {
    instances: BTreeSet<String>,
    labels: BTreeSet<String>,
    locations: BTreeSet<(u64, u64)>,
}

/// Merge feature observations by (name, type, value).
///
/// `contributions` pairs an instance key with the features it produced.
/// Instance keys, labels and locations are unioned; the result is sorted
/// by value, then name, then type. Merging the same contribution twice
/// changes nothing.
pub fn merge_features<'a, I>(contributions: I) -> Vec<MergedFeature>
where
    I: IntoIterator<Item = (&'a str, &'a [FeatureValue])>,
{
    let mut merged: BTreeMap<(String, String, FeatureType), FeatureAcc> = BTreeMap::new();
    for (instance, features) in contributions {
        for feature in features {
            let acc = merged
                .entry((feature.value.clone(), feature.name.clone(), feature.value_type))
                .or_default();
            acc.instances.insert(instance.to_string());
            if let Some(label) = &feature.label {
                acc.labels.insert(label.clone());
            }
            if let Some(offset) = feature.offset {
                let end = offset.saturating_add(feature.size.unwrap_or(0));
                acc.locations.insert((offset, end));
            }
        }
    }

    merged
        .into_iter()
        .map(|((value, name, value_type), acc)| MergedFeature {
            name,
            value_type,
            value,
            instances: acc.instances.into_iter().collect(),
            labels: acc.labels.into_iter().collect(),
            locations: (!acc.locations.is_empty()).then(|| acc.locations.into_iter().collect()),
            tags: Vec::new(),
        })
        .collect()
}
