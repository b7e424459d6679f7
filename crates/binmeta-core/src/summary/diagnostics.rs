//! Diagnostics appended to a summary.
//!
//! Truncation, volume and content-size findings are reported here instead
//! of failing the read.

use crate::collaborators::PluginConfig;
use crate::primitives::{CONTENT_LABEL, MAX_NAMED_PLUGINS};
use crate::summary::{DatastreamSummary, Section};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub id: String,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            severity,
            message: message.into(),
        }
    }
}

/// A grouped section hit its bucket limit.
#[must_use]
pub fn truncated(section: Section, limit: usize) -> Diagnostic {
    Diagnostic::new(
        format!("truncated_{}", section.as_str()),
        Severity::Warning,
        format!(
            "{} reached the limit of {} groups and may be incomplete",
            section, limit
        ),
    )
}

/// A source hit the submission variant limit.
#[must_use]
pub fn truncated_variants(source: &str, limit: usize) -> Diagnostic {
    Diagnostic::new(
        "truncated_source_variants",
        Severity::Warning,
        format!(
            "source '{}' reached the limit of {} submissions and may be incomplete",
            source, limit
        ),
    )
}

/// The entity has at least `threshold` events.
#[must_use]
pub fn many_events(count: u64, exact: bool, threshold: u64) -> Option<Diagnostic> {
    (count >= threshold).then(|| {
        Diagnostic::new(
            "many_events",
            Severity::Warning,
            format!(
                "entity has {}{} events; summary accuracy is not guaranteed",
                count,
                if exact { "" } else { "+" }
            ),
        )
    })
}

/// Check the content stream against every plugin's size limit.
///
/// Plugins without a `max_content_size` are misconfigured: they are logged
/// and left out. A limit of 0 means no limit.
#[must_use]
pub fn content_size(streams: &[DatastreamSummary], plugins: &[PluginConfig]) -> Option<Diagnostic> {
    let Some(content) = streams
        .iter()
        .find(|s| s.labels.iter().any(|l| l == CONTENT_LABEL))
    else {
        return Some(Diagnostic::new(
            "content_not_found",
            Severity::Info,
            "no data stream is labelled 'content'",
        ));
    };

    let mut refusing: Vec<&str> = plugins
        .iter()
        .filter(|p| match p.max_content_size {
            None => {
                tracing::warn!(plugin = %p.name, "plugin config has no max_content_size, skipped");
                false
            }
            Some(0) => false,
            Some(max) => content.size > max,
        })
        .map(|p| p.name.as_str())
        .collect();
    if refusing.is_empty() {
        return None;
    }
    refusing.sort_unstable();
    refusing.dedup();

    let named = refusing
        .iter()
        .take(MAX_NAMED_PLUGINS)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    let suffix = match refusing.len().saturating_sub(MAX_NAMED_PLUGINS) {
        0 => String::new(),
        more => format!(" (+{} more)", more),
    };
    Some(Diagnostic::new(
        "content_too_large",
        Severity::Warning,
        format!(
            "{} plugin(s) will not process content of {} bytes: {}{}",
            refusing.len(),
            content.size,
            named,
            suffix
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityHash;

    fn stream(labels: &[&str], size: u64) -> DatastreamSummary {
        DatastreamSummary {
            hash: EntityHash::new("s1"),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            size,
            file_format: None,
            mime: None,
            instances: Vec::new(),
        }
    }

    fn plugin(name: &str, max: Option<u64>) -> PluginConfig {
        PluginConfig {
            name: name.into(),
            version: None,
            max_content_size: max,
        }
    }

    #[test]
    fn missing_content_is_informational() {
        let d = content_size(&[stream(&["text"], 5)], &[]).expect("diagnostic");
        assert_eq!(d.id, "content_not_found");
        assert_eq!(d.severity, Severity::Info);
    }

    #[test]
    fn zero_and_absent_limits_never_refuse() {
        let plugins = [plugin("a", Some(0)), plugin("b", None), plugin("c", Some(100))];
        assert!(content_size(&[stream(&["content"], 50)], &plugins).is_none());
    }

    #[test]
    fn refusing_plugins_named_up_to_five() {
        let plugins: Vec<PluginConfig> = ["g", "f", "e", "d", "c", "b", "a"]
            .iter()
            .map(|n| plugin(n, Some(10)))
            .collect();
        let d = content_size(&[stream(&["content"], 11)], &plugins).expect("diagnostic");
        assert_eq!(
            d.message,
            "7 plugin(s) will not process content of 11 bytes: a, b, c, d, e (+2 more)"
        );
    }

    #[test]
    fn many_events_threshold_is_inclusive() {
        assert!(many_events(999, true, 1000).is_none());
        assert!(many_events(1000, true, 1000).is_some());
        let approx = many_events(10_000, false, 1000).expect("diagnostic");
        assert!(approx.message.contains("10000+"));
    }
}
