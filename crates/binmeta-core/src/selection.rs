//! # Representative Selection
//!
//! When several events describe the same node, exactly one is chosen to
//! represent it. The rule lives here and nowhere else: executors use it to
//! rank top hits, and the reducer and traversal engine use it to pick
//! between candidates from different buckets. Using two different rules
//! would make the summary and the neighborhood disagree about a node.
//!
//! Every order ends with the event id, so ties never depend on map
//! iteration or insertion order.

use crate::Event;
use std::cmp::Ordering;

/// One component of a composite event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Events with both size and file format first.
    SizeAndFormatFirst,
    /// Smaller entity size first; unknown size last.
    SizeAscMissingLast,
    /// Events with a file format first.
    FormatFirst,
    /// Newest first.
    TimestampDesc,
    /// Shallower submission depth first; no submission last.
    DepthAscMissingLast,
    /// Event id ascending. Total, so it always settles a tie.
    IdAsc,
}

impl SortKey {
    fn compare(self, a: &Event, b: &Event) -> Ordering {
        match self {
            Self::SizeAndFormatFirst => b.has_size_and_format().cmp(&a.has_size_and_format()),
            Self::SizeAscMissingLast => missing_last(a.entity.size, b.entity.size),
            Self::FormatFirst => b
                .entity
                .file_format
                .is_some()
                .cmp(&a.entity.file_format.is_some()),
            Self::TimestampDesc => b.timestamp.cmp(&a.timestamp),
            Self::DepthAscMissingLast => missing_last(a.depth(), b.depth()),
            Self::IdAsc => a.id.cmp(&b.id),
        }
    }
}

fn missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Named orderings used across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Rich events (size and format known) first, then newest.
    Representative,
    /// Newest first. Used wherever "the newest event per key" is kept.
    Newest,
    /// Representative, with direct submissions preferred over indirect ones.
    SubmissionVariant,
    /// Representative, additionally preferring small, formatted entities so
    /// real metadata beats a low-fidelity mapped placeholder.
    Link,
}

impl SortOrder {
    /// The composite key list for this order.
    #[must_use]
    pub const fn keys(self) -> &'static [SortKey] {
        match self {
            Self::Representative => &[
                SortKey::SizeAndFormatFirst,
                SortKey::TimestampDesc,
                SortKey::IdAsc,
            ],
            Self::Newest => &[SortKey::TimestampDesc, SortKey::IdAsc],
            Self::SubmissionVariant => &[
                SortKey::SizeAndFormatFirst,
                SortKey::DepthAscMissingLast,
                SortKey::TimestampDesc,
                SortKey::IdAsc,
            ],
            Self::Link => &[
                SortKey::SizeAndFormatFirst,
                SortKey::SizeAscMissingLast,
                SortKey::FormatFirst,
                SortKey::TimestampDesc,
                SortKey::IdAsc,
            ],
        }
    }
}

/// Compare two events under `order`. `Less` means `a` is preferred.
#[must_use]
pub fn compare(a: &Event, b: &Event, order: SortOrder) -> Ordering {
    order
        .keys()
        .iter()
        .map(|key| key.compare(a, b))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Sort events in place, best first.
pub fn sort(events: &mut [&Event], order: SortOrder) {
    events.sort_by(|a, b| compare(a, b, order));
}

/// The preferred event among `candidates`.
pub fn pick<'a, I>(candidates: I, order: SortOrder) -> Option<&'a Event>
where
    I: IntoIterator<Item = &'a Event>,
{
    candidates
        .into_iter()
        .min_by(|a, b| compare(a, b, order))
}

/// True when `challenger` should replace `incumbent`.
#[must_use]
pub fn prefers(challenger: &Event, incumbent: &Event, order: SortOrder) -> bool {
    compare(challenger, incumbent, order).is_lt()
}

// =============================================================================
// TESTS
// =============================================================================
