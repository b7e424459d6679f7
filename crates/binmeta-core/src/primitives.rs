//! # Primitives
//!
//! Hardcoded runtime constants for the binmeta CORE.
//!
//! These values define the observable behavior of the reducer and the
//! traversal engine (bucket limits, round caps, fan-out throttling) and
//! the input limits enforced by the Ingestor. They are compiled into the
//! binary; the tunable subset is mirrored in [`crate::config::CoreConfig`].

// =============================================================================
// REDUCTION
// =============================================================================

/// Default maximum bucket count for every grouped aggregation.
pub const DEFAULT_BUCKET_LIMIT: usize = 100;

/// Default maximum number of submission variants per source.
pub const DEFAULT_SOURCE_VARIANT_LIMIT: usize = 100;

/// Default event count at which a summary is flagged as possibly inaccurate.
pub const DEFAULT_MANY_EVENTS_THRESHOLD: u64 = 1000;

/// Counts above this value are approximate unless exact totals are requested.
pub const DEFAULT_APPROXIMATE_COUNT_LIMIT: u64 = 10_000;

/// The data-stream label that marks an entity's own content.
pub const CONTENT_LABEL: &str = "content";

/// How many refusing plugins are named in a content-size diagnostic.
pub const MAX_NAMED_PLUGINS: usize = 5;

// =============================================================================
// TRAVERSAL
// =============================================================================

/// Hard cap on traversal rounds. The loop always halts within this bound.
pub const MAX_TRAVERSAL_ROUNDS: usize = 10;

/// Fan-out cap per query while the neighborhood is small.
pub const DEFAULT_FANOUT: usize = 30;

/// Once more than this many links are known, fan-out drops to [`DENSE_FANOUT`].
pub const DENSE_LINK_THRESHOLD: usize = 200;

/// Fan-out cap for dense neighborhoods.
pub const DENSE_FANOUT: usize = 2;

/// Once more than this many links are known, fan-out drops to [`SATURATED_FANOUT`].
pub const SATURATED_LINK_THRESHOLD: usize = 500;

/// Fan-out cap for saturated neighborhoods.
pub const SATURATED_FANOUT: usize = 1;

/// Default number of cousins after which cousin discovery stops.
pub const DEFAULT_MAX_COUSINS: usize = 20;

/// Default number of rounds during which cousin discovery may run.
pub const DEFAULT_MAX_COUSIN_DISTANCE: usize = 2;

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Magic bytes for the binmeta event-log format header.
pub const MAGIC_BYTES: &[u8; 4] = b"BMET";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

/// Page size used when scrolling the whole log for export.
pub const EXPORT_PAGE_SIZE: usize = 500;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for hashes, names, labels and other short string fields.
pub const MAX_FIELD_LENGTH: usize = 1024;

/// Maximum length for feature values.
pub const MAX_VALUE_LENGTH: usize = 65536;

/// Maximum length of an opaque info payload (1 MB).
pub const MAX_INFO_LENGTH: usize = 1024 * 1024;

/// Maximum number of events accepted in a single ingestion batch.
pub const MAX_BATCH_LENGTH: usize = 10_000;

/// Fan-out cap for a traversal round, given how many links are already known.
///
/// Dense regions of the provenance graph would otherwise grow the frontier
/// exponentially.
#[must_use]
pub const fn fanout_for(known_links: usize) -> usize {
    if known_links > SATURATED_LINK_THRESHOLD {
        SATURATED_FANOUT
    } else if known_links > DENSE_LINK_THRESHOLD {
        DENSE_FANOUT
    } else {
        DEFAULT_FANOUT
    }
}
