//! # Query Module
//!
//! The contract between the CORE and the document store that holds events.
//!
//! The reducer and the traversal engine never touch events directly. They
//! describe what they need as a [`QueryRequest`] (a conjunctive filter, an
//! optional grouping, an optional flat hit list) and hand batches of
//! requests to a [`QueryExecutor`]. Every request in a batch is independent;
//! the executor answers with one [`QueryResponse`] per request, in order.
//!
//! ## Determinism
//!
//! - Bucket ranking always ends with the bucket key, ascending.
//! - Top hits are ordered by a [`SortOrder`], which always ends with the
//!   event id.
//! - Executors must evaluate a whole batch against one snapshot.

use crate::selection::{self, SortOrder};
use crate::traversal::link_identities;
use crate::{Action, EntityHash, Event, MetaError, Timestamp};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

// =============================================================================
// FIELDS AND PREDICATES
// =============================================================================

/// An event attribute a query can filter or group on.
///
/// Some fields are multi-valued (an event carries several data streams) and
/// some are derived (instance key, link identity). A field with no value on
/// an event simply yields an empty list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    EntityHash,
    Action,
    AuthorName,
    AuthorCategory,
    /// `category.name.action`, unique per entity.
    InstanceKey,
    ParentHash,
    SourceName,
    SubmissionKey,
    Depth,
    Security,
    Timestamp,
    /// Hashes of every attached data stream.
    StreamHash,
    /// `"true"` when the event carries at least one feature value.
    HasFeatures,
    /// `"true"` when the event carries an info payload.
    HasInfo,
    /// Provenance link identities the event contributes.
    LinkKey,
}

impl Field {
    /// All values this field takes on `event`.
    #[must_use]
    pub fn values(self, event: &Event) -> Vec<String> {
        match self {
            Self::EntityHash => vec![event.hash().to_string()],
            Self::Action => vec![event.action().as_str().to_string()],
            Self::AuthorName => vec![event.author.name.clone()],
            Self::AuthorCategory => vec![event.author.category.clone()],
            Self::InstanceKey => vec![event.instance_key().to_string()],
            Self::ParentHash => event.parent().map(|p| p.hash.to_string()).into_iter().collect(),
            Self::SourceName => event.source.iter().map(|s| s.name.clone()).collect(),
            Self::SubmissionKey => event.source.iter().map(|s| s.key()).collect(),
            Self::Depth => event.depth().map(|d| d.to_string()).into_iter().collect(),
            Self::Security => vec![event.security.as_str().to_string()],
            Self::Timestamp => vec![event.timestamp.millis().to_string()],
            Self::StreamHash => event.streams.iter().map(|s| s.hash.to_string()).collect(),
            Self::HasFeatures => flag(!event.features.is_empty()),
            Self::HasInfo => flag(event.info.is_some()),
            Self::LinkKey => link_identities(event).into_iter().map(|l| l.id).collect(),
        }
    }

    /// Hash-valued fields compare case-insensitively.
    #[must_use]
    pub const fn is_hash(self) -> bool {
        matches!(self, Self::EntityHash | Self::ParentHash | Self::StreamHash)
    }

    /// Normalize an operand the way the field's values are normalized.
    fn operand(self, value: String) -> String {
        if self.is_hash() {
            EntityHash::new(value).into()
        } else {
            value
        }
    }

    /// Integer view of the field, for range predicates.
    #[must_use]
    pub fn number(self, event: &Event) -> Option<i64> {
        match self {
            Self::Depth => event.depth().map(i64::from),
            Self::Timestamp => Some(event.timestamp.millis()),
            _ => None,
        }
    }
}

fn flag(set: bool) -> Vec<String> {
    if set {
        vec!["true".to_string()]
    } else {
        Vec::new()
    }
}

/// One filter condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Some value of the field equals the operand.
    Eq(Field, String),
    /// Some value of the field is in the operand set.
    In(Field, BTreeSet<String>),
    /// The integer view of the field lies within the inclusive bounds.
    Range {
        field: Field,
        gte: Option<i64>,
        lte: Option<i64>,
    },
    /// The field has at least one value.
    Exists(Field),
    Not(Box<Predicate>),
}

impl Predicate {
    #[must_use]
    pub fn eq(field: Field, value: impl Into<String>) -> Self {
        Self::Eq(field, field.operand(value.into()))
    }

    #[must_use]
    pub fn any_of<I, S>(field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In(
            field,
            values
                .into_iter()
                .map(|v| field.operand(v.into()))
                .collect(),
        )
    }

    /// Restrict to the derivation-producing actions.
    #[must_use]
    pub fn derivation_actions() -> Self {
        Self::any_of(Field::Action, Action::DERIVATION.iter().map(|a| a.as_str()))
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against one event.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Eq(field, value) => field.values(event).iter().any(|v| v == value),
            Self::In(field, set) => field.values(event).iter().any(|v| set.contains(v)),
            Self::Range { field, gte, lte } => field.number(event).is_some_and(|n| {
                gte.is_none_or(|lo| n >= lo) && lte.is_none_or(|hi| n <= hi)
            }),
            Self::Exists(field) => !field.values(event).is_empty(),
            Self::Not(inner) => !inner.matches(event),
        }
    }
}

/// A conjunction of predicates. The empty filter matches every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter(pub Vec<Predicate>);

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events of one entity.
    #[must_use]
    pub fn entity(hash: &EntityHash) -> Self {
        Self(vec![Predicate::eq(Field::EntityHash, hash.as_str())])
    }

    /// Add one more condition.
    #[must_use]
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.0.push(predicate);
        self
    }

    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.0.iter().all(|p| p.matches(event))
    }

    /// Hashes this filter pins `field` to, if it is pinned by an `Eq` or `In`.
    ///
    /// Executors use this to narrow the candidate set through an index
    /// instead of scanning every event.
    #[must_use]
    pub fn pinned(&self, field: Field) -> Option<BTreeSet<String>> {
        self.0.iter().find_map(|p| match p {
            Predicate::Eq(f, v) if *f == field => Some(BTreeSet::from([v.clone()])),
            Predicate::In(f, set) if *f == field => Some(set.clone()),
            _ => None,
        })
    }
}

/// The caller's visibility restriction.
///
/// Produced by the security collaborator and appended to every request the
/// CORE builds. The CORE never inspects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visibility(Option<Predicate>);

impl Visibility {
    /// No restriction.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self(None)
    }

    #[must_use]
    pub const fn new(predicate: Predicate) -> Self {
        Self(Some(predicate))
    }

    /// Append the restriction to `filter`.
    #[must_use]
    pub fn apply(&self, filter: Filter) -> Filter {
        match &self.0 {
            Some(p) => filter.and(p.clone()),
            None => filter,
        }
    }
}

// =============================================================================
// AGGREGATIONS
// =============================================================================

/// How buckets are ranked before truncation. Ties go to the smaller key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketOrder {
    CountDesc,
    KeyAsc,
    /// By the newest event timestamp in the bucket.
    NewestDesc,
}

/// Representative documents returned inside each bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopHits {
    pub sort: SortOrder,
    pub size: usize,
}

/// Group matching events by a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub field: Field,
    /// Maximum number of buckets returned.
    pub size: usize,
    pub order: BucketOrder,
    pub top_hits: Option<TopHits>,
    pub sub: Option<Box<Aggregation>>,
}

impl Aggregation {
    #[must_use]
    pub fn terms(field: Field, size: usize, order: BucketOrder) -> Self {
        Self {
            field,
            size,
            order,
            top_hits: None,
            sub: None,
        }
    }

    /// Keep the best `size` events per bucket.
    #[must_use]
    pub fn with_top_hits(mut self, sort: SortOrder, size: usize) -> Self {
        self.top_hits = Some(TopHits { sort, size });
        self
    }

    #[must_use]
    pub fn with_sub(mut self, sub: Aggregation) -> Self {
        self.sub = Some(Box::new(sub));
        self
    }
}

/// One group of events sharing a field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
    pub newest: Option<Timestamp>,
    pub hits: Vec<Event>,
    pub buckets: Vec<Bucket>,
}

impl Bucket {
    /// The first top hit, if any were requested.
    #[must_use]
    pub fn top(&self) -> Option<&Event> {
        self.hits.first()
    }
}

// =============================================================================
// REQUESTS AND RESPONSES
// =============================================================================

/// One independent query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    pub filter: Filter,
    pub aggregation: Option<Aggregation>,
    /// Flat list of matching events, best first.
    pub hits: Option<TopHits>,
    /// Totals above this are capped and reported inexact. `None` counts exactly.
    pub count_limit: Option<u64>,
}

impl QueryRequest {
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    #[must_use]
    pub fn with_hits(mut self, sort: SortOrder, size: usize) -> Self {
        self.hits = Some(TopHits { sort, size });
        self
    }

    #[must_use]
    pub fn with_count_limit(mut self, limit: Option<u64>) -> Self {
        self.count_limit = limit;
        self
    }
}

/// Match count, possibly capped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TotalHits {
    pub value: u64,
    pub exact: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResponse {
    pub total: TotalHits,
    /// Newest timestamp among all matching events.
    pub newest: Option<Timestamp>,
    pub buckets: Vec<Bucket>,
    pub hits: Vec<Event>,
}

/// Opaque position in a scroll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollCursor(pub String);

/// One page of a scroll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrollPage {
    pub hits: Vec<Event>,
    /// `None` once the scroll is exhausted.
    pub next: Option<ScrollCursor>,
}

/// The document store seen from the CORE.
pub trait QueryExecutor {
    /// Execute independent requests in one round trip.
    ///
    /// The response vector has exactly one entry per request, in order.
    fn execute_batch(&self, requests: &[QueryRequest]) -> Result<Vec<QueryResponse>, MetaError>;

    /// Page through every event matching `request.filter`, in event id order.
    fn scroll(
        &self,
        request: &QueryRequest,
        cursor: Option<&ScrollCursor>,
        page_size: usize,
    ) -> Result<ScrollPage, MetaError>;

    /// Execute a single request.
    fn execute(&self, request: QueryRequest) -> Result<QueryResponse, MetaError> {
        self.execute_batch(std::slice::from_ref(&request))?
            .pop()
            .ok_or_else(|| MetaError::Executor("empty batch response".to_string()))
    }
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Evaluate `request` over already-filtered candidates.
///
/// Shared by the bundled executors. `events` must contain only events that
/// match `request.filter`.
#[must_use]
pub fn evaluate(request: &QueryRequest, events: &[&Event]) -> QueryResponse {
    let count = events.len() as u64;
    let total = match request.count_limit {
        Some(limit) if count > limit => TotalHits {
            value: limit,
            exact: false,
        },
        _ => TotalHits {
            value: count,
            exact: true,
        },
    };
    let newest = events.iter().map(|e| e.timestamp).max();
    let buckets = request
        .aggregation
        .as_ref()
        .map(|agg| aggregate(agg, events))
        .unwrap_or_default();
    let hits = request
        .hits
        .map(|th| top_hits(events, th))
        .unwrap_or_default();

    QueryResponse {
        total,
        newest,
        buckets,
        hits,
    }
}

fn top_hits(events: &[&Event], spec: TopHits) -> Vec<Event> {
    let mut sorted = events.to_vec();
    selection::sort(&mut sorted, spec.sort);
    sorted.into_iter().take(spec.size).cloned().collect()
}

fn aggregate(agg: &Aggregation, events: &[&Event]) -> Vec<Bucket> {
    let mut groups: BTreeMap<String, Vec<&Event>> = BTreeMap::new();
    for &event in events {
        let keys: BTreeSet<String> = agg.field.values(event).into_iter().collect();
        for key in keys {
            groups.entry(key).or_default().push(event);
        }
    }

    let mut buckets: Vec<Bucket> = groups
        .into_iter()
        .map(|(key, members)| Bucket {
            doc_count: members.len() as u64,
            newest: members.iter().map(|e| e.timestamp).max(),
            hits: agg
                .top_hits
                .map(|th| top_hits(&members, th))
                .unwrap_or_default(),
            buckets: agg
                .sub
                .as_ref()
                .map(|sub| aggregate(sub, &members))
                .unwrap_or_default(),
            key,
        })
        .collect();

    buckets.sort_by(|a, b| {
        let primary = match agg.order {
            BucketOrder::CountDesc => b.doc_count.cmp(&a.doc_count),
            BucketOrder::KeyAsc => std::cmp::Ordering::Equal,
            BucketOrder::NewestDesc => b.newest.cmp(&a.newest),
        };
        primary.then_with(|| a.key.cmp(&b.key))
    });
    buckets.truncate(agg.size);
    buckets
}

// =============================================================================
// DEADLINE
// =============================================================================

/// A caller-imposed bound on a multi-round operation.
///
/// Checked between rounds only, so a round's results are either fully
/// applied or not requested at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(instant)
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Per-call context threaded through the reducer and the traversal engine.
#[derive(Debug, Clone, Default)]
pub struct ReadContext {
    pub visibility: Visibility,
    pub deadline: Option<Deadline>,
}

impl ReadContext {
    #[must_use]
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fail once the deadline, if any, has passed.
    pub fn check(&self) -> Result<(), MetaError> {
        check_deadline(self.deadline.as_ref())
    }
}

/// Fail with [`MetaError::DeadlineExceeded`] once `deadline` has passed.
pub fn check_deadline(deadline: Option<&Deadline>) -> Result<(), MetaError> {
    match deadline {
        Some(d) if d.expired() => Err(MetaError::DeadlineExceeded),
        _ => Ok(()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
