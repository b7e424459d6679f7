//! # Event Store
//!
//! The append-only event log and the in-memory Query Executor.
//!
//! All data structures use `BTreeMap` for deterministic ordering. Events are
//! keyed by their content-derived id, so appending the same event twice is a
//! no-op and scroll order is stable across runs.

use crate::query::{
    self, Field, Filter, QueryExecutor, QueryRequest, QueryResponse, ScrollCursor, ScrollPage,
};
use crate::{EntityHash, Event, EventId, MetaError};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// EVENTLOG TRAIT
// =============================================================================

/// Write side of an event store.
///
/// Events are immutable once written. Implementations accept events that
/// have already been normalized by the [`crate::Ingestor`].
pub trait EventLog {
    /// Append one event. Returns `false` if an event with the same id exists.
    fn append(&mut self, event: Event) -> Result<bool, MetaError>;

    /// Append many events. Returns how many were new.
    fn append_batch(&mut self, events: Vec<Event>) -> Result<usize, MetaError> {
        let mut added = 0;
        for event in events {
            if self.append(event)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Total number of stored events.
    fn event_count(&self) -> Result<usize, MetaError>;

    /// Number of distinct entity hashes.
    fn entity_count(&self) -> Result<usize, MetaError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-memory event log with entity and parent indexes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    events: BTreeMap<EventId, Event>,
    by_entity: BTreeMap<EntityHash, BTreeSet<EventId>>,
    by_parent: BTreeMap<EntityHash, BTreeSet<EventId>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already-normalized events.
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut store = Self::new();
        for event in events {
            store.insert(event);
        }
        store
    }

    /// All events in id order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    #[must_use]
    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.events.get(id)
    }

    fn insert(&mut self, event: Event) -> bool {
        if self.events.contains_key(&event.id) {
            return false;
        }
        self.by_entity
            .entry(event.hash().clone())
            .or_default()
            .insert(event.id.clone());
        if let Some(parent) = event.parent() {
            self.by_parent
                .entry(parent.hash.clone())
                .or_default()
                .insert(event.id.clone());
        }
        self.events.insert(event.id.clone(), event);
        true
    }

    /// Events matching `filter`, in id order.
    ///
    /// An `Eq`/`In` on the entity or parent hash is answered from the index.
    fn candidates(&self, filter: &Filter) -> Vec<&Event> {
        let indexed = filter
            .pinned(Field::EntityHash)
            .map(|hashes| (&self.by_entity, hashes))
            .or_else(|| {
                filter
                    .pinned(Field::ParentHash)
                    .map(|hashes| (&self.by_parent, hashes))
            });

        match indexed {
            Some((index, hashes)) => {
                let ids: BTreeSet<&EventId> = hashes
                    .iter()
                    .filter_map(|h| index.get(&EntityHash::new(h)))
                    .flatten()
                    .collect();
                ids.into_iter()
                    .filter_map(|id| self.events.get(id))
                    .filter(|e| filter.matches(e))
                    .collect()
            }
            None => self.events.values().filter(|e| filter.matches(e)).collect(),
        }
    }
}

impl EventLog for MemoryStore {
    fn append(&mut self, event: Event) -> Result<bool, MetaError> {
        Ok(self.insert(event))
    }

    fn event_count(&self) -> Result<usize, MetaError> {
        Ok(self.events.len())
    }

    fn entity_count(&self) -> Result<usize, MetaError> {
        Ok(self.by_entity.len())
    }
}

impl QueryExecutor for MemoryStore {
    fn execute_batch(&self, requests: &[QueryRequest]) -> Result<Vec<QueryResponse>, MetaError> {
        tracing::debug!(requests = requests.len(), "memory store batch");
        Ok(requests
            .iter()
            .map(|request| query::evaluate(request, &self.candidates(&request.filter)))
            .collect())
    }

    fn scroll(
        &self,
        request: &QueryRequest,
        cursor: Option<&ScrollCursor>,
        page_size: usize,
    ) -> Result<ScrollPage, MetaError> {
        Ok(scroll_page(self.candidates(&request.filter), cursor, page_size))
    }
}

/// Cut one page out of id-ordered candidates.
pub(crate) fn scroll_page(
    candidates: Vec<&Event>,
    cursor: Option<&ScrollCursor>,
    page_size: usize,
) -> ScrollPage {
    let mut remaining = candidates
        .into_iter()
        .filter(|e| cursor.is_none_or(|c| e.id.as_str() > c.0.as_str()))
        .peekable();
    let hits: Vec<Event> = remaining.by_ref().take(page_size.max(1)).cloned().collect();
    let next = match (remaining.peek(), hits.last()) {
        (Some(_), Some(last)) => Some(ScrollCursor(last.id.0.clone())),
        _ => None,
    };
    ScrollPage { hits, next }
}

// =============================================================================
// TESTS
// =============================================================================
