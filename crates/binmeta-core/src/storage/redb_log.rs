//! # redb-backed Event Log
//!
//! A disk-backed event log and Query Executor using the redb embedded
//! database:
//! - ACID transactions (a batch append commits or nothing does)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC, so a query batch runs against one consistent read snapshot
//!
//! Events are stored postcard-encoded under their id. Two composite-key
//! index tables map entity hash and parent hash to event ids, mirroring
//! the indexes of the in-memory store.

use crate::query::{
    self, Field, Filter, QueryExecutor, QueryRequest, QueryResponse, ScrollCursor, ScrollPage,
};
use crate::store::{EventLog, scroll_page};
use crate::{EntityHash, Event, MetaError};
use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable,
    ReadableTableMetadata, TableDefinition,
};
use std::collections::BTreeSet;
use std::path::Path;

/// Event id -> postcard-encoded event.
const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

/// (entity hash, event id) -> marker.
const ENTITY_INDEX: TableDefinition<(&str, &str), u8> = TableDefinition::new("entity_index");

/// (parent hash, event id) -> marker.
const PARENT_INDEX: TableDefinition<(&str, &str), u8> = TableDefinition::new("parent_index");

/// Entity hash -> event count, for the distinct entity count.
const ENTITIES: TableDefinition<&str, u64> = TableDefinition::new("entities");

fn io_err(e: impl std::fmt::Display) -> MetaError {
    MetaError::IoError(e.to_string())
}

/// A disk-backed event log using redb.
pub struct RedbEventLog {
    db: Database,
}

impl std::fmt::Debug for RedbEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbEventLog").finish_non_exhaustive()
    }
}

impl RedbEventLog {
    /// Open or create an event log at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetaError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(io_err)?;
        let _ = write_txn.open_table(EVENTS).map_err(io_err)?;
        let _ = write_txn.open_table(ENTITY_INDEX).map_err(io_err)?;
        let _ = write_txn.open_table(PARENT_INDEX).map_err(io_err)?;
        let _ = write_txn.open_table(ENTITIES).map_err(io_err)?;
        write_txn.commit().map_err(io_err)?;

        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), MetaError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }

    fn write(&mut self, events: Vec<Event>) -> Result<usize, MetaError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let mut added = 0;
        {
            let mut events_table = write_txn.open_table(EVENTS).map_err(io_err)?;
            let mut entity_table = write_txn.open_table(ENTITY_INDEX).map_err(io_err)?;
            let mut parent_table = write_txn.open_table(PARENT_INDEX).map_err(io_err)?;
            let mut entities_table = write_txn.open_table(ENTITIES).map_err(io_err)?;

            for event in events {
                let id = event.id.as_str();
                if events_table.get(id).map_err(io_err)?.is_some() {
                    continue;
                }
                let bytes = postcard::to_allocvec(&event)
                    .map_err(|e| MetaError::SerializationError(e.to_string()))?;
                events_table.insert(id, bytes.as_slice()).map_err(io_err)?;

                let hash = event.hash().as_str();
                entity_table.insert((hash, id), 0u8).map_err(io_err)?;
                if let Some(parent) = event.parent() {
                    parent_table
                        .insert((parent.hash.as_str(), id), 0u8)
                        .map_err(io_err)?;
                }
                let count = entities_table
                    .get(hash)
                    .map_err(io_err)?
                    .map(|v| v.value())
                    .unwrap_or(0);
                entities_table
                    .insert(hash, count.saturating_add(1))
                    .map_err(io_err)?;
                added += 1;
            }
        }
        write_txn.commit().map_err(io_err)?;
        Ok(added)
    }

    /// Matching events from one read snapshot, in id order.
    fn candidates(txn: &ReadTransaction, filter: &Filter) -> Result<Vec<Event>, MetaError> {
        let events_table = txn.open_table(EVENTS).map_err(io_err)?;

        let pinned = match filter.pinned(Field::EntityHash) {
            Some(hashes) => Some((txn.open_table(ENTITY_INDEX).map_err(io_err)?, hashes)),
            None => match filter.pinned(Field::ParentHash) {
                Some(hashes) => Some((txn.open_table(PARENT_INDEX).map_err(io_err)?, hashes)),
                None => None,
            },
        };

        let mut out = Vec::new();
        match pinned {
            Some((index, hashes)) => {
                let mut ids = BTreeSet::new();
                for hash in &hashes {
                    ids.extend(index_ids(&index, &EntityHash::new(hash))?);
                }
                for id in ids {
                    if let Some(bytes) = events_table.get(id.as_str()).map_err(io_err)? {
                        let event = decode(bytes.value())?;
                        if filter.matches(&event) {
                            out.push(event);
                        }
                    }
                }
            }
            None => {
                for entry in events_table.iter().map_err(io_err)? {
                    let (_, bytes) = entry.map_err(io_err)?;
                    let event = decode(bytes.value())?;
                    if filter.matches(&event) {
                        out.push(event);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Every stored event, in id order.
    pub fn events(&self) -> Result<Vec<Event>, MetaError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        Self::candidates(&txn, &Filter::new())
    }
}

fn index_ids(
    index: &ReadOnlyTable<(&'static str, &'static str), u8>,
    hash: &EntityHash,
) -> Result<Vec<String>, MetaError> {
    let mut ids = Vec::new();
    for entry in index.range((hash.as_str(), "")..).map_err(io_err)? {
        let (key, _) = entry.map_err(io_err)?;
        let (h, id) = key.value();
        if h != hash.as_str() {
            break;
        }
        ids.push(id.to_string());
    }
    Ok(ids)
}

fn decode(bytes: &[u8]) -> Result<Event, MetaError> {
    postcard::from_bytes(bytes).map_err(|e| MetaError::DeserializationError(e.to_string()))
}

impl EventLog for RedbEventLog {
    fn append(&mut self, event: Event) -> Result<bool, MetaError> {
        Ok(self.write(vec![event])? == 1)
    }

    fn append_batch(&mut self, events: Vec<Event>) -> Result<usize, MetaError> {
        self.write(events)
    }

    fn event_count(&self) -> Result<usize, MetaError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(EVENTS).map_err(io_err)?;
        Ok(table.len().map_err(io_err)? as usize)
    }

    fn entity_count(&self) -> Result<usize, MetaError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(ENTITIES).map_err(io_err)?;
        Ok(table.len().map_err(io_err)? as usize)
    }
}

impl QueryExecutor for RedbEventLog {
    fn execute_batch(&self, requests: &[QueryRequest]) -> Result<Vec<QueryResponse>, MetaError> {
        tracing::debug!(requests = requests.len(), "redb batch");
        let txn = self.db.begin_read().map_err(io_err)?;
        requests
            .iter()
            .map(|request| {
                let events = Self::candidates(&txn, &request.filter)?;
                let refs: Vec<&Event> = events.iter().collect();
                Ok(query::evaluate(request, &refs))
            })
            .collect()
    }

    fn scroll(
        &self,
        request: &QueryRequest,
        cursor: Option<&ScrollCursor>,
        page_size: usize,
    ) -> Result<ScrollPage, MetaError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let events = Self::candidates(&txn, &request.filter)?;
        Ok(scroll_page(events.iter().collect(), cursor, page_size))
    }
}
