//! # Provenance Neighborhood Traversal
//!
//! Expands the derivation graph around one focus entity into a
//! deduplicated, deterministically ordered list of links.
//!
//! ## Rounds
//!
//! Round 0 asks for the focus's parents and children. Every later round
//! walks one hop further up from newly found parents and down from newly
//! found children. With cousin discovery enabled it also asks for the
//! children of known parents, the parents of known children and both
//! neighbors of known cousins, while the cousin budget and distance allow.
//!
//! All queries of a round go to the executor as one batch. Round N+1 is
//! planned only after round N's results are absorbed, which is what keeps
//! a hash from being queried twice in the same direction.
//!
//! ## Bounds
//!
//! - At most [`MAX_TRAVERSAL_ROUNDS`] rounds.
//! - Per-query fan-out shrinks as links accumulate ([`fanout_for`]).
//! - The loop stops as soon as a round would issue no queries.
//!
//! All per-call state lives in [`RoundState`]; concurrent calls share
//! nothing but the executor.

use crate::primitives::{
    DEFAULT_MAX_COUSIN_DISTANCE, DEFAULT_MAX_COUSINS, MAX_TRAVERSAL_ROUNDS, fanout_for,
};
use crate::query::{
    Aggregation, BucketOrder, Field, Filter, Predicate, QueryExecutor, QueryRequest,
    QueryResponse, ReadContext, Visibility,
};
use crate::selection::{self, SortOrder};
use crate::{Action, Author, EntityHash, Event, MetaError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// LINK IDENTITY
// =============================================================================

/// What a link points back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkKind {
    /// The child was submitted directly from a named source.
    Source,
    /// The child was derived from another entity.
    Derivation {
        parent: EntityHash,
        parent_instance: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkIdentity {
    pub id: String,
    pub kind: LinkKind,
}

/// The provenance links an event contributes.
///
/// Only derivation actions produce links. A derivation link is identified
/// by the child's and the parent's entity-qualified instance keys; a source
/// link (direct submission) by the child's instance key and the source
/// name. Self-referential parents produce no derivation link.
pub(crate) fn link_identities(event: &Event) -> Vec<LinkIdentity> {
    if !event.action().is_derivation() {
        return Vec::new();
    }
    let child = event.instance_key().qualified(event.hash());
    let mut out = Vec::new();

    if let Some(parent) = event.parent().filter(|_| !event.is_self_referential()) {
        let parent_instance = parent.instance_key().qualified(&parent.hash);
        out.push(LinkIdentity {
            id: format!("{}.{}", child, parent_instance),
            kind: LinkKind::Derivation {
                parent: parent.hash.clone(),
                parent_instance,
            },
        });
    }
    if let Some(source) = event.source.as_ref().filter(|s| s.is_direct()) {
        out.push(LinkIdentity {
            id: format!("{}.{}", child, source.name),
            kind: LinkKind::Source,
        });
    }
    out
}

// =============================================================================
// RESULT SHAPES
// =============================================================================

/// Options for [`Traversal::nearby`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearbyOptions {
    pub include_cousins: bool,
    /// Cousin discovery stops once this many cousins are known.
    pub max_cousins: usize,
    /// Cousin discovery runs only in rounds `1..=max_cousin_distance`.
    pub max_cousin_distance: usize,
}

impl Default for NearbyOptions {
    fn default() -> Self {
        Self {
            include_cousins: false,
            max_cousins: DEFAULT_MAX_COUSINS,
            max_cousin_distance: DEFAULT_MAX_COUSIN_DISTANCE,
        }
    }
}

/// The child end of a link, described by its representative event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkNode {
    pub hash: EntityHash,
    pub action: Action,
    pub author: Author,
    pub timestamp: Timestamp,
    pub file_format: Option<String>,
    pub size: Option<u64>,
    pub depth: Option<u32>,
    pub relationship: BTreeMap<String, String>,
    pub security: String,
}

/// One provenance edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub child: EntityHash,
    /// `None` for a source link.
    pub parent: Option<EntityHash>,
    /// Entity-qualified instance key of the parent, for derivation links.
    pub parent_instance: Option<String>,
    /// Source name of the child's submission, if any.
    pub source: Option<String>,
    pub child_node: LinkNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborhoodResult {
    pub focus: EntityHash,
    pub links: Vec<Link>,
}

/// Round-trip accounting for one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalStats {
    pub rounds: usize,
    pub queries: usize,
}

// =============================================================================
// ROUND STATE
// =============================================================================

/// Which way a query looks from its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    /// Events of the hash itself, i.e. links to its parents.
    Parents,
    /// Events whose parent is the hash.
    Children,
}

/// Why a query was planned; decides how its edges are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Frontier,
    Cousin,
}

/// One query of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub direction: Direction,
    pub hash: EntityHash,
    pub purpose: Purpose,
}

impl PlannedQuery {
    /// The executor request for this query: link buckets, best event each.
    #[must_use]
    pub fn request(&self, cap: usize, visibility: &Visibility) -> QueryRequest {
        let filter = match self.direction {
            Direction::Parents => Filter::entity(&self.hash),
            Direction::Children => Filter::new()
                .and(Predicate::eq(Field::ParentHash, self.hash.as_str()))
                .and(Predicate::eq(Field::EntityHash, self.hash.as_str()).negate()),
        }
        .and(Predicate::derivation_actions());

        QueryRequest::new(visibility.apply(filter)).aggregate(
            Aggregation::terms(Field::LinkKey, cap, BucketOrder::NewestDesc)
                .with_top_hits(SortOrder::Link, 1),
        )
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    event: Event,
    kind: LinkKind,
}

/// Everything one traversal knows between rounds.
#[derive(Debug, Clone)]
pub struct RoundState {
    focus: EntityHash,
    round: usize,
    parents: BTreeSet<EntityHash>,
    children: BTreeSet<EntityHash>,
    cousins: BTreeSet<EntityHash>,
    new_parents: BTreeSet<EntityHash>,
    new_children: BTreeSet<EntityHash>,
    queried: BTreeSet<(Direction, EntityHash)>,
    links: BTreeMap<String, Candidate>,
}

impl RoundState {
    #[must_use]
    pub fn new(focus: EntityHash) -> Self {
        Self {
            focus,
            round: 0,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            cousins: BTreeSet::new(),
            new_parents: BTreeSet::new(),
            new_children: BTreeSet::new(),
            queried: BTreeSet::new(),
            links: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn round(&self) -> usize {
        self.round
    }

    #[must_use]
    pub fn parents(&self) -> &BTreeSet<EntityHash> {
        &self.parents
    }

    #[must_use]
    pub fn children(&self) -> &BTreeSet<EntityHash> {
        &self.children
    }

    #[must_use]
    pub fn cousins(&self) -> &BTreeSet<EntityHash> {
        &self.cousins
    }

    /// Distinct links discovered so far.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// This round's per-query fan-out cap.
    #[must_use]
    pub fn cap(&self) -> usize {
        fanout_for(self.links.len())
    }

    fn cousin_search_active(&self, options: &NearbyOptions) -> bool {
        options.include_cousins
            && self.cousins.len() < options.max_cousins
            && self.round <= options.max_cousin_distance
    }

    /// Plan this round's queries. Pairs already queried are skipped and
    /// recorded, so planning twice never repeats a query.
    pub fn plan(&mut self, options: &NearbyOptions) -> Vec<PlannedQuery> {
        let mut wanted: Vec<(Direction, EntityHash, Purpose)> = Vec::new();

        if self.round == 0 {
            wanted.push((Direction::Parents, self.focus.clone(), Purpose::Frontier));
            wanted.push((Direction::Children, self.focus.clone(), Purpose::Frontier));
        } else {
            wanted.extend(
                self.new_parents
                    .iter()
                    .map(|h| (Direction::Parents, h.clone(), Purpose::Frontier)),
            );
            wanted.extend(
                self.new_children
                    .iter()
                    .map(|h| (Direction::Children, h.clone(), Purpose::Frontier)),
            );
            if self.cousin_search_active(options) {
                wanted.extend(
                    self.parents
                        .iter()
                        .map(|h| (Direction::Children, h.clone(), Purpose::Cousin)),
                );
                wanted.extend(
                    self.children
                        .iter()
                        .map(|h| (Direction::Parents, h.clone(), Purpose::Cousin)),
                );
                for h in &self.cousins {
                    wanted.push((Direction::Parents, h.clone(), Purpose::Cousin));
                    wanted.push((Direction::Children, h.clone(), Purpose::Cousin));
                }
            }
        }

        wanted
            .into_iter()
            .filter_map(|(direction, hash, purpose)| {
                self.queried
                    .insert((direction, hash.clone()))
                    .then_some(PlannedQuery {
                        direction,
                        hash,
                        purpose,
                    })
            })
            .collect()
    }

    /// Fold one round's responses into the state and advance the round.
    ///
    /// `responses` must align with `planned`.
    pub fn absorb(&mut self, planned: &[PlannedQuery], responses: &[QueryResponse]) {
        let mut found_parents = BTreeSet::new();
        let mut found_children = BTreeSet::new();
        let mut found_cousins = BTreeSet::new();

        for (query, response) in planned.iter().zip(responses) {
            for bucket in &response.buckets {
                let Some(event) = bucket.top() else { continue };
                let Some(identity) = link_identities(event)
                    .into_iter()
                    .find(|l| l.id == bucket.key)
                else {
                    continue;
                };

                if let LinkKind::Derivation { parent, .. } = &identity.kind {
                    let child = event.hash();
                    match (query.purpose, query.direction) {
                        (Purpose::Frontier, Direction::Parents) => {
                            found_parents.insert(parent.clone());
                        }
                        (Purpose::Frontier, Direction::Children) => {
                            found_children.insert(child.clone());
                        }
                        (Purpose::Cousin, _) => {
                            if self.parents.contains(parent) {
                                found_cousins.insert(child.clone());
                            } else if self.children.contains(child) {
                                found_cousins.insert(parent.clone());
                            } else {
                                found_cousins.insert(parent.clone());
                                found_cousins.insert(child.clone());
                            }
                        }
                    }
                }
                self.record(identity, event);
            }
        }

        found_parents.remove(&self.focus);
        found_children.remove(&self.focus);
        self.new_parents = found_parents.difference(&self.parents).cloned().collect();
        self.new_children = found_children.difference(&self.children).cloned().collect();
        self.parents.extend(self.new_parents.iter().cloned());
        self.children.extend(self.new_children.iter().cloned());

        self.cousins.extend(found_cousins);
        self.cousins.remove(&self.focus);
        let parents = &self.parents;
        let children = &self.children;
        self.cousins
            .retain(|h| !parents.contains(h) && !children.contains(h));

        self.round += 1;
    }

    /// Keep the preferred event per link identity.
    fn record(&mut self, identity: LinkIdentity, event: &Event) {
        let keep_existing = self
            .links
            .get(&identity.id)
            .is_some_and(|existing| !selection::prefers(event, &existing.event, SortOrder::Link));
        if !keep_existing {
            self.links.insert(
                identity.id,
                Candidate {
                    event: event.clone(),
                    kind: identity.kind,
                },
            );
        }
    }

    /// Assemble the final, sorted link list.
    #[must_use]
    pub fn into_links(self) -> Vec<Link> {
        let mut links: Vec<Link> = self
            .links
            .into_iter()
            .map(|(id, candidate)| build_link(id, candidate))
            .collect();
        links.sort_by(|a, b| {
            a.child
                .cmp(&b.child)
                .then_with(|| {
                    b.child_node
                        .file_format
                        .is_some()
                        .cmp(&a.child_node.file_format.is_some())
                })
                .then_with(|| {
                    a.source
                        .as_deref()
                        .unwrap_or("")
                        .cmp(b.source.as_deref().unwrap_or(""))
                })
                .then_with(|| {
                    let pa = a.parent.as_ref().map_or("", EntityHash::as_str);
                    let pb = b.parent.as_ref().map_or("", EntityHash::as_str);
                    pa.cmp(pb)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        links
    }
}

fn build_link(id: String, candidate: Candidate) -> Link {
    let Candidate { event, kind } = candidate;
    let (parent, parent_instance) = match kind {
        LinkKind::Source => (None, None),
        LinkKind::Derivation {
            parent,
            parent_instance,
        } => (Some(parent), Some(parent_instance)),
    };
    let child_node = LinkNode {
        hash: event.hash().clone(),
        action: event.action(),
        timestamp: event.timestamp,
        file_format: event.entity.file_format.clone(),
        size: event.entity.size,
        depth: event.depth(),
        relationship: event
            .parent()
            .map(|p| p.relationship.clone())
            .unwrap_or_default(),
        security: event.security.0.clone(),
        author: event.author.clone(),
    };
    Link {
        id,
        child: child_node.hash.clone(),
        parent,
        parent_instance,
        source: event.source.map(|s| s.name),
        child_node,
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// The traversal engine over one executor.
pub struct Traversal<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
}

impl<'a, E: QueryExecutor + ?Sized> Traversal<'a, E> {
    #[must_use]
    pub const fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    /// The provenance neighborhood of `focus`.
    ///
    /// An entity without events yields an empty link list.
    pub fn nearby(
        &self,
        ctx: &ReadContext,
        focus: &EntityHash,
        options: &NearbyOptions,
    ) -> Result<NeighborhoodResult, MetaError> {
        self.nearby_with_stats(ctx, focus, options)
            .map(|(result, _)| result)
    }

    /// Like [`Self::nearby`], also reporting rounds and queries issued.
    pub fn nearby_with_stats(
        &self,
        ctx: &ReadContext,
        focus: &EntityHash,
        options: &NearbyOptions,
    ) -> Result<(NeighborhoodResult, TraversalStats), MetaError> {
        let mut state = RoundState::new(focus.clone());
        let mut stats = TraversalStats::default();

        while state.round() < MAX_TRAVERSAL_ROUNDS {
            ctx.check()?;
            let planned = state.plan(options);
            if planned.is_empty() {
                break;
            }
            let cap = state.cap();
            let requests: Vec<QueryRequest> = planned
                .iter()
                .map(|q| q.request(cap, &ctx.visibility))
                .collect();

            let responses = self.executor.execute_batch(&requests)?;
            if responses.len() != requests.len() {
                return Err(MetaError::Executor(format!(
                    "expected {} responses, got {}",
                    requests.len(),
                    responses.len()
                )));
            }
            stats.rounds += 1;
            stats.queries += requests.len();
            state.absorb(&planned, &responses);
        }

        tracing::debug!(
            focus = %focus,
            rounds = stats.rounds,
            queries = stats.queries,
            links = state.link_count(),
            cousins = state.cousins().len(),
            "neighborhood expanded"
        );

        Ok((
            NeighborhoodResult {
                focus: focus.clone(),
                links: state.into_links(),
            },
            stats,
        ))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{Derivation, EventId, ParentRef, Submission};

    fn parent_ref(hash: &str) -> ParentRef {
        ParentRef {
            hash: EntityHash::new(hash),
            author: Author::new("plugin", "unpack"),
            action: Action::Extracted,
            timestamp: Timestamp(0),
            relationship: BTreeMap::from([("action".to_string(), "extracted".to_string())]),
        }
    }

    fn submission(depth: u32) -> Submission {
        Submission {
            name: "s1".into(),
            timestamp: Timestamp(0),
            references: BTreeMap::new(),
            settings: BTreeMap::new(),
            depth,
        }
    }

    fn sourced(id: &str, hash: &str) -> Event {
        let mut e = Event::new(
            hash,
            Author::new("loader", "upload"),
            Timestamp(1),
            Derivation::Sourced,
        )
        .with_source(submission(0))
        .with_size_and_format(100, "archive/zip");
        e.id = EventId(id.into());
        e
    }

    fn extracted(id: &str, hash: &str, parent: &str) -> Event {
        let mut e = Event::new(
            hash,
            Author::new("plugin", "unpack"),
            Timestamp(2),
            Derivation::Extracted(parent_ref(parent)),
        )
        .with_source(submission(1));
        e.id = EventId(id.into());
        e
    }

    fn chain() -> MemoryStore {
        MemoryStore::from_events([
            sourced("1", "e1"),
            extracted("2", "e10", "e1"),
            extracted("3", "e100", "e10"),
        ])
    }

    fn nearby(
        store: &MemoryStore,
        focus: &str,
        options: NearbyOptions,
    ) -> (NeighborhoodResult, TraversalStats) {
        Traversal::new(store)
            .nearby_with_stats(&ReadContext::default(), &EntityHash::new(focus), &options)
            .expect("nearby")
    }

    #[test]
    fn link_identities_for_sourced_and_extracted() {
        let ids = link_identities(&sourced("1", "e1"));
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].id, "e1.loader.upload.sourced.s1");
        assert_eq!(ids[0].kind, LinkKind::Source);

        let ids = link_identities(&extracted("2", "e10", "e1"));
        assert_eq!(ids[0].id, "e10.plugin.unpack.extracted.e1.plugin.unpack.extracted");
    }

    #[test]
    fn self_referential_event_has_no_derivation_link() {
        let e = extracted("9", "e1", "E1");
        assert!(link_identities(&e).is_empty());
    }

    #[test]
    fn chain_neighborhood() {
        for include_cousins in [false, true] {
            let options = NearbyOptions {
                include_cousins,
                ..NearbyOptions::default()
            };
            let (result, stats) = nearby(&chain(), "E10", options);
            assert_eq!(result.focus.as_str(), "e10");
            let derivations: Vec<(&str, &str)> = result
                .links
                .iter()
                .filter_map(|l| l.parent.as_ref().map(|p| (l.child.as_str(), p.as_str())))
                .collect();
            assert_eq!(derivations, vec![("e10", "e1"), ("e100", "e10")]);
            let sources = result.links.iter().filter(|l| l.parent.is_none()).count();
            assert_eq!(sources, 1);
            assert!(stats.rounds <= MAX_TRAVERSAL_ROUNDS);
        }
    }

    #[test]
    fn siblings_are_cousins_only_when_requested() {
        let store = MemoryStore::from_events([
            sourced("1", "e1"),
            extracted("2", "e10", "e1"),
            extracted("3", "e11", "e1"),
        ]);
        let (plain, _) = nearby(&store, "e10", NearbyOptions::default());
        assert!(plain.links.iter().all(|l| l.child.as_str() != "e11"));

        let with_cousins = NearbyOptions {
            include_cousins: true,
            ..NearbyOptions::default()
        };
        let (result, _) = nearby(&store, "e10", with_cousins);
        assert!(result.links.iter().any(|l| l.child.as_str() == "e11"));
    }

    #[test]
    fn round_state_classifies_sibling_as_cousin() {
        let store = MemoryStore::from_events([
            sourced("1", "e1"),
            extracted("2", "e10", "e1"),
            extracted("3", "e11", "e1"),
        ]);
        let options = NearbyOptions {
            include_cousins: true,
            ..NearbyOptions::default()
        };
        let mut state = RoundState::new(EntityHash::new("e10"));
        for _ in 0..3 {
            let planned = state.plan(&options);
            let requests: Vec<QueryRequest> = planned
                .iter()
                .map(|q| q.request(state.cap(), &Visibility::unrestricted()))
                .collect();
            let responses = store.execute_batch(&requests).expect("batch");
            state.absorb(&planned, &responses);
        }
        assert!(state.parents().contains(&EntityHash::new("e1")));
        assert!(state.cousins().contains(&EntityHash::new("e11")));
        assert!(state.cousins().is_disjoint(state.parents()));
        assert!(!state.cousins().contains(&EntityHash::new("e10")));
    }

    #[test]
    fn planning_never_repeats_a_query() {
        let mut state = RoundState::new(EntityHash::new("e1"));
        let options = NearbyOptions::default();
        assert_eq!(state.plan(&options).len(), 2);
        state.absorb(&[], &[]);
        assert!(state.plan(&options).is_empty());
    }

    /// e1 with children e10..e13.
    fn siblings() -> MemoryStore {
        MemoryStore::from_events([
            sourced("1", "e1"),
            extracted("2", "e10", "e1"),
            extracted("3", "e11", "e1"),
            extracted("4", "e12", "e1"),
            extracted("5", "e13", "e1"),
        ])
    }

    /// Run one round by hand, returning what was planned.
    fn step(
        state: &mut RoundState,
        store: &MemoryStore,
        options: &NearbyOptions,
    ) -> Vec<PlannedQuery> {
        let planned = state.plan(options);
        let requests: Vec<QueryRequest> = planned
            .iter()
            .map(|q| q.request(state.cap(), &Visibility::unrestricted()))
            .collect();
        let responses = store.execute_batch(&requests).expect("batch");
        state.absorb(&planned, &responses);
        planned
    }

    fn cousin_queries(planned: &[PlannedQuery]) -> usize {
        planned.iter().filter(|q| q.purpose == Purpose::Cousin).count()
    }

    #[test]
    fn cousin_budget_stops_cousin_queries() {
        let store = siblings();
        let run = |max_cousins: usize| {
            let options = NearbyOptions {
                include_cousins: true,
                max_cousins,
                max_cousin_distance: 5,
            };
            let mut state = RoundState::new(EntityHash::new("e10"));
            step(&mut state, &store, &options);
            assert!(cousin_queries(&step(&mut state, &store, &options)) > 0);
            assert_eq!(state.cousins().len(), 3);
            let third = step(&mut state, &store, &options);
            (state.cousins().len(), cousin_queries(&third))
        };

        let (_, unbounded) = run(20);
        assert!(unbounded > 0);
        let (known, bounded) = run(3);
        assert!(known >= 3);
        assert_eq!(bounded, 0);
    }

    #[test]
    fn cousin_distance_stops_cousin_queries() {
        let store = siblings();
        let options = NearbyOptions {
            include_cousins: true,
            max_cousins: 20,
            max_cousin_distance: 1,
        };
        let mut state = RoundState::new(EntityHash::new("e10"));
        step(&mut state, &store, &options);
        assert!(cousin_queries(&step(&mut state, &store, &options)) > 0);
        assert_eq!(state.round(), 2);
        assert_eq!(cousin_queries(&step(&mut state, &store, &options)), 0);

        let none = NearbyOptions {
            max_cousin_distance: 0,
            ..options
        };
        let mut state = RoundState::new(EntityHash::new("e10"));
        step(&mut state, &store, &none);
        assert_eq!(cousin_queries(&step(&mut state, &store, &none)), 0);
        assert!(state.cousins().is_empty());
    }

    #[test]
    fn fanout_shrinks_as_links_accumulate() {
        // root -> 30 c -> 8 g each -> 3 h each
        let mut events = vec![sourced("root", "root")];
        for c in 0..30 {
            let ch = format!("c{:02}", c);
            events.push(extracted(&ch, &ch, "root"));
            for g in 0..8 {
                let gh = format!("{}g{}", ch, g);
                events.push(extracted(&gh, &gh, &ch));
                for h in 0..3 {
                    let hh = format!("{}h{}", gh, h);
                    events.push(extracted(&hh, &hh, &gh));
                }
            }
        }
        let store = MemoryStore::from_events(events);
        let options = NearbyOptions::default();
        let mut state = RoundState::new(EntityHash::new("root"));

        let mut caps = Vec::new();
        let mut counts = Vec::new();
        while state.round() < MAX_TRAVERSAL_ROUNDS {
            let cap = state.cap();
            if step(&mut state, &store, &options).is_empty() {
                break;
            }
            caps.push(cap);
            counts.push(state.link_count());
        }

        assert_eq!(caps, vec![30, 30, 2, 1]);
        // 1 source link + 30 + 240, then 2 of the 3 h under each g.
        assert_eq!(counts, vec![31, 271, 751, 751]);
        assert_eq!(state.cap(), 1);
    }

    #[test]
    fn fanout_caps_first_round() {
        let mut events = vec![sourced("root", "e1")];
        for i in 0..50 {
            events.push(extracted(&format!("c{:02}", i), &format!("child{:02}", i), "e1"));
        }
        let store = MemoryStore::from_events(events);
        let (result, _) = nearby(&store, "e1", NearbyOptions::default());
        let children = result.links.iter().filter(|l| l.parent.is_some()).count();
        assert_eq!(children, 30);
    }

    #[test]
    fn empty_entity_has_no_links() {
        let (result, stats) = nearby(&MemoryStore::new(), "nothing", NearbyOptions::default());
        assert!(result.links.is_empty());
        assert_eq!(stats.rounds, 1);
    }

    #[test]
    fn richer_event_represents_link() {
        let placeholder = {
            let mut e = Event::new(
                "e10",
                Author::new("plugin", "unpack"),
                Timestamp(9),
                Derivation::Extracted(parent_ref("e1")),
            );
            e.id = EventId("z".into());
            e
        };
        let rich = extracted("a", "e10", "e1").with_size_and_format(5, "text/plain");
        let store = MemoryStore::from_events([sourced("1", "e1"), placeholder, rich]);
        let (result, _) = nearby(&store, "e1", NearbyOptions::default());
        let link = result
            .links
            .iter()
            .find(|l| l.child.as_str() == "e10")
            .expect("link to e10");
        assert_eq!(link.child_node.size, Some(5));
    }

    #[test]
    fn expired_deadline_aborts_before_first_round() {
        let ctx = ReadContext::default()
            .with_deadline(crate::query::Deadline::after(std::time::Duration::ZERO));
        let result = Traversal::new(&chain()).nearby(
            &ctx,
            &EntityHash::new("e10"),
            &NearbyOptions::default(),
        );
        assert!(matches!(result, Err(MetaError::DeadlineExceeded)));
    }
}
