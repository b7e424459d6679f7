//! # Scenario Tier Tests (T0-T4)
//!
//! End-to-end scenarios over the public API. If ANY tier fails, summaries
//! or neighborhoods are not trustworthy.
//!
//! ## Tiers
//! - T0: Ingestion integrity
//! - T1: Entity summary scenarios
//! - T2: Provenance neighborhood scenarios
//! - T3: Unknown entities
//! - T4: Backend equivalence (memory vs redb)

use binmeta_core::{
    Action, Author, Derivation, EntityHash, Event, FeatureValue, MetaError, NearbyOptions,
    ParentRef, RawEvent, Requester, Section, Session, StreamDescriptor, Submission, SummaryOptions,
    Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};

fn ts(s: &str) -> Timestamp {
    s.parse().expect("timestamp")
}

fn submission(depth: u32) -> Submission {
    Submission {
        name: "s1".into(),
        timestamp: ts("2021-01-01T12:00:00Z"),
        references: BTreeMap::new(),
        settings: BTreeMap::new(),
        depth,
    }
}

fn parent_ref(hash: &str, action: Action) -> ParentRef {
    ParentRef {
        hash: EntityHash::new(hash),
        author: Author::new("plugin", "unpacker"),
        action,
        timestamp: ts("2021-01-01T12:00:00Z"),
        relationship: BTreeMap::from([("label".to_string(), "within".to_string())]),
    }
}

/// e1 (sourced) -> e10 (extracted) -> e100 (extracted).
fn chain() -> Session {
    let mut session = Session::new();
    session
        .ingest_batch(vec![
            Event::new(
                "e1",
                Author::new("loader", "upload"),
                ts("2021-01-01T12:00:00Z"),
                Derivation::Sourced,
            )
            .with_source(submission(0)),
            Event::new(
                "e10",
                Author::new("plugin", "unpacker"),
                ts("2021-01-01T12:01:00Z"),
                Derivation::Extracted(parent_ref("e1", Action::Sourced)),
            )
            .with_source(submission(1)),
            Event::new(
                "e100",
                Author::new("plugin", "unpacker"),
                ts("2021-01-01T12:02:00Z"),
                Derivation::Extracted(parent_ref("e10", Action::Extracted)),
            )
            .with_source(submission(2)),
        ])
        .expect("ingest");
    session
}

// =============================================================================
// TIER T0: INGESTION INTEGRITY
// =============================================================================

mod t0_ingestion {
    use super::*;

    /// T0.1: Raw wire events convert and ingest.
    #[test]
    fn raw_event_ingested() {
        let raw: RawEvent = serde_json::from_value(serde_json::json!({
            "entity": {"hash": "ABC"},
            "author": {"category": "plugin", "name": "entropy"},
            "action": "enriched",
            "timestamp": "2021-01-01T12:00:00Z",
            "features": [{"name": "entropy", "type": "integer", "value": "7"}],
            "info": {"bands": [1, 2]},
            "parent": {
                "hash": "ABC",
                "author": {"category": "loader", "name": "upload"},
                "action": "sourced",
                "timestamp": "2021-01-01T11:00:00Z"
            }
        }))
        .expect("raw");
        let event = Event::try_from(raw).expect("convert");
        assert_eq!(event.action(), Action::Enriched);

        let mut session = Session::new();
        assert!(session.ingest(event).expect("ingest"));
        assert_eq!(session.entity_count().expect("count"), 1);
    }

    /// T0.2: An extracted event without a parent is rejected.
    #[test]
    fn extracted_without_parent_rejected() {
        let raw: RawEvent = serde_json::from_value(serde_json::json!({
            "entity": {"hash": "abc"},
            "author": {"category": "plugin", "name": "unzip"},
            "action": "extracted",
            "timestamp": "2021-01-01T12:00:00Z"
        }))
        .expect("raw");
        assert!(matches!(Event::try_from(raw), Err(MetaError::InvalidEvent(_))));
    }

    /// T0.3: One bad event rejects the whole batch.
    #[test]
    fn invalid_batch_is_atomic() {
        let mut session = Session::new();
        let good = Event::new("e1", Author::new("a", "b"), Timestamp(1), Derivation::Sourced);
        let bad = Event::new("  ", Author::new("a", "b"), Timestamp(1), Derivation::Sourced);
        assert!(matches!(
            session.ingest_batch(vec![good, bad]),
            Err(MetaError::InvalidHash)
        ));
        assert_eq!(session.event_count().expect("count"), 0);
    }
}

// =============================================================================
// TIER T1: ENTITY SUMMARY
// =============================================================================

mod t1_summary {
    use super::*;

    /// T1.1: A single sourced event yields count 1 and its timestamp.
    #[test]
    fn single_event_documents() {
        let session = chain();
        let summary = session
            .summarize(
                &Requester::anonymous(),
                &EntityHash::new("e1"),
                &SummaryOptions::only([Section::Documents]),
            )
            .expect("summary");
        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(
            json["documents"],
            serde_json::json!({"count": 1, "newest": "2021-01-01T12:00:00.000Z"})
        );
    }

    /// T1.2: Letter case of the hash does not matter.
    #[test]
    fn hash_lookup_is_case_insensitive() {
        let session = chain();
        let requester = Requester::anonymous();
        let options = SummaryOptions::default();
        let lower = session
            .summarize(&requester, &EntityHash::new("e10"), &options)
            .expect("summary");
        let upper = session
            .summarize(&requester, &EntityHash::new("E10"), &options)
            .expect("summary");
        assert_eq!(lower, upper);
    }

    /// T1.3: One (f1, v1) record listing both contributing instances.
    #[test]
    fn features_merge_across_instances() {
        let mut session = Session::new();
        for (plugin, ts_ms) in [("beta", 2), ("alpha", 1)] {
            session
                .ingest(
                    Event::new(
                        "e1",
                        Author::new("plugin", plugin),
                        Timestamp(ts_ms),
                        Derivation::Enriched(parent_ref("e1", Action::Sourced)),
                    )
                    .with_features(vec![FeatureValue::new("f1", "v1")]),
                )
                .expect("ingest");
        }
        let features = session
            .summarize(
                &Requester::anonymous(),
                &EntityHash::new("e1"),
                &SummaryOptions::only([Section::Features]),
            )
            .expect("summary")
            .features
            .expect("features");
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].instances,
            vec!["plugin.alpha.enriched", "plugin.beta.enriched"]
        );
    }

    /// T1.4: Only the newest event of an instance contributes.
    #[test]
    fn newest_event_supersedes_instance() {
        let mut session = Session::new();
        for (ts_ms, value) in [(1, "old"), (2, "new")] {
            session
                .ingest(
                    Event::new(
                        "e1",
                        Author::new("plugin", "strings"),
                        Timestamp(ts_ms),
                        Derivation::Enriched(parent_ref("e1", Action::Sourced)),
                    )
                    .with_features(vec![FeatureValue::new("s", value)]),
                )
                .expect("ingest");
        }
        let summary = session
            .summarize(
                &Requester::anonymous(),
                &EntityHash::new("e1"),
                &SummaryOptions::only([Section::Features, Section::Instances]),
            )
            .expect("summary");
        let features = summary.features.expect("features");
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].value, "new");
        let instances = summary.instances.expect("instances");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].timestamp, Timestamp(2));
    }

    /// T1.4b: An empty newest event still supersedes older content.
    #[test]
    fn empty_newest_event_clears_instance_content() {
        let mut session = Session::new();
        let mut old = Event::new(
            "e1",
            Author::new("plugin", "strings"),
            Timestamp(1),
            Derivation::Sourced,
        )
        .with_features(vec![FeatureValue::new("s", "old")])
        .with_streams(vec![StreamDescriptor {
            hash: EntityHash::new("c1"),
            labels: BTreeSet::from(["content".to_string()]),
            size: 2048,
            file_format: None,
            mime: None,
        }]);
        old.info = Some(r#"{"k":1}"#.to_string());
        let empty = Event::new(
            "e1",
            Author::new("plugin", "strings"),
            Timestamp(2),
            Derivation::Sourced,
        );
        session.ingest_batch(vec![old, empty]).expect("ingest");

        let summary = session
            .summarize(
                &Requester::anonymous(),
                &EntityHash::new("e1"),
                &SummaryOptions::only([
                    Section::Features,
                    Section::Info,
                    Section::Datastreams,
                    Section::Instances,
                ]),
            )
            .expect("summary");
        assert_eq!(summary.features, Some(Vec::new()));
        assert_eq!(summary.info, Some(Vec::new()));
        assert_eq!(summary.datastreams, Some(Vec::new()));
        let instances = summary.instances.expect("instances");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].timestamp, Timestamp(2));
        assert_eq!(instances[0].num_feature_values, 0);
        assert!(
            summary
                .diagnostics
                .iter()
                .any(|d| d.id == "content_not_found")
        );
    }

    /// T1.5: Parents and children of the middle of a chain.
    #[test]
    fn parents_and_children() {
        let session = chain();
        let summary = session
            .summarize(
                &Requester::anonymous(),
                &EntityHash::new("e10"),
                &SummaryOptions::only([Section::Parents, Section::Children, Section::Sources]),
            )
            .expect("summary");
        let parents = summary.parents.expect("parents");
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].entity.hash, EntityHash::new("e1"));
        assert_eq!(parents[0].relationship.get("label").map(String::as_str), Some("within"));

        let children = summary.children.expect("children");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].entity.hash, EntityHash::new("e100"));

        let sources = summary.sources.expect("sources");
        assert_eq!(sources[0].name, "s1");
        assert!(sources[0].direct.is_empty());
        assert_eq!(sources[0].indirect.len(), 1);
    }
}

// =============================================================================
// TIER T2: PROVENANCE NEIGHBORHOOD
// =============================================================================

mod t2_nearby {
    use super::*;

    fn nearby(
        session: &Session,
        hash: &str,
        include_cousins: bool,
    ) -> binmeta_core::NeighborhoodResult {
        session
            .nearby(
                &Requester::anonymous(),
                &EntityHash::new(hash),
                &NearbyOptions {
                    include_cousins,
                    ..NearbyOptions::default()
                },
            )
            .expect("nearby")
    }

    /// T2.1: Two derivation links and one source link around e10.
    #[test]
    fn chain_neighborhood() {
        let session = chain();
        for include_cousins in [false, true] {
            let result = nearby(&session, "e10", include_cousins);
            let derivations: Vec<_> = result.links.iter().filter(|l| l.parent.is_some()).collect();
            let sources: Vec<_> = result.links.iter().filter(|l| l.parent.is_none()).collect();
            assert_eq!(derivations.len(), 2);
            assert_eq!(sources.len(), 1);
            assert_eq!(sources[0].child, EntityHash::new("e1"));
        }
    }

    /// T2.2: Links are sorted by child hash.
    #[test]
    fn links_sorted_by_child() {
        let session = chain();
        let result = nearby(&session, "e10", false);
        let children: Vec<&str> = result.links.iter().map(|l| l.child.as_str()).collect();
        let mut sorted = children.clone();
        sorted.sort_unstable();
        assert_eq!(children, sorted);
    }

    /// T2.3: Self-referential events never become links.
    #[test]
    fn self_reference_dropped() {
        let mut session = chain();
        session
            .ingest(Event::new(
                "e10",
                Author::new("plugin", "broken"),
                Timestamp(5),
                Derivation::Extracted(parent_ref("e10", Action::Extracted)),
            ))
            .expect("ingest");
        let result = nearby(&session, "e10", true);
        assert!(result
            .links
            .iter()
            .all(|l| l.parent.as_ref() != Some(&l.child)));
    }
}

// =============================================================================
// TIER T3: UNKNOWN ENTITIES
// =============================================================================

mod t3_unknown {
    use super::*;

    /// T3.1: No events means empty results, never an error.
    #[test]
    fn unknown_entity_is_empty() {
        let session = chain();
        let hash = EntityHash::new("ffff");
        let summary = session
            .summarize(&Requester::anonymous(), &hash, &SummaryOptions::default())
            .expect("summary");
        assert_eq!(summary.documents.map(|d| d.count), Some(0));
        assert_eq!(summary.sources, Some(Vec::new()));
        assert_eq!(summary.parents, Some(Vec::new()));
        assert!(summary.diagnostics.is_empty());

        let result = session
            .nearby(&Requester::anonymous(), &hash, &NearbyOptions::default())
            .expect("nearby");
        assert_eq!(result.focus, hash);
        assert!(result.links.is_empty());
    }
}

// =============================================================================
// TIER T4: BACKEND EQUIVALENCE
// =============================================================================

mod t4_backends {
    use super::*;

    /// T4.1: The redb log answers exactly like the in-memory store.
    #[test]
    fn redb_matches_memory() {
        let memory = chain();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut persistent = Session::with_redb(dir.path().join("log.redb")).expect("open");
        persistent
            .import_bytes(&memory.export_bytes().expect("export"))
            .expect("import");

        let requester = Requester::anonymous();
        for hash in ["e1", "e10", "e100"] {
            let hash = EntityHash::new(hash);
            assert_eq!(
                memory
                    .summarize(&requester, &hash, &SummaryOptions::default())
                    .expect("summary"),
                persistent
                    .summarize(&requester, &hash, &SummaryOptions::default())
                    .expect("summary")
            );
            let options = NearbyOptions {
                include_cousins: true,
                ..NearbyOptions::default()
            };
            assert_eq!(
                memory.nearby(&requester, &hash, &options).expect("nearby"),
                persistent.nearby(&requester, &hash, &options).expect("nearby")
            );
        }
    }
}
