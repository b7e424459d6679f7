//! The entity summary reducer.
//!
//! One summary costs at most two executor round trips:
//!
//! 1. A single batch with a document count plus one grouped query per
//!    requested section, all scoped to the entity (and the author filter).
//! 2. If parents were found, one batch asking for each parent's own
//!    representative event, which supplies the parent's descriptive fields.
//!
//! The caller's deadline is checked before each round.

use super::diagnostics::{self, Diagnostic};
use super::{
    DatastreamSummary, DocumentsSummary, InfoEntry, InstanceSummary, RelativeNode, Section,
    SourceSummary, SubmissionVariant, Summary, SummaryOptions, merge_features,
};
use crate::collaborators::{Annotations, PluginRegistry};
use crate::config::CoreConfig;
use crate::query::{
    Aggregation, BucketOrder, Field, Filter, Predicate, QueryExecutor, QueryRequest,
    QueryResponse, ReadContext,
};
use crate::selection::SortOrder;
use crate::{EntityDescriptor, EntityHash, Event, MetaError};
use std::collections::{BTreeMap, BTreeSet};

/// Sections that are answered by a grouped query of their own.
const GROUPED: [Section; 8] = [
    Section::Security,
    Section::Sources,
    Section::Features,
    Section::Info,
    Section::Datastreams,
    Section::Instances,
    Section::Parents,
    Section::Children,
];

/// Reduces one entity's event history into a [`Summary`].
pub struct Reducer<'a, E: QueryExecutor + ?Sized> {
    executor: &'a E,
    annotations: &'a dyn Annotations,
    plugins: &'a dyn PluginRegistry,
    config: &'a CoreConfig,
}

impl<'a, E: QueryExecutor + ?Sized> Reducer<'a, E> {
    #[must_use]
    pub fn new(
        executor: &'a E,
        annotations: &'a dyn Annotations,
        plugins: &'a dyn PluginRegistry,
        config: &'a CoreConfig,
    ) -> Self {
        Self {
            executor,
            annotations,
            plugins,
            config,
        }
    }

    /// Summarize `hash`.
    ///
    /// An entity without visible events yields empty sections and no
    /// diagnostics. Only executor and collaborator failures are errors.
    pub fn summarize(
        &self,
        ctx: &ReadContext,
        hash: &EntityHash,
        options: &SummaryOptions,
    ) -> Result<Summary, MetaError> {
        ctx.check()?;

        let sections: Vec<Section> = GROUPED
            .into_iter()
            .filter(|s| options.wants(*s))
            .collect();
        let count_limit = (!options.wants(Section::TotalHits))
            .then_some(self.config.approximate_count_limit);

        let mut requests = vec![
            QueryRequest::new(self.scoped(ctx, hash, options, None)).with_count_limit(count_limit),
        ];
        requests.extend(sections.iter().map(|s| self.section_request(ctx, hash, options, *s)));

        let mut responses = self.executor.execute_batch(&requests)?;
        if responses.len() != requests.len() {
            return Err(MetaError::Executor(format!(
                "expected {} responses, got {}",
                requests.len(),
                responses.len()
            )));
        }
        let by_section: BTreeMap<Section, QueryResponse> =
            sections.iter().copied().zip(responses.split_off(1)).collect();
        let documents = responses.pop().unwrap_or_default();
        let found = documents.total.value > 0;

        tracing::debug!(
            entity = %hash,
            events = documents.total.value,
            sections = sections.len(),
            "summary round complete"
        );

        let mut summary = Summary::default();
        let mut diags: Vec<Diagnostic> = Vec::new();

        if options.wants(Section::Documents) {
            summary.documents = Some(DocumentsSummary {
                count: documents.total.value,
                newest: documents.newest,
                approximate: !documents.total.exact,
            });
        }

        let limit = self.config.bucket_limit;
        for (section, response) in &by_section {
            if response.buckets.len() >= limit {
                diags.push(diagnostics::truncated(*section, limit));
            }
        }

        if let Some(r) = by_section.get(&Section::Security) {
            let mut labels: Vec<String> = r.buckets.iter().map(|b| b.key.clone()).collect();
            labels.sort_by(|a, b| self.config.security.compare(a, b));
            summary.security = Some(labels);
        }
        if let Some(r) = by_section.get(&Section::Sources) {
            summary.sources = Some(self.sources(r, &mut diags));
        }
        if let Some(r) = by_section.get(&Section::Features) {
            let contributions: Vec<(&str, &[crate::FeatureValue])> = r
                .buckets
                .iter()
                .filter_map(|b| b.top().map(|e| (b.key.as_str(), e.features.as_slice())))
                .filter(|(_, features)| !features.is_empty())
                .collect();
            let mut merged = merge_features(contributions);
            if found && options.wants(Section::FeatureTags) {
                for feature in &mut merged {
                    feature.tags = self.annotations.feature_tags(&feature.name, &feature.value)?;
                }
            }
            summary.features = Some(merged);
        }
        if let Some(r) = by_section.get(&Section::Info) {
            summary.info = Some(
                r.buckets
                    .iter()
                    .filter_map(|b| {
                        let event = b.top()?;
                        let raw = event.info.as_deref()?;
                        Some(InfoEntry {
                            instance: b.key.clone(),
                            info: serde_json::from_str(raw)
                                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
                        })
                    })
                    .collect(),
            );
        }
        if let Some(r) = by_section.get(&Section::Datastreams) {
            summary.datastreams = Some(datastreams(r));
        }
        if let Some(r) = by_section.get(&Section::Instances) {
            summary.instances = Some(
                r.buckets
                    .iter()
                    .filter_map(|b| {
                        let event = b.top()?;
                        Some(InstanceSummary {
                            key: b.key.clone(),
                            author: event.author.clone(),
                            action: event.action(),
                            timestamp: event.timestamp,
                            num_feature_values: event.features.len(),
                        })
                    })
                    .collect(),
            );
        }
        if let Some(r) = by_section.get(&Section::Parents) {
            summary.parents = Some(self.parents(ctx, r)?);
        }
        if let Some(r) = by_section.get(&Section::Children) {
            let mut children: Vec<RelativeNode> = r
                .buckets
                .iter()
                .filter_map(|b| b.top())
                .filter_map(|child| relative(child.entity.clone(), child))
                .collect();
            sort_relatives(&mut children);
            summary.children = Some(children);
        }
        if options.wants(Section::Tags) {
            summary.tags = Some(if found {
                self.annotations.entity_tags(hash)?
            } else {
                Vec::new()
            });
        }

        if !found {
            return Ok(summary);
        }

        diags.extend(diagnostics::many_events(
            documents.total.value,
            documents.total.exact,
            self.config.many_events_threshold,
        ));
        if let Some(streams) = &summary.datastreams {
            match self.plugins.latest_configs() {
                Ok(plugins) => diags.extend(diagnostics::content_size(streams, &plugins)),
                Err(e) => {
                    tracing::warn!(entity = %hash, error = %e, "plugin registry unavailable");
                }
            }
        }
        diags.sort_by(|a, b| a.id.cmp(&b.id));
        summary.diagnostics = diags;
        Ok(summary)
    }

    // =========================================================================
    // QUERY CONSTRUCTION
    // =========================================================================

    /// The entity's events, narrowed by the author filter, `extra` and the
    /// caller's visibility.
    fn scoped(
        &self,
        ctx: &ReadContext,
        hash: &EntityHash,
        options: &SummaryOptions,
        extra: Option<Predicate>,
    ) -> Filter {
        let mut filter = Filter::entity(hash);
        if let Some(author) = &options.author {
            filter = filter.and(Predicate::eq(Field::AuthorName, author.as_str()));
        }
        if let Some(p) = extra {
            filter = filter.and(p);
        }
        ctx.visibility.apply(filter)
    }

    fn section_request(
        &self,
        ctx: &ReadContext,
        hash: &EntityHash,
        options: &SummaryOptions,
        section: Section,
    ) -> QueryRequest {
        let limit = self.config.bucket_limit;
        let per_instance = || {
            QueryRequest::new(self.scoped(ctx, hash, options, None)).aggregate(
                Aggregation::terms(Field::InstanceKey, limit, BucketOrder::KeyAsc)
                    .with_top_hits(SortOrder::Newest, 1),
            )
        };

        match section {
            Section::Security => QueryRequest::new(self.scoped(ctx, hash, options, None))
                .aggregate(Aggregation::terms(Field::Security, limit, BucketOrder::KeyAsc)),
            Section::Sources => QueryRequest::new(self.scoped(
                ctx,
                hash,
                options,
                Some(Predicate::Exists(Field::SourceName)),
            ))
            .aggregate(
                Aggregation::terms(Field::SourceName, limit, BucketOrder::KeyAsc).with_sub(
                    Aggregation::terms(
                        Field::SubmissionKey,
                        self.config.source_variant_limit,
                        BucketOrder::NewestDesc,
                    )
                    .with_top_hits(SortOrder::SubmissionVariant, 1),
                ),
            ),
            Section::Parents => {
                let mut filter = self.scoped(
                    ctx,
                    hash,
                    options,
                    Some(Predicate::Exists(Field::ParentHash)),
                );
                filter = filter.and(Predicate::eq(Field::ParentHash, hash.as_str()).negate());
                QueryRequest::new(filter).aggregate(
                    Aggregation::terms(Field::ParentHash, limit, BucketOrder::NewestDesc)
                        .with_top_hits(SortOrder::Newest, 1),
                )
            }
            Section::Children => {
                // Children are other entities' events; the author filter
                // applies to this entity's instances only.
                let filter = Filter::new()
                    .and(Predicate::eq(Field::ParentHash, hash.as_str()))
                    .and(Predicate::eq(Field::EntityHash, hash.as_str()).negate());
                QueryRequest::new(ctx.visibility.apply(filter)).aggregate(
                    Aggregation::terms(Field::EntityHash, limit, BucketOrder::NewestDesc)
                        .with_top_hits(SortOrder::Newest, 1),
                )
            }
            // Newest event per instance, even when it carries nothing for
            // the section; empty ones are dropped during reduction.
            _ => per_instance(),
        }
    }

    // =========================================================================
    // SECTION REDUCTION
    // =========================================================================

    fn sources(&self, response: &QueryResponse, diags: &mut Vec<Diagnostic>) -> Vec<SourceSummary> {
        let variant_limit = self.config.source_variant_limit;
        let mut truncated = false;
        response
            .buckets
            .iter()
            .map(|bucket| {
                if bucket.buckets.len() >= variant_limit && !truncated {
                    truncated = true;
                    diags.push(diagnostics::truncated_variants(&bucket.key, variant_limit));
                }
                let (mut direct, mut indirect): (Vec<_>, Vec<_>) = bucket
                    .buckets
                    .iter()
                    .filter_map(|variant| {
                        let event = variant.top()?;
                        let source = event.source.as_ref()?;
                        Some(SubmissionVariant {
                            key: variant.key.clone(),
                            timestamp: source.timestamp,
                            depth: source.depth,
                            references: source.references.clone(),
                            settings: source.settings.clone(),
                            instance: event.instance_key().to_string(),
                        })
                    })
                    .partition(|v| v.depth == 0);
                for list in [&mut direct, &mut indirect] {
                    list.sort_by(|a, b| {
                        b.timestamp.cmp(&a.timestamp).then_with(|| a.key.cmp(&b.key))
                    });
                }
                SourceSummary {
                    name: bucket.key.clone(),
                    newest: bucket.newest,
                    direct,
                    indirect,
                }
            })
            .collect()
    }

    /// Parent relatives, with each parent described by its own
    /// representative event when one is visible.
    fn parents(
        &self,
        ctx: &ReadContext,
        response: &QueryResponse,
    ) -> Result<Vec<RelativeNode>, MetaError> {
        let links: Vec<&Event> = response.buckets.iter().filter_map(|b| b.top()).collect();
        if links.is_empty() {
            return Ok(Vec::new());
        }

        ctx.check()?;
        let requests: Vec<QueryRequest> = response
            .buckets
            .iter()
            .filter(|b| b.top().is_some())
            .map(|b| {
                QueryRequest::new(ctx.visibility.apply(Filter::entity(&EntityHash::new(&b.key))))
                    .with_hits(SortOrder::Representative, 1)
            })
            .collect();
        let responses = self.executor.execute_batch(&requests)?;
        if responses.len() != requests.len() {
            return Err(MetaError::Executor(format!(
                "expected {} responses, got {}",
                requests.len(),
                responses.len()
            )));
        }

        let mut parents: Vec<RelativeNode> = links
            .into_iter()
            .zip(responses)
            .filter_map(|(child, found)| {
                let parent = child.parent()?;
                let descriptor = found
                    .hits
                    .into_iter()
                    .next()
                    .map(|e| e.entity)
                    .unwrap_or_else(|| EntityDescriptor::new(parent.hash.clone()));
                relative(descriptor, child)
            })
            .collect();
        sort_relatives(&mut parents);
        Ok(parents)
    }
}

/// A relative described by `entity`, linked through `child`'s derivation.
fn relative(entity: EntityDescriptor, child: &Event) -> Option<RelativeNode> {
    let parent = child.parent()?;
    Some(RelativeNode {
        entity,
        action: child.action(),
        author: child.author.clone(),
        timestamp: child.timestamp,
        relationship: parent.relationship.clone(),
    })
}

fn sort_relatives(nodes: &mut [RelativeNode]) {
    nodes.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.entity.hash.cmp(&b.entity.hash))
    });
}

#[derive(Default)]
struct StreamAcc {
    labels: BTreeSet<String>,
    instances: BTreeSet<String>,
    size: u64,
    file_format: Option<String>,
    mime: Option<String>,
}

fn datastreams(response: &QueryResponse) -> Vec<DatastreamSummary> {
    let mut streams: BTreeMap<EntityHash, StreamAcc> = BTreeMap::new();
    for bucket in &response.buckets {
        let Some(event) = bucket.top() else { continue };
        for stream in &event.streams {
            let acc = streams.entry(stream.hash.clone()).or_insert_with(|| StreamAcc {
                size: stream.size,
                file_format: stream.file_format.clone(),
                mime: stream.mime.clone(),
                ..StreamAcc::default()
            });
            acc.labels.extend(stream.labels.iter().cloned());
            acc.instances.insert(bucket.key.clone());
        }
    }

    let mut out: Vec<DatastreamSummary> = streams
        .into_iter()
        .map(|(hash, acc)| DatastreamSummary {
            hash,
            labels: acc.labels.into_iter().collect(),
            size: acc.size,
            file_format: acc.file_format,
            mime: acc.mime,
            instances: acc.instances.into_iter().collect(),
        })
        .collect();
    out.sort_by(|a, b| {
        let first = |s: &DatastreamSummary| s.labels.first().cloned().unwrap_or_default();
        first(a).cmp(&first(b)).then_with(|| a.hash.cmp(&b.hash))
    });
    out
}
