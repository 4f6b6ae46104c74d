//! Document query compiler
//!
//! Lowers a filter plus a projection or an aggregation into a stage list for
//! one collection. Stage order:
//!
//! 1. reparent
//! 2. virtual fields
//! 3. lookups used by the filter and the sort
//! 4. match
//! 5. pagination alone, or sort on current-level columns
//! 6. remaining lookups
//! 7. sort through relations
//! 8. final projection, or group

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::config::CompilerConfig;
use crate::observability::{log_event_with_fields, Event};
use crate::query::{Aggregation, Filter, Projection};
use crate::schema::ModelRegistry;

use super::context::LoweringContext;
use super::errors::{PipelineError, PipelineResult};
use super::filter::filter as match_stages;
use super::group::{group, sort_and_paginate};
use super::lookup::{lookups, LookupScope};
use super::projection::project;
use super::reparent::reparent;
use super::stack::PathStack;
use super::stage::Stage;
use super::virtual_fields::virtual_fields;

pub struct DocumentQueryCompiler<'a> {
    models: &'a ModelRegistry,
    config: CompilerConfig,
    /// Fixed clock; `None` reads the system time on each call
    now: Option<DateTime<Utc>>,
}

impl<'a> DocumentQueryCompiler<'a> {
    pub fn new(models: &'a ModelRegistry, config: CompilerConfig) -> Self {
        Self {
            models,
            config,
            now: None,
        }
    }

    /// Evaluates relative date operators at `now`
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Stages listing the records of `collection`
    pub fn list(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
        timezone: Tz,
    ) -> PipelineResult<Vec<Stage>> {
        self.lower(collection, "list", timezone, |ctx| {
            check_resolved(filter)?;

            let filter_projection = filter_projection(filter);
            let lookup_projection = projection.union([&filter_projection]);
            let filter_relations: BTreeSet<String> =
                filter_projection.relation_names().into_iter().collect();
            let buckets = sort_and_paginate(ctx, filter)?;

            let mut stages = reparent(ctx)?;
            stages.extend(virtual_fields(ctx, &lookup_projection)?);
            stages.extend(lookups(
                ctx,
                &lookup_projection,
                &LookupScope::Only(filter_relations.clone()),
            )?);
            stages.extend(match_stages(ctx, filter.condition_tree.as_ref())?);
            stages.extend(buckets.paginate_only);
            stages.extend(buckets.early);
            stages.extend(lookups(
                ctx,
                &lookup_projection,
                &LookupScope::Except(filter_relations),
            )?);
            stages.extend(buckets.late);
            stages.extend(project(ctx, projection)?);
            Ok(stages)
        })
    }

    /// Stages aggregating the records of `collection`, largest values first.
    ///
    /// The filter's sort and page do not apply to aggregated rows.
    pub fn aggregate(
        &self,
        collection: &str,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
        timezone: Tz,
    ) -> PipelineResult<Vec<Stage>> {
        self.lower(collection, "aggregate", timezone, |ctx| {
            check_resolved(filter)?;

            let tree_projection = filter
                .condition_tree
                .as_ref()
                .map(|tree| tree.projection())
                .unwrap_or_default();
            let lookup_projection = aggregation.projection().union([&tree_projection]);
            let filter_relations: BTreeSet<String> =
                tree_projection.relation_names().into_iter().collect();

            let mut stages = reparent(ctx)?;
            stages.extend(virtual_fields(ctx, &lookup_projection)?);
            stages.extend(lookups(
                ctx,
                &lookup_projection,
                &LookupScope::Only(filter_relations.clone()),
            )?);
            stages.extend(match_stages(ctx, filter.condition_tree.as_ref())?);
            stages.extend(lookups(
                ctx,
                &lookup_projection,
                &LookupScope::Except(filter_relations),
            )?);
            stages.extend(group(ctx, aggregation)?);
            stages.push(Stage::Sort(vec![("value".to_string(), false)]));
            if let Some(limit) = limit {
                stages.push(Stage::Limit(limit));
            }
            Ok(stages)
        })
    }

    fn lower<F>(
        &self,
        collection: &str,
        operation: &str,
        timezone: Tz,
        build: F,
    ) -> PipelineResult<Vec<Stage>>
    where
        F: FnOnce(&LoweringContext<'_>) -> PipelineResult<Vec<Stage>>,
    {
        let result = self.stack(collection).and_then(|stack| {
            let now = self.now.unwrap_or_else(Utc::now);
            let ctx = LoweringContext::new(self.models, &stack, &self.config, timezone, now);
            build(&ctx)
        });

        match &result {
            Ok(stages) => {
                let count = stages.len().to_string();
                log_event_with_fields(
                    Event::PipelineLowered,
                    &[
                        ("collection", collection),
                        ("operation", operation),
                        ("stages", &count),
                    ],
                );
            }
            Err(err) => {
                let message = err.to_string();
                log_event_with_fields(
                    Event::PipelineRejected,
                    &[
                        ("collection", collection),
                        ("error_code", err.code()),
                        ("message", &message),
                        ("operation", operation),
                    ],
                );
            }
        }
        result
    }

    fn stack(&self, collection: &str) -> PipelineResult<PathStack<'a>> {
        let (model, level) = self
            .models
            .resolve_collection(collection)
            .ok_or_else(|| PipelineError::UnknownCollection(collection.to_string()))?;
        PathStack::build(model, level)
    }
}

/// Search and segments are turned into condition trees upstream
fn check_resolved(filter: &Filter) -> PipelineResult<()> {
    if filter.search.is_some() {
        return Err(PipelineError::unsupported(
            "search must be resolved into the condition tree before lowering",
        ));
    }
    if filter.segment.is_some() {
        return Err(PipelineError::unsupported(
            "segments must be resolved into the condition tree before lowering",
        ));
    }
    Ok(())
}

/// Fields read by the condition tree and the sort
fn filter_projection(filter: &Filter) -> Projection {
    let tree = filter
        .condition_tree
        .as_ref()
        .map(|tree| tree.projection())
        .unwrap_or_default();
    let sort = filter
        .sort
        .as_ref()
        .map(|sort| sort.projection())
        .unwrap_or_default();
    tree.union([&sort])
}
