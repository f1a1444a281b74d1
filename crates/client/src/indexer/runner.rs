//! Batch loop shared by every indexer.
//!
//! A run is recorded as an `IndexingRun`: started before the item list is
//! fetched, updated after every batch, then completed or failed. A single
//! item that fails to normalize or save is counted and logged; the batch
//! carries on.

use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;

use metacrawl_core::{IndexingRun, SaveOutcome};

use super::{IndexContext, IndexError, Indexer};
use crate::fetch::{RetryPolicy, retry_with_backoff};

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: IndexingRun,
    /// Items listed by the platform before `max_items` was applied.
    pub items_found: usize,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Items dropped because an earlier item had the same external id.
    pub duplicates: u64,
}

#[derive(Default)]
struct BatchTally {
    processed: u64,
    failed: u64,
    created: u64,
    updated: u64,
    unchanged: u64,
    duplicates: u64,
}

pub struct IndexRunner;

impl IndexRunner {
    /// Index everything `indexer` lists for `ctx.platform`.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the run: a failed item listing or a
    /// failed progress or completion write. The run is marked failed either
    /// way; only a failure of `start_run` itself leaves no run behind.
    pub async fn run<I: Indexer>(indexer: &I, ctx: &IndexContext) -> Result<RunReport, IndexError> {
        let platform = ctx.platform.as_str();
        let configuration = serde_json::to_value(&ctx.config).map_err(metacrawl_core::Error::from)?;
        let run = ctx.db().start_run(platform, &configuration).await?;
        let started = Instant::now();

        tracing::info!(platform, run_id = run.id, "starting indexing run");

        let retry = RetryPolicy::from_config(ctx.app());
        let listed = retry_with_backoff(&retry, &format!("{platform} fetch_items"), || indexer.fetch_items(ctx)).await;
        let items = match listed {
            Ok(items) => items,
            Err(e) => return Err(Self::fail(ctx, run.id, e).await),
        };

        let items_found = items.len();
        tracing::info!(platform, run_id = run.id, items = items_found, "found items to process");

        if let Err(e) = indexer.before_processing(ctx, &items).await {
            return Err(Self::fail(ctx, run.id, e).await);
        }

        let limit = ctx.config.max_items.unwrap_or(usize::MAX);
        let items = &items[..items.len().min(limit)];
        let batch_size = ctx.config.batch_size.max(1);
        let batch_count = items.len().div_ceil(batch_size);

        let mut seen = HashSet::new();
        let mut totals = BatchTally::default();

        for (index, batch) in items.chunks(batch_size).enumerate() {
            tracing::debug!(platform, run_id = run.id, batch = index + 1, size = batch.len(), "processing batch");

            let tally = Self::process_batch(indexer, ctx, batch, &mut seen).await;
            if let Err(e) = ctx.db().record_run_progress(run.id, tally.processed, tally.failed).await {
                return Err(Self::fail(ctx, run.id, e.into()).await);
            }

            totals.processed += tally.processed;
            totals.failed += tally.failed;
            totals.created += tally.created;
            totals.updated += tally.updated;
            totals.unchanged += tally.unchanged;
            totals.duplicates += tally.duplicates;

            if index + 1 < batch_count && !ctx.app().batch_delay().is_zero() {
                tokio::time::sleep(ctx.app().batch_delay()).await;
            }
        }

        let run = match ctx.db().complete_run(run.id).await {
            Ok(run) => run,
            Err(e) => return Err(Self::fail(ctx, run.id, e.into()).await),
        };
        tracing::info!(
            platform,
            run_id = run.id,
            duration_ms = started.elapsed().as_millis() as u64,
            processed = run.items_processed,
            failed = run.items_failed,
            success_rate = run.success_rate(),
            created = totals.created,
            updated = totals.updated,
            unchanged = totals.unchanged,
            duplicates = totals.duplicates,
            "indexing run completed"
        );

        Ok(RunReport {
            run,
            items_found,
            created: totals.created,
            updated: totals.updated,
            unchanged: totals.unchanged,
            duplicates: totals.duplicates,
        })
    }

    async fn process_batch<I: Indexer>(
        indexer: &I,
        ctx: &IndexContext,
        batch: &[I::Item],
        seen: &mut HashSet<String>,
    ) -> BatchTally {
        let mut tally = BatchTally::default();

        for item in batch {
            let content = match indexer.normalize(item) {
                Ok(content) => content,
                Err(e) => {
                    tally.failed += 1;
                    tracing::error!(platform = ctx.platform.as_str(), item = ?item, error = %e, "failed to process item");
                    continue;
                }
            };

            if !seen.insert(content.external_id.clone()) {
                tally.duplicates += 1;
                tracing::debug!(platform = ctx.platform.as_str(), external_id = %content.external_id, "skipping duplicate");
                continue;
            }

            match ctx.db().save_indexed_content(&content).await {
                Ok(outcome) => {
                    tally.processed += 1;
                    match outcome {
                        SaveOutcome::Created => tally.created += 1,
                        SaveOutcome::Updated => tally.updated += 1,
                        SaveOutcome::Unchanged => tally.unchanged += 1,
                    }
                    tracing::debug!(external_id = %content.external_id, outcome = ?outcome, "saved content");
                }
                Err(e) => {
                    tally.failed += 1;
                    tracing::error!(
                        platform = ctx.platform.as_str(),
                        external_id = %content.external_id,
                        error = %e,
                        "failed to save item"
                    );
                }
            }
        }

        tally
    }

    async fn fail(ctx: &IndexContext, run_id: i64, error: IndexError) -> IndexError {
        tracing::error!(platform = ctx.platform.as_str(), run_id, error = %error, "indexing run failed");
        if let Err(e) = ctx.db().fail_run(run_id, &error.to_string(), &error.details()).await {
            tracing::error!(run_id, error = %e, "failed to record run failure");
        }
        error
    }
}
