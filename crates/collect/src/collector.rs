use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use kubesnap_core::{ClusterSnapshot, CollectConfig, Diagnostic, DiscoveryError, Stage};
use kubesnap_kubehub::{discover, fetch, ControlPlane, FetchOptions};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Assembler;

/// Result of one collection run.
#[derive(Debug, Serialize)]
pub struct CollectReport {
    #[serde(skip)]
    pub snapshot: ClusterSnapshot,
    /// Everything that is missing from `snapshot` and why, in discovery order.
    pub diagnostics: Vec<Diagnostic>,
    /// Listable types found by discovery.
    pub discovered: usize,
    /// Types with at least one instance.
    pub fetched: usize,
    pub empty: usize,
    pub failed: usize,
    /// Types never fetched because the run was cancelled or timed out.
    pub skipped: usize,
    pub cancelled: bool,
    pub took_ms: u128,
}

/// Discovery, then a bounded fan-out of fetches into one assembler.
///
/// Holds only per-run state; build a new one for every run.
pub struct Collector {
    plane: Arc<dyn ControlPlane>,
    config: CollectConfig,
}

impl Collector {
    pub fn new(plane: Arc<dyn ControlPlane>, config: CollectConfig) -> Self { Self { plane, config } }

    /// Run the pipeline.
    ///
    /// Fails only when the group catalog cannot be listed. Triggering `cancel`
    /// (or reaching the configured timeout) stops new fetches, drops those in
    /// flight, and returns whatever was assembled up to that point.
    pub async fn collect(&self, cancel: CancellationToken) -> Result<CollectReport, DiscoveryError> {
        let t0 = Instant::now();
        let deadline = self.config.timeout.map(|t| tokio::time::Instant::now() + t);
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let discovery = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = &mut expired => None,
            d = discover(self.plane.as_ref()) => Some(d?),
        };
        let Some(discovery) = discovery else {
            warn!("cancelled during discovery; nothing collected");
            return Ok(CollectReport {
                snapshot: ClusterSnapshot::default(),
                diagnostics: vec![Diagnostic::new(Stage::Cancelled, "discovery", "run cancelled before discovery completed")],
                discovered: 0,
                fetched: 0,
                empty: 0,
                failed: 0,
                skipped: 0,
                cancelled: true,
                took_ms: t0.elapsed().as_millis(),
            });
        };

        let mut diagnostics: Vec<Diagnostic> = discovery.failures.iter().map(Diagnostic::from).collect();
        let entries = &discovery.entries;
        let opts = FetchOptions { page_size: self.config.page_size, strip_managed_fields: self.config.strip_managed_fields };
        let opts = &opts;
        let namespace = self.config.namespace.as_deref();
        let plane = self.plane.as_ref();
        info!(types = entries.len(), workers = self.config.workers(), ns = ?namespace, "collecting");

        let mut results = futures::stream::iter(entries.iter().enumerate())
            .map(|(ordinal, entry)| {
                // Namespace scoping only applies to namespaced types.
                let scope = if entry.capability.namespaced { namespace } else { None };
                async move { (ordinal, entry, fetch(plane, entry, scope, opts).await) }
            })
            .buffer_unordered(self.config.workers());

        let mut assembler = Assembler::new(self.config.key_policy);
        let mut processed = 0usize;
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => { cancelled = true; break; }
                _ = &mut expired => {
                    warn!(timeout = ?self.config.timeout, "collection deadline reached");
                    cancelled = true;
                    break;
                }
                next = results.next() => {
                    let Some((ordinal, entry, outcome)) = next else { break };
                    processed += 1;
                    match &outcome {
                        Ok(s) if s.is_empty() => debug!(gvr = %entry.identity, "no instances"),
                        Ok(s) => info!(gvr = %entry.identity, count = s.len(), "found {} instances of resource type {}", s.len(), entry.identity.resource),
                        Err(e) => {
                            metrics::counter!("kubesnap_fetch_errors_total", 1u64);
                            warn!(gvr = %entry.identity, error = %e, "fetch failed; skipping type");
                        }
                    }
                    assembler.insert(ordinal, entry.identity.clone(), outcome);
                }
            }
        }
        drop(results);

        let skipped = entries.len() - processed;
        let (snapshot, assembled, stats) = assembler.finish();
        diagnostics.extend(assembled);
        if cancelled {
            diagnostics.push(Diagnostic::new(Stage::Cancelled, "fetch", format!("run cancelled; {} of {} types not collected", skipped, entries.len())));
        }

        let report = CollectReport {
            snapshot,
            diagnostics,
            discovered: entries.len(),
            fetched: stats.fetched,
            empty: stats.empty,
            failed: stats.failed,
            skipped,
            cancelled,
            took_ms: t0.elapsed().as_millis(),
        };
        info!(
            keys = report.snapshot.len(),
            records = report.snapshot.record_count(),
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            took_ms = %report.took_ms,
            "collection finished"
        );
        Ok(report)
    }
}
