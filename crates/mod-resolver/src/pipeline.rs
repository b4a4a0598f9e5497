//! Resolution orchestrators
//!
//! The batch path turns an override blob into a [`PickedSet`]:
//!
//! blob
//! ↓
//! extract_mod_ids (extract.rs)
//! ↓
//! ModCatalog::fetch_metadata + fetch_config_scripts (concurrently)
//! ↓
//! ScriptEvaluator::evaluate_batch (one blocking task, one mod at a time)
//! ↓
//! PickedSet in catalog metadata order
//!
//! The single-add path starts from metadata the user already has and only
//! fetches and evaluates that mod's script.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::catalog::{HttpModCatalog, ModCatalog};
use crate::config::ResolverConfig;
use crate::core::{
    ConfigurationOptions, ModConfigScript, ModId, ModMetadata, PickedSet, ResolvedMod, Result,
    ScriptError,
};
use crate::extract::extract_mod_ids;
use crate::script::{
    BatchEvaluation, EvaluationSettings, LuaRuntime, ScriptEvaluator, ScriptRuntime,
};

/// Slack on top of the per-script budgets for session setup and conversion
const EVALUATION_GRACE: Duration = Duration::from_secs(1);

/// Counters for resolution runs
#[derive(Debug, Default)]
pub struct ResolveMetrics {
    pub batches_started: AtomicU64,
    pub mods_resolved: AtomicU64,
    pub script_failures: AtomicU64,
    pub missing_scripts: AtomicU64,
    pub transport_failures: AtomicU64,
}

impl ResolveMetrics {
    pub fn record_batch_started(&self) {
        self.batches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluation(&self, outcome: &BatchEvaluation) {
        self.mods_resolved.fetch_add(outcome.mods.len() as u64, Ordering::Relaxed);
        self.script_failures.fetch_add(outcome.script_failures as u64, Ordering::Relaxed);
        self.missing_scripts.fetch_add(outcome.missing_scripts as u64, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get metrics snapshot
    pub fn snapshot(&self) -> ResolveMetricsSnapshot {
        ResolveMetricsSnapshot {
            batches_started: self.batches_started.load(Ordering::Relaxed),
            mods_resolved: self.mods_resolved.load(Ordering::Relaxed),
            script_failures: self.script_failures.load(Ordering::Relaxed),
            missing_scripts: self.missing_scripts.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveMetricsSnapshot {
    pub batches_started: u64,
    pub mods_resolved: u64,
    pub script_failures: u64,
    pub missing_scripts: u64,
    pub transport_failures: u64,
}

/// Drives catalog lookups and script evaluation for mod lists
pub struct ModResolver<C, R: ScriptRuntime> {
    catalog: Arc<C>,
    evaluator: ScriptEvaluator<R>,
    script_timeout: Duration,
    metrics: Arc<ResolveMetrics>,
}

impl ModResolver<HttpModCatalog, LuaRuntime> {
    /// Resolver over the HTTP catalog and sandboxed Lua sessions
    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        let catalog = HttpModCatalog::new(config)?;
        let runtime = LuaRuntime::new(config.script_limits.clone());
        Ok(Self::new(catalog, runtime, config))
    }
}

impl<C: ModCatalog, R: ScriptRuntime> ModResolver<C, R> {
    pub fn new(catalog: C, runtime: R, config: &ResolverConfig) -> Self {
        Self::with_shared(Arc::new(catalog), Arc::new(runtime), config)
    }

    pub fn with_shared(catalog: Arc<C>, runtime: Arc<R>, config: &ResolverConfig) -> Self {
        Self {
            catalog,
            evaluator: ScriptEvaluator::new(runtime, EvaluationSettings::from(config)),
            script_timeout: config.script_limits.timeout,
            metrics: Arc::new(ResolveMetrics::default()),
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn metrics(&self) -> &ResolveMetrics {
        &self.metrics
    }

    /// Resolve every mod referenced by a cluster override blob
    pub async fn resolve_existing_mods(&self, blob: &str) -> Result<PickedSet> {
        let ids = extract_mod_ids(blob);
        if ids.is_empty() {
            debug!("Override blob references no mods");
            return Ok(PickedSet::new());
        }
        self.resolve_ids(&ids).await
    }

    /// Fetch metadata and scripts for `ids` and evaluate every script
    ///
    /// A catalog failure aborts the whole batch. Unknown ids, missing scripts
    /// and failing scripts do not.
    pub async fn resolve_ids(&self, ids: &[ModId]) -> Result<PickedSet> {
        if ids.is_empty() {
            return Ok(PickedSet::new());
        }
        self.metrics.record_batch_started();
        info!("Resolving {} mods", ids.len());

        let fetched = tokio::try_join!(
            self.catalog.fetch_metadata(ids),
            self.catalog.fetch_config_scripts(ids),
        );
        let (metadata, scripts) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                self.metrics.record_transport_failure();
                error!("Mod catalog lookup failed ({}): {}", err.category(), err);
                return Err(err);
            }
        };

        let outcome = self.evaluate(pair_scripts(metadata, scripts)).await;
        info!(
            "Resolved {} mods ({} without script, {} script failures)",
            outcome.mods.len(),
            outcome.missing_scripts,
            outcome.script_failures
        );

        Ok(outcome.mods.into_iter().collect())
    }

    /// Resolve one mod picked from search results
    ///
    /// The metadata is used as given; only the script is fetched. A mod with
    /// no script in the catalog is still returned, with options absent.
    pub async fn resolve_one_mod(&self, metadata: ModMetadata) -> Result<ResolvedMod> {
        let ids = [metadata.id.clone()];
        let scripts = match self.catalog.fetch_config_scripts(&ids).await {
            Ok(scripts) => scripts,
            Err(err) => {
                self.metrics.record_transport_failure();
                error!("Script lookup for mod {} failed: {}", metadata.id, err);
                return Err(err);
            }
        };

        let script = scripts.into_iter().find(|script| script.id == metadata.id);
        let fallback = metadata.clone();
        let mut outcome = self.evaluate(vec![(metadata, script)]).await;

        Ok(outcome.mods.pop().unwrap_or_else(|| ResolvedMod::bare(fallback)))
    }

    /// Search the catalog; blank text yields no results without a request
    pub async fn search(&self, text: &str) -> Result<Vec<ModMetadata>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        self.catalog.search(text).await
    }

    /// Evaluate a single script outside of any batch
    pub fn evaluate_script(
        &self,
        id: &ModId,
        code: &str,
    ) -> std::result::Result<Option<ConfigurationOptions>, ScriptError> {
        self.evaluator.evaluate(id, code)
    }

    /// Run the evaluator on a blocking task so the event loop stays free
    ///
    /// The task gets the script budgets of the batch plus some slack. If it
    /// dies or overruns, the mods come back without options rather than
    /// failing or stalling the run.
    async fn evaluate(
        &self,
        pairs: Vec<(ModMetadata, Option<ModConfigScript>)>,
    ) -> BatchEvaluation {
        let scripted = pairs.iter().filter(|(_, script)| script.is_some()).count();
        let fallback: Vec<ModMetadata> =
            pairs.iter().map(|(metadata, _)| metadata.clone()).collect();
        let budget = evaluation_budget(self.script_timeout, scripted);
        let evaluator = self.evaluator.clone();
        let task = tokio::task::spawn_blocking(move || evaluator.evaluate_batch(pairs));

        let outcome = match tokio::time::timeout(budget, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                error!("Script evaluation task failed, continuing without options: {}", err);
                bare_outcome(fallback, scripted)
            }
            Err(_) => {
                error!(
                    "Script evaluation of {} mods overran {:?}, continuing without options",
                    scripted, budget
                );
                bare_outcome(fallback, scripted)
            }
        };

        self.metrics.record_evaluation(&outcome);
        outcome
    }
}

/// Time the evaluation of `scripted` scripts may take as a whole
fn evaluation_budget(script_timeout: Duration, scripted: usize) -> Duration {
    let slots = u32::try_from(scripted.saturating_add(1)).unwrap_or(u32::MAX);
    script_timeout.saturating_mul(slots).saturating_add(EVALUATION_GRACE)
}

/// Every mod without options; the ones that had a script count as failed
fn bare_outcome(metadata: Vec<ModMetadata>, scripted: usize) -> BatchEvaluation {
    BatchEvaluation {
        missing_scripts: metadata.len().saturating_sub(scripted),
        script_failures: scripted,
        mods: metadata.into_iter().map(ResolvedMod::bare).collect(),
    }
}

/// Pair each metadata record with its script, keeping metadata order
///
/// Duplicate metadata entries are dropped; the first script per id wins.
fn pair_scripts(
    metadata: Vec<ModMetadata>,
    scripts: Vec<ModConfigScript>,
) -> Vec<(ModMetadata, Option<ModConfigScript>)> {
    let mut by_id: HashMap<ModId, ModConfigScript> = HashMap::with_capacity(scripts.len());
    for script in scripts {
        by_id.entry(script.id.clone()).or_insert(script);
    }

    let mut seen = HashSet::with_capacity(metadata.len());
    metadata
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| {
            let script = by_id.remove(&m.id);
            (m, script)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ModId {
        ModId::parse(raw).unwrap()
    }

    #[test]
    fn test_pair_scripts_keeps_metadata_order() {
        let pairs = pair_scripts(
            vec![
                ModMetadata::new(id("3"), "three"),
                ModMetadata::new(id("1"), "one"),
                ModMetadata::new(id("3"), "three again"),
            ],
            vec![
                ModConfigScript::new(id("1"), "a"),
                ModConfigScript::new(id("1"), "b"),
                ModConfigScript::new(id("9"), "orphan"),
            ],
        );

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.title, "three");
        assert!(pairs[0].1.is_none());
        assert_eq!(pairs[1].1.as_ref().unwrap().code, "a");
    }

    #[test]
    fn test_evaluation_budget_scales_with_scripts() {
        let timeout = Duration::from_millis(50);
        assert_eq!(evaluation_budget(timeout, 0), Duration::from_millis(1050));
        assert_eq!(evaluation_budget(timeout, 3), Duration::from_millis(1200));
        assert_eq!(evaluation_budget(Duration::MAX, 3), Duration::MAX);
    }

    #[test]
    fn test_bare_outcome_counts() {
        let outcome = bare_outcome(
            vec![ModMetadata::new(id("1"), "one"), ModMetadata::new(id("2"), "two")],
            1,
        );
        assert_eq!(outcome.mods.len(), 2);
        assert!(outcome.mods.iter().all(|m| !m.has_options()));
        assert_eq!(outcome.script_failures, 1);
        assert_eq!(outcome.missing_scripts, 1);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ResolveMetrics::default();
        metrics.record_batch_started();
        metrics.record_transport_failure();
        metrics.record_evaluation(&BatchEvaluation {
            mods: vec![ResolvedMod::bare(ModMetadata::new(id("1"), "one"))],
            script_failures: 1,
            missing_scripts: 0,
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_started, 1);
        assert_eq!(snapshot.mods_resolved, 1);
        assert_eq!(snapshot.script_failures, 1);
        assert_eq!(snapshot.transport_failures, 1);
    }
}
