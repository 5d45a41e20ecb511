//! Executes the recompute set of one stage.
//!
//! Each unit reads its inputs, runs the transformation and writes its
//! outputs on the blocking thread pool. A semaphore bounds how many units
//! are in flight; at parallelism 1 dispatch is strictly sequential in key
//! order. A unit's permit is held by its blocking thread, so a timed-out
//! unit keeps its slot until the thread returns. Every per-unit failure (error, panic, timeout, store I/O) is
//! captured as an [`ItemError`] and never propagates.

use futures::stream::{FuturesUnordered, StreamExt};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;

use super::ledger::Producer;
use super::resolver::{InputRef, UnitPlan};
use super::StageSpec;
use crate::cancellation::CancellationToken;
use crate::config::StageParams;
use crate::core::{Artifact, ItemKey, RecomputeReason, SUMMARY_KEY};
use crate::errors::ItemError;
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::{InputArtifact, Summarize, SummaryEntry, Transform, TransformRequest};
use crate::store::ArtifactStore;

/// A unit the resolver decided to recompute.
#[derive(Debug, Clone)]
pub struct Job {
    /// The unit and its inputs.
    pub plan: UnitPlan,
    /// Why it is recomputed.
    pub reason: RecomputeReason,
}

/// The result of one job.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// The job that ran.
    pub job: Job,
    /// The written outputs, or why there are none.
    pub result: Result<Vec<Artifact>, ItemError>,
}

/// Everything a worker needs, shared between the async and blocking halves.
struct UnitContext {
    stage: String,
    store: Arc<dyn ArtifactStore>,
    transform: Arc<dyn Transform>,
    params: Arc<StageParams>,
    plan: UnitPlan,
    record_members: bool,
}

/// Runs stage work units with bounded parallelism.
#[derive(Clone)]
pub struct StageRunner {
    store: Arc<dyn ArtifactStore>,
    parallelism: NonZeroUsize,
    item_timeout: Option<Duration>,
    cancel: CancellationToken,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("parallelism", &self.parallelism)
            .field("item_timeout", &self.item_timeout)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Creates a sequential runner without a timeout.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            parallelism: NonZeroUsize::MIN,
            item_timeout: None,
            cancel: CancellationToken::new(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: NonZeroUsize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the per-item timeout.
    #[must_use]
    pub const fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Sets the cancellation token checked before each dispatch.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the worker pool size.
    #[must_use]
    pub const fn parallelism(&self) -> NonZeroUsize {
        self.parallelism
    }

    /// Runs every job and returns one result per job, in job order.
    ///
    /// Jobs not yet dispatched when the token is cancelled are reported as
    /// `ItemError::Cancelled`.
    pub async fn run(&self, spec: &StageSpec, params: &StageParams, jobs: Vec<Job>) -> Vec<JobResult> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism.get()));
        let params = Arc::new(params.clone());
        let mut results: Vec<Option<Result<Vec<Artifact>, ItemError>>> = vec![None; jobs.len()];
        let mut tasks = FuturesUnordered::new();

        for (index, job) in jobs.iter().enumerate() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if self.cancel.is_cancelled() {
                results[index] = Some(Err(ItemError::Cancelled {
                    reason: self.cancel.reason().unwrap_or_default(),
                }));
                continue;
            }

            tracing::debug!(
                stage = %spec.name,
                item = %job.plan.unit.lead().map(ItemKey::as_str).unwrap_or_default(),
                reason = %job.reason,
                "Dispatching unit"
            );

            let ctx = Arc::new(UnitContext {
                stage: spec.name.clone(),
                store: Arc::clone(&self.store),
                transform: Arc::clone(&spec.transform),
                params: Arc::clone(&params),
                plan: job.plan.clone(),
                record_members: spec.cardinality.is_fan_in(),
            });
            let handle = tokio::spawn(execute_unit(ctx, self.item_timeout, permit));
            tasks.push(async move { (index, handle.await) });
        }

        while let Some((index, joined)) = tasks.next().await {
            results[index] = Some(joined.unwrap_or_else(|err| Err(join_error(&err))));
        }

        jobs.into_iter()
            .zip(results)
            .map(|(job, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(ItemError::Cancelled {
                        reason: "worker pool closed".to_string(),
                    })
                });
                if let Err(err) = &result {
                    self.report_failure(&spec.name, &job.plan.unit.outputs, err);
                }
                JobResult { job, result }
            })
            .collect()
    }

    /// Builds and writes a stage's summary from its usable outputs.
    ///
    /// Runs as a single blocking task: outputs are read and aggregated
    /// strictly in the order given, which callers keep sorted by key. The
    /// contributing keys are recorded as the summary's members.
    ///
    /// # Errors
    ///
    /// Returns the item error of the first failing read, the aggregation or
    /// the write.
    pub async fn summarize(
        &self,
        stage: &str,
        summary: Arc<dyn Summarize>,
        outputs: Vec<(ItemKey, PathBuf)>,
    ) -> Result<Artifact, ItemError> {
        let store = Arc::clone(&self.store);
        let stage = stage.to_string();

        tokio::task::spawn_blocking(move || {
            let entries = outputs
                .into_iter()
                .map(|(key, location)| {
                    let data = store.read(&stage, &key).map_err(|e| ItemError::store(&e))?;
                    Ok(SummaryEntry { key, location, data })
                })
                .collect::<Result<Vec<_>, ItemError>>()?;

            let bytes = summary
                .summarize(&stage, &entries)
                .map_err(|e| ItemError::transform(&e))?;
            let key = ItemKey::new(SUMMARY_KEY);
            let artifact = store.write(&stage, &key, &bytes).map_err(|e| ItemError::store(&e))?;

            let members: Vec<ItemKey> = entries.into_iter().map(|entry| entry.key).collect();
            store
                .write_members(&stage, &key, &members)
                .map_err(|e| ItemError::store(&e))?;
            Ok(artifact)
        })
        .await
        .unwrap_or_else(|err| Err(join_error(&err)))
    }

    fn report_failure(&self, stage: &str, outputs: &[ItemKey], err: &ItemError) {
        for item in outputs {
            tracing::warn!(stage, item = %item, kind = err.kind(), error = %err, "Item failed");
            self.events.try_emit(
                "item.failed",
                Some(serde_json::json!({
                    "stage": stage,
                    "item": item,
                    "kind": err.kind(),
                    "error": err.to_string(),
                })),
            );
        }
    }
}

async fn execute_unit(
    ctx: Arc<UnitContext>,
    timeout: Option<Duration>,
    permit: OwnedSemaphorePermit,
) -> Result<Vec<Artifact>, ItemError> {
    let compute = {
        let ctx = Arc::clone(&ctx);
        tokio::task::spawn_blocking(move || (compute_unit(&ctx), permit))
    };

    let joined = match timeout {
        Some(limit) => {
            if let Ok(joined) = tokio::time::timeout(limit, compute).await {
                joined
            } else {
                // The blocking thread keeps its permit; its result is dropped unwritten.
                tracing::warn!(stage = %ctx.stage, timeout_ms = limit.as_millis(), "Unit timed out");
                return Err(ItemError::timeout(limit));
            }
        }
        None => compute.await,
    };
    let (computed, permit) = joined.map_err(|err| join_error(&err))?;
    let payloads = computed?;

    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        write_outputs(&ctx, payloads)
    })
    .await
    .map_err(|err| join_error(&err))?
}

fn compute_unit(ctx: &UnitContext) -> Result<Vec<Vec<u8>>, ItemError> {
    let inputs = read_inputs(ctx.store.as_ref(), &ctx.plan.inputs)?;
    let shared = read_inputs(ctx.store.as_ref(), &ctx.plan.shared)?;

    let request = TransformRequest {
        stage: &ctx.stage,
        outputs: &ctx.plan.unit.outputs,
        inputs: &inputs,
        shared: &shared,
        params: &ctx.params,
    };
    let produced = ctx
        .transform
        .apply(&request)
        .map_err(|err| ItemError::transform(&err))?;

    if produced.len() != ctx.plan.unit.outputs.len() {
        return Err(ItemError::OutputCount {
            expected: ctx.plan.unit.outputs.len(),
            produced: produced.len(),
        });
    }
    Ok(produced.into_outputs())
}

fn read_inputs(store: &dyn ArtifactStore, refs: &[InputRef]) -> Result<Vec<InputArtifact>, ItemError> {
    refs.iter()
        .map(|input| {
            let data = match &input.producer {
                Producer::Source(path) => store.read_source(path),
                Producer::Stage(stage) => store.read(stage, &input.key),
            }
            .map_err(|err| ItemError::store(&err))?;

            Ok(InputArtifact {
                key: input.key.clone(),
                dependency: input.dependency.clone(),
                producer: input.producer.name().to_string(),
                location: input.location.clone(),
                data,
            })
        })
        .collect()
}

fn write_outputs(ctx: &UnitContext, payloads: Vec<Vec<u8>>) -> Result<Vec<Artifact>, ItemError> {
    let artifacts = ctx
        .plan
        .unit
        .outputs
        .iter()
        .zip(payloads)
        .map(|(key, data)| {
            ctx.store
                .write(&ctx.stage, key, &data)
                .map_err(|err| ItemError::store(&err))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ctx.record_members {
        for key in &ctx.plan.unit.outputs {
            ctx.store
                .write_members(&ctx.stage, key, &ctx.plan.unit.sources)
                .map_err(|err| ItemError::store(&err))?;
        }
    }
    Ok(artifacts)
}

fn join_error(err: &JoinError) -> ItemError {
    if err.is_cancelled() {
        return ItemError::Cancelled {
            reason: "worker task aborted".to_string(),
        };
    }
    ItemError::Panicked {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Item;
    use crate::pipeline::ledger::RunLedger;
    use crate::pipeline::resolver::{Decision, StalenessResolver};
    use crate::stages::{Cardinality, CopyTransform, FnTransform, IndexSummary, Produced};
    use crate::store::InMemoryArtifactStore;
    use crate::testing::{FailingTransform, PanickingTransform, SlowTransform};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jobs_for(store: &InMemoryArtifactStore, spec: &StageSpec, keys: &[&str]) -> Vec<Job> {
        let items: Vec<Item> = keys
            .iter()
            .map(|k| {
                let path = format!("/raw/{k}.fits");
                store.add_source(path.as_str(), k.as_bytes().to_vec());
                Item::new(*k, path)
            })
            .collect();
        let mut ledger = RunLedger::new();
        ledger.seed_sources(&items, store);
        let force = BTreeSet::new();

        StalenessResolver::new(&ledger, store, &force)
            .classify_stage(spec)
            .into_iter()
            .filter_map(|c| match c.decision {
                Decision::Recompute(reason) => Some(Job { plan: c.plan, reason }),
                _ => None,
            })
            .collect()
    }

    fn runner(store: &Arc<InMemoryArtifactStore>) -> StageRunner {
        let store: Arc<dyn ArtifactStore> = Arc::clone(store) as Arc<dyn ArtifactStore>;
        StageRunner::new(store)
    }

    #[tokio::test]
    async fn test_runs_and_writes_outputs() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let spec = StageSpec::new(
            "upper",
            Arc::new(FnTransform::new("upper", |req: &TransformRequest<'_>| {
                Ok(Produced::single(req.primary().unwrap().data.to_ascii_uppercase()))
            })),
        );
        let jobs = jobs_for(&store, &spec, &["a", "b"]);

        let results = runner(&store).run(&spec, &StageParams::default(), jobs).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.result.is_ok()));
        assert_eq!(store.read("upper", &"b".into()).unwrap(), b"B".to_vec());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let spec = StageSpec::new("calibrate", Arc::new(FailingTransform::on(["b"])));
        let jobs = jobs_for(&store, &spec, &["a", "b", "c"]);

        let results = runner(&store)
            .with_parallelism(NonZeroUsize::new(3).unwrap())
            .run(&spec, &StageParams::default(), jobs)
            .await;

        let failed: Vec<_> = results
            .iter()
            .filter(|r| r.result.is_err())
            .map(|r| r.job.plan.unit.outputs[0].to_string())
            .collect();
        assert_eq!(failed, vec!["b".to_string()]);
        assert!(!store.exists("calibrate", &"b".into()));
        assert!(store.exists("calibrate", &"c".into()));
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let spec = StageSpec::new("calibrate", Arc::new(PanickingTransform::on(["a"])));
        let jobs = jobs_for(&store, &spec, &["a", "b"]);

        let results = runner(&store).run(&spec, &StageParams::default(), jobs).await;
        assert!(matches!(results[0].result, Err(ItemError::Panicked { .. })));
        assert!(results[1].result.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_discards_late_result() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let spec = StageSpec::new(
            "calibrate",
            Arc::new(SlowTransform::new(Duration::from_millis(300)).only(["a"])),
        );
        let jobs = jobs_for(&store, &spec, &["a", "b"]);

        let results = runner(&store)
            .with_parallelism(NonZeroUsize::new(2).unwrap())
            .with_item_timeout(Some(Duration::from_millis(20)))
            .run(&spec, &StageParams::default(), jobs)
            .await;

        assert_eq!(results[0].result, Err(ItemError::Timeout { after_ms: 20 }));
        assert!(results[1].result.is_ok());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!store.exists("calibrate", &"a".into()));
    }

    #[tokio::test]
    async fn test_timed_out_units_keep_their_slot() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let transform = {
            let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
            FnTransform::new("hang", move |_req: &TransformRequest<'_>| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(Produced::single(b"late".to_vec()))
            })
        };
        let spec = StageSpec::new("calibrate", Arc::new(transform));
        let jobs = jobs_for(&store, &spec, &["a", "b", "c", "d", "e", "f"]);

        let results = runner(&store)
            .with_parallelism(NonZeroUsize::new(2).unwrap())
            .with_item_timeout(Some(Duration::from_millis(10)))
            .run(&spec, &StageParams::default(), jobs)
            .await;

        assert!(results
            .iter()
            .all(|r| r.result == Err(ItemError::Timeout { after_ms: 10 })));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak was {}", peak.load(Ordering::SeqCst));
        assert_eq!(store.count("calibrate"), 0);
    }

    #[tokio::test]
    async fn test_fan_in_records_members() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let spec = StageSpec::new("combine", Arc::new(CopyTransform)).with_cardinality(Cardinality::fan_in_all("all"));
        let jobs = jobs_for(&store, &spec, &["a", "b"]);

        let results = runner(&store).run(&spec, &StageParams::default(), jobs).await;

        assert!(results[0].result.is_ok());
        assert_eq!(
            store.members("combine", &"all".into()).unwrap(),
            Some(vec![ItemKey::new("a"), ItemKey::new("b")])
        );

        let copy = StageSpec::new("calibrate", Arc::new(CopyTransform));
        let jobs = jobs_for(&store, &copy, &["c"]);
        runner(&store).run(&copy, &StageParams::default(), jobs).await;
        assert_eq!(store.members("calibrate", &"c".into()).unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let spec = StageSpec::new("calibrate", Arc::new(CopyTransform));
        let jobs = jobs_for(&store, &spec, &["a", "b"]);
        let cancel = CancellationToken::new();
        cancel.cancel("operator abort");

        let results = runner(&store)
            .with_cancellation(cancel)
            .run(&spec, &StageParams::default(), jobs)
            .await;

        assert!(results.iter().all(|r| matches!(
            &r.result,
            Err(ItemError::Cancelled { reason }) if reason == "operator abort"
        )));
        assert_eq!(store.count("calibrate"), 0);
    }

    #[tokio::test]
    async fn test_output_count_mismatch() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let spec = StageSpec::new(
            "split",
            Arc::new(FnTransform::new("short", |_req: &TransformRequest<'_>| {
                Ok(Produced::single(b"only one".to_vec()))
            })),
        )
        .with_cardinality(Cardinality::fan_out(["x", "y"]));
        let jobs = jobs_for(&store, &spec, &["a"]);

        let results = runner(&store).run(&spec, &StageParams::default(), jobs).await;
        assert_eq!(
            results[0].result,
            Err(ItemError::OutputCount { expected: 2, produced: 1 })
        );
    }

    #[tokio::test]
    async fn test_summarize_in_key_order() {
        let store = Arc::new(InMemoryArtifactStore::new());
        store.write("collapse", &"b".into(), b"bbb").unwrap();
        store.write("collapse", &"a".into(), b"a").unwrap();

        let artifact = runner(&store)
            .summarize(
                "collapse",
                Arc::new(IndexSummary),
                vec![
                    (ItemKey::new("a"), PathBuf::from("mem://collapse/a")),
                    (ItemKey::new("b"), PathBuf::from("mem://collapse/b")),
                ],
            )
            .await
            .unwrap();

        assert_eq!(artifact.key.as_str(), SUMMARY_KEY);
        assert_eq!(
            store.read("collapse", &SUMMARY_KEY.into()).unwrap(),
            b"a\t1\nb\t3\n".to_vec()
        );
        assert_eq!(
            store.members("collapse", &SUMMARY_KEY.into()).unwrap(),
            Some(vec![ItemKey::new("a"), ItemKey::new("b")])
        );
    }
}
