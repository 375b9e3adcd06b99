//! Fleet: many independent execution contexts hitting one weighted branch
//!
//! A [`Fleet`] simulates a population of virtual users that all reach the same
//! branch point. It is the concurrent counterpart of [`BranchRunner`]: the
//! [`WeightTable`] is built once and shared read-only behind an `Arc`, while
//! every context owns everything it mutates.
//!
//! # High-level flow
//! 1. A [`SeedSequence`] is derived from the configured master seed, or from
//!    OS entropy when no seed is set. The master seed is logged so any run can
//!    be replayed.
//! 2. One tokio task is spawned per context. Context `i` owns
//!    `seeds.source(i)`, so its draws depend only on the master seed and `i`,
//!    never on how tasks get scheduled.
//! 3. Each context runs the branch `iterations` times and folds every selected
//!    index and the executor's [`Outcome`] into a context-local [`BranchTally`].
//! 4. When all contexts are done, or the shutdown flag flips, the tallies are
//!    merged into the final result.
//!
//! # Notes
//! - Executor failures are counted per option, never retried and never
//!   counted as successes. Anything beyond the count (logging the error,
//!   retrying the chain) belongs to the executor.
//! - A context whose random source breaks the draw contract stops, and the
//!   whole run reports that [`ConfigError`] instead of a short tally.
//! - A context that panics is logged and contributes nothing, so one bad
//!   context does not lose the whole run.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::watch::{self, Receiver},
    task::JoinHandle,
};
use typed_builder::TypedBuilder;

use crate::{
    error::{ConfigError, RunError},
    random::{RandomSource, SeedSequence},
    runner::{BranchRunner, Executor},
    selector::DrawPolicy,
    table::WeightTable,
};

/// The part of an executor's output a [`Fleet`] looks at.
///
/// Implemented for `()`, for executors that handle their own failures, and
/// for `Result`, whose `Err` counts as a failed action.
pub trait Outcome: Send {
    fn is_failure(&self) -> bool;
}

impl Outcome for () {
    fn is_failure(&self) -> bool {
        false
    }
}

impl<T: Send, E: Send> Outcome for Result<T, E> {
    fn is_failure(&self) -> bool {
        self.is_err()
    }
}

/// Selection and failure counts per option index.
///
/// `merge` is associative and commutative, context tallies are merged in
/// arbitrary order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTally {
    counts: Vec<u64>,
    failures: Vec<u64>,
}

impl BranchTally {
    /// An empty tally for a table with `options` options.
    pub fn new(options: usize) -> Self {
        Self {
            counts: vec![0; options],
            failures: vec![0; options],
        }
    }

    fn grow(&mut self, len: usize) {
        if len > self.counts.len() {
            self.counts.resize(len, 0);
            self.failures.resize(len, 0);
        }
    }

    /// Aggregate a single selection into itself
    pub fn record(&mut self, index: usize, failed: bool) {
        self.grow(index + 1);
        self.counts[index] += 1;
        if failed {
            self.failures[index] += 1;
        }
    }

    /// Combine two tallies into one
    pub fn merge(&mut self, other: Self) {
        self.grow(other.counts.len());
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
        for (mine, theirs) in self.failures.iter_mut().zip(other.failures) {
            *mine += theirs;
        }
    }

    /// How often each option was selected, failed actions included.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// How often the action of each option failed.
    pub fn failures(&self) -> &[u64] {
        &self.failures
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.failures.iter().sum()
    }

    /// Observed selection frequency of each option. All zeros for an empty tally.
    pub fn frequencies(&self) -> Vec<f64> {
        let total = self.total();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        self.counts
            .iter()
            .map(|&c| c as f64 / total as f64)
            .collect()
    }
}

/// Runs a weighted branch from many concurrent, independent contexts.
///
/// # Tuning knobs
/// - `contexts`: number of concurrent contexts (tokio tasks). Default is
///   `num_cpus * 120`, matching what high-throughput async workloads need.
/// - `iterations`: how many times each context reaches the branch.
/// - `seed`: master seed. Unset means a fresh seed per run.
/// - `policy`: what to do with out-of-range draws, see [`DrawPolicy`].
#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct Fleet {
    #[builder(default = default_contexts())]
    #[serde(default = "default_contexts")]
    pub contexts: usize,
    #[builder(default = 1)]
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub seed: Option<u64>,
    #[builder(default)]
    #[serde(default)]
    pub policy: DrawPolicy,
}

fn default_contexts() -> usize {
    num_cpus::get() * 120
}

fn default_iterations() -> usize {
    1
}

impl Default for Fleet {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Fleet {
    /// Run every context to completion and return the merged tally.
    ///
    /// # Errors
    /// The first [`ConfigError`] hit by any context. Executor failures are
    /// not errors here, they are counted in [`BranchTally::failures`].
    pub async fn run<A, X>(
        &self,
        table: Arc<WeightTable<A>>,
        executor: Arc<X>,
    ) -> Result<BranchTally, ConfigError>
    where
        A: Send + Sync + 'static,
        X: Executor<A> + 'static,
        X::Output: Outcome,
    {
        let (_shutdown_tx, shutdown) = watch::channel(false);
        self.run_until(table, executor, shutdown).await
    }

    /// Like [`Fleet::run`], but every context stops as soon as `shutdown`
    /// holds `true`. In-flight actions are cancelled, not finished.
    pub async fn run_until<A, X>(
        &self,
        table: Arc<WeightTable<A>>,
        executor: Arc<X>,
        shutdown: Receiver<bool>,
    ) -> Result<BranchTally, ConfigError>
    where
        A: Send + Sync + 'static,
        X: Executor<A> + 'static,
        X::Output: Outcome,
    {
        let seeds = self
            .seed
            .map(SeedSequence::new)
            .unwrap_or_else(SeedSequence::from_entropy);

        tracing::info!(
            "Spawning {} contexts x {} iterations (master seed {})...",
            self.contexts,
            self.iterations,
            seeds.master()
        );
        let handles = spawn_contexts(
            ContextPlan {
                iterations: self.iterations,
                runner: Arc::new(BranchRunner::builder().policy(self.policy).build()),
                shutdown,
            },
            self.contexts,
            move |context| seeds.source(context),
            table.clone(),
            executor,
        );

        collect_tallies(handles, table.len()).await
    }
}

/// Joins every context and merges their tallies.
async fn collect_tallies(
    handles: Vec<JoinHandle<Result<BranchTally, ConfigError>>>,
    options: usize,
) -> Result<BranchTally, ConfigError> {
    tracing::info!("Retrieving tallies from contexts...");
    let mut tally = BranchTally::new(options);
    let mut first_error = None;

    for res in join_all(handles).await {
        match res {
            Ok(Ok(t)) => tally.merge(t),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => tracing::error!("Context panicked with error: {e}"),
        }
    }

    if let Some(e) = first_error {
        tracing::error!("Run aborted: {e}");
        return Err(e);
    }

    tracing::info!(
        "Done: {} selections, {} failed",
        tally.total(),
        tally.total_failures()
    );
    Ok(tally)
}

/// State every context starts from.
#[derive(Clone)]
struct ContextPlan {
    iterations: usize,
    runner: Arc<BranchRunner>,
    shutdown: Receiver<bool>,
}

/// Spawns `contexts` tokio tasks. Context `i` draws from `sources(i)`.
fn spawn_contexts<A, X, S, N>(
    plan: ContextPlan,
    contexts: usize,
    sources: N,
    table: Arc<WeightTable<A>>,
    executor: Arc<X>,
) -> Vec<JoinHandle<Result<BranchTally, ConfigError>>>
where
    A: Send + Sync + 'static,
    X: Executor<A> + 'static,
    X::Output: Outcome,
    S: RandomSource + 'static,
    N: Fn(u64) -> S,
{
    (0..contexts)
        .map(|i| {
            let ContextPlan {
                iterations,
                runner,
                mut shutdown,
            } = plan.clone();
            let mut source = sources(i as u64);
            let table = table.clone();
            let executor = executor.clone();

            tokio::spawn(async move {
                let mut tally = BranchTally::new(table.len());
                tracing::debug!("Context {i} started.");

                for _ in 0..iterations {
                    match runner
                        .run_until_indexed(&table, &mut source, executor.as_ref(), &mut shutdown)
                        .await
                    {
                        Ok((index, outcome)) => tally.record(index, outcome.is_failure()),
                        Err(RunError::Cancelled) => {
                            tracing::debug!("Context {i} cancelled.");
                            break;
                        }
                        Err(RunError::Config(e)) => {
                            tracing::error!("Context {i} stopped: {e}");
                            return Err(e);
                        }
                    }
                }

                tracing::debug!("Context {i} shutting down.");
                Ok(tally)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededSource;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    fn table() -> Arc<WeightTable<u8>> {
        Arc::new(WeightTable::build(vec![(1.0, 0u8), (3.0, 1u8)]).unwrap())
    }

    fn noop() -> Arc<impl Executor<u8, Output = ()>> {
        Arc::new(|_: &u8| async {})
    }

    /// Draws far outside any table.
    struct Broken;

    impl RandomSource for Broken {
        fn next(&mut self, total: f64) -> f64 {
            total * 2.0
        }
    }

    fn context_plan(iterations: usize, policy: DrawPolicy) -> (ContextPlan, watch::Sender<bool>) {
        let (tx, shutdown) = watch::channel(false);
        let plan = ContextPlan {
            iterations,
            runner: Arc::new(BranchRunner::builder().policy(policy).build()),
            shutdown,
        };
        (plan, tx)
    }

    #[test]
    fn tally_merge_is_order_independent() {
        let mut a = BranchTally::new(2);
        a.record(0, false);
        a.record(1, true);
        let mut b = BranchTally::new(3);
        b.record(2, false);
        b.record(2, true);

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.counts(), &[1, 1, 2]);
        assert_eq!(ab.failures(), &[0, 1, 1]);
        assert_eq!(ab.total(), 4);
        assert_eq!(ab.total_failures(), 2);
        assert_eq!(ab.frequencies(), vec![0.25, 0.25, 0.5]);
    }

    #[test]
    fn empty_tally_has_zero_frequencies() {
        assert_eq!(BranchTally::new(2).frequencies(), vec![0.0, 0.0]);
    }

    #[test]
    fn tally_serializes_to_json() {
        let mut tally = BranchTally::new(2);
        tally.record(1, true);
        let json = serde_json::to_string(&tally).unwrap();
        assert_eq!(json, r#"{"counts":[0,1],"failures":[0,1]}"#);
        assert_eq!(serde_json::from_str::<BranchTally>(&json).unwrap(), tally);
    }

    #[test]
    fn outcomes() {
        assert!(!().is_failure());
        assert!(!Ok::<u8, String>(1).is_failure());
        assert!(Err::<u8, String>("boom".into()).is_failure());
    }

    #[test]
    fn config_defaults_from_json() {
        let fleet: Fleet = serde_json::from_str(r#"{ "seed": 7, "policy": "clamp" }"#).unwrap();
        assert_eq!(fleet.contexts, num_cpus::get() * 120);
        assert_eq!(fleet.iterations, 1);
        assert_eq!(fleet.seed, Some(7));
        assert_eq!(fleet.policy, DrawPolicy::Clamp);
    }

    #[tokio::test]
    async fn every_iteration_is_counted() {
        let fleet = Fleet::builder().contexts(10).iterations(25).seed(1).build();
        let tally = fleet.run(table(), noop()).await.unwrap();
        assert_eq!(tally.total(), 250);
        assert_eq!(tally.total_failures(), 0);
        assert_eq!(tally.counts().len(), 2);
    }

    #[tokio::test]
    async fn failed_actions_are_counted_not_dropped() {
        let executor = Arc::new(|_: &u8| async { Err::<(), _>("boom") });
        let fleet = Fleet::builder().contexts(4).iterations(10).seed(5).build();

        let tally = fleet.run(table(), executor).await.unwrap();
        assert_eq!(tally.total(), 40);
        assert_eq!(tally.failures(), tally.counts());
    }

    #[tokio::test]
    async fn failures_land_on_the_failing_option() {
        // option 1 always fails, option 0 never does
        let executor = Arc::new(|option: &u8| {
            let failed = *option == 1;
            async move { if failed { Err("down") } else { Ok(()) } }
        });
        let fleet = Fleet::builder().contexts(8).iterations(50).seed(9).build();

        let tally = fleet.run(table(), executor).await.unwrap();
        assert_eq!(tally.failures()[0], 0);
        assert_eq!(tally.failures()[1], tally.counts()[1]);
        assert_eq!(tally.total(), 400);
    }

    #[tokio::test]
    async fn same_seed_same_tally() {
        let fleet = Fleet::builder().contexts(16).iterations(50).seed(42).build();
        let first = fleet.run(table(), noop()).await.unwrap();
        let second = fleet.run(table(), noop()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn broken_source_aborts_the_run() {
        let (plan, _tx) = context_plan(5, DrawPolicy::Strict);
        let handles = spawn_contexts(plan, 3, |_| Broken, table(), noop());

        let err = collect_tallies(handles, 2).await.unwrap_err();
        assert_eq!(err, ConfigError::DrawOutOfRange { draw: 8.0, total: 4.0 });
    }

    #[tokio::test]
    async fn clamped_broken_source_keeps_running() {
        let (plan, _tx) = context_plan(5, DrawPolicy::Clamp);
        let handles = spawn_contexts(plan, 3, |_| Broken, table(), noop());

        let tally = collect_tallies(handles, 2).await.unwrap();
        assert_eq!(tally.counts(), &[0, 15]);
    }

    #[tokio::test]
    async fn one_broken_context_fails_the_merge() {
        let (plan, _tx) = context_plan(5, DrawPolicy::Strict);
        let mut handles = spawn_contexts(plan.clone(), 2, SeededSource::new, table(), noop());
        handles.extend(spawn_contexts(plan, 1, |_| Broken, table(), noop()));

        assert!(collect_tallies(handles, 2).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_contexts() {
        let started = Arc::new(AtomicUsize::new(0));
        let executor = {
            let started = started.clone();
            Arc::new(move |_: &u8| {
                started.fetch_add(1, Ordering::Relaxed);
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            })
        };
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        });

        let fleet = Fleet::builder().contexts(8).iterations(1_000).seed(3).build();
        let tally = fleet.run_until(table(), executor, rx).await.unwrap();

        // every context started one action and none finished it
        assert_eq!(started.load(Ordering::Relaxed), 8);
        assert_eq!(tally.total(), 0);
    }
}
