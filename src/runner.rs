//! Running a weighted branch inside one execution context.
//!
//! A [`BranchRunner`] is the glue between the pure parts of the crate and
//! the action-chain engine that lives outside of it. Each call walks the same
//! short sequence:
//!
//! ```text
//! Idle -> Drawing -> Selecting -> Executing -> Done
//! ```
//!
//! 1. draw once from the context's [`RandomSource`], scaled to the table total,
//! 2. map the draw to an option with the [`Selector`],
//! 3. hand the option's action to the [`Executor`] and return its output as is.
//!
//! The runner keeps no state between calls, so a single runner can serve any
//! number of concurrent contexts as long as each brings its own source.
//!
//! # Failures and cancellation
//! - Executor failures are part of `Executor::Output` and are never inspected,
//!   retried or re-selected here.
//! - Dropping the future returned by any `run*` method drops the executor's
//!   future with it. [`BranchRunner::run_until`] does the same when a shutdown
//!   flag flips and reports [`RunError::Cancelled`].

use std::future::{Future, pending};

use tokio::sync::watch::Receiver;
use typed_builder::TypedBuilder;

use crate::{
    error::{ConfigError, RunError},
    random::RandomSource,
    selector::{DrawPolicy, Selector},
    table::WeightTable,
};

/// The action-chain engine that runs whatever a branch selects.
///
/// Closures of the form `Fn(&A) -> impl Future` implement it directly, the
/// same way a scenario action is a plain `Fn() -> impl Future`.
///
/// # Example
/// ```rust
/// use switchyard::{BranchRunner, SeededSource, WeightTable};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let table = WeightTable::build(vec![(1.0, "home"), (3.0, "search")]).unwrap();
/// let executor = |page: &&str| {
///     let page = page.to_string();
///     async move { format!("GET /{page}") }
/// };
///
/// let request = BranchRunner::default()
///     .run(&table, &mut SeededSource::new(7), &executor)
///     .await
///     .unwrap();
/// assert!(request.starts_with("GET /"));
/// # });
/// ```
pub trait Executor<A>: Send + Sync {
    /// Whatever running an action produces, failures included.
    type Output: Send;

    fn execute(&self, action: &A) -> impl Future<Output = Self::Output> + Send;
}

impl<A, F, Fut> Executor<A> for F
where
    F: Fn(&A) -> Fut + Send + Sync,
    Fut: Future + Send,
    Fut::Output: Send,
{
    type Output = Fut::Output;

    fn execute(&self, action: &A) -> impl Future<Output = Self::Output> + Send {
        self(action)
    }
}

/// Where a branch invocation currently is. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchPhase {
    Idle,
    Drawing,
    Selecting,
    Executing,
    Done,
}

/// Draws, selects and executes one option of a [`WeightTable`] per call.
#[derive(Debug, Clone, TypedBuilder)]
pub struct BranchRunner {
    /// Name used in traces, usually the name of the switch in the scenario.
    #[builder(default = String::from("random_switch"), setter(into))]
    pub name: String,
    #[builder(default)]
    pub policy: DrawPolicy,
}

impl Default for BranchRunner {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BranchRunner {
    fn phase(&self, phase: BranchPhase) {
        tracing::trace!(branch = %self.name, ?phase);
    }

    /// Draw from `source` and return the index of the selected option,
    /// without executing anything.
    pub fn select_next<A, S>(
        &self,
        table: &WeightTable<A>,
        source: &mut S,
    ) -> Result<usize, ConfigError>
    where
        S: RandomSource + ?Sized,
    {
        self.phase(BranchPhase::Drawing);
        let draw = source.next(table.total());

        self.phase(BranchPhase::Selecting);
        Selector::new(self.policy)
            .select(table, draw)
            .inspect_err(|e| tracing::error!(branch = %self.name, "Broken random source: {e}"))
    }

    /// Run the branch once and return the selected index with the executor's output.
    pub async fn run_indexed<A, S, X>(
        &self,
        table: &WeightTable<A>,
        source: &mut S,
        executor: &X,
    ) -> Result<(usize, X::Output), ConfigError>
    where
        S: RandomSource + ?Sized,
        X: Executor<A>,
    {
        self.phase(BranchPhase::Idle);
        let index = self.select_next(table, source)?;

        self.phase(BranchPhase::Executing);
        let output = executor.execute(&table.options()[index].action).await;

        self.phase(BranchPhase::Done);
        Ok((index, output))
    }

    /// Run the branch once and return the executor's output unchanged.
    ///
    /// # Errors
    /// Only [`ConfigError::DrawOutOfRange`], and only under [`DrawPolicy::Strict`].
    pub async fn run<A, S, X>(
        &self,
        table: &WeightTable<A>,
        source: &mut S,
        executor: &X,
    ) -> Result<X::Output, ConfigError>
    where
        S: RandomSource + ?Sized,
        X: Executor<A>,
    {
        self.run_indexed(table, source, executor)
            .await
            .map(|(_, output)| output)
    }

    /// Like [`BranchRunner::run`], but gives up as soon as `shutdown` holds `true`.
    ///
    /// A context that is already shut down draws nothing. A shutdown that
    /// arrives while the action runs drops the executor's future. A dropped
    /// shutdown sender never cancels.
    pub async fn run_until<A, S, X>(
        &self,
        table: &WeightTable<A>,
        source: &mut S,
        executor: &X,
        shutdown: &mut Receiver<bool>,
    ) -> Result<X::Output, RunError>
    where
        S: RandomSource + ?Sized,
        X: Executor<A>,
    {
        self.run_until_indexed(table, source, executor, shutdown)
            .await
            .map(|(_, output)| output)
    }

    /// [`BranchRunner::run_until`] that also reports the selected index.
    pub async fn run_until_indexed<A, S, X>(
        &self,
        table: &WeightTable<A>,
        source: &mut S,
        executor: &X,
        shutdown: &mut Receiver<bool>,
    ) -> Result<(usize, X::Output), RunError>
    where
        S: RandomSource + ?Sized,
        X: Executor<A>,
    {
        if *shutdown.borrow() {
            return Err(RunError::Cancelled);
        }

        self.phase(BranchPhase::Idle);
        let index = self.select_next(table, source)?;

        self.phase(BranchPhase::Executing);
        let cancelled = async {
            let stopped = shutdown.wait_for(|stop| *stop).await.is_ok();
            if !stopped {
                pending::<()>().await;
            }
        };

        tokio::select! {
            output = executor.execute(&table.options()[index].action) => {
                self.phase(BranchPhase::Done);
                Ok((index, output))
            }
            _ = cancelled => {
                tracing::debug!(branch = %self.name, index, "Branch cancelled while executing");
                Err(RunError::Cancelled)
            }
        }
    }
}
