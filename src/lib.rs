//! Switchyard: the weighted random branch of a load-generation scenario.
//!
//! When a virtual user reaches a weighted switch, one of several action chains
//! must be picked in proportion to its weight. At load-testing volumes that
//! decision is taken millions of times per second from thousands of concurrent
//! contexts, so it has to be cheap, contention free and statistically exact.
//! This crate is that decision and nothing else: building the scenario and
//! running the chosen chain are left to the surrounding engine.
//!
//! # Architecture
//!
//! The main building blocks, leaf to root:
//!
//! - [`WeightTable`]: validated `(weight, action)` options plus their cumulative
//!   weights. Built once when the scenario is compiled, then shared read-only.
//! - [`Selector`]: maps a draw in `[0, total)` to an option with a binary search
//!   over the cumulative weights. Pure and O(log n).
//! - [`RandomSource`]: a per-context stream of draws. [`SeedSequence`] hands out
//!   independent, reproducible [`SeededSource`]s, one per context.
//! - [`BranchRunner`]: draw, select, then hand the chosen action to an
//!   [`Executor`] and return whatever it produces.
//! - [`Fleet`]: many concurrent contexts running the same branch, for
//!   simulations and for checking the observed mix against the weights.
//!   Executor outputs implementing [`Outcome`] are tallied as successes or
//!   failures per option.
//!
//! # Design goals
//!
//! - Misconfigured switches fail when the scenario is built, never mid-run.
//! - No shared mutable state: the table is immutable and every context owns
//!   its random stream, so nothing needs a lock.
//! - Every run can be replayed from a single master seed.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use switchyard::{Fleet, WeightTable};
//!
//! #[tokio::main]
//! async fn main() {
//!     let table = WeightTable::build(vec![(1.0, "browse"), (3.0, "checkout")]).unwrap();
//!
//!     let tally = Fleet::builder()
//!         .contexts(100)
//!         .iterations(100)
//!         .seed(2024)
//!         .build()
//!         .run(Arc::new(table), Arc::new(|_: &&str| async {}))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(tally.total(), 10_000);
//! }
//! ```
//!
//! # Where to start
//!
//! - Read the docs for [`WeightTable`], [`BranchRunner`] and [`Executor`].
//! - See `demos/checkout_mix.rs` for a runnable scenario.

/// Error types
pub mod error;
/// Concurrent execution contexts
pub mod fleet;
/// Per-context random streams
pub mod random;
/// Branch execution
pub mod runner;
/// Inverse-CDF selection
pub mod selector;
/// Validated weighted options
pub mod table;

pub use error::{ConfigError, RunError};
pub use fleet::{BranchTally, Fleet, Outcome};
pub use random::{RandomSource, SeedSequence, SeededSource, ThreadLocalSource};
pub use runner::{BranchPhase, BranchRunner, Executor};
pub use selector::{DrawPolicy, Selector};
pub use table::{WeightTable, WeightedOption};
