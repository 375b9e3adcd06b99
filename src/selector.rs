//! Inverse-CDF selection over a [`WeightTable`].
//!
//! Selection is a pure function of `(table, draw)`: all randomness lives in
//! how the draw is produced. For a draw `d` in `[0, total)` the selector
//! returns the smallest index `i` with `cumulative[i] > d`, found by binary
//! search, so the cost is O(log n) and the table is only ever read.

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    table::WeightTable,
};

/// What to do with a draw outside `[0, total)`.
///
/// Such a draw can only come from a broken [`crate::RandomSource`] or from
/// floating point landing exactly on `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawPolicy {
    /// Fail with [`ConfigError::DrawOutOfRange`].
    Strict,
    /// NaN and negative draws pick the first option, draws `>= total` the last.
    Clamp,
}

impl Default for DrawPolicy {
    /// `Strict` in debug builds, `Clamp` in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Clamp
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selector {
    policy: DrawPolicy,
}

impl Selector {
    pub fn new(policy: DrawPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DrawPolicy {
        self.policy
    }

    /// Index of the option that owns `draw`.
    ///
    /// # Errors
    /// [`ConfigError::DrawOutOfRange`] under [`DrawPolicy::Strict`] when `draw`
    /// is NaN, negative or `>= table.total()`.
    pub fn select<A>(&self, table: &WeightTable<A>, draw: f64) -> Result<usize> {
        let total = table.total();
        // NaN fails both comparisons
        let in_range = draw >= 0.0 && draw < total;

        if !in_range {
            return match self.policy {
                DrawPolicy::Strict => Err(ConfigError::DrawOutOfRange { draw, total }),
                DrawPolicy::Clamp if draw >= total => Ok(table.len() - 1),
                DrawPolicy::Clamp => Ok(0),
            };
        }

        // cumulative ends at total > draw, so the partition point is in bounds
        Ok(table.cumulative().partition_point(|&c| c <= draw))
    }
}
