//! Weight tables: the immutable, validated form of a weighted switch.
//!
//! A [`WeightTable`] is built once, when the scenario is compiled, and then
//! shared read-only by every execution context that reaches the branch. It
//! stores the options in the order they were declared together with the
//! prefix sums of their weights, which is what makes O(log n) selection
//! possible (see [`crate::Selector`]).
//!
//! ```text
//! options     (1, A)  (3, B)  (6, C)
//! cumulative    1       4      10
//! total        10
//! ```

use crate::error::{ConfigError, Result};

/// Percentage sums are compared against 100 with this slack to absorb
/// floating point error from inputs like `33.3 + 33.3 + 33.4`.
const PERCENT_EPSILON: f64 = 1e-9;

/// A weight paired with the action it routes to.
///
/// The action is opaque to this crate: it is only ever handed back to an
/// [`crate::Executor`].
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedOption<A> {
    pub weight: f64,
    pub action: A,
}

impl<A> WeightedOption<A> {
    pub fn new(weight: f64, action: A) -> Self {
        Self { weight, action }
    }
}

impl<A> From<(f64, A)> for WeightedOption<A> {
    fn from((weight, action): (f64, A)) -> Self {
        Self::new(weight, action)
    }
}

/// Validated options plus their cumulative weights.
///
/// Invariants, established by every constructor:
/// - at least one option;
/// - every weight is finite and `> 0`;
/// - `cumulative` is non-decreasing, has one entry per option and ends at `total`;
/// - `total` is finite and `> 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable<A> {
    options: Vec<WeightedOption<A>>,
    cumulative: Vec<f64>,
    total: f64,
}

impl<A> WeightTable<A> {
    /// Validate `options` and precompute their cumulative weights.
    ///
    /// Declaration order is preserved. It has no effect on the probability of
    /// each option, only on which option owns which slice of `[0, total)`.
    ///
    /// # Errors
    /// - [`ConfigError::EmptyOptions`] when no option is given.
    /// - [`ConfigError::NonPositiveWeight`] for the first weight that is `<= 0`,
    ///   NaN or infinite.
    /// - [`ConfigError::NonFiniteTotal`] when the weights overflow on summation.
    pub fn build<I, O>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = O>,
        O: Into<WeightedOption<A>>,
    {
        let options: Vec<WeightedOption<A>> = options.into_iter().map(Into::into).collect();
        if options.is_empty() {
            return Err(ConfigError::EmptyOptions);
        }

        let mut cumulative = Vec::with_capacity(options.len());
        let mut total = 0.0;
        for (index, option) in options.iter().enumerate() {
            check_weight(index, option.weight)?;
            total += option.weight;
            cumulative.push(total);
        }

        if !total.is_finite() {
            return Err(ConfigError::NonFiniteTotal { total });
        }

        Ok(Self {
            options,
            cumulative,
            total,
        })
    }

    /// Every action gets the same weight.
    pub fn uniform<I>(actions: I) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
    {
        Self::build(actions.into_iter().map(|action| WeightedOption::new(1.0, action)))
    }

    /// Build a switch from percentages, routing whatever is left up to 100
    /// to `fallback`.
    ///
    /// The fallback is only added when the remainder is positive, so
    /// percentages that already add up to 100 never select it.
    ///
    /// # Errors
    /// Same as [`WeightTable::build`], plus [`ConfigError::PercentagesExceed`]
    /// when the percentages add up to more than 100.
    pub fn with_fallback<I, O>(percentages: I, fallback: A) -> Result<Self>
    where
        I: IntoIterator<Item = O>,
        O: Into<WeightedOption<A>>,
    {
        let mut options: Vec<WeightedOption<A>> =
            percentages.into_iter().map(Into::into).collect();

        let mut sum = 0.0;
        for (index, option) in options.iter().enumerate() {
            check_weight(index, option.weight)?;
            sum += option.weight;
        }
        if sum > 100.0 + PERCENT_EPSILON {
            return Err(ConfigError::PercentagesExceed { total: sum });
        }

        let remainder = 100.0 - sum;
        if remainder > PERCENT_EPSILON {
            options.push(WeightedOption::new(remainder, fallback));
        }

        Self::build(options)
    }

    pub fn options(&self) -> &[WeightedOption<A>] {
        &self.options
    }

    /// Prefix sums of the weights, one per option.
    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Always `false`; kept for parity with `len`.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn action(&self, index: usize) -> Option<&A> {
        self.options.get(index).map(|o| &o.action)
    }

    /// Selection probability of each option, in declaration order.
    pub fn probabilities(&self) -> Vec<f64> {
        self.options
            .iter()
            .map(|o| o.weight / self.total)
            .collect()
    }
}

impl<A> TryFrom<Vec<(f64, A)>> for WeightTable<A> {
    type Error = ConfigError;

    fn try_from(value: Vec<(f64, A)>) -> Result<Self> {
        Self::build(value)
    }
}

fn check_weight(index: usize, weight: f64) -> Result<()> {
    // `!(w > 0)` also rejects NaN
    if !(weight > 0.0) || !weight.is_finite() {
        return Err(ConfigError::NonPositiveWeight { index, weight });
    }
    Ok(())
}
