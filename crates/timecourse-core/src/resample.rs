//! Midpoint upsampling from interval `T` to `T / 2`.
//!
//! For an input of `N` timepoints the output has exactly `2N - 1`:
//!
//! ```text
//! input : x0      x1      x2
//! output: x0  m01  x1  m12  x2
//! ```
//!
//! - Even output rows are the original samples, bit-for-bit.
//! - Odd output rows are midpoints of their two neighbours. Missing values
//!   are left out of the mean: one missing side yields the other side's
//!   value, two missing sides yield a missing midpoint.
//! - Nothing is extrapolated past either end. A trailing sample with no right
//!   neighbour (odd or even `N` alike) is kept once and gets no midpoint.

use snafu::prelude::*;

use crate::table::{Channel, TimeSeriesTable};

/// Errors from [`resample`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResampleError {
    /// Interpolation needs at least one adjacent pair.
    #[snafu(display("Cannot resample a table with {n_timepoints} timepoint(s); need at least 2"))]
    TooFewTimepoints {
        /// Timepoint count of the rejected table.
        n_timepoints: usize,
    },

    /// The table has no channels to resample.
    #[snafu(display("Cannot resample a table with no channels"))]
    NoChannels,
}

/// Output of [`resample`]: a table at half the source interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledTable {
    table: TimeSeriesTable,
    source_timepoints: usize,
}

impl ResampledTable {
    /// The resampled values.
    pub fn table(&self) -> &TimeSeriesTable {
        &self.table
    }

    /// Take the resampled values, dropping the provenance.
    pub fn into_table(self) -> TimeSeriesTable {
        self.table
    }

    /// Timepoint count of the table this was produced from.
    pub fn source_timepoints(&self) -> usize {
        self.source_timepoints
    }

    /// Whether output row `timepoint` is an original sample (as opposed to
    /// an inserted midpoint).
    pub fn is_source_timepoint(&self, timepoint: usize) -> bool {
        timepoint % 2 == 0
    }

    /// Map an output row back to its source timepoint, if it is one.
    pub fn source_index(&self, timepoint: usize) -> Option<usize> {
        (timepoint < self.table.n_timepoints() && self.is_source_timepoint(timepoint))
            .then_some(timepoint / 2)
    }
}

/// Mean of two possibly-missing samples, ignoring whichever is missing.
fn midpoint(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let sum = a + b;
            // Halve first when the sum leaves the finite range.
            Some(if sum.is_finite() { sum / 2.0 } else { a / 2.0 + b / 2.0 })
        }
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn interleave_midpoints(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity((values.len() * 2).saturating_sub(1));
    if let Some(first) = values.first() {
        out.push(*first);
    }
    for pair in values.windows(2) {
        out.push(midpoint(pair[0], pair[1]));
        out.push(pair[1]);
    }
    out
}

/// Upsample `table` to half its sampling interval by inserting one
/// midpoint between every pair of adjacent timepoints.
///
/// Channel names and column order are preserved; the input is not modified.
/// Feeding a [`ResampledTable`]'s table back in is valid and yields
/// `2 * (2N - 1) - 1` rows.
pub fn resample(table: &TimeSeriesTable) -> Result<ResampledTable, ResampleError> {
    ensure!(table.n_channels() > 0, NoChannelsSnafu);
    ensure!(
        table.n_timepoints() >= 2,
        TooFewTimepointsSnafu {
            n_timepoints: table.n_timepoints(),
        }
    );

    let channels = table
        .channels()
        .iter()
        .map(|ch| Channel::new(ch.name(), interleave_midpoints(ch.values())))
        .collect();

    // Lengths and names carry over from an already-validated table.
    let out = TimeSeriesTable::from_validated(channels, table.n_timepoints() * 2 - 1)
        .with_interval_unchecked(table.sampling_interval().map(|s| s / 2.0));

    Ok(ResampledTable {
        table: out,
        source_timepoints: table.n_timepoints(),
    })
}
