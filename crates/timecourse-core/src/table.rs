//! Column-oriented time-series tables of named ROI channels.
//!
//! A [`TimeSeriesTable`] is an ordered set of [`Channel`]s sharing a single,
//! implicit timepoint axis:
//!
//! - Timepoints are 0-based, contiguous positions; there is no stored index
//!   column. Gaps in a recording show up as missing channels, never as
//!   missing rows.
//! - Every channel holds exactly one value per timepoint. A value of `None`
//!   marks a missing sample (NaN is normalised to `None` on construction).
//! - Channel names are unique within a table.
//!
//! Tables are immutable once built; transforms such as
//! [`crate::resample::resample`] produce new tables.

use std::collections::HashSet;

use snafu::prelude::*;

/// Errors raised while assembling a table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// Two channels share a name.
    #[snafu(display("Duplicate channel name '{name}'"))]
    DuplicateChannel {
        /// The repeated channel name.
        name: String,
    },

    /// A channel's length differs from the first channel's length.
    #[snafu(display(
        "Channel '{name}' has {actual} values, expected {expected} (one per timepoint)"
    ))]
    RaggedChannel {
        /// Channel whose length is off.
        name: String,
        /// Timepoint count established by the first channel.
        expected: usize,
        /// Length of the offending channel.
        actual: usize,
    },

    /// A sampling interval must be finite and strictly positive.
    #[snafu(display("Invalid sampling interval {seconds}s (expected a positive number)"))]
    InvalidInterval {
        /// Rejected interval, in seconds.
        seconds: f64,
    },
}

/// A named scalar signal column.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    values: Vec<Option<f64>>,
}

impl Channel {
    /// Build a channel; NaN samples are stored as missing.
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()))
            .collect();
        Self {
            name: name.into(),
            values,
        }
    }

    /// Convenience constructor for fully observed data.
    pub fn from_values(name: impl Into<String>, values: &[f64]) -> Self {
        Self::new(name, values.iter().copied().map(Some).collect())
    }

    /// Channel identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Samples in timepoint order.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the channel has no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Count of missing samples.
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Uniformly sampled table of ROI channels.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesTable {
    channels: Vec<Channel>,
    n_timepoints: usize,
    /// Sampling interval (TR) in seconds, when known.
    sampling_interval: Option<f64>,
}

impl TimeSeriesTable {
    /// Build a table from channels, validating name uniqueness and that all
    /// channels have the same length.
    pub fn new(channels: Vec<Channel>) -> Result<Self, TableError> {
        let n_timepoints = channels.first().map(Channel::len).unwrap_or(0);

        let mut seen = HashSet::with_capacity(channels.len());
        for ch in &channels {
            ensure!(
                seen.insert(ch.name()),
                DuplicateChannelSnafu {
                    name: ch.name().to_string(),
                }
            );
            ensure!(
                ch.len() == n_timepoints,
                RaggedChannelSnafu {
                    name: ch.name().to_string(),
                    expected: n_timepoints,
                    actual: ch.len(),
                }
            );
        }

        Ok(Self {
            channels,
            n_timepoints,
            sampling_interval: None,
        })
    }

    /// Attach a sampling interval (TR) in seconds.
    pub fn with_sampling_interval(mut self, seconds: f64) -> Result<Self, TableError> {
        ensure!(
            seconds.is_finite() && seconds > 0.0,
            InvalidIntervalSnafu { seconds }
        );
        self.sampling_interval = Some(seconds);
        Ok(self)
    }

    /// Caller guarantees unique names and `n_timepoints` values per channel.
    pub(crate) fn from_validated(channels: Vec<Channel>, n_timepoints: usize) -> Self {
        debug_assert!(channels.iter().all(|c| c.len() == n_timepoints));
        Self {
            channels,
            n_timepoints,
            sampling_interval: None,
        }
    }

    pub(crate) fn with_interval_unchecked(mut self, seconds: Option<f64>) -> Self {
        self.sampling_interval = seconds;
        self
    }

    /// Channels in column order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Channel names in column order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(Channel::name)
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name() == name)
    }

    /// Number of timepoints (rows).
    pub fn n_timepoints(&self) -> usize {
        self.n_timepoints
    }

    /// Number of channels (columns).
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Sampling interval (TR) in seconds, if known.
    pub fn sampling_interval(&self) -> Option<f64> {
        self.sampling_interval
    }

    /// Values of every channel at `timepoint`, in column order.
    pub fn row(&self, timepoint: usize) -> Option<Vec<Option<f64>>> {
        if timepoint >= self.n_timepoints {
            return None;
        }
        Some(self.channels.iter().map(|c| c.values[timepoint]).collect())
    }
}
