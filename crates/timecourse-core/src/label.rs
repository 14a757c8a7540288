//! Source labels parsed from input file names.
//!
//! Inputs are named `<prefix>-<label>_<suffix>`; outputs reuse the label as
//! `<prefix>-<label>.tsv`. Parsing is strict: a file name that lacks either
//! marker is an error rather than a silently wrong label.

use std::{fmt, path::Path};

use snafu::prelude::*;

/// Errors from [`LabelPattern::parse`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LabelError {
    /// Path has no final component, or it is not valid UTF-8.
    #[snafu(display("Cannot read a file name from {path}"))]
    NoFileName {
        /// Offending path.
        path: String,
    },

    /// The `<prefix>-` marker does not occur in the file name.
    #[snafu(display("File name '{file_name}' does not contain the prefix marker '{marker}'"))]
    PrefixMissing {
        /// File name that was inspected.
        file_name: String,
        /// Marker that was expected.
        marker: String,
    },

    /// The file name does not end with the `_<suffix>` marker.
    #[snafu(display("File name '{file_name}' does not end with the suffix marker '{marker}'"))]
    SuffixMissing {
        /// File name that was inspected.
        file_name: String,
        /// Marker that was expected.
        marker: String,
    },

    /// Both markers are present but nothing lies between them.
    #[snafu(display("File name '{file_name}' has an empty label between its markers"))]
    EmptyLabel {
        /// File name that was inspected.
        file_name: String,
    },
}

/// A validated, non-empty label extracted from a source file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLabel(String);

impl SourceLabel {
    /// Borrow the label text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed prefix/suffix markers around the label in source file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPattern {
    /// Text before `-<label>`.
    pub prefix: String,
    /// Text after `<label>_`, usually ending in the file extension.
    pub suffix: String,
}

impl Default for LabelPattern {
    fn default() -> Self {
        Self {
            prefix: "timecourses".to_string(),
            suffix: "timeseries.csv".to_string(),
        }
    }
}

impl LabelPattern {
    /// Build a pattern from its two markers.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    fn prefix_marker(&self) -> String {
        format!("{}-", self.prefix)
    }

    fn suffix_marker(&self) -> String {
        format!("_{}", self.suffix)
    }

    /// Whether a file name ends with this pattern's suffix marker.
    pub fn matches_suffix(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.suffix_marker())
    }

    /// Extract the label from `path`'s file name.
    ///
    /// The label is the text between the first prefix marker and the suffix
    /// marker, which must end the file name.
    pub fn parse(&self, path: &Path) -> Result<SourceLabel, LabelError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context(NoFileNameSnafu {
                path: path.display().to_string(),
            })?;

        let prefix = self.prefix_marker();
        let suffix = self.suffix_marker();

        let start = file_name
            .find(&prefix)
            .map(|i| i + prefix.len())
            .context(PrefixMissingSnafu {
                file_name,
                marker: prefix.clone(),
            })?;

        let label = file_name[start..]
            .strip_suffix(&suffix)
            .context(SuffixMissingSnafu {
                file_name,
                marker: suffix.clone(),
            })?;
        ensure!(!label.is_empty(), EmptyLabelSnafu { file_name });

        Ok(SourceLabel(label.to_string()))
    }

    /// Output file name for `label`: `<prefix>-<label>.tsv`.
    pub fn output_file_name(&self, label: &SourceLabel) -> String {
        format!("{}-{}.tsv", self.prefix, label)
    }
}
