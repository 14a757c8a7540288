//! Batch resampling over a set of source files.
//!
//! [`process_sources`] runs each source through load → resample → write and
//! returns one [`SourceRecord`] per source. It keeps no shared state between
//! sources; QA reporting is a separate pass over the returned records.
//!
//! Labels for every source are parsed before any table is read, so a
//! mislabeled file stops the batch before any output is written. After
//! that, the first load, resample or write failure aborts the batch and
//! names the source it came from.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use snafu::prelude::*;
use tracing::{debug, info};

use crate::{
    io::{LoadOptions, TableIoError, load_table, write_table},
    label::{LabelError, LabelPattern, SourceLabel},
    resample::{ResampleError, ResampledTable, resample},
    table::{TableError, TimeSeriesTable},
};

/// Errors from [`process_sources`] and its helpers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BatchError {
    /// No input files were given or found.
    #[snafu(display("No input files to process"))]
    NoInputs,

    /// A directory input could not be listed.
    #[snafu(display("Failed to list input directory {path}"))]
    ListInputDir {
        /// Directory being listed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A source file name does not carry a valid label.
    #[snafu(display("Cannot label source {path}: {source}"))]
    Label {
        /// Source path.
        path: String,
        /// Underlying label error.
        source: LabelError,
    },

    /// Two sources map to the same label, and therefore the same output.
    #[snafu(display("Sources {first} and {second} share the label '{label}'"))]
    DuplicateLabel {
        /// Label both sources produced.
        label: String,
        /// First source with this label.
        first: String,
        /// Second source with this label.
        second: String,
    },

    /// Loading or writing a table failed.
    #[snafu(display("Failed to process source {path}: {source}"))]
    TableIo {
        /// Source path.
        path: String,
        /// Underlying I/O error.
        source: TableIoError,
    },

    /// The loaded table could not be resampled.
    #[snafu(display("Failed to resample source {path}: {source}"))]
    Resample {
        /// Source path.
        path: String,
        /// Underlying resample error.
        source: ResampleError,
    },

    /// The configured sampling interval was rejected.
    #[snafu(display("Invalid sampling interval for source {path}: {source}"))]
    Interval {
        /// Source path.
        path: String,
        /// Underlying table error.
        source: TableError,
    },

    /// The output directory could not be inspected or created.
    #[snafu(display("Failed to prepare output directory {path}"))]
    OutputDir {
        /// Output directory.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// What to do when the output directory already holds files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputDirPolicy {
    /// Write into the directory, replacing same-named outputs.
    Overwrite,
    /// Leave a non-empty directory alone and write into a fresh,
    /// timestamped sibling instead.
    #[default]
    Timestamped,
}

/// Inputs and settings for one batch run.
#[derive(Debug, Clone)]
pub struct ResampleJob {
    /// Source files, or directories to expand (see [`expand_inputs`]).
    pub inputs: Vec<PathBuf>,
    /// Directory the resampled tables are written to.
    pub output_dir: PathBuf,
    /// Handling of an existing, non-empty `output_dir`.
    pub output_policy: OutputDirPolicy,
    /// Label markers for source file names.
    pub pattern: LabelPattern,
    /// Loader settings.
    pub load: LoadOptions,
    /// Source sampling interval (TR) in seconds, if known.
    pub sampling_interval: Option<f64>,
}

/// Result of processing one source.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// Label parsed from the source file name.
    pub label: SourceLabel,
    /// Source file.
    pub source: PathBuf,
    /// Written output file.
    pub output: PathBuf,
    /// Table as loaded.
    pub original: TimeSeriesTable,
    /// Table after resampling.
    pub resampled: ResampledTable,
}

/// Expand directory inputs into the sorted files inside them whose names end
/// with the pattern's suffix marker. File inputs pass through unchanged.
pub fn expand_inputs(
    inputs: &[PathBuf],
    pattern: &LabelPattern,
) -> Result<Vec<PathBuf>, BatchError> {
    let mut out = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            out.push(input.clone());
            continue;
        }

        let entries = std::fs::read_dir(input).context(ListInputDirSnafu {
            path: input.display().to_string(),
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.context(ListInputDirSnafu {
                path: input.display().to_string(),
            })?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| pattern.matches_suffix(n));
            if path.is_file() && matches {
                found.push(path);
            }
        }
        found.sort();
        debug!(dir = %input.display(), files = found.len(), "expanded input directory");
        out.extend(found);
    }
    Ok(out)
}

fn dir_is_empty(dir: &Path) -> std::io::Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

/// Pick and create the directory outputs go to, per `policy`.
pub fn resolve_output_dir(
    requested: &Path,
    policy: OutputDirPolicy,
    now: DateTime<Local>,
) -> Result<PathBuf, BatchError> {
    let occupied = requested.is_dir()
        && !dir_is_empty(requested).context(OutputDirSnafu {
            path: requested.display().to_string(),
        })?;

    if policy == OutputDirPolicy::Overwrite || !occupied {
        std::fs::create_dir_all(requested).context(OutputDirSnafu {
            path: requested.display().to_string(),
        })?;
        return Ok(requested.to_path_buf());
    }

    let dir = create_fresh_sibling(requested, &now.format("%Y-%m-%d_%H-%M-%S").to_string())?;
    info!(
        requested = %requested.display(),
        using = %dir.display(),
        "output directory is not empty; writing to a new directory"
    );
    Ok(dir)
}

/// Create `<requested>_<stamp>`, or `<requested>_<stamp>_<n>` when earlier
/// runs already claimed that name.
fn create_fresh_sibling(requested: &Path, stamp: &str) -> Result<PathBuf, BatchError> {
    let mut attempt = 0u32;
    loop {
        let mut name = requested.as_os_str().to_os_string();
        name.push(format!("_{stamp}"));
        if attempt > 0 {
            name.push(format!("_{attempt}"));
        }
        let dir = PathBuf::from(name);

        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(dir = %dir.display(), "timestamped directory exists; trying next");
                attempt += 1;
            }
            Err(source) => {
                return Err(source).context(OutputDirSnafu {
                    path: dir.display().to_string(),
                });
            }
        }
    }
}

fn label_sources(
    sources: &[PathBuf],
    pattern: &LabelPattern,
) -> Result<Vec<(PathBuf, SourceLabel)>, BatchError> {
    let mut seen: BTreeMap<SourceLabel, &Path> = BTreeMap::new();
    let mut labeled = Vec::with_capacity(sources.len());

    for source in sources {
        let label = pattern.parse(source).context(LabelSnafu {
            path: source.display().to_string(),
        })?;
        if let Some(first) = seen.get(&label) {
            return DuplicateLabelSnafu {
                label: label.to_string(),
                first: first.display().to_string(),
                second: source.display().to_string(),
            }
            .fail();
        }
        seen.insert(label.clone(), source.as_path());
        labeled.push((source.clone(), label));
    }

    Ok(labeled)
}

fn process_one(
    source: &Path,
    label: SourceLabel,
    output_dir: &Path,
    job: &ResampleJob,
) -> Result<SourceRecord, BatchError> {
    let path = source.display().to_string();

    let mut original = load_table(source, &job.load).context(TableIoSnafu { path: &path })?;
    if let Some(tr) = job.sampling_interval {
        original = original
            .with_sampling_interval(tr)
            .context(IntervalSnafu { path: &path })?;
    }

    let resampled = resample(&original).context(ResampleSnafu { path: &path })?;

    let output = output_dir.join(job.pattern.output_file_name(&label));
    write_table(resampled.table(), &output).context(TableIoSnafu { path: &path })?;

    info!(
        source = %path,
        label = %label,
        timepoints_in = original.n_timepoints(),
        timepoints_out = resampled.table().n_timepoints(),
        channels = original.n_channels(),
        "resampled source"
    );

    Ok(SourceRecord {
        label,
        source: source.to_path_buf(),
        output,
        original,
        resampled,
    })
}

/// Load, resample and write every source in `job`.
pub fn process_sources(job: &ResampleJob) -> Result<Vec<SourceRecord>, BatchError> {
    let sources = expand_inputs(&job.inputs, &job.pattern)?;
    ensure!(!sources.is_empty(), NoInputsSnafu);

    let labeled = label_sources(&sources, &job.pattern)?;
    let output_dir = resolve_output_dir(&job.output_dir, job.output_policy, Local::now())?;

    labeled
        .into_iter()
        .map(|(source, label)| process_one(&source, label, &output_dir, job))
        .collect()
}
