//! Core library for ROI timecourse resampling and subject-level pipeline runs.
//!
//! This crate provides the pieces used by the `tcourse` CLI:
//!
//! - An immutable, column-oriented [`TimeSeriesTable`] of named channels
//!   (`table` module).
//! - The midpoint resampler that takes a table sampled at interval `T` to one
//!   sampled at `T / 2` (`resample` module).
//! - A strict file-name label parser that refuses to guess when the expected
//!   markers are absent (`label` module).
//! - Delimited-file loading and TSV writing on top of `arrow-csv` (`io` module).
//! - Batch processing that returns one record per source, leaving reporting
//!   to the caller (`batch` module).
//! - A sequential runner around an external, containerized anatomical
//!   pipeline with explicit per-subject outcomes (`pipeline` module).
//! - TOML configuration shared by both workflows (`config` module).
#![deny(missing_docs)]
pub mod batch;
pub mod config;
pub mod io;
pub mod label;
pub mod pipeline;
pub mod resample;
pub mod table;

pub use batch::{BatchError, OutputDirPolicy, ResampleJob, SourceRecord, process_sources};
pub use config::{Config, ConfigError, PipelineConfig, ResampleConfig};
pub use io::{LoadOptions, TableIoError, load_table, write_table};
pub use label::{LabelError, LabelPattern, SourceLabel};
pub use pipeline::{
    PipelineError, SubjectError, SubjectOutcome, SubjectPipelineRunner, parse_subject_list,
    read_subject_list,
};
pub use resample::{ResampleError, ResampledTable, resample};
pub use table::{Channel, TableError, TimeSeriesTable};
