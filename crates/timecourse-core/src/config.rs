//! TOML configuration shared by the resampling and subject-pipeline workflows.
//!
//! ```toml
//! [resample]
//! prefix = "timecourses"
//! suffix = "timeseries.csv"
//! delimiter = ","
//! index_columns = ["timepoint", "index"]
//! tr = 2.0
//!
//! [pipeline]
//! project_root = "/projects/lab"
//! program = "singularity"
//! prefix_args = ["run", "--cleanenv", "/containers/fmriprep.sif"]
//! bids_dir = "/projects/lab/data/BIDS"
//! output_dir = "/projects/lab/data/derivatives"
//! log_dir = "/projects/lab/data/derivatives/logs"
//! summary_dir = "/projects/lab/data/derivatives/summaries"
//! marker = "/projects/lab/data/derivatives/sub-{subject}.html"
//! artifacts = ["/projects/lab/data/derivatives/sub-{subject}.html"]
//! nthreads = 8
//! omp_nthreads = 4
//! output_space = "MNI152NLin2009cAsym:res-2"
//! ```
//!
//! Every `[resample]` key is optional. The `[pipeline]` table is only needed
//! by `run-subjects`; inside it the paths and `program` are required.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::prelude::*;

use crate::{io::LoadOptions, label::LabelPattern};

/// Placeholder substituted with the subject identifier in path templates.
pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Errors from loading a configuration file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("Failed to read config file {path}"))]
    ReadConfig {
        /// Config path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`Config`].
    #[snafu(display("Failed to parse config file {path}: {source}"))]
    ParseConfig {
        /// Config path.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A delimiter must be exactly one ASCII character.
    #[snafu(display("Invalid delimiter {value:?}; expected a single ASCII character"))]
    InvalidDelimiter {
        /// Rejected delimiter text.
        value: String,
    },

    /// `run-subjects` was asked for but the file has no `[pipeline]` table.
    #[snafu(display("Config file {path} has no [pipeline] table"))]
    MissingPipeline {
        /// Config path.
        path: String,
    },
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Resampling defaults.
    #[serde(default)]
    pub resample: ResampleConfig,
    /// Subject pipeline settings.
    pub pipeline: Option<PipelineConfig>,
}

impl Config {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).context(ReadConfigSnafu {
            path: path.display().to_string(),
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).context(ParseConfigSnafu {
            path: path.display().to_string(),
        })
    }

    /// Require the `[pipeline]` table; `path` is used for the error message.
    pub fn require_pipeline(self, path: &Path) -> Result<PipelineConfig, ConfigError> {
        self.pipeline.context(MissingPipelineSnafu {
            path: path.display().to_string(),
        })
    }
}

/// `[resample]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResampleConfig {
    /// File name prefix marker.
    pub prefix: Option<String>,
    /// File name suffix marker.
    pub suffix: Option<String>,
    /// Input delimiter, a single character.
    pub delimiter: Option<String>,
    /// Extra header names treated as an index column.
    pub index_columns: Option<Vec<String>>,
    /// Source sampling interval (TR) in seconds.
    pub tr: Option<f64>,
}

/// Parse a one-character delimiter such as `","` or `"\t"`.
pub fn parse_delimiter(value: &str) -> Result<u8, ConfigError> {
    match value {
        "\\t" | "tab" => Ok(b'\t'),
        s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        _ => InvalidDelimiterSnafu { value }.fail(),
    }
}

impl ResampleConfig {
    /// Label pattern with defaults filled in.
    pub fn label_pattern(&self) -> LabelPattern {
        let default = LabelPattern::default();
        LabelPattern {
            prefix: self.prefix.clone().unwrap_or(default.prefix),
            suffix: self.suffix.clone().unwrap_or(default.suffix),
        }
    }

    /// Load options with defaults filled in.
    pub fn load_options(&self) -> Result<LoadOptions, ConfigError> {
        let mut opts = LoadOptions::default();
        if let Some(d) = &self.delimiter {
            opts.delimiter = parse_delimiter(d)?;
        }
        if let Some(cols) = &self.index_columns {
            opts.index_columns = cols.clone();
        }
        Ok(opts)
    }
}

fn default_nthreads() -> u32 {
    8
}

fn default_omp_nthreads() -> u32 {
    4
}

fn default_output_space() -> String {
    "MNI152NLin2009cAsym:res-2".to_string()
}

fn default_dir_mode() -> u32 {
    0o775
}

fn default_file_mode() -> u32 {
    0o664
}

/// `[pipeline]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// The runner refuses to start unless the working directory is inside
    /// this root.
    pub project_root: PathBuf,
    /// Executable to launch (for example a container runtime).
    pub program: String,
    /// Arguments placed between `program` and the fixed pipeline flags
    /// (for example `run <image>`).
    #[serde(default)]
    pub prefix_args: Vec<String>,
    /// BIDS input dataset.
    pub bids_dir: PathBuf,
    /// Pipeline output (derivatives) directory.
    pub output_dir: PathBuf,
    /// Directory receiving one `sub-<id>.log` per invocation.
    pub log_dir: PathBuf,
    /// Shared directory receiving relocated artifacts.
    pub summary_dir: PathBuf,
    /// Completion marker path template; `{subject}` is substituted.
    pub marker: String,
    /// Artifact path templates moved into `summary_dir` after success.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// `--nthreads`.
    #[serde(default = "default_nthreads")]
    pub nthreads: u32,
    /// `--omp-nthreads`.
    #[serde(default = "default_omp_nthreads")]
    pub omp_nthreads: u32,
    /// `--output-spaces`.
    #[serde(default = "default_output_space")]
    pub output_space: String,
    /// Arguments appended after the fixed flags.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Mode applied to directories under the subject output on success.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
    /// Mode applied to files under the subject output on success.
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
}

/// Substitute `{subject}` in a path template.
pub fn expand_subject_template(template: &str, subject: &str) -> PathBuf {
    PathBuf::from(template.replace(SUBJECT_PLACEHOLDER, subject))
}
