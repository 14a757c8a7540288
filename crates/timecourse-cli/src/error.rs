use timecourse_core::{BatchError, ConfigError, PipelineError};

use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("{source}"))]
    Config { source: ConfigError },

    #[snafu(display("Resampling failed. {source}"))]
    Batch {
        #[snafu(source(from(BatchError, Box::new)))]
        source: Box<BatchError>,
    },

    #[snafu(display("{source}"))]
    Pipeline { source: PipelineError },

    #[snafu(display(
        "{source}\n\n{usage}\n\
         Change into the project root configured in [pipeline].project_root and re-run."
    ))]
    NotInProjectRoot {
        usage: String,
        source: PipelineError,
    },

    #[snafu(display("Cannot determine the current directory"))]
    CurrentDir { source: std::io::Error },

    #[snafu(display("QA channel '{channel}' is not present in {source_file}"))]
    UnknownQaChannel {
        channel: String,
        source_file: String,
    },

    #[snafu(display("{failed} of {total} subject(s) failed: {subjects}"))]
    SubjectsFailed {
        failed: usize,
        total: usize,
        subjects: String,
    },

    #[snafu(display("Failed to write output: {source}"))]
    Output { source: std::io::Error },
}
