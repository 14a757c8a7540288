//! CLI for resampling ROI timecourses and running the anatomical pipeline
//! over a subject list.

mod error;
mod report;

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use snafu::ResultExt;
use timecourse_core::{
    Config, OutputDirPolicy, ResampleJob, SubjectPipelineRunner, config::parse_delimiter,
    process_sources, read_subject_list,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    error::{
        BatchSnafu, CliError, CliResult, ConfigSnafu, CurrentDirSnafu, NotInProjectRootSnafu,
        PipelineSnafu,
    },
    report::{QaOptions, write_batch_summary, write_qa_reports, write_subject_outcomes},
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Upsample timecourse tables from interval T to T/2 by midpoint insertion
    Resample {
        /// Source files, or directories scanned for files ending in the suffix marker
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory receiving `<prefix>-<label>.tsv` outputs
        #[arg(long = "out-dir")]
        out_dir: PathBuf,

        /// File name prefix marker (default: timecourses)
        #[arg(long)]
        prefix: Option<String>,

        /// File name suffix marker (default: timeseries.csv)
        #[arg(long)]
        suffix: Option<String>,

        /// Input delimiter, e.g. ',' or 'tab'
        #[arg(long)]
        delimiter: Option<String>,

        /// Source sampling interval (TR) in seconds
        #[arg(long)]
        tr: Option<f64>,

        /// Write into a non-empty --out-dir instead of a timestamped sibling
        #[arg(long, default_value_t = false)]
        overwrite: bool,

        /// Print an original-vs-resampled listing per source
        #[arg(long, default_value_t = false)]
        qa: bool,

        /// Channel shown by --qa (default: first channel)
        #[arg(long = "qa-channel")]
        qa_channel: Option<String>,

        /// Rows shown per source by --qa; 0 shows all
        #[arg(long = "qa-rows", default_value_t = 20)]
        qa_rows: usize,

        /// TOML config file with a [resample] table
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run the anatomical pipeline for every subject in a list, skipping
    /// subjects whose completion marker exists
    RunSubjects {
        /// Plain-text subject list, one identifier per line
        subject_list: PathBuf,

        /// TOML config file with a [pipeline] table
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Debug, Parser)]
#[command(name = "tcourse", version, about)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

struct ResampleArgs {
    inputs: Vec<PathBuf>,
    out_dir: PathBuf,
    prefix: Option<String>,
    suffix: Option<String>,
    delimiter: Option<String>,
    tr: Option<f64>,
    overwrite: bool,
    qa: bool,
    qa_channel: Option<String>,
    qa_rows: usize,
    config: Option<PathBuf>,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> CliResult<Config> {
    match path {
        Some(p) => Config::load(p).context(ConfigSnafu),
        None => Ok(Config::default()),
    }
}

fn cmd_resample(args: ResampleArgs) -> CliResult<()> {
    let cfg = load_config(args.config.as_deref())?.resample;

    let mut pattern = cfg.label_pattern();
    if let Some(p) = args.prefix {
        pattern.prefix = p;
    }
    if let Some(s) = args.suffix {
        pattern.suffix = s;
    }

    let mut load = cfg.load_options().context(ConfigSnafu)?;
    if let Some(d) = &args.delimiter {
        load.delimiter = parse_delimiter(d).context(ConfigSnafu)?;
    }

    let job = ResampleJob {
        inputs: args.inputs,
        output_dir: args.out_dir,
        output_policy: if args.overwrite {
            OutputDirPolicy::Overwrite
        } else {
            OutputDirPolicy::Timestamped
        },
        pattern,
        load,
        sampling_interval: args.tr.or(cfg.tr),
    };

    let records = process_sources(&job).context(BatchSnafu)?;
    info!(sources = records.len(), "resampling complete");

    let mut stdout = std::io::stdout();
    write_batch_summary(&records, &mut stdout)?;
    if args.qa {
        let opts = QaOptions {
            channel: args.qa_channel,
            max_rows: args.qa_rows,
        };
        write_qa_reports(&records, &opts, &mut stdout)?;
    }
    Ok(())
}

async fn cmd_run_subjects(subject_list: &Path, config: &Path) -> CliResult<()> {
    let pipeline = Config::load(config)
        .and_then(|c| c.require_pipeline(config))
        .context(ConfigSnafu)?;
    let runner = SubjectPipelineRunner::new(pipeline);

    let cwd = std::env::current_dir().context(CurrentDirSnafu)?;
    runner
        .ensure_within_project_root(&cwd)
        .context(NotInProjectRootSnafu {
            usage: Cli::command().render_usage().to_string(),
        })?;

    let subjects = read_subject_list(subject_list).context(PipelineSnafu)?;
    info!(count = subjects.len(), list = %subject_list.display(), "loaded subject list");

    let outcomes = runner.run_all(&subjects).await.context(PipelineSnafu)?;
    write_subject_outcomes(&outcomes, &mut std::io::stdout())?;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.is_failure())
        .map(|o| o.subject())
        .collect();
    if failed.is_empty() {
        return Ok(());
    }

    Err(CliError::SubjectsFailed {
        failed: failed.len(),
        total: outcomes.len(),
        subjects: failed.join(", "),
    })
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.cmd {
        Command::Resample {
            inputs,
            out_dir,
            prefix,
            suffix,
            delimiter,
            tr,
            overwrite,
            qa,
            qa_channel,
            qa_rows,
            config,
        } => cmd_resample(ResampleArgs {
            inputs,
            out_dir,
            prefix,
            suffix,
            delimiter,
            tr,
            overwrite,
            qa,
            qa_channel,
            qa_rows,
            config,
        }),

        Command::RunSubjects {
            subject_list,
            config,
        } => cmd_run_subjects(&subject_list, &config).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
