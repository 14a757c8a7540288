//! Sequential runner for an external, containerized anatomical pipeline.
//!
//! The pipeline itself is opaque: it is launched once per subject with a
//! fixed flag set and judged only by its exit status. Around it the runner
//! handles the following:
//!
//! - **Skipping.** If a subject's completion marker already exists, the
//!   subject is skipped. Nothing is launched and its log is left untouched,
//!   so re-running a batch is idempotent.
//! - **Logging.** Stdout and stderr of each launch go to
//!   `<log_dir>/sub-<id>.log`, truncated per launch.
//! - **Exit status.** A non-zero exit, or a failure to launch at all, marks
//!   the subject [`SubjectOutcome::Failed`]. Relocation and permission
//!   changes are skipped for that subject and the batch moves on.
//! - **Post-processing.** After a successful exit, designated artifacts are
//!   moved into the shared summary directory. Permissions under
//!   `<output_dir>/sub-<id>` are then broadened so the rest of the lab can
//!   read them.
//!
//! Subjects are processed strictly one after another.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use snafu::{IntoError, prelude::*};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, expand_subject_template};

/// Errors that stop a batch before or outside per-subject work.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    /// The subject list file could not be read.
    #[snafu(display("Failed to read subject list {path}"))]
    ReadSubjectList {
        /// Subject list path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The subject list holds no identifiers.
    #[snafu(display("Subject list {path} contains no subject identifiers"))]
    EmptySubjectList {
        /// Subject list path.
        path: String,
    },

    /// The configured project root does not exist or cannot be resolved.
    #[snafu(display("Project root {path} is not accessible"))]
    ProjectRoot {
        /// Configured project root.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The runner was invoked from outside the project root.
    #[snafu(display("Must be run from within {root} (current directory: {cwd})"))]
    OutsideProjectRoot {
        /// Resolved project root.
        root: String,
        /// Resolved working directory.
        cwd: String,
    },

    /// A shared directory (logs or summaries) could not be created.
    #[snafu(display("Failed to create directory {path}"))]
    CreateDir {
        /// Directory being created.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Why a single subject failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubjectError {
    /// Whether the completion marker exists could not be determined.
    #[snafu(display("Cannot check completion marker {path}"))]
    CheckMarker {
        /// Marker path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The per-subject log file could not be created.
    #[snafu(display("Failed to open log file {path}"))]
    OpenLog {
        /// Log path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The pipeline process could not be started or awaited.
    #[snafu(display("Failed to launch {program}"))]
    Launch {
        /// Program that was launched.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The pipeline exited unsuccessfully.
    #[snafu(display("Pipeline exited with {}", describe_exit(*code)))]
    ExitStatus {
        /// Exit code, or `None` when terminated by a signal.
        code: Option<i32>,
    },

    /// Moving an artifact into the summary directory failed.
    #[snafu(display("Failed to move {from} to {to}"))]
    Relocate {
        /// Artifact path.
        from: String,
        /// Destination path.
        to: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Broadening permissions on the subject output failed.
    #[snafu(display("Failed to update permissions under {path}"))]
    Permissions {
        /// Subject output directory.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// What happened to one subject.
#[derive(Debug)]
pub enum SubjectOutcome {
    /// The completion marker was already present.
    Skipped {
        /// Subject identifier.
        subject: String,
        /// Marker that was found.
        marker: PathBuf,
    },
    /// The pipeline succeeded and post-processing completed.
    Succeeded {
        /// Subject identifier.
        subject: String,
        /// Log of the run.
        log: PathBuf,
        /// Artifacts now in the summary directory.
        relocated: Vec<PathBuf>,
    },
    /// The pipeline or its post-processing failed.
    Failed {
        /// Subject identifier.
        subject: String,
        /// Log of the run.
        log: PathBuf,
        /// Cause of the failure.
        error: SubjectError,
    },
}

impl SubjectOutcome {
    /// Subject identifier.
    pub fn subject(&self) -> &str {
        match self {
            SubjectOutcome::Skipped { subject, .. }
            | SubjectOutcome::Succeeded { subject, .. }
            | SubjectOutcome::Failed { subject, .. } => subject,
        }
    }

    /// True for [`SubjectOutcome::Failed`].
    pub fn is_failure(&self) -> bool {
        matches!(self, SubjectOutcome::Failed { .. })
    }
}

/// Parse a subject list: the first whitespace-delimited token of each line,
/// skipping blank lines and `#` comments. A leading `sub-` is stripped, and
/// repeated identifiers keep only their first occurrence.
pub fn parse_subject_list(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let Some(token) = line.split_whitespace().next() else {
            continue;
        };
        if token.starts_with('#') {
            continue;
        }
        let id = token.strip_prefix("sub-").unwrap_or(token);
        if id.is_empty() || out.iter().any(|s| s == id) {
            continue;
        }
        out.push(id.to_string());
    }
    out
}

/// Read and parse a subject list file.
pub fn read_subject_list(path: &Path) -> Result<Vec<String>, PipelineError> {
    let text = std::fs::read_to_string(path).context(ReadSubjectListSnafu {
        path: path.display().to_string(),
    })?;
    let subjects = parse_subject_list(&text);
    ensure!(
        !subjects.is_empty(),
        EmptySubjectListSnafu {
            path: path.display().to_string(),
        }
    );
    Ok(subjects)
}

/// Runs the configured pipeline for each subject, in order.
#[derive(Debug, Clone)]
pub struct SubjectPipelineRunner {
    config: PipelineConfig,
}

impl SubjectPipelineRunner {
    /// Wrap a pipeline configuration.
    pub fn new(config: PipelineConfig) -> Self {
        if config.artifacts.iter().any(|a| *a == config.marker) {
            warn!(
                marker = %config.marker,
                "completion marker is also a relocated artifact; finished subjects will not be skipped on re-run"
            );
        }
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Refuse to run unless `cwd` lies inside the configured project root.
    pub fn ensure_within_project_root(&self, cwd: &Path) -> Result<(), PipelineError> {
        let root = std::fs::canonicalize(&self.config.project_root).context(ProjectRootSnafu {
            path: self.config.project_root.display().to_string(),
        })?;
        let cwd = std::fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());

        ensure!(
            cwd.starts_with(&root),
            OutsideProjectRootSnafu {
                root: root.display().to_string(),
                cwd: cwd.display().to_string(),
            }
        );
        Ok(())
    }

    /// Completion marker for `subject`.
    pub fn marker_path(&self, subject: &str) -> PathBuf {
        expand_subject_template(&self.config.marker, subject)
    }

    /// Log file for `subject`.
    pub fn log_path(&self, subject: &str) -> PathBuf {
        self.config.log_dir.join(format!("sub-{subject}.log"))
    }

    /// Pipeline output directory for `subject`.
    pub fn subject_output_dir(&self, subject: &str) -> PathBuf {
        self.config.output_dir.join(format!("sub-{subject}"))
    }

    /// Full argument list passed to the program for `subject`.
    pub fn command_args(&self, subject: &str) -> Vec<OsString> {
        let c = &self.config;
        let mut args: Vec<OsString> = c.prefix_args.iter().map(OsString::from).collect();
        args.push(c.bids_dir.clone().into_os_string());
        args.push(c.output_dir.clone().into_os_string());
        args.push("participant".into());
        args.push("--participant-label".into());
        args.push(subject.into());
        args.push("--anat-only".into());
        args.push("--nthreads".into());
        args.push(c.nthreads.to_string().into());
        args.push("--omp-nthreads".into());
        args.push(c.omp_nthreads.to_string().into());
        args.push("--output-spaces".into());
        args.push(c.output_space.clone().into());
        args.extend(c.extra_args.iter().map(OsString::from));
        args
    }

    /// Run every subject in order; per-subject failures are recorded in the
    /// returned outcomes rather than aborting the batch.
    pub async fn run_all(
        &self,
        subjects: &[String],
    ) -> Result<Vec<SubjectOutcome>, PipelineError> {
        for dir in [&self.config.log_dir, &self.config.summary_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .context(CreateDirSnafu {
                    path: dir.display().to_string(),
                })?;
        }

        let mut outcomes = Vec::with_capacity(subjects.len());
        for (i, subject) in subjects.iter().enumerate() {
            info!(
                subject = %subject,
                position = i + 1,
                total = subjects.len(),
                "processing subject"
            );
            outcomes.push(self.run_subject(subject).await);
        }

        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(SubjectOutcome::subject)
            .collect();
        if !failed.is_empty() {
            warn!(count = failed.len(), subjects = ?failed, "subjects failed");
        }

        Ok(outcomes)
    }

    /// Process one subject: skip, launch, and post-process.
    pub async fn run_subject(&self, subject: &str) -> SubjectOutcome {
        let marker = self.marker_path(subject);
        let log = self.log_path(subject);

        match tokio::fs::try_exists(&marker).await {
            Ok(true) => {
                info!(
                    subject = %subject,
                    marker = %marker.display(),
                    "completion marker present; skipping"
                );
                return SubjectOutcome::Skipped {
                    subject: subject.to_string(),
                    marker,
                };
            }
            Ok(false) => {}
            Err(source) => {
                let error = CheckMarkerSnafu {
                    path: marker.display().to_string(),
                }
                .into_error(source);
                warn!(
                    subject = %subject,
                    error = %error,
                    "cannot tell whether subject is done; not launching"
                );
                return SubjectOutcome::Failed {
                    subject: subject.to_string(),
                    log,
                    error,
                };
            }
        }

        match self.launch_and_finish(subject, &log).await {
            Ok(relocated) => {
                info!(subject = %subject, log = %log.display(), "pipeline finished");
                SubjectOutcome::Succeeded {
                    subject: subject.to_string(),
                    log,
                    relocated,
                }
            }
            Err(error) => {
                warn!(subject = %subject, log = %log.display(), error = %error, "subject failed");
                SubjectOutcome::Failed {
                    subject: subject.to_string(),
                    log,
                    error,
                }
            }
        }
    }

    async fn launch_and_finish(
        &self,
        subject: &str,
        log: &Path,
    ) -> Result<Vec<PathBuf>, SubjectError> {
        self.launch(subject, log).await?;
        let relocated = self.relocate_artifacts(subject).await?;
        self.broaden_permissions(subject).await?;
        Ok(relocated)
    }

    async fn launch(&self, subject: &str, log: &Path) -> Result<(), SubjectError> {
        let log_err = || OpenLogSnafu {
            path: log.display().to_string(),
        };
        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .context(log_err())?;
        let stdout = tokio::fs::File::create(log)
            .await
            .context(log_err())?
            .into_std()
            .await;
        let stderr = stdout.try_clone().context(log_err())?;

        let args = self.command_args(subject);
        debug!(program = %self.config.program, args = ?args, "launching pipeline");

        let status = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .await
            .context(LaunchSnafu {
                program: self.config.program.clone(),
            })?;

        ensure!(status.success(), ExitStatusSnafu { code: status.code() });
        Ok(())
    }

    async fn relocate_artifacts(&self, subject: &str) -> Result<Vec<PathBuf>, SubjectError> {
        let mut moved = Vec::new();
        for template in &self.config.artifacts {
            let from = expand_subject_template(template, subject);
            let Some(name) = from.file_name() else {
                warn!(artifact = %from.display(), "artifact path has no file name; skipping");
                continue;
            };
            match tokio::fs::try_exists(&from).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(subject = %subject, artifact = %from.display(), "expected artifact not found");
                    continue;
                }
                Err(e) => {
                    warn!(
                        subject = %subject,
                        artifact = %from.display(),
                        error = %e,
                        "cannot check artifact; skipping"
                    );
                    continue;
                }
            }

            let to = self.config.summary_dir.join(name);
            move_file(&from, &to).await.context(RelocateSnafu {
                from: from.display().to_string(),
                to: to.display().to_string(),
            })?;
            debug!(from = %from.display(), to = %to.display(), "relocated artifact");
            moved.push(to);
        }
        Ok(moved)
    }

    async fn broaden_permissions(&self, subject: &str) -> Result<(), SubjectError> {
        let dir = self.subject_output_dir(subject);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no subject output directory; leaving permissions alone");
            return Ok(());
        }

        let (dir_mode, file_mode) = (self.config.dir_mode, self.config.file_mode);
        let target = dir.clone();
        tokio::task::spawn_blocking(move || set_modes_recursive(&target, dir_mode, file_mode))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r)
            .context(PermissionsSnafu {
                path: dir.display().to_string(),
            })
    }
}

/// Rename, falling back to copy-and-delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "rename failed; copying instead");
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

#[cfg(unix)]
fn set_modes_recursive(path: &Path, dir_mode: u32, file_mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    if meta.is_dir() {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(dir_mode))?;
        for entry in std::fs::read_dir(path)? {
            set_modes_recursive(&entry?.path(), dir_mode, file_mode)?;
        }
    } else {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(file_mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_modes_recursive(path: &Path, _dir_mode: u32, _file_mode: u32) -> std::io::Result<()> {
    debug!(path = %path.display(), "permission modes are unix-only; skipping");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> PipelineConfig {
        PipelineConfig {
            project_root: root.to_path_buf(),
            program: "fmriprep".to_string(),
            prefix_args: vec!["run".to_string(), "image.sif".to_string()],
            bids_dir: root.join("BIDS"),
            output_dir: root.join("deriv"),
            log_dir: root.join("logs"),
            summary_dir: root.join("summaries"),
            marker: root.join("deriv/sub-{subject}.html").display().to_string(),
            artifacts: Vec::new(),
            nthreads: 8,
            omp_nthreads: 4,
            output_space: "MNI152NLin2009cAsym:res-2".to_string(),
            extra_args: vec!["--skip-bids-validation".to_string()],
            dir_mode: 0o775,
            file_mode: 0o664,
        }
    }

    #[test]
    fn subject_list_takes_first_token() {
        let text = "sub-01 extra\n\n  02\tnotes\n# comment\n01\n03\n";
        assert_eq!(parse_subject_list(text), vec!["01", "02", "03"]);
    }

    #[test]
    fn fixed_argument_order() {
        let runner = SubjectPipelineRunner::new(config(Path::new("/proj")));
        let args: Vec<String> = runner
            .command_args("07")
            .into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            vec![
                "run",
                "image.sif",
                "/proj/BIDS",
                "/proj/deriv",
                "participant",
                "--participant-label",
                "07",
                "--anat-only",
                "--nthreads",
                "8",
                "--omp-nthreads",
                "4",
                "--output-spaces",
                "MNI152NLin2009cAsym:res-2",
                "--skip-bids-validation",
            ]
        );
    }

    #[test]
    fn project_root_guard() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        std::fs::create_dir_all(root.join("scripts")).unwrap();
        let runner = SubjectPipelineRunner::new(config(&root));

        assert!(runner.ensure_within_project_root(&root.join("scripts")).is_ok());
        assert!(matches!(
            runner.ensure_within_project_root(tmp.path()),
            Err(PipelineError::OutsideProjectRoot { .. })
        ));
    }

    #[test]
    fn templates_expand_per_subject() {
        let runner = SubjectPipelineRunner::new(config(Path::new("/proj")));
        assert_eq!(runner.marker_path("01"), PathBuf::from("/proj/deriv/sub-01.html"));
        assert_eq!(runner.log_path("01"), PathBuf::from("/proj/logs/sub-01.log"));
    }
}
