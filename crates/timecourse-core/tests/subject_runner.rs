//! Subject runner tests against a shell stand-in for the container pipeline.
//!
//! The stand-in is `sh -c <script> pipeline <fixed args...>`, so inside the
//! script `$1` is the BIDS dir, `$2` the output dir and `$5` the subject id.
#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{os::unix::fs::PermissionsExt, path::Path};

use tempfile::TempDir;
use timecourse_core::{PipelineConfig, SubjectError, SubjectOutcome, SubjectPipelineRunner};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const SUCCEED: &str = r#"echo "processing $5"
mkdir -p "$2/sub-$5/anat"
echo anat > "$2/sub-$5/anat/T1w.nii.gz"
echo report > "$2/sub-$5.html"
echo summary > "$2/sub-$5_summary.txt"
"#;

const FAIL_FOR_02: &str = r#"if [ "$5" = "02" ]; then echo "boom" >&2; exit 3; fi
mkdir -p "$2/sub-$5"
echo report > "$2/sub-$5.html"
echo summary > "$2/sub-$5_summary.txt"
"#;

fn config(root: &Path, script: &str) -> PipelineConfig {
    let deriv = root.join("deriv");
    PipelineConfig {
        project_root: root.to_path_buf(),
        program: "sh".to_string(),
        prefix_args: vec!["-c".to_string(), script.to_string(), "pipeline".to_string()],
        bids_dir: root.join("BIDS"),
        output_dir: deriv.clone(),
        log_dir: root.join("logs"),
        summary_dir: root.join("summaries"),
        marker: deriv.join("sub-{subject}.html").display().to_string(),
        artifacts: vec![deriv.join("sub-{subject}_summary.txt").display().to_string()],
        nthreads: 2,
        omp_nthreads: 1,
        output_space: "MNI152NLin2009cAsym:res-2".to_string(),
        extra_args: Vec::new(),
        dir_mode: 0o775,
        file_mode: 0o664,
    }
}

fn subjects(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn successful_run_relocates_and_opens_permissions() -> TestResult {
    let tmp = TempDir::new()?;
    let runner = SubjectPipelineRunner::new(config(tmp.path(), SUCCEED));

    let outcomes = runner.run_all(&subjects(&["01"])).await?;
    assert_eq!(outcomes.len(), 1);

    let SubjectOutcome::Succeeded { log, relocated, .. } = &outcomes[0] else {
        panic!("expected success, got {:?}", outcomes[0]);
    };
    assert_eq!(std::fs::read_to_string(log)?.trim(), "processing 01");
    assert_eq!(relocated, &vec![tmp.path().join("summaries/sub-01_summary.txt")]);
    assert!(!tmp.path().join("deriv/sub-01_summary.txt").exists());

    let file = tmp.path().join("deriv/sub-01/anat/T1w.nii.gz");
    let mode = std::fs::metadata(&file)?.permissions().mode() & 0o777;
    assert_eq!(mode, 0o664);
    let dir_mode = std::fs::metadata(tmp.path().join("deriv/sub-01"))?
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(dir_mode, 0o775);
    Ok(())
}

#[tokio::test]
async fn marker_present_skips_without_touching_log() -> TestResult {
    let tmp = TempDir::new()?;
    let runner = SubjectPipelineRunner::new(config(tmp.path(), "exit 99"));

    std::fs::create_dir_all(tmp.path().join("deriv"))?;
    std::fs::write(tmp.path().join("deriv/sub-01.html"), "done")?;

    let outcomes = runner.run_all(&subjects(&["01"])).await?;
    assert!(matches!(outcomes[0], SubjectOutcome::Skipped { .. }));
    assert!(!runner.log_path("01").exists());
    Ok(())
}

#[tokio::test]
async fn failure_is_recorded_and_batch_continues() -> TestResult {
    let tmp = TempDir::new()?;
    let runner = SubjectPipelineRunner::new(config(tmp.path(), FAIL_FOR_02));

    let outcomes = runner.run_all(&subjects(&["01", "02", "03"])).await?;
    let summary: Vec<(&str, bool)> = outcomes
        .iter()
        .map(|o| (o.subject(), o.is_failure()))
        .collect();
    assert_eq!(summary, vec![("01", false), ("02", true), ("03", false)]);

    let SubjectOutcome::Failed { error, log, .. } = &outcomes[1] else {
        panic!("expected failure");
    };
    assert!(matches!(error, SubjectError::ExitStatus { code: Some(3) }));
    assert_eq!(std::fs::read_to_string(log)?.trim(), "boom");

    // Nothing is relocated for the failed subject.
    assert!(!tmp.path().join("summaries/sub-02_summary.txt").exists());
    assert!(tmp.path().join("summaries/sub-03_summary.txt").exists());
    Ok(())
}

#[tokio::test]
async fn unreadable_marker_fails_without_launching() -> TestResult {
    let tmp = TempDir::new()?;
    let runner = SubjectPipelineRunner::new(config(tmp.path(), SUCCEED));

    // A regular file where the output directory should be makes the marker
    // lookup fail with something other than "not found".
    std::fs::write(tmp.path().join("deriv"), "not a directory")?;
    std::fs::create_dir_all(tmp.path().join("logs"))?;
    std::fs::write(runner.log_path("01"), "previous run")?;

    let outcomes = runner.run_all(&subjects(&["01"])).await?;
    assert!(matches!(
        &outcomes[0],
        SubjectOutcome::Failed {
            error: SubjectError::CheckMarker { .. },
            ..
        }
    ));
    assert_eq!(std::fs::read_to_string(runner.log_path("01"))?, "previous run");
    Ok(())
}

#[tokio::test]
async fn run_subject_creates_its_log_dir() -> TestResult {
    let tmp = TempDir::new()?;
    let runner = SubjectPipelineRunner::new(config(tmp.path(), "echo hi"));

    std::fs::create_dir_all(tmp.path().join("summaries"))?;
    let outcome = runner.run_subject("01").await;
    assert!(matches!(outcome, SubjectOutcome::Succeeded { .. }));
    assert_eq!(std::fs::read_to_string(runner.log_path("01"))?.trim(), "hi");
    Ok(())
}

#[tokio::test]
async fn missing_program_is_a_launch_failure() -> TestResult {
    let tmp = TempDir::new()?;
    let mut cfg = config(tmp.path(), "");
    cfg.program = "definitely-not-a-real-pipeline-binary".to_string();
    let runner = SubjectPipelineRunner::new(cfg);

    let outcomes = runner.run_all(&subjects(&["01"])).await?;
    assert!(matches!(
        &outcomes[0],
        SubjectOutcome::Failed {
            error: SubjectError::Launch { .. },
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn rerun_skips_completed_subjects() -> TestResult {
    let tmp = TempDir::new()?;
    let runner = SubjectPipelineRunner::new(config(tmp.path(), SUCCEED));

    let first = runner.run_all(&subjects(&["01"])).await?;
    assert!(matches!(first[0], SubjectOutcome::Succeeded { .. }));

    let second = runner.run_all(&subjects(&["01"])).await?;
    assert!(matches!(second[0], SubjectOutcome::Skipped { .. }));
    Ok(())
}
