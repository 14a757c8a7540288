#![allow(dead_code)]

use std::path::{Path, PathBuf};

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub const RUN01: &str = ",Left.Amygdala,Right.Amygdala\n0,10,1\n1,20,2\n2,30,3\n";
pub const RUN02: &str = ",Left.Amygdala,Right.Amygdala\n0,0,0\n1,4,8\n";

pub fn write_file(dir: &Path, name: &str, contents: &str) -> TestResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// Writes a config whose pipeline program is `sh -c <script>`; inside the
/// script `$2` is the output dir and `$5` the subject id.
pub fn write_pipeline_config(root: &Path, script: &str) -> TestResult<PathBuf> {
    let r = root.display();
    let toml = format!(
        r#"[pipeline]
project_root = '{r}'
program = "sh"
prefix_args = ["-c", '''{script}''', "pipeline"]
bids_dir = '{r}/BIDS'
output_dir = '{r}/deriv'
log_dir = '{r}/logs'
summary_dir = '{r}/summaries'
marker = '{r}/deriv/sub-{{subject}}.html'
artifacts = ['{r}/deriv/sub-{{subject}}_summary.txt']
nthreads = 2
omp_nthreads = 1
"#
    );
    write_file(root, "tcourse.toml", &toml)
}
