use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::LoaderConfig;
use crate::payload::{Envelope, SectionSpec};
use crate::protocol::SectionAssignment;

/// Result of running one section through the loader.
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: u64,
    pub section_id: usize,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub envelope: Envelope,
}

/// Runs sections by launching the work loader as a child process.
///
/// The loader gets `<payload> <jobId,sectionId,total> <user args...>` after its
/// own configured arguments and must print a result envelope as the last line
/// of its stdout. Anything else (a crash, a non-zero exit, unparseable output)
/// still yields an envelope, holding whatever diagnostics were captured.
#[derive(Debug, Clone)]
pub struct SectionExecutor {
    loader: LoaderConfig,
    work_dir: PathBuf,
}

impl SectionExecutor {
    pub fn new(loader: LoaderConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            loader,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub async fn execute(&self, section: &SectionAssignment, payload: &Path) -> ExecutionResult {
        let spec = SectionSpec {
            job_id: section.job_id,
            section_id: section.section_id,
            total_sections: section.total_sections,
        };
        tracing::info!(
            job_id = section.job_id,
            section = %spec,
            loader = %self.loader.program.display(),
            "Executing section"
        );

        let result = Command::new(&self.loader.program)
            .args(&self.loader.args)
            .arg(payload)
            .arg(spec.to_string())
            .args(&section.user_args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        Self::process_output(section, result)
    }

    fn process_output(
        section: &SectionAssignment,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        let job_id = section.job_id;
        let section_id = section.section_id;
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();
                let success = output.status.success();

                let lines: Vec<&str> = stdout.lines().collect();
                let last = lines.iter().rposition(|line| !line.trim().is_empty());
                let parsed = last.map(|index| (index, Envelope::parse(lines[index])));

                let envelope = match parsed {
                    Some((index, Ok(mut envelope))) => {
                        // Whatever the loader printed before its envelope comes first.
                        let mut console: Vec<String> =
                            lines[..index].iter().map(|line| line.to_string()).collect();
                        console.append(&mut envelope.console);
                        if !success {
                            console.extend(stderr.lines().map(str::to_string));
                            console.push(format!("loader exited with status {:?}", exit_code));
                        }
                        envelope.console = console;
                        envelope
                    }
                    other => {
                        let mut console = vec![format!(
                            "section {} of job {} produced no result envelope (exit status {:?})",
                            section_id, job_id, exit_code
                        )];
                        if let Some((_, Err(e))) = other {
                            console.push(format!("unreadable loader output: {}", e));
                        }
                        console.extend(stdout.lines().map(str::to_string));
                        console.extend(stderr.lines().map(str::to_string));
                        Envelope::failure(console)
                    }
                };

                tracing::info!(
                    job_id,
                    section_id,
                    success,
                    exit_code = ?exit_code,
                    results = envelope.results.len(),
                    "Section completed"
                );

                ExecutionResult {
                    job_id,
                    section_id,
                    success,
                    exit_code,
                    envelope,
                }
            }
            Err(e) => {
                tracing::error!(job_id, section_id, error = %e, "Failed to start loader");
                ExecutionResult {
                    job_id,
                    section_id,
                    success: false,
                    exit_code: None,
                    envelope: Envelope::failure(vec![format!("failed to start loader: {}", e)]),
                }
            }
        }
    }
}
