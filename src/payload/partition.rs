use std::ops::Range;
use std::str::FromStr;

use crate::error::{ClusterError, Result};
use crate::payload::job::{Console, Job, Schedule, TaskContext};
use crate::payload::result::JobResult;

/// `jobId,sectionId,totalSections`, as passed to the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpec {
    pub job_id: u64,
    pub section_id: usize,
    pub total_sections: usize,
}

impl FromStr for SectionSpec {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [job, section, total] = parts.as_slice() else {
            return Err(ClusterError::Payload(format!(
                "expected jobId,sectionId,totalSections, got {:?}",
                s
            )));
        };
        let bad = |field: &str| ClusterError::Payload(format!("invalid {} in {:?}", field, s));
        let spec = Self {
            job_id: job.parse().map_err(|_| bad("job id"))?,
            section_id: section.parse().map_err(|_| bad("section id"))?,
            total_sections: total.parse().map_err(|_| bad("total sections"))?,
        };
        if spec.total_sections == 0 || spec.section_id >= spec.total_sections {
            return Err(bad("section range"));
        }
        Ok(spec)
    }
}

impl std::fmt::Display for SectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.job_id, self.section_id, self.total_sections)
    }
}

/// Tasks owned by `section` under the fixed schedule.
///
/// Blocks are `tasks / total` long; the remainder is not assigned to any
/// section. More sections than tasks gives empty ranges.
pub fn fixed_range(tasks: usize, section: usize, total: usize) -> Range<usize> {
    if total == 0 {
        return 0..0;
    }
    let block = tasks / total;
    let start = section.saturating_mul(block).min(tasks);
    let end = start.saturating_add(block).min(tasks);
    start..end
}

/// Sets the job up with `args` and runs this section's share of its tasks.
pub fn run_section(
    job: &mut dyn Job,
    spec: &SectionSpec,
    args: &[String],
    console: &mut Console,
) -> Result<Vec<JobResult>> {
    let tasks = job.setup(args, console)?;
    let range = match job.schedule() {
        Schedule::Fixed => fixed_range(tasks.len(), spec.section_id, spec.total_sections),
        other => return Err(ClusterError::UnsupportedSchedule(other.to_string())),
    };
    tracing::debug!(job = job.name(), section = %spec, tasks = tasks.len(), start = range.start, end = range.end, "Running section");

    let mut results = Vec::new();
    for index in range {
        let mut ctx = TaskContext::new(spec.job_id, index, console, &mut results);
        tasks[index].run(&mut ctx)?;
    }
    Ok(results)
}
