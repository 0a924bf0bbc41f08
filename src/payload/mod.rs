//! The contract between the cluster and user work, and the `load` entry point
//! nodes use to run one section of it.

pub mod job;
pub mod loader;
pub mod partition;
pub mod range_sum;
pub mod result;

use std::path::Path;

pub use job::{Console, Job, JobTask, Schedule, TaskContext};
pub use loader::{Manifest, RegistryLoader, WorkLoader};
pub use partition::{fixed_range, run_section, SectionSpec};
pub use result::{Envelope, JobResult, ResultType};

use crate::error::ClusterError;

/// What a section run produced, including the error that stopped it if any.
#[derive(Debug)]
pub struct SectionOutput {
    pub envelope: Envelope,
    pub error: Option<ClusterError>,
}

/// Loads `payload` and runs one section of it.
///
/// Failures are also written into the envelope's console so they reach the submitter.
pub fn execute_section(
    loader: &dyn WorkLoader,
    payload: &Path,
    spec: &SectionSpec,
    args: &[String],
) -> SectionOutput {
    let mut console = Console::new();
    let outcome = loader
        .load(payload)
        .and_then(|mut job| run_section(job.as_mut(), spec, args, &mut console));

    match outcome {
        Ok(results) => SectionOutput {
            envelope: Envelope {
                console: console.into_lines(),
                results,
            },
            error: None,
        },
        Err(e) => {
            console.log(format!("section {} failed: {}", spec, e));
            SectionOutput {
                envelope: Envelope::failure(console.into_lines()),
                error: Some(e),
            }
        }
    }
}
