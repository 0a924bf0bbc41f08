use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::error::{ClusterError, Result};
use crate::protocol::frame::is_valid_field;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
        })
    }
}

/// What a submitter sends in its `job` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    /// Assigned by the manager; whatever the submitter sends is ignored.
    #[serde(default)]
    pub job_id: u64,
    pub username: String,
    pub payload_path: String,
    pub file_name: String,
    pub requested_nodes: usize,
    #[serde(default)]
    pub user_args: Vec<String>,
}

impl JobRef {
    /// Checks that everything copied into `file` messages can be framed.
    pub fn validate(&self) -> Result<()> {
        if self.payload_path.is_empty() {
            return Err(ClusterError::malformed("job", "empty payload path"));
        }
        if self.file_name.is_empty() {
            return Err(ClusterError::malformed("job", "empty file name"));
        }
        if let Some(bad) = std::iter::once(&self.file_name)
            .chain(self.user_args.iter())
            .find(|field| !is_valid_field(field))
        {
            return Err(ClusterError::InvalidField(bad.clone()));
        }
        Ok(())
    }
}

/// A job as tracked by the manager.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub job: JobRef,
    pub submitter: ConnectionId,
    pub status: JobStatus,
    /// Requested node count after clamping to the nodes connected at submission.
    pub granted_nodes: usize,
    pub sections_returned: usize,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn new(job: JobRef, submitter: ConnectionId, granted_nodes: usize) -> Self {
        Self {
            job,
            submitter,
            status: JobStatus::Queued,
            granted_nodes,
            sections_returned: 0,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.job.job_id
    }
}
