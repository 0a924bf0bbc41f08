//! Submitting a job and collecting its results.

pub mod aggregate;
pub mod handler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SubmitConfig;
use crate::connection::{Connection, Role};
use crate::error::{ClusterError, Result};
use crate::payload::{Console, WorkLoader};
use crate::protocol::Message;
use crate::scheduler::JobRef;

pub use aggregate::Aggregator;
pub use handler::{SubmitReceiver, SubmitSender};

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub job_id: Option<u64>,
    pub completed: bool,
    pub sections_received: usize,
    pub console: Vec<String>,
}

/// A job loaded locally and ready to send to a manager.
pub struct Submitter {
    config: SubmitConfig,
    job_ref: JobRef,
    aggregator: Arc<Mutex<Aggregator>>,
}

impl Submitter {
    /// Loads the payload, asks it how many nodes it wants and runs its once-only step.
    pub fn prepare(
        loader: &dyn WorkLoader,
        config: SubmitConfig,
        payload: &Path,
        user_args: Vec<String>,
    ) -> Result<Self> {
        let path = resolve(&config.directory, payload)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| ClusterError::Payload(format!("not a file: {}", path.display())))?;

        let mut job = loader.load(&path)?;
        let mut console = Console::new();
        job.run_initial(&user_args, &mut console)?;

        let job_ref = JobRef {
            job_id: 0,
            username: current_user(),
            payload_path: path.to_string_lossy().to_string(),
            file_name,
            requested_nodes: job.requested_nodes(),
            user_args,
        };
        job_ref.validate()?;
        tracing::info!(job = job.name(), user = %job_ref.username, nodes = job_ref.requested_nodes, payload = %job_ref.payload_path, "Job prepared");

        Ok(Self {
            config,
            job_ref,
            aggregator: Arc::new(Mutex::new(Aggregator::new(job, console))),
        })
    }

    pub fn job_ref(&self) -> &JobRef {
        &self.job_ref
    }

    /// Submits the job and waits for every section, or for `cancel`.
    pub async fn run(self, cancel: CancellationToken) -> Result<SubmitReport> {
        let complete = CancellationToken::new();
        let connection = Connection::connect(
            self.config.manager_addr,
            Box::new(SubmitReceiver),
            Box::new(SubmitSender::new(
                self.job_ref.clone(),
                Arc::clone(&self.aggregator),
                complete.clone(),
            )),
            Role::Submitter,
            &self.config.protocol,
        )
        .await?;
        tracing::info!(manager = %self.config.manager_addr, "Connected to manager");

        tokio::select! {
            _ = complete.cancelled() => {}
            _ = connection.join() => {}
            _ = cancel.cancelled() => {
                tracing::info!("Interrupted, leaving the cluster");
                let _ = connection.queue_event(Message::keyword_only("quit"));
            }
        }

        if tokio::time::timeout(self.config.protocol.join_timeout(), connection.join())
            .await
            .is_err()
        {
            connection.shutdown();
            connection.join().await;
        }

        let aggregator = self.aggregator.lock().await;
        Ok(SubmitReport {
            job_id: aggregator.job_id(),
            completed: aggregator.is_finished(),
            sections_received: aggregator.received(),
            console: aggregator.console().lines().to_vec(),
        })
    }
}

fn resolve(directory: &Path, payload: &Path) -> Result<PathBuf> {
    let path = if payload.is_absolute() {
        payload.to_path_buf()
    } else {
        directory.join(payload)
    };
    Ok(std::fs::canonicalize(path)?)
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
