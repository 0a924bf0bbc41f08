use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionId;
use crate::error::Result;
use crate::manager::registry::Registry;
use crate::protocol::{from_wire_json, SectionAssignment};
use crate::scheduler::job::{JobRef, ScheduledJob};
use crate::scheduler::queue::JobQueue;

/// Places queued jobs on idle nodes, strictly in submission order.
///
/// Lock order is always queue, then registry.
#[derive(Debug)]
pub struct JobScheduler {
    queue: RwLock<JobQueue>,
    registry: Arc<RwLock<Registry>>,
    interval: Duration,
}

impl JobScheduler {
    pub fn new(registry: Arc<RwLock<Registry>>, max_jobs: usize, interval: Duration) -> Self {
        Self {
            queue: RwLock::new(JobQueue::with_capacity(max_jobs)),
            registry,
            interval,
        }
    }

    /// Queues the JobRef carried in a `job` message.
    ///
    /// Returns the new job id and the number of nodes the job will get.
    pub async fn add_job(&self, job_json: &str, submitter: ConnectionId) -> Result<(u64, usize)> {
        let job: JobRef = from_wire_json(job_json)?;
        job.validate()?;
        let requested = job.requested_nodes;
        let user = job.username.clone();

        let mut queue = self.queue.write().await;
        let connected = self.registry.read().await.node_count();
        let (id, granted) = queue.add_job(job, submitter, connected)?;
        tracing::info!(
            job_id = id,
            user = %user,
            requested,
            granted,
            queued = queue.pending_len(),
            "Job queued"
        );
        Ok((id, granted))
    }

    pub async fn get_job(&self, id: u64) -> Option<ScheduledJob> {
        self.queue.read().await.get_job(id).cloned()
    }

    /// Records a section result routed back to the submitter.
    pub async fn section_finished(&self, id: u64) -> Result<bool> {
        self.queue.write().await.section_finished(id)
    }

    /// Drops every queued job submitted over `submitter`.
    ///
    /// Jobs already running are kept until their sections come back or are lost.
    pub async fn remove_jobs_for(&self, submitter: ConnectionId) -> usize {
        let removed = self.queue.write().await.remove_submitter(submitter);
        if removed > 0 {
            tracing::info!(submitter, removed, "Dropped queued jobs of departed submitter");
        }
        removed
    }

    /// Jobs still in flight, oldest first.
    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        self.queue.read().await.all_jobs().into_iter().cloned().collect()
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.read().await.pending_len()
    }

    /// Dispatches head jobs for as long as enough nodes are idle.
    ///
    /// A head job that does not fit blocks everything behind it. Returns the
    /// number of jobs dispatched.
    pub async fn try_dispatch(&self) -> usize {
        let mut queue = self.queue.write().await;
        let mut registry = self.registry.write().await;
        let mut dispatched = 0;

        while let Some(needed) = queue.peek_pending().map(|job| job.granted_nodes) {
            let Some(nodes) = registry.claim_idle(needed) else {
                tracing::trace!(needed, idle = registry.idle_count(), "Head job waiting for nodes");
                break;
            };
            let Some(job) = queue.pop_pending() else {
                break;
            };

            let total_sections = nodes.len();
            for (section_id, (node_id, connection)) in nodes.into_iter().enumerate() {
                registry.assign_job(node_id, job.id());
                let assignment = SectionAssignment {
                    job_id: job.id(),
                    section_id,
                    total_sections,
                    file_name: job.job.file_name.clone(),
                    user_args: job.job.user_args.clone(),
                };
                if let Err(e) = connection.queue_event(assignment.to_message()) {
                    tracing::warn!(job_id = job.id(), node = node_id, error = %e, "Failed to hand section to node");
                } else {
                    tracing::info!(job_id = job.id(), section_id, node = node_id, "Section assigned");
                }
            }
            dispatched += 1;
        }
        dispatched
    }

    /// Scheduler loop; runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut dispatch_interval = tokio::time::interval(self.interval);
        dispatch_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = dispatch_interval.tick() => {
                    self.try_dispatch().await;
                }
            }
        }
    }
}
