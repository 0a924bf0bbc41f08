use std::collections::{HashMap, VecDeque};

use crate::connection::ConnectionId;
use crate::error::{ClusterError, Result};
use crate::scheduler::job::{JobRef, JobStatus, ScheduledJob};

const DEFAULT_MAX_JOBS: usize = 10_000;

/// FIFO of jobs waiting for nodes, plus an index of every job still in flight.
#[derive(Debug)]
pub struct JobQueue {
    pending: VecDeque<u64>,
    jobs: HashMap<u64, ScheduledJob>,
    next_id: u64,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            jobs: HashMap::new(),
            next_id: 1,
            max_jobs,
        }
    }

    /// Assigns the next job id and appends the job to the back of the queue.
    ///
    /// The requested node count is clamped to `connected_nodes`, never below one.
    /// Returns the job id and the granted node count.
    pub fn add_job(
        &mut self,
        mut job: JobRef,
        submitter: ConnectionId,
        connected_nodes: usize,
    ) -> Result<(u64, usize)> {
        if self.is_full() {
            return Err(ClusterError::QueueFull(self.max_jobs));
        }
        let id = self.next_id;
        self.next_id += 1;

        let granted = job.requested_nodes.min(connected_nodes).max(1);
        job.job_id = id;
        self.jobs.insert(id, ScheduledJob::new(job, submitter, granted));
        self.pending.push_back(id);
        Ok((id, granted))
    }

    pub fn get_job(&self, id: u64) -> Option<&ScheduledJob> {
        self.jobs.get(&id)
    }

    /// The job at the head of the queue.
    pub fn peek_pending(&self) -> Option<&ScheduledJob> {
        self.pending.front().and_then(|id| self.jobs.get(id))
    }

    /// Removes the head job from the queue and marks it running.
    pub fn pop_pending(&mut self) -> Option<&ScheduledJob> {
        let id = self.pending.pop_front()?;
        let job = self.jobs.get_mut(&id)?;
        job.status = JobStatus::Running;
        Some(job)
    }

    /// Records one routed section. Returns true once the job has all of them,
    /// at which point it is dropped from the index.
    pub fn section_finished(&mut self, id: u64) -> Result<bool> {
        let job = self.jobs.get_mut(&id).ok_or(ClusterError::JobNotFound(id))?;
        job.sections_returned += 1;
        if job.sections_returned < job.granted_nodes {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        tracing::info!(job_id = id, sections = job.granted_nodes, "Job completed");
        self.jobs.remove(&id);
        Ok(true)
    }

    /// Removes the queued jobs of one submitter. Returns how many were removed.
    pub fn remove_submitter(&mut self, submitter: ConnectionId) -> usize {
        let jobs = &mut self.jobs;
        let before = self.pending.len();
        self.pending.retain(|id| match jobs.get(id) {
            Some(job) if job.submitter == submitter => {
                jobs.remove(id);
                false
            }
            _ => true,
        });
        before - self.pending.len()
    }

    /// Every job in flight, oldest first.
    pub fn all_jobs(&self) -> Vec<&ScheduledJob> {
        let mut jobs: Vec<&ScheduledJob> = self.jobs.values().collect();
        jobs.sort_by_key(|job| job.id());
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(requested_nodes: usize) -> JobRef {
        JobRef {
            job_id: 0,
            username: "bob".to_string(),
            payload_path: "/tmp/sum.json".to_string(),
            file_name: "sum.json".to_string(),
            requested_nodes,
            user_args: Vec::new(),
        }
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut queue = JobQueue::new();
        let (a, _) = queue.add_job(job(1), 7, 1).unwrap();
        let (b, _) = queue.add_job(job(1), 7, 1).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(queue.get_job(1).unwrap().job.job_id, 1);
        assert_eq!(queue.get_job(1).unwrap().submitter, 7);
    }

    #[test]
    fn ids_are_not_reused_after_completion() {
        let mut queue = JobQueue::new();
        let (a, _) = queue.add_job(job(1), 1, 1).unwrap();
        queue.pop_pending();
        assert!(queue.section_finished(a).unwrap());
        let (b, _) = queue.add_job(job(1), 1, 1).unwrap();
        assert_eq!(b, 2);
    }

    #[test]
    fn requested_nodes_are_clamped() {
        let mut queue = JobQueue::new();
        assert_eq!(queue.add_job(job(4), 1, 2).unwrap().1, 2);
        assert_eq!(queue.add_job(job(2), 1, 5).unwrap().1, 2);
        assert_eq!(queue.add_job(job(3), 1, 0).unwrap().1, 1);
        assert_eq!(queue.add_job(job(0), 1, 3).unwrap().1, 1);
    }

    #[test]
    fn pending_is_fifo() {
        let mut queue = JobQueue::new();
        queue.add_job(job(1), 1, 1).unwrap();
        queue.add_job(job(1), 1, 1).unwrap();
        assert_eq!(queue.peek_pending().unwrap().id(), 1);
        assert_eq!(queue.pop_pending().unwrap().status, JobStatus::Running);
        assert_eq!(queue.peek_pending().unwrap().id(), 2);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn section_finished_completes_after_all_sections() {
        let mut queue = JobQueue::new();
        let (id, granted) = queue.add_job(job(3), 1, 3).unwrap();
        assert_eq!(granted, 3);
        queue.pop_pending();
        assert!(!queue.section_finished(id).unwrap());
        assert!(!queue.section_finished(id).unwrap());
        assert!(queue.section_finished(id).unwrap());
        assert!(queue.get_job(id).is_none());
        assert!(matches!(
            queue.section_finished(id),
            Err(ClusterError::JobNotFound(_))
        ));
    }

    #[test]
    fn full_queue_rejects_jobs() {
        let mut queue = JobQueue::with_capacity(1);
        queue.add_job(job(1), 1, 1).unwrap();
        assert!(queue.is_full());
        assert!(matches!(
            queue.add_job(job(1), 1, 1),
            Err(ClusterError::QueueFull(1))
        ));
    }

    #[test]
    fn departed_submitter_frees_its_queued_jobs() {
        let mut queue = JobQueue::with_capacity(3);
        let (running, _) = queue.add_job(job(1), 4, 1).unwrap();
        queue.pop_pending();
        queue.add_job(job(1), 4, 1).unwrap();
        let (kept, _) = queue.add_job(job(1), 5, 1).unwrap();
        assert!(queue.is_full());

        assert_eq!(queue.remove_submitter(4), 1);
        assert_eq!(queue.remove_submitter(4), 0);
        assert!(!queue.is_full());
        assert_eq!(queue.peek_pending().unwrap().id(), kept);
        assert_eq!(queue.get_job(running).unwrap().status, JobStatus::Running);
        assert!(queue.add_job(job(1), 5, 1).is_ok());
    }

    #[test]
    fn unknown_job_is_none() {
        let queue = JobQueue::new();
        assert!(queue.get_job(42).is_none());
    }
}
