pub mod assigner;
pub mod job;
pub mod queue;

pub use assigner::JobScheduler;
pub use job::{JobRef, JobStatus, ScheduledJob};
pub use queue::JobQueue;
