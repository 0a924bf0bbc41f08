
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};

use cluster_lite::connection::Connection;
use cluster_lite::manager::Registry;
use cluster_lite::protocol::{to_wire_json, Message, SectionAssignment};
use cluster_lite::scheduler::{JobRef, JobScheduler, JobStatus};

use test_harness::recording_connection;

struct TestNode {
    connection: Connection,
    seen: mpsc::UnboundedReceiver<Message>,
    _peer: TcpStream,
}

impl TestNode {
    /// Next `file` assignment delivered to this node
    async fn assignment(&mut self) -> SectionAssignment {
        let msg = tokio::time::timeout(Duration::from_secs(2), self.seen.recv())
            .await
            .expect("no assignment delivered")
            .expect("connection closed");
        assert_eq!(msg.keyword(), "file");
        SectionAssignment::from_message(&msg).unwrap()
    }

    fn nothing_delivered(&mut self) -> bool {
        self.seen.try_recv().is_err()
    }
}

async fn cluster(nodes: usize) -> (Arc<RwLock<Registry>>, JobScheduler, Vec<TestNode>) {
    let registry = Arc::new(RwLock::new(Registry::new()));
    let mut test_nodes = Vec::new();
    for _ in 0..nodes {
        let id = registry.write().await.next_id();
        let (connection, seen, peer) = recording_connection(id).await;
        {
            let mut reg = registry.write().await;
            reg.add_connection(connection.clone());
            reg.add_node(connection.clone());
        }
        test_nodes.push(TestNode {
            connection,
            seen,
            _peer: peer,
        });
    }
    let scheduler = JobScheduler::new(Arc::clone(&registry), 100, Duration::from_millis(20));
    (registry, scheduler, test_nodes)
}

fn job_json(requested_nodes: usize) -> String {
    to_wire_json(&JobRef {
        job_id: 0,
        username: "alice".to_string(),
        payload_path: "/srv/jobs/sum.json".to_string(),
        file_name: "sum.json".to_string(),
        requested_nodes,
        user_args: vec!["100".to_string()],
    })
    .unwrap()
}

#[tokio::test]
async fn test_job_waits_until_enough_nodes_are_idle() {
    let (registry, scheduler, mut nodes) = cluster(3).await;

    let (job_id, granted) = scheduler.add_job(&job_json(3), 99).await.unwrap();
    assert_eq!(granted, 3);

    // Occupy one node so only two are idle
    let claimed = registry.write().await.claim_idle(1).unwrap();
    let busy_id = claimed[0].0;

    assert_eq!(scheduler.try_dispatch().await, 0);
    assert_eq!(scheduler.pending_len().await, 1);
    assert_eq!(
        scheduler.get_job(job_id).await.unwrap().status,
        JobStatus::Queued
    );

    registry.write().await.set_idle(busy_id);
    assert_eq!(scheduler.try_dispatch().await, 1);
    assert_eq!(registry.read().await.idle_count(), 0);
    assert_eq!(
        scheduler.get_job(job_id).await.unwrap().status,
        JobStatus::Running
    );

    let mut sections = Vec::new();
    for node in &mut nodes {
        let assignment = node.assignment().await;
        assert_eq!(assignment.job_id, job_id);
        assert_eq!(assignment.total_sections, 3);
        assert_eq!(assignment.file_name, "sum.json");
        assert_eq!(assignment.user_args, vec!["100".to_string()]);
        sections.push(assignment.section_id);
    }
    sections.sort_unstable();
    assert_eq!(sections, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_requested_nodes_clamped_to_connected() {
    let (_registry, scheduler, mut nodes) = cluster(2).await;

    let (job_id, granted) = scheduler.add_job(&job_json(5), 1).await.unwrap();
    assert_eq!(granted, 2);
    assert_eq!(scheduler.try_dispatch().await, 1);

    for node in &mut nodes {
        assert_eq!(node.assignment().await.total_sections, 2);
    }
    assert_eq!(scheduler.get_job(job_id).await.unwrap().granted_nodes, 2);
}

#[tokio::test]
async fn test_zero_nodes_still_grants_one() {
    let (_registry, scheduler, _nodes) = cluster(0).await;

    let (_, granted) = scheduler.add_job(&job_json(4), 1).await.unwrap();
    assert_eq!(granted, 1);
    assert_eq!(scheduler.try_dispatch().await, 0);
    assert_eq!(scheduler.pending_len().await, 1);
}

#[tokio::test]
async fn test_head_of_queue_blocks_later_jobs() {
    let (registry, scheduler, mut nodes) = cluster(2).await;

    let (first, _) = scheduler.add_job(&job_json(2), 1).await.unwrap();
    let (second, granted) = scheduler.add_job(&job_json(1), 2).await.unwrap();
    assert_eq!(granted, 1);

    registry.write().await.claim_idle(1).unwrap();

    // One node is idle, enough for the second job, but the first is at the head
    assert_eq!(scheduler.try_dispatch().await, 0);
    assert_eq!(
        scheduler.get_job(second).await.unwrap().status,
        JobStatus::Queued
    );
    for node in &mut nodes {
        assert!(node.nothing_delivered());
    }

    let busy = registry
        .read()
        .await
        .nodes()
        .find(|node| node.busy)
        .map(|node| node.id)
        .unwrap();
    registry.write().await.set_idle(busy);

    assert_eq!(scheduler.try_dispatch().await, 1);
    assert_eq!(
        scheduler.get_job(first).await.unwrap().status,
        JobStatus::Running
    );
    assert_eq!(
        scheduler.get_job(second).await.unwrap().status,
        JobStatus::Queued
    );
}

#[tokio::test]
async fn test_dispatches_several_jobs_in_one_pass() {
    let (_registry, scheduler, mut nodes) = cluster(3).await;

    let (first, _) = scheduler.add_job(&job_json(2), 1).await.unwrap();
    let (second, _) = scheduler.add_job(&job_json(1), 2).await.unwrap();

    assert_eq!(scheduler.try_dispatch().await, 2);
    assert_eq!(scheduler.pending_len().await, 0);

    // Oldest idle nodes are claimed first
    assert_eq!(nodes[0].assignment().await.job_id, first);
    assert_eq!(nodes[1].assignment().await.job_id, first);
    assert_eq!(nodes[2].assignment().await.job_id, second);
}

#[tokio::test]
async fn test_concurrent_dispatch_claims_a_node_once() {
    let (registry, scheduler, _nodes) = cluster(1).await;
    let scheduler = Arc::new(scheduler);

    scheduler.add_job(&job_json(1), 1).await.unwrap();
    scheduler.add_job(&job_json(1), 2).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move { scheduler.try_dispatch().await }));
    }
    let mut dispatched = 0;
    for handle in handles {
        dispatched += handle.await.unwrap();
    }

    assert_eq!(dispatched, 1);
    assert_eq!(scheduler.pending_len().await, 1);
    assert_eq!(registry.read().await.idle_count(), 0);
}

#[tokio::test]
async fn test_claim_idle_is_all_or_nothing() {
    let (registry, _scheduler, _nodes) = cluster(2).await;
    let mut reg = registry.write().await;

    assert!(reg.claim_idle(3).is_none());
    assert_eq!(reg.idle_count(), 2);
    assert!(reg.claim_idle(0).is_none());

    let claimed = reg.claim_idle(2).unwrap();
    assert_eq!(claimed.len(), 2);
    assert!(reg.claim_idle(1).is_none());
}

#[tokio::test]
async fn test_section_finished_removes_completed_job() {
    let (_registry, scheduler, _nodes) = cluster(2).await;

    let (job_id, _) = scheduler.add_job(&job_json(2), 1).await.unwrap();
    scheduler.try_dispatch().await;

    assert!(!scheduler.section_finished(job_id).await.unwrap());
    assert_eq!(
        scheduler.get_job(job_id).await.unwrap().sections_returned,
        1
    );
    assert!(scheduler.section_finished(job_id).await.unwrap());
    assert!(scheduler.get_job(job_id).await.is_none());
    assert!(scheduler.jobs().await.is_empty());
}

#[tokio::test]
async fn test_unknown_job_lookup() {
    let (_registry, scheduler, _nodes) = cluster(1).await;

    assert!(scheduler.get_job(42).await.is_none());
    assert!(scheduler.section_finished(42).await.is_err());
}

#[tokio::test]
async fn test_rejects_malformed_job() {
    let (_registry, scheduler, _nodes) = cluster(1).await;

    assert!(scheduler.add_job("not json", 1).await.is_err());

    let bad_args = to_wire_json(&JobRef {
        job_id: 0,
        username: "bob".to_string(),
        payload_path: "/srv/jobs/sum.json".to_string(),
        file_name: "sum.json".to_string(),
        requested_nodes: 1,
        user_args: vec!["end*".to_string()],
    })
    .unwrap();
    assert!(scheduler.add_job(&bad_args, 1).await.is_err());
    assert_eq!(scheduler.pending_len().await, 0);
}

#[tokio::test]
async fn test_dropped_node_is_not_dispatched_to() {
    let (registry, scheduler, nodes) = cluster(2).await;

    registry
        .write()
        .await
        .remove_connection(nodes[0].connection.id());
    scheduler.add_job(&job_json(2), 1).await.unwrap();

    // Clamped to the one remaining node
    assert_eq!(scheduler.try_dispatch().await, 1);
    assert_eq!(registry.read().await.node_count(), 1);
}

#[tokio::test]
async fn test_departed_submitter_jobs_are_never_dispatched() {
    let (registry, scheduler, mut nodes) = cluster(1).await;
    let claimed = registry.write().await.claim_idle(1).unwrap();

    let (gone, _) = scheduler.add_job(&job_json(1), 5).await.unwrap();
    let (kept, _) = scheduler.add_job(&job_json(1), 6).await.unwrap();
    assert_eq!(scheduler.remove_jobs_for(5).await, 1);
    assert!(scheduler.get_job(gone).await.is_none());
    assert_eq!(scheduler.pending_len().await, 1);

    registry.write().await.set_idle(claimed[0].0);
    assert_eq!(scheduler.try_dispatch().await, 1);
    assert_eq!(nodes[0].assignment().await.job_id, kept);
    assert_eq!(scheduler.pending_len().await, 0);
}

#[tokio::test]
async fn test_dispatch_records_node_job() {
    let (registry, scheduler, mut nodes) = cluster(2).await;

    let (job_id, _) = scheduler.add_job(&job_json(1), 1).await.unwrap();
    assert_eq!(scheduler.try_dispatch().await, 1);
    nodes[0].assignment().await;

    let node_id = nodes[0].connection.id();
    assert_eq!(registry.read().await.node(node_id).unwrap().job, Some(job_id));
    registry.write().await.set_idle(node_id);
    assert_eq!(registry.read().await.node(node_id).unwrap().job, None);
}
