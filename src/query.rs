//! Read-only snapshot of a running manager, and a small client to fetch it.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::error::{ClusterError, Result};
use crate::protocol::{from_wire_json, FrameReader, FrameWriter, Message};
use crate::scheduler::JobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: u64,
    pub peer: String,
    pub busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: u64,
    pub username: String,
    pub file_name: String,
    pub status: JobStatus,
    pub granted_nodes: usize,
    pub sections_returned: usize,
    pub created_at: DateTime<Utc>,
}

/// Answer to a `status` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub connections: usize,
    pub nodes: Vec<NodeStatus>,
    pub pending_jobs: usize,
    pub jobs: Vec<JobSummary>,
}

impl ClusterStatus {
    pub fn idle_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| !n.busy).count()
    }
}

/// Connects as a query client, asks for one status snapshot and leaves.
pub async fn fetch_status(addr: SocketAddr, timeout: Duration) -> Result<ClusterStatus> {
    tokio::time::timeout(timeout, fetch(addr))
        .await
        .map_err(|_| ClusterError::Io(std::io::ErrorKind::TimedOut.into()))?
}

async fn fetch(addr: SocketAddr) -> Result<ClusterStatus> {
    let stream = TcpStream::connect(addr).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, 1024);
    let mut writer = FrameWriter::new(write_half);

    expect_keyword(&mut reader, "id").await?;
    writer.write_message(&Message::keyword_only("query")).await?;
    writer.write_message(&Message::keyword_only("status")).await?;
    writer.flush().await?;

    let reply = expect_keyword(&mut reader, "status").await?;
    let status = from_wire_json(reply.require_arg(0)?)?;

    writer
        .write_message(&Message::keyword_only("connectionquit"))
        .await?;
    writer.flush().await?;
    Ok(status)
}

async fn expect_keyword(
    reader: &mut FrameReader<tokio::net::tcp::OwnedReadHalf>,
    keyword: &str,
) -> Result<Message> {
    loop {
        match reader.next_message().await? {
            Some(msg) if msg.keyword() == keyword => return Ok(msg),
            Some(msg) => tracing::debug!(keyword = msg.keyword(), "Skipping message"),
            None => return Err(ClusterError::ConnectionClosed),
        }
    }
}
