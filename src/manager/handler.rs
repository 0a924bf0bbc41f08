//! Manager-side connection handlers.
//!
//! Every accepted socket starts with the identify pair. Once the peer says what
//! it is, the connection is handed off to the manager pair for that role.

use async_trait::async_trait;

use crate::connection::{Flow, ReceiveContext, ReceiveHandler, Role, SendContext, SendHandler};
use crate::error::{ClusterError, Result};
use crate::manager::ManagerState;
use crate::protocol::transfer::send_file;
use crate::protocol::{IdentifyKind, ManagerKind, Message};
use crate::query::{ClusterStatus, JobSummary, NodeStatus};

fn manager_pair(role: Role, state: &ManagerState) -> (Box<dyn ReceiveHandler>, Box<dyn SendHandler>) {
    (
        Box::new(ManagerReceiver),
        Box::new(ManagerSender {
            role,
            state: state.clone(),
        }),
    )
}

pub struct IdentifyReceiver {
    state: ManagerState,
}

impl IdentifyReceiver {
    pub fn new(state: ManagerState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ReceiveHandler for IdentifyReceiver {
    async fn on_message(&mut self, msg: &Message, ctx: &mut ReceiveContext<'_>) -> Result<Flow> {
        match msg.kind::<IdentifyKind>() {
            IdentifyKind::Node => {
                let (receive, send) = manager_pair(Role::Node, &self.state);
                ctx.handoff(receive, send, Role::Node);
                self.state
                    .registry
                    .write()
                    .await
                    .add_node(ctx.connection().clone());
            }
            IdentifyKind::Job => {
                let (receive, send) = manager_pair(Role::Submitter, &self.state);
                ctx.handoff(receive, send, Role::Submitter);
                ctx.connection()
                    .queue_event(Message::keyword_only("submit"))?;
                tracing::info!("Submitter connected");
            }
            IdentifyKind::Query => {
                let (receive, send) = manager_pair(Role::Query, &self.state);
                ctx.handoff(receive, send, Role::Query);
            }
            IdentifyKind::Shutdown => return Ok(Flow::Done),
            IdentifyKind::Id | IdentifyKind::Unknown => {}
        }
        Ok(Flow::Continue)
    }
}

/// Asks the peer who it is until it answers.
pub struct IdentifySender;

#[async_trait]
impl SendHandler for IdentifySender {
    async fn on_start(&mut self, ctx: &mut SendContext<'_>) -> Result<()> {
        ctx.write(&Message::keyword_only("id")).await?;
        ctx.flush().await
    }

    async fn on_message(&mut self, msg: Message, ctx: &mut SendContext<'_>) -> Result<Flow> {
        match msg.kind::<IdentifyKind>() {
            IdentifyKind::Node | IdentifyKind::Job | IdentifyKind::Query => {}
            IdentifyKind::Shutdown => {
                ctx.write(&Message::keyword_only("shutdown")).await?;
                ctx.flush().await?;
                return Ok(Flow::Done);
            }
            IdentifyKind::Id | IdentifyKind::Unknown => {
                tracing::debug!(keyword = msg.keyword(), "Unidentified peer, asking again");
                ctx.write(&Message::keyword_only("id")).await?;
                ctx.flush().await?;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Stops reading once the peer leaves or the manager shuts down.
pub struct ManagerReceiver;

#[async_trait]
impl ReceiveHandler for ManagerReceiver {
    async fn on_message(&mut self, msg: &Message, _ctx: &mut ReceiveContext<'_>) -> Result<Flow> {
        match msg.kind::<ManagerKind>() {
            ManagerKind::Shutdown | ManagerKind::NodeQuit | ManagerKind::ConnectionQuit => {
                Ok(Flow::Done)
            }
            _ => Ok(Flow::Continue),
        }
    }
}

/// Does the manager's work for an identified connection.
pub struct ManagerSender {
    role: Role,
    state: ManagerState,
}

impl ManagerSender {
    async fn drop_connection(&self, ctx: &SendContext<'_>) {
        let id = ctx.connection().id();
        self.state.forget_connection(id).await;
        tracing::info!(conn_id = id, role = %self.role, "Connection left");
    }

    async fn accept_job(&self, msg: &Message, ctx: &mut SendContext<'_>) -> Result<Flow> {
        let submitter = ctx.connection().id();
        match self.state.scheduler.add_job(msg.require_arg(0)?, submitter).await {
            Ok((job_id, granted)) => {
                ctx.write(&Message::new([
                    "accept".to_string(),
                    job_id.to_string(),
                    granted.to_string(),
                ]))
                .await?;
                ctx.flush().await?;
                Ok(Flow::Continue)
            }
            Err(e) => {
                tracing::warn!(conn_id = submitter, error = %e, "Job rejected");
                ctx.write(&Message::keyword_only("shutdown")).await?;
                ctx.flush().await?;
                self.drop_connection(ctx).await;
                Ok(Flow::Done)
            }
        }
    }

    async fn send_payload(&self, msg: &Message, ctx: &mut SendContext<'_>) -> Result<()> {
        let job_id: u64 = msg.parse_arg(0)?;
        let job = self
            .state
            .scheduler
            .get_job(job_id)
            .await
            .ok_or(ClusterError::JobNotFound(job_id))?;
        let path = self.state.resolve_payload(&job.job.payload_path);
        ctx.flush().await?;
        let bytes = send_file(ctx.raw(), &path).await?;
        tracing::info!(job_id, conn_id = ctx.connection().id(), bytes, "Payload sent");
        Ok(())
    }

    async fn route_results(&self, msg: &Message, ctx: &SendContext<'_>) -> Result<()> {
        let node = ctx.connection().id();
        let job_id: u64 = msg.parse_arg(0)?;
        let envelope = msg.arg(1).unwrap_or("").to_string();

        self.state.registry.write().await.set_idle(node);
        self.state.route_section(job_id, node, envelope).await
    }

    async fn status(&self) -> ClusterStatus {
        let jobs = self.state.scheduler.jobs().await;
        let pending_jobs = self.state.scheduler.pending_len().await;
        let registry = self.state.registry.read().await;
        ClusterStatus {
            connections: registry.connection_count(),
            nodes: registry
                .nodes()
                .map(|node| NodeStatus {
                    id: node.id,
                    peer: node.connection.peer().to_string(),
                    busy: node.busy,
                })
                .collect(),
            pending_jobs,
            jobs: jobs
                .into_iter()
                .map(|job| JobSummary {
                    job_id: job.id(),
                    username: job.job.username.clone(),
                    file_name: job.job.file_name.clone(),
                    status: job.status,
                    granted_nodes: job.granted_nodes,
                    sections_returned: job.sections_returned,
                    created_at: job.created_at,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl SendHandler for ManagerSender {
    async fn on_message(&mut self, msg: Message, ctx: &mut SendContext<'_>) -> Result<Flow> {
        match (msg.kind::<ManagerKind>(), self.role) {
            (ManagerKind::SubmitJob, Role::Submitter) => {
                ctx.write(&Message::keyword_only("submit")).await?;
                ctx.flush().await?;
            }
            (ManagerKind::NewJob, Role::Submitter) => return self.accept_job(&msg, ctx).await,
            (ManagerKind::Results, Role::Submitter) => {
                ctx.write(&msg).await?;
                ctx.flush().await?;
            }
            (ManagerKind::File, Role::Node) => {
                ctx.write(&msg).await?;
                ctx.flush().await?;
            }
            (ManagerKind::Send, Role::Node) => self.send_payload(&msg, ctx).await?,
            (ManagerKind::FileRead, Role::Node) => {
                ctx.write(&Message::keyword_only("execute")).await?;
                ctx.flush().await?;
            }
            (ManagerKind::NodeFinished, Role::Node) => self.route_results(&msg, ctx).await?,
            (ManagerKind::NodeQuit, _) => {
                self.drop_connection(ctx).await;
                return Ok(Flow::Done);
            }
            (ManagerKind::ConnectionQuit, _) => {
                self.drop_connection(ctx).await;
                return Ok(Flow::Done);
            }
            (ManagerKind::Shutdown, _) => {
                ctx.write(&Message::keyword_only("shutdown")).await?;
                ctx.flush().await?;
                return Ok(Flow::Done);
            }
            (ManagerKind::Status, Role::Query) => {
                let status = self.status().await;
                let json = crate::protocol::to_wire_json(&status)?;
                ctx.write(&Message::new(["status".to_string(), json])).await?;
                ctx.flush().await?;
            }
            (kind, role) => {
                tracing::trace!(?kind, %role, "Ignoring message");
            }
        }
        Ok(Flow::Continue)
    }
}
