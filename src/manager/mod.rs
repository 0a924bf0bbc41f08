//! The manager: accepts connections, identifies them, and runs the scheduler.

pub mod handler;
pub mod registry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::connection::{Connection, ConnectionId, Role};
use crate::error::{ClusterError, Result};
use crate::payload::Envelope;
use crate::protocol::Message;
use crate::scheduler::JobScheduler;

pub use handler::{IdentifyReceiver, IdentifySender, ManagerReceiver, ManagerSender};
pub use registry::{NodeRef, Registry};

/// State shared by every manager-side handler.
#[derive(Clone)]
pub struct ManagerState {
    pub registry: Arc<RwLock<Registry>>,
    pub scheduler: Arc<JobScheduler>,
    pub directory: PathBuf,
}

impl ManagerState {
    pub fn new(config: &ManagerConfig) -> Self {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let scheduler = Arc::new(JobScheduler::new(
            Arc::clone(&registry),
            config.max_jobs,
            config.dispatch_interval(),
        ));
        Self {
            registry,
            scheduler,
            directory: config.directory.clone(),
        }
    }

    /// Queues a section's result envelope on the submitter's connection and counts the section.
    pub async fn route_section(&self, job_id: u64, node: ConnectionId, envelope: String) -> Result<()> {
        let job = self
            .scheduler
            .get_job(job_id)
            .await
            .ok_or(ClusterError::JobNotFound(job_id))?;
        let submitter = self.registry.read().await.connection(job.submitter).cloned();
        match submitter {
            Some(connection) => {
                let results = Message::new(["results".to_string(), job_id.to_string(), envelope]);
                if let Err(e) = connection.queue_event(results) {
                    tracing::warn!(job_id, error = %e, "Submitter gone, dropping results");
                }
            }
            None => tracing::warn!(job_id, submitter = job.submitter, "Submitter gone, dropping results"),
        }
        tracing::info!(job_id, node, "Section finished");
        self.scheduler.section_finished(job_id).await?;
        Ok(())
    }

    /// Forgets a connection that has left.
    ///
    /// Its queued jobs are dropped. A node that leaves mid-section has that
    /// section reported to the submitter as failed. Safe to call more than once.
    pub async fn forget_connection(&self, id: ConnectionId) {
        let lost_job = {
            let mut registry = self.registry.write().await;
            let lost = registry.node(id).and_then(|node| node.job);
            registry.remove_connection(id);
            lost
        };
        self.scheduler.remove_jobs_for(id).await;

        let Some(job_id) = lost_job else { return };
        tracing::warn!(job_id, node = id, "Node left mid-section, section lost");
        let envelope = Envelope::failure(vec![format!(
            "section of job {} lost: node {} disconnected",
            job_id, id
        )]);
        let routed = match envelope.to_wire() {
            Ok(wire) => self.route_section(job_id, id, wire).await,
            Err(e) => Err(e),
        };
        if let Err(e) = routed {
            tracing::warn!(job_id, error = %e, "Could not report lost section");
        }
    }

    /// Payload paths are used as-is when absolute, otherwise relative to the manager's directory.
    pub fn resolve_payload(&self, payload_path: &str) -> PathBuf {
        let path = PathBuf::from(payload_path);
        if path.is_absolute() {
            path
        } else {
            self.directory.join(path)
        }
    }
}

pub struct Manager {
    config: ManagerConfig,
    listener: TcpListener,
    state: ManagerState,
}

impl Manager {
    pub async fn bind(config: ManagerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let state = ManagerState::new(&config);
        Ok(Self {
            config,
            listener,
            state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &ManagerState {
        &self.state
    }

    /// Accepts connections until `cancel` fires, then tells every peer to shut down.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, directory = %self.config.directory.display(), "Manager listening");
        let scheduler = tokio::spawn(Arc::clone(&self.state.scheduler).run(cancel.clone()));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer).await,
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
            }
        }

        self.shutdown_connections().await;
        let _ = scheduler.await;
        tracing::info!("Manager stopped");
        Ok(())
    }

    async fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.state.registry.write().await.next_id();
        let connection = match Connection::spawn(
            id,
            stream,
            Box::new(IdentifyReceiver::new(self.state.clone())),
            Box::new(IdentifySender),
            Role::Unidentified,
            &self.config.protocol,
        ) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "Failed to set up connection");
                return;
            }
        };
        self.state
            .registry
            .write()
            .await
            .add_connection(connection.clone());
        tracing::info!(conn_id = id, %peer, "Connection accepted");

        let state = self.state.clone();
        tokio::spawn(async move {
            connection.join().await;
            state.forget_connection(connection.id()).await;
            tracing::debug!(conn_id = connection.id(), "Connection closed");
        });
    }

    async fn shutdown_connections(&self) {
        let connections = self.state.registry.read().await.connections();
        tracing::info!(count = connections.len(), "Shutting down connections");
        for connection in &connections {
            let _ = connection.queue_event(Message::keyword_only("kill"));
        }
        let timeout = self.config.protocol.join_timeout();
        for connection in &connections {
            if tokio::time::timeout(timeout, connection.join()).await.is_err() {
                tracing::warn!(conn_id = connection.id(), "Connection did not close in time");
                connection.shutdown();
                connection.join().await;
            }
        }
    }
}
