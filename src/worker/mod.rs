//! Worker node: connects to the manager, pulls payloads and runs sections.
//!
//! # Section lifecycle
//!
//! 1. Manager sends `file|jobId|sectionId|total|fileName|args...`
//! 2. Node answers `send|jobId` and reads the raw payload until the stream goes idle
//! 3. Node sends `fileread`, manager answers `execute`
//! 4. [`SectionExecutor`] runs the loader as a child process
//! 5. Node sends `finished|jobId|envelope` and is idle again

pub mod executor;
pub mod handler;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::connection::{Connection, Role};
use crate::error::Result;
use crate::protocol::Message;

pub use executor::{ExecutionResult, SectionExecutor};
pub use handler::{NodeReceiver, NodeSender};

pub struct Worker {
    config: WorkerConfig,
    connection: Connection,
}

impl Worker {
    pub async fn connect(mut config: WorkerConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        // The loader runs inside the work dir, so payload paths must not be relative to it.
        config.work_dir = tokio::fs::canonicalize(&config.work_dir).await?;
        let executor = Arc::new(SectionExecutor::new(
            config.loader.clone(),
            config.work_dir.clone(),
        ));
        let connection = Connection::connect(
            config.manager_addr,
            Box::new(NodeReceiver::new(executor, config.protocol.clone())),
            Box::new(NodeSender),
            Role::Node,
            &config.protocol,
        )
        .await?;
        tracing::info!(manager = %config.manager_addr, work_dir = %config.work_dir.display(), "Connected to manager");
        Ok(Self { config, connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Serves sections until the manager goes away or `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => self.quit().await,
            _ = self.connection.join() => {
                tracing::info!("Disconnected from manager");
                Ok(())
            }
        }
    }

    /// Tells the manager this node is leaving and waits for the connection to close.
    pub async fn quit(&self) -> Result<()> {
        if self
            .connection
            .queue_event(Message::keyword_only("quit"))
            .is_ok()
            && tokio::time::timeout(self.config.protocol.join_timeout(), self.connection.join())
                .await
                .is_err()
        {
            tracing::warn!("Timed out waiting for connection to close");
        }
        self.connection.shutdown();
        self.connection.join().await;
        Ok(())
    }
}
