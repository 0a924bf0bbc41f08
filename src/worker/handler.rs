//! Handlers for the node side of a node connection.
//!
//! One section at a time moves through `file` (pull the payload), `fileread`,
//! `execute` (run the loader) and `finished` (report the envelope).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProtocolConfig;
use crate::connection::{Flow, ReceiveContext, ReceiveHandler, SendContext, SendHandler};
use crate::error::{ClusterError, Result};
use crate::payload::Envelope;
use crate::protocol::transfer::receive_file;
use crate::protocol::{Message, NodeKind, SectionAssignment};
use crate::worker::executor::SectionExecutor;

/// Builds `finished|<jobId>|<envelope>`.
pub fn finished_message(job_id: u64, envelope: &Envelope) -> Message {
    let encoded = envelope
        .to_wire()
        .or_else(|e| Envelope::failure(vec![format!("unencodable result envelope: {}", e)]).to_wire())
        .unwrap_or_else(|_| r#"[{"console_output":[]}]"#.to_string());
    Message::new(["finished".to_string(), job_id.to_string(), encoded])
}

/// Where a payload named `file_name` lands inside `work_dir`.
///
/// Only the final path component is kept.
fn payload_destination(work_dir: &Path, file_name: &str) -> Result<PathBuf> {
    Path::new(file_name)
        .file_name()
        .map(|name| work_dir.join(name))
        .ok_or_else(|| ClusterError::malformed("file", format!("bad file name {:?}", file_name)))
}

pub struct NodeReceiver {
    executor: Arc<SectionExecutor>,
    protocol: ProtocolConfig,
    current: Option<(SectionAssignment, PathBuf)>,
}

impl NodeReceiver {
    pub fn new(executor: Arc<SectionExecutor>, protocol: ProtocolConfig) -> Self {
        Self {
            executor,
            protocol,
            current: None,
        }
    }

    async fn pull_payload(
        &mut self,
        msg: &Message,
        ctx: &mut ReceiveContext<'_>,
    ) -> Result<()> {
        let section = SectionAssignment::from_message(msg)?;
        let dest = payload_destination(self.executor.work_dir(), &section.file_name)?;
        tracing::info!(
            job_id = section.job_id,
            section_id = section.section_id,
            total = section.total_sections,
            "Section received, pulling payload"
        );

        let prefix = ctx.reader().take_buffered();
        let pulled = receive_file(
            ctx.reader().get_mut(),
            &prefix,
            &dest,
            self.protocol.read_buffer_size,
            self.protocol.transfer_start_timeout(),
            self.protocol.transfer_idle_timeout(),
        )
        .await;

        match pulled {
            Ok(bytes) => {
                tracing::debug!(job_id = section.job_id, bytes, "Payload stored");
                self.current = Some((section, dest));
                ctx.connection().queue_event(Message::keyword_only("fileread"))
            }
            Err(e) => {
                // Report right away so the manager frees this node.
                tracing::warn!(job_id = section.job_id, error = %e, "Payload transfer failed");
                let envelope = Envelope::failure(vec![format!(
                    "section {} of job {}: payload transfer failed: {}",
                    section.section_id, section.job_id, e
                )]);
                ctx.connection()
                    .queue_event(finished_message(section.job_id, &envelope))
            }
        }
    }

    fn start_execution(&mut self, ctx: &mut ReceiveContext<'_>) {
        let Some((section, payload)) = self.current.take() else {
            tracing::warn!("Execute requested with no section pending");
            return;
        };
        let executor = Arc::clone(&self.executor);
        let connection = ctx.connection().clone();
        tokio::spawn(async move {
            let result = executor.execute(&section, &payload).await;
            let msg = finished_message(result.job_id, &result.envelope);
            if let Err(e) = connection.queue_event(msg) {
                tracing::warn!(job_id = result.job_id, error = %e, "Could not report section result");
            }
        });
    }
}

#[async_trait]
impl ReceiveHandler for NodeReceiver {
    async fn on_message(&mut self, msg: &Message, ctx: &mut ReceiveContext<'_>) -> Result<Flow> {
        match msg.kind::<NodeKind>() {
            NodeKind::File => self.pull_payload(msg, ctx).await?,
            NodeKind::Execute => self.start_execution(ctx),
            NodeKind::Shutdown | NodeKind::Quit => return Ok(Flow::Done),
            _ => {}
        }
        Ok(Flow::Continue)
    }
}

pub struct NodeSender;

#[async_trait]
impl SendHandler for NodeSender {
    async fn on_message(&mut self, msg: Message, ctx: &mut SendContext<'_>) -> Result<Flow> {
        match msg.kind::<NodeKind>() {
            NodeKind::Id => ctx.write(&Message::keyword_only("node")).await?,
            NodeKind::File => {
                let job_id: u64 = msg.parse_arg(0)?;
                ctx.write(&Message::new(["send".to_string(), job_id.to_string()]))
                    .await?;
                ctx.flush().await?;
            }
            NodeKind::FileRead => ctx.write(&Message::keyword_only("fileread")).await?,
            NodeKind::Finished => {
                ctx.write(&msg).await?;
                ctx.flush().await?;
            }
            NodeKind::Shutdown => {
                tracing::info!("Manager is shutting down");
                return Ok(Flow::Done);
            }
            NodeKind::Quit => {
                ctx.write(&Message::keyword_only("nodequit")).await?;
                ctx.flush().await?;
                return Ok(Flow::Done);
            }
            NodeKind::Send | NodeKind::Execute | NodeKind::Unknown => {}
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_destination_keeps_only_base_name() {
        let work = Path::new("/var/node");
        assert_eq!(
            payload_destination(work, "/home/alice/jobs/sum.json").unwrap(),
            PathBuf::from("/var/node/sum.json")
        );
        assert_eq!(
            payload_destination(work, "../../etc/sum.json").unwrap(),
            PathBuf::from("/var/node/sum.json")
        );
        assert!(payload_destination(work, "..").is_err());
    }

    #[test]
    fn finished_message_is_frameable() {
        let envelope = Envelope::failure(vec!["x|y".to_string()]);
        let msg = finished_message(3, &envelope);
        assert_eq!(msg.keyword(), "finished");
        assert_eq!(msg.arg(0), Some("3"));
        let back = Envelope::parse(msg.arg(1).unwrap()).unwrap();
        assert_eq!(back, envelope);
    }
}
