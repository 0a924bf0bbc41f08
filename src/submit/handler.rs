use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection::{Flow, ReceiveContext, ReceiveHandler, SendContext, SendHandler};
use crate::error::Result;
use crate::payload::Envelope;
use crate::protocol::{to_wire_json, Message, SubmitKind};
use crate::scheduler::JobRef;
use crate::submit::aggregate::Aggregator;

pub struct SubmitReceiver;

#[async_trait]
impl ReceiveHandler for SubmitReceiver {
    async fn on_message(&mut self, msg: &Message, _ctx: &mut ReceiveContext<'_>) -> Result<Flow> {
        match msg.kind::<SubmitKind>() {
            SubmitKind::Shutdown | SubmitKind::Quit => Ok(Flow::Done),
            _ => Ok(Flow::Continue),
        }
    }
}

pub struct SubmitSender {
    job: JobRef,
    aggregator: Arc<Mutex<Aggregator>>,
    complete: CancellationToken,
}

impl SubmitSender {
    pub fn new(job: JobRef, aggregator: Arc<Mutex<Aggregator>>, complete: CancellationToken) -> Self {
        Self {
            job,
            aggregator,
            complete,
        }
    }

    async fn finish(&self, ctx: &mut SendContext<'_>) -> Result<Flow> {
        ctx.write(&Message::keyword_only("connectionquit")).await?;
        ctx.flush().await?;
        self.complete.cancel();
        Ok(Flow::Done)
    }
}

#[async_trait]
impl SendHandler for SubmitSender {
    async fn on_message(&mut self, msg: Message, ctx: &mut SendContext<'_>) -> Result<Flow> {
        match msg.kind::<SubmitKind>() {
            SubmitKind::Id => {
                ctx.write(&Message::keyword_only("job")).await?;
                ctx.flush().await?;
            }
            SubmitKind::Submit => {
                let job = to_wire_json(&self.job)?;
                ctx.write(&Message::new(["job".to_string(), job])).await?;
                ctx.flush().await?;
            }
            SubmitKind::Accept => {
                let job_id: u64 = msg.parse_arg(0)?;
                let granted: usize = msg.parse_arg(1)?;
                tracing::info!(job_id, granted, requested = self.job.requested_nodes, "Job accepted");
                if self.aggregator.lock().await.set_expected(job_id, granted) {
                    return self.finish(ctx).await;
                }
            }
            SubmitKind::Results => {
                let job_id: u64 = msg.parse_arg(0)?;
                let envelope = Envelope::parse(msg.arg(1).unwrap_or("")).unwrap_or_else(|e| {
                    tracing::warn!(job_id, error = %e, "Unreadable result envelope");
                    Envelope::failure(vec![format!("unreadable result envelope: {}", e)])
                });
                let done = self.aggregator.lock().await.accept(envelope);
                if done {
                    return self.finish(ctx).await;
                }
            }
            SubmitKind::Shutdown => {
                tracing::warn!("Manager shut down before the job completed");
                return Ok(Flow::Done);
            }
            SubmitKind::Quit => {
                ctx.write(&Message::keyword_only("connectionquit")).await?;
                ctx.flush().await?;
                return Ok(Flow::Done);
            }
            SubmitKind::Unknown => {}
        }
        Ok(Flow::Continue)
    }
}
