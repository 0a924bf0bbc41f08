use async_trait::async_trait;
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{FrameReader, FrameWriter, Message};

/// What a connection is known to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unidentified,
    Node,
    Submitter,
    Query,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unidentified => write!(f, "unidentified"),
            Role::Node => write!(f, "node"),
            Role::Submitter => write!(f, "submitter"),
            Role::Query => write!(f, "query"),
        }
    }
}

/// Whether a loop keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// Reacts to messages read from the socket or injected with [`Connection::queue_event`].
///
/// Every message has already been forwarded to the send loop when this runs.
#[async_trait]
pub trait ReceiveHandler: Send {
    async fn on_message(&mut self, msg: &Message, ctx: &mut ReceiveContext<'_>) -> Result<Flow>;
}

/// Turns messages from the receive loop into writes.
#[async_trait]
pub trait SendHandler: Send {
    /// Runs once when this handler becomes active.
    async fn on_start(&mut self, _ctx: &mut SendContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn on_message(&mut self, msg: Message, ctx: &mut SendContext<'_>) -> Result<Flow>;
}

pub(crate) struct Handoff {
    pub(crate) receive: Box<dyn ReceiveHandler>,
    pub(crate) send: Box<dyn SendHandler>,
    pub(crate) role: Role,
}

pub struct ReceiveContext<'a> {
    pub(crate) connection: &'a Connection,
    pub(crate) reader: &'a mut FrameReader<OwnedReadHalf>,
    pub(crate) handoff: Option<Handoff>,
}

impl<'a> ReceiveContext<'a> {
    pub fn connection(&self) -> &Connection {
        self.connection
    }

    /// The framed reader, for handlers that take raw bytes off the socket.
    pub fn reader(&mut self) -> &mut FrameReader<OwnedReadHalf> {
        self.reader
    }

    /// Replaces both handlers once the current message is handled.
    ///
    /// The receive loop swaps before its next read. The new send handler
    /// follows every message already queued for the old one.
    pub fn handoff(
        &mut self,
        receive: Box<dyn ReceiveHandler>,
        send: Box<dyn SendHandler>,
        role: Role,
    ) {
        self.handoff = Some(Handoff { receive, send, role });
    }
}

pub struct SendContext<'a> {
    pub(crate) connection: &'a Connection,
    pub(crate) writer: &'a mut FrameWriter<OwnedWriteHalf>,
}

impl<'a> SendContext<'a> {
    pub fn connection(&self) -> &Connection {
        self.connection
    }

    pub async fn write(&mut self, msg: &Message) -> Result<()> {
        self.writer.write_message(msg).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await
    }

    /// The raw socket half, for unframed payload bytes.
    pub fn raw(&mut self) -> &mut OwnedWriteHalf {
        self.writer.get_mut()
    }
}
