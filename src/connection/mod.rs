//! A framed TCP connection driven by a receive task and a send task.
//!
//! The receive task reads frames (or events injected by other tasks), forwards
//! each one to the send task's queue and then hands it to the active
//! [`ReceiveHandler`]. The send task feeds its queue to the active
//! [`SendHandler`], which does all the writing. Either side can swap both
//! handlers at runtime through [`ReceiveContext::handoff`].

pub mod handler;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ProtocolConfig;
use crate::error::{ClusterError, Result};
use crate::protocol::{FrameReader, FrameWriter, Message};

pub use handler::{Flow, ReceiveContext, ReceiveHandler, Role, SendContext, SendHandler};

pub type ConnectionId = u64;

enum Outbound {
    Message(Message),
    Handoff(Box<dyn SendHandler>),
}

struct Inner {
    id: ConnectionId,
    peer: SocketAddr,
    role: watch::Sender<Role>,
    events: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,
    closed: CancellationToken,
}

/// Cheap, cloneable handle to a running connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("role", &self.role())
            .finish()
    }
}

impl Connection {
    /// Starts the receive and send tasks for an accepted or connected socket.
    pub fn spawn(
        id: ConnectionId,
        stream: TcpStream,
        receive: Box<dyn ReceiveHandler>,
        send: Box<dyn SendHandler>,
        role: Role,
        config: &ProtocolConfig,
    ) -> Result<Connection> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (role_tx, _) = watch::channel(role);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let conn = Connection {
            inner: Arc::new(Inner {
                id,
                peer,
                role: role_tx,
                events: events_tx,
                shutdown: CancellationToken::new(),
                closed: CancellationToken::new(),
            }),
        };

        let span = tracing::info_span!("conn", conn_id = id, peer = %peer);
        let reader = FrameReader::new(read_half, config.read_buffer_size);
        let writer = FrameWriter::new(write_half);

        let recv_task = tokio::spawn(
            receive_loop(conn.clone(), reader, receive, events_rx, outbound_tx)
                .instrument(span.clone()),
        );
        let send_task =
            tokio::spawn(send_loop(conn.clone(), writer, send, outbound_rx).instrument(span));

        let supervisor = conn.clone();
        tokio::spawn(async move {
            let _ = recv_task.await;
            let _ = send_task.await;
            supervisor.inner.closed.cancel();
        });

        Ok(conn)
    }

    /// Connects to `addr` and starts the connection with the given handlers.
    pub async fn connect(
        addr: SocketAddr,
        receive: Box<dyn ReceiveHandler>,
        send: Box<dyn SendHandler>,
        role: Role,
        config: &ProtocolConfig,
    ) -> Result<Connection> {
        let stream = TcpStream::connect(addr).await?;
        Connection::spawn(0, stream, receive, send, role, config)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn role(&self) -> Role {
        *self.inner.role.borrow()
    }

    /// Injects `msg` into the receive pipeline as if it had been read.
    pub fn queue_event(&self, msg: Message) -> Result<()> {
        self.inner
            .events
            .send(msg)
            .map_err(|_| ClusterError::ConnectionClosed)
    }

    /// Stops both loops and closes the socket. Safe to call more than once.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Waits until both loops have exited.
    pub async fn join(&self) {
        self.inner.closed.cancelled().await;
    }
}

async fn receive_loop(
    conn: Connection,
    mut reader: FrameReader<OwnedReadHalf>,
    mut handler: Box<dyn ReceiveHandler>,
    mut events: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = conn.inner.shutdown.cancelled() => break,
            Some(event) = events.recv() => event,
            read = reader.next_message() => match read {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::debug!("Peer closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Read failed, closing connection");
                    break;
                }
            },
        };
        tracing::trace!(keyword = msg.keyword(), "Received");

        if outbound.send(Outbound::Message(msg.clone())).is_err() {
            break;
        }

        let mut ctx = ReceiveContext {
            connection: &conn,
            reader: &mut reader,
            handoff: None,
        };
        // A payload pull can block here for the whole transfer timeout.
        let handled = tokio::select! {
            biased;
            _ = conn.inner.shutdown.cancelled() => {
                tracing::debug!(keyword = msg.keyword(), "Shutdown while handling message");
                break;
            }
            handled = handler.on_message(&msg, &mut ctx) => handled,
        };
        let flow = match handled {
            Ok(flow) => flow,
            Err(e) if e.is_transport() => {
                tracing::warn!(keyword = msg.keyword(), error = %e, "Transport error, closing connection");
                break;
            }
            Err(e) => {
                tracing::warn!(keyword = msg.keyword(), error = %e, "Ignoring message");
                Flow::Continue
            }
        };

        if let Some(next) = ctx.handoff.take() {
            tracing::debug!(role = %next.role, "Handing off connection");
            handler = next.receive;
            conn.inner.role.send_replace(next.role);
            if outbound.send(Outbound::Handoff(next.send)).is_err() {
                break;
            }
        }

        if flow == Flow::Done {
            break;
        }
    }
    // Dropping `outbound` lets the send loop drain what is queued and stop.
}

async fn send_loop(
    conn: Connection,
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut handler: Box<dyn SendHandler>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    if let Err(e) = start_handler(&conn, &mut writer, handler.as_mut()).await {
        tracing::warn!(error = %e, "Send handler failed to start");
        conn.shutdown();
        return;
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = conn.inner.shutdown.cancelled() => break,
            next = queue.recv() => next,
        };
        let Some(next) = next else { break };

        match next {
            Outbound::Handoff(next_handler) => {
                handler = next_handler;
                if let Err(e) = start_handler(&conn, &mut writer, handler.as_mut()).await {
                    tracing::warn!(error = %e, "Send handler failed to start");
                    break;
                }
            }
            Outbound::Message(msg) => {
                let keyword = msg.keyword().to_string();
                let mut ctx = SendContext {
                    connection: &conn,
                    writer: &mut writer,
                };
                let handled = tokio::select! {
                    biased;
                    _ = conn.inner.shutdown.cancelled() => break,
                    handled = handler.on_message(msg, &mut ctx) => handled,
                };
                match handled {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Done) => break,
                    Err(e) if e.is_transport() => {
                        tracing::warn!(keyword = %keyword, error = %e, "Write failed, closing connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(keyword = %keyword, error = %e, "Ignoring message");
                    }
                }
            }
        }
    }

    if let Err(e) = writer.flush().await {
        tracing::debug!(error = %e, "Final flush failed");
    }
    conn.shutdown();
}

async fn start_handler(
    conn: &Connection,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    handler: &mut dyn SendHandler,
) -> Result<()> {
    let mut ctx = SendContext {
        connection: conn,
        writer,
    };
    handler.on_start(&mut ctx).await
}
