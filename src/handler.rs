//! Connection lifecycle
//!
//! Drives one accepted peer through `starting → running → draining → closed`:
//! a reader half feeding the dispatcher and a writer half draining the
//! mailbox, released together by a two-party barrier and stopped together
//! by the connection's `closing` token.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Barrier;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{Inbound, LineCodec, DEFAULT_MAX_LINE_LENGTH};
use crate::connection::{Connection, Mailbox, DEFAULT_MAILBOX_CAPACITY};
use crate::dispatcher::Dispatcher;
use crate::error::{AppError, CodecError};
use crate::message::{Diagnostic, ServerMessage};

/// Per-connection limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub mailbox_capacity: usize,
    pub max_line_length: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Handle one accepted peer until both halves have finished.
///
/// `identifier` is the initial peer identifier, normally `<ip>:<port>`.
/// `shutdown` is the server-wide token; cancelling it drains this
/// connection the same way end-of-stream does.
pub async fn handle_connection<R, W>(
    reader: R,
    writer: W,
    identifier: String,
    dispatcher: Dispatcher,
    settings: ConnectionSettings,
    shutdown: &CancellationToken,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (conn, mailbox) =
        Connection::new(identifier, settings.mailbox_capacity, shutdown.child_token());
    info!("Client {} connected", conn.identifier());

    let lines = FramedRead::new(reader, LineCodec::new(settings.max_line_length));
    let sink = FramedWrite::new(writer, LineCodec::new(settings.max_line_length));
    let barrier = Barrier::new(2);

    let (read_result, write_result) = tokio::join!(
        read_loop(lines, &conn, &dispatcher, &barrier),
        write_loop(sink, &conn, mailbox, &barrier),
    );

    info!("Client {} disconnected", conn.identifier());
    read_result.and(write_result)
}

/// Removes the connection from both registries however the reader exits,
/// including when the whole connection future is dropped.
struct ConnectionGuard<'a> {
    conn: &'a Arc<Connection>,
    dispatcher: &'a Dispatcher,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.conn.close();
        self.dispatcher.rooms().leave_all(self.conn);
        if !self.dispatcher.connections().unregister(self.conn) {
            debug!("Client {} was not registered upon cleanup", self.conn.identifier());
        }
    }
}

async fn read_loop<R>(
    mut lines: FramedRead<R, LineCodec>,
    conn: &Arc<Connection>,
    dispatcher: &Dispatcher,
    barrier: &Barrier,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
{
    let _guard = ConnectionGuard { conn, dispatcher };

    debug!("Input handler starting for {}", conn.identifier());
    barrier.wait().await;
    debug!("Input handler running for {}", conn.identifier());

    if !dispatcher.connections().register(conn) {
        warn!("Identifier {} already registered, continuing unregistered", conn.identifier());
    }

    let result = loop {
        tokio::select! {
            _ = conn.closing().cancelled() => break Ok(()),
            frame = lines.next() => match frame {
                Some(Ok(Inbound::Line(line))) => dispatcher.dispatch(conn, &line),
                Some(Ok(Inbound::Oversized)) => {
                    warn!(
                        "Client {} sent a line over {} bytes",
                        conn.identifier(),
                        lines.decoder().max_length()
                    );
                    conn.notify(Diagnostic::LineTooLong);
                }
                Some(Err(e)) => {
                    warn!("Read error for {}: {}", conn.identifier(), e);
                    break Err(AppError::from(e));
                }
                None => break Ok(()),
            }
        }
    };

    debug!("Input handler for {} has finished", conn.identifier());
    result
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, LineCodec>,
    conn: &Arc<Connection>,
    mut mailbox: Mailbox,
    barrier: &Barrier,
) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    debug!("Output handler starting for {}", conn.identifier());
    barrier.wait().await;
    debug!("Output handler running for {}", conn.identifier());

    let result = pump(&mut sink, conn, &mut mailbox).await;
    if let Err(e) = &result {
        warn!("Write error for {}: {}", conn.identifier(), e);
    }

    // Stops the reader as well if the write side failed first
    conn.close();
    let _ = sink.close().await;

    debug!("Output handler for {} has finished", conn.identifier());
    result.map_err(AppError::from)
}

/// Greeting, then mailbox contents until closing, then whatever is
/// still queued.
async fn pump<W>(
    sink: &mut FramedWrite<W, LineCodec>,
    conn: &Connection,
    mailbox: &mut Mailbox,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let greeting = ServerMessage::Greeting {
        identifier: conn.identifier(),
    };
    sink.send(greeting.to_string()).await?;
    sink.send(ServerMessage::Help.to_string()).await?;

    loop {
        tokio::select! {
            biased;
            _ = conn.closing().cancelled() => break,
            msg = mailbox.recv() => match msg {
                Some(msg) => {
                    let line = msg.to_string();
                    sink.send(line.clone()).await?;
                    debug!("Message sent to {}: {}", conn.identifier(), line);
                }
                None => break,
            }
        }
    }

    debug!("Draining mailbox of {}", conn.identifier());
    while let Some(msg) = mailbox.try_recv() {
        sink.send(msg.to_string()).await?;
    }
    Ok(())
}
