//! Per-connection driver.
//!
//! One task (this one) reads and dispatches every inbound message; a writer
//! task drains the outbound queue so wire order is preserved no matter which
//! task produced a frame. Hub calls and outbound stream producers run as
//! their own tasks and deliver completions and stream items back through the
//! queue - a slow hub method never blocks the reader.

use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use hubbub_session::{BindError, Hub, HubCallable, UpstreamStreams};
use hubbub_wire::{Close, Completion, Invocation, Message, StreamItem};

use crate::framing::{FrameReader, FrameWriter};
use crate::handshake;
use crate::server::ServerConfig;

const OUTBOUND_QUEUE_SIZE: usize = 64;

/// Error during connection handling.
#[derive(Debug)]
pub enum ConnectionError {
    /// IO error on the transport.
    Io(io::Error),
    /// The peer never completed a valid handshake.
    Handshake(String),
    /// The peer broke the protocol badly enough to end the connection.
    Protocol(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "IO error: {e}"),
            ConnectionError::Handshake(reason) => write!(f, "handshake failed: {reason}"),
            ConnectionError::Protocol(reason) => write!(f, "protocol violation: {reason}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

/// What the dispatcher should do after one message.
enum Flow {
    Continue,
    PeerClose,
}

/// Run one connection to completion: handshake, then the message loop.
pub(crate) async fn run<S>(
    stream: S,
    hub: Arc<Hub>,
    config: ServerConfig,
    connection_id: String,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::with_max_frame_size(read_half, config.max_frame_size);
    let mut writer = FrameWriter::new(write_half);

    handshake::perform(
        &mut reader,
        &mut writer,
        config.handshake_timeout,
        &connection_id,
    )
    .await?;

    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
    let mut writer_task = Some(tokio::spawn(drain_outbound(writer, outbound_rx)));

    let mut conn = Connection {
        hub,
        connection_id,
        stream_buffer_capacity: config.stream_buffer_capacity,
        outbound,
        upstream: UpstreamStreams::new(config.hub_chan_receive_timeout),
        out_streams: HashMap::new(),
        invocations: Vec::new(),
    };

    let result = conn
        .drive(&mut reader, config.keep_alive_interval, &mut writer_task)
        .await;

    // Stop producers first, then drop the last outbound sender so the writer
    // drains whatever is already queued and exits.
    conn.shutdown();
    drop(conn);
    if let Some(task) = writer_task {
        let _ = task.await;
    }

    result
}

async fn drain_outbound<W>(
    mut writer: FrameWriter<W>,
    mut outbound_rx: mpsc::Receiver<Message>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbound_rx.recv().await {
        writer.send_message(&msg).await?;
    }
    Ok(())
}

struct Connection {
    hub: Arc<Hub>,
    connection_id: String,
    stream_buffer_capacity: usize,
    /// All outbound frames funnel through this queue to the writer task.
    outbound: mpsc::Sender<Message>,
    /// Open client-to-server streams, owned by this task alone.
    upstream: UpstreamStreams,
    /// In-progress server-to-client streams by invocation id, for cancel.
    out_streams: HashMap<String, JoinHandle<()>>,
    /// In-flight unary hub calls, aborted on teardown.
    invocations: Vec<JoinHandle<()>>,
}

impl Connection {
    async fn drive<R>(
        &mut self,
        reader: &mut FrameReader<R>,
        keep_alive: Duration,
        writer_task: &mut Option<JoinHandle<io::Result<()>>>,
    ) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let keepalive_enabled = !keep_alive.is_zero();
        let period = if keepalive_enabled {
            keep_alive
        } else {
            Duration::from_secs(1)
        };
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                frame = reader.recv_frame() => match frame {
                    Ok(Some(bytes)) => match Message::from_slice(&bytes) {
                        Ok(msg) => match self.handle_message(msg).await {
                            Flow::Continue => {}
                            Flow::PeerClose => return Ok(()),
                        },
                        Err(e) => {
                            warn!(
                                connection_id = %self.connection_id,
                                error = %e,
                                "closing connection on undecodable frame"
                            );
                            self.send_close(e.to_string()).await;
                            return Err(ConnectionError::Protocol(e.to_string()));
                        }
                    },
                    Ok(None) => {
                        debug!(connection_id = %self.connection_id, "peer hung up without close");
                        return Ok(());
                    }
                    Err(e) => return Err(ConnectionError::Io(e)),
                },

                _ = ticker.tick(), if keepalive_enabled => {
                    let _ = self.outbound.send(Message::Ping).await;
                }

                res = async {
                    match writer_task.as_mut() {
                        Some(task) => task.await,
                        None => std::future::pending().await,
                    }
                } => {
                    *writer_task = None;
                    return match res {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(ConnectionError::Io(e)),
                        Err(e) => Err(ConnectionError::Protocol(format!("writer task failed: {e}"))),
                    };
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Flow {
        match msg {
            Message::Ping => Flow::Continue,

            Message::Close(close) => {
                debug!(
                    connection_id = %self.connection_id,
                    error = ?close.error,
                    "peer closed the connection"
                );
                Flow::PeerClose
            }

            Message::Invocation(inv) => {
                self.handle_invocation(inv, false).await;
                Flow::Continue
            }

            Message::StreamInvocation(inv) => {
                self.handle_invocation(inv, true).await;
                Flow::Continue
            }

            Message::StreamItem(item) => {
                if let Err(e) = self.upstream.receive_stream_item(&item).await {
                    warn!(
                        connection_id = %self.connection_id,
                        stream_id = %item.invocation_id,
                        error = %e,
                        "client stream item not delivered"
                    );
                }
                Flow::Continue
            }

            Message::Completion(completion) => {
                if let Err(e) = self.upstream.receive_completion(&completion).await {
                    warn!(
                        connection_id = %self.connection_id,
                        stream_id = %completion.invocation_id,
                        error = %e,
                        "client stream completion rejected"
                    );
                }
                Flow::Continue
            }

            Message::CancelInvocation(cancel) => {
                if let Some(handle) = self.out_streams.remove(&cancel.invocation_id) {
                    debug!(
                        connection_id = %self.connection_id,
                        invocation_id = %cancel.invocation_id,
                        "stream invocation cancelled"
                    );
                    handle.abort();
                } else if let Err(e) = self.upstream.cancel(&cancel.invocation_id) {
                    warn!(
                        connection_id = %self.connection_id,
                        invocation_id = %cancel.invocation_id,
                        error = %e,
                        "cancel for unknown invocation"
                    );
                }
                Flow::Continue
            }
        }
    }

    async fn handle_invocation(&mut self, inv: Invocation, streaming_requested: bool) {
        let hub = Arc::clone(&self.hub);
        let Some(method) = hub.method(&inv.target) else {
            debug!(
                connection_id = %self.connection_id,
                target = %inv.target,
                "invocation of unknown method"
            );
            self.reply_error(
                inv.invocation_id.as_deref(),
                BindError::UnknownMethod(inv.target.clone()).to_string(),
            )
            .await;
            return;
        };

        let kind_error = if method.callable().is_streaming() && !streaming_requested {
            Some(BindError::RequiresStreamInvocation {
                target: method.name().to_string(),
            })
        } else if !method.callable().is_streaming() && streaming_requested {
            Some(BindError::NotStreaming {
                target: method.name().to_string(),
            })
        } else if streaming_requested && inv.invocation_id.is_none() {
            Some(BindError::MissingInvocationId {
                target: method.name().to_string(),
            })
        } else if let Some(id) = inv.invocation_id.as_deref().filter(|id| {
            // An invocation id stays owned by its outbound stream until the
            // producer task has finished.
            streaming_requested && self.out_streams.get(*id).is_some_and(|h| !h.is_finished())
        }) {
            Some(BindError::DuplicateInvocationId(id.to_string()))
        } else {
            None
        };
        if let Some(e) = kind_error {
            warn!(connection_id = %self.connection_id, error = %e, "invocation rejected");
            self.reply_error(inv.invocation_id.as_deref(), e.to_string()).await;
            return;
        }

        let bound = match method.bind(&inv, &mut self.upstream, self.stream_buffer_capacity) {
            Ok(bound) => bound,
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    target = %inv.target,
                    error = %e,
                    "failed to bind invocation"
                );
                self.reply_error(inv.invocation_id.as_deref(), e.to_string()).await;
                return;
            }
        };

        match method.callable() {
            HubCallable::Unary(f) => {
                let fut = f(bound.arguments, bound.sinks);
                let outbound = self.outbound.clone();
                let invocation_id = inv.invocation_id.clone();
                let connection_id = self.connection_id.clone();
                let target = method.name().to_string();

                let handle = tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(fut).catch_unwind().await;
                    let completion = match outcome {
                        Ok(Ok(Some(value))) => {
                            invocation_id.map(|id| Completion::result(id, value))
                        }
                        Ok(Ok(None)) => invocation_id.map(Completion::done),
                        Ok(Err(e)) => {
                            debug!(%connection_id, %target, error = %e, "hub method returned an error");
                            invocation_id.map(|id| Completion::error(id, e))
                        }
                        Err(panic) => {
                            let message = panic_message(panic);
                            error!(%connection_id, %target, %message, "hub method panicked");
                            invocation_id.map(|id| Completion::error(id, message))
                        }
                    };
                    if let Some(completion) = completion {
                        let _ = outbound.send(Message::Completion(completion)).await;
                    }
                });
                self.invocations.retain(|h| !h.is_finished());
                self.invocations.push(handle);
            }

            HubCallable::Streaming(f) => {
                // Id presence was checked above.
                let Some(id) = inv.invocation_id.clone() else {
                    return;
                };
                let mut stream = f(bound.arguments, bound.sinks);
                let outbound = self.outbound.clone();
                let task_id = id.clone();

                let handle = tokio::spawn(async move {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(value) => {
                                let item = StreamItem::new(task_id.clone(), value);
                                if outbound.send(Message::StreamItem(item)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                let completion = Completion::error(task_id.clone(), e);
                                let _ = outbound.send(Message::Completion(completion)).await;
                                return;
                            }
                        }
                    }
                    let completion = Completion::done(task_id);
                    let _ = outbound.send(Message::Completion(completion)).await;
                });
                self.out_streams.retain(|_, h| !h.is_finished());
                self.out_streams.insert(id, handle);
            }
        }
    }

    /// Report a per-invocation failure. Blind invocations have nowhere to
    /// report to, so the error stays in the log.
    async fn reply_error(&self, invocation_id: Option<&str>, error: String) {
        if let Some(id) = invocation_id {
            let completion = Completion::error(id, error);
            let _ = self.outbound.send(Message::Completion(completion)).await;
        }
    }

    async fn send_close(&self, error: String) {
        let _ = self
            .outbound
            .send(Message::Close(Close::new(Some(error))))
            .await;
    }

    fn shutdown(&mut self) {
        for (_, handle) in self.out_streams.drain() {
            handle.abort();
        }
        for handle in self.invocations.drain(..) {
            handle.abort();
        }
        self.upstream.clear();
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("hub method panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("hub method panicked: {s}")
    } else {
        "hub method panicked".to_string()
    }
}
