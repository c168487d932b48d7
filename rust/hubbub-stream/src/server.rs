//! Server entry points for framed byte-stream transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use hubbub_session::Hub;

use crate::connection::{self, ConnectionError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-server protocol configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bound on the time from connect to a completed handshake.
    pub handshake_timeout: Duration,
    /// Per-item deadline for delivering a client-streamed value to a hub
    /// method's sink.
    pub hub_chan_receive_timeout: Duration,
    /// Buffer size of each sink channel.
    pub stream_buffer_capacity: usize,
    /// Ping cadence. Zero disables keepalive.
    pub keep_alive_interval: Duration,
    /// Bound on a single inbound frame.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            hub_chan_receive_timeout: Duration::from_secs(5),
            stream_buffer_capacity: 10,
            keep_alive_interval: Duration::from_secs(15),
            max_frame_size: 1024 * 1024,
        }
    }
}

/// A hub server. Cloning is cheap; clones share the hub and configuration.
///
/// Transport negotiation is someone else's job: anything that hands this
/// server a duplex byte stream works, from a TCP socket to an in-memory
/// duplex pipe in tests.
#[derive(Clone)]
pub struct Server {
    hub: Arc<Hub>,
    config: ServerConfig,
}

impl Server {
    pub fn new(hub: Hub) -> Self {
        Self::with_config(hub, ServerConfig::default())
    }

    pub fn with_config(hub: Hub, config: ServerConfig) -> Self {
        Self {
            hub: Arc::new(hub),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run one connection to completion with a generated connection id.
    pub async fn run<S>(&self, stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = format!("conn-{}", NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        self.run_with_id(stream, id).await
    }

    /// Run one connection with a transport-supplied connection id.
    pub async fn run_with_id<S>(
        &self,
        stream: S,
        connection_id: impl Into<String>,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection_id = connection_id.into();
        debug!(%connection_id, "connection starting");
        let result = connection::run(
            stream,
            Arc::clone(&self.hub),
            self.config.clone(),
            connection_id.clone(),
        )
        .await;
        match &result {
            Ok(()) => debug!(%connection_id, "connection finished"),
            Err(e) => debug!(%connection_id, error = %e, "connection ended with error"),
        }
        result
    }

    /// Accept TCP connections forever, one driver task per connection.
    pub async fn listen(&self, listener: &tokio::net::TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!(%addr, "accepted connection");
            let server = self.clone();
            tokio::spawn(async move {
                let _ = server.run(stream).await;
            });
        }
    }
}
