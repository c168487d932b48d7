//! Handshake gate for new connections.
//!
//! The first frame a peer sends must announce a protocol this server speaks.
//! Nothing else is processed until that frame arrives, and a connection that
//! fails the handshake never reaches a hub method.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use hubbub_wire::{HandshakeRequest, HandshakeResponse};

use crate::connection::ConnectionError;
use crate::framing::{FrameReader, FrameWriter};

/// Perform the server side of the handshake.
///
/// On success the connection is considered connected and the caller may
/// start the message loop. Every failure path terminates the connection:
/// a read failure is silent, a recognizably bad handshake gets an error
/// response first, and a response write failure stops everything including
/// further reads.
pub(crate) async fn perform<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    timeout: Duration,
    connection_id: &str,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let frame = match tokio::time::timeout(timeout, reader.recv_frame()).await {
        Err(_) => {
            debug!(connection_id, ?timeout, "no handshake frame within timeout");
            return Err(ConnectionError::Handshake("handshake timeout".into()));
        }
        Ok(Ok(None)) => {
            return Err(ConnectionError::Handshake(
                "connection closed before handshake".into(),
            ));
        }
        Ok(Err(e)) => return Err(ConnectionError::Io(e)),
        Ok(Ok(Some(frame))) => frame,
    };

    let request: HandshakeRequest = match serde_json::from_slice(&frame) {
        Ok(request) => request,
        Err(e) => {
            let reason = format!("unable to parse handshake request: {e}");
            writer
                .send_json(&HandshakeResponse::error(reason.clone()))
                .await
                .map_err(ConnectionError::Io)?;
            return Err(ConnectionError::Handshake(reason));
        }
    };

    if request.protocol != "json" || request.version != 1 {
        let reason = format!(
            "protocol \"{}\" version {} is not supported",
            request.protocol, request.version
        );
        writer
            .send_json(&HandshakeResponse::error(reason.clone()))
            .await
            .map_err(ConnectionError::Io)?;
        return Err(ConnectionError::Handshake(reason));
    }

    writer
        .send_json(&HandshakeResponse::ok())
        .await
        .map_err(ConnectionError::Io)?;
    debug!(connection_id, "handshake completed");
    Ok(())
}
