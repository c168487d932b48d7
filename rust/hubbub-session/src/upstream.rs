//! Ingest side of client-to-server streaming.
//!
//! The table mapping stream ids to sink channels is owned exclusively by the
//! per-connection driver task; hub methods only ever see the receive half of
//! a sink, so the sink itself is the one synchronization boundary between the
//! wire and the hub.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::trace;

use hubbub_wire::{Completion, StreamItem};

use crate::{ElementType, StreamInError, ValueRx};

struct UpstreamEntry {
    sink: mpsc::Sender<Value>,
    element: ElementType,
    /// Set on the first delivered item; a later completion carrying a result
    /// for this id is then a protocol violation.
    has_produced_item: bool,
}

/// Per-connection table of open client-to-server streams.
pub struct UpstreamStreams {
    entries: HashMap<String, UpstreamEntry>,
    receive_timeout: Duration,
}

impl UpstreamStreams {
    pub fn new(receive_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            receive_timeout,
        }
    }

    /// Open a sink for `stream_id` and return the receive half to hand to
    /// the hub method.
    ///
    /// Stream ids are never reused within a connection, so an id that is
    /// already bound to an open sink is refused rather than overwritten.
    /// The send half stays here, and dropping it (in `receive_completion` or
    /// `cancel`) is the single close capability for the stream.
    pub fn open(
        &mut self,
        stream_id: impl Into<String>,
        element: ElementType,
        capacity: usize,
    ) -> Result<ValueRx, StreamInError> {
        let stream_id = stream_id.into();
        if self.entries.contains_key(&stream_id) {
            return Err(StreamInError::DuplicateStream(stream_id));
        }
        let (sink, rx) = mpsc::channel(capacity.max(1));
        trace!(%stream_id, element = %element, "opening upstream sink");
        self.entries.insert(
            stream_id,
            UpstreamEntry {
                sink,
                element,
                has_produced_item: false,
            },
        );
        Ok(rx)
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.entries.contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Coerce and deliver one stream item to its sink.
    ///
    /// Delivery blocks for at most the configured receive timeout; on timeout
    /// the sink stays open (the hub may still be draining), the error just
    /// travels back to the caller.
    pub async fn receive_stream_item(&mut self, item: &StreamItem) -> Result<(), StreamInError> {
        let timeout = self.receive_timeout;
        let Some(entry) = self.entries.get_mut(&item.invocation_id) else {
            return Err(StreamInError::UnknownStream(item.invocation_id.clone()));
        };
        entry.has_produced_item = true;
        let value = entry.element.coerce(item.item.clone())?;
        deliver(&entry.sink, value, timeout).await
    }

    /// Process the terminal message for a stream id.
    ///
    /// A completion carrying a `result` is either a violation (the stream
    /// already produced items) or a final stream item delivered under the
    /// usual coercion rules. Either way the sink closes exactly once and the
    /// id is gone afterwards.
    pub async fn receive_completion(&mut self, completion: &Completion) -> Result<(), StreamInError> {
        let timeout = self.receive_timeout;
        let Some(entry) = self.entries.get(&completion.invocation_id) else {
            return Err(StreamInError::UnknownCompletion(
                completion.invocation_id.clone(),
            ));
        };

        let mut outcome = Ok(());
        if let Some(result) = &completion.result {
            if entry.has_produced_item {
                outcome = Err(StreamInError::ResultOnStream);
            } else {
                outcome = match entry.element.coerce(result.clone()) {
                    Ok(value) => deliver(&entry.sink, value, timeout).await,
                    Err(e) => Err(e),
                };
            }
        }

        // Removing the entry drops the only sender, which is the close.
        self.entries.remove(&completion.invocation_id);
        outcome
    }

    /// Tear down a stream without a completion. Later items for this id are
    /// unknown-stream errors.
    pub fn cancel(&mut self, stream_id: &str) -> Result<(), StreamInError> {
        match self.entries.remove(stream_id) {
            Some(_) => {
                trace!(%stream_id, "upstream sink cancelled");
                Ok(())
            }
            None => Err(StreamInError::UnknownStream(stream_id.to_string())),
        }
    }

    /// Drop every open sink. Used on connection teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

async fn deliver(
    sink: &mpsc::Sender<Value>,
    value: Value,
    timeout: Duration,
) -> Result<(), StreamInError> {
    sink.send_timeout(value, timeout)
        .await
        .map_err(|e| match e {
            SendTimeoutError::Timeout(_) => StreamInError::HubChanTimeout(timeout),
            SendTimeoutError::Closed(_) => StreamInError::SinkClosed,
        })
}
