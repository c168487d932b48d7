use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

/// Receive half of a sink channel, in raw (already-coerced JSON) form.
///
/// Hub methods registered through the raw API get these; typed registrations
/// wrap one in a [`StreamRx`].
pub type ValueRx = mpsc::Receiver<Value>;

/// Typed receive half of a sink channel, handed to a hub method.
///
/// The ingest side holds the only send/close capability: `recv` returns
/// `Ok(None)` exactly once, when the peer completes, cancels, or the
/// connection tears the stream down.
pub struct StreamRx<T> {
    inner: ValueRx,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StreamRx<T> {
    pub fn new(inner: ValueRx) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> StreamRx<T> {
    /// Receive the next element, `Ok(None)` once the stream ends.
    ///
    /// Items were already coerced into this element type on the ingest path,
    /// so a decode error here means the peer streamed a value of the wrong
    /// shape entirely (e.g. an object into an `i32` sink).
    pub async fn recv(&mut self) -> Result<Option<T>, serde_json::Error> {
        match self.inner.recv().await {
            Some(value) => serde_json::from_value(value).map(Some),
            None => Ok(None),
        }
    }
}

impl<T> std::fmt::Debug for StreamRx<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRx").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_decodes_items_and_ends_with_none() {
        let (tx, rx) = mpsc::channel(4);
        let mut rx = StreamRx::<i32>::new(rx);

        tx.send(Value::from(1)).await.unwrap();
        tx.send(Value::from(2)).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), Some(1));
        assert_eq!(rx.recv().await.unwrap(), Some(2));
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn recv_surfaces_decode_errors_for_foreign_shapes() {
        let (tx, rx) = mpsc::channel(1);
        let mut rx = StreamRx::<i32>::new(rx);

        tx.send(serde_json::json!({"not": "a number"})).await.unwrap();
        assert!(rx.recv().await.is_err());
    }
}
