use std::time::Duration;

/// Error from the client-streaming ingest path.
///
/// None of these are fatal to the connection; the driver reports them and
/// keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamInError {
    /// Stream item for an id that was never opened (or already closed).
    #[error("unknown stream id \"{0}\"")]
    UnknownStream(String),
    /// Attempt to open a stream id that is already bound to an open sink.
    /// Ids are never reused within a connection.
    #[error("duplicate stream id \"{0}\"")]
    DuplicateStream(String),
    /// Completion for an id that was never opened (or already closed).
    #[error("received completion with unknown id {0}")]
    UnknownCompletion(String),
    /// A JSON number could not be coerced into the sink's element type.
    #[error("cannot convert {number} to {target}")]
    Conversion { number: f64, target: String },
    /// A JSON array paired with a non-sequence element type.
    #[error("stream item of kind array paired with channel of type {0}")]
    KindMismatch(String),
    /// A completion carried a result for a stream that already produced items.
    #[error("client side streaming: received completion with result")]
    ResultOnStream,
    /// The hub did not drain the sink within the per-item deadline.
    #[error("timeout ({0:?}) waiting for hub to receive client streamed value")]
    HubChanTimeout(Duration),
    /// The hub dropped its receiver; delivery is a normal error, not a crash.
    #[error("send on closed sink")]
    SinkClosed,
}

/// Error binding an invocation to a registered hub method.
///
/// A failed bind means the hub method is never called; the error travels
/// back as a per-invocation completion when the invocation has an id.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error("unknown method \"{0}\"")]
    UnknownMethod(String),
    #[error("method \"{target}\" expects {expected} arguments, got {got}")]
    Arity {
        target: String,
        expected: usize,
        got: usize,
    },
    /// More sink parameters than the client supplied stream ids for.
    #[error("method {target} has more chan parameters than the client will stream")]
    MissingStreamIds { target: String },
    /// A supplied stream id is already bound to an open sink, or repeated
    /// within the same invocation.
    #[error("stream id \"{stream_id}\" is already bound to an open stream")]
    DuplicateStreamId { stream_id: String },
    /// A stream invocation reused the id of a still-running outbound stream.
    #[error("invocation id \"{0}\" is already in use by a running stream")]
    DuplicateInvocationId(String),
    /// A plain invocation targeted a method that produces a stream.
    #[error("method \"{target}\" returns a stream and requires a stream invocation")]
    RequiresStreamInvocation { target: String },
    /// A stream invocation targeted a method that returns a single value.
    #[error("method \"{target}\" does not return a stream")]
    NotStreaming { target: String },
    /// A stream invocation without an id has nowhere to stream back to.
    #[error("stream invocation of \"{target}\" carries no invocation id")]
    MissingInvocationId { target: String },
}
