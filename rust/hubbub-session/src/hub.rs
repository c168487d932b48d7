//! Hub method registry and invocation binding.
//!
//! A hub is a named set of server methods a peer can invoke. Lookup is
//! case-insensitive. Each method carries a descriptor recording its plain
//! argument count, the element types of its sink-channel arguments, and
//! whether it produces a result stream - the binding layer is entirely
//! schema-driven, no runtime reflection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use hubbub_wire::Invocation;

use crate::{BindError, ElementType, SinkItem, StreamRx, UpstreamStreams, ValueRx};

/// Outcome of a unary hub call: an optional result value, or an error string
/// that travels back in the completion.
pub type HubResult = Result<Option<Value>, String>;

/// Items produced by a streaming hub method. An `Err` item ends the stream
/// with an error completion.
pub type ItemStream = BoxStream<'static, Result<Value, String>>;

/// The invocable half of a registered method.
#[derive(Clone)]
pub enum HubCallable {
    Unary(Arc<dyn Fn(Vec<Value>, Vec<ValueRx>) -> BoxFuture<'static, HubResult> + Send + Sync>),
    Streaming(Arc<dyn Fn(Vec<Value>, Vec<ValueRx>) -> ItemStream + Send + Sync>),
}

impl HubCallable {
    pub fn is_streaming(&self) -> bool {
        matches!(self, HubCallable::Streaming(_))
    }
}

/// Static shape of a registered method, recorded at registration time.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    /// Number of plain (non-sink) arguments, decoded from the wire
    /// `arguments` array.
    pub arguments: usize,
    /// Element types of the sink-channel arguments, in declaration order.
    /// Each consumes one entry of the invocation's `streamIds`.
    pub sinks: Vec<ElementType>,
    /// Whether the method's result is a stream of items.
    pub streaming: bool,
}

/// A registered hub method: descriptor plus callable.
pub struct HubMethod {
    name: String,
    descriptor: MethodDescriptor,
    callable: HubCallable,
}

/// Arguments and sinks bound for one invocation, ready to hand to the
/// callable.
#[derive(Debug)]
pub struct BoundCall {
    pub arguments: Vec<Value>,
    pub sinks: Vec<ValueRx>,
}

impl HubMethod {
    /// The method name as registered (original casing).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn callable(&self) -> &HubCallable {
        &self.callable
    }

    /// Bind an invocation to this method.
    ///
    /// Binding is all-or-nothing: a failed bind registers no sinks and the
    /// method is never called. A `streamIds` entry that is already bound to
    /// an open sink - or repeated within the same invocation - fails the
    /// bind with a duplicate-stream-id error. Extra `streamIds` beyond the
    /// declared sink parameters stay unbound; items for them are
    /// unknown-stream errors later.
    pub fn bind(
        &self,
        invocation: &Invocation,
        upstream: &mut UpstreamStreams,
        capacity: usize,
    ) -> Result<BoundCall, BindError> {
        if invocation.arguments.len() != self.descriptor.arguments {
            return Err(BindError::Arity {
                target: self.name.clone(),
                expected: self.descriptor.arguments,
                got: invocation.arguments.len(),
            });
        }
        if self.descriptor.sinks.len() > invocation.stream_ids.len() {
            return Err(BindError::MissingStreamIds {
                target: self.name.clone(),
            });
        }

        let mut sinks = Vec::with_capacity(self.descriptor.sinks.len());
        for (element, stream_id) in self.descriptor.sinks.iter().zip(&invocation.stream_ids) {
            match upstream.open(stream_id.clone(), element.clone(), capacity) {
                Ok(rx) => sinks.push(rx),
                Err(_) => {
                    // Release the sinks this invocation already opened.
                    for opened in &invocation.stream_ids[..sinks.len()] {
                        let _ = upstream.cancel(opened);
                    }
                    return Err(BindError::DuplicateStreamId {
                        stream_id: stream_id.clone(),
                    });
                }
            }
        }

        Ok(BoundCall {
            arguments: invocation.arguments.clone(),
            sinks,
        })
    }
}

/// Named registry of hub methods with case-insensitive lookup.
///
/// # Example
///
/// ```ignore
/// let mut hub = Hub::new();
/// hub.unary("add", |(a, b): (i64, i64)| async move { Ok(a + b) });
/// hub.client_streaming("sum", |_: (), mut items: StreamRx<i64>| async move {
///     let mut total = 0;
///     while let Some(n) = items.recv().await.map_err(|e| e.to_string())? {
///         total += n;
///     }
///     Ok(total)
/// });
/// ```
#[derive(Default)]
pub struct Hub {
    methods: HashMap<String, HubMethod>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method from its raw descriptor and callable.
    ///
    /// The typed helpers below cover the common shapes; this is the escape
    /// hatch for methods with several sinks or unusual signatures. A second
    /// registration under the same (case-insensitive) name replaces the
    /// first.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        descriptor: MethodDescriptor,
        callable: HubCallable,
    ) {
        let name = name.into();
        self.methods.insert(
            name.to_ascii_lowercase(),
            HubMethod {
                name,
                descriptor,
                callable,
            },
        );
    }

    /// Look up a method by target name, case-insensitively.
    pub fn method(&self, target: &str) -> Option<&HubMethod> {
        self.methods.get(&target.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Register a unary method. `()` results produce a bare completion.
    pub fn unary<A, R, F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        A: HubArguments,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let callable = HubCallable::Unary(Arc::new(move |values, _sinks| {
            let f = f.clone();
            Box::pin(async move {
                let args = A::from_values(values).map_err(|e| format!("invalid arguments: {e}"))?;
                let out = f(args).await?;
                into_result_value(out)
            })
        }));
        self.register(
            name,
            MethodDescriptor {
                arguments: A::LEN,
                sinks: Vec::new(),
                streaming: false,
            },
            callable,
        );
    }

    /// Register a method taking one client-to-server stream after its plain
    /// arguments.
    pub fn client_streaming<A, E, R, F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        A: HubArguments,
        E: SinkItem,
        R: Serialize + Send + 'static,
        F: Fn(A, StreamRx<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        let f = Arc::new(f);
        let callable = HubCallable::Unary(Arc::new(move |values, mut sinks| {
            let f = f.clone();
            Box::pin(async move {
                let args = A::from_values(values).map_err(|e| format!("invalid arguments: {e}"))?;
                let Some(rx) = sinks.pop() else {
                    return Err("missing channel argument".to_string());
                };
                let out = f(args, StreamRx::new(rx)).await?;
                into_result_value(out)
            })
        }));
        self.register(
            name,
            MethodDescriptor {
                arguments: A::LEN,
                sinks: vec![E::element_type()],
                streaming: false,
            },
            callable,
        );
    }

    /// Register a method whose result is a stream of items driven back to
    /// the caller.
    pub fn server_streaming<A, E, S, F>(&mut self, name: impl Into<String>, f: F)
    where
        A: HubArguments,
        E: Serialize + Send + 'static,
        S: futures::Stream<Item = Result<E, String>> + Send + 'static,
        F: Fn(A) -> S + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let callable = HubCallable::Streaming(Arc::new(move |values, _sinks| {
            match A::from_values(values) {
                Ok(args) => f(args)
                    .map(|item| {
                        item.and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string()))
                    })
                    .boxed(),
                Err(e) => {
                    let error = format!("invalid arguments: {e}");
                    futures::stream::once(async move { Err(error) }).boxed()
                }
            }
        }));
        self.register(
            name,
            MethodDescriptor {
                arguments: A::LEN,
                sinks: Vec::new(),
                streaming: true,
            },
            callable,
        );
    }
}

fn into_result_value<R: Serialize>(out: R) -> HubResult {
    let value = serde_json::to_value(out).map_err(|e| e.to_string())?;
    Ok(if value.is_null() { None } else { Some(value) })
}

/// Plain-argument tuples decodable from the wire `arguments` array.
pub trait HubArguments: DeserializeOwned + Send + 'static {
    const LEN: usize;

    fn from_values(values: Vec<Value>) -> Result<Self, serde_json::Error>;
}

impl HubArguments for () {
    const LEN: usize = 0;

    fn from_values(_values: Vec<Value>) -> Result<Self, serde_json::Error> {
        Ok(())
    }
}

macro_rules! impl_hub_arguments {
    ($len:expr => $($ty:ident),+) => {
        impl<$($ty),+> HubArguments for ($($ty,)+)
        where
            $($ty: DeserializeOwned + Send + 'static,)+
        {
            const LEN: usize = $len;

            fn from_values(values: Vec<Value>) -> Result<Self, serde_json::Error> {
                serde_json::from_value(Value::Array(values))
            }
        }
    };
}

impl_hub_arguments!(1 => A1);
impl_hub_arguments!(2 => A1, A2);
impl_hub_arguments!(3 => A1, A2, A3);
impl_hub_arguments!(4 => A1, A2, A3, A4);
