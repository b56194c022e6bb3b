//! The response channel between a run function and its caller.
//!
//! [`Emitter`] is the write end, [`Receiver`] the read end of a bounded,
//! ordered channel. Both ends observe the request's [`RequestContext`]:
//! cancellation fails pending and future emits and makes `next` return the
//! cancellation error without consuming buffered values.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::debug;

use crate::command::OutputType;
use crate::context::RequestContext;
use crate::error::{CancelCause, CmdError, CmdResult};

/// Default number of values buffered between producer and consumer.
pub const DEFAULT_CAPACITY: usize = 8;

/// A value that can travel through the response channel.
pub trait Emittable: Any + Send + Sync + fmt::Debug {
    /// Structured JSON form, used by the JSON fallback encoder.
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T> Emittable for T
where
    T: Serialize + Any + Send + Sync + fmt::Debug,
{
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Byte stream emitted by reader-returning commands.
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// One item observed by the receiver.
pub enum Payload {
    Value(Box<dyn Emittable>),
    Reader(BoxReader),
}

impl Payload {
    /// Borrow the value if it has type `T`.
    pub fn value_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Value(v) => v.as_ref().as_any().downcast_ref::<T>(),
            Self::Reader(_) => None,
        }
    }

    /// Take the value if it has type `T`, giving the payload back otherwise.
    pub fn into_value<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::Value(v) if v.as_ref().as_any().is::<T>() => v
                .into_any()
                .downcast::<T>()
                .map(|b| *b)
                .map_err(|_| unreachable_payload()),
            other => Err(other),
        }
    }

    pub fn is_reader(&self) -> bool {
        matches!(self, Self::Reader(_))
    }
}

// Only reachable if `is::<T>` and `downcast::<T>` disagree.
fn unreachable_payload() -> Payload {
    Payload::Reader(Box::pin(tokio::io::empty()))
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

enum Item {
    Payload(Payload),
    Error(CmdError),
}

struct Shared {
    tx: Mutex<Option<mpsc::Sender<Item>>>,
    ctx: RequestContext,
    expected: Option<OutputType>,
}

/// Write end of a response channel.
///
/// Clones share the same stream. The stream ends when [`Emitter::close`] is
/// called or when the last clone is dropped.
#[derive(Clone)]
pub struct Emitter {
    shared: Arc<Shared>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("closed", &self.is_closed())
            .field("expected", &self.shared.expected.map(|t| t.name()))
            .finish()
    }
}

/// Create a channel with the default capacity.
pub fn channel(ctx: RequestContext, expected: Option<OutputType>) -> (Emitter, Receiver) {
    channel_with_capacity(ctx, expected, DEFAULT_CAPACITY)
}

/// Create a channel buffering up to `capacity` values.
pub fn channel_with_capacity(
    ctx: RequestContext,
    expected: Option<OutputType>,
    capacity: usize,
) -> (Emitter, Receiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let emitter = Emitter {
        shared: Arc::new(Shared {
            tx: Mutex::new(Some(tx)),
            ctx: ctx.clone(),
            expected,
        }),
    };
    let receiver = Receiver {
        rx,
        ctx,
        expected,
        pending: None,
        terminal: None,
        done: false,
    };
    (emitter, receiver)
}

impl Emitter {
    /// Enqueue one value, waiting while the buffer is full.
    ///
    /// A value whose type differs from the declared output type sets a
    /// fatal error on the stream and is not delivered.
    pub async fn emit<T: Emittable>(&self, value: T) -> CmdResult<()> {
        self.emit_boxed(Box::new(value)).await
    }

    pub async fn emit_boxed(&self, value: Box<dyn Emittable>) -> CmdResult<()> {
        if let Some(expected) = self.shared.expected
            && value.as_ref().as_any().type_id() != expected.id()
        {
            let err = CmdError::TypeMismatch {
                expected: expected.name(),
                actual: value.type_name(),
            };
            let _ = self.set_error(err.clone()).await;
            return Err(err);
        }
        self.send(Item::Payload(Payload::Value(value))).await
    }

    /// Emit a byte stream. Readers are accepted regardless of the declared
    /// output type.
    pub async fn emit_reader(&self, reader: impl AsyncRead + Send + 'static) -> CmdResult<()> {
        self.send(Item::Payload(Payload::Reader(Box::pin(reader)))).await
    }

    /// Forward an already received payload.
    pub async fn emit_payload(&self, payload: Payload) -> CmdResult<()> {
        match payload {
            Payload::Value(v) => self.emit_boxed(v).await,
            Payload::Reader(r) => self.send(Item::Payload(Payload::Reader(r))).await,
        }
    }

    /// Emit a single value and close.
    pub async fn emit_once<T: Emittable>(&self, value: T) -> CmdResult<()> {
        let result = self.emit(value).await;
        self.close();
        result
    }

    /// End the stream. Idempotent.
    pub fn close(&self) {
        self.shared.tx.lock().take();
    }

    /// Terminate the stream with `err`. Receivers see it after the values
    /// already buffered.
    pub async fn set_error(&self, err: CmdError) -> CmdResult<()> {
        let Some(tx) = self.shared.tx.lock().take() else {
            return Err(CmdError::Closed);
        };
        debug!(kind = %err.kind(), error = %err, "setting error on response stream");
        tokio::select! {
            biased;
            _ = self.shared.ctx.cancelled() => Err(self.shared.ctx.error()),
            sent = tx.send(Item::Error(err)) => {
                sent.map_err(|_| CmdError::Cancelled(CancelCause::Disconnected))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.tx.lock().is_none()
    }

    /// The request context this emitter observes.
    pub fn context(&self) -> &RequestContext {
        &self.shared.ctx
    }

    pub fn expected(&self) -> Option<OutputType> {
        self.shared.expected
    }

    /// View as an emitter of `T` values.
    pub fn typed<T: Emittable>(&self) -> TypedEmitter<T> {
        TypedEmitter {
            inner: self.clone(),
            _marker: PhantomData,
        }
    }

    async fn send(&self, item: Item) -> CmdResult<()> {
        let Some(tx) = self.shared.tx.lock().clone() else {
            return Err(CmdError::Closed);
        };
        self.shared.ctx.check()?;
        tokio::select! {
            biased;
            _ = self.shared.ctx.cancelled() => Err(self.shared.ctx.error()),
            sent = tx.send(item) => {
                sent.map_err(|_| CmdError::Cancelled(CancelCause::Disconnected))
            }
        }
    }
}

/// Emitter restricted to values of one type.
pub struct TypedEmitter<T> {
    inner: Emitter,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for TypedEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Emittable> TypedEmitter<T> {
    pub async fn emit(&self, value: T) -> CmdResult<()> {
        self.inner.emit(value).await
    }

    pub async fn emit_once(&self, value: T) -> CmdResult<()> {
        self.inner.emit_once(value).await
    }

    pub fn untyped(&self) -> &Emitter {
        &self.inner
    }
}

/// Read end of a response channel.
pub struct Receiver {
    rx: mpsc::Receiver<Item>,
    ctx: RequestContext,
    expected: Option<OutputType>,
    pending: Option<Payload>,
    terminal: Option<CmdError>,
    done: bool,
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("expected", &self.expected.map(|t| t.name()))
            .field("terminal", &self.terminal)
            .field("done", &self.done)
            .finish()
    }
}

impl Receiver {
    /// A receiver whose stream consists of a single error.
    pub fn failed(ctx: RequestContext, err: CmdError) -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            rx,
            ctx,
            expected: None,
            pending: None,
            terminal: Some(err),
            done: false,
        }
    }

    /// Next payload, `Ok(None)` at end of stream.
    ///
    /// An error set by the producer or a cancellation is returned again by
    /// every later call.
    pub async fn next(&mut self) -> CmdResult<Option<Payload>> {
        if let Some(payload) = self.pending.take() {
            return Ok(Some(payload));
        }
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        if self.done {
            return Ok(None);
        }

        let received = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => None,
            item = self.rx.recv() => Some(item),
        };

        match received {
            None => {
                let err = self.ctx.error();
                self.terminal = Some(err.clone());
                Err(err)
            }
            Some(Some(Item::Payload(payload))) => Ok(Some(payload)),
            Some(Some(Item::Error(err))) => {
                self.terminal = Some(err.clone());
                Err(err)
            }
            Some(None) => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Push a payload back so the next call to [`Receiver::next`] returns it.
    pub fn unread(&mut self, payload: Payload) {
        self.pending = Some(payload);
    }

    /// Drain the stream into a vector.
    pub async fn collect(mut self) -> CmdResult<Vec<Payload>> {
        let mut out = Vec::new();
        while let Some(payload) = self.next().await? {
            out.push(payload);
        }
        Ok(out)
    }

    /// Drain the stream, downcasting every value to `T`.
    pub async fn collect_values<T: Any>(self) -> CmdResult<Vec<T>> {
        self.collect()
            .await?
            .into_iter()
            .map(|p| {
                p.into_value::<T>().map_err(|other| CmdError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                    actual: match other {
                        Payload::Value(v) => v.type_name(),
                        Payload::Reader(_) => "reader",
                    },
                })
            })
            .collect()
    }

    /// Convert into a stream that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = CmdResult<Payload>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut rx = state?;
            match rx.next().await {
                Ok(Some(payload)) => Some((Ok(payload), Some(rx))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn expected(&self) -> Option<OutputType> {
        self.expected
    }
}
