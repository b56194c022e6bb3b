//! Validated requests.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

use crate::arguments::StdinMode;
use crate::command::Command;
use crate::context::RequestContext;
use crate::emitter::BoxReader;
use crate::encoding::Encoding;
use crate::error::{CmdError, CmdResult, RequestError};
use crate::files::Files;
use crate::options::{FromOptionValue, OptionDef, OptionValue, names};

/// Opaque handle through which run functions reach the node.
///
/// The framework only carries it; commands downcast it to the concrete
/// environment type they expect.
#[derive(Clone, Default)]
pub struct Environment {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl Environment {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Some(Arc::new(value)),
        }
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self { inner: Some(value) }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("set", &self.inner.is_some())
            .finish()
    }
}

/// Option values of a request.
///
/// Only explicitly given values are stored; defaults come from the
/// descriptors when a value is read.
#[derive(Debug, Clone, Default)]
pub struct OptionMap {
    values: HashMap<&'static str, OptionValue>,
    defs: Vec<OptionDef>,
}

impl OptionMap {
    pub(crate) fn new(defs: Vec<OptionDef>) -> Self {
        Self {
            values: HashMap::new(),
            defs,
        }
    }

    pub(crate) fn insert(&mut self, name: &'static str, value: OptionValue) {
        self.values.insert(name, value);
    }

    pub fn def(&self, name: &str) -> Option<&OptionDef> {
        self.defs.iter().find(|d| d.matches(name))
    }

    /// Explicit value or default, resolving aliases.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        let def = self.def(name)?;
        self.values.get(def.name()).or(def.default.as_ref())
    }

    /// Whether the option was given explicitly.
    pub fn is_set(&self, name: &str) -> bool {
        self.def(name)
            .is_some_and(|d| self.values.contains_key(d.name()))
    }

    /// Explicitly given values keyed by primary name.
    pub fn explicit(&self) -> impl Iterator<Item = (&'static str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn defs(&self) -> &[OptionDef] {
        &self.defs
    }
}

/// A parsed, validated invocation ready to execute.
pub struct Request {
    pub(crate) path: Vec<String>,
    pub(crate) command: Arc<Command>,
    pub(crate) root: Arc<Command>,
    pub(crate) arguments: Vec<String>,
    pub(crate) stdin_mode: Option<StdinMode>,
    /// Required argument the body stands in for.
    pub(crate) body_required: Option<String>,
    pub(crate) options: OptionMap,
    pub(crate) files: Mutex<Files>,
    pub(crate) body: Mutex<Option<BoxReader>>,
    pub(crate) context: RequestContext,
    pub(crate) env: Environment,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("path", &self.path)
            .field("arguments", &self.arguments)
            .field("options", &self.options.values)
            .field("stdin_mode", &self.stdin_mode)
            .finish()
    }
}

impl Request {
    /// Command path from the root.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Space joined path, e.g. `pin add`.
    pub fn path_string(&self) -> String {
        self.path.join(" ")
    }

    pub fn command(&self) -> &Arc<Command> {
        &self.command
    }

    /// Root of the tree the request was resolved against.
    pub fn root(&self) -> &Arc<Command> {
        &self.root
    }

    /// Positional String arguments given explicitly.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn options(&self) -> &OptionMap {
        &self.options
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Typed option value (explicit or default).
    ///
    /// Reading an option with a type other than the declared one is a fatal
    /// error.
    pub fn option<T: FromOptionValue>(&self, name: &str) -> CmdResult<Option<T>> {
        match self.options.get(name) {
            None => Ok(None),
            Some(value) => T::from_option_value(value).map(Some).ok_or_else(|| {
                CmdError::fatal(format!(
                    "option '{name}' has type {}, read as {}",
                    value.kind(),
                    std::any::type_name::<T>()
                ))
            }),
        }
    }

    /// Value of a boolean option, `false` when absent without default.
    pub fn flag(&self, name: &str) -> CmdResult<bool> {
        Ok(self.option::<bool>(name)?.unwrap_or(false))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.options.is_set(name)
    }

    /// Requested output encoding.
    pub fn encoding(&self) -> Encoding {
        self.options
            .get(names::ENCODING)
            .and_then(|v| String::from_option_value(v))
            .map(|s| s.parse().unwrap_or(Encoding::Text))
            .unwrap_or(Encoding::Text)
    }

    /// Take the raw body, if any. Subsequent calls return `None`.
    pub fn take_body(&self) -> Option<BoxReader> {
        self.body.lock().take()
    }

    pub fn has_body(&self) -> bool {
        self.body.lock().is_some()
    }

    /// Take the File argument entries.
    pub fn take_files(&self) -> Files {
        std::mem::take(&mut *self.files.lock())
    }

    /// How missing String arguments are read from the body, if they are.
    pub fn stdin_mode(&self) -> Option<StdinMode> {
        if self.has_body() { self.stdin_mode } else { None }
    }

    /// Explicit arguments followed by those read from the body.
    ///
    /// The body is consumed lazily, one line at a time for line mode. A
    /// body standing in for a required argument must supply at least one
    /// non-empty value.
    pub fn argument_stream(&self) -> impl Stream<Item = CmdResult<String>> + Send + 'static {
        let explicit = futures::stream::iter(self.arguments.clone().into_iter().map(Ok));
        let body = match self.stdin_mode() {
            Some(mode) => self.take_body().map(|b| (mode, b)),
            None => None,
        };
        let from_body = match body {
            Some((StdinMode::Lines, reader)) => LinesStream::new(BufReader::new(reader).lines())
                .filter(|line| futures::future::ready(!matches!(line, Ok(l) if l.is_empty())))
                .map(|line| line.map_err(CmdError::from))
                .boxed(),
            Some((StdinMode::Blob, mut reader)) => futures::stream::once(async move {
                let mut blob = String::new();
                reader.read_to_string(&mut blob).await?;
                Ok::<_, CmdError>(blob)
            })
            .boxed(),
            None => futures::stream::empty().boxed(),
        };

        let supplied = Arc::new(AtomicUsize::new(0));
        let counted = from_body.inspect({
            let supplied = supplied.clone();
            move |arg| {
                if matches!(arg, Ok(value) if !value.is_empty()) {
                    supplied.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
        let required = self.body_required.clone();
        let missing = futures::stream::once(async move {
            match required {
                Some(name) if supplied.load(Ordering::Relaxed) == 0 => {
                    Some(Err(CmdError::from(RequestError::MissingArgument(name))))
                }
                _ => None,
            }
        })
        .filter_map(futures::future::ready);

        explicit.chain(counted).chain(missing)
    }

    /// All arguments, draining the body when it supplies them.
    pub async fn all_arguments(&self) -> CmdResult<Vec<String>> {
        let mut out = Vec::new();
        let mut stream = std::pin::pin!(self.argument_stream());
        while let Some(arg) = stream.next().await {
            self.context.check()?;
            out.push(arg?);
        }
        Ok(out)
    }
}
