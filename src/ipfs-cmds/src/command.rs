//! Command definition.
//!
//! A [`Command`] is declarative metadata plus up to three phase functions.
//! Commands are built once at startup with the consuming builder methods and
//! shared read-only behind `Arc` afterwards.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::arguments::ArgumentDef;
use crate::emitter::{Emitter, Receiver};
use crate::encoding::{Encoder, Encoding};
use crate::error::CmdResult;
use crate::help::HelpText;
use crate::options::OptionDef;
use crate::request::Request;

/// Lifecycle tag of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Active,
    Experimental,
    Deprecated,
    Removed,
}

/// Where a request is being driven from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecContext {
    /// Local command line process.
    Cli,
    /// Remote caller behind the API server.
    Server,
}

/// Declared dynamic type of the values a command emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputType {
    id: TypeId,
    name: &'static str,
}

impl OutputType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Well-known extras keys.
pub mod extras {
    /// The command never opens the repository.
    pub const DOES_NOT_USE_REPO: &str = "does-not-use-repo";
    /// Installation hint of an external command (`String`).
    pub const INSTALL_INSTRUCTIONS: &str = "install-instructions";
}

/// Opaque typed key/value bag for out-of-band hints.
#[derive(Clone, Default)]
pub struct Extras {
    values: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl Extras {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.values.insert(key, Arc::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Value of a boolean extra, `false` when absent.
    pub fn flag(&self, key: &str) -> bool {
        self.get::<bool>(key).copied().unwrap_or(false)
    }

    pub fn keys(&self) -> impl Iterator<Item = &&'static str> {
        self.values.keys()
    }
}

impl fmt::Debug for Extras {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_set().entries(keys).finish()
    }
}

/// Main phase of a command.
///
/// The emitter is closed when every clone of it is dropped; a run function
/// that hands the emitter to a background task therefore keeps the stream
/// open until that task finishes. Returning an error sets it on the emitter.
#[async_trait]
pub trait Run: Send + Sync {
    async fn run(&self, req: Arc<Request>, emitter: Emitter) -> CmdResult<()>;
}

/// Optional final phase, fed with the output of [`Run`].
#[async_trait]
pub trait PostRun: Send + Sync {
    async fn post_run(&self, req: Arc<Request>, input: Receiver, output: Emitter) -> CmdResult<()>;
}

/// Synchronous check executed before [`Run`].
pub type PreRunFn = Arc<dyn Fn(&Request) -> CmdResult<()> + Send + Sync>;

/// [`Run`] implemented by an async closure.
pub struct FnRun<F>(pub F);

#[async_trait]
impl<F, Fut> Run for FnRun<F>
where
    F: Fn(Arc<Request>, Emitter) -> Fut + Send + Sync,
    Fut: Future<Output = CmdResult<()>> + Send + 'static,
{
    async fn run(&self, req: Arc<Request>, emitter: Emitter) -> CmdResult<()> {
        (self.0)(req, emitter).await
    }
}

/// [`PostRun`] implemented by an async closure.
pub struct FnPostRun<F>(pub F);

#[async_trait]
impl<F, Fut> PostRun for FnPostRun<F>
where
    F: Fn(Arc<Request>, Receiver, Emitter) -> Fut + Send + Sync,
    Fut: Future<Output = CmdResult<()>> + Send + 'static,
{
    async fn post_run(&self, req: Arc<Request>, input: Receiver, output: Emitter) -> CmdResult<()> {
        (self.0)(req, input, output).await
    }
}

/// A node of the command tree.
#[derive(Clone, Default)]
pub struct Command {
    pub helptext: HelpText,
    pub arguments: Vec<ArgumentDef>,
    pub options: Vec<OptionDef>,
    pub pre_run: Option<PreRunFn>,
    pub run: Option<Arc<dyn Run>>,
    pub post_run: HashMap<ExecContext, Arc<dyn PostRun>>,
    pub encoders: HashMap<Encoding, Encoder>,
    pub output_type: Option<OutputType>,
    pub subcommands: BTreeMap<String, Arc<Command>>,
    /// Names registered more than once; reported by validation.
    pub duplicate_subcommands: Vec<String>,
    pub extras: Extras,
    pub status: Status,
    /// Explanation shown for removed or deprecated commands.
    pub status_note: Option<String>,
    /// Must run against a daemon.
    pub no_local: bool,
    /// Must run in the local process.
    pub no_remote: bool,
    /// Implemented by a sibling executable.
    pub external: bool,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    /// A command forwarded to the `<app>-<path>` executable.
    /// `instructions` are shown when help is requested and the executable is
    /// not installed.
    pub fn external(helptext: HelpText, instructions: impl Into<String>) -> Self {
        Self {
            helptext,
            external: true,
            no_remote: true,
            ..Self::default()
        }
        .argument(ArgumentDef::string("args", false, true, "Arguments for subcommand."))
        .extra(extras::INSTALL_INSTRUCTIONS, instructions.into())
    }

    pub fn help(mut self, helptext: HelpText) -> Self {
        self.helptext = helptext;
        self
    }

    pub fn argument(mut self, argument: ArgumentDef) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn option(mut self, option: OptionDef) -> Self {
        self.options.push(option);
        self
    }

    pub fn pre_run<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> CmdResult<()> + Send + Sync + 'static,
    {
        self.pre_run = Some(Arc::new(f));
        self
    }

    pub fn run(mut self, run: impl Run + 'static) -> Self {
        self.run = Some(Arc::new(run));
        self
    }

    /// Set the run phase from an async closure.
    pub fn run_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<Request>, Emitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CmdResult<()>> + Send + 'static,
    {
        self.run(FnRun(f))
    }

    pub fn post_run(mut self, context: ExecContext, post: impl PostRun + 'static) -> Self {
        self.post_run.insert(context, Arc::new(post));
        self
    }

    pub fn post_run_fn<F, Fut>(self, context: ExecContext, f: F) -> Self
    where
        F: Fn(Arc<Request>, Receiver, Emitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CmdResult<()>> + Send + 'static,
    {
        self.post_run(context, FnPostRun(f))
    }

    pub fn encoder(mut self, encoding: Encoding, encoder: Encoder) -> Self {
        self.encoders.insert(encoding, encoder);
        self
    }

    /// Declare the type of emitted values.
    pub fn output<T: Any>(mut self) -> Self {
        self.output_type = Some(OutputType::of::<T>());
        self
    }

    pub fn subcommand(self, name: impl Into<String>, command: Command) -> Self {
        self.subcommand_arc(name, Arc::new(command))
    }

    /// Attach an already shared command (the same node may appear under
    /// several parents).
    pub fn subcommand_arc(mut self, name: impl Into<String>, command: Arc<Command>) -> Self {
        let name = name.into();
        if self.subcommands.contains_key(&name) {
            self.duplicate_subcommands.push(name.clone());
        }
        self.subcommands.insert(name, command);
        self
    }

    pub fn extra<T: Any + Send + Sync>(mut self, key: &'static str, value: T) -> Self {
        self.extras.insert(key, value);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn experimental(self) -> Self {
        self.status(Status::Experimental)
    }

    pub fn deprecated(self) -> Self {
        self.status(Status::Deprecated)
    }

    /// Mark as removed; invoking it fails with `note`.
    pub fn removed(mut self, note: impl Into<String>) -> Self {
        self.status = Status::Removed;
        self.status_note = Some(note.into());
        self
    }

    pub fn no_local(mut self) -> Self {
        self.no_local = true;
        self
    }

    pub fn no_remote(mut self) -> Self {
        self.no_remote = true;
        self
    }

    /// Whether invoking the command does anything besides printing help.
    pub fn is_runnable(&self) -> bool {
        self.run.is_some() || self.external
    }

    pub fn child(&self, name: &str) -> Option<&Arc<Command>> {
        self.subcommands.get(name)
    }

    pub fn encoder_for(&self, encoding: &Encoding) -> Option<&Encoder> {
        self.encoders.get(encoding)
    }

    pub fn post_run_for(&self, context: ExecContext) -> Option<&Arc<dyn PostRun>> {
        self.post_run.get(&context)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("tagline", &self.helptext.tagline)
            .field("arguments", &self.arguments.len())
            .field("options", &self.options.iter().map(|o| o.name()).collect::<Vec<_>>())
            .field("runnable", &self.is_runnable())
            .field("output_type", &self.output_type.map(|t| t.name()))
            .field("subcommands", &self.subcommands.keys().collect::<Vec<_>>())
            .field("status", &self.status)
            .field("external", &self.external)
            .finish()
    }
}
