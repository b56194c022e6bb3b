//! Command framework for the IPFS node.
//!
//! A node exposes its functionality as a tree of [`Command`]s. An invocation
//! from the command line or from an HTTP client is parsed against the tree
//! by the [`RequestBuilder`] into a [`Request`], executed by the
//! [`Executor`], and its results flow back through an [`Emitter`] /
//! [`Receiver`] pair to a sink that encodes them as text or JSON.
//!
//! ```rust,ignore
//! use ipfs_cmds::{Command, ExecContext, Executor, HelpText, Invocation, Registry, RequestBuilder};
//!
//! let root = Command::new().subcommand(
//!     "hello",
//!     Command::new()
//!         .help(HelpText::new("Say hello."))
//!         .output::<String>()
//!         .run_fn(|_req, emitter| async move { emitter.emit_once("hello".to_string()).await }),
//! );
//! let builder = RequestBuilder::new(Registry::new(root));
//! let req = builder.build(Invocation::cli(["hello"]))?;
//! let response = Executor::new(ExecContext::Cli).execute(req).await;
//! response.encode_to(&mut tokio::io::stdout()).await?;
//! ```
//!
//! # Modules
//!
//! - [`registry`] - the command tree, lookup, walking and validation
//! - [`builder`] - token and option parsing, argument binding
//! - [`emitter`] - the ordered, cancellable response channel
//! - [`executor`] - PreRun/Run/PostRun orchestration
//! - [`encoding`] - per-command encoders and response encoding
//! - [`external`] - forwarding to `<app>-<path>` executables
//! - [`completion`] - shell completion data and scripts
//! - [`addr`] - peer address parsing and resolution

pub mod addr;
pub mod arguments;
pub mod builder;
pub mod command;
pub mod completion;
pub mod context;
pub mod emitter;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod external;
pub mod files;
pub mod help;
pub mod options;
pub mod registry;
pub mod request;

pub use addr::{AddrError, Multiaddr, Resolver, SystemResolver, resolve_peer_addrs};
pub use arguments::{ArgKind, ArgumentDef, StdinMode};
pub use builder::{Invocation, RequestBuilder};
pub use command::{Command, ExecContext, Extras, OutputType, PostRun, Run, Status, extras};
pub use completion::{CompletionCommand, completions};
pub use context::RequestContext;
pub use emitter::{BoxReader, Emittable, Emitter, Payload, Receiver, TypedEmitter, channel};
pub use encoding::{Encoder, Encoding, encode_response, encode_value};
pub use error::{
    CancelCause, CmdError, CmdResult, EXIT_FAILURE, EXIT_FATAL, EXIT_INTERRUPTED, EXIT_OK, ErrorKind,
    ErrorObject, RequestError,
};
pub use executor::{Executor, Response};
pub use files::{FileEntry, FileKind, Files};
pub use help::HelpText;
pub use options::{OptionDef, OptionKind, OptionValue, names};
pub use registry::{Registry, ValidationReport};
pub use request::{Environment, Request};
