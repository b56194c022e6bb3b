//! Command tree of the IPFS node.
//!
//! This crate defines the commands a node answers to and the collaborators
//! they run against. The tree is served both in-process by the `ipfs`
//! binary and behind the HTTP API.
//!
//! ```rust,ignore
//! use ipfs_cmds::{ExecContext, Executor, Invocation, RequestBuilder};
//! use ipfs_commands::{NodeEnv, registry};
//!
//! let env = NodeEnv::memory("/tmp/repo").into_environment();
//! let req = RequestBuilder::new(registry()).build(Invocation::cli(["version"]).env(env))?;
//! Executor::new(ExecContext::Cli).execute(req).await.encode_to(&mut out).await?;
//! ```
//!
//! # Modules
//!
//! - [`root`] - the command tree and its global options
//! - [`builtin`] - one module per command
//! - [`env`] - per-request environment (node, repo, version)
//! - [`node`] - content identifiers, blocks, pins, routing and swarm seams
//! - [`repo`] - on-disk repository, its lock, config and api file

pub mod builtin;
pub mod env;
pub mod node;
pub mod repo;
pub mod root;

pub use env::{NodeEnv, RepoHandle, VersionInfo};
pub use node::{Cid, MemoryNode, Node, PeerInfo, PinMode};
pub use repo::{Repo, RepoError};
pub use root::{read_only_registry, registry, root};
