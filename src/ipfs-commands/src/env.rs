//! Execution environment of the node's commands.
//!
//! A [`NodeEnv`] is what the framework carries opaquely in every request.
//! Commands fetch it with [`NodeEnv::from_request`] and reach the node's
//! collaborators and repository through it.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipfs_cmds::{CmdError, CmdResult, Environment, Request, Resolver, SystemResolver};

use crate::node::{BlockStore, MemoryNode, Node, Pinner, Routing, Swarm};
use crate::repo::Repo;

/// Error of commands that need a running daemon.
pub const NOT_ONLINE: &str = "this command must be run in online mode. Try running 'ipfs daemon' first";

/// Repository format version reported by `version`.
pub const REPO_VERSION: &str = "16";

/// Build information reported by `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub repo: String,
    pub system: String,
}

impl VersionInfo {
    /// Information about this build.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("IPFS_COMMIT").unwrap_or_default().to_string(),
            repo: REPO_VERSION.to_string(),
            system: format!("{}/{}", std::env::consts::ARCH, std::env::consts::OS),
        }
    }

    /// Only a version string; used to pin output in tests.
    pub fn fixed(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            commit: String::new(),
            repo: String::new(),
            system: String::new(),
        }
    }
}

/// A repository acquired for the duration of a command.
///
/// A daemon keeps its repository open and lends it to every request; a
/// local command opens it and releases it when the handle drops.
#[derive(Debug)]
pub enum RepoHandle {
    Shared(Arc<Repo>),
    Owned(Repo),
}

impl Deref for RepoHandle {
    type Target = Repo;

    fn deref(&self) -> &Repo {
        match self {
            Self::Shared(repo) => repo,
            Self::Owned(repo) => repo,
        }
    }
}

/// Node environment carried by requests.
#[derive(Clone)]
pub struct NodeEnv {
    repo_root: PathBuf,
    held_repo: Option<Arc<Repo>>,
    online: bool,
    version: VersionInfo,
    blocks: Arc<dyn BlockStore>,
    pins: Arc<dyn Pinner>,
    routing: Arc<dyn Routing>,
    swarm: Arc<dyn Swarm>,
    resolver: Arc<dyn Resolver>,
}

impl std::fmt::Debug for NodeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEnv")
            .field("repo_root", &self.repo_root)
            .field("held_repo", &self.held_repo.is_some())
            .field("online", &self.online)
            .field("version", &self.version.version)
            .finish()
    }
}

impl NodeEnv {
    /// Environment backed by `node`, offline until [`NodeEnv::online`].
    pub fn new<N: Node + 'static>(repo_root: impl Into<PathBuf>, node: Arc<N>) -> Self {
        Self {
            repo_root: repo_root.into(),
            held_repo: None,
            online: false,
            version: VersionInfo::current(),
            blocks: node.clone(),
            pins: node.clone(),
            routing: node.clone(),
            swarm: node,
            resolver: Arc::new(SystemResolver),
        }
    }

    /// Environment backed by a fresh in-memory node.
    pub fn memory(repo_root: impl Into<PathBuf>) -> Self {
        Self::new(repo_root, Arc::new(MemoryNode::new()))
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Lend an already open repository to every request.
    pub fn with_repo(mut self, repo: Arc<Repo>) -> Self {
        self.repo_root = repo.root().to_path_buf();
        self.held_repo = Some(repo);
        self
    }

    /// Wrap for the framework.
    pub fn into_environment(self) -> Environment {
        Environment::new(self)
    }

    /// The environment of `req`.
    pub fn from_request(req: &Request) -> CmdResult<&NodeEnv> {
        req.env()
            .downcast::<NodeEnv>()
            .ok_or_else(|| CmdError::fatal("request carries no node environment"))
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Fails with the client-offline error unless the node is online.
    pub fn require_online(&self) -> CmdResult<()> {
        if self.online {
            Ok(())
        } else {
            Err(CmdError::offline(NOT_ONLINE))
        }
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Acquire the repository; released when the handle drops.
    pub fn open_repo(&self) -> CmdResult<RepoHandle> {
        match &self.held_repo {
            Some(repo) => Ok(RepoHandle::Shared(repo.clone())),
            None => Ok(RepoHandle::Owned(Repo::open(&self.repo_root)?)),
        }
    }

    pub fn blocks(&self) -> &dyn BlockStore {
        self.blocks.as_ref()
    }

    pub fn pins(&self) -> &dyn Pinner {
        self.pins.as_ref()
    }

    pub fn routing(&self) -> &dyn Routing {
        self.routing.as_ref()
    }

    pub fn swarm(&self) -> &dyn Swarm {
        self.swarm.as_ref()
    }

    pub fn resolver(&self) -> &dyn Resolver {
        self.resolver.as_ref()
    }

    /// Shared handle to the block store, for background tasks.
    pub fn blocks_arc(&self) -> Arc<dyn BlockStore> {
        self.blocks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipfs_cmds::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_require_online() {
        let env = NodeEnv::memory("/unused");
        let err = env.require_online().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientOffline);
        assert_eq!(err.to_string(), NOT_ONLINE);
        assert!(env.online(true).require_online().is_ok());
    }

    #[test]
    fn test_held_repo_is_lent() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(Repo::open(dir.path()).unwrap());
        let env = NodeEnv::memory("/unused").with_repo(repo);
        assert_eq!(env.repo_root(), dir.path());
        let first = env.open_repo().unwrap();
        let second = env.open_repo().unwrap();
        assert_eq!(first.root(), second.root());

        let local = NodeEnv::memory(dir.path());
        let err = local.open_repo().unwrap_err();
        assert!(err.to_string().contains("repository is locked"));
    }
}
