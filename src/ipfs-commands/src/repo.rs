//! Repository on disk.
//!
//! Layout of a repository directory:
//!
//! - `repo.lock` - held exclusively by whoever has the repository open
//! - `config` - JSON configuration document
//! - `api` - listen address of a running daemon
//!
//! [`Repo::open`] is the single way to acquire a repository. The lock is
//! released when the [`Repo`] is dropped, on every exit path.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use ipfs_cmds::CmdError;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable naming the repository directory.
pub const ENV_IPFS_PATH: &str = "IPFS_PATH";

/// Repository directory below the home directory.
pub const DEFAULT_REPO_DIR: &str = ".ipfs";

pub const LOCK_FILE: &str = "repo.lock";
pub const CONFIG_FILE: &str = "config";
pub const API_FILE: &str = "api";

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository is locked: {0} is held by another process")]
    Locked(PathBuf),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    BadConfig(String),

    #[error("config key {0:?} has no value")]
    KeyNotFound(String),

    #[error("cannot set {key:?}: {reason}")]
    BadKey { key: String, reason: String },
}

impl From<RepoError> for CmdError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Locked(_) | RepoError::KeyNotFound(_) | RepoError::BadKey { .. } => {
                CmdError::client(err.to_string())
            }
            RepoError::Io { .. } | RepoError::BadConfig(_) => CmdError::normal(err.to_string()),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RepoError + '_ {
    move |source| RepoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Repository directory from `IPFS_PATH` (looked up through `lookup`),
/// falling back to `~/.ipfs`. Relative paths are taken from the current
/// directory.
pub fn repo_path_from<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(ENV_IPFS_PATH)
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_REPO_DIR)
        });
    if raw.is_absolute() {
        raw
    } else {
        std::env::current_dir().map(|cwd| cwd.join(&raw)).unwrap_or(raw)
    }
}

/// Repository directory from the process environment.
pub fn default_repo_path() -> PathBuf {
    repo_path_from(|name| std::env::var(name).ok())
}

/// Daemon listen address recorded in the repository, if any.
pub fn read_api_file(root: &Path) -> Option<String> {
    let raw = fs::read_to_string(root.join(API_FILE)).ok()?;
    let addr = raw.trim();
    (!addr.is_empty()).then(|| addr.to_string())
}

/// Record the daemon listen address.
pub fn write_api_file(root: &Path, addr: &str) -> Result<(), RepoError> {
    let path = root.join(API_FILE);
    fs::write(&path, addr).map_err(io_error(&path))
}

pub fn remove_api_file(root: &Path) -> Result<(), RepoError> {
    let path = root.join(API_FILE);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(&path)(e)),
    }
}

/// Configuration written to a fresh repository.
pub fn default_config() -> Value {
    serde_json::json!({
        "Addresses": {
            "API": "/ip4/127.0.0.1/tcp/5001",
            "Swarm": ["/ip4/0.0.0.0/tcp/4001", "/ip6/::/tcp/4001"],
        },
        "API": {
            "HTTPHeaders": {},
        },
        "Bootstrap": [],
        "Routing": {
            "Type": "dht",
        },
    })
}

/// Value at a dotted key such as `Addresses.API`.
pub fn get_key<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(config, |node, part| match node {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Set the value at a dotted key, creating intermediate objects.
pub fn set_key(config: &mut Value, key: &str, value: Value) -> Result<(), RepoError> {
    let bad = |reason: &str| RepoError::BadKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(bad("empty key segment"));
    }
    let (last, parents) = parts.split_last().ok_or_else(|| bad("empty key"))?;

    let mut node = config;
    for part in parents {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(part.to_string()).or_insert(Value::Null),
            _ => return Err(bad(&format!("{part} is not inside an object"))),
        };
    }
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(bad("parent is not an object")),
    }
}

/// An open repository. Holds the repository lock until dropped.
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    lock: File,
    // serializes config read-modify-write cycles of concurrent requests
    config_guard: Mutex<()>,
}

impl Repo {
    /// Open (and create if needed) the repository at `root`.
    ///
    /// Fails with [`RepoError::Locked`] when another process holds it.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, RepoError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_error(&root))?;

        let lock_path = root.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(io_error(&lock_path))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(RepoError::Locked(lock_path));
        }

        let repo = Self {
            root,
            lock,
            config_guard: Mutex::new(()),
        };
        let config_path = repo.config_path();
        if !config_path.exists() {
            repo.write_config(&default_config())?;
        }
        debug!(root = %repo.root.display(), "opened repository");
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// The whole configuration document.
    pub fn config(&self) -> Result<Value, RepoError> {
        let path = self.config_path();
        let raw = fs::read_to_string(&path).map_err(io_error(&path))?;
        serde_json::from_str(&raw).map_err(|e| RepoError::BadConfig(e.to_string()))
    }

    /// Replace the configuration document.
    pub fn replace_config(&self, config: &Value) -> Result<(), RepoError> {
        let _guard = self.config_guard.lock();
        self.write_config(config)
    }

    pub fn config_value(&self, key: &str) -> Result<Value, RepoError> {
        let config = self.config()?;
        get_key(&config, key)
            .cloned()
            .ok_or_else(|| RepoError::KeyNotFound(key.to_string()))
    }

    pub fn set_config_value(&self, key: &str, value: Value) -> Result<(), RepoError> {
        let _guard = self.config_guard.lock();
        let mut config = self.config()?;
        set_key(&mut config, key, value)?;
        self.write_config(&config)
    }

    fn write_config(&self, config: &Value) -> Result<(), RepoError> {
        let path = self.config_path();
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_vec_pretty(config).map_err(|e| RepoError::BadConfig(e.to_string()))?;
        let mut file = File::create(&tmp).map_err(io_error(&tmp))?;
        file.write_all(&body).map_err(io_error(&tmp))?;
        file.sync_all().map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))
    }
}

impl Drop for Repo {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock) {
            warn!(root = %self.root.display(), "failed to release repository lock: {e}");
        } else {
            debug!(root = %self.root.display(), "released repository");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipfs_cmds::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let dir = TempDir::new().unwrap();
        let repo = Repo::open(dir.path()).unwrap();
        let err = Repo::open(dir.path()).unwrap_err();
        assert!(matches!(err, RepoError::Locked(_)));
        let cmd_err: CmdError = err.into();
        assert_eq!(cmd_err.kind(), ErrorKind::Client);
        assert!(cmd_err.to_string().contains("repository is locked"));

        drop(repo);
        assert!(Repo::open(dir.path()).is_ok());
    }

    #[test]
    fn test_dotted_keys() {
        let mut config = default_config();
        assert_eq!(get_key(&config, "Addresses.API"), Some(&json!("/ip4/127.0.0.1/tcp/5001")));
        assert_eq!(get_key(&config, "Addresses.Swarm.1"), Some(&json!("/ip6/::/tcp/4001")));
        assert_eq!(get_key(&config, "Addresses.Nope"), None);

        set_key(&mut config, "Datastore.GC.Period", json!("1h")).unwrap();
        assert_eq!(get_key(&config, "Datastore.GC.Period"), Some(&json!("1h")));
        assert!(set_key(&mut config, "Routing.Type.Inner", json!(1)).is_err());
        assert!(set_key(&mut config, "a..b", json!(1)).is_err());
    }

    #[test]
    fn test_config_persisted() {
        let dir = TempDir::new().unwrap();
        {
            let repo = Repo::open(dir.path()).unwrap();
            repo.set_config_value("Routing.Type", json!("none")).unwrap();
        }
        let repo = Repo::open(dir.path()).unwrap();
        assert_eq!(repo.config_value("Routing.Type").unwrap(), json!("none"));
        assert!(matches!(repo.config_value("Missing"), Err(RepoError::KeyNotFound(_))));
    }

    #[test]
    fn test_api_file_and_repo_path() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_api_file(dir.path()), None);
        write_api_file(dir.path(), "127.0.0.1:5001\n").unwrap();
        assert_eq!(read_api_file(dir.path()).as_deref(), Some("127.0.0.1:5001"));
        remove_api_file(dir.path()).unwrap();
        remove_api_file(dir.path()).unwrap();

        let path = repo_path_from(|_| Some("/srv/ipfs".to_string()));
        assert_eq!(path, PathBuf::from("/srv/ipfs"));
        let path = repo_path_from(|_| None);
        assert!(path.ends_with(DEFAULT_REPO_DIR));
    }
}
