//! API server assembly.
//!
//! The daemon holds the repository for its whole lifetime, lends it to
//! every request and advertises its listen address through the repo's
//! `api` file.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use ipfs_cmds::{ExecContext, Executor, RequestBuilder};
use ipfs_cmds_http::{ApiState, ServerConfig};
use ipfs_commands::repo::{remove_api_file, write_api_file};
use ipfs_commands::{MemoryNode, NodeEnv, Repo, read_only_registry, registry};
use serde_json::Value;
use tracing::{info, warn};

/// Dotted config key holding extra response headers.
pub const HEADERS_KEY: &str = "API.HTTPHeaders";

/// Response headers configured in the repo, `{"Name": ["v1", "v2"]}`.
pub fn config_headers(config: &Value) -> BTreeMap<String, String> {
    let Some(Value::Object(headers)) = ipfs_commands::repo::get_key(config, HEADERS_KEY) else {
        return BTreeMap::new();
    };
    headers
        .iter()
        .filter_map(|(name, value)| {
            let joined = match value {
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => return None,
            };
            Some((name.clone(), joined))
        })
        .collect()
}

/// Route state serving `repo` with an online in-memory node.
pub fn api_state(repo: Arc<Repo>, config: ServerConfig, read_only: bool) -> Arc<ApiState> {
    let registry = if read_only { read_only_registry() } else { registry() };
    let env = NodeEnv::new(repo.root(), Arc::new(MemoryNode::new()))
        .online(true)
        .with_repo(repo);
    Arc::new(ApiState::new(
        RequestBuilder::new(registry),
        Executor::new(ExecContext::Server).with_online(true),
        env.into_environment(),
        config,
    ))
}

/// Serve until `shutdown` completes. The `api` file exists exactly while
/// the listener is up.
pub async fn run_daemon<F>(repo: Arc<Repo>, mut config: ServerConfig, read_only: bool, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    for (name, value) in config_headers(&repo.config()?) {
        config.headers.entry(name).or_insert(value);
    }

    let listener = ipfs_cmds_http::bind(&config).await?;
    let addr = listener.local_addr()?;
    write_api_file(repo.root(), &addr.to_string())?;
    info!("API file written to {}", repo.root().display());

    let root = repo.root().to_path_buf();
    let state = api_state(repo, config, read_only);
    let served = ipfs_cmds_http::serve(listener, state, shutdown).await;

    if let Err(e) = remove_api_file(&root) {
        warn!("Failed to remove API file: {}", e);
    }
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_headers() {
        let config = serde_json::json!({
            "API": {
                "HTTPHeaders": {
                    "Access-Control-Allow-Origin": ["*"],
                    "Access-Control-Allow-Methods": ["GET", "POST"],
                    "X-Bad": 3,
                }
            }
        });
        let headers = config_headers(&config);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["Access-Control-Allow-Origin"], "*");
        assert_eq!(headers["Access-Control-Allow-Methods"], "GET, POST");
        assert!(config_headers(&serde_json::json!({})).is_empty());
    }
}
