//! The `ipfs` command line driver.
//!
//! Builds a request from the process arguments, then either forwards it to
//! a running daemon or executes it in-process, writing encoded output to
//! stdout and `Error: <message>` to stderr.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ipfs_cmds::builder::{HELP_LONG, HELP_SHORT};
use ipfs_cmds::error::EXIT_OK;
use ipfs_cmds::executor::DEFAULT_APP_NAME;
use ipfs_cmds::help::{long_help, short_help};
use ipfs_cmds::{
    ArgKind, BoxReader, CmdError, CmdResult, Command, ExecContext, Executor, Invocation, Registry, Request,
    RequestBuilder, RequestContext, RequestError, Status,
};
use ipfs_cmds_http::{ApiClient, HttpError, codec};
use ipfs_commands::repo::{default_repo_path, read_api_file};
use ipfs_commands::root::{API_OPTION, CONFIG_OPTION, DEBUG_OPTION, OFFLINE_OPTION};
use ipfs_commands::{MemoryNode, NodeEnv, VersionInfo, registry};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Route prefix of the daemon's command API.
pub const API_PREFIX: &str = "/api/v0";

/// Options that steer the driver itself and never travel to a daemon.
const LOCAL_OPTIONS: &[&str] = &[API_OPTION, CONFIG_OPTION, DEBUG_OPTION, OFFLINE_OPTION, HELP_LONG, HELP_SHORT];

pub struct Driver {
    builder: RequestBuilder,
    repo_root: PathBuf,
    version: VersionInfo,
    search_path: Option<OsString>,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(registry())
    }
}

impl Driver {
    pub fn new(registry: Registry) -> Self {
        Self {
            builder: RequestBuilder::new(registry),
            repo_root: default_repo_path(),
            version: VersionInfo::current(),
            search_path: None,
        }
    }

    /// Repository used when `--config` is not given.
    pub fn with_repo_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.repo_root = root.into();
        self
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    /// Look external commands up in `path` instead of `PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Run one invocation and return the process exit code.
    pub async fn run<O, E>(
        &self,
        args: Vec<String>,
        stdin: Option<BoxReader>,
        ctx: RequestContext,
        stdout: &mut O,
        stderr: &mut E,
    ) -> i32
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let result = self.dispatch(args, stdin, ctx, stdout, stderr).await;
        let _ = stdout.flush().await;
        let Err(err) = result else {
            return EXIT_OK;
        };

        let mut message = format!("Error: {err}\n");
        if let CmdError::Request(RequestError::UnknownCommand { path, .. }) = &err {
            let mut line = vec![DEFAULT_APP_NAME.to_string()];
            line.extend(path.iter().cloned());
            message.push_str(&format!(
                "\nUse '{} --help' for information about this command\n",
                line.join(" ")
            ));
        }
        let _ = stderr.write_all(message.as_bytes()).await;
        let _ = stderr.flush().await;
        err.exit_code()
    }

    async fn dispatch<O, E>(
        &self,
        args: Vec<String>,
        stdin: Option<BoxReader>,
        ctx: RequestContext,
        stdout: &mut O,
        stderr: &mut E,
    ) -> CmdResult<()>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let repo_root = global_value(&args, CONFIG_OPTION, "c")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.repo_root.clone());
        let env = NodeEnv::new(&repo_root, Arc::new(MemoryNode::new()))
            .with_version(self.version.clone())
            .into_environment();

        let mut invocation = Invocation::cli(args).context(ctx).env(env);
        if let Some(body) = stdin {
            invocation = invocation.body(body);
        }
        let req = self.builder.build(invocation)?;
        let command = req.command().clone();

        if !command.external {
            if req.flag(HELP_LONG)? {
                let text = long_help(DEFAULT_APP_NAME, req.path(), &command);
                stdout.write_all(text.as_bytes()).await?;
                return Ok(());
            }
            if req.flag(HELP_SHORT)? {
                let text = short_help(DEFAULT_APP_NAME, req.path(), &command);
                stdout.write_all(text.as_bytes()).await?;
                return Ok(());
            }
            if !command.is_runnable() && command.status != Status::Removed {
                let text = short_help(DEFAULT_APP_NAME, req.path(), &command);
                stderr.write_all(text.as_bytes()).await?;
                stderr.write_all(b"\n").await?;
                return Err(RequestError::NotCallable.into());
            }
        }

        if command.status == Status::Deprecated {
            let path = req.path_string();
            warn!(%path, "running deprecated command");
            stderr
                .write_all(format!("WARNING: command '{path}' is deprecated\n").as_bytes())
                .await?;
        }

        match api_address(&req, &repo_root)? {
            Some(addr) => remote(&addr, req, stdout).await,
            None => {
                let mut executor = Executor::new(ExecContext::Cli);
                if let Some(path) = &self.search_path {
                    executor = executor.with_search_path(path.clone());
                }
                debug!(path = %req.path_string(), "running in-process");
                executor.execute(req).await.encode_to(stdout).await
            }
        }
    }
}

/// Address of the daemon to forward `req` to, if any.
fn api_address(req: &Request, repo_root: &Path) -> CmdResult<Option<String>> {
    let command = req.command();
    if req.flag(OFFLINE_OPTION)? || command.no_remote || command.external || takes_files(command) {
        return Ok(None);
    }
    if let Some(addr) = req.option::<String>(API_OPTION)? {
        return Ok(Some(addr));
    }
    Ok(read_api_file(repo_root))
}

/// File arguments are read from the local filesystem, which the daemon
/// may not share.
fn takes_files(command: &Command) -> bool {
    command.arguments.iter().any(|a| a.kind == ArgKind::File)
}

async fn remote<O>(addr: &str, req: Request, stdout: &mut O) -> CmdResult<()>
where
    O: AsyncWrite + Unpin + Send,
{
    let client = ApiClient::for_listen_addr(&socket_addr(addr), API_PREFIX).map_err(HttpError::into_cmd_error)?;
    let args = encode_binary_args(req.command(), req.arguments());
    let options: Vec<(String, String)> = req
        .options()
        .explicit()
        .filter(|(name, _)| !LOCAL_OPTIONS.contains(name))
        .map(|(name, value)| {
            let delimiter = req.options().def(name).map(|d| d.delimiter).unwrap_or(',');
            (name.to_string(), value.render(delimiter))
        })
        .collect();
    debug!(url = %client.base(), path = %req.path_string(), "forwarding to daemon");
    client
        .execute(req.context(), req.path(), &args, &options, req.take_body(), stdout)
        .await
}

fn encode_binary_args(command: &Command, args: &[String]) -> Vec<String> {
    let variadic_binary = command.arguments.last().is_some_and(|a| a.variadic && a.binary);
    args.iter()
        .enumerate()
        .map(|(i, arg)| {
            let binary = command.arguments.get(i).map_or(variadic_binary, |a| a.binary);
            if binary { codec::encode(arg.as_bytes()) } else { arg.clone() }
        })
        .collect()
}

/// `host:port` from either a socket address or a multiaddr such as
/// `/ip4/127.0.0.1/tcp/5001`.
pub fn socket_addr(raw: &str) -> String {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        ["", "ip6", host, "tcp", port, ..] => format!("[{host}]:{port}"),
        ["", "ip4" | "dns" | "dns4" | "dns6", host, "tcp", port, ..] => format!("{host}:{port}"),
        _ => raw.to_string(),
    }
}

/// Value of a global option read straight from the tokens, for settings
/// needed before the request is built.
pub fn global_value(args: &[String], long: &str, short: &str) -> Option<String> {
    let mut tokens = args.iter();
    while let Some(token) = tokens.next() {
        if token == "--" {
            break;
        }
        let Some(name) = token.strip_prefix("--").or_else(|| token.strip_prefix('-')) else {
            continue;
        };
        match name.split_once('=') {
            Some((n, value)) if n == long || n == short => return Some(value.to_string()),
            None if name == long || name == short => return tokens.next().cloned(),
            _ => {}
        }
    }
    None
}

/// Whether a global boolean option is set in the tokens.
pub fn global_flag(args: &[String], long: &str, short: &str) -> bool {
    args.iter().take_while(|t| *t != "--").any(|token| {
        let Some(name) = token.strip_prefix("--").or_else(|| token.strip_prefix('-')) else {
            return false;
        };
        match name.split_once('=') {
            Some((n, value)) => (n == long || n == short) && value == "true",
            None => name == long || name == short,
        }
    })
}
