//! Forwarding of external commands to sibling executables.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::process::Command as ProcessCommand;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info};

use crate::command::extras;
use crate::emitter::Emitter;
use crate::error::{CmdError, CmdResult};
use crate::request::Request;

/// Variable telling external commands whether a node is online.
pub const ONLINE_ENV: &str = "IPFS_ONLINE";

/// Chunks buffered between the child's pipes and the response reader.
const PIPE_CAPACITY: usize = 16;

/// Executable name for `path`: `app-x-y-z`.
pub fn binary_name(app: &str, path: &[String]) -> String {
    std::iter::once(app)
        .chain(path.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join("-")
}

/// Text shown for `--help` when the executable is not installed.
pub fn not_installed_help(binary: &str, instructions: &str) -> String {
    format!(
        "{binary} is an 'external' command.\nIt does not currently appear to be installed.\n{instructions}\n"
    )
}

/// How external executables are located and started.
#[derive(Debug, Clone, Default)]
pub struct ExternalRunner {
    /// Application prefix of executable names.
    pub app: String,
    /// Overrides `PATH` for the lookup.
    pub search_path: Option<OsString>,
    /// Value passed in [`ONLINE_ENV`].
    pub online: bool,
}

impl ExternalRunner {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(binary, Some(paths), cwd).ok()
            }
            None => which::which(binary).ok(),
        }
    }

    /// Run the executable for `req`, streaming its stdout and stderr into
    /// `emitter` as one reader. A non-zero exit becomes a normal error after
    /// the output.
    pub async fn run(&self, req: &Request, emitter: &Emitter) -> CmdResult<()> {
        let binary = binary_name(&self.app, req.path());
        let Some(program) = self.locate(&binary) else {
            if req.arguments().iter().any(|a| a == "--help" || a == "-h") {
                let instructions = req
                    .command()
                    .extras
                    .get::<String>(extras::INSTALL_INSTRUCTIONS)
                    .cloned()
                    .unwrap_or_default();
                let text = not_installed_help(&binary, &instructions);
                emitter.emit_reader(std::io::Cursor::new(text.into_bytes())).await?;
                emitter.close();
                return Ok(());
            }
            return Err(CmdError::normal(format!("{binary} not installed")));
        };

        info!(program = %program.display(), args = ?req.arguments(), "running external command");
        let mut child = ProcessCommand::new(&program)
            .args(req.arguments())
            .env(ONLINE_ENV, if self.online { "true" } else { "false" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CmdError::normal(format!("failed to start {binary}: {e}")))?;

        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(PIPE_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        emitter
            .emit_reader(StreamReader::new(ReceiverStream::new(rx)))
            .await?;

        let ctx = req.context();
        let status = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                let _ = child.kill().await;
                return Err(ctx.error());
            }
            status = child.wait() => status?,
        };

        debug!(program = %program.display(), %status, "external command finished");
        if status.success() {
            Ok(())
        } else {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(CmdError::normal(format!("{binary} exited with status {code}")))
        }
    }
}

async fn pump<R>(reader: R, tx: mpsc::Sender<std::io::Result<Bytes>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    use futures::StreamExt;

    let mut chunks = ReaderStream::new(reader);
    while let Some(chunk) = chunks.next().await {
        if tx.send(chunk).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_name() {
        let path = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        assert_eq!(binary_name("app", &path), "app-x-y-z");
        assert_eq!(binary_name("ipfs", &["update".to_string()]), "ipfs-update");
    }

    #[test]
    fn test_not_installed_help() {
        let text = not_installed_help("ipfs-update", "Please see the docs.");
        assert_eq!(
            text,
            "ipfs-update is an 'external' command.\nIt does not currently appear to be installed.\nPlease see the docs.\n"
        );
    }
}
