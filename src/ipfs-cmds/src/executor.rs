//! Request execution.
//!
//! The executor drives a request through PreRun, Run and (for the command
//! line) PostRun. Run executes on its own task; the caller consumes the
//! returned [`Response`] concurrently.

use std::any::Any;
use std::ffi::OsString;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tracing::{debug, error, warn};

use crate::command::{ExecContext, Status};
use crate::emitter::{Receiver, channel};
use crate::encoding::{Encoding, encode_response};
use crate::error::{CancelCause, CmdError, CmdResult, ErrorKind, RequestError};
use crate::external::ExternalRunner;
use crate::options::{OptionValue, parse_duration};
use crate::request::Request;

/// Global option holding a request deadline such as `30s`.
pub const TIMEOUT_OPTION: &str = "timeout";

/// Default application prefix for external executables.
pub const DEFAULT_APP_NAME: &str = "ipfs";

/// The stream produced for a request.
#[derive(Debug)]
pub struct Response {
    pub request: Arc<Request>,
    pub receiver: Receiver,
}

impl Response {
    pub fn encoding(&self) -> Encoding {
        self.request.encoding()
    }

    /// Encode the whole stream into `sink` with the request's encoding.
    pub async fn encode_to<W>(self, sink: &mut W) -> CmdResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let encoding = self.request.encoding();
        encode_response(&self.request, &encoding, self.receiver, sink).await
    }
}

/// Drives requests to completion.
#[derive(Debug, Clone)]
pub struct Executor {
    context: ExecContext,
    external: ExternalRunner,
}

impl Executor {
    pub fn new(context: ExecContext) -> Self {
        Self {
            context,
            external: ExternalRunner {
                app: DEFAULT_APP_NAME.to_string(),
                search_path: None,
                online: false,
            },
        }
    }

    /// Set the prefix used to name external executables.
    pub fn with_app_name(mut self, app: impl Into<String>) -> Self {
        self.external.app = app.into();
        self
    }

    /// Look external executables up in `path` instead of `PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.external.search_path = Some(path.into());
        self
    }

    /// Whether the node is online, as reported to external commands.
    pub fn with_online(mut self, online: bool) -> Self {
        self.external.online = online;
        self
    }

    pub fn exec_context(&self) -> ExecContext {
        self.context
    }

    /// Execute `req`. Failures before Run starts are delivered as a stream
    /// holding only the error.
    pub async fn execute(&self, mut req: Request) -> Response {
        let command = req.command.clone();
        let path = req.path_string();

        if let Err(err) = self.admit(&mut req) {
            debug!(%path, error = %err, "request rejected before run");
            let ctx = req.context.clone();
            return Response {
                request: Arc::new(req),
                receiver: Receiver::failed(ctx, err),
            };
        }

        if command.status == Status::Deprecated {
            warn!(%path, "running deprecated command");
        }

        if let Some(pre_run) = &command.pre_run
            && let Err(err) = pre_run(&req)
        {
            debug!(%path, error = %err, "pre-run failed");
            let ctx = req.context.clone();
            return Response {
                request: Arc::new(req),
                receiver: Receiver::failed(ctx, err),
            };
        }

        let req = Arc::new(req);
        let ctx = req.context.clone();
        let (emitter, receiver) = channel(ctx.clone(), command.output_type);

        if command.external {
            let runner = self.external.clone();
            let request = req.clone();
            tokio::spawn(async move {
                if let Err(err) = runner.run(&request, &emitter).await {
                    let _ = emitter.set_error(err).await;
                }
            });
            return Response {
                request: req,
                receiver,
            };
        }

        let Some(run) = command.run.clone() else {
            return Response {
                request: req,
                receiver: Receiver::failed(ctx, RequestError::NotCallable.into()),
            };
        };

        debug!(%path, context = ?self.context, "starting run");
        let task = {
            let req = req.clone();
            let emitter = emitter.clone();
            tokio::spawn(async move { run.run(req, emitter).await })
        };
        let supervisor_path = path.clone();
        tokio::spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(join) if join.is_panic() => {
                    let message = panic_message(join.into_panic());
                    error!(path = %supervisor_path, %message, "run panicked");
                    Err(CmdError::fatal(format!("command panicked: {message}")))
                }
                Err(_) => Err(CmdError::Cancelled(CancelCause::Caller)),
            };
            if let Err(err) = result
                && let Err(closed) = emitter.set_error(err.clone()).await
            {
                debug!(path = %supervisor_path, error = %err, reason = %closed, "run error not delivered");
            }
        });

        let post_run = match self.context {
            ExecContext::Cli => command.post_run_for(ExecContext::Cli).cloned(),
            ExecContext::Server => None,
        };
        let Some(post_run) = post_run else {
            return Response {
                request: req,
                receiver,
            };
        };

        let mut receiver = receiver;
        match receiver.next().await {
            Err(err) if err.kind() == ErrorKind::Fatal => {
                return Response {
                    request: req,
                    receiver: Receiver::failed(ctx, err),
                };
            }
            Ok(Some(first)) => receiver.unread(first),
            Ok(None) | Err(_) => {}
        }

        let (out_emitter, out_receiver) = channel(ctx, None);
        let request = req.clone();
        tokio::spawn(async move {
            if let Err(err) = post_run.post_run(request, receiver, out_emitter.clone()).await {
                warn!(%path, error = %err, "post-run failed");
                let _ = out_emitter.set_error(err).await;
            }
        });

        Response {
            request: req,
            receiver: out_receiver,
        }
    }

    /// Checks that do not depend on the command's own code.
    fn admit(&self, req: &mut Request) -> CmdResult<()> {
        let command = req.command.clone();
        if command.status == Status::Removed {
            return Err(RequestError::Removed {
                path: req.path_string(),
                message: command
                    .status_note
                    .clone()
                    .unwrap_or_else(|| "this command has been removed".to_string()),
            }
            .into());
        }

        match self.context {
            ExecContext::Cli if command.no_local => {
                return Err(RequestError::ContextMismatch(
                    "this command must be run against a running daemon".to_string(),
                )
                .into());
            }
            ExecContext::Server if command.no_remote => {
                return Err(RequestError::ContextMismatch(
                    "this command cannot be run remotely".to_string(),
                )
                .into());
            }
            _ => {}
        }

        if let Some(OptionValue::Duration(raw) | OptionValue::String(raw)) =
            req.options.get(TIMEOUT_OPTION).cloned()
        {
            let timeout = parse_duration(&raw)
                .ok_or_else(|| CmdError::client(format!("invalid timeout value: '{raw}'")))?;
            if !timeout.is_zero() {
                req.context = req.context.with_timeout(timeout);
            }
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
