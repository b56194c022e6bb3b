//! Client side of the command transport.
//!
//! [`ApiClient`] sends an invocation to a running daemon and copies the
//! already-encoded response into a local sink. A terminal error object at the
//! end of the stream is turned back into a [`CmdError`] instead of being
//! copied.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use ipfs_cmds::{BoxReader, CmdError, CmdResult, ErrorObject, RequestContext};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;

use crate::error::HttpError;
use crate::handler::{ARG_PARAM, STREAM_ERROR_HEADER};

/// Connection timeout for reaching the daemon.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Chunks buffered between a local body reader and the upload.
const UPLOAD_CHUNKS: usize = 8;

/// HTTP client for a daemon's command API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client for `base`, e.g. `http://127.0.0.1:5001/api/v0`.
    pub fn new(base: &str) -> Result<Self, HttpError> {
        let mut base = Url::parse(base).map_err(|e| HttpError::Transport(format!("bad API address {base}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { base, http })
    }

    /// Client for a listen address such as `127.0.0.1:5001`.
    pub fn for_listen_addr(addr: &str, prefix: &str) -> Result<Self, HttpError> {
        let addr = addr.trim();
        let base = if addr.contains("://") {
            format!("{addr}{prefix}")
        } else {
            format!("http://{addr}{prefix}")
        };
        Self::new(&base)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL of the command at `path`.
    pub fn command_url(&self, path: &[String]) -> Result<Url, HttpError> {
        self.base
            .join(&path.join("/"))
            .map_err(|e| HttpError::Transport(e.to_string()))
    }

    /// Run the command at `path` on the daemon and copy its encoded output
    /// into `sink`.
    pub async fn execute<W>(
        &self,
        ctx: &RequestContext,
        path: &[String],
        args: &[String],
        options: &[(String, String)],
        body: Option<BoxReader>,
        sink: &mut W,
    ) -> CmdResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let url = self.command_url(path).map_err(HttpError::into_cmd_error)?;
        let mut query: Vec<(&str, &str)> = args.iter().map(|a| (ARG_PARAM, a.as_str())).collect();
        query.extend(options.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let mut request = self.http.post(url.clone()).query(&query);
        if let Some(body) = body {
            request = request.body(reqwest::Body::wrap_stream(upload_stream(body)));
        }
        debug!(%url, args = args.len(), "sending API request");

        let response = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ctx.error()),
            sent = request.send() => sent.map_err(|e| CmdError::normal(format!("API request failed: {e}")))?,
        };

        let status = response.status();
        if !status.is_success() {
            let header_message = response
                .headers()
                .get(STREAM_ERROR_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await.unwrap_or_default();
            return Err(match serde_json::from_slice::<ErrorObject>(&body) {
                Ok(object) => object.into_error(),
                Err(_) => CmdError::normal(
                    header_message.unwrap_or_else(|| format!("API returned {status}")),
                ),
            });
        }

        let mut stream = response.bytes_stream();
        let mut tail = TailBuffer::default();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ctx.error()),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk: Bytes = chunk.map_err(|e| CmdError::normal(format!("API response failed: {e}")))?;
            let ready = tail.push(&chunk);
            if !ready.is_empty() {
                sink.write_all(&ready).await?;
            }
        }

        let rest = tail.finish();
        if let Some(err) = terminal_error(&rest) {
            sink.flush().await?;
            return Err(err);
        }
        sink.write_all(&rest).await?;
        sink.flush().await?;
        Ok(())
    }
}

/// Body stream for an upload. The reader is drained on its own task so the
/// stream handed to the client is `Sync`.
fn upload_stream(body: BoxReader) -> ReceiverStream<std::io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(UPLOAD_CHUNKS);
    tokio::spawn(async move {
        let mut chunks = ReaderStream::new(body);
        while let Some(chunk) = chunks.next().await {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}

/// Holds back the last line of a stream so a terminal error object can be
/// recognized before it is written.
#[derive(Debug, Default)]
struct TailBuffer {
    pending: Vec<u8>,
}

impl TailBuffer {
    /// Append `chunk` and return the bytes that can no longer be part of
    /// the last line.
    fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);
        let limit = if self.pending.ends_with(b"\n") {
            self.pending.len() - 1
        } else {
            self.pending.len()
        };
        match self.pending[..limit].iter().rposition(|b| *b == b'\n') {
            Some(cut) => {
                let rest = self.pending.split_off(cut + 1);
                std::mem::replace(&mut self.pending, rest)
            }
            None => Vec::new(),
        }
    }

    fn finish(self) -> Vec<u8> {
        self.pending
    }
}

fn terminal_error(line: &[u8]) -> Option<CmdError> {
    let trimmed = line.trim_ascii();
    if !trimmed.starts_with(b"{") {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(trimmed).ok()?;
    if !ErrorObject::is_error_object(&value) {
        return None;
    }
    serde_json::from_value::<ErrorObject>(value).ok().map(ErrorObject::into_error)
}
