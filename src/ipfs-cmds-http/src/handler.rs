//! Command route.
//!
//! `POST {prefix}/{*path}` runs the command at `path` (slash separated).
//! Query parameters named `arg` are positional arguments, every other
//! parameter is an option. The request body, when present, is the command's
//! stdin or file input.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use ipfs_cmds::encoding::{encode_value, error_json};
use ipfs_cmds::{
    BoxReader, CancelCause, Encoding, Environment, Executor, Invocation, Payload, Receiver, Request,
    RequestBuilder, RequestContext,
};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info};

use crate::codec;
use crate::config::ServerConfig;
use crate::error::{HttpError, HttpResult};

/// Query parameter carrying positional arguments.
pub const ARG_PARAM: &str = "arg";

/// Set when the response is a raw byte stream.
pub const STREAM_OUTPUT_HEADER: &str = "x-stream-output";
/// Set when the response is a stream of encoded values.
pub const CHUNKED_OUTPUT_HEADER: &str = "x-chunked-output";
/// Error message of a request that failed before any output.
pub const STREAM_ERROR_HEADER: &str = "x-stream-error";

/// Shared state of the command route.
pub struct ApiState {
    pub builder: RequestBuilder,
    pub executor: Executor,
    pub env: Environment,
    pub config: ServerConfig,
}

impl ApiState {
    pub fn new(builder: RequestBuilder, executor: Executor, env: Environment, config: ServerConfig) -> Self {
        Self {
            builder,
            executor,
            env,
            config,
        }
    }
}

/// Split a raw query string into positional arguments and options.
pub fn split_query(query: &str) -> (Vec<String>, Vec<(String, String)>) {
    let mut args = Vec::new();
    let mut options = Vec::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key == ARG_PARAM {
            args.push(value.into_owned());
        } else {
            options.push((key.into_owned(), value.into_owned()));
        }
    }
    (args, options)
}

fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

fn body_reader(body: Body) -> BoxReader {
    let stream = body
        .into_data_stream()
        .map_err(std::io::Error::other);
    Box::pin(StreamReader::new(stream))
}

/// Cancels the request when the response body is dropped before the stream
/// finished, which happens when the client goes away.
struct DisconnectGuard {
    ctx: RequestContext,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!("client disconnected, cancelling request");
            self.ctx.cancel_with(CancelCause::Disconnected);
        }
    }
}

/// Handle a command request.
pub async fn handle_command(
    State(state): State<Arc<ApiState>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match run_command(&state, &path, query.as_deref().unwrap_or(""), &headers, body).await {
        Ok(mut response) => {
            apply_headers(&state.config, response.headers_mut());
            response
        }
        Err(err) => {
            let message = err.to_string();
            let mut response = err.into_response();
            if let Ok(value) = HeaderValue::from_str(&message) {
                response.headers_mut().insert(STREAM_ERROR_HEADER, value);
            }
            apply_headers(&state.config, response.headers_mut());
            response
        }
    }
}

fn apply_headers(config: &ServerConfig, headers: &mut HeaderMap) {
    for (name, value) in &config.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

async fn run_command(
    state: &ApiState,
    path: &str,
    query: &str,
    headers: &HeaderMap,
    body: Body,
) -> HttpResult<Response> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let (mut args, options) = split_query(query);

    let command = state.builder.registry().get(&segments)?;
    decode_binary_args(&command, &mut args)?;

    let ctx = RequestContext::new();
    let mut invocation = Invocation::path(segments.clone(), args)
        .context(ctx.clone())
        .env(state.env.clone());
    for (name, value) in options {
        invocation = invocation.option(name, value);
    }
    if has_body(headers) {
        invocation = invocation.body(body_reader(body));
    }

    let request = state.builder.build(invocation)?;
    info!(path = %segments.join(" "), "api request");

    let response = state.executor.execute(request).await;
    let encoding = response.encoding();
    let request = response.request;
    let mut receiver = response.receiver;

    let first = match receiver.next().await {
        Ok(first) => first,
        Err(err) => return Err(HttpError::Command(err)),
    };

    let streams_bytes = first.as_ref().is_some_and(Payload::is_reader);
    let mut builder = Response::builder().status(StatusCode::OK);
    if streams_bytes {
        builder = builder
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(STREAM_OUTPUT_HEADER, "1");
    } else {
        builder = builder
            .header(header::CONTENT_TYPE, encoding.content_type())
            .header(CHUNKED_OUTPUT_HEADER, "1");
    }

    if let Some(first) = first {
        receiver.unread(first);
    }
    let body = Body::from_stream(response_stream(request, encoding, receiver, ctx));
    builder
        .body(body)
        .map_err(|e| HttpError::Protocol(e.to_string()))
}

fn decode_binary_args(command: &ipfs_cmds::Command, args: &mut [String]) -> HttpResult<()> {
    let binary: Vec<bool> = command.arguments.iter().map(|a| a.binary).collect();
    let variadic_binary = command.arguments.last().is_some_and(|a| a.variadic && a.binary);
    for (i, arg) in args.iter_mut().enumerate() {
        let is_binary = binary.get(i).copied().unwrap_or(variadic_binary);
        if !is_binary {
            continue;
        }
        let bytes = codec::decode(arg)
            .ok_or_else(|| HttpError::BadQuery(format!("argument {i} is not multibase base64url")))?;
        *arg = String::from_utf8(bytes)
            .map_err(|_| HttpError::BadQuery(format!("argument {i} does not decode to UTF-8")))?;
    }
    Ok(())
}

fn response_stream(
    request: Arc<Request>,
    encoding: Encoding,
    mut receiver: Receiver,
    ctx: RequestContext,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut guard = DisconnectGuard { ctx, finished: false };
        loop {
            match receiver.next().await {
                Ok(Some(Payload::Value(value))) => match encode_value(&request, &encoding, value.as_ref()) {
                    Ok(bytes) => yield Ok(Bytes::from(bytes)),
                    Err(err) => {
                        yield Ok(Bytes::from(error_json(&err)));
                        break;
                    }
                },
                Ok(Some(Payload::Reader(reader))) => {
                    let mut chunks = ReaderStream::new(reader);
                    while let Some(chunk) = chunks.next().await {
                        yield chunk;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "stream ended with error");
                    yield Ok(Bytes::from(error_json(&err)));
                    break;
                }
            }
        }
        guard.finished = true;
    }
}
