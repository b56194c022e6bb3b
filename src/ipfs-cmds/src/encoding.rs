//! Encoder dispatch.
//!
//! Values received from a command are turned into bytes for the encoding the
//! caller asked for. The command's own encoder for that encoding wins;
//! otherwise values are written as newline-delimited JSON if the command
//! declares an output type.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::command::OutputType;
use crate::emitter::{Emittable, Payload, Receiver};
use crate::error::{CmdError, CmdResult};
use crate::request::Request;

/// Output encoding chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Encoding {
    Text,
    Json,
    Other(String),
}

impl Encoding {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Other(name) => name,
        }
    }

    /// Content type of a value stream in this encoding.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Text => "text/plain; charset=utf-8",
            Self::Json => "application/json",
            Self::Other(name) if name == "xml" => "application/xml",
            Self::Other(_) => "application/octet-stream",
        }
    }
}

impl FromStr for Encoding {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "" | "text" => Self::Text,
            "json" => Self::Json,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type EncodeFn = Arc<dyn Fn(&Request, &mut dyn Write, &dyn Emittable) -> CmdResult<()> + Send + Sync>;

/// A per-command, per-encoding serializer.
#[derive(Clone)]
pub struct Encoder {
    value_type: Option<OutputType>,
    newline: bool,
    func: EncodeFn,
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("value_type", &self.value_type.map(|t| t.name()))
            .field("newline", &self.newline)
            .finish()
    }
}

impl Encoder {
    /// Encoder accepting any value.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Request, &mut dyn Write, &dyn Emittable) -> CmdResult<()> + Send + Sync + 'static,
    {
        Self {
            value_type: None,
            newline: true,
            func: Arc::new(func),
        }
    }

    /// Encoder for values of type `T`; any other value is a fatal error.
    pub fn typed<T, F>(func: F) -> Self
    where
        T: Any,
        F: Fn(&Request, &mut dyn Write, &T) -> CmdResult<()> + Send + Sync + 'static,
    {
        Self {
            value_type: Some(OutputType::of::<T>()),
            newline: true,
            func: Arc::new(move |req: &Request, w: &mut dyn Write, value: &dyn Emittable| {
                match value.as_any().downcast_ref::<T>() {
                    Some(v) => func(req, w, v),
                    None => Err(CmdError::TypeMismatch {
                        expected: std::any::type_name::<T>(),
                        actual: value.type_name(),
                    }),
                }
            }),
        }
    }

    /// The encoder terminates its own records.
    pub fn no_newline(mut self) -> Self {
        self.newline = false;
        self
    }

    pub fn value_type(&self) -> Option<OutputType> {
        self.value_type
    }

    /// Encode one value into `out`, appending a newline if anything was
    /// written and the encoder did not opt out.
    pub fn encode(&self, req: &Request, out: &mut Vec<u8>, value: &dyn Emittable) -> CmdResult<()> {
        let start = out.len();
        (self.func)(req, out, value)?;
        if self.newline && out.len() > start {
            out.push(b'\n');
        }
        Ok(())
    }
}

/// Write `value` as one compact JSON line.
pub fn encode_json(out: &mut Vec<u8>, value: &dyn Emittable) -> CmdResult<()> {
    let json = value
        .to_json()
        .map_err(|e| CmdError::fatal(format!("failed to encode value: {e}")))?;
    serde_json::to_writer(&mut *out, &json)
        .map_err(|e| CmdError::fatal(format!("failed to encode value: {e}")))?;
    out.push(b'\n');
    Ok(())
}

/// Encode one value of `req` with `encoding`.
pub fn encode_value(req: &Request, encoding: &Encoding, value: &dyn Emittable) -> CmdResult<Vec<u8>> {
    let command = req.command();
    let mut out = Vec::new();
    if let Some(encoder) = command.encoder_for(encoding) {
        encoder.encode(req, &mut out, value)?;
    } else if command.output_type.is_some() {
        encode_json(&mut out, value)?;
    } else {
        return Err(CmdError::normal(format!(
            "no encoder for encoding '{encoding}' on command '{}'",
            req.path_string()
        )));
    }
    Ok(out)
}

/// Render an error for a text sink.
pub fn error_text(err: &CmdError) -> String {
    format!("Error: {err}\n")
}

/// Render the terminal JSON error object line.
pub fn error_json(err: &CmdError) -> Vec<u8> {
    let mut line = serde_json::to_vec(&err.to_object()).unwrap_or_else(|_| {
        format!("{{\"Type\":\"error\",\"Message\":{:?}}}", err.to_string()).into_bytes()
    });
    line.push(b'\n');
    line
}

/// Drain `receiver` into `sink`, encoding values and copying readers
/// verbatim. Returns the stream's terminal error, if any, after writing
/// everything that preceded it.
pub async fn encode_response<W>(
    req: &Request,
    encoding: &Encoding,
    mut receiver: Receiver,
    sink: &mut W,
) -> CmdResult<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let ctx = receiver.context().clone();
    while let Some(payload) = receiver.next().await? {
        match payload {
            Payload::Value(value) => {
                let bytes = encode_value(req, encoding, value.as_ref())?;
                trace!(len = bytes.len(), "encoded value");
                sink.write_all(&bytes).await?;
            }
            Payload::Reader(mut reader) => {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Err(ctx.error()),
                    copied = tokio::io::copy(&mut reader, sink) => {
                        copied?;
                    }
                }
            }
        }
        sink.flush().await?;
    }
    sink.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_parse() {
        assert_eq!("json".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!("TEXT".parse::<Encoding>().unwrap(), Encoding::Text);
        assert_eq!(
            "xml".parse::<Encoding>().unwrap(),
            Encoding::Other("xml".to_string())
        );
        assert_eq!(Encoding::Json.content_type(), "application/json");
    }

    #[test]
    fn test_error_renderers() {
        let err = CmdError::client("bad input");
        assert_eq!(error_text(&err), "Error: bad input\n");
        let line = error_json(&err);
        assert_eq!(line.last(), Some(&b'\n'));
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["Kind"], "client");
        assert_eq!(value["Message"], "bad input");
    }
}
