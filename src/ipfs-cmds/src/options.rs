//! Option descriptors and typed option values.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::RequestError;

/// Names of the options whose values the framework guarantees to deliver
/// with the declared type. Commands attach the meaning.
pub mod names {
    pub const RECURSIVE: &str = "recursive";
    pub const FORCE: &str = "force";
    pub const FLUSH: &str = "flush";
    pub const RAW_LEAVES: &str = "raw-leaves";
    pub const CID_VERSION: &str = "cid-version";
    pub const HASH: &str = "hash";
    pub const CID_BASE: &str = "cid-base";
    pub const QUIET: &str = "quiet";
    pub const SILENT: &str = "silent";
    pub const VERBOSE: &str = "verbose";
    pub const STREAM_ERRORS: &str = "stream-errors";
    pub const DRY_RUN: &str = "dry-run";
    pub const ALLOW_OFFLINE: &str = "allow-offline";
    pub const ALLOW_DOWNGRADE: &str = "allow-downgrade";
    pub const OFFSET: &str = "offset";
    pub const COUNT: &str = "count";
    pub const CREATE: &str = "create";
    pub const PARENTS: &str = "parents";
    pub const TRUNCATE: &str = "truncate";
    pub const HUMAN: &str = "human";
    pub const PROGRESS: &str = "progress";
    pub const TRICKLE: &str = "trickle";
    pub const WRAP_WITH_DIRECTORY: &str = "wrap-with-directory";
    pub const HIDDEN: &str = "hidden";
    pub const ONLY_HASH: &str = "only-hash";
    pub const CHUNKER: &str = "chunker";
    pub const PREFIX: &str = "prefix";
    pub const NUMERIC: &str = "numeric";
    pub const ENCODING: &str = "encoding";
    pub const OUTPUT: &str = "output";

    /// Every recognized option name.
    pub const RECOGNIZED: [&str; 30] = [
        RECURSIVE,
        FORCE,
        FLUSH,
        RAW_LEAVES,
        CID_VERSION,
        HASH,
        CID_BASE,
        QUIET,
        SILENT,
        VERBOSE,
        STREAM_ERRORS,
        DRY_RUN,
        ALLOW_OFFLINE,
        ALLOW_DOWNGRADE,
        OFFSET,
        COUNT,
        CREATE,
        PARENTS,
        TRUNCATE,
        HUMAN,
        PROGRESS,
        TRICKLE,
        WRAP_WITH_DIRECTORY,
        HIDDEN,
        ONLY_HASH,
        CHUNKER,
        PREFIX,
        NUMERIC,
        ENCODING,
        OUTPUT,
    ];

    /// Check whether `name` is one of the recognized option names.
    pub fn is_recognized(name: &str) -> bool {
        RECOGNIZED.contains(&name)
    }
}

/// Value kind of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Bool,
    String,
    Int,
    Int64,
    Uint,
    /// Delimited list of strings.
    Strings,
    /// Duration kept as its source string, parsed where it is used.
    Duration,
}

impl OptionKind {
    /// Type name shown in help and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::String => "string",
            Self::Int => "int",
            Self::Int64 => "int64",
            Self::Uint => "uint",
            Self::Strings => "array",
            Self::Duration => "duration",
        }
    }

    /// Whether the option takes no value on the command line.
    pub fn is_flag(&self) -> bool {
        matches!(self, Self::Bool)
    }

    /// Parse a raw token. Returns `None` when the token is not in the kind's
    /// domain.
    pub fn parse(&self, raw: &str, delimiter: char, keep_empty: bool) -> Option<OptionValue> {
        match self {
            Self::Bool => match raw {
                "" | "true" | "1" => Some(OptionValue::Bool(true)),
                "false" | "0" => Some(OptionValue::Bool(false)),
                _ => None,
            },
            Self::String => Some(OptionValue::String(raw.to_string())),
            Self::Int => raw.parse().ok().map(OptionValue::Int),
            Self::Int64 => raw.parse().ok().map(OptionValue::Int64),
            Self::Uint => {
                if raw.starts_with('+') {
                    return None;
                }
                raw.parse().ok().map(OptionValue::Uint)
            }
            Self::Strings => {
                if raw.is_empty() {
                    return Some(OptionValue::Strings(Vec::new()));
                }
                let parts = raw
                    .split(delimiter)
                    .filter(|s| keep_empty || !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Some(OptionValue::Strings(parts))
            }
            Self::Duration => Some(OptionValue::Duration(raw.to_string())),
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    String(String),
    Int(i32),
    Int64(i64),
    Uint(u64),
    Strings(Vec<String>),
    Duration(String),
}

impl OptionValue {
    /// Kind of this value.
    pub fn kind(&self) -> OptionKind {
        match self {
            Self::Bool(_) => OptionKind::Bool,
            Self::String(_) => OptionKind::String,
            Self::Int(_) => OptionKind::Int,
            Self::Int64(_) => OptionKind::Int64,
            Self::Uint(_) => OptionKind::Uint,
            Self::Strings(_) => OptionKind::Strings,
            Self::Duration(_) => OptionKind::Duration,
        }
    }

    /// Render back to a command-line token.
    pub fn render(&self, delimiter: char) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::String(v) | Self::Duration(v) => v.clone(),
            Self::Int(v) => v.to_string(),
            Self::Int64(v) => v.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Strings(v) => v.join(&delimiter.to_string()),
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(i128::from(*v)),
            Self::Int64(v) => Some(i128::from(*v)),
            Self::Uint(v) => Some(i128::from(*v)),
            _ => None,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u64> for OptionValue {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(v: Vec<String>) -> Self {
        Self::Strings(v)
    }
}

/// Conversion from a stored option value to a Rust type.
pub trait FromOptionValue: Sized {
    /// Convert, returning `None` if the value has a different kind.
    fn from_option_value(value: &OptionValue) -> Option<Self>;
}

impl FromOptionValue for bool {
    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromOptionValue for String {
    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::String(v) | OptionValue::Duration(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromOptionValue for i32 {
    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromOptionValue for i64 {
    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Int(v) => Some(i64::from(*v)),
            OptionValue::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromOptionValue for u64 {
    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Uint(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromOptionValue for Vec<String> {
    fn from_option_value(value: &OptionValue) -> Option<Self> {
        match value {
            OptionValue::Strings(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromOptionValue for OptionValue {
    fn from_option_value(value: &OptionValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Declaration of an option accepted by a command.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDef {
    /// Primary name first, then aliases.
    pub names: Vec<&'static str>,
    pub kind: OptionKind,
    /// Value reported when the option is absent.
    pub default: Option<OptionValue>,
    pub description: &'static str,
    /// Separator for [`OptionKind::Strings`].
    pub delimiter: char,
    /// Keep empty segments when splitting [`OptionKind::Strings`].
    pub keep_empty: bool,
    /// Inclusive numeric range checked at bind time.
    pub range: Option<(i64, i64)>,
}

impl OptionDef {
    fn new(name: &'static str, kind: OptionKind, description: &'static str) -> Self {
        Self {
            names: vec![name],
            kind,
            default: None,
            description,
            delimiter: ',',
            keep_empty: true,
            range: None,
        }
    }

    pub fn bool(name: &'static str, description: &'static str) -> Self {
        Self::new(name, OptionKind::Bool, description)
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, OptionKind::String, description)
    }

    pub fn int(name: &'static str, description: &'static str) -> Self {
        Self::new(name, OptionKind::Int, description)
    }

    pub fn int64(name: &'static str, description: &'static str) -> Self {
        Self::new(name, OptionKind::Int64, description)
    }

    pub fn uint(name: &'static str, description: &'static str) -> Self {
        Self::new(name, OptionKind::Uint, description)
    }

    pub fn strings(name: &'static str, description: &'static str) -> Self {
        Self::new(name, OptionKind::Strings, description)
    }

    pub fn duration(name: &'static str, description: &'static str) -> Self {
        Self::new(name, OptionKind::Duration, description)
    }

    /// Add an alias (a one-character alias is the short form).
    pub fn alias(mut self, alias: &'static str) -> Self {
        self.names.push(alias);
        self
    }

    pub fn with_default(mut self, value: impl Into<OptionValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn drop_empty(mut self) -> Self {
        self.keep_empty = false;
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// Primary name.
    pub fn name(&self) -> &'static str {
        self.names[0]
    }

    /// One-character alias, if any.
    pub fn short(&self) -> Option<&'static str> {
        self.names.iter().skip(1).find(|n| n.chars().count() == 1).copied()
    }

    /// Whether `name` is the primary name or an alias.
    pub fn matches(&self, name: &str) -> bool {
        self.names.contains(&name)
    }

    /// Parse a raw token for this option, applying the declared range.
    pub fn parse(&self, raw: &str) -> Result<OptionValue, RequestError> {
        let value = self
            .kind
            .parse(raw, self.delimiter, self.keep_empty)
            .ok_or_else(|| RequestError::BadOptionType {
                name: self.name().to_string(),
                kind: self.kind.name(),
                value: raw.to_string(),
            })?;

        if let Some((min, max)) = self.range
            && let Some(n) = value.as_i128()
            && (n < i128::from(min) || n > i128::from(max))
        {
            return Err(RequestError::OutOfRange {
                name: self.name().to_string(),
                value: raw.to_string(),
                range: format!("{min}..={max}"),
            });
        }

        Ok(value)
    }
}

/// Parse a duration string such as `300ms`, `1.5h` or `2h45m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0`
/// is accepted.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw == "0" {
        return Some(Duration::ZERO);
    }
    if raw.is_empty() {
        return None;
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = raw;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return None;
        }
        let number: f64 = rest[..num_end].parse().ok()?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_end..];
        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos as u64))
}
