//! Request builder.
//!
//! Turns raw invocation data (command line tokens, or a pre-resolved path
//! with query options from the API) into a validated [`Request`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::arguments::{ArgKind, StdinMode};
use crate::command::{Command, Status};
use crate::context::RequestContext;
use crate::emitter::BoxReader;
use crate::error::RequestError;
use crate::files::{FileEntry, Files};
use crate::options::{FromOptionValue, OptionDef, OptionKind, OptionValue, names};
use crate::registry::Registry;
use crate::request::{Environment, OptionMap, Request};

/// Long help flag, declared on the root.
pub const HELP_LONG: &str = "help";
/// Short help flag, declared on the root.
pub const HELP_SHORT: &str = "h";

/// Raw input of one invocation.
pub struct Invocation {
    /// Command line tokens after the program name. Ignored when `path` is
    /// set.
    pub tokens: Vec<String>,
    /// Pre-resolved command path.
    pub path: Option<Vec<String>>,
    /// Positional arguments accompanying `path`.
    pub arguments: Vec<String>,
    /// Pre-parsed `(name, value)` option pairs, applied after those found in
    /// `tokens`.
    pub options: Vec<(String, String)>,
    /// Request body (piped stdin or HTTP body).
    pub body: Option<BoxReader>,
    pub context: RequestContext,
    pub env: Environment,
}

impl Invocation {
    /// Invocation from command line tokens.
    pub fn cli<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            path: None,
            arguments: Vec::new(),
            options: Vec::new(),
            body: None,
            context: RequestContext::new(),
            env: Environment::empty(),
        }
    }

    /// Invocation of a known path, as received by the API server.
    pub fn path<I, S>(path: I, arguments: Vec<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: Some(path.into_iter().map(Into::into).collect()),
            arguments,
            ..Self::cli(Vec::<String>::new())
        }
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: BoxReader) -> Self {
        self.body = Some(body);
        self
    }

    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }
}

struct RawOption {
    spelling: String,
    value: Option<String>,
}

/// Result of walking command line tokens.
struct Walk {
    path: Vec<String>,
    chain: Vec<Arc<Command>>,
    positionals: Vec<String>,
    options: Vec<RawOption>,
}

/// Builds requests against one registry.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    registry: Registry,
}

impl RequestBuilder {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Validate `invocation` and produce a request.
    pub fn build(&self, invocation: Invocation) -> Result<Request, RequestError> {
        let Invocation {
            tokens,
            path,
            arguments,
            options,
            body,
            context,
            env,
        } = invocation;

        let mut walk = match path {
            Some(path) => {
                let chain = self.registry.resolve(&path)?;
                Walk {
                    path,
                    chain,
                    positionals: arguments,
                    options: Vec::new(),
                }
            }
            None => self.walk_tokens(&tokens)?,
        };
        walk.options.extend(options.into_iter().map(|(spelling, value)| RawOption {
            spelling,
            value: Some(value),
        }));

        let command = walk
            .chain
            .last()
            .cloned()
            .unwrap_or_else(|| self.registry.root().clone());

        if command.status == Status::Removed {
            return Err(RequestError::Removed {
                path: walk.path.join(" "),
                message: command
                    .status_note
                    .clone()
                    .unwrap_or_else(|| "this command has been removed".to_string()),
            });
        }

        let defs: Vec<OptionDef> = walk
            .chain
            .iter()
            .rev()
            .flat_map(|c| c.options.iter().cloned())
            .collect();
        let option_map = parse_options(defs, walk.options)?;

        let wants_help = option_map
            .get(HELP_LONG)
            .or_else(|| option_map.get(HELP_SHORT))
            .and_then(bool::from_option_value)
            .unwrap_or(false);

        let mut request = Request {
            path: walk.path,
            command: command.clone(),
            root: self.registry.root().clone(),
            arguments: Vec::new(),
            stdin_mode: None,
            body_required: None,
            options: option_map,
            files: Mutex::new(Files::new()),
            body: Mutex::new(None),
            context,
            env,
        };

        if command.external {
            request.arguments = walk.positionals;
            *request.body.get_mut() = body;
            return Ok(request);
        }

        let bound = bind_arguments(&command, walk.positionals, body.is_some(), wants_help)?;
        let recursive = request.option::<bool>(names::RECURSIVE).ok().flatten().unwrap_or(false);
        let hidden = request.option::<bool>(names::HIDDEN).ok().flatten().unwrap_or(false);

        let mut files = Files::collect(&bound.file_paths, bound.recursive_allowed && recursive, hidden)?;
        let mut body = body;
        if bound.body_as_file
            && let Some(reader) = body.take()
        {
            files.push(FileEntry::from_reader("", reader));
        }

        debug!(
            path = %request.path.join(" "),
            arguments = bound.strings.len(),
            files = files.len(),
            stdin = ?bound.stdin_mode,
            "built request"
        );

        request.arguments = bound.strings;
        request.stdin_mode = bound.stdin_mode;
        request.body_required = bound.body_required;
        *request.files.get_mut() = files;
        *request.body.get_mut() = body;
        Ok(request)
    }

    fn walk_tokens(&self, tokens: &[String]) -> Result<Walk, RequestError> {
        let root = self.registry.root().clone();
        let mut walk = Walk {
            path: Vec::new(),
            chain: vec![root],
            positionals: Vec::new(),
            options: Vec::new(),
        };
        let mut after_dashdash = false;
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            i += 1;

            let current = walk.chain.last().cloned().unwrap_or_else(|| self.registry.root().clone());
            if current.external && !walk.path.is_empty() {
                walk.positionals.extend(tokens[i - 1..].iter().cloned());
                break;
            }

            if after_dashdash {
                walk.positionals.push(token.clone());
                continue;
            }
            if token == "--" {
                after_dashdash = true;
                continue;
            }

            if let Some(long) = token.strip_prefix("--") {
                let (name, value) = match long.split_once('=') {
                    Some((n, v)) => (n.to_string(), Some(v.to_string())),
                    None => (long.to_string(), None),
                };
                let value = match value {
                    Some(v) => Some(v),
                    None if takes_value(&walk.chain, &name) => {
                        let next = tokens.get(i).cloned();
                        if next.is_some() {
                            i += 1;
                        }
                        next
                    }
                    None => None,
                };
                walk.options.push(RawOption { spelling: name, value });
                continue;
            }

            if token.len() > 1 && token.starts_with('-') {
                let short = &token[1..];
                if let Some((name, value)) = short.split_once('=') {
                    walk.options.push(RawOption {
                        spelling: name.to_string(),
                        value: Some(value.to_string()),
                    });
                    continue;
                }
                let letters: Vec<String> = short.chars().map(String::from).collect();
                if letters.len() == 1 {
                    let name = letters[0].clone();
                    let value = if takes_value(&walk.chain, &name) {
                        let next = tokens.get(i).cloned();
                        if next.is_some() {
                            i += 1;
                        }
                        next
                    } else {
                        None
                    };
                    walk.options.push(RawOption { spelling: name, value });
                } else {
                    // Grouped flags, e.g. `-rq`.
                    for name in letters {
                        walk.options.push(RawOption { spelling: name, value: None });
                    }
                }
                continue;
            }

            if walk.positionals.is_empty() {
                if let Some(sub) = current.child(token) {
                    walk.path.push(token.clone());
                    walk.chain.push(sub.clone());
                    continue;
                }
                if !current.is_runnable() && !current.subcommands.is_empty() {
                    return Err(RequestError::UnknownCommand {
                        token: token.clone(),
                        path: walk.path.clone(),
                    });
                }
            }
            walk.positionals.push(token.clone());
        }

        Ok(walk)
    }
}

fn find_def<'a>(chain: &'a [Arc<Command>], name: &str) -> Option<&'a OptionDef> {
    chain
        .iter()
        .rev()
        .flat_map(|c| c.options.iter())
        .find(|d| d.matches(name))
}

fn takes_value(chain: &[Arc<Command>], name: &str) -> bool {
    find_def(chain, name).is_some_and(|d| !d.kind.is_flag())
}

struct Seen {
    spelling: String,
    value: OptionValue,
}

fn parse_options(defs: Vec<OptionDef>, raw: Vec<RawOption>) -> Result<OptionMap, RequestError> {
    let mut map = OptionMap::new(defs);
    let mut seen: HashMap<&'static str, Seen> = HashMap::new();

    for RawOption { spelling, value } in raw {
        let def = map
            .def(&spelling)
            .cloned()
            .ok_or_else(|| RequestError::UnknownOption(spelling.clone()))?;
        let raw_value = value.unwrap_or_default();
        let parsed = def.parse(&raw_value)?;
        let name = def.name();

        if def.kind == OptionKind::Strings {
            let mut merged = match map.get(name) {
                Some(OptionValue::Strings(prev)) if map.is_set(name) => prev.clone(),
                _ => Vec::new(),
            };
            if let OptionValue::Strings(more) = parsed {
                merged.extend(more);
            }
            map.insert(name, OptionValue::Strings(merged));
            continue;
        }

        if let Some(prev) = seen.get(name)
            && prev.spelling != spelling
            && prev.value != parsed
        {
            return Err(RequestError::ConflictingOption {
                name: name.to_string(),
                first: prev.spelling.clone(),
                second: spelling,
            });
        }
        seen.insert(
            name,
            Seen {
                spelling,
                value: parsed.clone(),
            },
        );
        map.insert(name, parsed);
    }

    Ok(map)
}

struct Bound {
    strings: Vec<String>,
    file_paths: Vec<String>,
    recursive_allowed: bool,
    stdin_mode: Option<StdinMode>,
    body_required: Option<String>,
    body_as_file: bool,
}

fn bind_arguments(
    command: &Command,
    positionals: Vec<String>,
    has_body: bool,
    lenient: bool,
) -> Result<Bound, RequestError> {
    let defs = &command.arguments;
    let total = positionals.len();
    let mut tokens = positionals.into_iter().peekable();
    let mut bound = Bound {
        strings: Vec::new(),
        file_paths: Vec::new(),
        recursive_allowed: false,
        stdin_mode: None,
        body_required: None,
        body_as_file: false,
    };
    let mut remaining = total;

    for (i, def) in defs.iter().enumerate() {
        let required_after = defs[i + 1..].iter().filter(|d| d.required).count();
        let take = if def.variadic {
            remaining
        } else if !def.required && remaining <= required_after {
            0
        } else {
            remaining.min(1)
        };

        let taken: Vec<String> = tokens.by_ref().take(take).collect();
        remaining -= taken.len();

        if taken.is_empty() {
            if def.stdin.is_some() && has_body && bound.stdin_mode.is_none() && !bound.body_as_file {
                match def.kind {
                    ArgKind::String => {
                        bound.stdin_mode = def.stdin;
                        if def.required && !lenient {
                            bound.body_required = Some(def.name.to_string());
                        }
                    }
                    ArgKind::File => bound.body_as_file = true,
                }
                continue;
            }
            if def.required && !lenient {
                return Err(RequestError::MissingArgument(def.name.to_string()));
            }
            continue;
        }

        match def.kind {
            ArgKind::String => bound.strings.extend(taken),
            ArgKind::File => {
                bound.recursive_allowed |= def.recursive;
                bound.file_paths.extend(taken);
            }
        }
    }

    if tokens.peek().is_some() && !lenient {
        return Err(RequestError::TooManyArguments {
            expected: total - remaining,
            got: total,
        });
    }

    Ok(bound)
}
