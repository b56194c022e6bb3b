//! `ipfs add`.
//!
//! The run phase splits in two tasks: a worker that chunks the input files
//! and stores blocks, and a drain that forwards the worker's events (progress
//! and finished objects) to the emitter. Both stop at the first cancellation.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use ipfs_cmds::{
    ArgumentDef, BoxReader, CmdError, CmdResult, Command, Emitter, Encoder, Encoding, ExecContext, Files,
    HelpText, OptionDef, Receiver, Request, RequestContext, names,
};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::debug;

use crate::env::NodeEnv;
use crate::node::{BlockStore, Cid, DagNode, PinMode};

/// Bytes between two progress events.
pub const PROGRESS_INCREMENT: u64 = 4096;

/// Default leaf size.
pub const CHUNK_SIZE: usize = 262_144;

/// Largest accepted leaf size.
pub const MAX_CHUNK_SIZE: usize = 1 << 20;

const QUIETER: &str = "quieter";
const PIN: &str = "pin";
const EVENT_BUFFER: usize = 32;

/// One event of an `add` stream.
///
/// Progress events carry `Bytes`; the event of a finished object carries
/// `Hash` and `Size` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddEvent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl AddEvent {
    fn progress(name: &str, bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            hash: None,
            bytes: Some(bytes),
            size: None,
        }
    }

    fn added(name: &str, cid: &Cid, size: u64) -> Self {
        Self {
            name: name.to_string(),
            hash: Some(cid.to_string()),
            bytes: None,
            size: Some(size.to_string()),
        }
    }

    pub fn is_progress(&self) -> bool {
        self.hash.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct AddSettings {
    progress: bool,
    only_hash: bool,
    wrap: bool,
    pin: bool,
    chunk_size: usize,
}

impl AddSettings {
    fn from_request(req: &Request) -> CmdResult<Self> {
        Ok(Self {
            progress: req.flag(names::PROGRESS)?,
            only_hash: req.flag(names::ONLY_HASH)?,
            wrap: req.flag(names::WRAP_WITH_DIRECTORY)?,
            pin: req.option::<bool>(PIN)?.unwrap_or(true),
            chunk_size: parse_chunker(&req.option::<String>(names::CHUNKER)?.unwrap_or_default())?,
        })
    }
}

/// Leaf size of a `size-<bytes>` chunker.
pub fn parse_chunker(spec: &str) -> CmdResult<usize> {
    if spec.is_empty() || spec == "default" {
        return Ok(CHUNK_SIZE);
    }
    let size = spec
        .strip_prefix("size-")
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| CmdError::client(format!("unrecognized chunker option: {spec}")))?;
    if size == 0 || size > MAX_CHUNK_SIZE {
        return Err(CmdError::client(format!(
            "chunker size must be between 1 and {MAX_CHUNK_SIZE}, got {size}"
        )));
    }
    Ok(size)
}

pub fn command() -> Command {
    Command::new()
        .help(
            HelpText::new("Add a file or directory to IPFS.")
                .short("Adds the content of <path> to IPFS. Use -r to add directories.")
                .long(
                    "Adds the content of <path> to IPFS. Directories are added\n\
                     recursively with -r, producing one directory node per level.\n\
                     Files are split into leaves of the chunker size.\n\n\
                     With --progress, events reporting the bytes read so far are\n\
                     emitted while a file is being added.",
                ),
        )
        .argument(
            ArgumentDef::file("path", true, true, "The path to a file to be added to IPFS.")
                .enable_recursive()
                .enable_stdin(),
        )
        .option(OptionDef::bool(names::RECURSIVE, "Add directory paths recursively.").alias("r"))
        .option(OptionDef::bool(names::QUIET, "Write minimal output.").alias("q"))
        .option(OptionDef::bool(QUIETER, "Write only final hash.").alias("Q"))
        .option(OptionDef::bool(names::SILENT, "Write no output."))
        .option(OptionDef::bool(names::PROGRESS, "Stream progress data.").alias("p"))
        .option(
            OptionDef::bool(names::WRAP_WITH_DIRECTORY, "Wrap files with a directory object.").alias("w"),
        )
        .option(OptionDef::bool(names::HIDDEN, "Include files that are hidden.").alias("H"))
        .option(OptionDef::bool(names::ONLY_HASH, "Only chunk and hash - do not write to disk.").alias("n"))
        .option(
            OptionDef::string(names::CHUNKER, "Chunking algorithm, size-[bytes].")
                .alias("s")
                .with_default("size-262144"),
        )
        .option(OptionDef::bool(PIN, "Pin this object when adding.").with_default(true))
        .pre_run(|req| {
            parse_chunker(&req.option::<String>(names::CHUNKER)?.unwrap_or_default())?;
            Ok(())
        })
        .output::<AddEvent>()
        .encoder(Encoding::Text, Encoder::typed(encode_text).no_newline())
        .run_fn(run)
        .post_run_fn(ExecContext::Cli, post_run)
}

fn encode_text(req: &Request, w: &mut dyn Write, event: &AddEvent) -> CmdResult<()> {
    let Some(hash) = &event.hash else {
        return Ok(());
    };
    if req.flag(names::SILENT)? {
        return Ok(());
    }
    if req.flag(names::QUIET)? || req.flag(QUIETER)? {
        writeln!(w, "{hash}")?;
    } else {
        writeln!(w, "added {hash} {}", event.name)?;
    }
    Ok(())
}

async fn run(req: Arc<Request>, emitter: Emitter) -> CmdResult<()> {
    let env = NodeEnv::from_request(&req)?;
    let settings = AddSettings::from_request(&req)?;
    let files = req.take_files();
    if files.is_empty() {
        return Err(CmdError::client("no files to add"));
    }
    let ctx = req.context().clone();

    let (tx, mut rx) = mpsc::channel::<AddEvent>(EVENT_BUFFER);
    let worker = tokio::spawn(add_all(files, settings, env.blocks_arc(), ctx.clone(), tx));
    let drain = tokio::spawn({
        let emitter = emitter.clone();
        async move {
            while let Some(event) = rx.recv().await {
                emitter.emit(event).await?;
            }
            Ok::<_, CmdError>(())
        }
    });

    let (worked, drained) = tokio::join!(worker, drain);
    let roots = settle(&ctx, worked, drained)?;

    if settings.pin && !settings.only_hash {
        for cid in &roots {
            env.pins().pin(cid, PinMode::Recursive).await?;
        }
    }
    debug!(roots = roots.len(), "add finished");
    Ok(())
}

/// A failed drain stops the worker's sends, so its error is reported
/// first.
fn settle(
    ctx: &RequestContext,
    worked: Result<CmdResult<Vec<Cid>>, JoinError>,
    drained: Result<CmdResult<()>, JoinError>,
) -> CmdResult<Vec<Cid>> {
    drained.map_err(|e| CmdError::fatal(format!("add drain failed: {e}")))??;
    ctx.check()?;
    worked.map_err(|e| CmdError::fatal(format!("add worker failed: {e}")))?
}

/// Drops progress for `--silent`, and everything but the last object for
/// `--quieter`.
async fn post_run(req: Arc<Request>, mut input: Receiver, output: Emitter) -> CmdResult<()> {
    let quieter = req.flag(QUIETER)?;
    let silent = req.flag(names::SILENT)?;
    let mut last = None;
    while let Some(payload) = input.next().await? {
        let event = match payload.into_value::<AddEvent>() {
            Ok(event) => event,
            Err(other) => {
                output.emit_payload(other).await?;
                continue;
            }
        };
        if silent {
            continue;
        }
        if quieter {
            if !event.is_progress() {
                last = Some(event);
            }
            continue;
        }
        output.emit(event).await?;
    }
    if let Some(event) = last {
        output.emit(event).await?;
    }
    Ok(())
}

/// Tree of added objects, keyed by parent directory name. Top level
/// inputs are kept in order since their names may repeat.
#[derive(Default)]
struct Tree {
    children: BTreeMap<String, BTreeMap<String, (Cid, u64)>>,
    roots: Vec<(String, Cid, u64)>,
    directories: Vec<String>,
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", name),
    }
}

impl Tree {
    fn insert(&mut self, name: &str, cid: Cid, size: u64) {
        let (parent, leaf) = split_name(name);
        if parent.is_empty() {
            self.roots.push((leaf.to_string(), cid, size));
            return;
        }
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(leaf.to_string(), (cid, size));
    }

    fn take_children(&mut self, name: &str) -> BTreeMap<String, (Cid, u64)> {
        self.children.remove(name).unwrap_or_default()
    }

    /// Top level entries of the wrapping directory. The same name may only
    /// repeat for the same object.
    fn wrapped(&self) -> CmdResult<BTreeMap<String, (Cid, u64)>> {
        let mut out = BTreeMap::new();
        for (name, cid, size) in &self.roots {
            if let Some((prev, _)) = out.insert(name.clone(), (cid.clone(), *size))
                && &prev != cid
            {
                return Err(CmdError::client(format!(
                    "cannot wrap two different objects named '{name}'"
                )));
            }
        }
        Ok(out)
    }
}

async fn add_all(
    mut files: Files,
    settings: AddSettings,
    blocks: Arc<dyn BlockStore>,
    ctx: RequestContext,
    tx: mpsc::Sender<AddEvent>,
) -> CmdResult<Vec<Cid>> {
    let sender = EventSender { tx: &tx, ctx: &ctx };
    let store = Store {
        blocks: blocks.as_ref(),
        only_hash: settings.only_hash,
    };
    let mut tree = Tree::default();

    while let Some(entry) = files.next_entry() {
        ctx.check()?;
        if entry.is_dir() {
            tree.directories.push(entry.name);
            continue;
        }
        let name = entry.name.clone();
        let reader = entry.open().await?;
        let (cid, size) = add_file(&name, reader, &settings, &store, &sender).await?;
        // stdin has no name; it is reported under its hash
        let name = if name.is_empty() { cid.to_string() } else { name };
        sender.send(AddEvent::added(&name, &cid, size)).await?;
        tree.insert(&name, cid, size);
    }

    // deepest directories first so every child is known
    let mut directories = std::mem::take(&mut tree.directories);
    directories.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
    for name in directories {
        ctx.check()?;
        let (cid, size) = store.directory(tree.take_children(&name)).await?;
        sender.send(AddEvent::added(&name, &cid, size)).await?;
        tree.insert(&name, cid, size);
    }

    if settings.wrap {
        let (cid, size) = store.directory(tree.wrapped()?).await?;
        sender.send(AddEvent::added("", &cid, size)).await?;
        return Ok(vec![cid]);
    }
    Ok(tree.roots.into_iter().map(|(_, cid, _)| cid).collect())
}

struct EventSender<'a> {
    tx: &'a mpsc::Sender<AddEvent>,
    ctx: &'a RequestContext,
}

impl EventSender<'_> {
    async fn send(&self, event: AddEvent) -> CmdResult<()> {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(self.ctx.error()),
            sent = self.tx.send(event) => sent.map_err(|_| self.ctx.error()),
        }
    }
}

struct Store<'a> {
    blocks: &'a dyn BlockStore,
    only_hash: bool,
}

impl Store<'_> {
    async fn put(&self, cid: &Cid, data: Bytes) -> CmdResult<()> {
        if self.only_hash {
            return Ok(());
        }
        self.blocks.put(cid, data).await
    }

    async fn directory(&self, children: BTreeMap<String, (Cid, u64)>) -> CmdResult<(Cid, u64)> {
        let size = children.values().map(|(_, size)| size).sum();
        let entries = children.into_iter().map(|(name, (cid, _))| (name, cid)).collect();
        let (cid, data) = DagNode::directory(entries, size).encode()?;
        self.put(&cid, data).await?;
        Ok((cid, size))
    }
}

async fn add_file(
    name: &str,
    mut reader: BoxReader,
    settings: &AddSettings,
    store: &Store<'_>,
    sender: &EventSender<'_>,
) -> CmdResult<(Cid, u64)> {
    let ctx = sender.ctx;
    let mut leaves = Vec::new();
    let mut chunk = BytesMut::with_capacity(settings.chunk_size);
    let mut buf = vec![0u8; settings.chunk_size];
    let mut total = 0u64;
    let mut reported = 0u64;

    loop {
        let want = settings.chunk_size - chunk.len();
        let n = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ctx.error()),
            read = reader.read(&mut buf[..want]) => read?,
        };
        if n == 0 {
            break;
        }
        chunk.extend_from_slice(&buf[..n]);
        total += n as u64;

        if chunk.len() == settings.chunk_size {
            let leaf = chunk.split().freeze();
            let cid = Cid::raw(&leaf);
            store.put(&cid, leaf).await?;
            leaves.push(cid);
        }
        if settings.progress && total - reported >= PROGRESS_INCREMENT {
            reported = total;
            sender.send(AddEvent::progress(name, total)).await?;
        }
    }

    if !chunk.is_empty() || leaves.is_empty() {
        let leaf = chunk.freeze();
        let cid = Cid::raw(&leaf);
        store.put(&cid, leaf).await?;
        leaves.push(cid);
    }
    if settings.progress && total > reported {
        sender.send(AddEvent::progress(name, total)).await?;
    }

    if leaves.len() == 1 {
        let cid = leaves.remove(0);
        return Ok((cid, total));
    }
    let (cid, data) = DagNode::file(leaves, total).encode()?;
    store.put(&cid, data).await?;
    Ok((cid, total))
}
