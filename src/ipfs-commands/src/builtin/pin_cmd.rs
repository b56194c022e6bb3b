//! `ipfs pin add|ls|rm`.

use std::io::Write;

use ipfs_cmds::{
    ArgumentDef, CmdError, CmdResult, Command, Encoder, Encoding, HelpText, OptionDef, Request, names,
};
use serde::Serialize;

use crate::env::NodeEnv;
use crate::node::{Cid, PinMode};

const TYPE: &str = "type";

/// Output of `pin add` and `pin rm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PinOutput {
    pub pins: Vec<String>,
}

/// One entry of `pin ls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PinLsEntry {
    pub cid: String,
    #[serde(rename = "Type")]
    pub mode: PinMode,
}

pub fn command() -> Command {
    Command::new()
        .help(HelpText::new("Pin (and unpin) objects to local storage."))
        .subcommand("add", add())
        .subcommand("ls", ls())
        .subcommand("rm", rm())
}

fn mode_of(req: &Request) -> CmdResult<PinMode> {
    Ok(if req.flag(names::RECURSIVE)? {
        PinMode::Recursive
    } else {
        PinMode::Direct
    })
}

async fn parse_paths(req: &Request) -> CmdResult<Vec<Cid>> {
    req.all_arguments()
        .await?
        .iter()
        .map(|p| p.parse::<Cid>())
        .collect()
}

fn add() -> Command {
    Command::new()
        .help(
            HelpText::new("Pin objects to local storage.")
                .short("Stores an IPFS object from a given path locally to disk.")
                .long(
                    "Pins the objects at <ipfs-path> so they are kept across garbage\n\
                     collection. Pins are recursive unless --recursive=false is given.",
                ),
        )
        .argument(ArgumentDef::string("ipfs-path", true, true, "Path to object(s) to be pinned.").enable_stdin())
        .option(
            OptionDef::bool(names::RECURSIVE, "Recursively pin the object linked to by the specified object(s).")
                .alias("r")
                .with_default(true),
        )
        .option(OptionDef::bool(names::PROGRESS, "Show progress."))
        .output::<PinOutput>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|req, w: &mut dyn Write, out: &PinOutput| {
                let how = match mode_of(req)? {
                    PinMode::Recursive => "recursively",
                    PinMode::Direct => "directly",
                };
                for pin in &out.pins {
                    writeln!(w, "pinned {pin} {how}")?;
                }
                Ok(())
            })
            .no_newline(),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            let mode = mode_of(&req)?;
            let mut pins = Vec::new();
            for cid in parse_paths(&req).await? {
                req.context().check()?;
                env.pins().pin(&cid, mode).await?;
                pins.push(cid.to_string());
            }
            emitter.emit_once(PinOutput { pins }).await
        })
}

fn ls() -> Command {
    Command::new()
        .help(
            HelpText::new("List objects pinned to local storage.")
                .short("Lists pinned objects, one per line with its pin type.")
                .long(
                    "Lists the pins of the node. With <ipfs-path> arguments only the\n\
                     given objects are listed and an object that is not pinned is an\n\
                     error. --type filters by pin type: direct, recursive or all.",
                ),
        )
        .argument(ArgumentDef::string("ipfs-path", false, true, "Path to object(s) to be listed."))
        .option(
            OptionDef::string(TYPE, "The type of pinned keys to list. Can be \"direct\", \"recursive\" or \"all\".")
                .alias("t")
                .with_default("all"),
        )
        .option(OptionDef::bool(names::QUIET, "Write just hashes of objects.").alias("q"))
        .output::<PinLsEntry>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|req, w: &mut dyn Write, entry: &PinLsEntry| {
                if req.flag(names::QUIET)? {
                    write!(w, "{}", entry.cid)?;
                } else {
                    write!(w, "{} {}", entry.cid, entry.mode)?;
                }
                Ok(())
            }),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            let wanted = match req.option::<String>(TYPE)?.unwrap_or_default().as_str() {
                "all" | "" => None,
                "direct" => Some(PinMode::Direct),
                "recursive" => Some(PinMode::Recursive),
                other => {
                    return Err(CmdError::client(format!(
                        "invalid type '{other}', must be one of {{direct, recursive, all}}"
                    )));
                }
            };

            let pins = env.pins().pins().await?;
            let selected = parse_paths(&req).await?;
            for cid in &selected {
                if !pins.iter().any(|(pinned, _)| pinned == cid) {
                    return Err(CmdError::normal(format!("path '{cid}' is not pinned")));
                }
            }

            for (cid, mode) in pins {
                if wanted.is_some_and(|w| w != mode) {
                    continue;
                }
                if !selected.is_empty() && !selected.contains(&cid) {
                    continue;
                }
                emitter
                    .emit(PinLsEntry {
                        cid: cid.to_string(),
                        mode,
                    })
                    .await?;
            }
            Ok(())
        })
}

fn rm() -> Command {
    Command::new()
        .help(
            HelpText::new("Remove object from pin-list.")
                .short("Removes the pin from the given object allowing it to be garbage collected.")
                .long(
                    "Removes the pins of the objects at <ipfs-path>. A recursive pin is\n\
                     only removed by a recursive unpin.",
                ),
        )
        .argument(ArgumentDef::string("ipfs-path", true, true, "Path to object(s) to be unpinned.").enable_stdin())
        .option(
            OptionDef::bool(names::RECURSIVE, "Recursively unpin the object linked to by the specified object(s).")
                .alias("r")
                .with_default(true),
        )
        .output::<PinOutput>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|_req, w: &mut dyn Write, out: &PinOutput| {
                for pin in &out.pins {
                    writeln!(w, "unpinned {pin}")?;
                }
                Ok(())
            })
            .no_newline(),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            let mode = mode_of(&req)?;
            let mut pins = Vec::new();
            for cid in parse_paths(&req).await? {
                env.pins().unpin(&cid, mode).await?;
                pins.push(cid.to_string());
            }
            emitter.emit_once(PinOutput { pins }).await
        })
}
