//! `ipfs routing` and the retired `ipfs dht` surface.

use std::io::Write;

use ipfs_cmds::{ArgumentDef, CmdError, Command, Encoder, Encoding, HelpText, OptionDef, names};

use crate::env::NodeEnv;
use crate::node::{Cid, PeerInfo};

const NUM_PROVIDERS: &str = "num-providers";

/// Note shown for `dht` subcommands that moved to `routing`.
pub const MOVED_TO_ROUTING: &str = "removed, use 'routing' instead";

pub fn routing() -> Command {
    Command::new()
        .help(HelpText::new("Issue routing commands."))
        .subcommand("findprovs", find_providers())
}

pub fn dht() -> Command {
    Command::new()
        .help(HelpText::new("Issue commands directly through the DHT."))
        .subcommand("findprovs", Command::new().removed(MOVED_TO_ROUTING))
        .subcommand("findpeer", Command::new().removed(MOVED_TO_ROUTING))
        .subcommand("provide", Command::new().removed(MOVED_TO_ROUTING))
}

fn find_providers() -> Command {
    Command::new()
        .help(
            HelpText::new("Find peers that can provide a specific value, given a key.")
                .short("Outputs a list of newline-delimited provider Peer IDs.")
                .long(
                    "Queries the routing system for peers providing <key> and streams\n\
                     them as they are found, up to --num-providers.",
                ),
        )
        .argument(ArgumentDef::string("key", true, true, "The key to find providers for."))
        .option(OptionDef::bool(names::VERBOSE, "Print extra information.").alias("v"))
        .option(
            OptionDef::int(NUM_PROVIDERS, "The number of providers to find.")
                .alias("n")
                .with_default(20),
        )
        .output::<PeerInfo>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|req, w: &mut dyn Write, peer: &PeerInfo| {
                if req.flag(names::VERBOSE)? && !peer.addrs.is_empty() {
                    write!(w, "{} {}", peer.id, peer.addrs.join(" "))?;
                } else {
                    write!(w, "{}", peer.id)?;
                }
                Ok(())
            }),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            env.require_online()?;

            let limit = req.option::<i32>(NUM_PROVIDERS)?.unwrap_or(20);
            if limit < 1 {
                return Err(CmdError::client("number of providers must be greater than 0"));
            }

            for key in req.all_arguments().await? {
                let cid: Cid = key.parse()?;
                let providers = tokio::select! {
                    biased;
                    _ = req.context().cancelled() => return Err(req.context().error()),
                    found = env.routing().find_providers(&cid, limit as usize) => found?,
                };
                for peer in providers {
                    emitter.emit(peer).await?;
                }
            }
            Ok(())
        })
}
