//! `ipfs swarm connect|peers`.

use std::io::Write;

use ipfs_cmds::addr::group_by_peer;
use ipfs_cmds::{ArgumentDef, Command, Encoder, Encoding, HelpText, resolve_peer_addrs};
use serde::Serialize;
use tracing::info;

use crate::env::NodeEnv;

/// Lines of text reported by `swarm connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StringList {
    pub strings: Vec<String>,
}

/// One open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnInfo {
    pub addr: String,
    pub peer: String,
}

/// Output of `swarm peers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnInfos {
    pub peers: Vec<ConnInfo>,
}

pub fn command() -> Command {
    Command::new()
        .help(HelpText::new("Interact with the swarm."))
        .subcommand("connect", connect())
        .subcommand("peers", peers())
}

fn connect() -> Command {
    Command::new()
        .help(
            HelpText::new("Open connection to a given peer.")
                .short("Opens a new direct connection to a peer address.")
                .long(
                    "The address format is a multiaddr ending in the peer identity:\n\n\
                     ipfs swarm connect /ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ\n\n\
                     DNS based addresses (dns, dns4, dns6, dnsaddr) are resolved first.",
                ),
        )
        .argument(ArgumentDef::string("address", true, true, "Address of peer to connect to.").enable_stdin())
        .output::<StringList>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|_req, w: &mut dyn Write, out: &StringList| {
                for line in &out.strings {
                    writeln!(w, "{line}")?;
                }
                Ok(())
            })
            .no_newline(),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            env.require_online()?;

            let raw = req.all_arguments().await?;
            let addrs = resolve_peer_addrs(req.context(), env.resolver(), &raw).await?;
            let mut strings = Vec::new();
            for (peer, transports) in group_by_peer(&addrs) {
                env.swarm().connect(&peer, &transports).await?;
                info!(%peer, addrs = transports.len(), "connected");
                strings.push(format!("connect {peer} success"));
            }
            emitter.emit_once(StringList { strings }).await
        })
}

fn peers() -> Command {
    Command::new()
        .help(
            HelpText::new("List peers with open connections.")
                .short("Lists the set of peers this node is connected to.")
                .long("Lists every open connection as '<addr>/p2p/<peer>'."),
        )
        .output::<ConnInfos>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|_req, w: &mut dyn Write, out: &ConnInfos| {
                for conn in &out.peers {
                    writeln!(w, "{}/p2p/{}", conn.addr, conn.peer)?;
                }
                Ok(())
            })
            .no_newline(),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            env.require_online()?;

            let mut peers = Vec::new();
            for info in env.swarm().peers().await? {
                for addr in info.addrs {
                    peers.push(ConnInfo {
                        addr,
                        peer: info.id.clone(),
                    });
                }
            }
            emitter.emit_once(ConnInfos { peers }).await
        })
}
