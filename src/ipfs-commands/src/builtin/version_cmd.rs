//! `ipfs version`.

use std::io::Write;

use ipfs_cmds::{CmdError, Command, Encoder, Encoding, HelpText, OptionDef, extras, names};
use serde::Serialize;

use crate::env::NodeEnv;

const COMMIT: &str = "commit";
const REPO: &str = "repo";
const ALL: &str = "all";

/// Output of `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionOutput {
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub commit: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
}

pub fn command() -> Command {
    Command::new()
        .help(
            HelpText::new("Show IPFS version information.")
                .short("Returns the current version of IPFS and exits.")
                .long(
                    "Returns the version number of IPFS. With --all the commit, the\n\
                     repository format version and the system are printed too.",
                ),
        )
        .option(OptionDef::bool(names::NUMERIC, "Only show the version number.").alias("n"))
        .option(OptionDef::bool(COMMIT, "Show the commit hash."))
        .option(OptionDef::bool(REPO, "Show repo version."))
        .option(OptionDef::bool(ALL, "Show all version information."))
        .extra(extras::DOES_NOT_USE_REPO, true)
        .output::<VersionOutput>()
        .encoder(Encoding::Text, Encoder::typed(encode_text))
        .run_fn(|req, emitter| async move {
            let info = NodeEnv::from_request(&req)?.version().clone();
            emitter
                .emit_once(VersionOutput {
                    version: info.version,
                    commit: info.commit,
                    repo: info.repo,
                    system: info.system,
                })
                .await
        })
}

fn encode_text(req: &ipfs_cmds::Request, w: &mut dyn Write, v: &VersionOutput) -> Result<(), CmdError> {
    let commit = if !v.commit.is_empty() && req.flag(COMMIT)? {
        format!("-{}", v.commit)
    } else {
        String::new()
    };

    if req.flag(ALL)? {
        write!(
            w,
            "ipfs version: {}{}\nRepo version: {}\nSystem version: {}",
            v.version, commit, v.repo, v.system
        )?;
    } else if req.flag(REPO)? {
        write!(w, "{}", v.repo)?;
    } else if req.flag(names::NUMERIC)? {
        write!(w, "{}{}", v.version, commit)?;
    } else {
        write!(w, "ipfs version {}{}", v.version, commit)?;
    }
    Ok(())
}
