//! `ipfs commands`.
//!
//! Lists the command tree of the running binary.

use std::io::Write;

use ipfs_cmds::executor::DEFAULT_APP_NAME;
use ipfs_cmds::{Command, Encoder, Encoding, HelpText, OptionDef, Status, extras};
use serde::Serialize;

const FLAGS: &str = "flags";

/// Names of one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OptionInfo {
    pub names: Vec<String>,
}

/// A node of the listed command tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandInfo {
    pub name: String,
    pub subcommands: Vec<CommandInfo>,
    pub options: Vec<OptionInfo>,
}

impl CommandInfo {
    /// Describe `cmd` and everything below it. Removed commands are left
    /// out.
    pub fn describe(name: &str, cmd: &Command) -> Self {
        Self {
            name: name.to_string(),
            subcommands: cmd
                .subcommands
                .iter()
                .filter(|(_, sub)| sub.status != Status::Removed)
                .map(|(name, sub)| Self::describe(name, sub))
                .collect(),
            options: cmd
                .options
                .iter()
                .map(|opt| OptionInfo {
                    names: opt.names.iter().map(|n| n.to_string()).collect(),
                })
                .collect(),
        }
    }

    /// One line per command, and per option with `flags`, sorted.
    pub fn lines(&self, flags: bool) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_lines("", flags, &mut out);
        out.sort();
        out
    }

    fn collect_lines(&self, prefix: &str, flags: bool, out: &mut Vec<String>) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix} {}", self.name)
        };
        out.push(path.clone());
        if flags && !prefix.is_empty() {
            for option in &self.options {
                let spellings: Vec<String> = option
                    .names
                    .iter()
                    .map(|n| {
                        let dash = if n.chars().count() == 1 { "-" } else { "--" };
                        format!("{path} {dash}{n}")
                    })
                    .collect();
                out.push(spellings.join(" / "));
            }
        }
        for sub in &self.subcommands {
            sub.collect_lines(&path, flags, out);
        }
    }
}

pub fn command() -> Command {
    Command::new()
        .help(
            HelpText::new("List all available commands.")
                .short("Lists all available commands (and subcommands) and exits.")
                .long(
                    "Prints every command path, one per line. With --flags the options\n\
                     of each command are listed too.",
                ),
        )
        .option(OptionDef::bool(FLAGS, "Show command flags.").alias("f"))
        .extra(extras::DOES_NOT_USE_REPO, true)
        .output::<CommandInfo>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|req, w: &mut dyn Write, info: &CommandInfo| {
                for line in info.lines(req.flag(FLAGS)?) {
                    writeln!(w, "{line}")?;
                }
                Ok(())
            })
            .no_newline(),
        )
        .run_fn(|req, emitter| async move {
            emitter
                .emit_once(CommandInfo::describe(DEFAULT_APP_NAME, req.root()))
                .await
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lines() {
        let root = Command::new()
            .option(OptionDef::bool("help", ""))
            .subcommand(
                "pin",
                Command::new().subcommand(
                    "add",
                    Command::new().option(OptionDef::bool("recursive", "").alias("r")),
                ),
            )
            .subcommand("gone", Command::new().removed("x"));
        let info = CommandInfo::describe("ipfs", &root);
        assert_eq!(info.lines(false), vec!["ipfs", "ipfs pin", "ipfs pin add"]);
        assert_eq!(
            info.lines(true),
            vec![
                "ipfs",
                "ipfs pin",
                "ipfs pin add",
                "ipfs pin add --recursive / ipfs pin add -r",
            ]
        );
    }
}
