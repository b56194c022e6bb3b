//! Root of the command tree and the global options every command inherits.

use ipfs_cmds::builder::{HELP_LONG, HELP_SHORT};
use ipfs_cmds::executor::TIMEOUT_OPTION;
use ipfs_cmds::{Command, HelpText, OptionDef, Registry, names};

use crate::builtin::{
    add_cmd, cat_cmd, commands_cmd, completion_cmd, config_cmd, pin_cmd, routing_cmd, swarm_cmd, update_cmd,
    version_cmd,
};

pub const CONFIG_OPTION: &str = "config";
pub const DEBUG_OPTION: &str = "debug";
pub const OFFLINE_OPTION: &str = "offline";
pub const API_OPTION: &str = "api";
pub const STREAM_CHANNELS_OPTION: &str = "stream-channels";

/// Commands served by a read-only API.
pub const READ_ONLY_PATHS: &[&[&str]] = &[&["cat"], &["commands"], &["version"]];

const ROOT_SYNOPSIS: &str = "ipfs [--config=<config> | -c] [--debug | -D] [--help] [-h] [--api=<api>] \
     [--offline] [--cid-base=<base>] [--encoding=<encoding> | --enc] [--timeout=<timeout>] <command> ...";

const ROOT_SHORT: &str = "\
BASIC COMMANDS
  add <path>    Add a file to IPFS
  cat <ref>     Show IPFS object data
  pin           Pin objects to local storage

NETWORK COMMANDS
  swarm         Manage connections to the p2p network
  routing       Issue routing commands

TOOL COMMANDS
  config        Manage configuration
  version       Show IPFS version information
  update        Download and apply go-ipfs updates
  commands      List all available commands
  completion    Generate shell completions

Use 'ipfs <command> --help' to learn more about each command.

ipfs uses a repository in the local file system. By default, the repo is
located at ~/.ipfs. To change the repo location, set the $IPFS_PATH
environment variable.";

/// Options declared on the root.
pub fn global_options() -> Vec<OptionDef> {
    vec![
        OptionDef::string(CONFIG_OPTION, "Path to the configuration file to use.").alias("c"),
        OptionDef::bool(DEBUG_OPTION, "Operate in debug mode.").alias("D"),
        OptionDef::bool(HELP_LONG, "Show the full command help text."),
        OptionDef::bool(HELP_SHORT, "Show a short version of the command help text."),
        OptionDef::bool(OFFLINE_OPTION, "Run the command offline."),
        OptionDef::string(API_OPTION, "Use a specific API instance (defaults to 127.0.0.1:5001)."),
        OptionDef::string(names::CID_BASE, "Multibase encoding used for version 1 CIDs in output."),
        OptionDef::string(names::ENCODING, "The encoding type the output should be encoded with (json, text).")
            .alias("enc")
            .with_default("text"),
        OptionDef::bool(STREAM_CHANNELS_OPTION, "Stream channel output."),
        OptionDef::duration(TIMEOUT_OPTION, "Set a global timeout on the command."),
    ]
}

/// The full command tree.
pub fn root() -> Command {
    let mut root = Command::new().help(
        HelpText::new("Global p2p merkle-dag filesystem.")
            .synopsis(ROOT_SYNOPSIS)
            .short(ROOT_SHORT),
    );
    for option in global_options() {
        root = root.option(option);
    }
    root.subcommand("add", add_cmd::command())
        .subcommand("cat", cat_cmd::command())
        .subcommand("commands", commands_cmd::command())
        .subcommand("completion", completion_cmd::command())
        .subcommand("config", config_cmd::command())
        .subcommand("dht", routing_cmd::dht())
        .subcommand("pin", pin_cmd::command())
        .subcommand("routing", routing_cmd::routing())
        .subcommand("swarm", swarm_cmd::command())
        .subcommand("update", update_cmd::command())
        .subcommand("version", version_cmd::command())
}

/// Registry over [`root`].
pub fn registry() -> Registry {
    Registry::new(root())
}

/// Registry exposing only [`READ_ONLY_PATHS`].
pub fn read_only_registry() -> Registry {
    registry().read_only(READ_ONLY_PATHS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_is_well_formed() {
        if let Err(report) = registry().debug_validate() {
            panic!("invalid command tree:\n{report}");
        }
    }

    #[test]
    fn test_read_only_registry() {
        let ro = read_only_registry();
        assert!(ro.get(&["cat"]).is_ok());
        assert!(ro.get(&["version"]).is_ok());
        assert!(ro.get(&["config"]).is_err());
        assert!(ro.get(&["pin", "add"]).is_err());
    }
}
