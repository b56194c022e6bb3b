//! `ipfs update`, forwarded to the `ipfs-update` executable.

use ipfs_cmds::{Command, HelpText, extras};

/// Shown by `ipfs update --help` when `ipfs-update` is not installed.
pub const INSTALL_INSTRUCTIONS: &str = "Please see https://git.io/fjylH for installation instructions.";

pub fn command() -> Command {
    Command::external(
        HelpText::new("Download and apply go-ipfs updates.")
            .short("Runs the ipfs-update executable with the given arguments.")
            .long(
                "'ipfs update' is a proxy for the ipfs-update tool. Arguments are\n\
                 passed through unchanged and its output is streamed back.",
            ),
        INSTALL_INSTRUCTIONS,
    )
    .extra(extras::DOES_NOT_USE_REPO, true)
}
