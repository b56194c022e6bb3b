//! `ipfs completion bash|fish|zsh`.

use std::io::Cursor;

use ipfs_cmds::completion::{Shell, render};
use ipfs_cmds::executor::DEFAULT_APP_NAME;
use ipfs_cmds::{Command, HelpText, Registry, completions, extras};

pub fn command() -> Command {
    Command::new()
        .help(
            HelpText::new("Generate shell completions.")
                .short("Prints a completion script for the given shell."),
        )
        .subcommand("bash", shell("bash", Shell::Bash))
        .subcommand("fish", shell("fish", Shell::Fish))
        .subcommand("zsh", shell("zsh", Shell::Zsh))
}

fn shell(name: &'static str, target: Shell) -> Command {
    let long = format!(
        "Prints a {name} completion script for the command tree to stdout.\n\
         Source it from the shell's startup file to enable completions."
    );
    Command::new()
        .help(
            HelpText::new(format!("Generate {name} shell completions."))
                .short(format!("Prints a {name} completion script."))
                .long(long),
        )
        .extra(extras::DOES_NOT_USE_REPO, true)
        .no_remote()
        .run_fn(move |req, emitter| async move {
            let registry = Registry::from_arc(req.root().clone());
            let script = render(target, DEFAULT_APP_NAME, &completions(DEFAULT_APP_NAME, &registry));
            emitter.emit_reader(Cursor::new(script.into_bytes())).await
        })
}
