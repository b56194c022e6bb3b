//! Shell completion.
//!
//! [`completions`] flattens the registry into a deterministic list of
//! [`CompletionCommand`] records; [`render`] mirrors that list as a clap
//! command tree and hands it to `clap_complete`.

use std::cmp::Ordering;

use clap::{Arg, ArgAction, ValueHint};
pub use clap_complete::Shell;
use clap_complete::generate;
use serde::Serialize;

use crate::command::{Command, Status};
use crate::registry::Registry;

/// Completion data for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionCommand {
    /// Last path component, or the application name for the root.
    pub name: String,
    /// Space separated path including the application name.
    pub full_name: String,
    pub description: String,
    pub subcommands: Vec<String>,
    pub short_flags: Vec<String>,
    pub long_flags: Vec<String>,
    pub short_options: Vec<String>,
    pub long_options: Vec<String>,
    /// Whether the command accepts no further subcommand.
    pub is_final: bool,
}

/// Orders case-insensitively; on ties lowercase sorts first.
pub fn completion_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort_by(|a, b| completion_order(a, b));
    names.dedup();
    names
}

fn entry(app: &str, path: &[String], cmd: &Command) -> CompletionCommand {
    let mut out = CompletionCommand {
        name: path.last().cloned().unwrap_or_else(|| app.to_string()),
        full_name: std::iter::once(app)
            .chain(path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        description: cmd.helptext.tagline.clone(),
        ..CompletionCommand::default()
    };

    for opt in &cmd.options {
        for name in &opt.names {
            let short = name.chars().count() == 1;
            let bucket = match (opt.kind.is_flag(), short) {
                (true, true) => &mut out.short_flags,
                (true, false) => &mut out.long_flags,
                (false, true) => &mut out.short_options,
                (false, false) => &mut out.long_options,
            };
            bucket.push((*name).to_string());
        }
    }
    out.short_flags = sorted(out.short_flags);
    out.long_flags = sorted(out.long_flags);
    out.short_options = sorted(out.short_options);
    out.long_options = sorted(out.long_options);
    out.subcommands = sorted(
        cmd.subcommands
            .iter()
            .filter(|(_, sub)| sub.status != Status::Removed)
            .map(|(name, _)| name.clone())
            .collect(),
    );
    out.is_final = out.subcommands.is_empty();
    out
}

/// Completion records for every non-removed command, in pre-order with
/// siblings in completion order.
pub fn completions(app: &str, registry: &Registry) -> Vec<CompletionCommand> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    visit(app, registry.root(), &mut path, &mut out);
    out
}

fn visit(app: &str, cmd: &Command, path: &mut Vec<String>, out: &mut Vec<CompletionCommand>) {
    let record = entry(app, path, cmd);
    let children = record.subcommands.clone();
    out.push(record);
    for name in children {
        if let Some(sub) = cmd.child(&name) {
            path.push(name);
            visit(app, sub, path, out);
            path.pop();
        }
    }
}

/// Clap command tree mirroring `commands`, rooted at `app`.
///
/// Built at runtime so the scripts come from `clap_complete`. Automatic
/// help and version flags are off; the registry declares its own.
pub fn clap_command(app: &str, commands: &[CompletionCommand]) -> clap::Command {
    match commands.first() {
        Some(root) => clap_node(app.to_string(), root, commands),
        None => bare(clap::Command::new(app.to_string())),
    }
}

fn bare(cmd: clap::Command) -> clap::Command {
    cmd.disable_help_flag(true)
        .disable_version_flag(true)
        .disable_help_subcommand(true)
}

fn clap_node(name: String, record: &CompletionCommand, commands: &[CompletionCommand]) -> clap::Command {
    let mut cmd = bare(clap::Command::new(name)).about(record.description.clone());

    for flag in &record.long_flags {
        cmd = cmd.arg(Arg::new(format!("--{flag}")).long(flag.clone()).action(ArgAction::SetTrue));
    }
    for opt in &record.long_options {
        cmd = cmd.arg(Arg::new(format!("--{opt}")).long(opt.clone()).action(ArgAction::Set));
    }
    for flag in record.short_flags.iter().filter_map(|f| f.chars().next()) {
        cmd = cmd.arg(Arg::new(format!("-{flag}")).short(flag).action(ArgAction::SetTrue));
    }
    for opt in record.short_options.iter().filter_map(|o| o.chars().next()) {
        cmd = cmd.arg(Arg::new(format!("-{opt}")).short(opt).action(ArgAction::Set));
    }

    if record.is_final {
        return cmd.arg(
            Arg::new("arguments")
                .num_args(0..)
                .value_hint(ValueHint::AnyPath),
        );
    }
    for sub in &record.subcommands {
        let full_name = format!("{} {sub}", record.full_name);
        if let Some(child) = commands.iter().find(|c| c.full_name == full_name) {
            cmd = cmd.subcommand(clap_node(sub.clone(), child, commands));
        }
    }
    cmd
}

/// Completion script for `shell`.
pub fn render(shell: Shell, app: &str, commands: &[CompletionCommand]) -> String {
    let mut cmd = clap_command(app, commands);
    let mut buffer = Vec::new();
    generate(shell, &mut cmd, app, &mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::help::HelpText;
    use crate::options::OptionDef;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        let pin = Command::new()
            .help(HelpText::new("Pin objects."))
            .subcommand("ls", Command::new().help(HelpText::new("List pins.")))
            .subcommand(
                "add",
                Command::new()
                    .help(HelpText::new("Pin objects to local storage."))
                    .option(OptionDef::bool("recursive", "").alias("r"))
                    .option(OptionDef::string("name", "")),
            );
        Registry::new(
            Command::new()
                .option(OptionDef::bool("debug", "").alias("D"))
                .option(OptionDef::string("encoding", "").alias("enc"))
                .subcommand("pin", pin)
                .subcommand("Zed", Command::new())
                .subcommand("add", Command::new())
                .subcommand("dht", Command::new().removed("gone")),
        )
    }

    #[test]
    fn test_completion_order() {
        let mut names = vec!["b", "A", "a", "B", "c"];
        names.sort_by(|a, b| completion_order(a, b));
        assert_eq!(names, vec!["a", "A", "b", "B", "c"]);
    }

    #[test]
    fn test_completions_pre_order() {
        let all = completions("ipfs", &registry());
        let names: Vec<&str> = all.iter().map(|c| c.full_name.as_str()).collect();
        assert_eq!(names, vec!["ipfs", "ipfs add", "ipfs pin", "ipfs pin add", "ipfs pin ls", "ipfs Zed"]);

        let root = &all[0];
        assert_eq!(root.subcommands, vec!["add", "pin", "Zed"]);
        assert_eq!(root.short_flags, vec!["D"]);
        assert_eq!(root.long_flags, vec!["debug"]);
        assert_eq!(root.long_options, vec!["enc", "encoding"]);
        assert!(!root.is_final);

        let pin_add = &all[3];
        assert_eq!(pin_add.name, "add");
        assert_eq!(pin_add.short_flags, vec!["r"]);
        assert_eq!(pin_add.long_options, vec!["name"]);
        assert!(pin_add.is_final);
    }

    #[test]
    fn test_completions_deterministic() {
        let reg = registry();
        assert_eq!(completions("ipfs", &reg), completions("ipfs", &reg));
    }

    #[test]
    fn test_clap_command_mirrors_records() {
        let all = completions("ipfs", &registry());
        let cmd = clap_command("ipfs", &all);
        let subs: Vec<&str> = cmd.get_subcommands().map(|c| c.get_name()).collect();
        assert_eq!(subs, vec!["add", "pin", "Zed"]);

        let pin_add = cmd
            .find_subcommand("pin")
            .and_then(|pin| pin.find_subcommand("add"))
            .unwrap();
        assert!(pin_add.get_arguments().any(|a| a.get_long() == Some("recursive")));
        assert!(pin_add.get_arguments().any(|a| a.get_short() == Some('r')));
        assert!(pin_add.get_arguments().any(|a| a.get_long() == Some("name")));
        assert!(cmd.get_arguments().any(|a| a.get_short() == Some('D')));
    }

    #[test]
    fn test_render_scripts() {
        let all = completions("ipfs", &registry());
        let bash = render(Shell::Bash, "ipfs", &all);
        assert!(bash.contains("_ipfs()"));
        assert!(bash.contains("--recursive"));

        let zsh = render(Shell::Zsh, "ipfs", &all);
        assert!(zsh.starts_with("#compdef ipfs"));
        assert!(zsh.contains("--recursive"));

        let fish = render(Shell::Fish, "ipfs", &all);
        assert!(fish.contains("complete -c ipfs"));
        assert!(fish.contains("Pin objects."));
        assert_eq!(render(Shell::Bash, "ipfs", &all), bash);
    }
}
