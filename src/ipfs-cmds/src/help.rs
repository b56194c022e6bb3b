//! Help text rendering.

use std::fmt::Write;

use crate::command::{Command, Status};
use crate::options::OptionDef;

/// Human readable documentation of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpText {
    /// One line summary.
    pub tagline: String,
    /// Paragraph shown by short help.
    pub short_description: String,
    /// Full description shown by long help.
    pub long_description: String,
    /// Usage line override; generated from the descriptors when empty.
    pub synopsis: String,
}

impl HelpText {
    pub fn new(tagline: impl Into<String>) -> Self {
        Self {
            tagline: tagline.into(),
            ..Self::default()
        }
    }

    pub fn short(mut self, text: impl Into<String>) -> Self {
        self.short_description = text.into();
        self
    }

    pub fn long(mut self, text: impl Into<String>) -> Self {
        self.long_description = text.into();
        self
    }

    pub fn synopsis(mut self, text: impl Into<String>) -> Self {
        self.synopsis = text.into();
        self
    }

    /// Names of the fields a runnable command is missing. The synopsis is
    /// generated when absent and is not reported.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.tagline.trim().is_empty() {
            missing.push("tagline");
        }
        if self.short_description.trim().is_empty() {
            missing.push("short description");
        }
        if self.long_description.trim().is_empty() {
            missing.push("long description");
        }
        missing
    }
}

const INDENT: &str = "  ";

fn command_line(app: &str, path: &[String]) -> String {
    std::iter::once(app)
        .chain(path.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn option_flags(opt: &OptionDef) -> String {
    opt.names
        .iter()
        .map(|n| if n.chars().count() == 1 { format!("-{n}") } else { format!("--{n}") })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generated usage line, e.g. `ipfs pin add [--recursive | -r] [--] <ipfs-path>...`.
pub fn generate_synopsis(app: &str, path: &[String], cmd: &Command) -> String {
    let mut line = command_line(app, path);
    for opt in &cmd.options {
        let flag = match opt.short() {
            Some(short) if opt.kind.is_flag() => format!("[--{} | -{short}]", opt.name()),
            _ if opt.kind.is_flag() => format!("[--{}]", opt.name()),
            _ => format!("[--{}=<{}>]", opt.name(), opt.name()),
        };
        line.push(' ');
        line.push_str(&flag);
    }
    if !cmd.arguments.is_empty() {
        line.push_str(" [--]");
        for arg in &cmd.arguments {
            line.push(' ');
            line.push_str(&arg.synopsis());
        }
    }
    line
}

fn usage_section(out: &mut String, app: &str, path: &[String], cmd: &Command) {
    let _ = writeln!(out, "USAGE");
    let _ = write!(out, "{INDENT}{}", command_line(app, path));
    if !cmd.helptext.tagline.is_empty() {
        let _ = write!(out, " - {}", cmd.helptext.tagline);
    }
    out.push('\n');
    match cmd.status {
        Status::Deprecated => out.push_str("\n  DEPRECATED: this command may be removed in a future release.\n"),
        Status::Experimental => out.push_str("\n  EXPERIMENTAL: this command is subject to change.\n"),
        _ => {}
    }
}

fn subcommands_section(out: &mut String, app: &str, path: &[String], cmd: &Command) {
    if cmd.subcommands.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nSUBCOMMANDS");
    let width = cmd.subcommands.keys().map(|k| k.len()).max().unwrap_or(0);
    let prefix = command_line(app, path);
    for (name, sub) in &cmd.subcommands {
        if sub.status == Status::Removed {
            continue;
        }
        let _ = writeln!(
            out,
            "{INDENT}{prefix} {name:<width$} - {}",
            sub.helptext.tagline
        );
    }
    let _ = writeln!(
        out,
        "\n{INDENT}For more information about each command, use:\n{INDENT}'{prefix} <subcmd> --help'"
    );
}

/// Long help, shown for `--help`.
pub fn long_help(app: &str, path: &[String], cmd: &Command) -> String {
    let mut out = String::new();
    usage_section(&mut out, app, path, cmd);

    let synopsis = if cmd.helptext.synopsis.is_empty() {
        generate_synopsis(app, path, cmd)
    } else {
        cmd.helptext.synopsis.clone()
    };
    let _ = writeln!(out, "\nSYNOPSIS\n{INDENT}{synopsis}");

    if !cmd.arguments.is_empty() {
        let _ = writeln!(out, "\nARGUMENTS\n");
        for arg in &cmd.arguments {
            let _ = writeln!(out, "{INDENT}{} - {}", arg.synopsis(), arg.description);
        }
    }

    if !cmd.options.is_empty() {
        let _ = writeln!(out, "\nOPTIONS\n");
        let flags: Vec<String> = cmd.options.iter().map(option_flags).collect();
        let width = flags.iter().map(String::len).max().unwrap_or(0);
        for (opt, flag) in cmd.options.iter().zip(&flags) {
            let _ = write!(out, "{INDENT}{flag:<width$}  {:<8} - {}", opt.kind.name(), opt.description);
            if let Some(default) = &opt.default {
                let _ = write!(out, " Default: {}.", default.render(opt.delimiter));
            }
            out.push('\n');
        }
    }

    let description = if cmd.helptext.long_description.is_empty() {
        &cmd.helptext.short_description
    } else {
        &cmd.helptext.long_description
    };
    if !description.is_empty() {
        let _ = writeln!(out, "\nDESCRIPTION\n");
        for line in description.trim_end().lines() {
            let _ = writeln!(out, "{INDENT}{line}");
        }
    }

    subcommands_section(&mut out, app, path, cmd);
    out
}

/// Short help, shown for `-h` and when a parent is invoked directly.
pub fn short_help(app: &str, path: &[String], cmd: &Command) -> String {
    let mut out = String::new();
    usage_section(&mut out, app, path, cmd);
    if !cmd.helptext.short_description.is_empty() {
        out.push('\n');
        for line in cmd.helptext.short_description.trim_end().lines() {
            let _ = writeln!(out, "{INDENT}{line}");
        }
    }
    subcommands_section(&mut out, app, path, cmd);
    out
}
