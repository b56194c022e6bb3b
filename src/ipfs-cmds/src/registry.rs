//! Command registry.
//!
//! Holds the immutable command tree and answers path lookups, pre-order
//! walks and self-validation.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::command::Command;
use crate::error::RequestError;
use crate::options::OptionDef;

/// Read-only view of a command tree.
#[derive(Debug, Clone)]
pub struct Registry {
    root: Arc<Command>,
}

/// One problem found by [`Registry::debug_validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Space joined command path (empty for the root).
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "<root>: {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// All problems found in a command tree.
#[derive(Debug, Clone, Error)]
#[error("command tree has {} problem(s):\n{}", .issues.len(), render_issues(.issues))]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Registry {
    pub fn new(root: Command) -> Self {
        Self { root: Arc::new(root) }
    }

    pub fn from_arc(root: Arc<Command>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Arc<Command> {
        &self.root
    }

    /// Resolve `path` to the chain of commands from the root to the target.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> Result<Vec<Arc<Command>>, RequestError> {
        let mut chain = Vec::with_capacity(path.len() + 1);
        chain.push(self.root.clone());
        let mut current = self.root.clone();
        for (depth, token) in path.iter().enumerate() {
            let token = token.as_ref();
            let next = current
                .child(token)
                .cloned()
                .ok_or_else(|| RequestError::UnknownCommand {
                    token: token.to_string(),
                    path: path[..depth].iter().map(|s| s.as_ref().to_string()).collect(),
                })?;
            chain.push(next.clone());
            current = next;
        }
        Ok(chain)
    }

    /// Look up the command at `path`.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Result<Arc<Command>, RequestError> {
        let chain = self.resolve(path)?;
        Ok(chain.last().cloned().unwrap_or_else(|| self.root.clone()))
    }

    /// Options visible to the command at `path`: its own first, then those
    /// inherited from each ancestor up to the root.
    pub fn options_for<S: AsRef<str>>(&self, path: &[S]) -> Result<Vec<OptionDef>, RequestError> {
        let chain = self.resolve(path)?;
        Ok(merge_options(&chain))
    }

    /// All `(path, command)` pairs in pre-order, children visited in
    /// lexicographic order. The root comes first with an empty path.
    pub fn walk(&self) -> Vec<(Vec<String>, Arc<Command>)> {
        let mut out = Vec::new();
        let mut ancestors = HashSet::new();
        walk_into(&self.root, &mut Vec::new(), &mut ancestors, &mut out);
        out
    }

    /// A registry exposing only the commands at `allowed` paths (and
    /// everything beneath them). Ancestors of allowed commands are kept as
    /// non-runnable containers.
    pub fn read_only(&self, allowed: &[&[&str]]) -> Registry {
        let allowed: HashSet<Vec<String>> = allowed
            .iter()
            .map(|p| p.iter().map(|s| s.to_string()).collect())
            .collect();
        let root = prune(&self.root, &mut Vec::new(), &allowed).unwrap_or_else(|| {
            let mut empty = (*self.root).clone();
            empty.subcommands.clear();
            empty.run = None;
            Arc::new(empty)
        });
        Registry { root }
    }

    /// Check the structural invariants of the tree.
    pub fn debug_validate(&self) -> Result<(), ValidationReport> {
        let mut issues = Vec::new();
        let mut ancestors = HashSet::new();
        let mut chain = Vec::new();
        validate_into(&self.root, &mut Vec::new(), &mut chain, &mut ancestors, &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationReport { issues })
        }
    }
}

fn merge_options(chain: &[Arc<Command>]) -> Vec<OptionDef> {
    chain
        .iter()
        .rev()
        .flat_map(|cmd| cmd.options.iter().cloned())
        .collect()
}

fn walk_into(
    cmd: &Arc<Command>,
    path: &mut Vec<String>,
    ancestors: &mut HashSet<*const Command>,
    out: &mut Vec<(Vec<String>, Arc<Command>)>,
) {
    let id = Arc::as_ptr(cmd);
    if !ancestors.insert(id) {
        return;
    }
    out.push((path.clone(), cmd.clone()));
    for (name, sub) in &cmd.subcommands {
        path.push(name.clone());
        walk_into(sub, path, ancestors, out);
        path.pop();
    }
    ancestors.remove(&id);
}

fn prune(cmd: &Arc<Command>, path: &mut Vec<String>, allowed: &HashSet<Vec<String>>) -> Option<Arc<Command>> {
    if allowed.contains(&*path) {
        return Some(cmd.clone());
    }
    let mut children = std::collections::BTreeMap::new();
    for (name, sub) in &cmd.subcommands {
        path.push(name.clone());
        if let Some(kept) = prune(sub, path, allowed) {
            children.insert(name.clone(), kept);
        }
        path.pop();
    }
    if children.is_empty() && !path.is_empty() {
        return None;
    }
    let mut container = (**cmd).clone();
    container.run = None;
    container.post_run.clear();
    container.external = false;
    container.subcommands = children;
    Some(Arc::new(container))
}

fn validate_into(
    cmd: &Arc<Command>,
    path: &mut Vec<String>,
    chain: &mut Vec<Arc<Command>>,
    ancestors: &mut HashSet<*const Command>,
    issues: &mut Vec<ValidationIssue>,
) {
    let id = Arc::as_ptr(cmd);
    let here = path.join(" ");
    let mut issue = |message: String| {
        issues.push(ValidationIssue {
            path: here.clone(),
            message,
        })
    };

    if !ancestors.insert(id) {
        issue("command tree contains a cycle".to_string());
        return;
    }
    chain.push(cmd.clone());

    if cmd.is_runnable() && cmd.status != crate::command::Status::Removed {
        for field in cmd.helptext.missing_fields() {
            issue(format!("runnable command has no {field}"));
        }
    }

    for name in &cmd.duplicate_subcommands {
        issue(format!("subcommand '{name}' registered more than once"));
    }

    let last = cmd.arguments.len().saturating_sub(1);
    let mut seen_optional = false;
    for (i, arg) in cmd.arguments.iter().enumerate() {
        if arg.variadic && i != last {
            issue(format!("variadic argument '{}' is not the last argument", arg.name));
        }
        if arg.required && seen_optional {
            issue(format!("required argument '{}' follows an optional one", arg.name));
        }
        seen_optional |= !arg.required;
    }

    for (encoding, encoder) in &cmd.encoders {
        if let Some(value_type) = encoder.value_type()
            && cmd.output_type != Some(value_type)
        {
            issue(format!(
                "{encoding} encoder takes {} but the command emits {}",
                value_type.name(),
                cmd.output_type.map(|t| t.name()).unwrap_or("nothing")
            ));
        }
    }

    let mut names: HashSet<&str> = HashSet::new();
    for opt in chain.iter().flat_map(|c| c.options.iter()) {
        for name in &opt.names {
            if !names.insert(*name) {
                issue(format!("option name '{name}' is declared twice along the path"));
            }
        }
    }

    for (name, sub) in &cmd.subcommands {
        path.push(name.clone());
        validate_into(sub, path, chain, ancestors, issues);
        path.pop();
    }

    chain.pop();
    ancestors.remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::ArgumentDef;
    use crate::encoding::{Encoder, Encoding};
    use crate::help::HelpText;
    use pretty_assertions::assert_eq;

    fn documented(tagline: &str) -> HelpText {
        HelpText::new(tagline).short("short").long("long")
    }

    fn leaf(tagline: &str) -> Command {
        Command::new()
            .help(documented(tagline))
            .run_fn(|_req, _em| async { Ok(()) })
    }

    fn tree() -> Registry {
        Registry::new(
            Command::new()
                .option(OptionDef::string("encoding", "").alias("enc"))
                .subcommand("version", leaf("Show version."))
                .subcommand(
                    "pin",
                    Command::new()
                        .help(HelpText::new("Pin objects."))
                        .subcommand("rm", leaf("Remove pins."))
                        .subcommand("add", leaf("Add pins.").option(OptionDef::bool("recursive", "").alias("r")))
                        .subcommand("ls", leaf("List pins.")),
                ),
        )
    }

    fn paths(registry: &Registry) -> Vec<String> {
        registry.walk().into_iter().map(|(p, _)| p.join(" ")).collect()
    }

    #[test]
    fn test_walk_is_lexicographic_preorder() {
        assert_eq!(
            paths(&tree()),
            vec!["", "pin", "pin add", "pin ls", "pin rm", "version"]
        );
    }

    #[test]
    fn test_get_matches_walk() {
        let registry = tree();
        for (path, cmd) in registry.walk() {
            let found = registry.get(&path).unwrap();
            assert!(Arc::ptr_eq(&found, &cmd), "mismatch at {path:?}");
        }
    }

    #[test]
    fn test_get_unknown_is_client_error() {
        let err = tree().get(&["pin", "nosuch"]).unwrap_err();
        match err {
            RequestError::UnknownCommand { token, path } => {
                assert_eq!(token, "nosuch");
                assert_eq!(path, vec!["pin".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_options_for_merges_path() {
        let opts = tree().options_for(&["pin", "add"]).unwrap();
        let names: Vec<_> = opts.iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["recursive", "encoding"]);
    }

    #[test]
    fn test_valid_tree_passes() {
        tree().debug_validate().unwrap();
    }

    #[test]
    fn test_validation_findings() {
        #[derive(Debug, serde::Serialize)]
        struct A;
        #[derive(Debug, serde::Serialize)]
        struct B;

        let bad = Command::new()
            .option(OptionDef::bool("force", "").alias("f"))
            .subcommand(
                "undocumented",
                Command::new().run_fn(|_req, _em| async { Ok(()) }),
            )
            .subcommand(
                "args",
                leaf("Args.")
                    .argument(ArgumentDef::string("many", true, true, ""))
                    .argument(ArgumentDef::string("one", true, false, "")),
            )
            .subcommand(
                "typed",
                leaf("Typed.")
                    .output::<A>()
                    .encoder(Encoding::Text, Encoder::typed::<B, _>(|_, _, _| Ok(()))),
            )
            .subcommand("dup", leaf("Dup."))
            .subcommand("dup", leaf("Dup again."))
            .subcommand("shadow", leaf("Shadow.").option(OptionDef::bool("follow", "").alias("f")));

        let report = Registry::new(bad).debug_validate().unwrap_err();
        let rendered: Vec<String> = report.issues.iter().map(|i| i.to_string()).collect();
        assert!(rendered.iter().any(|i| i.starts_with("undocumented: runnable command has no short description")));
        assert!(rendered.iter().any(|i| i.contains("variadic argument 'many'")));
        assert!(rendered.iter().any(|i| i.starts_with("typed: text encoder takes")));
        assert!(rendered.iter().any(|i| i.contains("subcommand 'dup' registered more than once")));
        assert!(rendered.iter().any(|i| i.starts_with("shadow: option name 'f'")));
    }

    #[test]
    fn test_shared_node_is_not_a_cycle() {
        let shared = Arc::new(leaf("Shared."));
        let registry = Registry::new(
            Command::new()
                .subcommand_arc("a", shared.clone())
                .subcommand_arc("b", shared),
        );
        registry.debug_validate().unwrap();
        assert_eq!(paths(&registry), vec!["", "a", "b"]);
    }

    #[test]
    fn test_read_only_prunes_tree() {
        let ro = tree().read_only(&[&["pin", "ls"], &["version"]]);
        assert_eq!(paths(&ro), vec!["", "pin", "pin ls", "version"]);
        assert!(!ro.get(&["pin"]).unwrap().is_runnable());
        assert!(ro.get(&["pin", "add"]).is_err());
    }
}
