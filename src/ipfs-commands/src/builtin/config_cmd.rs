//! `ipfs config`.
//!
//! Every subcommand acquires the repository for the duration of its run.

use std::io::Write;

use ipfs_cmds::{ArgumentDef, CmdError, CmdResult, Command, Encoder, Encoding, HelpText, OptionDef};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::env::NodeEnv;

const JSON: &str = "json";
const BOOL: &str = "bool";

/// A configuration key and its value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigField {
    pub key: String,
    pub value: Value,
}

pub fn command() -> Command {
    Command::new()
        .help(
            HelpText::new("Get and set IPFS config values.")
                .short("Reads or writes a single configuration value.")
                .long(
                    "With only <key>, prints the value at the dotted key. With <value>,\n\
                     sets it. --json parses <value> as JSON and --bool as a boolean.\n\n\
                     ipfs config Addresses.API\n\
                     ipfs config --json Bootstrap '[]'",
                ),
        )
        .argument(ArgumentDef::string("key", true, false, "The key of the config entry (e.g. \"Addresses.API\")."))
        .argument(ArgumentDef::string("value", false, false, "The value to set the config entry to.").binary())
        .option(OptionDef::bool(BOOL, "Set a boolean value."))
        .option(OptionDef::bool(JSON, "Parse stringified JSON."))
        .output::<ConfigField>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|_req, w: &mut dyn Write, field: &ConfigField| {
                match &field.value {
                    Value::String(s) => write!(w, "{s}")?,
                    other => {
                        let pretty = serde_json::to_string_pretty(other)
                            .map_err(|e| CmdError::fatal(format!("failed to render value: {e}")))?;
                        write!(w, "{pretty}")?;
                    }
                }
                Ok(())
            }),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            let args = req.arguments();
            let key = args
                .first()
                .cloned()
                .ok_or_else(|| CmdError::client("argument 'key' is required"))?;

            let repo = env.open_repo()?;
            let value = match args.get(1) {
                Some(raw) => {
                    let value = parse_value(raw, req.flag(JSON)?, req.flag(BOOL)?)?;
                    repo.set_config_value(&key, value.clone())?;
                    value
                }
                None => repo.config_value(&key)?,
            };
            drop(repo);
            emitter.emit_once(ConfigField { key, value }).await
        })
        .subcommand("show", show())
        .subcommand("replace", replace())
}

/// Interpret a raw value as `--json`/`--bool` ask.
pub fn parse_value(raw: &str, json: bool, boolean: bool) -> CmdResult<Value> {
    if json {
        return serde_json::from_str(raw).map_err(|e| CmdError::client(format!("failed to parse json: {e}")));
    }
    if boolean {
        return match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(CmdError::client(format!("'{other}' is not a boolean"))),
        };
    }
    Ok(Value::String(raw.to_string()))
}

fn show() -> Command {
    Command::new()
        .help(
            HelpText::new("Output config file contents.")
                .short("Prints the whole configuration as JSON.")
                .long("Prints the configuration document of the repository."),
        )
        .output::<Value>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|_req, w: &mut dyn Write, config: &Value| {
                let pretty = serde_json::to_string_pretty(config)
                    .map_err(|e| CmdError::fatal(format!("failed to render config: {e}")))?;
                write!(w, "{pretty}")?;
                Ok(())
            }),
        )
        .run_fn(|req, emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            let config = env.open_repo()?.config()?;
            emitter.emit_once(config).await
        })
}

fn replace() -> Command {
    Command::new()
        .help(
            HelpText::new("Replace the config with <file>.")
                .short("Replaces the whole configuration document.")
                .long("Reads a JSON document from <file> (or stdin) and stores it as the configuration."),
        )
        .argument(ArgumentDef::file("file", true, false, "The file to use as the new config.").enable_stdin())
        .run_fn(|req, _emitter| async move {
            let env = NodeEnv::from_request(&req)?;
            let entry = req
                .take_files()
                .next_entry()
                .ok_or_else(|| CmdError::client("argument 'file' is required"))?;
            let mut raw = Vec::new();
            entry.open().await?.read_to_end(&mut raw).await?;
            let config: Value =
                serde_json::from_slice(&raw).map_err(|e| CmdError::client(format!("failed to decode config: {e}")))?;
            if !config.is_object() {
                return Err(CmdError::client("config must be a JSON object"));
            }
            env.open_repo()?.replace_config(&config)?;
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("x", false, false).unwrap(), json!("x"));
        assert_eq!(parse_value("[1,2]", true, false).unwrap(), json!([1, 2]));
        assert_eq!(parse_value("true", false, true).unwrap(), json!(true));
        assert!(parse_value("yes", false, true).is_err());
        assert!(parse_value("{", true, false).is_err());
    }
}
