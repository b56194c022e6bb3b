//! End-to-end behavior of the command framework: registry, builder,
//! executor, emitter and encoders working together.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ipfs_cmds::{
    ArgumentDef, CancelCause, CmdError, Command, Encoder, Encoding, ErrorKind, ExecContext, Executor, HelpText,
    Invocation, OptionDef, OptionKind, OptionValue, Payload, Registry, RequestBuilder, RequestContext,
    RequestError,
};
use pretty_assertions::assert_eq;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct Count {
    n: u32,
}

fn help(tagline: &str) -> HelpText {
    HelpText::new(tagline).short("Short.").long("Long.")
}

fn counter(limit: u32) -> Command {
    Command::new()
        .help(help("Count upwards."))
        .output::<Count>()
        .encoder(
            Encoding::Text,
            Encoder::typed(|_req, w: &mut dyn Write, c: &Count| {
                write!(w, "{}", c.n).map_err(CmdError::from)
            }),
        )
        .run_fn(move |_req, emitter| async move {
            for n in 0..limit {
                emitter.emit(Count { n }).await?;
            }
            Ok(())
        })
}

fn registry() -> Registry {
    let once = Command::new()
        .help(help("Emit one value."))
        .output::<Count>()
        .run_fn(|_req, emitter| async move { emitter.emit_once(Count { n: 7 }).await });

    let pin = Command::new()
        .help(help("Pin objects."))
        .subcommand(
            "add",
            Command::new()
                .help(help("Pin objects to local storage."))
                .argument(ArgumentDef::string("ipfs-path", true, true, "Path to object(s).").enable_stdin())
                .option(OptionDef::bool("recursive", "Recursively pin.").alias("r").with_default(true))
                .output::<String>()
                .run_fn(|req, emitter| async move {
                    for arg in req.all_arguments().await? {
                        emitter.emit(arg).await?;
                    }
                    Ok(())
                }),
        )
        .subcommand("ls", Command::new().help(help("List pins.")).run_fn(|_r, _e| async { Ok(()) }));

    let root = Command::new()
        .option(OptionDef::string("encoding", "Output encoding.").alias("enc").with_default("text"))
        .option(OptionDef::duration("timeout", "Request timeout."))
        .subcommand("count", counter(5))
        .subcommand("once", once)
        .subcommand("pin", pin)
        .subcommand(
            "bind",
            Command::new()
                .help(help("Bind arguments."))
                .argument(ArgumentDef::string("a1", true, false, "First."))
                .argument(ArgumentDef::string("a2", false, true, "Rest."))
                .run_fn(|_r, _e| async { Ok(()) }),
        );
    Registry::new(root)
}

fn build(tokens: &[&str]) -> Result<ipfs_cmds::Request, RequestError> {
    RequestBuilder::new(registry()).build(Invocation::cli(tokens.iter().copied()))
}

#[test]
fn test_registry_well_formed() {
    let reg = registry();
    reg.debug_validate().unwrap();

    for (path, cmd) in reg.walk() {
        let names: HashSet<&String> = cmd.subcommands.keys().collect();
        assert_eq!(names.len(), cmd.subcommands.len());
        if let Some(pos) = cmd.arguments.iter().position(|a| a.variadic) {
            assert_eq!(pos, cmd.arguments.len() - 1, "{path:?}");
        }
        for encoder in cmd.encoders.values() {
            if let Some(ty) = encoder.value_type() {
                assert_eq!(Some(ty), cmd.output_type, "{path:?}");
            }
        }
        if cmd.run.is_some() {
            assert!(cmd.helptext.missing_fields().is_empty(), "{path:?}");
        }
    }
}

#[test]
fn test_registry_validation_catches_mismatched_encoder() {
    let bad = Command::new().subcommand(
        "bad",
        Command::new()
            .help(help("Bad."))
            .output::<String>()
            .encoder(Encoding::Text, Encoder::typed(|_r, _w: &mut dyn Write, _c: &Count| Ok(())))
            .run_fn(|_r, _e| async { Ok(()) }),
    );
    let report = Registry::new(bad).debug_validate().unwrap_err();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].path, "bad");
}

#[test]
fn test_dispatch_totality() {
    let reg = registry();
    for (path, cmd) in reg.walk() {
        let found = reg.get(&path).unwrap();
        assert!(Arc::ptr_eq(&found, &cmd), "{path:?}");
    }
    for missing in [vec!["nope"], vec!["pin", "nope"], vec!["count", "x"]] {
        let err = reg.get(&missing).unwrap_err();
        assert_eq!(err.error_code(), "unknown_command");
    }
}

#[test]
fn test_option_round_trip() {
    let cases = [
        (OptionDef::bool("b", ""), vec![OptionValue::Bool(true), OptionValue::Bool(false)]),
        (OptionDef::string("s", ""), vec![OptionValue::from("hello world"), OptionValue::from("")]),
        (OptionDef::int("i", ""), vec![OptionValue::Int(-42), OptionValue::Int(i32::MAX)]),
        (OptionDef::int64("l", ""), vec![OptionValue::Int64(i64::MIN), OptionValue::Int64(9)]),
        (OptionDef::uint("u", ""), vec![OptionValue::Uint(0), OptionValue::Uint(u64::MAX)]),
        (
            OptionDef::strings("a", ""),
            vec![OptionValue::Strings(vec!["x".into(), "y".into()]), OptionValue::Strings(vec![])],
        ),
    ];
    for (def, values) in cases {
        assert_ne!(def.kind, OptionKind::Duration);
        for value in values {
            let rendered = value.render(def.delimiter);
            assert_eq!(def.parse(&rendered).unwrap(), value, "{} {rendered:?}", def.name());
        }
    }
}

#[test]
fn test_argument_binding() {
    let req = build(&["bind", "t1", "t2", "t3"]).unwrap();
    assert_eq!(req.arguments(), &["t1", "t2", "t3"].map(String::from));

    let req = build(&["bind", "t1"]).unwrap();
    assert_eq!(req.arguments(), &["t1".to_string()]);

    let err = build(&["bind"]).unwrap_err();
    assert_eq!(err, RequestError::MissingArgument("a1".to_string()));

    // a1 has no stdin fallback, so a body does not satisfy it.
    let inv = Invocation::cli(["bind"]).body(Box::pin(&b"t2\nt3\n"[..]));
    let err = RequestBuilder::new(registry()).build(inv).unwrap_err();
    assert_eq!(err, RequestError::MissingArgument("a1".to_string()));
}

#[tokio::test]
async fn test_emitter_ordering() {
    let req = build(&["count"]).unwrap();
    let response = Executor::new(ExecContext::Server).execute(req).await;
    let values = response.receiver.collect_values::<Count>().await.unwrap();
    assert_eq!(values, (0..5).map(|n| Count { n }).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_emit_once_into_drained_receiver() {
    let req = build(&["once"]).unwrap();
    let mut response = Executor::new(ExecContext::Cli).execute(req).await;

    let first = response.receiver.next().await.unwrap().unwrap();
    assert_eq!(first.value_ref::<Count>(), Some(&Count { n: 7 }));
    assert!(response.receiver.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancellation_unblocks_and_stops_values() {
    let emitted = Arc::new(AtomicUsize::new(0));
    let counter = emitted.clone();
    let root = Command::new().subcommand(
        "forever",
        Command::new()
            .help(help("Emit forever."))
            .output::<Count>()
            .run_fn(move |_req, emitter| {
                let counter = counter.clone();
                async move {
                    let mut n = 0;
                    loop {
                        emitter.emit(Count { n }).await?;
                        counter.fetch_add(1, Ordering::SeqCst);
                        n += 1;
                    }
                }
            }),
    );
    let ctx = RequestContext::new();
    let req = RequestBuilder::new(Registry::new(root))
        .build(Invocation::cli(["forever"]).context(ctx.clone()))
        .unwrap();
    let mut response = Executor::new(ExecContext::Cli).execute(req).await;

    assert!(response.receiver.next().await.unwrap().is_some());
    ctx.cancel_with(CancelCause::Interrupt);

    let err = response.receiver.next().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.exit_code(), 130);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let settled = emitted.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(emitted.load(Ordering::SeqCst), settled);
    assert!(response.receiver.next().await.is_err());
}

#[tokio::test]
async fn test_timeout_option_cancels_run() {
    let root = Command::new()
        .option(OptionDef::duration("timeout", ""))
        .subcommand(
            "slow",
            Command::new()
                .help(help("Sleep."))
                .output::<Count>()
                .run_fn(|req, emitter| async move {
                    req.context().cancelled().await;
                    emitter.emit(Count { n: 0 }).await
                }),
        );
    let req = RequestBuilder::new(Registry::new(root))
        .build(Invocation::cli(["slow", "--timeout=10ms"]))
        .unwrap();
    let mut response = Executor::new(ExecContext::Cli).execute(req).await;
    let err = response.receiver.next().await.unwrap_err();
    assert_eq!(err, CmdError::Cancelled(CancelCause::Timeout));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_text_and_json_encoding() {
    let req = build(&["count"]).unwrap();
    let mut out = Vec::new();
    Executor::new(ExecContext::Cli).execute(req).await.encode_to(&mut out).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "0\n1\n2\n3\n4\n");

    let req = build(&["count", "--enc=json"]).unwrap();
    let mut out = Vec::new();
    Executor::new(ExecContext::Cli).execute(req).await.encode_to(&mut out).await.unwrap();
    let lines: Vec<&str> = std::str::from_utf8(&out).unwrap().lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], r#"{"N":0}"#);
}

#[tokio::test]
async fn test_stdin_lines_feed_run() {
    let inv = Invocation::cli(["pin", "add"]).body(Box::pin(&b"Qm1\nQm2\n"[..]));
    let req = RequestBuilder::new(registry()).build(inv).unwrap();
    let response = Executor::new(ExecContext::Cli).execute(req).await;
    let values = response.receiver.collect_values::<String>().await.unwrap();
    assert_eq!(values, vec!["Qm1", "Qm2"]);
}

#[tokio::test]
async fn test_not_callable_parent() {
    let inv = Invocation::path(["pin"], Vec::new());
    let req = RequestBuilder::new(registry()).build(inv).unwrap();
    let mut response = Executor::new(ExecContext::Cli).execute(req).await;
    let err = response.receiver.next().await.unwrap_err();
    assert_eq!(err, CmdError::Request(RequestError::NotCallable));
    assert_eq!(err.kind(), ErrorKind::Client);
}

#[tokio::test]
async fn test_panicking_run_is_fatal() {
    let root = Command::new().subcommand(
        "boom",
        Command::new()
            .help(help("Panic."))
            .run_fn(|_req, _emitter| async move { panic!("kaboom") }),
    );
    let req = RequestBuilder::new(Registry::new(root))
        .build(Invocation::cli(["boom"]))
        .unwrap();
    let mut response = Executor::new(ExecContext::Cli).execute(req).await;
    let err = response.receiver.next().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("kaboom"));
}

#[tokio::test]
async fn test_post_run_only_on_cli() {
    let root = Command::new().subcommand(
        "doubled",
        counter(3).post_run_fn(ExecContext::Cli, |_req, mut input, output| async move {
            while let Some(payload) = input.next().await? {
                if let Ok(count) = payload.into_value::<Count>() {
                    output.emit(Count { n: count.n * 2 }).await?;
                }
            }
            Ok(())
        }),
    );
    let reg = Registry::new(root);

    let req = RequestBuilder::new(reg.clone()).build(Invocation::cli(["doubled"])).unwrap();
    let values = Executor::new(ExecContext::Cli)
        .execute(req)
        .await
        .receiver
        .collect_values::<Count>()
        .await
        .unwrap();
    assert_eq!(values, vec![Count { n: 0 }, Count { n: 2 }, Count { n: 4 }]);

    let req = RequestBuilder::new(reg).build(Invocation::cli(["doubled"])).unwrap();
    let values = Executor::new(ExecContext::Server)
        .execute(req)
        .await
        .receiver
        .collect_values::<Count>()
        .await
        .unwrap();
    assert_eq!(values, vec![Count { n: 0 }, Count { n: 1 }, Count { n: 2 }]);
}

#[tokio::test]
async fn test_pre_run_error_short_circuits() {
    let ran = Arc::new(AtomicUsize::new(0));
    let seen = ran.clone();
    let root = Command::new().subcommand(
        "guarded",
        Command::new()
            .help(help("Guarded."))
            .pre_run(|_req| Err(CmdError::client("not allowed")))
            .run_fn(move |_req, _emitter| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
    );
    let req = RequestBuilder::new(Registry::new(root))
        .build(Invocation::cli(["guarded"]))
        .unwrap();
    let mut response = Executor::new(ExecContext::Cli).execute(req).await;
    let err = response.receiver.next().await.unwrap_err();
    assert_eq!(err.to_string(), "not allowed");
    tokio::task::yield_now().await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_context_mismatch() {
    let root = Command::new()
        .subcommand("daemon-only", Command::new().help(help("D.")).no_local().run_fn(|_r, _e| async { Ok(()) }))
        .subcommand("local-only", Command::new().help(help("L.")).no_remote().run_fn(|_r, _e| async { Ok(()) }));
    let reg = Registry::new(root);

    let req = RequestBuilder::new(reg.clone()).build(Invocation::cli(["daemon-only"])).unwrap();
    let err = Executor::new(ExecContext::Cli).execute(req).await.receiver.collect().await.unwrap_err();
    assert_eq!(err.error_code(), "context_mismatch");

    let req = RequestBuilder::new(reg).build(Invocation::cli(["local-only"])).unwrap();
    let err = Executor::new(ExecContext::Server).execute(req).await.receiver.collect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
}

fn external_registry() -> Registry {
    Registry::new(Command::new().subcommand(
        "hello",
        Command::external(help("Say hello."), "Install ipfs-hello from the releases page."),
    ))
}

#[tokio::test]
async fn test_external_missing_with_help() {
    let dir = tempfile::tempdir().unwrap();
    let req = RequestBuilder::new(external_registry())
        .build(Invocation::cli(["hello", "--help"]))
        .unwrap();
    let response = Executor::new(ExecContext::Cli)
        .with_search_path(dir.path())
        .execute(req)
        .await;
    let mut out = Vec::new();
    response.encode_to(&mut out).await.unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "ipfs-hello is an 'external' command.\nIt does not currently appear to be installed.\nInstall ipfs-hello from the releases page.\n"
    );
}

#[tokio::test]
async fn test_external_missing_without_help() {
    let dir = tempfile::tempdir().unwrap();
    let req = RequestBuilder::new(external_registry())
        .build(Invocation::cli(["hello", "world"]))
        .unwrap();
    let response = Executor::new(ExecContext::Cli)
        .with_search_path(dir.path())
        .execute(req)
        .await;
    let err = response.receiver.collect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normal);
    assert_eq!(err.to_string(), "ipfs-hello not installed");
}

#[cfg(unix)]
fn install_script(dir: &std::path::Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ipfs-hello");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_streams_child_output() {
    let dir = tempfile::tempdir().unwrap();
    install_script(dir.path(), "echo \"hello $1 online=$IPFS_ONLINE\"");

    let req = RequestBuilder::new(external_registry())
        .build(Invocation::cli(["hello", "world"]))
        .unwrap();
    let response = Executor::new(ExecContext::Cli)
        .with_search_path(dir.path())
        .with_online(true)
        .execute(req)
        .await;
    let mut out = Vec::new();
    response.encode_to(&mut out).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "hello world online=true\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_nonzero_exit_is_normal_error() {
    let dir = tempfile::tempdir().unwrap();
    install_script(dir.path(), "echo partial\nexit 3");

    let req = RequestBuilder::new(external_registry())
        .build(Invocation::cli(["hello"]))
        .unwrap();
    let response = Executor::new(ExecContext::Cli)
        .with_search_path(dir.path())
        .execute(req)
        .await;
    let mut out = Vec::new();
    let err = response.encode_to(&mut out).await.unwrap_err();
    assert_eq!(String::from_utf8(out).unwrap(), "partial\n");
    assert_eq!(err.kind(), ErrorKind::Normal);
    assert!(err.to_string().contains("exited with status 3"));
}

#[test]
fn test_payload_reader_flag() {
    let payload = Payload::Reader(Box::pin(&b"x"[..]));
    assert!(payload.is_reader());
}
