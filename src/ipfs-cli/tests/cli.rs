//! The `ipfs` driver end to end: exit codes, stderr reporting, help, and
//! dispatch to a running daemon.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ipfs_cli::Driver;
use ipfs_cli::run_daemon;
use ipfs_cmds::{Command, HelpText, Registry, RequestContext};
use ipfs_cmds_http::ServerConfig;
use ipfs_commands::repo::read_api_file;
use ipfs_commands::{Repo, VersionInfo, root};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::oneshot;

struct Output {
    code: i32,
    stdout: String,
    stderr: String,
}

async fn run_in(repo: &Path, args: &[&str]) -> Output {
    run_with(Driver::default(), repo, args).await
}

async fn run_with(driver: Driver, repo: &Path, args: &[&str]) -> Output {
    let driver = driver
        .with_repo_root(repo)
        .with_version(VersionInfo::fixed("TESTVER"));
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = driver
        .run(
            args.iter().map(|s| s.to_string()).collect(),
            None,
            RequestContext::new(),
            &mut stdout,
            &mut stderr,
        )
        .await;
    Output {
        code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[tokio::test]
async fn test_version() {
    let repo = TempDir::new().unwrap();
    let out = run_in(repo.path(), &["version", "--numeric"]).await;
    assert_eq!(out.code, 0);
    assert_eq!(out.stdout, "TESTVER\n");
    assert_eq!(out.stderr, "");
}

#[tokio::test]
async fn test_unknown_command() {
    let repo = TempDir::new().unwrap();
    let out = run_in(repo.path(), &["nosuch", "sub", "--x=1"]).await;
    assert_eq!(out.code, 1);
    assert_eq!(out.stdout, "");
    assert!(out.stderr.starts_with("Error: "), "{}", out.stderr);
    assert!(out.stderr.contains("nosuch"), "{}", out.stderr);
}

#[tokio::test]
async fn test_removed_command() {
    let repo = TempDir::new().unwrap();
    let out = run_in(repo.path(), &["dht", "findprovs", "QmFoo"]).await;
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("removed, use 'routing' instead"), "{}", out.stderr);
}

#[tokio::test]
async fn test_bad_option_type() {
    let repo = TempDir::new().unwrap();
    let out = run_in(repo.path(), &["pin", "add", "--recursive=maybe", "QmFoo"]).await;
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("recursive"), "{}", out.stderr);
}

#[tokio::test]
async fn test_parent_command_prints_short_help() {
    let repo = TempDir::new().unwrap();
    let out = run_in(repo.path(), &["pin"]).await;
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("USAGE"), "{}", out.stderr);
    assert!(out.stderr.contains("can't be called directly"), "{}", out.stderr);
}

#[tokio::test]
async fn test_help_flags() {
    let repo = TempDir::new().unwrap();
    let long = run_in(repo.path(), &["add", "--help"]).await;
    assert_eq!(long.code, 0);
    assert!(long.stdout.contains("SYNOPSIS"));
    assert!(long.stdout.contains("OPTIONS"));

    let short = run_in(repo.path(), &["add", "-h"]).await;
    assert_eq!(short.code, 0);
    assert!(short.stdout.starts_with("USAGE"));
    assert!(!short.stdout.contains("OPTIONS"));
}

fn status_registry() -> Registry {
    let done = |tagline: &str| {
        Command::new()
            .help(HelpText::new(tagline).short(tagline).long(tagline))
            .run_fn(|_req, emitter| async move { emitter.emit_reader(&b"done\n"[..]).await })
    };
    Registry::new(
        root()
            .subcommand("legacy", done("Old behavior.").deprecated())
            .subcommand("beta", done("New behavior.").experimental()),
    )
}

#[tokio::test]
async fn test_deprecated_command_warns() {
    let repo = TempDir::new().unwrap();
    let out = run_with(Driver::new(status_registry()), repo.path(), &["legacy"]).await;
    assert_eq!(out.code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "done\n");
    assert_eq!(out.stderr, "WARNING: command 'legacy' is deprecated\n");

    let help = run_with(Driver::new(status_registry()), repo.path(), &["legacy", "--help"]).await;
    assert!(help.stdout.contains("DEPRECATED"), "{}", help.stdout);
    assert_eq!(help.stderr, "");
}

#[tokio::test]
async fn test_experimental_command_help() {
    let repo = TempDir::new().unwrap();
    let out = run_with(Driver::new(status_registry()), repo.path(), &["beta"]).await;
    assert_eq!(out.code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "done\n");
    assert_eq!(out.stderr, "");

    let long = run_with(Driver::new(status_registry()), repo.path(), &["beta", "--help"]).await;
    assert!(long.stdout.contains("EXPERIMENTAL: this command is subject to change."));
    let short = run_with(Driver::new(status_registry()), repo.path(), &["beta", "-h"]).await;
    assert!(short.stdout.contains("EXPERIMENTAL"));
}

#[tokio::test]
async fn test_offline_routing() {
    let repo = TempDir::new().unwrap();
    let out = run_in(repo.path(), &["routing", "findprovs", "QmFoo"]).await;
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("online mode"), "{}", out.stderr);
}

#[tokio::test]
async fn test_locked_repo_without_daemon() {
    let repo = TempDir::new().unwrap();
    let _held = Repo::open(repo.path()).unwrap();
    let out = run_in(repo.path(), &["config", "Addresses.API"]).await;
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("repository is locked"), "{}", out.stderr);
}

#[tokio::test]
async fn test_unreachable_daemon() {
    let repo = TempDir::new().unwrap();
    let out = run_in(repo.path(), &["--api=/ip4/127.0.0.1/tcp/1", "config", "Addresses.API"]).await;
    assert_eq!(out.code, 1);
    assert!(out.stderr.starts_with("Error: "), "{}", out.stderr);

    let out = run_in(
        repo.path(),
        &["--api=/ip4/127.0.0.1/tcp/1", "--offline", "config", "Addresses.API"],
    )
    .await;
    assert_eq!(out.code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "/ip4/127.0.0.1/tcp/5001\n");
}

#[tokio::test]
async fn test_commands_through_daemon() {
    let repo = TempDir::new().unwrap();
    let held = Arc::new(Repo::open(repo.path()).unwrap());
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(run_daemon(held, config, false, async {
        let _ = stopped.await;
    }));

    let mut waited = 0;
    while read_api_file(repo.path()).is_none() {
        assert!(waited < 500, "daemon never wrote its api file");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }

    // The daemon holds the repo lock; config only works through it.
    let out = run_in(repo.path(), &["config", "Addresses.API"]).await;
    assert_eq!(out.code, 0, "{}", out.stderr);
    assert_eq!(out.stdout, "/ip4/127.0.0.1/tcp/5001\n");

    let out = run_in(repo.path(), &["config", "Routing.Type", "none"]).await;
    assert_eq!(out.code, 0, "{}", out.stderr);
    let out = run_in(repo.path(), &["config", "Routing.Type", "--enc=json"]).await;
    assert_eq!(out.stdout, "{\"Key\":\"Routing.Type\",\"Value\":\"none\"}\n");

    let note = "a&b=c#d?e=%20 ü";
    let out = run_in(repo.path(), &["config", "Gateway.Note", note]).await;
    assert_eq!(out.code, 0, "{}", out.stderr);
    let out = run_in(repo.path(), &["config", "Gateway.Note"]).await;
    assert_eq!(out.stdout, format!("{note}\n"));

    let out = run_in(repo.path(), &["swarm", "peers"]).await;
    assert_eq!(out.code, 0, "{}", out.stderr);

    let out = run_in(repo.path(), &["config", "No.Such.Key"]).await;
    assert_eq!(out.code, 1);
    assert!(out.stderr.starts_with("Error: "), "{}", out.stderr);

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert_eq!(read_api_file(repo.path()), None);
}
