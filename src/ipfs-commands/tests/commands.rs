//! The command tree driven the way the `ipfs` binary and the API server
//! drive it: requests built from tokens, executed, and encoded.

use std::sync::Arc;

use ipfs_cmds::{
    CmdError, ErrorKind, ExecContext, Executor, Invocation, RequestBuilder, RequestContext, RequestError,
};
use ipfs_commands::builtin::AddEvent;
use ipfs_commands::builtin::routing_cmd::MOVED_TO_ROUTING;
use ipfs_commands::builtin::update_cmd::INSTALL_INSTRUCTIONS;
use ipfs_commands::node::DagNode;
use ipfs_commands::{Cid, MemoryNode, NodeEnv, PeerInfo, Repo, VersionInfo, registry};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const PEER: &str = "QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ";

struct Harness {
    repo: TempDir,
    node: Arc<MemoryNode>,
    online: bool,
}

impl Harness {
    fn offline() -> Self {
        Self {
            repo: tempfile::tempdir().unwrap(),
            node: Arc::new(MemoryNode::new()),
            online: false,
        }
    }

    fn online() -> Self {
        Self {
            online: true,
            ..Self::offline()
        }
    }

    fn invocation(&self, tokens: &[&str]) -> Invocation {
        let env = NodeEnv::new(self.repo.path(), self.node.clone())
            .online(self.online)
            .with_version(VersionInfo::fixed("TESTVER"))
            .into_environment();
        Invocation::cli(tokens.iter().copied()).env(env)
    }

    fn build(&self, tokens: &[&str]) -> Result<ipfs_cmds::Request, RequestError> {
        RequestBuilder::new(registry()).build(self.invocation(tokens))
    }

    /// Run on the command line executor and return the encoded output.
    async fn run(&self, tokens: &[&str]) -> Result<String, CmdError> {
        let req = self.build(tokens)?;
        let mut out = Vec::new();
        Executor::new(ExecContext::Cli)
            .execute(req)
            .await
            .encode_to(&mut out)
            .await?;
        Ok(String::from_utf8(out).unwrap())
    }
}

fn big_file(dir: &TempDir) -> (String, Vec<u8>) {
    let data: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
    let path = dir.path().join("big.bin");
    std::fs::write(&path, &data).unwrap();
    (path.to_string_lossy().into_owned(), data)
}

fn expected_file_cid(data: &[u8]) -> Cid {
    let leaves = data
        .chunks(ipfs_commands::builtin::add_cmd::CHUNK_SIZE)
        .map(Cid::raw)
        .collect();
    DagNode::file(leaves, data.len() as u64).encode().unwrap().0
}

#[tokio::test]
async fn test_version_numeric_and_json() {
    let h = Harness::offline();
    assert_eq!(h.run(&["version", "--numeric"]).await.unwrap(), "TESTVER\n");
    assert_eq!(h.run(&["version", "-n"]).await.unwrap(), "TESTVER\n");
    assert_eq!(h.run(&["version"]).await.unwrap(), "ipfs version TESTVER\n");
    assert_eq!(
        h.run(&["version", "--enc=json"]).await.unwrap(),
        "{\"Version\":\"TESTVER\"}\n"
    );
}

#[tokio::test]
async fn test_add_progress_events_on_server() {
    let h = Harness::offline();
    let files = tempfile::tempdir().unwrap();
    let (path, data) = big_file(&files);

    let req = h.build(&["add", "--progress", &path]).unwrap();
    let events = Executor::new(ExecContext::Server)
        .execute(req)
        .await
        .receiver
        .collect_values::<AddEvent>()
        .await
        .unwrap();

    let (finished, progress): (Vec<_>, Vec<_>) = events.iter().partition(|e| e.hash.is_some());
    assert!(!progress.is_empty());
    let counts: Vec<u64> = progress.iter().map(|e| e.bytes.unwrap()).collect();
    assert!(counts.windows(2).all(|w| w[0] < w[1]), "{counts:?}");
    assert_eq!(counts.last().copied(), Some(data.len() as u64));
    assert!(progress.iter().all(|e| e.name == "big.bin"));

    assert_eq!(finished.len(), 1);
    assert!(events.last().unwrap().hash.is_some());
    assert_eq!(finished[0].bytes, None);
    assert_eq!(finished[0].name, "big.bin");
    assert_eq!(finished[0].hash.as_deref(), Some(expected_file_cid(&data).as_str()));
}

#[tokio::test]
async fn test_add_progress_text_on_cli() {
    let h = Harness::offline();
    let files = tempfile::tempdir().unwrap();
    let (path, data) = big_file(&files);

    let out = h.run(&["add", "--progress", &path]).await.unwrap();
    assert_eq!(out, format!("added {} big.bin\n", expected_file_cid(&data)));
    assert!(out.starts_with("added f01"));
}

#[tokio::test]
async fn test_add_cancelled_after_first_event() {
    let h = Harness::offline();
    let files = tempfile::tempdir().unwrap();
    let (path, _) = big_file(&files);

    let ctx = RequestContext::new();
    let req = RequestBuilder::new(registry())
        .build(h.invocation(&["add", "--progress", &path]).context(ctx.clone()))
        .unwrap();
    let mut response = Executor::new(ExecContext::Server).execute(req).await;

    assert!(response.receiver.next().await.unwrap().is_some());
    ctx.cancel();

    let err = loop {
        match response.receiver.next().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("stream ended without the cancellation"),
            Err(err) => break err,
        }
    };
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_add_quiet_variants() {
    let h = Harness::offline();
    let files = tempfile::tempdir().unwrap();
    std::fs::write(files.path().join("a.txt"), b"hello").unwrap();
    let path = files.path().join("a.txt").to_string_lossy().into_owned();
    let cid = Cid::raw(b"hello");

    assert_eq!(h.run(&["add", "-q", &path]).await.unwrap(), format!("{cid}\n"));
    assert_eq!(h.run(&["add", "--silent", &path]).await.unwrap(), "");
    assert_eq!(h.run(&["add", "-Q", "-w", &path]).await.unwrap().lines().count(), 1);
}

#[tokio::test]
async fn test_add_directory_requires_recursive() {
    let h = Harness::offline();
    let files = tempfile::tempdir().unwrap();
    let site = files.path().join("site");
    std::fs::create_dir_all(site.join("css")).unwrap();
    std::fs::write(site.join("index.html"), b"<html/>").unwrap();
    std::fs::write(site.join("css/main.css"), b"body{}").unwrap();
    let path = site.to_string_lossy().into_owned();

    let err = h.run(&["add", &path]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);

    let out = h.run(&["add", "-r", &path]).await.unwrap();
    let names: Vec<&str> = out.lines().map(|l| l.rsplit(' ').next().unwrap()).collect();
    assert_eq!(names, vec!["site/css/main.css", "site/index.html", "site/css", "site"]);
}

#[tokio::test]
async fn test_removed_dht_command() {
    let h = Harness::online();
    let err = h.run(&["dht", "findprovs", PEER]).await.unwrap_err();
    assert_eq!(err.exit_code(), 1);
    assert_eq!(err.kind(), ErrorKind::Client);
    assert!(err.to_string().contains(MOVED_TO_ROUTING), "{err}");
}

#[tokio::test]
async fn test_bad_option_type() {
    let h = Harness::offline();
    let err = h.build(&["pin", "add", "--recursive=maybe", PEER]).unwrap_err();
    assert_eq!(err.error_code(), "bad_option_type");
    assert_eq!(CmdError::from(err).exit_code(), 1);
}

#[tokio::test]
async fn test_unknown_command() {
    let h = Harness::offline();
    let err = h.build(&["nosuch", "sub", "--x=1"]).unwrap_err();
    assert_eq!(err.error_code(), "unknown_command");
    assert!(err.to_string().contains("nosuch"));
}

#[tokio::test]
async fn test_routing_needs_online_node() {
    let h = Harness::offline();
    let cid = Cid::raw(b"data").to_string();
    let err = h.run(&["routing", "findprovs", &cid]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientOffline);

    let h = Harness::online();
    h.node.add_provider(
        Cid::raw(b"data"),
        PeerInfo {
            id: PEER.to_string(),
            addrs: vec!["/ip4/10.0.0.1/tcp/4001".to_string()],
        },
    );
    assert_eq!(h.run(&["routing", "findprovs", &cid]).await.unwrap(), format!("{PEER}\n"));
}

#[tokio::test]
async fn test_pin_add_with_empty_stdin() {
    let h = Harness::offline();
    let inv = h.invocation(&["pin", "add"]).body(Box::pin(&b""[..]));
    let req = RequestBuilder::new(registry()).build(inv).unwrap();
    let mut out = Vec::new();
    let err = Executor::new(ExecContext::Cli)
        .execute(req)
        .await
        .encode_to(&mut out)
        .await
        .err()
        .unwrap();
    assert_eq!(err.error_code(), "missing_required_argument");
    assert_eq!(err.exit_code(), 1);
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_add_pin_cat_round_trip() {
    let h = Harness::offline();
    let files = tempfile::tempdir().unwrap();
    std::fs::write(files.path().join("note.txt"), b"hello world").unwrap();
    let path = files.path().join("note.txt").to_string_lossy().into_owned();

    let hash = h.run(&["add", "-q", &path]).await.unwrap().trim().to_string();
    assert_eq!(h.run(&["cat", &hash]).await.unwrap(), "hello world");
    assert_eq!(h.run(&["cat", "-o", "6", "-l", "3", &hash]).await.unwrap(), "wor");
    assert_eq!(h.run(&["pin", "ls"]).await.unwrap(), format!("{hash} recursive\n"));

    assert_eq!(h.run(&["pin", "rm", &hash]).await.unwrap(), format!("unpinned {hash}\n"));
    assert_eq!(h.run(&["pin", "ls"]).await.unwrap(), "");
    let err = h.run(&["pin", "ls", &hash]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normal);

    let err = h.run(&["cat", "--offset=-1", &hash]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
}

#[tokio::test]
async fn test_add_same_basename_twice() {
    let h = Harness::offline();
    let files = tempfile::tempdir().unwrap();
    for (dir, body) in [("a", "first"), ("b", "second")] {
        std::fs::create_dir(files.path().join(dir)).unwrap();
        std::fs::write(files.path().join(dir).join("x.txt"), body).unwrap();
    }
    let a = files.path().join("a/x.txt").to_string_lossy().into_owned();
    let b = files.path().join("b/x.txt").to_string_lossy().into_owned();

    let out = h.run(&["add", "-q", &a, &b]).await.unwrap();
    let hashes: Vec<&str> = out.lines().collect();
    assert_eq!(hashes.len(), 2);
    assert_ne!(hashes[0], hashes[1]);

    let pins = h.run(&["pin", "ls"]).await.unwrap();
    for hash in &hashes {
        assert!(pins.contains(&format!("{hash} recursive")), "{pins}");
    }

    let err = h.run(&["add", "-w", &a, &b]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
}

#[tokio::test]
async fn test_config_get_and_set() {
    let h = Harness::offline();
    assert_eq!(
        h.run(&["config", "Addresses.API"]).await.unwrap(),
        "/ip4/127.0.0.1/tcp/5001\n"
    );
    h.run(&["config", "--json", "Bootstrap", "[\"x\"]"]).await.unwrap();
    assert_eq!(
        h.run(&["config", "Bootstrap", "--enc=json"]).await.unwrap(),
        "{\"Key\":\"Bootstrap\",\"Value\":[\"x\"]}\n"
    );

    let err = h.run(&["config", "No.Such.Key"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
}

#[tokio::test]
async fn test_config_while_repo_is_locked() {
    let h = Harness::offline();
    let _held = Repo::open(h.repo.path()).unwrap();
    let err = h.run(&["config", "Addresses.API"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
    assert!(err.to_string().contains("repository is locked"), "{err}");
}

#[tokio::test]
async fn test_config_with_lent_repo() {
    let h = Harness::offline();
    let repo = Arc::new(Repo::open(h.repo.path()).unwrap());
    let env = NodeEnv::memory(h.repo.path()).with_repo(repo).into_environment();
    let req = RequestBuilder::new(registry())
        .build(Invocation::cli(["config", "Routing.Type"]).env(env))
        .unwrap();
    let mut out = Vec::new();
    Executor::new(ExecContext::Server)
        .execute(req)
        .await
        .encode_to(&mut out)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "dht\n");
}

#[tokio::test]
async fn test_swarm_connect_and_peers() {
    let h = Harness::online();
    let addr = format!("/ip4/10.0.0.1/tcp/4001/p2p/{PEER}");
    assert_eq!(
        h.run(&["swarm", "connect", &addr]).await.unwrap(),
        format!("connect {PEER} success\n")
    );
    assert_eq!(h.run(&["swarm", "peers"]).await.unwrap(), format!("{addr}\n"));

    let err = h.run(&["swarm", "connect", "/ip4/10.0.0.1/tcp/4001"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
}

#[tokio::test]
async fn test_commands_lists_live_paths() {
    let h = Harness::offline();
    let out = h.run(&["commands"]).await.unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines.contains(&"ipfs pin add"));
    assert!(lines.contains(&"ipfs completion bash"));
    assert!(!lines.iter().any(|l| l.starts_with("ipfs dht ")));

    let out = h.run(&["commands", "--flags"]).await.unwrap();
    assert!(out.lines().any(|l| l == "ipfs pin add --recursive / ipfs pin add -r"));
}

#[tokio::test]
async fn test_completion_script() {
    let h = Harness::offline();
    let out = h.run(&["completion", "bash"]).await.unwrap();
    assert!(out.contains("_ipfs()"));
    assert!(out.contains("pin"));
    assert!(out.contains("--recursive"));

    let req = h.build(&["completion", "bash"]).unwrap();
    let err = Executor::new(ExecContext::Server)
        .execute(req)
        .await
        .receiver
        .collect()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
}

#[tokio::test]
async fn test_update_help_without_binary() {
    let h = Harness::offline();
    let empty = tempfile::tempdir().unwrap();
    let req = h.build(&["update", "--help"]).unwrap();
    let mut out = Vec::new();
    Executor::new(ExecContext::Cli)
        .with_search_path(empty.path())
        .execute(req)
        .await
        .encode_to(&mut out)
        .await
        .unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("ipfs-update is an 'external' command."), "{out}");
    assert!(out.contains(INSTALL_INSTRUCTIONS));
}
