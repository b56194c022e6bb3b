//! Node collaborators.
//!
//! Commands never reach into the block engine, the pinner, the router or
//! the swarm directly; they go through the traits below, obtained from the
//! [`NodeEnv`](crate::env::NodeEnv) carried by the request. [`MemoryNode`]
//! implements all of them in process and backs offline use and tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use ipfs_cmds::{CmdError, CmdResult, Multiaddr};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Content identifier.
///
/// CIDv1 in base16 multibase: `f`, version `01`, the content codec, and a
/// sha2-256 multihash (`1220` + digest). Leaves use the raw codec, file and
/// directory nodes ([`DagNode`]) use dag-json.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(String);

impl Cid {
    /// Raw leaf codec (0x55).
    const RAW_PREFIX: &'static str = "f01551220";
    /// dag-json codec (0x0129).
    const DAG_PREFIX: &'static str = "f01a9021220";
    const DIGEST_HEX_LEN: usize = 64;

    /// CID of a raw block.
    pub fn raw(data: &[u8]) -> Self {
        Self::from_digest(Self::RAW_PREFIX, &Sha256::digest(data))
    }

    /// CID of an encoded [`DagNode`].
    pub fn dag(data: &[u8]) -> Self {
        Self::from_digest(Self::DAG_PREFIX, &Sha256::digest(data))
    }

    fn from_digest(prefix: &str, digest: &[u8]) -> Self {
        Self(format!("{prefix}{}", hex::encode(digest)))
    }

    pub fn is_dag(&self) -> bool {
        self.0.starts_with(Self::DAG_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cid {
    type Err = CmdError;

    /// Accepts a bare CID or an `/ipfs/<cid>` path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().trim_start_matches("/ipfs/").trim_end_matches('/');
        let lower = raw.to_ascii_lowercase();
        let valid = [Self::RAW_PREFIX, Self::DAG_PREFIX].iter().any(|prefix| {
            lower.strip_prefix(prefix).is_some_and(|digest| {
                digest.len() == Self::DIGEST_HEX_LEN && hex::decode(digest).is_ok()
            })
        });
        if valid {
            Ok(Self(lower))
        } else {
            Err(CmdError::client(format!("invalid path {s:?}: not a valid cid")))
        }
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Interior node of a DAG: a file split into several leaves, or a
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DagNode {
    /// Leaves of a file, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Cid>,
    /// Children of a directory by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<BTreeMap<String, Cid>>,
    /// Total size of the content below this node.
    pub size: u64,
}

impl DagNode {
    pub fn file(links: Vec<Cid>, size: u64) -> Self {
        Self {
            links,
            entries: None,
            size,
        }
    }

    pub fn directory(entries: BTreeMap<String, Cid>, size: u64) -> Self {
        Self {
            links: Vec::new(),
            entries: Some(entries),
            size,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entries.is_some()
    }

    /// Encoded block and its CID.
    pub fn encode(&self) -> CmdResult<(Cid, Bytes)> {
        let data = serde_json::to_vec(self).map_err(|e| CmdError::fatal(format!("failed to encode node: {e}")))?;
        Ok((Cid::dag(&data), Bytes::from(data)))
    }

    pub fn decode(cid: &Cid, data: &[u8]) -> CmdResult<Self> {
        serde_json::from_slice(data).map_err(|e| CmdError::normal(format!("malformed node {cid}: {e}")))
    }
}

/// Read every leaf below `cid` in order. Directories are rejected.
pub async fn read_leaves(blocks: &dyn BlockStore, cid: &Cid) -> CmdResult<Vec<Bytes>> {
    let data = blocks.get(cid).await?;
    if !cid.is_dag() {
        return Ok(vec![data]);
    }
    let node = DagNode::decode(cid, &data)?;
    if node.is_directory() {
        return Err(CmdError::client(format!("{cid} is a directory")));
    }
    let mut leaves = Vec::with_capacity(node.links.len());
    for link in &node.links {
        leaves.push(blocks.get(link).await?);
    }
    Ok(leaves)
}

/// How an object is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    Direct,
    Recursive,
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Recursive => f.write_str("recursive"),
        }
    }
}

/// A peer and the addresses it is known under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Addrs")]
    pub addrs: Vec<String>,
}

/// Block storage.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn put(&self, cid: &Cid, data: Bytes) -> CmdResult<()>;

    /// Fails with a normal error when the block is unknown.
    async fn get(&self, cid: &Cid) -> CmdResult<Bytes>;

    async fn has(&self, cid: &Cid) -> CmdResult<bool>;
}

/// Pin set.
#[async_trait]
pub trait Pinner: Send + Sync {
    async fn pin(&self, cid: &Cid, mode: PinMode) -> CmdResult<()>;

    /// Fails with a normal error when `cid` is not pinned in `mode`.
    async fn unpin(&self, cid: &Cid, mode: PinMode) -> CmdResult<()>;

    async fn pins(&self) -> CmdResult<Vec<(Cid, PinMode)>>;
}

/// Content routing.
#[async_trait]
pub trait Routing: Send + Sync {
    /// Up to `limit` providers of `cid`.
    async fn find_providers(&self, cid: &Cid, limit: usize) -> CmdResult<Vec<PeerInfo>>;
}

/// Peer connections.
#[async_trait]
pub trait Swarm: Send + Sync {
    async fn connect(&self, peer: &str, addrs: &[Multiaddr]) -> CmdResult<()>;

    /// Connected peers with the address of each connection.
    async fn peers(&self) -> CmdResult<Vec<PeerInfo>>;
}

/// Every collaborator a command may need.
pub trait Node: BlockStore + Pinner + Routing + Swarm {}

impl<T: BlockStore + Pinner + Routing + Swarm> Node for T {}

#[derive(Debug, Default)]
struct MemoryState {
    blocks: HashMap<Cid, Bytes>,
    pins: BTreeMap<Cid, PinMode>,
    providers: HashMap<Cid, Vec<PeerInfo>>,
    peers: BTreeMap<String, Vec<String>>,
}

/// In-process node.
#[derive(Debug, Default)]
pub struct MemoryNode {
    state: Mutex<MemoryState>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce `peer` as a provider of `cid`.
    pub fn add_provider(&self, cid: Cid, peer: PeerInfo) {
        self.state.lock().providers.entry(cid).or_default().push(peer);
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }
}

#[async_trait]
impl BlockStore for MemoryNode {
    async fn put(&self, cid: &Cid, data: Bytes) -> CmdResult<()> {
        self.state.lock().blocks.insert(cid.clone(), data);
        Ok(())
    }

    async fn get(&self, cid: &Cid) -> CmdResult<Bytes> {
        self.state
            .lock()
            .blocks
            .get(cid)
            .cloned()
            .ok_or_else(|| CmdError::normal(format!("block was not found locally (offline): {cid}")))
    }

    async fn has(&self, cid: &Cid) -> CmdResult<bool> {
        Ok(self.state.lock().blocks.contains_key(cid))
    }
}

#[async_trait]
impl Pinner for MemoryNode {
    async fn pin(&self, cid: &Cid, mode: PinMode) -> CmdResult<()> {
        let mut state = self.state.lock();
        if !state.blocks.contains_key(cid) {
            return Err(CmdError::normal(format!("pin: block was not found locally (offline): {cid}")));
        }
        // a recursive pin is never downgraded
        let entry = state.pins.entry(cid.clone()).or_insert(mode);
        if mode == PinMode::Recursive {
            *entry = PinMode::Recursive;
        }
        Ok(())
    }

    async fn unpin(&self, cid: &Cid, mode: PinMode) -> CmdResult<()> {
        let mut state = self.state.lock();
        match state.pins.get(cid) {
            None => Err(CmdError::normal(format!("{cid} is not pinned"))),
            Some(PinMode::Recursive) if mode == PinMode::Direct => {
                Err(CmdError::normal(format!("{cid} is pinned recursively")))
            }
            Some(_) => {
                state.pins.remove(cid);
                Ok(())
            }
        }
    }

    async fn pins(&self) -> CmdResult<Vec<(Cid, PinMode)>> {
        Ok(self
            .state
            .lock()
            .pins
            .iter()
            .map(|(cid, mode)| (cid.clone(), *mode))
            .collect())
    }
}

#[async_trait]
impl Routing for MemoryNode {
    async fn find_providers(&self, cid: &Cid, limit: usize) -> CmdResult<Vec<PeerInfo>> {
        let state = self.state.lock();
        Ok(state
            .providers
            .get(cid)
            .map(|peers| peers.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Swarm for MemoryNode {
    async fn connect(&self, peer: &str, addrs: &[Multiaddr]) -> CmdResult<()> {
        let mut state = self.state.lock();
        let known = state.peers.entry(peer.to_string()).or_default();
        for addr in addrs {
            let addr = addr.to_string();
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
        Ok(())
    }

    async fn peers(&self) -> CmdResult<Vec<PeerInfo>> {
        Ok(self
            .state
            .lock()
            .peers
            .iter()
            .map(|(id, addrs)| PeerInfo {
                id: id.clone(),
                addrs: addrs.clone(),
            })
            .collect())
    }
}
