//! Peer address parsing and DNS resolution.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, try_join_all};
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::CmdError;

/// Upper bound for resolving one batch of addresses.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Nested `dnsaddr` lookups followed before giving up.
const MAX_DNSADDR_DEPTH: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("invalid peer address: {0}")]
    Invalid(String),

    #[error("address {0} does not end in a peer identity")]
    MissingPeer(String),

    #[error("could not resolve {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    #[error("resolving addresses timed out after {0:?}")]
    Timeout(Duration),
}

impl From<AddrError> for CmdError {
    fn from(err: AddrError) -> Self {
        match err {
            AddrError::Invalid(_) | AddrError::MissingPeer(_) => CmdError::client(err.to_string()),
            AddrError::Resolve { .. } | AddrError::Timeout(_) => CmdError::normal(err.to_string()),
        }
    }
}

/// One segment of a multiaddress.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Dns(String),
    Dns4(String),
    Dns6(String),
    Dnsaddr(String),
    Tcp(u16),
    Udp(u16),
    Quic,
    QuicV1,
    Ws,
    Wss,
    WebTransport,
    P2p(String),
    P2pCircuit,
}

impl Protocol {
    fn is_dns(&self) -> bool {
        matches!(self, Self::Dns(_) | Self::Dns4(_) | Self::Dns6(_) | Self::Dnsaddr(_))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip4(ip) => write!(f, "/ip4/{ip}"),
            Self::Ip6(ip) => write!(f, "/ip6/{ip}"),
            Self::Dns(host) => write!(f, "/dns/{host}"),
            Self::Dns4(host) => write!(f, "/dns4/{host}"),
            Self::Dns6(host) => write!(f, "/dns6/{host}"),
            Self::Dnsaddr(host) => write!(f, "/dnsaddr/{host}"),
            Self::Tcp(port) => write!(f, "/tcp/{port}"),
            Self::Udp(port) => write!(f, "/udp/{port}"),
            Self::Quic => f.write_str("/quic"),
            Self::QuicV1 => f.write_str("/quic-v1"),
            Self::Ws => f.write_str("/ws"),
            Self::Wss => f.write_str("/wss"),
            Self::WebTransport => f.write_str("/webtransport"),
            Self::P2p(id) => write!(f, "/p2p/{id}"),
            Self::P2pCircuit => f.write_str("/p2p-circuit"),
        }
    }
}

/// Textual multiaddress such as `/ip4/1.2.3.4/tcp/4001/p2p/12D3Koo...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Multiaddr(Vec<Protocol>);

impl Multiaddr {
    pub fn protocols(&self) -> &[Protocol] {
        &self.0
    }

    /// Trailing peer identity, if any.
    pub fn peer_id(&self) -> Option<&str> {
        match self.0.last() {
            Some(Protocol::P2p(id)) => Some(id),
            _ => None,
        }
    }

    /// The address without its trailing peer identity.
    pub fn transport(&self) -> Option<Multiaddr> {
        let end = if self.peer_id().is_some() { self.0.len() - 1 } else { self.0.len() };
        (end > 0).then(|| Multiaddr(self.0[..end].to_vec()))
    }

    fn first_port(&self) -> u16 {
        self.0
            .iter()
            .find_map(|p| match p {
                Protocol::Tcp(port) | Protocol::Udp(port) => Some(*port),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn with_first(&self, first: Protocol) -> Multiaddr {
        let mut parts = self.0.clone();
        if let Some(slot) = parts.first_mut() {
            *slot = first;
        }
        Multiaddr(parts)
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.0 {
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

fn is_peer_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

impl FromStr for Multiaddr {
    type Err = AddrError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| AddrError::Invalid(format!("{raw}: {why}"));
        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| invalid("must begin with /"))?;
        let mut parts = rest.split('/');
        let mut out = Vec::new();

        while let Some(name) = parts.next() {
            let mut value = |what: &str| {
                parts
                    .next()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| invalid(&format!("{name} requires {what}")))
            };
            let proto = match name {
                "ip4" => Protocol::Ip4(value("an address")?.parse().map_err(|_| invalid("bad ip4 address"))?),
                "ip6" => Protocol::Ip6(value("an address")?.parse().map_err(|_| invalid("bad ip6 address"))?),
                "dns" => Protocol::Dns(value("a host")?.to_string()),
                "dns4" => Protocol::Dns4(value("a host")?.to_string()),
                "dns6" => Protocol::Dns6(value("a host")?.to_string()),
                "dnsaddr" => Protocol::Dnsaddr(value("a host")?.to_string()),
                "tcp" => Protocol::Tcp(value("a port")?.parse().map_err(|_| invalid("bad tcp port"))?),
                "udp" => Protocol::Udp(value("a port")?.parse().map_err(|_| invalid("bad udp port"))?),
                "quic" => Protocol::Quic,
                "quic-v1" => Protocol::QuicV1,
                "ws" => Protocol::Ws,
                "wss" => Protocol::Wss,
                "webtransport" => Protocol::WebTransport,
                "p2p-circuit" => Protocol::P2pCircuit,
                "p2p" | "ipfs" => {
                    let id = value("a peer id")?;
                    if !is_peer_id(id) {
                        return Err(invalid("bad peer id"));
                    }
                    Protocol::P2p(id.to_string())
                }
                "" => return Err(invalid("empty protocol")),
                other => return Err(invalid(&format!("unknown protocol {other}"))),
            };
            out.push(proto);
        }

        if out.is_empty() {
            return Err(invalid("empty address"));
        }
        Ok(Multiaddr(out))
    }
}

/// DNS lookups used by [`resolve_peer_addrs`].
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Addresses of `host`.
    async fn lookup(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;

    /// TXT records of `name`.
    async fn txt(&self, name: &str) -> std::io::Result<Vec<String>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("TXT lookup of {name} is not supported"),
        ))
    }
}

/// The operating system resolver. TXT records are queried with the
/// system's name server configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }

    async fn txt(&self, name: &str) -> std::io::Result<Vec<String>> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(std::io::Error::other)?;
        let records = resolver.txt_lookup(name).await.map_err(std::io::Error::other)?;
        Ok(records
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect::<String>()
            })
            .collect())
    }
}

/// Parse peer addresses without resolving them.
pub fn parse_peer_addrs(addrs: &[String]) -> Result<Vec<Multiaddr>, AddrError> {
    addrs.iter().map(|a| a.parse()).collect()
}

/// Parse `addrs`, resolve DNS based entries concurrently and require every
/// result to end in `/p2p/<id>`. Results keep input order.
pub async fn resolve_peer_addrs(
    ctx: &RequestContext,
    resolver: &dyn Resolver,
    addrs: &[String],
) -> Result<Vec<Multiaddr>, CmdError> {
    let parsed = parse_peer_addrs(addrs)?;
    let lookups = try_join_all(parsed.iter().map(|a| resolve_one(resolver, a.clone(), 0)));

    let resolved = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(ctx.error()),
        res = tokio::time::timeout(RESOLVE_TIMEOUT, lookups) => {
            res.map_err(|_| AddrError::Timeout(RESOLVE_TIMEOUT))??
        }
    };

    let flat: Vec<Multiaddr> = resolved.into_iter().flatten().collect();
    if let Some(bad) = flat.iter().find(|a| a.peer_id().is_none()) {
        return Err(AddrError::MissingPeer(bad.to_string()).into());
    }
    Ok(flat)
}

fn resolve_one(
    resolver: &dyn Resolver,
    addr: Multiaddr,
    depth: usize,
) -> BoxFuture<'_, Result<Vec<Multiaddr>, AddrError>> {
    async move {
        let Some(first) = addr.protocols().first().filter(|p| p.is_dns()).cloned() else {
            return Ok(vec![addr]);
        };
        let failed = |reason: String| AddrError::Resolve {
            addr: addr.to_string(),
            reason,
        };
        debug!(%addr, "resolving address");

        match &first {
            Protocol::Dnsaddr(host) => {
                if depth >= MAX_DNSADDR_DEPTH {
                    return Err(failed("too many nested dnsaddr records".to_string()));
                }
                let records = resolver
                    .txt(&format!("_dnsaddr.{host}"))
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                let want = addr.peer_id();
                let mut out = Vec::new();
                for record in records {
                    let Some(raw) = record.strip_prefix("dnsaddr=") else {
                        continue;
                    };
                    let Ok(candidate) = raw.parse::<Multiaddr>() else {
                        continue;
                    };
                    if want.is_some() && candidate.peer_id() != want {
                        continue;
                    }
                    out.extend(resolve_one(resolver, candidate, depth + 1).await?);
                }
                if out.is_empty() {
                    return Err(failed("no matching dnsaddr records".to_string()));
                }
                Ok(out)
            }
            Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host) => {
                let ips = resolver
                    .lookup(host, addr.first_port())
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                let out: Vec<Multiaddr> = ips
                    .into_iter()
                    .filter_map(|ip| match (&first, ip) {
                        (Protocol::Dns6(_), IpAddr::V4(_)) | (Protocol::Dns4(_), IpAddr::V6(_)) => None,
                        (_, IpAddr::V4(v4)) => Some(addr.with_first(Protocol::Ip4(v4))),
                        (_, IpAddr::V6(v6)) => Some(addr.with_first(Protocol::Ip6(v6))),
                    })
                    .collect();
                if out.is_empty() {
                    return Err(failed("no addresses found".to_string()));
                }
                Ok(out)
            }
            _ => Ok(vec![addr]),
        }
    }
    .boxed()
}

/// Group addresses by peer identity, keeping first-seen peer order.
pub fn group_by_peer(addrs: &[Multiaddr]) -> Vec<(String, Vec<Multiaddr>)> {
    let mut out: Vec<(String, Vec<Multiaddr>)> = Vec::new();
    for addr in addrs {
        let Some(id) = addr.peer_id() else { continue };
        let slot = match out.iter().position(|(p, _)| p == id) {
            Some(i) => i,
            None => {
                out.push((id.to_string(), Vec::new()));
                out.len() - 1
            }
        };
        if let Some(transport) = addr.transport() {
            out[slot].1.push(transport);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    const PEER: &str = "QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN";

    #[derive(Default)]
    struct FakeResolver {
        hosts: HashMap<String, Vec<IpAddr>>,
        txt: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn lookup(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            self.hosts
                .get(host)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"))
        }

        async fn txt(&self, name: &str) -> std::io::Result<Vec<String>> {
            Ok(self.txt.get(name).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn test_parse_and_display() {
        let raw = format!("/ip4/127.0.0.1/tcp/4001/p2p/{PEER}");
        let addr: Multiaddr = raw.parse().unwrap();
        assert_eq!(addr.to_string(), raw);
        assert_eq!(addr.peer_id(), Some(PEER));
        assert_eq!(addr.transport().unwrap().to_string(), "/ip4/127.0.0.1/tcp/4001");

        let legacy: Multiaddr = format!("/ip4/1.2.3.4/udp/1/quic-v1/ipfs/{PEER}").parse().unwrap();
        assert_eq!(legacy.peer_id(), Some(PEER));
    }

    #[test]
    fn test_parse_invalid() {
        for raw in ["", "ip4/1.2.3.4", "/ip4/300.1.1.1", "/tcp/x", "/foo/bar", "/p2p/"] {
            let err = raw.parse::<Multiaddr>().unwrap_err();
            assert!(err.to_string().starts_with("invalid peer address"), "{raw}: {err}");
            assert_eq!(CmdError::from(err).kind(), ErrorKind::Client);
        }
    }

    #[tokio::test]
    async fn test_resolve_dns_and_passthrough() {
        let mut resolver = FakeResolver::default();
        resolver.hosts.insert(
            "node.example".into(),
            vec!["10.0.0.1".parse().unwrap(), "::1".parse().unwrap()],
        );
        let addrs = vec![
            format!("/dns4/node.example/tcp/4001/p2p/{PEER}"),
            format!("/ip4/1.2.3.4/tcp/1/p2p/{PEER}"),
        ];
        let out = resolve_peer_addrs(&RequestContext::new(), &resolver, &addrs).await.unwrap();
        let rendered: Vec<String> = out.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                format!("/ip4/10.0.0.1/tcp/4001/p2p/{PEER}"),
                format!("/ip4/1.2.3.4/tcp/1/p2p/{PEER}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_resolve_dnsaddr_filters_peer() {
        let mut resolver = FakeResolver::default();
        resolver.txt.insert(
            "_dnsaddr.bootstrap.example".into(),
            vec![
                format!("dnsaddr=/ip4/10.0.0.2/tcp/4001/p2p/{PEER}"),
                "dnsaddr=/ip4/10.0.0.3/tcp/4001/p2p/QmOther".into(),
                "unrelated".into(),
            ],
        );
        let addrs = vec![format!("/dnsaddr/bootstrap.example/p2p/{PEER}")];
        let out = resolve_peer_addrs(&RequestContext::new(), &resolver, &addrs).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_string(), format!("/ip4/10.0.0.2/tcp/4001/p2p/{PEER}"));
    }

    #[tokio::test]
    async fn test_resolve_failure_fails_batch() {
        let resolver = FakeResolver::default();
        let addrs = vec![
            format!("/ip4/1.2.3.4/tcp/1/p2p/{PEER}"),
            format!("/dns/missing.example/tcp/1/p2p/{PEER}"),
        ];
        let err = resolve_peer_addrs(&RequestContext::new(), &resolver, &addrs).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Normal);
        assert!(err.to_string().contains("missing.example"));
    }

    #[tokio::test]
    async fn test_system_resolver_queries_txt() {
        let err = SystemResolver.txt("_dnsaddr.ipfs-cmds.invalid").await.unwrap_err();
        assert_ne!(err.kind(), std::io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_resolve_requires_peer() {
        let resolver = FakeResolver::default();
        let err = resolve_peer_addrs(&RequestContext::new(), &resolver, &["/ip4/1.2.3.4/tcp/1".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Client);
        assert!(err.to_string().contains("peer identity"));
    }

    #[test]
    fn test_group_by_peer() {
        let addrs = parse_peer_addrs(&[
            format!("/ip4/1.1.1.1/tcp/1/p2p/{PEER}"),
            "/p2p/QmOther".to_string(),
            format!("/ip4/2.2.2.2/tcp/2/p2p/{PEER}"),
        ])
        .unwrap();
        let grouped = group_by_peer(&addrs);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, PEER);
        assert_eq!(grouped[0].1.len(), 2);
        assert!(grouped[1].1.is_empty());
    }
}
