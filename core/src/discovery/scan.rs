//! Manual peer probing: single addresses, hostnames and CIDR ranges

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use tokio::task::JoinSet;

use crate::protocol::constants::MAX_SCAN_HOSTS;
use crate::protocol::{HelloMessage, Message};
use crate::sync::connection::request_once;
use crate::{Error, Result};

/// Where a manual add should look
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    Single(SocketAddr),
    Range(Vec<SocketAddr>),
}

/// Parse `ip`, `ip:port`, `host[:port]` or a CIDR block. Addresses in
/// `skip` (this machine) are left out of ranges.
pub async fn resolve_target(input: &str, default_port: u16, skip: &[IpAddr]) -> Result<ScanTarget> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidState("empty peer address".into()));
    }

    if input.contains('/') {
        return cidr_hosts(input, default_port, skip).map(ScanTarget::Range);
    }

    if let Ok(addr) = SocketAddr::from_str(input) {
        return Ok(ScanTarget::Single(addr));
    }
    if let Ok(ip) = IpAddr::from_str(input) {
        return Ok(ScanTarget::Single(SocketAddr::new(ip, default_port)));
    }

    let lookup = if input.contains(':') {
        input.to_string()
    } else {
        format!("{}:{}", input, default_port)
    };
    let mut resolved = tokio::net::lookup_host(&lookup)
        .await
        .map_err(|e| Error::Network(format!("cannot resolve {}: {}", input, e)))?;

    resolved
        .next()
        .map(ScanTarget::Single)
        .ok_or_else(|| Error::Network(format!("{} has no addresses", input)))
}

fn cidr_hosts(input: &str, port: u16, skip: &[IpAddr]) -> Result<Vec<SocketAddr>> {
    let network = IpNetwork::from_str(input)
        .map_err(|e| Error::InvalidState(format!("invalid range {}: {}", input, e)))?;

    let hosts: Vec<IpAddr> = match network {
        IpNetwork::V4(net) => {
            check_range_size(input, 32 - net.prefix())?;
            let edges = net.prefix() < 31;
            net.iter()
                .filter(|ip| !edges || (*ip != net.network() && *ip != net.broadcast()))
                .map(IpAddr::V4)
                .collect()
        }
        IpNetwork::V6(net) => {
            check_range_size(input, 128 - net.prefix())?;
            net.iter().map(IpAddr::V6).collect()
        }
    };

    Ok(hosts
        .into_iter()
        .filter(|ip| !skip.contains(ip))
        .map(|ip| SocketAddr::new(ip, port))
        .collect())
}

/// Range size from the host bit count. `ipnetwork`'s own `size()` overflows
/// on very short prefixes.
fn check_range_size(input: &str, host_bits: u8) -> Result<()> {
    let size = 1u128.checked_shl(u32::from(host_bits)).unwrap_or(u128::MAX);
    if size > MAX_SCAN_HOSTS {
        return Err(Error::InvalidState(format!(
            "range {} is larger than {} addresses",
            input, MAX_SCAN_HOSTS
        )));
    }
    Ok(())
}

/// Send our hello to `addr` and return theirs
pub async fn probe(addr: SocketAddr, hello: &Message, timeout: Duration) -> Result<HelloMessage> {
    match request_once(addr, hello, timeout).await? {
        Message::Hello(reply) => Ok(reply),
        other => Err(Error::InvalidMessage(format!(
            "expected hello from {}, got {}",
            addr,
            other.kind()
        ))),
    }
}

/// Probe every address, `batch` at a time. Hosts that do not answer with a
/// hello are dropped silently.
pub async fn scan(
    targets: Vec<SocketAddr>,
    hello: Message,
    timeout: Duration,
    batch: usize,
) -> Vec<(SocketAddr, HelloMessage)> {
    let mut found = Vec::new();

    for chunk in targets.chunks(batch.max(1)) {
        let mut probes = JoinSet::new();
        for addr in chunk.iter().copied() {
            let hello = hello.clone();
            probes.spawn(async move { (addr, probe(addr, &hello, timeout).await) });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((addr, Ok(reply))) => found.push((addr, reply)),
                Ok((addr, Err(e))) => tracing::trace!("no member at {}: {}", addr, e),
                Err(e) => tracing::debug!("probe task failed: {}", e),
            }
        }
    }

    tracing::debug!("scan finished, {} member(s) answered", found.len());
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PeerConnection;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_resolve_single_addresses() {
        let target = resolve_target("192.168.1.20", 4654, &[]).await.unwrap();
        assert_eq!(target, ScanTarget::Single("192.168.1.20:4654".parse().unwrap()));

        let target = resolve_target(" 10.0.0.5:9000 ", 4654, &[]).await.unwrap();
        assert_eq!(target, ScanTarget::Single("10.0.0.5:9000".parse().unwrap()));

        let target = resolve_target("localhost:9000", 4654, &[]).await.unwrap();
        let ScanTarget::Single(addr) = target else {
            panic!("expected single address");
        };
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 9000);
    }

    #[tokio::test]
    async fn test_cidr_skips_edges_and_self() {
        let me: IpAddr = "192.168.1.2".parse().unwrap();
        let ScanTarget::Range(hosts) = resolve_target("192.168.1.0/29", 4654, &[me]).await.unwrap() else {
            panic!("expected range");
        };

        let ips: Vec<String> = hosts.iter().map(|a| a.ip().to_string()).collect();
        assert_eq!(
            ips,
            vec!["192.168.1.1", "192.168.1.3", "192.168.1.4", "192.168.1.5", "192.168.1.6"]
        );
        assert!(hosts.iter().all(|a| a.port() == 4654));
    }

    #[tokio::test]
    async fn test_oversized_range_rejected() {
        assert!(resolve_target("10.0.0.0/8", 4654, &[]).await.is_err());
        assert!(resolve_target("10.0.0.0/20", 4654, &[]).await.is_ok());
        assert!(resolve_target("", 4654, &[]).await.is_err());
        assert!(resolve_target("10.0.0.0/99", 4654, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_whole_address_space_rejected() {
        assert!(resolve_target("10.0.0.0/0", 4654, &[]).await.is_err());
        assert!(resolve_target("0.0.0.0/1", 4654, &[]).await.is_err());
        assert!(resolve_target("::/0", 4654, &[]).await.is_err());
        assert!(resolve_target("fe80::/64", 4654, &[]).await.is_err());

        let ScanTarget::Range(hosts) = resolve_target("fe80::/126", 4654, &[]).await.unwrap() else {
            panic!("expected range");
        };
        assert_eq!(hosts.len(), 4);
    }

    fn hello(id: &str) -> HelloMessage {
        HelloMessage {
            device_id: id.into(),
            hostname: format!("{}-host", id),
            port: 4654,
            network_name: "alpha".into(),
            protocol_version: crate::protocol::constants::PROTOCOL_VERSION,
            proof: None,
        }
    }

    #[tokio::test]
    async fn test_scan_collects_responders() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let mut conn = PeerConnection::new(stream, peer);
            conn.recv().await.unwrap();
            conn.send(&Message::Hello(hello("remote"))).await.unwrap();
        });

        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };

        let found = scan(
            vec![dead, live],
            Message::Hello(hello("me")),
            Duration::from_millis(500),
            1,
        )
        .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, live);
        assert_eq!(found[0].1.device_id, "remote");
    }
}
