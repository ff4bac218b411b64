//! Network primitives used by the probe engine
//!
//! Resolution goes through the system resolver (`dns_lookup`) on the
//! blocking pool, bounded in time and in concurrent lookups. Reachability
//! and port checks are plain TCP connects.

use async_trait::async_trait;
use futures::future::{select_ok, BoxFuture, FutureExt};
use std::{
    fmt,
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{net::TcpStream, sync::Semaphore, time::timeout};
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    error::{Result, ScannerError},
};

/// An address after forward and reverse resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub ip: IpAddr,
    /// Reverse-resolved name, or the input text when none exists
    pub hostname: String,
    pub canonical_hostname: String,
}

impl ResolvedHost {
    /// `reverse` is the PTR name of `ip`, if any. A literal address takes it
    /// as its hostname; a hostname target keeps the name it was given.
    pub fn new(address: &str, ip: IpAddr, reverse: Option<String>) -> Self {
        let hostname = match address.parse::<IpAddr>() {
            Ok(_) => reverse.clone().unwrap_or_else(|| address.to_string()),
            Err(_) => address.to_string(),
        };
        let canonical_hostname = reverse.unwrap_or_else(|| hostname.clone());

        Self {
            ip,
            hostname,
            canonical_hostname,
        }
    }
}

impl fmt::Display for ResolvedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname == self.ip.to_string() {
            write!(f, "{}", self.ip)
        } else {
            write!(f, "{} ({})", self.hostname, self.ip)
        }
    }
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Parse an address literal, or resolve a hostname forward
    async fn resolve_ip(&self, address: &str) -> Result<IpAddr>;

    /// PTR name of `ip`; `None` when there is none or the lookup runs out of time
    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String>;

    /// Whether the host answers at all within `limit`
    async fn is_reachable(&self, ip: IpAddr, limit: Duration) -> Result<bool>;

    /// A timeout or refusal both count as closed
    async fn is_port_open(&self, ip: IpAddr, port: u16, limit: Duration) -> bool;

    /// Time to complete a TCP handshake, if it completes
    async fn connect_latency(&self, ip: IpAddr, port: u16, limit: Duration) -> Option<Duration>;
}

/// Probe backed by the operating system's TCP stack and resolver
pub struct TcpNetworkProbe {
    reachability_ports: Vec<u16>,
    dns_timeout: Duration,
    dns_slots: Arc<Semaphore>,
}

impl TcpNetworkProbe {
    pub fn new(reachability_ports: Vec<u16>, dns_timeout: Duration, max_concurrent_dns: usize) -> Self {
        Self {
            reachability_ports,
            dns_timeout,
            dns_slots: Arc::new(Semaphore::new(max_concurrent_dns.max(1))),
        }
    }

    /// Run a resolver call on the blocking pool. Waiting for a slot counts
    /// against the budget, and the slot stays taken until the call returns
    /// even when the caller has given up on it.
    async fn blocking_lookup<T, F>(&self, lookup: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slots = self.dns_slots.clone();
        let attempt = async move {
            let permit = slots.acquire_owned().await.ok()?;
            match tokio::task::spawn_blocking(move || {
                let _permit = permit;
                lookup()
            })
            .await
            {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "DNS worker failed");
                    None
                }
            }
        };

        timeout(self.dns_timeout, attempt).await.ok().flatten()
    }

    /// Succeeds when the host completes or actively refuses the handshake
    async fn answer_on(addr: SocketAddr) -> io::Result<()> {
        match TcpStream::connect(addr).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl NetworkProbe for TcpNetworkProbe {
    async fn resolve_ip(&self, address: &str) -> Result<IpAddr> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ScannerError::resolution(address, "empty address"));
        }
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }

        let owned = address.to_string();
        let addresses = self
            .blocking_lookup(move || dns_lookup::lookup_host(&owned))
            .await
            .ok_or_else(|| {
                ScannerError::resolution(address, format!("no answer within {:?}", self.dns_timeout))
            })?
            .map_err(|e| ScannerError::resolution(address, e.to_string()))?;

        addresses
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| ScannerError::resolution(address, "no addresses returned"))
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        let name = self
            .blocking_lookup(move || dns_lookup::lookup_addr(&ip))
            .await?
            .ok()?;
        // Resolvers without a PTR record often echo the address back
        (name != ip.to_string()).then_some(name)
    }

    async fn is_reachable(&self, ip: IpAddr, limit: Duration) -> Result<bool> {
        let attempts: Vec<BoxFuture<'static, io::Result<()>>> = self
            .reachability_ports
            .iter()
            .map(|&port| Self::answer_on(SocketAddr::new(ip, port)).boxed())
            .collect();

        if attempts.is_empty() {
            return Err(ScannerError::config("no reachability ports configured"));
        }

        match timeout(limit, select_ok(attempts)).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                debug!(%ip, error = %e, "No reachability port answered");
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }

    async fn is_port_open(&self, ip: IpAddr, port: u16, limit: Duration) -> bool {
        matches!(timeout(limit, TcpStream::connect((ip, port))).await, Ok(Ok(_)))
    }

    async fn connect_latency(&self, ip: IpAddr, port: u16, limit: Duration) -> Option<Duration> {
        let started = Instant::now();
        match timeout(limit, TcpStream::connect((ip, port))).await {
            Ok(Ok(_)) => Some(started.elapsed()),
            _ => None,
        }
    }
}

pub fn create_network_probe(config: &AppConfig) -> Arc<dyn NetworkProbe> {
    Arc::new(TcpNetworkProbe::new(
        config.scanning.reachability_ports.clone(),
        config.dns_timeout(),
        config.scanning.max_concurrent_dns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn tcp_probe(reachability_ports: Vec<u16>) -> TcpNetworkProbe {
        TcpNetworkProbe::new(reachability_ports, Duration::from_secs(2), 4)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_open_and_closed_ports() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port().await;

        let probe = tcp_probe(vec![open]);
        let limit = Duration::from_secs(1);
        assert!(probe.is_port_open(LOCALHOST, open, limit).await);
        assert!(!probe.is_port_open(LOCALHOST, closed, limit).await);
        assert!(probe.connect_latency(LOCALHOST, open, limit).await.is_some());
        assert!(probe.connect_latency(LOCALHOST, closed, limit).await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connection_proves_host_up() {
        let closed = closed_port().await;
        let probe = tcp_probe(vec![closed]);
        assert!(probe.is_reachable(LOCALHOST, Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_reachability_requires_ports() {
        let probe = tcp_probe(Vec::new());
        assert!(probe.is_reachable(LOCALHOST, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let probe = tcp_probe(vec![80]);
        assert_eq!(probe.resolve_ip(" 127.0.0.1 ").await.unwrap(), LOCALHOST);
        assert!(probe.resolve_ip("   ").await.is_err());
    }

    #[test]
    fn test_resolved_host_names() {
        let named = ResolvedHost::new("10.0.0.5", LOCALHOST, Some("files.corp.local".to_string()));
        assert_eq!(named.hostname, "files.corp.local");
        assert_eq!(named.canonical_hostname, "files.corp.local");

        let bare = ResolvedHost::new("10.0.0.5", LOCALHOST, None);
        assert_eq!(bare.hostname, "10.0.0.5");
        assert_eq!(bare.canonical_hostname, "10.0.0.5");

        let given = ResolvedHost::new("files", LOCALHOST, Some("files.corp.local".to_string()));
        assert_eq!(given.hostname, "files");
        assert_eq!(given.canonical_hostname, "files.corp.local");
    }

    #[tokio::test]
    async fn test_slow_lookup_gives_up_at_budget() {
        let network = TcpNetworkProbe::new(vec![80], Duration::from_millis(50), 1);
        let started = Instant::now();

        let stuck = network.blocking_lookup(|| {
            std::thread::sleep(Duration::from_millis(300));
            "late"
        });
        // The only slot is held by the stuck lookup, so this one times out waiting
        let queued = network.blocking_lookup(|| "instant");
        let (stuck, queued) = tokio::join!(stuck, queued);

        assert_eq!(stuck, None);
        assert_eq!(queued, None);
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
