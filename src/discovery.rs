//! Best-effort discovery of controllers on the local network.
//!
//! Every host in the candidate networks is asked for the controller's mobile
//! login page, in concurrent batches. The first batch that produces a match
//! ends the scan. Unreachable or misbehaving hosts are skipped silently.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::protocol::{is_login_page, LOGIN_PATH};
use crate::types::DiscoveredHost;
use crate::{Error, Result};

pub const DEFAULT_BATCH_SIZE: usize = 40;
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Addresses controllers are commonly installed at; probed first.
pub const PRIORITY_ADDRESSES: [Ipv4Addr; 6] = [
    Ipv4Addr::new(192, 168, 1, 100),
    Ipv4Addr::new(192, 168, 1, 200),
    Ipv4Addr::new(192, 168, 1, 10),
    Ipv4Addr::new(192, 168, 1, 20),
    Ipv4Addr::new(192, 168, 0, 100),
    Ipv4Addr::new(192, 168, 0, 200),
];

const FALLBACK_NETWORK: Ipv4Network = Ipv4Network {
    addr: Ipv4Addr::new(192, 168, 1, 0),
    prefix: 24,
};

/// An IPv4 network in CIDR notation, e.g. `192.168.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Network {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Network {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(Error::Parse(format!("invalid prefix length /{prefix}")));
        }
        let mask = Self::mask(prefix);
        Ok(Self {
            addr: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }

    /// The /24 containing `ip`.
    pub fn containing(ip: Ipv4Addr) -> Self {
        let [a, b, c, _] = ip.octets();
        Self {
            addr: Ipv4Addr::new(a, b, c, 0),
            prefix: 24,
        }
    }

    fn mask(prefix: u8) -> u32 {
        if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) }
    }

    /// Usable host addresses in ascending order: network and broadcast
    /// addresses are excluded except for /31 and /32. Addresses are produced
    /// on demand, so large networks cost nothing until iterated.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        self.host_range().map(|ip| Ipv4Addr::from(ip as u32))
    }

    pub fn contains_host(&self, ip: Ipv4Addr) -> bool {
        self.host_range().contains(&u64::from(u32::from(ip)))
    }

    fn host_range(&self) -> std::ops::RangeInclusive<u64> {
        let base = u64::from(u32::from(self.addr));
        let size = 1u64 << (32 - self.prefix);
        if self.prefix >= 31 {
            base..=base + size - 1
        } else {
            base + 1..=base + size - 2
        }
    }
}

impl FromStr for Ipv4Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s.split_once('/').unwrap_or((s, "32"));
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("invalid network address: {s}")))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("invalid prefix length: {s}")))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Address of the interface that routes outbound traffic. No packet is sent.
pub async fn local_ipv4() -> Option<Ipv4Addr> {
    let probe = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("8.8.8.8:80").await?;
        socket.local_addr()
    };
    match probe.await {
        Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => Some(*addr.ip()),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "could not determine local address");
            None
        }
    }
}

/// Hosts of `network` in probe order: priority addresses first (in their
/// listed order), then the rest ascending, never `exclude`.
pub fn candidate_hosts<'a>(
    network: &Ipv4Network,
    priority: &'a [Ipv4Addr],
    exclude: Option<Ipv4Addr>,
) -> impl Iterator<Item = Ipv4Addr> + 'a {
    let network = *network;
    let first: Vec<Ipv4Addr> = priority
        .iter()
        .copied()
        .filter(|ip| network.contains_host(*ip) && Some(*ip) != exclude)
        .collect();
    first.into_iter().chain(
        network
            .hosts()
            .filter(move |ip| Some(*ip) != exclude && !priority.contains(ip)),
    )
}

pub struct ScannerBuilder {
    batch_size: usize,
    host_timeout: Duration,
    scan_timeout: Duration,
    port: u16,
    priority: Vec<Ipv4Addr>,
}

impl Default for ScannerBuilder {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            host_timeout: DEFAULT_HOST_TIMEOUT,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            port: 80,
            priority: PRIORITY_ADDRESSES.to_vec(),
        }
    }
}

impl ScannerBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn host_timeout(mut self, timeout: Duration) -> Self {
        self.host_timeout = timeout;
        self
    }

    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn priority(mut self, addresses: impl Into<Vec<Ipv4Addr>>) -> Self {
        self.priority = addresses.into();
        self
    }

    pub fn build(self) -> Result<Scanner> {
        let http = reqwest::Client::builder()
            .timeout(self.host_timeout)
            .connect_timeout(self.host_timeout)
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Scanner {
            http,
            batch_size: self.batch_size,
            host_timeout: self.host_timeout,
            scan_timeout: self.scan_timeout,
            port: self.port,
            priority: self.priority,
        })
    }
}

pub struct Scanner {
    http: reqwest::Client,
    batch_size: usize,
    host_timeout: Duration,
    scan_timeout: Duration,
    port: u16,
    priority: Vec<Ipv4Addr>,
}

impl Scanner {
    pub fn builder() -> ScannerBuilder {
        ScannerBuilder::default()
    }

    /// Scan `networks`, or the /24 of the local address when `None`.
    ///
    /// Returns the matches of the first batch that had any. Hosts left when
    /// the overall scan deadline passes are not tried; matches already seen
    /// in the batch the deadline interrupted are still returned.
    pub async fn scan(&self, networks: Option<&[Ipv4Network]>) -> Vec<DiscoveredHost> {
        let started = Instant::now();
        let deadline = started + self.scan_timeout;
        let local = local_ipv4().await;

        let networks = match networks {
            Some(list) => list.to_vec(),
            None => match local {
                Some(ip) => {
                    let network = Ipv4Network::containing(ip);
                    info!(%network, "detected local network");
                    vec![network]
                }
                None => {
                    warn!(network = %FALLBACK_NETWORK, "could not determine local network, using default");
                    vec![FALLBACK_NETWORK]
                }
            },
        };

        for network in &networks {
            info!(%network, "scanning for controllers");
            let mut candidates = candidate_hosts(network, &self.priority, local);
            let mut scanned = 0usize;

            loop {
                let batch: Vec<Ipv4Addr> = candidates.by_ref().take(self.batch_size).collect();
                if batch.is_empty() {
                    break;
                }
                if Instant::now() >= deadline {
                    info!(elapsed = ?started.elapsed(), scanned, "scan deadline reached");
                    return Vec::new();
                }
                trace!(from = scanned, to = scanned + batch.len(), "probing batch");
                scanned += batch.len();

                let (found, expired) = self.probe_batch(&batch, deadline).await;
                if !found.is_empty() {
                    info!(
                        count = found.len(),
                        elapsed = ?started.elapsed(),
                        "controller scan finished"
                    );
                    return found;
                }
                if expired {
                    info!(elapsed = ?started.elapsed(), scanned, "scan deadline reached");
                    return Vec::new();
                }
            }
        }

        info!(elapsed = ?started.elapsed(), "controller scan finished without a match");
        Vec::new()
    }

    /// Probe a batch concurrently until every probe finished or `deadline`
    /// passed. Matches seen before the deadline are kept; the flag reports
    /// whether the deadline cut the batch short.
    async fn probe_batch(&self, batch: &[Ipv4Addr], deadline: Instant) -> (Vec<DiscoveredHost>, bool) {
        let mut probes: FuturesUnordered<_> = batch.iter().map(|ip| self.probe(*ip)).collect();
        let mut found = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, probes.next()).await {
                Ok(Some(Some(host))) => found.push(host),
                Ok(Some(None)) => {}
                Ok(None) => return (found, false),
                Err(_) => return (found, true),
            }
        }
    }

    /// Check one address for the login page signature.
    pub async fn probe(&self, ip: Ipv4Addr) -> Option<DiscoveredHost> {
        let url = if self.port == 80 {
            format!("http://{ip}{LOGIN_PATH}")
        } else {
            format!("http://{ip}:{}{LOGIN_PATH}", self.port)
        };

        let request = async {
            let resp = self.http.get(&url).send().await?;
            if resp.status().as_u16() != 200 {
                return Ok::<_, reqwest::Error>(false);
            }
            Ok(is_login_page(&resp.text().await?))
        };

        match tokio::time::timeout(self.host_timeout, request).await {
            Ok(Ok(true)) => {
                info!(%ip, "found controller");
                Some(DiscoveredHost::new(ip))
            }
            _ => None,
        }
    }
}
