//! Network discovery: scans configured CIDR ranges for reachable
//! Tello-class drones and caches what it finds.
//!
//! Probing is a cheap command + short timeout (battery query), run with
//! bounded concurrency so a `/24` doesn't open hundreds of sockets at
//! once. Concurrent scan requests are serialized behind a single-flight
//! lock: the second caller waits for the in-flight scan rather than
//! starting a redundant one, and gets the freshly-cached result.

use crate::cache::{prune_cache, CacheEntry};
use dashmap::DashMap;
use fleet_core::config_types::NetworkDiscoveryConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DetectedDrone {
    pub ip: String,
    pub battery_pct: u8,
    pub last_verified: Instant,
}

impl CacheEntry for DetectedDrone {
    fn fetched_at(&self) -> Instant {
        self.last_verified
    }
}

pub struct NetworkDiscovery {
    config: NetworkDiscoveryConfig,
    cache: DashMap<String, DetectedDrone>,
    last_scan_at: Mutex<Option<Instant>>,
    scanning: AtomicBool,
}

impl NetworkDiscovery {
    pub fn new(config: NetworkDiscoveryConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
            last_scan_at: Mutex::new(None),
            scanning: AtomicBool::new(false),
        }
    }

    pub fn cached(&self) -> Vec<DetectedDrone> {
        self.cache.iter().map(|e| e.value().clone()).collect()
    }

    pub fn first_available(&self) -> Option<DetectedDrone> {
        self.cache.iter().map(|e| e.value().clone()).next()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Scan now, unless a scan completed within `scan_ttl_secs` and
    /// `force` is false — in which case the cache is returned as-is. Only
    /// one scan body ever runs at a time; overlapping callers block on
    /// the same lock and observe its result.
    pub async fn scan(&self, force: bool) -> Vec<DetectedDrone> {
        let mut guard = self.last_scan_at.lock().await;
        let ttl = Duration::from_secs(self.config.scan_ttl_secs);
        if !force {
            if let Some(last) = *guard {
                if last.elapsed() < ttl {
                    return self.cached();
                }
            }
        }

        self.scanning.store(true, Ordering::SeqCst);
        let hosts = self.expand_targets();
        if hosts.len() >= self.config.max_scan_hosts {
            warn!(
                max_scan_hosts = self.config.max_scan_hosts,
                "scan target list truncated by max_scan_hosts"
            );
        }

        let semaphore = Arc::new(Semaphore::new(self.config.scan_workers.max(1)));
        let mut handles = Vec::with_capacity(hosts.len());
        for ip in hosts {
            let permit = Arc::clone(&semaphore);
            let timeout_secs = self.config.connection_timeout_secs;
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok()?;
                probe(&ip, Duration::from_secs(timeout_secs)).await
            }));
        }

        for handle in handles {
            if let Ok(Some(drone)) = handle.await {
                debug!(ip = %drone.ip, battery = drone.battery_pct, "discovered drone");
                self.cache.insert(drone.ip.clone(), drone);
            }
        }

        prune_cache(&self.cache, self.config.max_scan_hosts, ttl * 4);
        *guard = Some(Instant::now());
        self.scanning.store(false, Ordering::SeqCst);
        info!(found = self.cache.len(), "network discovery scan complete");
        self.cached()
    }

    fn expand_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.config.default_ips.clone();
        for range in &self.config.scan_ranges {
            targets.extend(expand_cidr(range, self.config.max_scan_hosts));
            if targets.len() >= self.config.max_scan_hosts {
                break;
            }
        }
        targets.truncate(self.config.max_scan_hosts);
        targets
    }

    /// Runs [`Self::scan`] on `scan_interval` until `shutdown` fires.
    pub async fn run_auto_scan_loop(
        self: Arc<Self>,
        scan_interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        if *shutdown.borrow() {
            return;
        }
        let mut interval = tokio::time::interval(scan_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scan(false).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("network discovery auto-scan loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

async fn probe(ip: &str, connect_timeout: Duration) -> Option<DetectedDrone> {
    let addr: SocketAddr = format!("{ip}:8889").parse().ok()?;
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(addr).await.ok()?;
    socket.send(b"command").await.ok()?;

    let mut buf = [0u8; 64];
    let response = timeout(connect_timeout, socket.recv(&mut buf)).await.ok()?.ok()?;
    let text = String::from_utf8_lossy(&buf[..response]).trim().to_lowercase();
    if text != "ok" {
        return None;
    }

    socket.send(b"battery?").await.ok()?;
    let n = timeout(connect_timeout, socket.recv(&mut buf)).await.ok()?.ok()?;
    let battery_pct = String::from_utf8_lossy(&buf[..n]).trim().parse().unwrap_or(0);

    Some(DetectedDrone {
        ip: ip.to_string(),
        battery_pct,
        last_verified: Instant::now(),
    })
}

/// Expands an IPv4 CIDR range (`"192.168.10.0/24"`) into its host
/// addresses, excluding network/broadcast addresses for ranges wider
/// than a /31, and bounded by `limit`.
fn expand_cidr(cidr: &str, limit: usize) -> Vec<String> {
    let Some((base, prefix_str)) = cidr.split_once('/') else {
        return vec![cidr.to_string()];
    };
    let Ok(base_addr) = Ipv4Addr::from_str(base) else {
        return Vec::new();
    };
    let Ok(prefix) = prefix_str.parse::<u32>() else {
        return Vec::new();
    };
    if prefix > 32 {
        return Vec::new();
    }

    let base_u32 = u32::from(base_addr);
    let host_bits = 32 - prefix;
    let host_count = 1u64 << host_bits;
    let network = base_u32 & (!0u32 << host_bits);

    let (first, last) = if host_bits >= 2 {
        (1, host_count - 2)
    } else {
        (0, host_count - 1)
    };

    let mut out = Vec::new();
    let mut offset = first;
    while offset <= last && (out.len() as u64) < limit as u64 {
        out.push(Ipv4Addr::from(network.wrapping_add(offset as u32)).to_string());
        offset += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_slash_30_to_two_usable_hosts() {
        let hosts = expand_cidr("10.0.0.0/30", 1024);
        assert_eq!(hosts, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
    }

    #[test]
    fn expansion_is_bounded_by_limit() {
        let hosts = expand_cidr("10.0.0.0/16", 5);
        assert_eq!(hosts.len(), 5);
    }

    #[test]
    fn slash_31_treats_both_addresses_as_usable() {
        let hosts = expand_cidr("10.0.0.0/31", 1024);
        assert_eq!(hosts.len(), 2);
    }

    #[tokio::test]
    async fn cache_starts_empty() {
        let discovery = NetworkDiscovery::new(NetworkDiscoveryConfig::default());
        assert!(discovery.cached().is_empty());
        assert!(discovery.first_available().is_none());
    }
}
