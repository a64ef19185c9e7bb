//! Health Check System

use crate::common::Metadata;
use crate::outbound::{DialOptions, OutboundProxy};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use httparse::{Response, Status, EMPTY_HEADER};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::{Host, Url};

/// Per-proxy check timeout
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_RESPONSE_HEADERS: usize = 32;
const MAX_RESPONSE_HEAD: usize = 8192;

/// Health check configuration and state
pub struct HealthCheck {
    url: String,
    interval: Duration,
    lazy: bool,
    timeout: Duration,
    proxies: RwLock<Vec<Arc<dyn OutboundProxy>>>,
    last_touch: AtomicU64,
    running: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

/// What to send to the health check target once connected
struct UrlTest {
    metadata: Metadata,
    request: Option<Vec<u8>>,
}

impl UrlTest {
    fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| Error::config(format!("invalid health check url {}: {}", raw, e)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("health check url {} has no port", raw)))?;

        let metadata = Metadata::tcp().with_dst_port(port);
        let metadata = match url.host() {
            Some(Host::Domain(domain)) => metadata.with_host(domain.to_string()),
            Some(Host::Ipv4(ip)) => metadata.with_dst_ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => metadata.with_dst_ip(IpAddr::V6(ip)),
            None => return Err(Error::config(format!("health check url {} has no host", raw))),
        };

        // Plain HTTP targets get a real request; anything else is a connect test.
        let request = (url.scheme() == "http").then(|| {
            format!(
                "HEAD {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
                url.path(),
                url.host_str().unwrap_or_default()
            )
            .into_bytes()
        });

        Ok(UrlTest { metadata, request })
    }

    async fn run(&self, proxy: &dyn OutboundProxy) -> Result<()> {
        let mut conn = proxy.dial_tcp(&self.metadata, &DialOptions::default()).await?;
        if let Some(request) = &self.request {
            conn.write_all(request).await?;
            let code = read_status(&mut conn).await?;
            if !(200..300).contains(&code) {
                return Err(Error::protocol(format!("health check returned status {}", code)));
            }
        }
        Ok(())
    }
}

/// Read a response head and return its status code
async fn read_status<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u16> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::protocol("health check response ended early"));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [EMPTY_HEADER; MAX_RESPONSE_HEADERS];
        let mut response = Response::new(&mut headers);
        match response.parse(&buf) {
            Ok(Status::Complete(_)) => {
                return response
                    .code
                    .ok_or_else(|| Error::protocol("health check response has no status"));
            }
            Ok(Status::Partial) if buf.len() < MAX_RESPONSE_HEAD => {}
            Ok(Status::Partial) => {
                return Err(Error::protocol("health check response head too large"));
            }
            Err(e) => {
                return Err(Error::protocol(format!("invalid health check response: {}", e)));
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl HealthCheck {
    pub fn new(url: String, interval: Duration, lazy: bool) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        HealthCheck {
            url,
            interval,
            lazy,
            timeout: DEFAULT_CHECK_TIMEOUT,
            proxies: RwLock::new(Vec::new()),
            last_touch: AtomicU64::new(0),
            running: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get health check URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if auto health check is enabled
    pub fn is_auto(&self) -> bool {
        self.interval > Duration::ZERO && !self.url.is_empty()
    }

    /// Set proxies to check
    pub fn set_proxies(&self, proxies: Vec<Arc<dyn OutboundProxy>>) {
        *self.proxies.write() = proxies;
    }

    /// Check every proxy and record the outcome with `set_alive`
    pub async fn check(&self) {
        let test = match UrlTest::from_url(&self.url) {
            Ok(test) => test,
            Err(e) => {
                warn!("Skipping health check: {}", e);
                return;
            }
        };
        let proxies = self.proxies.read().clone();

        let futures: Vec<_> = proxies
            .iter()
            .map(|proxy| {
                let test = &test;
                async move {
                    let start = Instant::now();
                    let result = timeout(self.timeout, test.run(proxy.as_ref())).await;
                    let alive = matches!(result, Ok(Ok(())));
                    proxy.set_alive(alive);
                    match result {
                        Ok(Ok(())) => {
                            debug!("{}: {}ms", proxy.name(), start.elapsed().as_millis())
                        }
                        Ok(Err(e)) => debug!("{}: health check failed: {}", proxy.name(), e),
                        Err(_) => debug!("{}: health check timed out", proxy.name()),
                    }
                }
            })
            .collect();

        futures::future::join_all(futures).await;
    }

    /// Start background health check loop
    pub async fn start(&self) {
        if !self.is_auto() || self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Health check every {:?} against {}", self.interval, self.url);
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.lazy {
                        let last = self.last_touch.load(Ordering::Relaxed);
                        if unix_now().saturating_sub(last) > self.interval.as_secs() {
                            continue; // Skip check if not touched
                        }
                    }

                    self.check().await;
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Touch to mark as recently used
    pub fn touch(&self) {
        self.last_touch.store(unix_now(), Ordering::Relaxed);
    }

    pub fn last_touch(&self) -> u64 {
        self.last_touch.load(Ordering::Relaxed)
    }

    /// Close health check
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }
}
