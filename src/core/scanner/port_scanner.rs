// src/core/scanner/port_scanner.rs

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::core::models::{NetworkScan, PortResult, PortState, ScanRange};

/// Ports probed by a quick scan.
pub const COMMON_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 135, 139, 143, 443, 445, 993, 995, 1433, 3306, 3389, 5432, 5900, 8080, 8443,
];

/// Upper bound (inclusive) of a full scan, which starts at port 1.
pub const FULL_SCAN_LAST_PORT: u16 = 1024;

const BANNER_BYTES: usize = 1024;

/// Well-known service name for a port, `"unknown"` otherwise.
pub fn service_name(port: u16) -> &'static str {
    match port {
        20 => "ftp-data",
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        69 => "tftp",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        119 => "nntp",
        123 => "ntp",
        135 => "msrpc",
        137 => "netbios-ns",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        389 => "ldap",
        443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        514 => "syslog",
        587 => "submission",
        631 => "ipp",
        636 => "ldaps",
        873 => "rsync",
        993 => "imaps",
        995 => "pop3s",
        1433 => "mssql",
        1521 => "oracle",
        2049 => "nfs",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        8000 => "http-alt",
        8080 => "http-proxy",
        8443 => "https-alt",
        9200 => "elasticsearch",
        27017 => "mongodb",
        _ => "unknown",
    }
}

/// How the scanner reaches a port. Production code uses plain TCP; tests plug
/// in instrumented fakes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + Unpin + Send;

    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}

/// Tuning for one batch of probes.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_concurrency: usize,
    pub connect_timeout: Duration,
    pub banner_timeout: Duration,
    /// Slept by each probe before it takes a slot. Zero disables rate limiting.
    pub inter_attempt_delay: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 50,
            connect_timeout: Duration::from_secs(1),
            banner_timeout: Duration::from_secs(2),
            inter_attempt_delay: Duration::from_millis(10),
        }
    }
}

/// What the profiler needs from a network scanner.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn scan_target(&self, host: &str, range: ScanRange) -> NetworkScan;
}

/// Concurrency-bounded TCP connect scanner with banner capture.
pub struct PortScanner<T: Transport = TcpTransport> {
    transport: Arc<T>,
    options: ScanOptions,
}

impl PortScanner<TcpTransport> {
    pub fn tcp(options: ScanOptions) -> Self {
        Self::new(TcpTransport, options)
    }
}

impl<T: Transport> PortScanner<T> {
    pub fn new(transport: T, options: ScanOptions) -> Self {
        Self {
            transport: Arc::new(transport),
            options,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Probes every port and returns one result per port, in no particular order.
    ///
    /// A probe that fails, or whose task panics, only affects its own port.
    pub async fn scan_ports(&self, host: &str, ports: &[u16]) -> Vec<PortResult> {
        info!(target = %host, ports = ports.len(), max_concurrency = self.options.max_concurrency, "Starting port scan.");

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut pending: BTreeSet<u16> = ports.iter().copied().collect();
        let mut tasks = JoinSet::new();

        for &port in &pending {
            let semaphore = Arc::clone(&semaphore);
            let transport = Arc::clone(&self.transport);
            let host = host.to_string();
            let options = self.options.clone();
            tasks.spawn(async move {
                if !options.inter_attempt_delay.is_zero() {
                    sleep(options.inter_attempt_delay).await;
                }
                // The semaphore is never closed, so acquiring only fails if it is dropped.
                let _permit = semaphore.acquire_owned().await.ok();
                probe(transport.as_ref(), &host, port, &options).await
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    pending.remove(&result.port);
                    results.push(result);
                }
                Err(e) => warn!(target = %host, error = %e, "Port probe task failed."),
            }
        }

        // Whatever is still pending belongs to a task that never returned.
        for port in pending {
            results.push(PortResult {
                port,
                state: PortState::Error,
                service: service_name(port).to_string(),
                banner: None,
                error: Some("probe task aborted".to_string()),
            });
        }

        let open = results.iter().filter(|r| r.state == PortState::Open).count();
        info!(target = %host, open = %open, "Port scan finished.");
        results
    }

    pub async fn quick_scan(&self, host: &str) -> Vec<PortResult> {
        self.scan_ports(host, COMMON_PORTS).await
    }

    pub async fn full_scan(&self, host: &str) -> Vec<PortResult> {
        let ports: Vec<u16> = (1..=FULL_SCAN_LAST_PORT).collect();
        self.scan_ports(host, &ports).await
    }
}

#[async_trait]
impl<T: Transport> NetworkProbe for PortScanner<T> {
    async fn scan_target(&self, host: &str, range: ScanRange) -> NetworkScan {
        let results = match range {
            ScanRange::Quick => self.quick_scan(host).await,
            ScanRange::Full => self.full_scan(host).await,
        };
        NetworkScan::from_results(host, range, results)
    }
}

/// Classifies one port: open, closed, filtered or error.
async fn probe<T: Transport>(transport: &T, host: &str, port: u16, options: &ScanOptions) -> PortResult {
    let service = service_name(port).to_string();
    let (state, banner, error) = match timeout(options.connect_timeout, transport.connect(host, port)).await {
        Ok(Ok(mut stream)) => {
            let banner = read_banner(&mut stream, options.banner_timeout).await;
            (PortState::Open, banner, None)
        }
        Err(_) => (PortState::Filtered, None, None),
        Ok(Err(e)) => match e.kind() {
            io::ErrorKind::ConnectionRefused => (PortState::Closed, None, None),
            io::ErrorKind::TimedOut => (PortState::Filtered, None, None),
            _ => (PortState::Error, None, Some(e.to_string())),
        },
    };
    debug!(port, state = %state, "Port probed.");
    PortResult {
        port,
        state,
        service,
        banner,
        error,
    }
}

/// Reads whatever the service volunteers within the timeout. Silence is not an error.
async fn read_banner<S: AsyncRead + Unpin>(stream: &mut S, wait: Duration) -> Option<String> {
    let mut buf = vec![0u8; BANNER_BYTES];
    match timeout(wait, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Scripted transport that also records the peak number of concurrent connects.
    #[derive(Default)]
    struct FakeTransport {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        type Stream = Cursor<Vec<u8>>;

        async fn connect(&self, _host: &str, port: u16) -> io::Result<Self::Stream> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match port {
                22 => Ok(Cursor::new(b"SSH-2.0-OpenSSH\r\n".to_vec())),
                80 => Ok(Cursor::new(Vec::new())),
                81 => Err(io::Error::from(io::ErrorKind::TimedOut)),
                82 => Err(io::Error::new(io::ErrorKind::PermissionDenied, "blocked")),
                83 => {
                    // Outlives the connect timeout.
                    sleep(Duration::from_secs(5)).await;
                    Err(io::Error::from(io::ErrorKind::ConnectionRefused))
                }
                666 => panic!("transport bug"),
                _ => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            }
        }
    }

    fn options(max_concurrency: usize) -> ScanOptions {
        ScanOptions {
            max_concurrency,
            connect_timeout: Duration::from_millis(200),
            banner_timeout: Duration::from_millis(100),
            inter_attempt_delay: Duration::ZERO,
        }
    }

    fn by_port(results: &[PortResult], port: u16) -> &PortResult {
        results.iter().find(|r| r.port == port).unwrap()
    }

    #[tokio::test]
    async fn open_and_refused_ports_are_classified() {
        let scanner = PortScanner::new(FakeTransport::default(), options(4));
        let results = scanner.scan_ports("127.0.0.1", &[22, 9999]).await;

        assert_eq!(results.len(), 2);
        let ssh = by_port(&results, 22);
        assert_eq!(ssh.state, PortState::Open);
        assert_eq!(ssh.service, "ssh");
        assert_eq!(ssh.banner.as_deref(), Some("SSH-2.0-OpenSSH"));
        let closed = by_port(&results, 9999);
        assert_eq!(closed.state, PortState::Closed);
        assert!(closed.banner.is_none());
        assert!(closed.error.is_none());
    }

    #[tokio::test]
    async fn each_port_gets_exactly_one_classification() {
        let scanner = PortScanner::new(FakeTransport::default(), options(3));
        let ports = [22, 80, 81, 82, 83, 666, 9999];
        let results = scanner.scan_ports("10.0.0.9", &ports).await;

        let mut seen: Vec<u16> = results.iter().map(|r| r.port).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![22, 80, 81, 82, 83, 666, 9999]);

        assert_eq!(by_port(&results, 80).state, PortState::Open);
        assert_eq!(by_port(&results, 80).banner, None);
        assert_eq!(by_port(&results, 81).state, PortState::Filtered);
        assert_eq!(by_port(&results, 83).state, PortState::Filtered);
        let denied = by_port(&results, 82);
        assert_eq!(denied.state, PortState::Error);
        assert!(denied.error.as_deref().unwrap().contains("blocked"));
        // A panicking probe is contained to its own port.
        assert_eq!(by_port(&results, 666).state, PortState::Error);
        assert_eq!(by_port(&results, 22).state, PortState::Open);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_limit() {
        let transport = FakeTransport::default();
        let scanner = PortScanner::new(transport, options(5));
        let ports: Vec<u16> = (1000..1100).collect();
        let results = scanner.scan_ports("10.0.0.9", &ports).await;

        assert_eq!(results.len(), 100);
        let peak = scanner.transport.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak in-flight probes was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn quick_scan_covers_the_common_list() {
        let scanner = PortScanner::new(FakeTransport::default(), options(50));
        let scan = scanner.scan_target("10.0.0.9", ScanRange::Quick).await;
        assert_eq!(COMMON_PORTS.len(), 21);
        assert_eq!(scan.all_results.len(), COMMON_PORTS.len());
        assert_eq!(scan.open_ports.len(), 2);
        assert!(scan.is_open(22) && scan.is_open(80));
    }

    #[tokio::test]
    async fn real_tcp_listener_banner_and_refusal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"220 test ftp ready\r\n").await;
            }
        });

        let closed_port = {
            let temp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            temp.local_addr().unwrap().port()
        };

        let scanner = PortScanner::tcp(options(2));
        let results = scanner.scan_ports("127.0.0.1", &[open_port, closed_port]).await;

        let open = by_port(&results, open_port);
        assert_eq!(open.state, PortState::Open);
        assert_eq!(open.banner.as_deref(), Some("220 test ftp ready"));
        assert_eq!(by_port(&results, closed_port).state, PortState::Closed);
    }
}
