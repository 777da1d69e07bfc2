// src/core/osint/whois.rs

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::WhoisSource;
use crate::core::models::WhoisInfo;

pub const IANA_WHOIS_SERVER: &str = "whois.iana.org";
pub const WHOIS_PORT: u16 = 43;

/// Responses larger than this are truncated.
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

/// Plain WHOIS over TCP/43, following the IANA referral to the registry.
#[derive(Debug, Clone)]
pub struct TcpWhoisSource {
    root_server: String,
    port: u16,
    timeout: Duration,
}

impl TcpWhoisSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            root_server: IANA_WHOIS_SERVER.to_string(),
            port: WHOIS_PORT,
            timeout,
        }
    }

    /// Starts lookups at a different root server.
    pub fn with_root_server(mut self, server: &str, port: u16) -> Self {
        self.root_server = server.to_string();
        self.port = port;
        self
    }

    async fn query(&self, server: &str, domain: &str) -> Result<String, String> {
        debug!(server, domain, "Sending WHOIS query.");
        let exchange = async {
            let mut stream = TcpStream::connect((server, self.port)).await?;
            stream.write_all(format!("{domain}\r\n").as_bytes()).await?;
            let mut raw = Vec::new();
            stream.take(MAX_RESPONSE_BYTES).read_to_end(&mut raw).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&raw).into_owned())
        };
        match timeout(self.timeout, exchange).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(format!("WHOIS query to {server} failed: {e}")),
            Err(_) => Err(format!("WHOIS query to {server} timed out")),
        }
    }
}

#[async_trait]
impl WhoisSource for TcpWhoisSource {
    async fn lookup(&self, domain: &str) -> Result<WhoisInfo, String> {
        let root = self.query(&self.root_server, domain).await?;
        let raw = match referral(&root) {
            Some(server) if !server.eq_ignore_ascii_case(&self.root_server) => self.query(&server, domain).await?,
            _ => root,
        };
        let info = parse_whois_response(domain, &raw);
        info!(domain, registrar = ?info.registrar, "Collected WHOIS data.");
        Ok(info)
    }
}

/// The `refer:` / `whois:` server named in an IANA response.
pub fn referral(raw: &str) -> Option<String> {
    fields(raw)
        .find(|(key, _)| key == "refer" || key == "whois")
        .map(|(_, value)| value.to_string())
}

fn fields(raw: &str) -> impl Iterator<Item = (String, &str)> {
    raw.lines().filter_map(|line| {
        let line = line.trim();
        if line.starts_with('%') || line.starts_with('#') {
            return None;
        }
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (!value.is_empty()).then(|| (key.trim().to_lowercase(), value))
    })
}

/// Extracts the common fields from registry or registrar WHOIS text.
pub fn parse_whois_response(domain: &str, raw: &str) -> WhoisInfo {
    let mut info = WhoisInfo {
        domain: domain.to_string(),
        raw: raw.to_string(),
        ..WhoisInfo::default()
    };

    for (key, value) in fields(raw) {
        match key.as_str() {
            "registrar" | "sponsoring registrar" if info.registrar.is_none() => {
                info.registrar = Some(value.to_string());
            }
            "creation date" | "created" | "registered on" if info.creation_date.is_none() => {
                info.creation_date = Some(value.to_string());
            }
            "registry expiry date" | "registrar registration expiration date" | "expiry date" | "expires"
            | "paid-till"
                if info.expiration_date.is_none() =>
            {
                info.expiration_date = Some(value.to_string());
            }
            "name server" | "nserver" => {
                let ns = value.split_whitespace().next().unwrap_or(value).to_lowercase();
                if !info.name_servers.contains(&ns) {
                    info.name_servers.push(ns);
                }
            }
            "domain status" | "status" => {
                let status = value.split_whitespace().next().unwrap_or(value).to_string();
                if !info.status.contains(&status) {
                    info.status.push(status);
                }
            }
            _ => {}
        }
    }
    info
}
