// src/core/scanner/ssl_scanner.rs

use tracing::{debug, error, info};

use crate::core::models::CertificateInfo;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tokio::task::spawn_blocking;
use x509_parser::prelude::*;

/// Fetches and parses the certificate a host presents on `port`.
///
/// The handshake accepts any certificate so that expired or self-signed
/// ones can still be reported; validity is computed from the dates.
pub async fn inspect_certificate(host: &str, port: u16, wait: Duration) -> Result<CertificateInfo, String> {
    info!(target = host, port, "Starting TLS certificate inspection.");
    let host_owned = host.to_string();

    debug!("Spawning blocking task for TLS connection.");
    spawn_blocking(move || fetch_certificate(&host_owned, port, wait))
        .await
        .unwrap_or_else(|e| {
            error!(panic = %e, "Blocking TLS task panicked!");
            Err(format!("Task panicked: {}", e))
        })
}

fn fetch_certificate(host: &str, port: u16, wait: Duration) -> Result<CertificateInfo, String> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| format!("TlsConnector Error: {}", e))?;

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("Address Resolution Error: {}", e))?
        .next()
        .ok_or_else(|| format!("No address for {}", host))?;

    debug!(target = host, port, "Connecting TCP stream.");
    let stream = TcpStream::connect_timeout(&addr, wait).map_err(|e| format!("TCP Connection Error: {}", e))?;
    stream
        .set_read_timeout(Some(wait))
        .and_then(|_| stream.set_write_timeout(Some(wait)))
        .map_err(|e| format!("Socket Error: {}", e))?;

    debug!(target = host, "Performing TLS handshake.");
    let stream = connector
        .connect(host, stream)
        .map_err(|e| format!("TLS Handshake Error: {}", e))?;

    let cert = stream
        .peer_certificate()
        .map_err(|e| format!("Could not get peer certificate: {}", e))?
        .ok_or_else(|| "No peer certificate presented".to_string())?;
    let cert_der = cert
        .to_der()
        .map_err(|e| format!("Could not convert certificate to DER: {}", e))?;

    let (_, x509) = parse_x509_certificate(&cert_der).map_err(|e| format!("X.509 Parse Error: {}", e))?;
    info!(subject = %x509.subject(), issuer = %x509.issuer(), "Successfully parsed certificate.");

    let validity = x509.validity();
    Ok(certificate_info(
        x509.subject().to_string(),
        x509.issuer().to_string(),
        asn1_time_to_chrono_utc(&validity.not_before),
        asn1_time_to_chrono_utc(&validity.not_after),
        Utc::now(),
    ))
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn certificate_info(
    subject_name: String,
    issuer_name: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CertificateInfo {
    CertificateInfo {
        subject_name,
        issuer_name,
        not_before,
        not_after,
        days_until_expiry: not_after.signed_duration_since(now).num_days(),
        is_valid: now > not_before && now < not_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validity_window_and_expiry_days() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();

        let info = certificate_info("CN=a".into(), "CN=ca".into(), before, after, now);
        assert!(info.is_valid);
        assert_eq!(info.days_until_expiry, 30);

        let expired = certificate_info("CN=a".into(), "CN=ca".into(), before, now, after);
        assert!(!expired.is_valid);
        assert!(expired.days_until_expiry < 0);
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error_not_a_panic() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let result = inspect_certificate("127.0.0.1", port, Duration::from_millis(500)).await;
        assert!(result.unwrap_err().contains("TCP Connection Error"));
    }
}
