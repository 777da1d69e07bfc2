// src/core/scanner/mod.rs

// Public interface of the `scanner` module: every probe that touches the
// target directly lives in one of these sub-modules.
pub mod dns_scanner;
pub mod fingerprint_scanner;
pub mod headers_scanner;
pub mod port_scanner;
pub mod ssl_scanner;

pub use dns_scanner::{DnsResolver, HickoryResolver};
pub use fingerprint_scanner::{FingerprintOptions, ServiceFingerprinter};
pub use port_scanner::{NetworkProbe, PortScanner, ScanOptions, TcpTransport, Transport};
