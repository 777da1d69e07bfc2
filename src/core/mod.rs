// src/core/mod.rs

// Root of the `core` module: everything the profiler does, independent of
// how it is driven from the command line.

/// Data structures shared by every stage, from `DnsInfo` up to `Profile`.
pub mod models;

/// Typed errors for configuration, knowledge base and integrity failures.
pub mod error;

/// Probes that touch the target directly (DNS, ports, HTTP, TLS).
pub mod scanner;

/// Passive intelligence from third-party sources.
pub mod osint;

/// Detection rules, known vulnerabilities and remediation advice.
pub mod knowledge_base;

/// Turns a profile into a bounded risk score.
pub mod risk;

/// Hash-chained audit log, evidence sealing and chain of custody.
pub mod evidence;

/// Runs the stages in order and assembles the profile.
pub mod profiler;
