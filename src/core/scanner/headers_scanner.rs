// src/core/scanner/headers_scanner.rs

use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The security headers every web response is checked for, with the risk
/// factor code raised when each one is absent.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("Strict-Transport-Security", "HEADERS_HSTS_MISSING"),
    ("Content-Security-Policy", "HEADERS_CSP_MISSING"),
    ("X-Frame-Options", "HEADERS_X_FRAME_OPTIONS_MISSING"),
    ("X-Content-Type-Options", "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING"),
    ("X-XSS-Protection", "HEADERS_X_XSS_PROTECTION_MISSING"),
];

/// Present and missing members of the security header set.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SecurityHeaders {
    pub present: BTreeMap<String, String>,
    pub missing: Vec<String>,
}

/// Reads one header, keeping non-UTF-8 values visible as a placeholder.
fn check_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?;
    match value.to_str() {
        Ok(s) => {
            debug!(header_name = name, value = s, "Header found.");
            Some(s.to_string())
        }
        Err(_) => {
            warn!(header_name = name, "Header found but contained invalid UTF-8.");
            Some("[Invalid UTF-8]".to_string())
        }
    }
}

pub fn collect_security_headers(headers: &HeaderMap) -> SecurityHeaders {
    let mut result = SecurityHeaders::default();
    for (name, _) in SECURITY_HEADERS {
        match check_header(headers, name) {
            Some(value) => {
                result.present.insert(name.to_string(), value);
            }
            None => result.missing.push(name.to_string()),
        }
    }
    debug!(missing = %result.missing.len(), "Security headers checked.");
    result
}

/// Risk factor code raised when `header` is missing.
pub fn missing_header_code(header: &str) -> Option<&'static str> {
    SECURITY_HEADERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(header))
        .map(|(_, code)| *code)
}

/// Flattens a header map; repeated headers are joined with ", ".
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("[Invalid UTF-8]");
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::knowledge_base::get_finding_detail;
    use reqwest::header::HeaderValue;

    #[test]
    fn present_and_missing_partition_the_fixed_set() {
        let mut headers = HeaderMap::new();
        headers.insert("strict-transport-security", HeaderValue::from_static("max-age=63072000"));
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));

        let result = collect_security_headers(&headers);
        assert_eq!(result.present.len(), 2);
        assert_eq!(result.present["Strict-Transport-Security"], "max-age=63072000");
        assert_eq!(
            result.missing,
            vec!["Content-Security-Policy", "X-Content-Type-Options", "X-XSS-Protection"]
        );
        assert_eq!(missing_header_code("content-security-policy"), Some("HEADERS_CSP_MISSING"));
        assert_eq!(missing_header_code("X-Powered-By"), None);
    }

    #[test]
    fn every_header_code_has_remediation() {
        for (_, code) in SECURITY_HEADERS {
            assert!(get_finding_detail(code).is_some(), "{code}");
        }
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        assert_eq!(flatten_headers(&headers)["set-cookie"], "a=1, b=2");
    }
}
