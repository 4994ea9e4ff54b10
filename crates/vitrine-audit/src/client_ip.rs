//! Client address and user-agent extraction.
//!
//! Address policy, in order:
//!
//! 1. the **last** entry of `X-Forwarded-For` (the hop appended by our own
//!    reverse proxy; earlier entries are client-supplied and spoofable),
//! 2. `X-Real-IP`,
//! 3. the transport peer address.
//!
//! The chosen candidate must parse as a strict IPv4 or IPv6 literal, otherwise
//! the result is [`UNKNOWN_ADDRESS`]. A bad candidate does not fall through to
//! the next source.

use http::HeaderMap;
use std::net::IpAddr;

/// Sentinel for a missing or invalid client address.
pub const UNKNOWN_ADDRESS: &str = "unknown";

pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const REAL_IP: &str = "x-real-ip";

/// Resolve the client address for audit purposes.
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let candidate = last_forwarded_for(headers)
        .or_else(|| header_value(headers, REAL_IP))
        .or_else(|| peer.map(|ip| ip.to_string()));

    match candidate {
        Some(candidate) => validate_ip(&candidate),
        None => UNKNOWN_ADDRESS.to_string(),
    }
}

/// Return `candidate` in canonical form if it is an IP literal, else the sentinel.
pub fn validate_ip(candidate: &str) -> String {
    candidate
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| UNKNOWN_ADDRESS.to_string())
}

/// Truncate `user_agent` to at most `max_len` characters.
pub fn truncate_user_agent(user_agent: &str, max_len: usize) -> String {
    match user_agent.char_indices().nth(max_len) {
        Some((byte_idx, _)) => user_agent[..byte_idx].to_string(),
        None => user_agent.to_string(),
    }
}

fn last_forwarded_for(headers: &HeaderMap) -> Option<String> {
    // Multiple header lines form one logical list; the last line holds the last hop.
    let last_line = headers
        .get_all(FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .last()?;

    last_line
        .rsplit(',')
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .map(str::to_string)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
