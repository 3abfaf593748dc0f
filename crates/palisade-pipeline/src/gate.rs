//! L0 — network gateway: size limits, client-ip resolution against the
//! trusted-proxy list, and the salted ip hash.
//!
//! The raw ip exists only inside this module. Everything downstream —
//! rate limiting, the request log, the trace — sees the hash.

use std::net::IpAddr;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Trusted proxy matcher: plain addresses plus IPv4 CIDR blocks.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    exact: Vec<IpAddr>,
    v4_blocks: Vec<(u32, u8)>, // (network, prefix_len)
}

impl TrustedProxies {
    /// Parse config entries. Accepts both pre-split lists and entries that
    /// are themselves comma-separated (env-var form). Entries that parse
    /// as neither an address nor a v4 CIDR are skipped with a warning.
    pub fn parse(entries: &[String]) -> Self {
        let mut out = TrustedProxies::default();
        for entry in entries.iter().flat_map(|e| e.split(',')) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Ok(addr) = entry.parse::<IpAddr>() {
                out.exact.push(addr);
            } else if let Some(block) = parse_v4_cidr(entry) {
                out.v4_blocks.push(block);
            } else {
                tracing::warn!(entry, "unparseable trusted_proxies entry ignored");
            }
        }
        out
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        if self.exact.contains(addr) {
            return true;
        }
        if let IpAddr::V4(v4) = addr {
            let bits = u32::from(*v4);
            return self.v4_blocks.iter().any(|(net, prefix)| {
                let mask = if *prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
                bits & mask == net & mask
            });
        }
        false
    }
}

fn parse_v4_cidr(s: &str) -> Option<(u32, u8)> {
    let (addr, prefix) = s.split_once('/')?;
    let addr: std::net::Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    (prefix <= 32).then_some((u32::from(addr), prefix))
}

/// Resolve the client ip. Forwarded headers are honored only when the
/// socket peer is itself a trusted proxy — anything else could spoof the
/// chain to dodge rate limiting.
pub fn resolve_client_ip(
    peer: IpAddr,
    forwarded_for: Option<&str>,
    trusted: &TrustedProxies,
) -> IpAddr {
    if !trusted.contains(&peer) {
        return peer;
    }
    forwarded_for
        .and_then(|chain| {
            chain
                .split(',')
                .map(str::trim)
                .find_map(|part| part.parse::<IpAddr>().ok())
        })
        .unwrap_or(peer)
}

/// `hex(HMAC-SHA256(salt, ip))` — the only persistent identifier of a
/// request source anywhere in the system.
pub fn ip_hash(ip: &IpAddr, salt: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(ip.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
