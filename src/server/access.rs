// Access control: IP allow-listing and HTTP basic credentials

use super::RequestInfo;
use crate::config::AccessConfig;
use crate::error::DenyReason;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::warn;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr};

/// Headers consulted for the client address, in order, when behind a proxy
const PROXY_HEADERS: &[&str] = &[
    "Client-IP",
    "X-Forwarded-For",
    "X-Forwarded",
    "X-Cluster-Client-IP",
    "Forwarded-For",
    "Forwarded",
];

const SHA256_MARKER: &str = "sha256:";

pub const FORBIDDEN_BODY: &str = "<!DOCTYPE html>\n<html><head><title>403 Forbidden</title></head>\n\
<body><h1>Forbidden</h1><p>Your address is not allowed to use this mirror.</p></body></html>\n";

pub const UNAUTHORIZED_BODY: &str = "<!DOCTYPE html>\n<html><head><title>401 Unauthorized</title></head>\n\
<body><h1>Unauthorized</h1><p>Valid credentials are required to use this mirror.</p></body></html>\n";

/// Per-request verdict, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub client_ip: String,
    pub denied: Option<DenyReason>,
}

impl AccessDecision {
    pub fn allowed(&self) -> bool {
        self.denied.is_none()
    }

    pub fn reason(&self) -> &'static str {
        self.denied.map_or("ok", |r| r.as_str())
    }
}

/// One allow-list entry, parsed once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowEntry {
    Exact(IpAddr),
    Cidr { network: u32, mask: u32 },
    /// Kept so a typo never widens access; matches nothing
    Malformed(String),
}

impl AllowEntry {
    fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        match entry.split_once('/') {
            Some((addr, bits)) => match (addr.parse::<Ipv4Addr>(), bits.parse::<u32>()) {
                (Ok(addr), Ok(bits)) if bits <= 32 => {
                    let mask = prefix_mask(bits);
                    AllowEntry::Cidr {
                        network: u32::from(addr) & mask,
                        mask,
                    }
                }
                _ => AllowEntry::Malformed(entry.to_string()),
            },
            None => match entry.parse::<IpAddr>() {
                Ok(ip) => AllowEntry::Exact(ip),
                Err(_) => AllowEntry::Malformed(entry.to_string()),
            },
        }
    }

    fn matches(&self, ip: &IpAddr) -> bool {
        match (self, ip) {
            (AllowEntry::Exact(allowed), ip) => allowed == ip,
            (AllowEntry::Cidr { network, mask }, IpAddr::V4(v4)) => {
                u32::from(*v4) & mask == *network
            }
            _ => false,
        }
    }
}

fn prefix_mask(bits: u32) -> u32 {
    if bits == 0 {
        0
    } else {
        u32::MAX << (32 - bits)
    }
}

/// True when `ip` equals `entry` or falls inside it as an IPv4 CIDR block
pub fn ip_matches(ip: &str, entry: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(ip) => AllowEntry::parse(entry).matches(&ip),
        Err(_) => false,
    }
}

/// Pull an address out of one proxy header value
fn address_from_header(value: &str) -> Option<IpAddr> {
    let first = value.split(',').next()?.trim();
    // RFC 7239 style: for=1.2.3.4;proto=https
    let first = first
        .split(';')
        .find_map(|part| {
            let part = part.trim();
            part.get(..4)
                .filter(|k| k.eq_ignore_ascii_case("for="))
                .map(|_| &part[4..])
        })
        .unwrap_or(first);
    let first = first.trim_matches('"');
    first
        .parse::<IpAddr>()
        .ok()
        .or_else(|| first.parse::<std::net::SocketAddr>().ok().map(|s| s.ip()))
}

/// Verify a password against a stored credential
///
/// `$2..` values are bcrypt hashes and `sha256:<hex>` values are SHA-256
/// digests. Anything else is a plaintext secret, compared only when
/// plaintext storage is allowed.
pub fn verify_password(password: &str, stored: &str, allow_plaintext: bool) -> bool {
    if stored.starts_with("$2") {
        return bcrypt::verify(password, stored).unwrap_or(false);
    }
    if let Some(expected) = stored.strip_prefix(SHA256_MARKER) {
        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        return constant_time_eq(digest.as_bytes(), expected.trim().to_ascii_lowercase().as_bytes());
    }
    allow_plaintext && constant_time_eq(password.as_bytes(), stored.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Decode a `Basic` authorization header into (user, password)
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, payload) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

pub struct AccessControl {
    config: AccessConfig,
    allow_list: Vec<AllowEntry>,
}

impl AccessControl {
    pub fn new(config: &AccessConfig) -> Self {
        let allow_list: Vec<AllowEntry> = config
            .allowed_ips
            .iter()
            .map(|e| AllowEntry::parse(e))
            .collect();
        for entry in &allow_list {
            if let AllowEntry::Malformed(raw) = entry {
                warn!("Ignoring malformed allow-list entry '{}'", raw);
            }
        }
        let plaintext = config
            .basic_auth
            .users
            .values()
            .filter(|v| !v.starts_with("$2") && !v.starts_with(SHA256_MARKER))
            .count();
        if config.basic_auth.enabled && plaintext > 0 {
            if config.basic_auth.allow_plaintext {
                warn!(
                    "{} basic-auth credential(s) stored in plaintext; consider bcrypt or sha256: hashes",
                    plaintext
                );
            } else {
                warn!(
                    "{} plaintext basic-auth credential(s) will never match (allow_plaintext = false)",
                    plaintext
                );
            }
        }
        Self {
            config: config.clone(),
            allow_list,
        }
    }

    pub fn realm(&self) -> &str {
        &self.config.realm
    }

    /// Resolve the address the request should be judged by
    pub fn client_ip(&self, request: &RequestInfo) -> String {
        if self.config.trust_proxy_headers {
            for name in PROXY_HEADERS {
                if let Some(ip) = request.header(name).and_then(address_from_header) {
                    return ip.to_string();
                }
            }
        }
        request
            .remote_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn ip_allowed(&self, ip: &str) -> bool {
        if self.allow_list.is_empty() {
            return true;
        }
        match ip.parse::<IpAddr>() {
            Ok(ip) => self.allow_list.iter().any(|entry| entry.matches(&ip)),
            Err(_) => false,
        }
    }

    fn credentials_required(&self) -> bool {
        self.config.basic_auth.enabled && !self.config.basic_auth.users.is_empty()
    }

    fn check_credentials(&self, request: &RequestInfo) -> Result<(), DenyReason> {
        let Some((user, password)) = request.header("Authorization").and_then(parse_basic_auth)
        else {
            return Err(DenyReason::AuthRequired);
        };
        match self.config.basic_auth.users.get(&user) {
            Some(stored)
                if verify_password(&password, stored, self.config.basic_auth.allow_plaintext) =>
            {
                Ok(())
            }
            _ => Err(DenyReason::AuthFailed),
        }
    }

    /// Judge a request and log any denial
    pub fn check(&self, request: &RequestInfo) -> AccessDecision {
        let client_ip = self.client_ip(request);
        let denied = self.evaluate(request, &client_ip).err();

        if let Some(reason) = denied {
            warn!(
                target: "pkgmirror::access",
                "ip={} method={} path={} reason={}",
                client_ip, request.method, request.path, reason
            );
        }
        AccessDecision { client_ip, denied }
    }

    fn evaluate(&self, request: &RequestInfo, client_ip: &str) -> Result<(), DenyReason> {
        if !self.config.enabled {
            return Ok(());
        }
        if !self.ip_allowed(client_ip) {
            return Err(DenyReason::IpDenied);
        }
        if self.credentials_required() {
            self.check_credentials(request)?;
        }
        Ok(())
    }
}
