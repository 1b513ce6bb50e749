//! Descriptor and health-check data models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol tag enumeration for proxy descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    #[serde(rename = "ss")]
    Shadowsocks,
}

impl Protocol {
    /// Every supported protocol, in scan order
    pub const ALL: [Protocol; 4] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Trojan,
        Protocol::Shadowsocks,
    ];

    /// URI scheme prefix carried by descriptors of this protocol
    pub fn prefix(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess://",
            Protocol::Vless => "vless://",
            Protocol::Trojan => "trojan://",
            Protocol::Shadowsocks => "ss://",
        }
    }

    /// Detect the protocol of a descriptor line by its scheme prefix
    pub fn from_prefix(line: &str) -> Option<Protocol> {
        Protocol::ALL
            .iter()
            .copied()
            .find(|p| line.starts_with(p.prefix()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Vmess => write!(f, "vmess"),
            Protocol::Vless => write!(f, "vless"),
            Protocol::Trojan => write!(f, "trojan"),
            Protocol::Shadowsocks => write!(f, "ss"),
        }
    }
}

/// One candidate proxy endpoint: an opaque connection URI tagged with its
/// protocol
///
/// Identity for deduplication is the trimmed URI string. Two descriptors
/// that decode to the same endpoint but differ in encoding stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    pub uri: String,
    pub protocol: Protocol,
}

impl Descriptor {
    pub fn new(uri: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            uri: uri.into(),
            protocol,
        }
    }

    /// Parse a single line into a descriptor
    ///
    /// Surrounding whitespace is normalized away; lines without a known
    /// scheme prefix yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let protocol = Protocol::from_prefix(trimmed)?;
        Some(Self {
            uri: trimmed.to_string(),
            protocol,
        })
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Decoded connection target of a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Health probe outcome classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unreachable,
    Invalid,
    Timeout,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
            HealthStatus::Invalid => write!(f, "invalid"),
            HealthStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Verdict for one descriptor, produced exactly once per probing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub descriptor: Descriptor,
    pub status: HealthStatus,
    /// Connect latency, present only for healthy endpoints
    pub latency_ms: Option<u64>,
    /// Quality score in [0, 100] derived from latency
    pub quality_score: u8,
    /// Failure detail for unreachable/invalid verdicts
    pub detail: Option<String>,
}

impl HealthVerdict {
    pub fn healthy(descriptor: Descriptor, latency_ms: u64) -> Self {
        Self {
            descriptor,
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            quality_score: quality_score(latency_ms),
            detail: None,
        }
    }

    pub fn unreachable(descriptor: Descriptor, detail: String) -> Self {
        Self {
            descriptor,
            status: HealthStatus::Unreachable,
            latency_ms: None,
            quality_score: 10,
            detail: Some(detail),
        }
    }

    pub fn timeout(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            status: HealthStatus::Timeout,
            latency_ms: None,
            quality_score: 10,
            detail: None,
        }
    }

    pub fn invalid(descriptor: Descriptor, detail: String) -> Self {
        Self {
            descriptor,
            status: HealthStatus::Invalid,
            latency_ms: None,
            quality_score: 0,
            detail: Some(detail),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Quality score from connect latency
///
/// Fixed thresholds: under 100ms scores 100; 100-300ms interpolates
/// linearly from 80 down to 60; anything slower scores 10.
pub fn quality_score(latency_ms: u64) -> u8 {
    if latency_ms < 100 {
        100
    } else if latency_ms <= 300 {
        let score = 80.0 - (latency_ms as f64 - 100.0) * (20.0 / 200.0);
        score.clamp(60.0, 80.0).round() as u8
    } else {
        10
    }
}
