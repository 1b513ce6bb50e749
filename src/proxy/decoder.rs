//! Per-protocol descriptor decoding
//!
//! Extracts the connection target (host, port) from a descriptor URI.
//! Only the fields needed for a TCP reachability probe are decoded; the
//! rest of the descriptor stays opaque.

use crate::error::{Error, Result};
use crate::proxy::models::{Descriptor, Endpoint, Protocol};
use base64::prelude::*;

/// Decoder for the supported descriptor formats
pub struct DescriptorDecoder;

impl DescriptorDecoder {
    /// Decode the connection target of a descriptor
    ///
    /// A descriptor that cannot be decoded is malformed; the caller should
    /// report it as invalid without attempting any network call.
    pub fn decode(descriptor: &Descriptor) -> Result<Endpoint> {
        match descriptor.protocol {
            Protocol::Vmess => Self::decode_vmess(&descriptor.uri),
            Protocol::Vless => Self::decode_authority(&descriptor.uri, Protocol::Vless),
            Protocol::Trojan => Self::decode_authority(&descriptor.uri, Protocol::Trojan),
            Protocol::Shadowsocks => Self::decode_shadowsocks(&descriptor.uri),
        }
    }

    /// vmess descriptors carry a base64-encoded JSON object; the server
    /// address sits under "add" (or "address") and the port under "port"
    fn decode_vmess(uri: &str) -> Result<Endpoint> {
        let encoded = uri.trim_start_matches(Protocol::Vmess.prefix());

        let decoded = decode_base64_lenient(encoded)
            .ok_or_else(|| Error::validation("invalid vmess descriptor: bad base64"))?;
        let json: serde_json::Value = serde_json::from_slice(&decoded)
            .map_err(|_| Error::validation("invalid vmess descriptor: payload is not JSON"))?;

        let host = json
            .get("add")
            .and_then(|v| v.as_str())
            .or_else(|| json.get("address").and_then(|v| v.as_str()))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::validation("invalid vmess descriptor: missing address"))?;

        // The port field appears both as a number and as a string in the wild.
        let port = match json.get("port") {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        let port = port
            .filter(|p| (1..=u64::from(u16::MAX)).contains(p))
            .ok_or_else(|| Error::validation("invalid vmess descriptor: bad port"))?;

        Ok(Endpoint::new(host, port as u16))
    }

    /// vless:// and trojan:// descriptors are URI-shaped:
    /// `scheme://credential@host:port?params#label`
    fn decode_authority(uri: &str, protocol: Protocol) -> Result<Endpoint> {
        let rest = uri.trim_start_matches(protocol.prefix());
        let after_at = rest.split('@').nth(1).ok_or_else(|| {
            Error::validation(format!("invalid {protocol} descriptor: missing credential"))
        })?;
        let host_port = after_at.split(['?', '#']).next().unwrap_or("");
        Self::split_host_port(host_port, protocol)
    }

    /// ss:// descriptors come as `base64(method:password)@host:port` or as
    /// a fully base64-encoded `method:password@host:port`
    fn decode_shadowsocks(uri: &str) -> Result<Endpoint> {
        let rest = uri.trim_start_matches(Protocol::Shadowsocks.prefix());
        let rest = rest.split(['?', '#']).next().unwrap_or("");

        if let Some(after_at) = rest.split('@').nth(1) {
            return Self::split_host_port(after_at, Protocol::Shadowsocks);
        }

        let decoded = decode_base64_lenient(rest)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| Error::validation("invalid ss descriptor: bad base64"))?;
        let after_at = decoded
            .split('@')
            .nth(1)
            .ok_or_else(|| Error::validation("invalid ss descriptor: missing host"))?;
        Self::split_host_port(after_at, Protocol::Shadowsocks)
    }

    fn split_host_port(value: &str, protocol: Protocol) -> Result<Endpoint> {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::validation(format!(
                "invalid {protocol} descriptor: expected host:port"
            )));
        }

        let host = parts[0];
        if host.is_empty() {
            return Err(Error::validation(format!(
                "invalid {protocol} descriptor: empty host"
            )));
        }

        let port: u16 = parts[1]
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::validation(format!("invalid {protocol} descriptor: bad port")))?;

        Ok(Endpoint::new(host, port))
    }
}

/// Decode base64 tolerating missing padding and the URL-safe alphabet
fn decode_base64_lenient(encoded: &str) -> Option<Vec<u8>> {
    let trimmed = encoded.trim_end_matches('=');
    let padding = (4 - trimmed.len() % 4) % 4;
    let padded = format!("{}{}", trimmed, "=".repeat(padding));

    BASE64_STANDARD
        .decode(&padded)
        .or_else(|_| BASE64_URL_SAFE.decode(&padded))
        .ok()
}
