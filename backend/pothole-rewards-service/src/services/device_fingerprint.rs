use sha2::{Digest, Sha256};

/// Stable device id derived from client signals: SHA-256 hex of `"<ua>:<ip>"`
pub fn derive_device_id(user_agent: Option<&str>, client_ip: Option<&str>) -> String {
    let raw = format!("{}:{}", user_agent.unwrap_or(""), client_ip.unwrap_or(""));
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// First hop of `X-Forwarded-For`, falling back to the peer address
pub fn client_ip(forwarded_for: Option<&str>, peer_addr: Option<&str>) -> Option<String> {
    forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or(peer_addr)
        .map(str::to_string)
}
