//! Connection metadata header block
//!
//! Sent once right after the transport session is established and before any
//! framed traffic: `Key: value` lines, each terminated by CRLF, closed by an
//! empty line. Over WebSocket the same pairs travel as extra upgrade headers.
//! The shared secret is a static credential, not a cryptographic handshake.

use std::fmt;

/// Default key prefix understood by the deployed server
pub const DEFAULT_HEADER_PREFIX: &str = "CO3006";

const CRLF: &str = "\r\n";

/// Identity announced to the server when a session opens
#[derive(Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub prefix: String,
    /// Hardware address or configured device name
    pub device_id: String,
    /// Static shared secret
    pub auth_key: String,
    /// Name of the joined network
    pub network: String,
    /// Locally assigned address
    pub local_address: String,
}

impl SessionMetadata {
    /// Ordered `(key, value)` pairs
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        vec![
            (self.key("Name"), self.device_id.clone()),
            (self.key("Auth"), self.auth_key.clone()),
            (self.key("WiFi"), self.network.clone()),
            (self.key("Local-IP"), self.local_address.clone()),
        ]
    }

    /// Raw header block for stream transports
    pub fn to_header_block(&self) -> String {
        let mut block = String::new();
        for (key, value) in self.header_pairs() {
            block.push_str(&key);
            block.push_str(": ");
            block.push_str(&sanitize_value(&value));
            block.push_str(CRLF);
        }
        block.push_str(CRLF);
        block
    }

    fn key(&self, name: &str) -> String {
        format!("{}-{}", self.prefix, name)
    }
}

impl fmt::Debug for SessionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMetadata")
            .field("prefix", &self.prefix)
            .field("device_id", &self.device_id)
            .field("auth_key", &"***")
            .field("network", &self.network)
            .field("local_address", &self.local_address)
            .finish()
    }
}

/// Parse a header block back into pairs. Stops at the first empty line.
pub fn parse_header_block(block: &str) -> Vec<(String, String)> {
    block
        .split(CRLF)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

// A value must not be able to end its line early
fn sanitize_value(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SessionMetadata {
        SessionMetadata {
            prefix: DEFAULT_HEADER_PREFIX.to_string(),
            device_id: "5C:CF:7F:00:11:22".to_string(),
            auth_key: "key-16888888".to_string(),
            network: "greenhouse".to_string(),
            local_address: "192.168.4.20".to_string(),
        }
    }

    #[test]
    fn test_header_block_layout() {
        let block = metadata().to_header_block();
        assert_eq!(
            block,
            "CO3006-Name: 5C:CF:7F:00:11:22\r\n\
             CO3006-Auth: key-16888888\r\n\
             CO3006-WiFi: greenhouse\r\n\
             CO3006-Local-IP: 192.168.4.20\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_header_block_parses_back() {
        let pairs = parse_header_block(&metadata().to_header_block());
        assert_eq!(pairs, metadata().header_pairs());
    }

    #[test]
    fn test_values_cannot_inject_lines() {
        let mut meta = metadata();
        meta.network = "evil\r\nCO3006-Auth: forged".to_string();
        let pairs = parse_header_block(&meta.to_header_block());
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[2].1, "evilCO3006-Auth: forged");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", metadata());
        assert!(!debug.contains("key-16888888"));
        assert!(debug.contains("greenhouse"));
    }
}
