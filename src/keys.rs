//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by NUL-separated string parts,
//! optionally followed by a big-endian id. This keeps keys lexicographically
//! ordered in RocksDB so that prefix scans answer the list/find queries.

use anyhow::Result;

const SEP: u8 = 0x00;

fn push_part(key: &mut Vec<u8>, part: &str) {
    key.extend_from_slice(part.as_bytes());
    key.push(SEP);
}

/// Reject parts that would break key framing.
pub fn check_part(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        anyhow::bail!("{} must not be empty", name);
    }
    if value.as_bytes().contains(&SEP) {
        anyhow::bail!("{} must not contain NUL bytes", name);
    }
    Ok(())
}

/// Encode a cursor key.
///
/// Format: byte 'C' + symbol + 0x00 + network + 0x00
pub fn encode_cursor_key(symbol: &str, network: &str) -> Vec<u8> {
    let mut key = cursor_symbol_prefix(symbol);
    push_part(&mut key, network);
    key
}

/// Prefix shared by every cursor of one symbol.
pub fn cursor_symbol_prefix(symbol: &str) -> Vec<u8> {
    let mut key = vec![b'C'];
    push_part(&mut key, symbol);
    key
}

/// Prefix shared by every cursor.
pub fn cursor_prefix() -> Vec<u8> {
    vec![b'C']
}

/// Encode a watch record key.
///
/// Format: byte 'W' + id (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_watch_key(id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'W');
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Encode a watch identity key, mapping to the watch id.
///
/// Format: byte 'K' + task_id + 0x00 + symbol + 0x00 + network + 0x00 + address + 0x00
pub fn encode_watch_identity_key(task_id: &str, symbol: &str, network: &str, address: &str) -> Vec<u8> {
    let mut key = vec![b'K'];
    push_part(&mut key, task_id);
    push_part(&mut key, symbol);
    push_part(&mut key, network);
    push_part(&mut key, address);
    key
}

/// Encode an address index key.
///
/// Format: byte 'A' + network + 0x00 + address + 0x00 + id (8 bytes, big-endian)
pub fn encode_address_index_key(network: &str, address: &str, id: u64) -> Vec<u8> {
    let mut key = address_index_prefix(network, address);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Prefix shared by every index entry for one (network, address).
pub fn address_index_prefix(network: &str, address: &str) -> Vec<u8> {
    let mut key = network_index_prefix(network);
    push_part(&mut key, address);
    key
}

/// Prefix shared by every address index entry on one network.
pub fn network_index_prefix(network: &str) -> Vec<u8> {
    let mut key = vec![b'A'];
    push_part(&mut key, network);
    key
}

/// Encode a task index key.
///
/// Format: byte 'T' + task_id + 0x00 + network + 0x00 + id (8 bytes, big-endian)
pub fn encode_task_index_key(task_id: &str, network: &str, id: u64) -> Vec<u8> {
    let mut key = task_index_prefix(task_id, network);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Prefix shared by every index entry for one (task_id, network).
pub fn task_index_prefix(task_id: &str, network: &str) -> Vec<u8> {
    let mut key = vec![b'T'];
    push_part(&mut key, task_id);
    push_part(&mut key, network);
    key
}

/// Decode the trailing id of an index key.
pub fn decode_index_id(key: &[u8]) -> Result<u64> {
    if key.len() < 9 {
        anyhow::bail!("Index key too short: {} bytes", key.len());
    }
    let tail: [u8; 8] = key[key.len() - 8..]
        .try_into()
        .map_err(|_| anyhow::anyhow!("Index key id must be 8 bytes"))?;
    Ok(u64::from_be_bytes(tail))
}

/// Decode the address part of an address index key.
///
/// Format: 'A' + network + 0x00 + address + 0x00 + id (8 bytes)
pub fn decode_index_address(key: &[u8]) -> Result<String> {
    if key.len() < 9 || key[0] != b'A' {
        anyhow::bail!("Not an address index key");
    }
    let body = &key[1..key.len() - 8];
    let mut parts = body.split(|b| *b == SEP);
    let _network = parts.next();
    let address = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("Address index key missing address part"))?;
    Ok(String::from_utf8(address.to_vec())?)
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
///
/// Meta IDs:
/// - 0x01: next watch id
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_key_encoding() {
        let key = encode_cursor_key("ETH", "mainnet");
        assert_eq!(key[0], b'C');
        assert_eq!(&key[1..], b"ETH\0mainnet\0");
        assert!(key.starts_with(&cursor_symbol_prefix("ETH")));
    }

    #[test]
    fn test_cursor_prefix_does_not_match_longer_symbol() {
        let key = encode_cursor_key("ETHW", "mainnet");
        assert!(!key.starts_with(&cursor_symbol_prefix("ETH")));
    }

    #[test]
    fn test_watch_key_encoding() {
        let key = encode_watch_key(42);
        assert_eq!(key.len(), 9);
        assert_eq!(key[0], b'W');
        assert_eq!(u64::from_be_bytes(key[1..9].try_into().unwrap()), 42);
    }

    #[test]
    fn test_address_index_roundtrip() {
        let key = encode_address_index_key("mainnet", "0xabc", 7);
        assert!(key.starts_with(&address_index_prefix("mainnet", "0xabc")));
        assert!(key.starts_with(&network_index_prefix("mainnet")));
        assert_eq!(decode_index_id(&key).unwrap(), 7);
        assert_eq!(decode_index_address(&key).unwrap(), "0xabc");
    }

    #[test]
    fn test_task_index_roundtrip() {
        let key = encode_task_index_key("task-1", "ropsten", 9);
        assert!(key.starts_with(&task_index_prefix("task-1", "ropsten")));
        assert_eq!(decode_index_id(&key).unwrap(), 9);
    }

    #[test]
    fn test_check_part() {
        assert!(check_part("symbol", "ETH").is_ok());
        assert!(check_part("symbol", "").is_err());
        assert!(check_part("symbol", "E\0TH").is_err());
    }

    #[test]
    fn test_meta_key_encoding() {
        let key = encode_meta_key(0x01);
        assert_eq!(key, vec![b'M', 0x01]);
    }
}
