//! Minimal contract ABI encoding
//!
//! The subsidy contract surface is three functions taking unsigned
//! integers, so the encoding is Keccak-256 selectors plus 32-byte
//! big-endian words. Event topics are the Keccak-256 of the event
//! signature.

use sha3::{Digest, Keccak256};

/// Keccak-256 of arbitrary bytes
pub fn keccak(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// 4-byte function selector for a Solidity signature like
/// `releaseSubsidy(uint256,uint256,uint256)`
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Event topic0 for a signature like `SubsidyReleased(uint256,uint256,uint256)`
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak(signature.as_bytes())))
}

/// One 32-byte big-endian ABI word from an unsigned integer
pub fn encode_u256(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Calldata: selector followed by one word per argument
pub fn encode_call(signature: &str, args: &[u128]) -> String {
    let mut data = Vec::with_capacity(4 + args.len() * 32);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(&encode_u256(*arg));
    }
    format!("0x{}", hex::encode(data))
}

/// Decode consecutive 32-byte words from hex event data (with or without
/// the 0x prefix). Words wider than u128 are truncated from the left,
/// which is fine for the contract's id/amount ranges.
pub fn decode_words(data: &str) -> Vec<u128> {
    let raw = data.trim_start_matches("0x");
    let bytes = match hex::decode(raw) {
        Ok(b) => b,
        Err(_) => return Vec::new(),
    };

    bytes
        .chunks_exact(32)
        .map(|word| {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&word[16..32]);
            u128::from_be_bytes(buf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selector() {
        // keccak("transfer(address,uint256)") starts with a9059cbb
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn test_encode_u256() {
        let word = encode_u256(255);
        assert_eq!(word[31], 0xff);
        assert!(word[..31].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_call_layout() {
        let call = encode_call("releaseSubsidy(uint256,uint256,uint256)", &[1, 2, 3]);
        // 0x + 4 selector bytes + 3 * 32 words, hex-encoded
        assert_eq!(call.len(), 2 + 8 + 3 * 64);
        assert!(call.starts_with("0x"));
    }

    #[test]
    fn test_decode_words_roundtrip() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_u256(7));
        data.extend_from_slice(&encode_u256(25_000));
        let hex_data = format!("0x{}", hex::encode(data));

        assert_eq!(decode_words(&hex_data), vec![7, 25_000]);
    }

    #[test]
    fn test_decode_words_bad_input() {
        assert!(decode_words("0xzznotreal").is_empty());
        assert!(decode_words("0x").is_empty());
    }
}
