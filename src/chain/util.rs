//! Pure chain utilities: format validation, unit conversion, and oracle
//! attestation signature checks.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::types::{PlatformError, Result};

/// Wei per ether
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Validate a 0x-prefixed 20-byte hex address
pub fn is_address(s: &str) -> bool {
    let Some(hex_part) = s.strip_prefix("0x") else {
        return false;
    };
    hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate a 0x-prefixed 32-byte transaction hash
pub fn is_tx_hash(s: &str) -> bool {
    let Some(hex_part) = s.strip_prefix("0x") else {
        return false;
    };
    hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Convert wei to ether as a display value
pub fn wei_to_ether(wei: u128) -> f64 {
    wei as f64 / WEI_PER_ETHER as f64
}

/// Convert ether to wei. Errors on negative or non-finite input.
pub fn ether_to_wei(ether: f64) -> Result<u128> {
    if !ether.is_finite() || ether < 0.0 {
        return Err(PlatformError::BadRequest(format!(
            "Invalid ether amount: {}",
            ether
        )));
    }
    Ok((ether * WEI_PER_ETHER as f64) as u128)
}

/// Verify an ed25519 signature from the oracle signing identity over a
/// message. Key and signature arrive hex-encoded.
pub fn verify_oracle_signature(
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<bool> {
    let key_bytes = hex::decode(public_key_hex.trim_start_matches("0x"))
        .map_err(|e| PlatformError::BadRequest(format!("Invalid public key hex: {}", e)))?;
    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| PlatformError::BadRequest("Public key must be 32 bytes".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| PlatformError::BadRequest(format!("Invalid public key: {}", e)))?;

    let sig_bytes = hex::decode(signature_hex.trim_start_matches("0x"))
        .map_err(|e| PlatformError::BadRequest(format!("Invalid signature hex: {}", e)))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| PlatformError::BadRequest("Signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    Ok(verifying_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn test_is_address() {
        assert!(is_address("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(is_address("0x0000000000000000000000000000000000000000"));
        assert!(!is_address("52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_address("0x1234"));
        assert!(!is_address("0xZZ08400098527886E0F7030069857D2E4169EE7a"));
    }

    #[test]
    fn test_is_tx_hash() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert!(is_tx_hash(&hash));
        assert!(!is_tx_hash(&hash[..60]));
        assert!(!is_tx_hash(&"ab".repeat(32)));
    }

    #[test]
    fn test_wei_ether_conversion() {
        assert_eq!(wei_to_ether(WEI_PER_ETHER), 1.0);
        assert_eq!(wei_to_ether(WEI_PER_ETHER / 2), 0.5);
        assert_eq!(ether_to_wei(1.0).unwrap(), WEI_PER_ETHER);
        assert_eq!(ether_to_wei(0.0).unwrap(), 0);
        assert!(ether_to_wei(-1.0).is_err());
        assert!(ether_to_wei(f64::NAN).is_err());
    }

    #[test]
    fn test_verify_oracle_signature() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let public_hex = hex::encode(signing_key.verifying_key().to_bytes());

        let message = b"milestone:64f000000000000000000001:verified";
        let signature = signing_key.sign(message);
        let sig_hex = hex::encode(signature.to_bytes());

        assert!(verify_oracle_signature(&public_hex, message, &sig_hex).unwrap());
        assert!(!verify_oracle_signature(&public_hex, b"tampered", &sig_hex).unwrap());
        assert!(verify_oracle_signature("zz", message, &sig_hex).is_err());
    }
}
