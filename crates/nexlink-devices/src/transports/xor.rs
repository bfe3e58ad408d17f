/*!
 * Autokey-XOR cipher.
 *
 * The reference obfuscation scheme used by the oldest device firmwares:
 * each byte is XORed with the previous wire byte, starting from a fixed
 * seed. It is symmetric per message and carries no session state.
 */
use crate::transport::Cipher;

/// Seed byte shared by every device speaking the XOR scheme
const DEFAULT_SEED: u8 = 0xAB;

/// Autokey-XOR message cipher
#[derive(Debug, Clone)]
pub struct XorCipher {
    seed: u8,
}

impl XorCipher {
    /// Create a cipher with the standard seed
    pub fn new() -> Self {
        Self { seed: DEFAULT_SEED }
    }

    /// Create a cipher with a custom seed
    pub fn with_seed(seed: u8) -> Self {
        Self { seed }
    }
}

impl Default for XorCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl Cipher for XorCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut key = self.seed;
        plaintext
            .iter()
            .map(|&b| {
                let c = b ^ key;
                key = c;
                c
            })
            .collect()
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        let mut key = self.seed;
        ciphertext
            .iter()
            .map(|&c| {
                let b = c ^ key;
                key = c;
                b
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = XorCipher::new();
        let plaintext = br#"{"system":{"get_sysinfo":{}}}"#;
        let wire = cipher.encrypt(plaintext);
        assert_ne!(wire, plaintext.to_vec());
        assert_eq!(cipher.decrypt(&wire), plaintext.to_vec());
    }

    #[test]
    fn test_empty_message() {
        let cipher = XorCipher::new();
        assert!(cipher.encrypt(&[]).is_empty());
        assert!(cipher.decrypt(&[]).is_empty());
    }

    #[test]
    fn test_custom_seed_differs() {
        let a = XorCipher::new();
        let b = XorCipher::with_seed(0x2A);
        let plaintext = b"hello";
        assert_ne!(a.encrypt(plaintext), b.encrypt(plaintext));
        assert_eq!(b.decrypt(&b.encrypt(plaintext)), plaintext.to_vec());
    }
}
