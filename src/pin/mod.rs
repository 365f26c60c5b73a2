//! PIN encryption
//!
//! PINs never travel in clear. Each one is sealed with the identity's PIN
//! session key together with an iteration counter that the service requires
//! to strictly increase, so a captured payload cannot be replayed.
//!
//! Payload layout: `base64url(nonce || AES-256-GCM(pin || iat_le || iteration_le))`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::Utc;
use std::sync::Mutex;
use thiserror::Error;

/// Number of digits in a PIN
pub const PIN_LENGTH: usize = 6;

/// Size of the PIN session key in bytes
pub const PIN_KEY_SIZE: usize = 32;

const NONCE_SIZE: usize = 12;

/// Errors related to PIN handling
#[derive(Error, Debug)]
pub enum PinError {
    #[error("PIN must be exactly 6 ASCII digits")]
    InvalidPinFormat,
    #[error("No PIN session key configured for this identity")]
    MissingPinToken,
    #[error("Invalid PIN session key: {0}")]
    InvalidPinToken(String),
    #[error("PIN encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("PIN decryption failed")]
    DecryptionFailed,
}

/// Check the PIN pattern before any network round trip
pub fn validate_pin_pattern(pin: &str) -> Result<(), PinError> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(PinError::InvalidPinFormat)
    }
}

/// Decode a base64 PIN session key
pub fn decode_pin_token(pin_token: &str) -> Result<[u8; PIN_KEY_SIZE], PinError> {
    let bytes = STANDARD
        .decode(pin_token.trim())
        .map_err(|e| PinError::InvalidPinToken(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| {
        PinError::InvalidPinToken(format!("expected {} bytes, got {}", PIN_KEY_SIZE, bytes.len()))
    })
}

/// Encrypts PINs for one identity.
///
/// The counter lock is held across the whole encryption so concurrent
/// callers observe counters in the order their payloads were produced.
pub struct PinCipher {
    key: [u8; PIN_KEY_SIZE],
    counter: Mutex<u64>,
}

impl PinCipher {
    /// Start counting at `start`
    pub fn new(key: [u8; PIN_KEY_SIZE], start: u64) -> Self {
        Self {
            key,
            counter: Mutex::new(start),
        }
    }

    /// Build from a keystore `pin_token`, seeding the counter from the clock
    /// so restarts keep moving forward
    pub fn from_pin_token(pin_token: &str) -> Result<Self, PinError> {
        let key = decode_pin_token(pin_token)?;
        let start = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
        Ok(Self::new(key, start))
    }

    /// The counter value the next encryption will use
    pub fn next_iteration(&self) -> u64 {
        match self.counter.lock() {
            Ok(counter) => *counter,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Encrypt a PIN into a one-time payload
    pub fn encrypt(&self, pin: &str) -> Result<String, PinError> {
        validate_pin_pattern(pin)?;

        let mut counter = self
            .counter
            .lock()
            .map_err(|_| PinError::EncryptionFailed("counter lock poisoned".to_string()))?;
        let iteration = *counter;
        *counter = iteration
            .checked_add(1)
            .ok_or_else(|| PinError::EncryptionFailed("iteration counter exhausted".to_string()))?;

        let mut plaintext = Vec::with_capacity(PIN_LENGTH + 16);
        plaintext.extend_from_slice(pin.as_bytes());
        plaintext.extend_from_slice(&(Utc::now().timestamp() as u64).to_le_bytes());
        plaintext.extend_from_slice(&iteration.to_le_bytes());

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| PinError::EncryptionFailed(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(payload))
    }
}

impl std::fmt::Debug for PinCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinCipher")
            .field("next_iteration", &self.next_iteration())
            .finish_non_exhaustive()
    }
}

/// A decrypted PIN payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedPin {
    pub pin: String,
    pub issued_at: u64,
    pub iteration: u64,
}

/// Decrypt a payload produced by [`PinCipher::encrypt`]
pub fn open_pin(key: &[u8; PIN_KEY_SIZE], payload: &str) -> Result<OpenedPin, PinError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| PinError::DecryptionFailed)?;
    if bytes.len() < NONCE_SIZE {
        return Err(PinError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| PinError::DecryptionFailed)?;

    if plaintext.len() != PIN_LENGTH + 16 {
        return Err(PinError::DecryptionFailed);
    }

    let (pin, rest) = plaintext.split_at(PIN_LENGTH);
    let (issued_at, iteration) = rest.split_at(8);
    let to_u64 = |b: &[u8]| -> Result<u64, PinError> {
        let arr: [u8; 8] = b.try_into().map_err(|_| PinError::DecryptionFailed)?;
        Ok(u64::from_le_bytes(arr))
    };

    Ok(OpenedPin {
        pin: String::from_utf8(pin.to_vec()).map_err(|_| PinError::DecryptionFailed)?,
        issued_at: to_u64(issued_at)?,
        iteration: to_u64(iteration)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_pattern() {
        assert!(validate_pin_pattern("123456").is_ok());
        assert!(validate_pin_pattern("000000").is_ok());

        for bad in ["12345", "1234567", "1a2b3c", "", "12 456", "١٢٣٤٥٦"] {
            assert!(
                matches!(validate_pin_pattern(bad), Err(PinError::InvalidPinFormat)),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_counter_increments_by_one() {
        let cipher = PinCipher::new([9u8; PIN_KEY_SIZE], 41);
        assert_eq!(cipher.next_iteration(), 41);

        cipher.encrypt("123456").unwrap();
        assert_eq!(cipher.next_iteration(), 42);
        cipher.encrypt("123456").unwrap();
        assert_eq!(cipher.next_iteration(), 43);
    }

    #[test]
    fn test_invalid_pin_does_not_consume_counter() {
        let cipher = PinCipher::new([9u8; PIN_KEY_SIZE], 7);
        assert!(cipher.encrypt("12345").is_err());
        assert_eq!(cipher.next_iteration(), 7);
    }

    #[test]
    fn test_consecutive_payloads_differ() {
        let cipher = PinCipher::new([3u8; PIN_KEY_SIZE], 0);
        let a = cipher.encrypt("654321").unwrap();
        let b = cipher.encrypt("654321").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_recovers_pin_and_iteration() {
        let key = [5u8; PIN_KEY_SIZE];
        let cipher = PinCipher::new(key, 1000);
        let payload = cipher.encrypt("246810").unwrap();

        let opened = open_pin(&key, &payload).unwrap();
        assert_eq!(opened.pin, "246810");
        assert_eq!(opened.iteration, 1000);

        assert!(matches!(
            open_pin(&[6u8; PIN_KEY_SIZE], &payload),
            Err(PinError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_pin_token_decoding() {
        let token = STANDARD.encode([1u8; PIN_KEY_SIZE]);
        assert!(PinCipher::from_pin_token(&token).is_ok());
        assert!(matches!(
            PinCipher::from_pin_token(&STANDARD.encode([1u8; 16])),
            Err(PinError::InvalidPinToken(_))
        ));
    }

    #[test]
    fn test_concurrent_encryption_never_reuses_counter() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let key = [8u8; PIN_KEY_SIZE];
        let cipher = Arc::new(PinCipher::new(key, 0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cipher = cipher.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| cipher.encrypt("111111").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for payload in handle.join().unwrap() {
                assert!(seen.insert(open_pin(&key, &payload).unwrap().iteration));
            }
        }
        assert_eq!(seen.len(), 100);
        assert_eq!(cipher.next_iteration(), 100);
    }
}
