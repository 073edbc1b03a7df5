//! Secure random bytes from the host.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Largest number of bytes requested from the host source in one call.
pub const MAX_CHUNK: usize = 65536;

/// Largest total request accepted by [`RandomSource::get_random_bytes`].
pub const MAX_REQUEST: u64 = 1 << 24;

#[derive(Debug, Error)]
pub enum RandomError {
    #[error("requested {requested} random bytes, limit is {limit}")]
    TooLarge { requested: u64, limit: u64 },

    #[error("host entropy source failed: {0}")]
    Entropy(String),
}

/// Cryptographically secure randomness from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSource;

impl RandomSource {
    pub fn new() -> Self {
        Self
    }

    pub fn get_random_bytes(&self, len: u64) -> Result<Vec<u8>, RandomError> {
        if len > MAX_REQUEST {
            return Err(RandomError::TooLarge {
                requested: len,
                limit: MAX_REQUEST,
            });
        }
        let mut bytes = vec![0u8; len as usize];
        for chunk in bytes.chunks_mut(MAX_CHUNK) {
            OsRng
                .try_fill_bytes(chunk)
                .map_err(|e| RandomError::Entropy(e.to_string()))?;
        }
        Ok(bytes)
    }

    pub fn get_random_u64(&self) -> Result<u64, RandomError> {
        let mut buf = [0u8; 8];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| RandomError::Entropy(e.to_string()))?;
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_requested_length() {
        let random = RandomSource::new();
        assert_eq!(random.get_random_bytes(0).unwrap().len(), 0);
        assert_eq!(random.get_random_bytes(32).unwrap().len(), 32);
    }

    #[test]
    fn spans_multiple_chunks() {
        let bytes = RandomSource::new()
            .get_random_bytes(MAX_CHUNK as u64 * 2 + 10)
            .unwrap();
        assert_eq!(bytes.len(), MAX_CHUNK * 2 + 10);
        // The short tail chunk is filled too.
        assert!(bytes[MAX_CHUNK * 2..].iter().any(|b| *b != 0));
    }

    #[test]
    fn rejects_oversized_requests() {
        let err = RandomSource::new().get_random_bytes(MAX_REQUEST + 1).unwrap_err();
        assert!(matches!(err, RandomError::TooLarge { .. }));
    }

    #[test]
    fn u64_values_vary() {
        let random = RandomSource::new();
        let values: Vec<u64> = (0..4).map(|_| random.get_random_u64().unwrap()).collect();
        assert!(values.windows(2).any(|w| w[0] != w[1]));
    }
}
