use std::path::Path;

use base64::Engine as _;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ConfigError;

/// Process-wide key-encryption key, read once from a mounted file at
/// startup and immutable afterwards. Never logged, never persisted.
///
/// The file may contain either exactly 32 raw bytes or a base64 encoding of
/// 32 bytes (trailing newline tolerated).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Kek([u8; 32]);

impl Kek {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|e| ConfigError::Kek {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_bytes(&bytes).map_err(|message| ConfigError::Kek {
            path: path.display().to_string(),
            message,
        })
    }

    /// Parse key material directly: 32 raw bytes or base64 text. Used by
    /// `from_file` and by tests that do not want a file on disk.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(bytes);
            return Ok(Kek(key));
        }
        // Not raw; try base64 text.
        let text = std::str::from_utf8(bytes)
            .map_err(|_| "expected 32 raw bytes or base64 text".to_string())?
            .trim();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(|e| format!("base64 decode failed: {e}"))?;
        if decoded.len() != 32 {
            return Err(format!("decoded key is {} bytes, expected 32", decoded.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(Kek(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Key material must never reach logs through Debug formatting.
impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Kek(..)")
    }
}
