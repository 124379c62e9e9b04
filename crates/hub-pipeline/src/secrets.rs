use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use hub_config::Kek;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const DEK_LEN: usize = 32;
const BOOTSTRAP_TOKEN_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("encryption failed")]
    Encrypt,

    #[error("wrapped key malformed: {0}")]
    Malformed(String),

    #[error("decryption failed")]
    Decrypt,
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

/// CSPRNG alphanumeric string; used for passwords and access keys, which
/// end up in connection strings and DDL and must stay charset-safe.
pub fn random_alphanumeric(len: usize) -> String {
    OsRng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// CSPRNG token rendered base64url without padding.
pub fn random_token() -> String {
    let mut bytes = [0u8; BOOTSTRAP_TOKEN_LEN];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// AES-256-GCM wrap: output is base64(nonce || ciphertext).
pub fn wrap_key(kek: &Kek, plaintext: &[u8]) -> Result<String, SecretsError> {
    let cipher = Aes256Gcm::new_from_slice(kek.as_bytes()).map_err(|_| SecretsError::Encrypt)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SecretsError::Encrypt)?;
    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(combined))
}

pub fn unwrap_key(kek: &Kek, wrapped: &str) -> Result<Vec<u8>, SecretsError> {
    let combined = base64::engine::general_purpose::STANDARD
        .decode(wrapped)
        .map_err(|e| SecretsError::Malformed(e.to_string()))?;
    if combined.len() <= NONCE_LEN {
        return Err(SecretsError::Malformed("too short".into()));
    }
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(kek.as_bytes()).map_err(|_| SecretsError::Decrypt)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecretsError::Decrypt)
}

/// All secret material a fresh instance needs. Generated once by the
/// GenerateSecrets step.
pub struct GeneratedSecrets {
    pub db_password: String,
    pub storage_access_key: String,
    pub storage_secret_key: String,
    pub media_api_key: String,
    pub media_secret_key: String,
    /// Hash of the one-time bootstrap token. The initial plaintext is
    /// discarded; container start rotates the token and delivers the fresh
    /// plaintext through the config secret.
    pub bootstrap_token_hash: String,
    /// Per-instance DEK wrapped with the process KEK.
    pub wrapped_dek: String,
}

pub fn generate(kek: &Kek) -> Result<GeneratedSecrets, SecretsError> {
    let mut dek = [0u8; DEK_LEN];
    OsRng.fill_bytes(&mut dek);
    let wrapped_dek = wrap_key(kek, &dek)?;
    dek.zeroize();

    let token = random_token();

    Ok(GeneratedSecrets {
        db_password: random_alphanumeric(32),
        storage_access_key: random_alphanumeric(20),
        storage_secret_key: random_alphanumeric(40),
        media_api_key: random_alphanumeric(20),
        media_secret_key: random_alphanumeric(40),
        bootstrap_token_hash: sha256_hex(token.as_bytes()),
        wrapped_dek,
    })
}
