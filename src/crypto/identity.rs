use crate::crypto::errors::CryptoError;
use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use x25519_dalek::StaticSecret;

/// Public half of a participant's key pair in its text form.
///
/// The base64 encoding of the 32-byte Ed25519 verifying key is the durable
/// identity of a player: it keys the connection registry, is stored with the
/// user record, and is what a client keeps as the server's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerKey(VerifyingKey);

impl PlayerKey {
    pub fn from_verifying_key(verifying_key: &VerifyingKey) -> Self {
        Self(*verifying_key)
    }

    /// Parse the base64 text form
    pub fn parse(encoded: &str) -> std::result::Result<Self, CryptoError> {
        let decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidPublicKey(format!("bad base64: {}", e)))?;

        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidPublicKey(format!(
                "expected 32 bytes, got {}",
                decoded.len()
            ))
        })?;

        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    pub fn encoded(&self) -> String {
        general_purpose::STANDARD.encode(self.0.to_bytes())
    }

    /// Short hex digest for log lines
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl std::fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encoded())
    }
}

/// Serialized key pair, as written to the identity file and the client profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityData {
    pub secret_key: String,
    pub public_key: String,
}

/// Ed25519 key pair of a participant. The same secret also yields the X25519
/// key used to open envelopes addressed to this participant.
pub struct Identity {
    signing_key: SigningKey,
    player_key: PlayerKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let player_key = PlayerKey::from_verifying_key(&signing_key.verifying_key());
        Self {
            signing_key,
            player_key,
        }
    }

    pub fn from_data(data: &IdentityData) -> Result<Self> {
        let secret_bytes = general_purpose::STANDARD
            .decode(&data.secret_key)
            .context("Invalid secret key encoding")?;

        if secret_bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "Invalid secret key length: expected 32 bytes, got {}",
                secret_bytes.len()
            ));
        }
        let mut secret_array = [0u8; 32];
        secret_array.copy_from_slice(&secret_bytes);

        let identity = Self::from_signing_key(SigningKey::from_bytes(&secret_array));
        if identity.player_key.encoded() != data.public_key.trim() {
            return Err(anyhow::anyhow!(
                "Stored public key does not match the secret key"
            ));
        }
        Ok(identity)
    }

    pub fn to_data(&self) -> IdentityData {
        IdentityData {
            secret_key: general_purpose::STANDARD.encode(self.signing_key.to_bytes()),
            public_key: self.player_key.encoded(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = crate::crypto::storage::load_key_secure(path)?;
        let content_str = String::from_utf8(content).context("Invalid UTF-8 in identity file")?;
        let data: IdentityData =
            serde_json::from_str(&content_str).context("Failed to parse identity file")?;
        Self::from_data(&data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.to_data()).context("Failed to serialize identity")?;
        crate::crypto::storage::save_key_secure(path, json.as_bytes())
    }

    /// Load the identity at `path`, creating and saving a new one if none exists.
    /// A file that exists but cannot be read is an error, never silently replaced.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path)
                .with_context(|| format!("Failed to load identity from {}", path.display()));
        }

        let identity = Self::generate();
        identity.save(path)?;
        Ok(identity)
    }

    /// Load identity from default storage location
    pub fn from_default_storage() -> Result<Self> {
        Self::load(&crate::crypto::storage::default_key_path()?)
    }

    /// Save identity to default storage location
    pub fn save_to_default_storage(&self) -> Result<()> {
        self.save(&crate::crypto::storage::default_key_path()?)
    }

    pub fn player_key(&self) -> &PlayerKey {
        &self.player_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// X25519 secret matching `verifying_key().to_montgomery()`
    pub(crate) fn agreement_secret(&self) -> StaticSecret {
        StaticSecret::from(self.signing_key.to_scalar_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("player_key", &self.player_key.fingerprint())
            .finish_non_exhaustive()
    }
}
