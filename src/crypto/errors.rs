use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Signed value too short: {len} bytes, need more than {min}")]
    SignedValueTooShort { len: usize, min: usize },

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Envelope too short: {len} bytes, need at least {min}")]
    EnvelopeTooShort { len: usize, min: usize },

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Key agreement produced a non-contributory shared secret")]
    WeakKeyAgreement,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
