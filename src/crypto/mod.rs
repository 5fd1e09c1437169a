pub mod envelope;
pub mod errors;
pub mod identity;
pub mod storage;

pub use envelope::{
    decrypt, encrypt, open_sealed, open_signed, seal, sign, strip_signature, verify,
    ENCRYPTED_KEY_LEN, SIGNATURE_LEN,
};
pub use errors::CryptoError;
pub use identity::{Identity, IdentityData, PlayerKey};
pub use storage::default_key_path;
