use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("envelope unwrap failed: {0}")]
    EnvelopeUnwrap(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
