pub mod envelope;
pub mod error;
pub mod gateway_token;
pub mod sensitive;

pub use envelope::{RsaAesEnvelopeDecryptor, SecretEnvelopeDecryptor};
pub use error::{CryptoError, Result};
pub use gateway_token::gateway_token;
pub use sensitive::{decrypt_sensitive, encrypt_sensitive, generate_env_key};
