//! crypto error types.

use thiserror::Error;

/// errors produced by key management, issuance and verification.
#[derive(Debug, Error)]
pub enum Error {
    /// a key with this id already exists.
    #[error("key {0:?} already exists")]
    KeyExists(String),

    /// no key with this id.
    #[error("key {0:?} not found")]
    KeyNotFound(String),

    /// key generation, encoding or decoding failed.
    #[error("key error: {0}")]
    Key(String),

    /// key file could not be read or written.
    #[error("key store error: {0}")]
    KeyStore(String),

    /// io error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// certificate could not be built, signed or parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// certificate signing request is malformed or its signature is bad.
    #[error("invalid csr: {0}")]
    InvalidCsr(String),

    /// certificate does not chain to the configured trust bundle.
    #[error("chain verification failed: {0}")]
    Chain(String),

    /// jwt is malformed, expired or badly signed.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// jwt is missing a required audience.
    #[error("token audience mismatch: missing {0:?}")]
    AudienceMismatch(String),

    /// signature does not verify.
    #[error("invalid signature: {0}")]
    Signature(String),
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::InvalidToken(err.to_string())
    }
}

impl From<rcgen::Error> for Error {
    fn from(err: rcgen::Error) -> Self {
        Error::Certificate(err.to_string())
    }
}
