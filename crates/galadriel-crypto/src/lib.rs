//! cryptographic building blocks for galadriel.
//!
//! - [`KeyManager`]: named rsa keypairs, in memory or on disk
//! - [`X509Ca`]: the onboarding certificate authority
//! - [`JwtIssuer`] / [`JwtValidator`]: rs256 bearer tokens
//! - [`BundleSigner`] / [`BundleVerifier`]: detached signatures over trust bundles

mod error;
mod jwt;
mod key_manager;
mod signing;
pub mod x509;
mod x509_ca;

pub use error::Error;
pub use jwt::{Claims, DEFAULT_JWT_TTL, IssuedToken, JwtIssuer, JwtValidator};
pub use key_manager::{DiskKeyManager, KeyEntry, KeyManager, MemoryKeyManager};
pub use signing::{
    BundleSigner, BundleVerifier, DiskSigner, DiskVerifier, NoopVerifier, SignedBundle,
    verify_bundle_signature,
};
pub use x509_ca::{BACKDATE, IssuedCertificate, LeafParams, X509Ca, harvester_csr};

/// result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;
