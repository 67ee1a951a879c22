//! error types for validated domain values.

use thiserror::Error;

use crate::ConsentStatus;

/// errors produced while constructing or transitioning domain types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// the string is not a valid spiffe trust domain name.
    #[error("invalid trust domain {0:?}: {1}")]
    InvalidTrustDomain(String, &'static str),

    /// the string is not a valid spiffe id.
    #[error("invalid spiffe id {0:?}: {1}")]
    InvalidSpiffeId(String, &'static str),

    /// unknown consent status.
    #[error("invalid consent status {0:?}, expected one of approved, denied, pending")]
    InvalidConsentStatus(String),

    /// consent cannot move between these two states.
    #[error("illegal consent transition from {from} to {to}")]
    IllegalTransition {
        /// current consent
        from: ConsentStatus,
        /// requested consent
        to: ConsentStatus,
    },

    /// configuration is missing a required value or holds an invalid one.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
