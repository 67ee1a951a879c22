//! core types for galadriel - a spiffe federation control plane.
//!
//! this crate provides the data structures shared by the server and the harvester:
//! - [`TrustDomainName`] and [`SpiffeId`]: validated spiffe identifiers
//! - [`TrustDomain`], [`Relationship`], [`Bundle`], [`JoinToken`]: persisted entities
//! - [`ConsentStatus`]: the per-side consent state machine
//! - [`api`]: json request/response bodies for both http surfaces
//! - [`ServerConfig`] and [`HarvesterConfig`]: process configuration

pub mod api;
mod bundle;
mod config;
mod error;
mod ids;
mod join_token;
mod relationship;
mod spiffe;
mod trust_domain;

pub use bundle::{Bundle, bundle_digest};
pub use config::{
    BundleSignerConfig, BundleVerifierConfig, DiskSignerConfig, DiskVerifierConfig,
    HarvesterConfig, KeyManagerConfig, KeyManagerKind, KeyType, NoopVerifierConfig,
    ProvidersConfig, ServerConfig, X509CaConfig, X509CaKind,
};
pub use error::Error;
pub use ids::{BundleId, JoinTokenId, RelationshipId, TrustDomainId};
pub use join_token::JoinToken;
pub use relationship::{ConsentSide, ConsentStatus, Relationship};
pub use spiffe::{HARVESTER_PATH, SpiffeId, TrustDomainName};
pub use trust_domain::TrustDomain;

/// result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;
