//! galadriel harvester library - the agent colocated with a spire server.
//!
//! this crate connects one spire server to the galadriel server:
//! - [`credentials`]: harvester key, onboarding with a join token, certificate renewal
//! - [`client`]: https client for the server's harvester surface
//! - [`spire`]: the slice of the spire server api the harvester needs
//! - [`providers`]: bundle signer and verifier plugins
//! - [`reconcile`]: the self bundle and federated bundle loops
//! - [`api`]: local admin api on a unix socket
//! - [`cli`]: command-line interface implementation

pub mod api;
pub mod cli;
pub mod client;
pub mod credentials;
pub mod providers;
pub mod reconcile;
pub mod spire;
