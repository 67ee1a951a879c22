//! cli subcommands for galadriel-harvester.
//!
//! - `galadriel-harvester run` - run the harvester next to a spire server
//! - `galadriel-harvester relationship list|approve|deny` - manage consent
//!
//! the relationship commands talk to a running harvester over its local socket.

mod local_client;
mod relationship;
mod run;

pub use local_client::{
    EXIT_INVALID_INPUT, EXIT_NOT_FOUND, EXIT_TRANSPORT, LocalClient, LocalClientError,
};
pub use relationship::RelationshipCommand;
pub use run::RunCommand;

use clap::{Parser, Subcommand};

/// default path of the local api socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/galadriel-harvester/api.sock";

/// galadriel-harvester - federates a spire server through galadriel
#[derive(Parser, Debug)]
#[command(name = "galadriel-harvester")]
#[command(about = "SPIFFE federation agent for SPIRE servers", long_about = None)]
#[command(version)]
pub struct Cli {
    /// command to run
    #[command(subcommand)]
    pub command: Command,
}

/// top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// run the harvester
    Run(RunCommand),

    /// review and decide federation relationships
    #[command(subcommand)]
    Relationship(RelationshipCommand),
}
