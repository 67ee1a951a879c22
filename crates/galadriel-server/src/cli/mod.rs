//! cli subcommands for galadriel-server.
//!
//! - `galadriel-server run` - run the server
//! - `galadriel-server trustdomain create` - register a trust domain
//! - `galadriel-server relationship create` - propose a federation relationship
//! - `galadriel-server token generate` - mint a join token
//!
//! every command other than `run` talks to the admin surface over http.

mod client;
mod relationship;
mod run;
mod token;
mod trustdomain;

pub use client::{AdminClient, AdminClientError};
pub use relationship::RelationshipCommand;
pub use run::RunCommand;
pub use token::TokenCommand;
pub use trustdomain::TrustdomainCommand;

use clap::{Args, Parser, Subcommand};

/// default url of the admin surface
pub const DEFAULT_ADMIN_ADDRESS: &str = "http://127.0.0.1:8085";

/// galadriel-server - spiffe trust domain federation coordinator
#[derive(Parser, Debug)]
#[command(name = "galadriel-server")]
#[command(about = "SPIFFE federation control plane server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// command to run
    #[command(subcommand)]
    pub command: Command,
}

/// top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// run the server
    Run(RunCommand),

    /// manage trust domains
    #[command(subcommand)]
    Trustdomain(TrustdomainCommand),

    /// manage federation relationships
    #[command(subcommand)]
    Relationship(RelationshipCommand),

    /// manage join tokens
    #[command(subcommand)]
    Token(TokenCommand),
}

/// where to reach the admin surface
#[derive(Args, Debug, Clone)]
pub struct AdminArgs {
    /// admin surface url
    #[arg(long, env = "GALADRIEL_ADMIN_ADDRESS", default_value = DEFAULT_ADMIN_ADDRESS)]
    pub admin_address: String,
}

impl AdminArgs {
    fn client(&self) -> color_eyre::eyre::Result<AdminClient> {
        AdminClient::new(&self.admin_address).map_err(|e| {
            color_eyre::eyre::eyre!("invalid admin address {}: {}", self.admin_address, e)
        })
    }
}
