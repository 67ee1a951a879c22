//! galadriel-server - spiffe trust domain federation coordinator

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use galadriel_server::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| eyre!("failed to install rustls crypto provider"))?;

    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Run(cmd) => cmd.run().await,
        Command::Trustdomain(cmd) => cmd.run().await,
        Command::Relationship(cmd) => cmd.run().await,
        Command::Token(cmd) => cmd.run().await,
    }
}
