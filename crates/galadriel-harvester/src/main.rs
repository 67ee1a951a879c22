//! galadriel-harvester - federates a spire server through galadriel

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use galadriel_harvester::cli::{Cli, Command, EXIT_INVALID_INPUT, EXIT_TRANSPORT};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| eyre!("failed to install rustls crypto provider"))?;

    color_eyre::install()?;

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too
            let code = if e.use_stderr() { EXIT_INVALID_INPUT } else { 0 };
            let _ = e.print();
            return Ok(ExitCode::from(code));
        }
    };

    match cli.command {
        Command::Run(cmd) => match cmd.run().await {
            Ok(()) => Ok(ExitCode::SUCCESS),
            Err(e) => {
                eprintln!("Error: {e:?}");
                Ok(ExitCode::from(EXIT_TRANSPORT))
            }
        },
        Command::Relationship(cmd) => Ok(cmd.run().await),
    }
}
