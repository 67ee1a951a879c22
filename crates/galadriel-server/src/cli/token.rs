//! the `token` subcommand - mint join tokens via the admin surface

use clap::{Args, Subcommand};
use color_eyre::eyre::{Result, eyre};

use super::AdminArgs;

/// manage join tokens
#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// generate a join token for a trust domain
    Generate(GenerateArgs),
}

/// generate a join token
#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub(crate) admin: AdminArgs,

    /// trust domain the token onboards
    #[arg(short = 't', long)]
    pub(crate) trust_domain: String,

    /// token lifetime in seconds (default: 600)
    #[arg(long)]
    pub(crate) ttl: Option<u64>,
}

impl TokenCommand {
    /// run the token command
    pub async fn run(self) -> Result<()> {
        match self {
            TokenCommand::Generate(args) => generate(args).await,
        }
    }
}

async fn generate(args: GenerateArgs) -> Result<()> {
    let client = args.admin.client()?;
    let token = client
        .generate_join_token(&args.trust_domain, args.ttl)
        .await
        .map_err(|e| eyre!("failed to generate join token: {}", e))?;

    println!("Join token for {}:", token.trust_domain);
    println!("  Token:    {}", token.token);
    println!("  Expires:  {}", token.expires_at.to_rfc3339());
    Ok(())
}
