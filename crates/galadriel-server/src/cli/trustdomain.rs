//! the `trustdomain` subcommand - manage trust domains via the admin surface

use clap::{Args, Subcommand};
use color_eyre::eyre::{Result, eyre};
use galadriel_types::api::{TrustDomainResponse, UpdateTrustDomainRequest};

use super::AdminArgs;

/// manage trust domains
#[derive(Subcommand, Debug)]
pub enum TrustdomainCommand {
    /// register a new trust domain
    Create(CreateArgs),

    /// show one trust domain
    Show(NameArgs),

    /// list all trust domains
    List(ListArgs),

    /// update a trust domain's description
    Update(UpdateArgs),

    /// delete a trust domain
    Delete(NameArgs),
}

/// register a new trust domain
#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    admin: AdminArgs,

    /// spiffe trust domain name, e.g. example.org
    #[arg(short = 't', long)]
    trust_domain: String,

    /// free-form description
    #[arg(short, long)]
    description: Option<String>,
}

/// select a trust domain by name
#[derive(Args, Debug)]
pub struct NameArgs {
    #[command(flatten)]
    admin: AdminArgs,

    /// trust domain name
    #[arg(short = 't', long)]
    trust_domain: String,
}

/// list trust domains
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    admin: AdminArgs,

    /// output format (table, json)
    #[arg(short, long, default_value = "table")]
    output: String,
}

/// update a trust domain
#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    admin: AdminArgs,

    /// trust domain name
    #[arg(short = 't', long)]
    trust_domain: String,

    /// new description
    #[arg(short, long)]
    description: String,
}

impl TrustdomainCommand {
    /// run the trustdomain command
    pub async fn run(self) -> Result<()> {
        match self {
            TrustdomainCommand::Create(args) => create(args).await,
            TrustdomainCommand::Show(args) => show(args).await,
            TrustdomainCommand::List(args) => list(args).await,
            TrustdomainCommand::Update(args) => update(args).await,
            TrustdomainCommand::Delete(args) => delete(args).await,
        }
    }
}

fn print_trust_domain(td: &TrustDomainResponse) {
    println!("  ID:            {}", td.id);
    println!("  Name:          {}", td.name);
    println!(
        "  Description:   {}",
        td.description.as_deref().unwrap_or("-")
    );
    println!(
        "  Harvester:     {}",
        td.harvester_spiffe_id.as_deref().unwrap_or("not onboarded")
    );
    println!("  Created:       {}", td.created_at.format("%Y-%m-%d %H:%M"));
}

async fn create(args: CreateArgs) -> Result<()> {
    let client = args.admin.client()?;
    let td = client
        .create_trust_domain(&args.trust_domain, args.description)
        .await
        .map_err(|e| eyre!("failed to create trust domain: {}", e))?;

    println!("Created trust domain:");
    print_trust_domain(&td);
    Ok(())
}

async fn show(args: NameArgs) -> Result<()> {
    let client = args.admin.client()?;
    let td = client
        .get_trust_domain(&args.trust_domain)
        .await
        .map_err(|e| eyre!("failed to get trust domain: {}", e))?;

    print_trust_domain(&td);
    Ok(())
}

async fn list(args: ListArgs) -> Result<()> {
    let client = args.admin.client()?;
    let tds = client
        .list_trust_domains()
        .await
        .map_err(|e| eyre!("failed to list trust domains: {}", e))?;

    if args.output == "json" {
        println!("{}", serde_json::to_string_pretty(&tds)?);
        return Ok(());
    }

    if tds.is_empty() {
        println!("No trust domains found.");
        return Ok(());
    }

    println!("{:<38} {:<30} {:<10} DESCRIPTION", "ID", "NAME", "ONBOARDED");
    println!("{}", "-".repeat(90));
    for td in tds {
        println!(
            "{:<38} {:<30} {:<10} {}",
            td.id,
            td.name,
            if td.harvester_spiffe_id.is_some() { "yes" } else { "no" },
            td.description.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn update(args: UpdateArgs) -> Result<()> {
    let client = args.admin.client()?;
    let update = UpdateTrustDomainRequest {
        description: Some(args.description),
        onboarding_bundle: None,
    };
    let td = client
        .update_trust_domain(&args.trust_domain, &update)
        .await
        .map_err(|e| eyre!("failed to update trust domain: {}", e))?;

    println!("Updated trust domain:");
    print_trust_domain(&td);
    Ok(())
}

async fn delete(args: NameArgs) -> Result<()> {
    let client = args.admin.client()?;
    client
        .delete_trust_domain(&args.trust_domain)
        .await
        .map_err(|e| eyre!("failed to delete trust domain: {}", e))?;

    println!("Deleted trust domain {}", args.trust_domain);
    Ok(())
}
