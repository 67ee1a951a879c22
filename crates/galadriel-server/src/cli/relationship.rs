//! the `relationship` subcommand - manage federation relationships via the admin surface

use clap::{Args, Subcommand};
use color_eyre::eyre::{Result, eyre};
use galadriel_types::api::RelationshipResponse;

use super::AdminArgs;

/// manage federation relationships
#[derive(Subcommand, Debug)]
pub enum RelationshipCommand {
    /// propose a relationship between two trust domains
    Create(CreateArgs),

    /// show one relationship
    Show(IdArgs),

    /// list relationships
    List(ListArgs),

    /// delete a relationship
    Delete(IdArgs),
}

/// propose a relationship
#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub(crate) admin: AdminArgs,

    /// first trust domain
    #[arg(short = 'a', long)]
    pub(crate) trust_domain_a: String,

    /// second trust domain
    #[arg(short = 'b', long)]
    pub(crate) trust_domain_b: String,
}

/// select a relationship by id
#[derive(Args, Debug)]
pub struct IdArgs {
    #[command(flatten)]
    admin: AdminArgs,

    /// relationship id
    #[arg(short = 'r', long)]
    relationship_id: String,
}

/// list relationships
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    admin: AdminArgs,

    /// only relationships this trust domain takes part in
    #[arg(short = 't', long)]
    trust_domain: Option<String>,

    /// only relationships with this consent (approved, denied, pending)
    #[arg(short, long)]
    status: Option<String>,

    /// output format (table, json)
    #[arg(short, long, default_value = "table")]
    output: String,
}

impl RelationshipCommand {
    /// run the relationship command
    pub async fn run(self) -> Result<()> {
        match self {
            RelationshipCommand::Create(args) => create(args).await,
            RelationshipCommand::Show(args) => show(args).await,
            RelationshipCommand::List(args) => list(args).await,
            RelationshipCommand::Delete(args) => delete(args).await,
        }
    }
}

fn print_relationship(rel: &RelationshipResponse) {
    println!("  ID:          {}", rel.id);
    println!(
        "  A:           {} ({})",
        rel.trust_domain_a_name, rel.trust_domain_a_consent
    );
    println!(
        "  B:           {} ({})",
        rel.trust_domain_b_name, rel.trust_domain_b_consent
    );
    println!("  Created:     {}", rel.created_at.format("%Y-%m-%d %H:%M"));
}

async fn create(args: CreateArgs) -> Result<()> {
    let client = args.admin.client()?;
    let rel = client
        .create_relationship(&args.trust_domain_a, &args.trust_domain_b)
        .await
        .map_err(|e| eyre!("failed to create relationship: {}", e))?;

    println!("Created relationship:");
    print_relationship(&rel);
    Ok(())
}

async fn show(args: IdArgs) -> Result<()> {
    let client = args.admin.client()?;
    let rel = client
        .get_relationship(&args.relationship_id)
        .await
        .map_err(|e| eyre!("failed to get relationship: {}", e))?;

    print_relationship(&rel);
    Ok(())
}

async fn list(args: ListArgs) -> Result<()> {
    let client = args.admin.client()?;
    let rels = client
        .list_relationships(args.trust_domain.as_deref(), args.status.as_deref())
        .await
        .map_err(|e| eyre!("failed to list relationships: {}", e))?;

    if args.output == "json" {
        println!("{}", serde_json::to_string_pretty(&rels)?);
        return Ok(());
    }

    if rels.is_empty() {
        println!("No relationships found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:<10} {:<24} {:<10}",
        "ID", "TRUST DOMAIN A", "CONSENT", "TRUST DOMAIN B", "CONSENT"
    );
    println!("{}", "-".repeat(110));
    for rel in rels {
        println!(
            "{:<38} {:<24} {:<10} {:<24} {:<10}",
            rel.id,
            rel.trust_domain_a_name,
            rel.trust_domain_a_consent,
            rel.trust_domain_b_name,
            rel.trust_domain_b_consent
        );
    }
    Ok(())
}

async fn delete(args: IdArgs) -> Result<()> {
    let client = args.admin.client()?;
    client
        .delete_relationship(&args.relationship_id)
        .await
        .map_err(|e| eyre!("failed to delete relationship: {}", e))?;

    println!("Deleted relationship {}", args.relationship_id);
    Ok(())
}
