//! the `relationship` subcommand - review and decide relationships via the local api

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Subcommand};
use galadriel_types::api::HarvesterRelationship;
use galadriel_types::{ConsentStatus, RelationshipId};

use super::DEFAULT_SOCKET_PATH;
use super::local_client::{LocalClient, LocalClientError};

/// review and decide federation relationships
#[derive(Subcommand, Debug)]
pub enum RelationshipCommand {
    /// list relationships of this trust domain
    List(ListArgs),

    /// approve a relationship
    Approve(ConsentArgs),

    /// deny a relationship
    Deny(ConsentArgs),
}

/// where to reach the local api
#[derive(Args, Debug, Clone)]
pub struct SocketArgs {
    /// local api socket
    #[arg(long, env = "GALADRIEL_HARVESTER_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket_path: PathBuf,
}

/// list relationships
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub(crate) socket: SocketArgs,

    /// only relationships where this side's consent matches (approved, denied, pending)
    #[arg(short, long)]
    pub(crate) status: Option<ConsentStatus>,

    /// output format (table, json)
    #[arg(short, long, default_value = "table")]
    pub(crate) output: String,
}

/// select a relationship by id
#[derive(Args, Debug)]
pub struct ConsentArgs {
    #[command(flatten)]
    pub(crate) socket: SocketArgs,

    /// relationship id
    #[arg(short = 'r', long)]
    pub(crate) relationship_id: RelationshipId,
}

impl RelationshipCommand {
    /// run the relationship command, mapping failures to exit codes
    pub async fn run(self) -> ExitCode {
        let result = match self {
            RelationshipCommand::List(args) => list(args).await,
            RelationshipCommand::Approve(args) => decide(args, ConsentStatus::Approved).await,
            RelationshipCommand::Deny(args) => decide(args, ConsentStatus::Denied).await,
        };
        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::from(e.exit_code())
            }
        }
    }
}

fn print_relationship(rel: &HarvesterRelationship) {
    println!("  ID:            {}", rel.id);
    println!("  Peer:          {}", rel.peer_trust_domain);
    println!("  Consent:       {}", rel.consent_status);
    println!("  Peer consent:  {}", rel.peer_consent_status);
    println!("  Updated:       {}", rel.updated_at.format("%Y-%m-%d %H:%M"));
}

async fn list(args: ListArgs) -> Result<(), LocalClientError> {
    let client = LocalClient::new(args.socket.socket_path);
    let rels = client.list_relationships(args.status).await?;

    if args.output == "json" {
        println!("{}", serde_json::to_string_pretty(&rels)?);
        return Ok(());
    }

    if rels.is_empty() {
        println!("No relationships found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<30} {:<10} {:<12}",
        "ID", "PEER", "CONSENT", "PEER CONSENT"
    );
    println!("{}", "-".repeat(92));
    for rel in rels {
        println!(
            "{:<38} {:<30} {:<10} {:<12}",
            rel.id, rel.peer_trust_domain, rel.consent_status, rel.peer_consent_status
        );
    }
    Ok(())
}

async fn decide(args: ConsentArgs, status: ConsentStatus) -> Result<(), LocalClientError> {
    let client = LocalClient::new(args.socket.socket_path);
    let rel = client.set_consent(args.relationship_id, status).await?;

    println!("Relationship {status}:");
    print_relationship(&rel);
    Ok(())
}
