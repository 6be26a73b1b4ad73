//! Omnidrop - authenticated local task and file drop service

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use omnidrop::{
    cli::{Cli, Command},
    config::{self, Config},
    gateway::Server,
    oauth::ClientRegistry,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    // .env first so clap `env` defaults and Config both see it
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, Some(cli.log_format.as_str())) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    let result = match cli.command {
        Some(Command::HashSecret { secret, cost }) => hash_secret(secret, cost),
        Some(Command::Clients) => list_clients(),
        Some(Command::Serve) | None => run_server().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    tracing::debug!(?config, "Configuration loaded");
    Server::new(config).run().await.context("Server failed")?;
    Ok(())
}

fn hash_secret(secret: Option<String>, cost: u32) -> anyhow::Result<()> {
    let (secret, generated) = match secret {
        Some(secret) => (secret, false),
        None => (config::generate_secret(32), true),
    };
    let hash = bcrypt::hash(&secret, cost).context("Failed to hash secret")?;

    if generated {
        println!("client_secret:      {secret}");
    }
    println!("client_secret_hash: {hash}");
    Ok(())
}

fn list_clients() -> anyhow::Result<()> {
    let path = config::clients_file_from_env()?;
    let registry = ClientRegistry::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let clients = registry.list();
    if clients.is_empty() {
        println!("No enabled clients in {}", registry.path().display());
        println!("\n💡 Tip: Use `omnidrop hash-secret` to create a client_secret_hash");
        return Ok(());
    }

    println!("{} enabled client(s) in {}:\n", clients.len(), registry.path().display());
    for client in clients {
        println!("🔑 {} ({})", client.client_id, client.name);
        println!("   Scopes:  {}", client.scopes.join(" "));
        println!("   Created: {}", client.created_at.to_rfc3339());
        if let Some(updated) = client.updated_at {
            println!("   Updated: {}", updated.to_rfc3339());
        }
        println!();
    }
    Ok(())
}
