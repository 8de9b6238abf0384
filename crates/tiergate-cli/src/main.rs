// ============================================================================
// tiergate - inspect wallet tiers and tool access from the command line
// ============================================================================
// Usage:
//   tiergate tiers                         Show the active tier table
//   tiergate tier <WALLET>                 Resolve a wallet's tier
//   tiergate check <WALLET> <TOOL>         Decide access to a tool
//   tiergate address <WALLET>              Validate and checksum an address
//
// Configuration comes from the environment (or a .env file): RPC_URL,
// TOKEN_ADDRESS, TIER_FAILURE_POLICY, ...
// ============================================================================

use anyhow::Result;
use clap::{Parser, Subcommand};
use tiergate_core::access::ToolAccess;
use tiergate_core::{format_threshold, GateConfig, TokenGate, WalletAddress};

/// Token-gated tool access inspection tool
#[derive(Parser)]
#[command(name = "tiergate", version, about = "Resolve wallet tiers and tool access")]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active tier table
    Tiers,

    /// Resolve a wallet's tier from its on-chain balance
    Tier {
        /// Wallet address (0x-prefixed)
        wallet: String,
    },

    /// Check whether a wallet may use a tool
    Check {
        /// Wallet address (0x-prefixed)
        wallet: String,
        /// Tool identifier, e.g. gas-monitor
        tool: String,
    },

    /// Validate an address and print its checksummed form
    Address {
        wallet: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (RUST_LOG may live there)
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tiergate_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenv {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    let config = GateConfig::from_env()?;

    match cli.command {
        Commands::Tiers => cmd_tiers(&config, cli.json),
        Commands::Tier { wallet } => cmd_tier(&config, &wallet, cli.json).await,
        Commands::Check { wallet, tool } => cmd_check(&config, &wallet, &tool, cli.json).await,
        Commands::Address { wallet } => cmd_address(&wallet, cli.json),
    }
}

fn cmd_tiers(config: &GateConfig, json: bool) -> Result<()> {
    let table = config.tier_table()?;

    if json {
        println!("{}", serde_json::to_string_pretty(table.tiers())?);
        return Ok(());
    }

    println!(
        "{:<10}  {:<10}  {:>10}  {:>10}  {:>8}  {:>10}  {}",
        "ID", "NAME", "MIN", "MAX", "API KEYS", "REQ/DAY", "TOOLS"
    );
    println!("{}", "-".repeat(90));

    for tier in table.tiers() {
        let tools = match &tier.tools_allowed {
            ToolAccess::All => "all".to_string(),
            ToolAccess::Only(list) => list.iter().cloned().collect::<Vec<_>>().join(", "),
        };
        println!(
            "{:<10}  {:<10}  {:>10}  {:>10}  {:>8}  {:>10}  {}",
            tier.id,
            tier.name,
            format_threshold(tier.min_tokens),
            tier.max_tokens.map(format_threshold).unwrap_or_else(|| "-".into()),
            tier.max_api_keys.map(|n| n.to_string()).unwrap_or_else(|| "∞".into()),
            tier.max_requests_per_day
                .map(|n| n.to_string())
                .unwrap_or_else(|| "∞".into()),
            tools
        );
    }

    Ok(())
}

async fn cmd_tier(config: &GateConfig, wallet: &str, json: bool) -> Result<()> {
    let gate = TokenGate::from_config(config)?;
    let status = gate.get_tier(wallet).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Wallet:  {}", status.wallet);
    println!("Balance: {} tokens", status.balance_formatted);
    println!("Tier:    {} ({})", status.tier_name, status.tier_id);
    if status.source.is_degraded() {
        println!("Source:  {:?} (balance could not be verified)", status.source);
    }
    match &status.next_tier_unlock {
        Some(next) => println!(
            "Next:    {} at {} tokens ({:.2} more)",
            next.next_tier_name,
            format_threshold(next.threshold_total),
            next.amount_needed
        ),
        None => println!("Next:    top tier reached"),
    }

    Ok(())
}

async fn cmd_check(config: &GateConfig, wallet: &str, tool: &str, json: bool) -> Result<()> {
    let gate = TokenGate::from_config(config)?;
    let decision = gate.can_access(wallet, tool).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else if decision.allowed {
        println!(
            "ALLOWED: {} may use {} ({} tier)",
            wallet,
            tool,
            decision.tier.as_deref().unwrap_or("-")
        );
    } else {
        println!("DENIED: {}", decision.reason.as_deref().unwrap_or("no reason given"));
        if let Some(suggested) = &decision.suggested_tier {
            println!("Upgrade to: {}", suggested);
        }
    }

    if !decision.allowed {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_address(wallet: &str, json: bool) -> Result<()> {
    let address = WalletAddress::parse(wallet)?;
    if json {
        println!("{}", serde_json::json!({ "input": wallet, "checksummed": address }));
    } else {
        println!("{}", address);
    }
    Ok(())
}
