//! spree - operator console for the WheatChain token spree.
//!
//! Talks to the campaign database directly; no server needs to be running.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use spree_sdk::chain::{
    format_amount, to_base_units, DistributorConfig, GAS_RESERVE, TOKEN_DECIMALS, TOKEN_SYMBOL,
};
use spree_sdk::{
    AccountQuery, AdminStore, CampaignSettings, PgStore, SettingsCache, Store, SystemClock,
    WalletAddress, DEFAULT_SETTINGS_TTL,
};

#[derive(Parser)]
#[command(name = "spree")]
#[command(about = "WheatChain token spree operator console", long_about = None)]
#[command(version)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the bundled schema migrations
    Migrate,
    /// Read or change campaign settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Browse participants
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    /// Block (or with --lift, unblock) a wallet from claims and referrals
    Blacklist {
        wallet: String,
        #[arg(long)]
        lift: bool,
    },
    /// Campaign-wide totals
    Stats,
    /// Accounts with the most referrals
    TopReferrers {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show token and distributor constants
    Info,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the effective settings as JSON
    Show,
    /// Replace all settings from a JSON file
    Apply { file: PathBuf },
    /// Move the campaign window
    Window {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// Newest first, optionally filtered by wallet or referral code substring
    List {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        per_page: usize,
    },
    /// One account with stats and audit trail
    Show { wallet: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Info = cli.command {
        print_info();
        return Ok(());
    }

    let url = cli
        .database_url
        .as_deref()
        .context("DATABASE_URL is required (flag --database-url or env)")?;
    let store = Arc::new(PgStore::connect(url).await?);
    run(cli.command, store).await
}

async fn run(command: Commands, store: Arc<PgStore>) -> anyhow::Result<()> {
    let settings = SettingsCache::new(store.clone(), SystemClock, DEFAULT_SETTINGS_TTL);

    match command {
        Commands::Migrate => {
            store.migrate().await?;
            println!("Migrations applied.");
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show => {
                let current = settings.get().await?;
                println!("{}", serde_json::to_string_pretty(&current)?);
                let now = Utc::now();
                let left = current.time_remaining(now);
                println!(
                    "active: {} ({}d {}h {}m {}s left)",
                    current.is_active(now),
                    left.days,
                    left.hours,
                    left.minutes,
                    left.seconds
                );
            }
            SettingsAction::Apply { file } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("read {}", file.display()))?;
                let next: CampaignSettings = serde_json::from_str(&raw)?;
                settings.update(&next).await?;
                println!("Settings applied from {}.", file.display());
            }
            SettingsAction::Window { start, end } => {
                let mut next = settings.get().await?;
                next.start_date = start;
                next.end_date = end;
                settings.update(&next).await?;
                println!("Campaign window set to {start} .. {end}.");
            }
        },
        Commands::Users { action } => match action {
            UsersAction::List { search, page, per_page } => {
                let query = AccountQuery {
                    search,
                    offset: page.saturating_mul(per_page),
                    limit: per_page,
                };
                let accounts = store.list_accounts(&query).await?;
                if accounts.is_empty() {
                    println!("No accounts.");
                }
                for a in accounts {
                    println!(
                        "{:<16} {:<10} {:>10} {TOKEN_SYMBOL}  claimed={:<5} blacklisted={:<5} {}",
                        a.wallet.short(),
                        a.referral_code,
                        tokens(a.total_claimable()),
                        a.claimed,
                        a.blacklisted,
                        a.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
            UsersAction::Show { wallet } => {
                let wallet = WalletAddress::parse(&wallet)?;
                let stats = store
                    .user_stats(&wallet)
                    .await?
                    .with_context(|| format!("no account for {wallet}"))?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
                for entry in store.activity(&wallet).await? {
                    println!(
                        "{} {:<26} {:>8} {}",
                        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.kind.as_str(),
                        entry.reward_amount.map(tokens).unwrap_or_default(),
                        entry.platform.map(|p| p.to_string()).unwrap_or_default()
                    );
                }
            }
        },
        Commands::Blacklist { wallet, lift } => {
            let wallet = WalletAddress::parse(&wallet)?;
            let account = store.set_blacklisted(&wallet, !lift, Utc::now()).await?;
            println!("{} blacklisted={}", account.wallet, account.blacklisted);
        }
        Commands::Stats => {
            let stats = store.campaign_stats().await?;
            println!("Users:              {}", stats.total_users);
            for (platform, n) in &stats.platform_connected {
                println!("  {:<17} {}", format!("{platform}:"), n);
            }
            println!("Claimed:            {}", stats.claimed_users);
            println!("Referrals:          {}", stats.total_referrals);
            println!("Tokens distributed: {} {TOKEN_SYMBOL}", tokens(stats.tokens_distributed));
        }
        Commands::TopReferrers { limit } => {
            for (rank, r) in store.top_referrers(limit).await?.iter().enumerate() {
                println!(
                    "{:>3}. {:<16} {:<10} {:>4} referrals {:>10} {TOKEN_SYMBOL} bonus",
                    rank + 1,
                    r.wallet.short(),
                    r.referral_code,
                    r.referral_count,
                    tokens(r.referral_bonus)
                );
            }
        }
        Commands::Info => print_info(),
    }

    Ok(())
}

/// Whole-token amount with thousands separators.
fn tokens(amount: u64) -> String {
    to_base_units(amount).map(format_amount).unwrap_or_else(|_| amount.to_string())
}

fn print_info() {
    let distributor = DistributorConfig::default();
    println!("WheatChain Token Spree");
    println!("Token: {TOKEN_SYMBOL} ({TOKEN_DECIMALS} decimals)");
    println!("Distributor package: {}", distributor.package_id);
    println!("Distributor object:  {}", distributor.distributor_id);
    println!("Gas reserve: {} native ({GAS_RESERVE} base units)", format_amount(GAS_RESERVE));
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_blacklist_lift() {
        let cli = Cli::try_parse_from(["spree", "blacklist", "0xabc", "--lift"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Blacklist { ref wallet, lift: true } if wallet == "0xabc"
        ));
    }

    #[test]
    fn test_parse_settings_window() {
        let cli = Cli::try_parse_from([
            "spree",
            "settings",
            "window",
            "--start",
            "2025-05-01",
            "--end",
            "2025-05-31",
        ])
        .unwrap();
        let Commands::Settings { action: SettingsAction::Window { start, end } } = cli.command
        else {
            panic!("expected settings window");
        };
        assert!(start < end);
    }

    #[test]
    fn test_parse_users_list_defaults() {
        let cli = Cli::try_parse_from(["spree", "users", "list"]).unwrap();
        let Commands::Users { action: UsersAction::List { search, page, per_page } } = cli.command
        else {
            panic!("expected users list");
        };
        assert!(search.is_none());
        assert_eq!((page, per_page), (0, 10));
    }

    #[test]
    fn test_token_amounts_are_grouped() {
        assert_eq!(tokens(0), "0");
        assert_eq!(tokens(1_234_567), "1,234,567");
        assert_eq!(tokens(u64::MAX), u64::MAX.to_string());
    }
}
