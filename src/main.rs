use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use gemmit::config::Config;
use gemmit::feed::{sync_feeds, Fetcher, RefreshResult};
use gemmit::identity::{fingerprint, identify};
use gemmit::payment::{sync_payments, LedgerClient};
use gemmit::storage::{Database, DatabaseError, FeedSelection};
use gemmit::submit::handle_add;

#[derive(Parser, Debug)]
#[command(
    name = "gemmit",
    about = "Gemini and RSS feed aggregator ranked by Monero payments"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "gemmit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a feed on behalf of a client certificate
    Add {
        /// DER-encoded client certificate of the submitter
        #[arg(long, value_name = "FILE")]
        cert: PathBuf,

        /// Feed URL (gemini:// or https://)
        url: String,
    },
    /// Refetch feeds that have not been updated recently
    SyncFeeds,
    /// Refetch every feed regardless of its last update
    RefreshEntries,
    /// Import new ledger transactions for every Monero payment account
    SyncPayments,
    /// Print row counts per table
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: The database at {} is locked by another gemmit process. Try again once it finishes.",
                config.database_path
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match args.command {
        Command::Add { cert, url } => {
            let der = std::fs::read(&cert)
                .with_context(|| format!("Failed to read certificate: {}", cert.display()))?;
            let fp = fingerprint(&der);
            let (identity, is_new) = identify(&db, &fp)
                .await
                .context("Failed to resolve identity")?;
            if is_new {
                println!("New identity {} ({})", identity.id, fp);
            }

            let fetcher = Fetcher::new(config.fetch_settings()).context("Failed to build fetcher")?;
            let response = handle_add(&db, &fetcher, &identity, Some(&url)).await;
            print!("{}", response.header());
            if response.status() != 30 {
                std::process::exit(1);
            }
        }
        Command::SyncFeeds => {
            let cutoff = config.stale_cutoff(Utc::now());
            let fetcher = Fetcher::new(config.fetch_settings()).context("Failed to build fetcher")?;
            let results = sync_feeds(&db, &fetcher, FeedSelection::StaleSince(cutoff))
                .await
                .context("Failed to list stale feeds")?;
            report_refresh(&results);
        }
        Command::RefreshEntries => {
            let fetcher = Fetcher::new(config.fetch_settings()).context("Failed to build fetcher")?;
            let results = sync_feeds(&db, &fetcher, FeedSelection::All)
                .await
                .context("Failed to list feeds")?;
            report_refresh(&results);
        }
        Command::SyncPayments => {
            let ledger = LedgerClient::new(
                &config.ledger_url,
                Duration::from_secs(config.ledger_timeout_secs),
            )
            .context("Failed to build ledger client")?;
            let results = sync_payments(&db, &ledger, config.sync_settings())
                .await
                .context("Failed to list payment accounts")?;

            let recorded: usize = results
                .iter()
                .filter_map(|r| r.result.as_ref().ok())
                .map(|s| s.recorded)
                .sum();
            let failed = results.iter().filter(|r| r.result.is_err()).count();
            println!(
                "Synced {} payment accounts: {} payments recorded, {} failed",
                results.len(),
                recorded,
                failed
            );
        }
        Command::Stats => {
            let counts = db.table_counts().await.context("Failed to count rows")?;
            println!("authors           {}", counts.authors);
            println!("payment_accounts  {}", counts.payment_accounts);
            println!("feeds             {}", counts.feeds);
            println!("items             {}", counts.items);
            println!("payments          {}", counts.payments);
            println!("identities        {}", counts.identities);
            println!("submissions       {}", counts.submissions);
        }
    }

    Ok(())
}

fn report_refresh(results: &[RefreshResult]) {
    let indexed: u64 = results
        .iter()
        .filter_map(|r| r.result.as_ref().ok())
        .sum();
    let failed = results.iter().filter(|r| r.result.is_err()).count();
    println!(
        "Refreshed {} feeds: {} new items, {} failed",
        results.len(),
        indexed,
        failed
    );
}
