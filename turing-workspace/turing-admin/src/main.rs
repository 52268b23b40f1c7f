use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use turing_core::commands::{ensure_initialized_once, InitReport};
use turing_core::corpus::{CorpusCache, WeightedGenerator};
use turing_core::memory::{hash_user, MessageStore, SqliteStore};
use turing_core::services::BlockedWords;
use turing_core::CoreConfig;

#[derive(Parser)]
#[command(
    name = "turing-admin",
    about = "Offline helpers for the turing message store"
)]
struct Cli {
    /// Data root; overrides TURING_ROOT.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the data root and default config if missing
    Init,
    /// List channels with message counts
    Channels {
        #[arg(long)]
        json: bool,
    },
    /// Generate one sentence from stored history
    Generate {
        /// `channel=weight`, repeatable
        #[arg(long = "weight", value_parser = parse_weight, required = true)]
        weights: Vec<(String, f64)>,
        #[arg(long)]
        chain: Option<usize>,
    },
    /// Lift a user's bans in a channel as of now. A running daemon picks
    /// this up on its next start; send it an unban line to apply it live.
    Unban {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        user: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(root) = &cli.root {
        std::env::set_var("TURING_ROOT", root);
    }
    let report = ensure_initialized_once()?;

    match cli.cmd {
        Cmd::Init => init(report),
        Cmd::Channels { json } => channels(&load_config(report)?, json),
        Cmd::Generate { weights, chain } => generate(&load_config(report)?, weights, chain),
        Cmd::Unban { channel, user } => unban(&load_config(report)?, &channel, &user),
    }
}

fn load_config(report: &InitReport) -> Result<CoreConfig> {
    CoreConfig::load(&report.root)
}

fn open_store(cfg: &CoreConfig) -> Result<SqliteStore> {
    SqliteStore::open(&cfg.storage.db_path)
        .with_context(|| format!("opening {}", cfg.storage.db_path.display()))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}

fn init(report: &InitReport) -> Result<()> {
    let status = |created: bool| if created { "created" } else { "exists " };
    println!("{} {}", status(report.created_root), report.root.display());
    println!("{} {}", status(report.created_config), report.config_path.display());
    Ok(())
}

fn channels(cfg: &CoreConfig, as_json: bool) -> Result<()> {
    let store = open_store(cfg)?;
    let counts = store.message_counts()?;
    if as_json {
        let rows: Vec<_> = counts
            .iter()
            .map(|(channel, total, excluded)| {
                json!({"channel": channel, "messages": total, "excluded": excluded})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if counts.is_empty() {
        println!("no channels recorded");
    }
    for (channel, total, excluded) in counts {
        println!("{channel:<24} {total:>8} messages ({excluded} excluded)");
    }
    Ok(())
}

fn generate(cfg: &CoreConfig, weights: Vec<(String, f64)>, chain: Option<usize>) -> Result<()> {
    let store: Arc<dyn MessageStore> = Arc::new(open_store(cfg)?);
    let cache = Arc::new(
        CorpusCache::new(store, cfg.generation.chain_order, cfg.generation.max_attempts)
            .with_blocked_words(BlockedWords::new(cfg.moderation.blocked_words.iter().cloned())),
    );
    let generator = WeightedGenerator::new(cache);
    let weights: HashMap<String, f64> = weights.into_iter().collect();
    let order = chain.unwrap_or(cfg.generation.chain_order);

    let sentence = runtime()?.block_on(generator.generate(&weights, order))?;
    println!("{sentence}");
    Ok(())
}

fn unban(cfg: &CoreConfig, channel: &str, user: &str) -> Result<()> {
    let store = open_store(cfg)?;
    let lifted = runtime()?.block_on(store.lift_bans(
        channel,
        &hash_user(&user.into()),
        Utc::now(),
    ))?;
    if lifted == 0 {
        bail!("no open ban for that user in {channel}");
    }
    println!("lifted {lifted} ban(s) in {channel}");
    Ok(())
}

fn parse_weight(s: &str) -> Result<(String, f64)> {
    let (channel, weight) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected channel=weight, got {s:?}"))?;
    let weight: f64 = weight
        .trim()
        .parse()
        .with_context(|| format!("weight for {channel:?}"))?;
    Ok((channel.trim().to_string(), weight))
}
