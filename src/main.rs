//! `turing` ingest daemon.
//!
//! Reads chat events as JSON lines on stdin and feeds them to the pipeline.
//! EOF flushes in-flight commits and exits; Ctrl-C exits at once, discarding
//! anything not yet committed.
//!
//! ```text
//! {"type":"message","channel":"x","user":"1","id":"m1","content":"hello"}
//! {"type":"ban","channel":"x","user":"2"}
//! {"type":"timeout","channel":"x","user":"3","duration_secs":600}
//! {"type":"delete","channel":"x","id":"m1"}
//! {"type":"unban","channel":"x","user":"2"}
//! {"type":"generate","weights":{"x":1.0,"y":0.5}}
//! ```

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turing_core::Turing;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line {
    Message {
        channel: String,
        user: String,
        id: String,
        content: String,
        #[serde(default)]
        ts: Option<DateTime<Utc>>,
    },
    Ban {
        channel: String,
        user: String,
        #[serde(default)]
        ts: Option<DateTime<Utc>>,
    },
    Timeout {
        channel: String,
        user: String,
        duration_secs: u64,
        #[serde(default)]
        ts: Option<DateTime<Utc>>,
    },
    Delete {
        channel: String,
        id: String,
        #[serde(default)]
        ts: Option<DateTime<Utc>>,
    },
    Unban {
        channel: String,
        user: String,
        #[serde(default)]
        ts: Option<DateTime<Utc>>,
    },
    Generate {
        weights: HashMap<String, f64>,
        #[serde(default)]
        chain_order: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let turing = Turing::open_default().context("starting pipeline")?;
    match turing.preload().await {
        Ok(n) => info!(channels = n, "ready"),
        Err(e) => warn!(error = %e, "preload failed; channels will load on demand"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break true,
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => handle(&turing, &line).await,
                None => break false,
            },
        }
    };

    if !interrupted {
        info!("input closed; flushing in-flight commits");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = flush(&turing) => {}
        }
    }
    turing.shutdown().await;
    Ok(())
}

async fn handle(turing: &Turing, raw: &str) {
    let raw = raw.trim();
    if raw.is_empty() {
        return;
    }
    let line: Line = match serde_json::from_str(raw) {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, "skipping malformed line");
            return;
        }
    };
    let now = Utc::now();
    match line {
        Line::Message { channel, user, id, content, ts } => {
            turing.on_message(&channel, &user, &id, &content, ts.unwrap_or(now));
        }
        Line::Ban { channel, user, ts } => {
            turing.on_ban(&channel, &user, ts.unwrap_or(now));
        }
        Line::Timeout { channel, user, duration_secs, ts } => {
            turing.on_timeout(&channel, &user, ts.unwrap_or(now), duration_secs);
        }
        Line::Delete { channel, id, ts } => {
            turing.on_message_deleted(&channel, &id, ts.unwrap_or(now));
        }
        Line::Unban { channel, user, ts } => {
            turing.on_unban(&channel, &user, ts.unwrap_or(now));
        }
        Line::Generate { weights, chain_order } => {
            match turing.generate_weighted(&weights, chain_order).await {
                Ok(sentence) => println!("{sentence}"),
                Err(e) => warn!(error = %e, "generation failed"),
            }
        }
    }
}

/// Resolve once nothing is queued or waiting to commit.
async fn flush(turing: &Turing) {
    while turing.queued() + turing.pending() > 0 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
