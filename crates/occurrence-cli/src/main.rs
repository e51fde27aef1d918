//! outspline-occurrences - query recurrence-rule occurrences
//!
//! Usage:
//!   outspline-occurrences --rules items.json range --from T --to T
//!   outspline-occurrences --rules items.json next --base T
//!   outspline-occurrences --rules items.json daily --day T
//!   outspline-occurrences kinds
//!
//! Times are Unix timestamps or RFC 3339 strings. The rules file maps item
//! ids to their rule lists: `{ "1": [{"rule": "occur_every_day_local", "#": [...]}] }`.
//! Pass `-` to read it from stdin. Results are printed as JSON.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use occurrence_engine::{
    EngineConfig, MemoryStore, Occurrence, RuleRegistry, StoreSet, Timeline, UtcOffset,
};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "outspline-occurrences", version)]
#[command(about = "Expand recurrence rules into concrete occurrences")]
struct Cli {
    /// JSON file mapping item ids to rule lists ("-" for stdin)
    #[arg(short, long, global = true)]
    rules: Option<PathBuf>,

    /// IANA timezone used as the local clock (defaults to the host zone)
    #[arg(short = 'z', long, env = "OUTSPLINE_TIMEZONE", global = true)]
    timezone: Option<String>,

    /// Pretty-print the JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List occurrences touching a time window
    Range {
        #[arg(long, value_parser = parse_time)]
        from: i64,
        #[arg(long, value_parser = parse_time)]
        to: i64,
    },
    /// Show the soonest occurrence time after a base time
    Next {
        #[arg(long, value_parser = parse_time)]
        base: i64,
    },
    /// List the occurrences of the 24 hours starting at a time
    Daily {
        #[arg(long, value_parser = parse_time)]
        day: i64,
    },
    /// List the rule kinds the engine understands
    Kinds,
}

fn parse_time(s: &str) -> std::result::Result<i64, String> {
    if let Ok(timestamp) = s.parse::<i64>() {
        return Ok(timestamp);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .map_err(|e| format!("expected a Unix timestamp or an RFC 3339 time: {}", e))
}

fn read_rules(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read rules from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn build_timeline(cli: &Cli) -> Result<Timeline> {
    let Some(path) = &cli.rules else {
        bail!("--rules is required for this command");
    };
    let raw = read_rules(path)?;
    let store_id = path.display().to_string();
    let store = MemoryStore::from_json(store_id.clone(), &raw, 0)
        .with_context(|| format!("Invalid rules in {}", store_id))?;

    let mut config = EngineConfig::from_env();
    if let Some(name) = &cli.timezone {
        // an explicit zone must resolve rather than fall back
        UtcOffset::named(name)?;
        config.timezone = Some(name.clone());
    }
    debug!(store = %store_id, timezone = ?config.timezone, "loaded rules");

    let stores = Arc::new(StoreSet::new());
    stores.open(Arc::new(store));
    Ok(Timeline::from_config(
        stores,
        Arc::new(RuleRegistry::with_basic_rules()),
        &config,
    ))
}

fn occurrences_json(list: &[Occurrence]) -> Value {
    Value::Array(
        list.iter()
            .map(|o| {
                json!({
                    "item": o.item,
                    "start": o.start,
                    "end": o.end,
                    "alarm": o.alarm,
                })
            })
            .collect(),
    )
}

fn sorted(mut list: Vec<Occurrence>) -> Vec<Occurrence> {
    list.sort_by_key(|o| (o.start, o.item));
    list
}

fn run(cli: &Cli) -> Result<Value> {
    let output = match &cli.command {
        Command::Kinds => {
            let registry = RuleRegistry::with_basic_rules();
            let mut kinds: Vec<&str> = registry.kinds().collect();
            kinds.sort_unstable();
            json!(kinds)
        }
        Command::Range { from, to } => {
            if to < from {
                bail!("--to ({}) is before --from ({})", to, from);
            }
            let occs = build_timeline(cli)?.get_occurrences_range(*from, *to)?;
            json!({
                "from": from,
                "to": to,
                "occurrences": occurrences_json(&sorted(occs.get_list())),
            })
        }
        Command::Next { base } => {
            let next = build_timeline(cli)?.get_next_occurrences(*base)?;
            json!({
                "base": base,
                "next": next.get_next_occurrence_time(),
                "occurrences": occurrences_json(&sorted(next.get_list())),
            })
        }
        Command::Daily { day } => {
            let list = build_timeline(cli)?.get_daily_occurrences(*day)?;
            json!({
                "day": day,
                "occurrences": occurrences_json(&list),
            })
        }
    };
    Ok(output)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let output = run(&cli)?;
    let text = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", text);
    Ok(())
}
