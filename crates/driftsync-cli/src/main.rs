//! # DriftSync CLI
//!
//! Command-line utilities for stamping, inspecting, and comparing clocks.

use anyhow::{anyhow, Context, Result};
use driftsync_core::{make_client_id, Clock, Timestamp, DEFAULT_PRUNE_KEEP};
use std::env;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod config;
mod store;

use config::CliConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let config = CliConfig::from_env()?;

    let output = match args[1].as_str() {
        "client-id" => make_client_id(),
        "parse" => parse(required(&args, 2, "parse <timestamp>"))?,
        "hash" => hash(required(&args, 2, "hash <timestamp>"))?,
        "send" => send(&config)?,
        "recv" => recv(&config, required(&args, 2, "recv <timestamp>"))?,
        "diff" => diff(
            Path::new(required(&args, 2, "diff <a.json> <b.json>")),
            Path::new(required(&args, 3, "diff <a.json> <b.json>")),
        )?,
        "inspect" => inspect(&config)?,
        "prune" => prune(&config, args.get(2).map(String::as_str))?,
        "help" | "--help" | "-h" => {
            print_help();
            return Ok(());
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    };

    println!("{output}");
    Ok(())
}

fn required<'a>(args: &'a [String], index: usize, usage: &str) -> &'a str {
    if let Some(arg) = args.get(index) {
        arg
    } else {
        eprintln!("Usage: driftsync {usage}");
        std::process::exit(1);
    }
}

fn parse_timestamp(input: &str) -> Result<Timestamp> {
    Timestamp::parse(input).ok_or_else(|| anyhow!("Invalid timestamp: {input}"))
}

fn parse(input: &str) -> Result<String> {
    let ts = parse_timestamp(input)?;
    let fields = serde_json::json!({
        "millis": ts.millis(),
        "counter": ts.counter(),
        "node": ts.node(),
        "hash": ts.hash(),
    });
    serde_json::to_string_pretty(&fields).context("Failed to encode timestamp fields")
}

fn hash(input: &str) -> Result<String> {
    Ok(parse_timestamp(input)?.hash().to_string())
}

fn send(config: &CliConfig) -> Result<String> {
    let mut clock = store::load(&config.clock_path, config)?;
    let ts = clock.send().context("Failed to stamp event")?;
    store::save(&config.clock_path, &clock)?;
    Ok(ts.to_string())
}

fn recv(config: &CliConfig, input: &str) -> Result<String> {
    let remote = parse_timestamp(input)?;
    let mut clock = store::load(&config.clock_path, config)?;
    let ts = clock
        .recv(&remote)
        .with_context(|| format!("Failed to receive {remote}"))?;
    store::save(&config.clock_path, &clock)?;
    Ok(ts.to_string())
}

fn diff(a: &Path, b: &Path) -> Result<String> {
    let a = read_clock(a)?;
    let b = read_clock(b)?;
    Ok(match a.merkle().diff(b.merkle()) {
        Some(millis) => Timestamp::since(millis).to_string(),
        None => "in sync".to_string(),
    })
}

fn inspect(config: &CliConfig) -> Result<String> {
    let clock = store::load(&config.clock_path, config)?;
    Ok(format!("timestamp: {}\nmerkle {}", clock.timestamp(), clock.merkle()))
}

fn prune(config: &CliConfig, keep: Option<&str>) -> Result<String> {
    let keep = match keep {
        Some(keep) => keep
            .parse::<usize>()
            .with_context(|| format!("Invalid keep count: {keep}"))?,
        None => DEFAULT_PRUNE_KEEP,
    };
    let mut clock = store::load(&config.clock_path, config)?;
    let before = clock.merkle().hash();
    clock.prune(keep).context("Failed to prune merkle trie")?;
    store::save(&config.clock_path, &clock)?;
    tracing::debug!(keep, "pruned merkle trie");
    Ok(format!("pruned to {keep} children per level (hash {before})"))
}

fn read_clock(path: &Path) -> Result<Clock> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Clock::deserialize(&contents))
}

fn print_help() {
    println!(
        r#"DriftSync CLI

USAGE:
    driftsync <COMMAND> [OPTIONS]

COMMANDS:
    client-id             Print a fresh 16-character node id
    parse <timestamp>     Show the fields and hash of a timestamp
    hash <timestamp>      Print the 32-bit hash of a timestamp
    send                  Stamp a local event with the stored clock
    recv <timestamp>      Merge a remote timestamp into the stored clock
    diff <a.json> <b.json>
                          Print where two stored clocks diverge
    inspect               Show the stored clock and its merkle trie
    prune [keep]          Prune the stored merkle trie (default keep: 2)
    help                  Show this help message

ENVIRONMENT:
    DRIFTSYNC_CLOCK_PATH    Clock file (default: ./clock.json)
    DRIFTSYNC_NODE          Node id for a new clock
    DRIFTSYNC_MAX_DRIFT_MS  Drift limit in milliseconds (default: 300000)
    RUST_LOG                Log filter (default: warn)

EXAMPLES:
    driftsync parse "2024-01-01T00:00:00.000Z-0000-0123456789abcdef"
    driftsync diff replica-a.json replica-b.json
"#
    );
}
