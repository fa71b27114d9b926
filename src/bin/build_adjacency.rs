use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use matchnet::adjacency::build_adjacency_stack;
use matchnet::cli::{self, has_flag, parse_path_arg};
use matchnet::config::{AppConfig, DEFAULT_CONFIG_FILE};
use matchnet::logging::init_logging;
use matchnet::match_log::{load_match_log, prepare_matches};
use matchnet::registry::TeamRegistry;

#[derive(Serialize)]
struct StackDump<'a> {
    teams: &'a [String],
    meetings: usize,
    matrices: Vec<&'a [Vec<u8>]>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_logging();

    let args = cli::args();
    let config_path =
        parse_path_arg(&args, "--config").unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let cfg = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let match_log = parse_path_arg(&args, "--matches").unwrap_or(cfg.input.match_log.clone());

    let records = load_match_log(&match_log, &cfg.input)?;
    let (matches, _) = prepare_matches(records, &cfg.input);
    let registry = TeamRegistry::from_matches(&matches);
    let stack = build_adjacency_stack(&matches, &registry)
        .with_context(|| format!("build adjacency stack from {}", match_log.display()))?;

    let dump = StackDump {
        teams: registry.names(),
        meetings: stack.len(),
        matrices: stack.matrices().iter().map(|m| m.rows()).collect(),
    };
    let out = if has_flag(&args, "--compact") {
        serde_json::to_string(&dump)?
    } else {
        serde_json::to_string_pretty(&dump)?
    };
    println!("{out}");
    Ok(())
}
