use std::path::PathBuf;

use anyhow::{Context, Result};

use matchnet::cli::{self, has_flag, parse_arg, parse_path_arg, parse_path_list_arg};
use matchnet::config::{AppConfig, DEFAULT_CONFIG_FILE};
use matchnet::logging::init_logging;
use matchnet::pipeline::{self, FitSource, RunSummary};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    init_logging();

    let args = cli::args();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        print_usage();
        return Ok(());
    }

    let config_path =
        parse_path_arg(&args, "--config").unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut cfg = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    cfg.apply_env_overrides();

    if let Some(dir) = parse_path_arg(&args, "--out") {
        cfg.output.dir = dir;
    }
    if let Some(meeting) = parse_arg::<usize>(&args, "--meeting") {
        cfg.model.meeting = meeting;
    }
    if let Some(seed) = parse_arg::<u64>(&args, "--seed") {
        cfg.sampler.seed = seed;
    }

    let draws = parse_path_list_arg(&args, "--draws");
    let source = if draws.is_empty() {
        FitSource::Native
    } else {
        FitSource::Draws(draws)
    };
    let payload_only = has_flag(&args, "--payload-only");

    let summary = pipeline::run(&cfg, &source, payload_only)?;
    print_summary(&summary);
    Ok(())
}

fn print_usage() {
    println!(
        "usage: matchnet [--config PATH] [--draws PATH ...] [--payload-only] [--out DIR] [--meeting M] [--seed S]"
    );
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Teams: {}  rows: {} used / {} read  pushes: {}",
        summary.teams, summary.rows_used, summary.rows_in, summary.pushes
    );
    println!(
        "Meetings: {}  modelled meeting: {}  edges: {}  observed pairs: {}",
        summary.meetings, summary.meeting, summary.edges, summary.observed_pairs
    );
    println!("Payload: {}", summary.payload_path.display());

    let Some(source) = &summary.fit_source else {
        return;
    };
    println!(
        "Fit: {source}  chains={} draws/chain={}",
        summary.chains, summary.draws_per_chain
    );
    match (summary.worst_rhat, summary.lowest_ess) {
        (Some(rhat), Some(ess)) => println!(
            "Convergence: worst_rhat={rhat:.3} lowest_ess={ess:.0} flagged={}",
            summary.flagged_parameters
        ),
        _ => println!("Convergence: nothing to diagnose"),
    }
    for (name, mean) in summary.covariates.iter().zip(&summary.beta_means) {
        println!("  beta[{name}] = {mean:+.3}");
    }
    if let (Some(acc), Some(brier), Some(log_loss)) =
        (summary.accuracy, summary.brier, summary.log_loss)
    {
        println!(
            "Evaluation: samples={} accuracy={acc:.3} brier={brier:.4} log_loss={log_loss:.4}",
            summary.scored_pairs
        );
    } else {
        println!("Evaluation: no observed pairs to score");
    }
    println!(
        "Picks: over={} under={}  clusters={}",
        summary.over_picks, summary.under_picks, summary.clusters
    );
    if let Some(path) = &summary.report_path {
        println!("Report: {}", path.display());
    }
    if let Some(path) = &summary.summary_path {
        println!("Summary: {}", path.display());
    }
}
