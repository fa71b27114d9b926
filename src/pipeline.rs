//! End-to-end batch run: match log to adjacency stack to model payload, then
//! (optionally) fit, diagnose, evaluate, cluster and report.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::adjacency::{AdjacencyStack, build_adjacency_stack};
use crate::clustering::{Clustering, CoordinateSource, cluster_teams};
use crate::config::AppConfig;
use crate::covariates::{CovariateMatrix, CovariateTable, load_covariates};
use crate::diagnostics::{ConvergenceReport, diagnose};
use crate::evaluation::{Evaluation, evaluate};
use crate::match_log::{MatchRecord, PrepareSummary, load_match_log, prepare_matches};
use crate::model::{ModelInput, write_payload};
use crate::posterior::{PosteriorDraws, load_cmdstan_chains};
use crate::registry::TeamRegistry;
use crate::report::{ReportInput, write_json, write_report};
use crate::sampler::sample_posterior;

/// Where posterior draws come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitSource {
    Native,
    /// One CmdStan-style CSV per chain.
    Draws(Vec<PathBuf>),
}

impl FitSource {
    fn label(&self) -> &'static str {
        match self {
            FitSource::Native => "native",
            FitSource::Draws(_) => "draws",
        }
    }
}

/// Cleaned inputs shared by every downstream stage.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub matches: Vec<MatchRecord>,
    pub prepare: PrepareSummary,
    pub registry: TeamRegistry,
    pub stack: AdjacencyStack,
    pub covariates: CovariateMatrix,
}

#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub draws: PosteriorDraws,
    pub probabilities: Vec<Vec<f64>>,
    pub diagnostics: ConvergenceReport,
    pub evaluation: Evaluation,
    pub clustering: Clustering,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub teams: usize,
    pub rows_in: usize,
    pub rows_used: usize,
    pub pushes: usize,
    pub meetings: usize,
    pub meeting: usize,
    pub edges: usize,
    pub observed_pairs: usize,
    pub covariates: Vec<String>,
    pub payload_path: PathBuf,
    pub fit_source: Option<String>,
    pub chains: usize,
    pub draws_per_chain: usize,
    pub converged: Option<bool>,
    pub flagged_parameters: usize,
    pub worst_rhat: Option<f64>,
    pub lowest_ess: Option<f64>,
    /// Posterior mean `beta[p]`, aligned with `covariates`.
    pub beta_means: Vec<f64>,
    pub scored_pairs: usize,
    pub accuracy: Option<f64>,
    pub brier: Option<f64>,
    pub log_loss: Option<f64>,
    pub over_picks: usize,
    pub under_picks: usize,
    pub coordinate_source: Option<CoordinateSource>,
    pub clusters: usize,
    pub report_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
}

/// Loads the configured match log and covariate table from disk.
pub fn load_inputs(cfg: &AppConfig) -> Result<PreparedData> {
    let records = load_match_log(&cfg.input.match_log, &cfg.input)?;
    let table = load_covariates(&cfg.input.covariates, &cfg.input)?;
    prepare_inputs(records, &table, cfg)
}

pub fn prepare_inputs(
    records: Vec<MatchRecord>,
    table: &CovariateTable,
    cfg: &AppConfig,
) -> Result<PreparedData> {
    let (matches, prepare) = prepare_matches(records, &cfg.input);
    let registry = TeamRegistry::from_matches(&matches);
    let stack =
        build_adjacency_stack(&matches, &registry).context("build adjacency stack")?;
    let aligned = table
        .align(&registry)
        .context("align covariates to team registry")?;
    let covariates = if cfg.input.standardize_covariates {
        aligned.standardized()
    } else {
        aligned
    };

    info!(
        teams = registry.len(),
        matches = matches.len(),
        meetings = stack.len(),
        covariates = covariates.covariate_count(),
        "prepared inputs"
    );
    Ok(PreparedData {
        matches,
        prepare,
        registry,
        stack,
        covariates,
    })
}

pub fn build_model_input(data: &PreparedData, cfg: &AppConfig) -> Result<ModelInput> {
    let y = data
        .stack
        .meeting(cfg.model.meeting)
        .context("select meeting for model payload")?;
    let input = ModelInput::build(
        &data.registry,
        y,
        &data.covariates,
        cfg.model.latent_dim,
        &cfg.priors,
    )
    .context("build model payload")?;
    Ok(input)
}

pub fn fit(
    data: &PreparedData,
    input: &ModelInput,
    source: &FitSource,
    cfg: &AppConfig,
) -> Result<FitOutcome> {
    let draws = match source {
        FitSource::Native => sample_posterior(input, &cfg.sampler)?,
        FitSource::Draws(paths) => load_cmdstan_chains(paths.as_slice())?,
    };
    let diagnostics = diagnose(&draws, &cfg.diagnostics);
    let probabilities = draws
        .edge_probability_matrix(input)
        .context("posterior mean edge probabilities")?;

    let adjacency = data.stack.meeting(cfg.model.meeting)?;
    let mask = data.stack.mask(cfg.model.meeting)?;
    let evaluation = evaluate(
        &data.registry,
        &probabilities,
        adjacency,
        mask,
        &cfg.evaluation,
    );

    let latent = draws.latent_effect_matrix(input.n);
    let clustering = cluster_teams(
        &data.registry,
        latent.as_deref(),
        &probabilities,
        input.k,
        cfg.evaluation.clusters,
        cfg.sampler.seed,
    );

    Ok(FitOutcome {
        draws,
        probabilities,
        diagnostics,
        evaluation,
        clustering,
    })
}

/// Runs the configured pipeline. With `payload_only` the run stops after the
/// model payload is written.
pub fn run(cfg: &AppConfig, source: &FitSource, payload_only: bool) -> Result<RunSummary> {
    let data = load_inputs(cfg)?;
    run_prepared(&data, cfg, source, payload_only)
}

pub fn run_prepared(
    data: &PreparedData,
    cfg: &AppConfig,
    source: &FitSource,
    payload_only: bool,
) -> Result<RunSummary> {
    let input = build_model_input(data, cfg)?;
    let payload_path = cfg.output.payload_path();
    write_payload(&payload_path, &input)?;

    let y = data.stack.meeting(cfg.model.meeting)?;
    let mut summary = RunSummary {
        teams: data.registry.len(),
        rows_in: data.prepare.rows_in,
        rows_used: data.prepare.rows_out,
        pushes: data.prepare.pushes,
        meetings: data.stack.len(),
        meeting: cfg.model.meeting,
        edges: y.edge_count(),
        observed_pairs: data.stack.mask(cfg.model.meeting)?.observed_pairs(),
        covariates: data.covariates.columns().to_vec(),
        payload_path,
        ..RunSummary::default()
    };
    if payload_only {
        info!(path = %summary.payload_path.display(), "payload written; skipping fit");
        return Ok(summary);
    }

    let outcome = fit(data, &input, source, cfg)?;
    let report_path = cfg.output.report_path();
    write_report(
        &report_path,
        &ReportInput {
            registry: &data.registry,
            stack: &data.stack,
            meeting: cfg.model.meeting,
            probabilities: &outcome.probabilities,
            evaluation: &outcome.evaluation,
            clustering: &outcome.clustering,
            diagnostics: &outcome.diagnostics,
        },
    )?;

    let scored = outcome.evaluation.metrics.samples;
    summary.fit_source = Some(source.label().to_string());
    summary.chains = outcome.draws.chain_count();
    summary.draws_per_chain = outcome.draws.draws_per_chain();
    summary.converged = Some(outcome.diagnostics.converged());
    summary.flagged_parameters = outcome.diagnostics.flagged.len();
    summary.worst_rhat = outcome.diagnostics.worst_rhat;
    summary.lowest_ess = outcome.diagnostics.lowest_ess;
    summary.beta_means = outcome.draws.means_of("beta");
    summary.scored_pairs = scored;
    if scored > 0 {
        summary.accuracy = Some(outcome.evaluation.classification.accuracy);
        summary.brier = Some(outcome.evaluation.metrics.brier);
        summary.log_loss = Some(outcome.evaluation.metrics.log_loss);
    }
    summary.over_picks = outcome.evaluation.picks.over.len();
    summary.under_picks = outcome.evaluation.picks.under.len();
    summary.coordinate_source = Some(outcome.clustering.source);
    summary.clusters = outcome
        .clustering
        .assignments
        .iter()
        .map(|a| a.cluster + 1)
        .max()
        .unwrap_or(0);
    summary.report_path = Some(report_path);

    let summary_path = cfg.output.summary_path();
    summary.summary_path = Some(summary_path.clone());
    write_json(&summary_path, &summary)?;
    Ok(summary)
}
