//! Convergence diagnostics for posterior draws.
//!
//! Split R-hat and a multi-chain effective sample size computed from the
//! combined autocorrelation with Geyer's initial monotone sequence. Results are
//! advisory: flagged parameters are logged and reported, never retried.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::DiagnosticsConfig;
use crate::posterior::PosteriorDraws;

const MAX_LOGGED_FLAGS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDiagnostic {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub rhat: f64,
    pub ess: f64,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConvergenceReport {
    pub parameters: Vec<ParameterDiagnostic>,
    pub flagged: Vec<String>,
    /// Columns with no variation at all (nothing to diagnose).
    pub skipped: usize,
    pub worst_rhat: Option<f64>,
    pub lowest_ess: Option<f64>,
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.flagged.is_empty()
    }
}

/// Splits each chain in half, dropping the middle draw of odd-length chains.
fn split_chains(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    let len = chains.iter().map(Vec::len).min().unwrap_or(0);
    let half = len / 2;
    let mut out = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        out.push(&chain[..half]);
        out.push(&chain[len - half..len]);
    }
    out
}

struct ChainMoments {
    len: usize,
    means: Vec<f64>,
    within: f64,
    var_plus: f64,
}

fn moments(chains: &[&[f64]]) -> Option<ChainMoments> {
    let m = chains.len();
    let len = chains.first()?.len();
    if m < 2 || len < 2 {
        return None;
    }
    let means: Vec<f64> = chains
        .iter()
        .map(|c| c.iter().sum::<f64>() / len as f64)
        .collect();
    let within = chains
        .iter()
        .zip(&means)
        .map(|(c, mean)| c.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (len - 1) as f64)
        .sum::<f64>()
        / m as f64;
    let grand = means.iter().sum::<f64>() / m as f64;
    let between = len as f64 * means.iter().map(|mu| (mu - grand).powi(2)).sum::<f64>()
        / (m - 1) as f64;
    let var_plus = (len - 1) as f64 / len as f64 * within + between / len as f64;
    Some(ChainMoments {
        len,
        means,
        within,
        var_plus,
    })
}

/// Split R-hat. `None` when chains are too short or the series is constant.
pub fn split_rhat(chains: &[Vec<f64>]) -> Option<f64> {
    let split = split_chains(chains);
    let mo = moments(&split)?;
    if mo.var_plus <= 0.0 {
        return None;
    }
    if mo.within <= 0.0 {
        return Some(f64::INFINITY);
    }
    Some((mo.var_plus / mo.within).sqrt())
}

/// Multi-chain effective sample size over split chains.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> Option<f64> {
    let split = split_chains(chains);
    let mo = moments(&split)?;
    if mo.var_plus <= 0.0 {
        return None;
    }
    let m = split.len();
    let n = mo.len;
    let total = (m * n) as f64;

    let mean_autocov = |lag: usize| -> f64 {
        split
            .iter()
            .zip(&mo.means)
            .map(|(c, mean)| {
                (0..n - lag)
                    .map(|s| (c[s] - mean) * (c[s + lag] - mean))
                    .sum::<f64>()
                    / n as f64
            })
            .sum::<f64>()
            / m as f64
    };
    let rho = |lag: usize| -> f64 {
        if lag == 0 {
            1.0
        } else {
            1.0 - (mo.within - mean_autocov(lag)) / mo.var_plus
        }
    };

    let mut tau = -1.0;
    let mut prev_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(prev_pair);
        tau += 2.0 * pair;
        prev_pair = pair;
        lag += 2;
    }
    let tau = tau.max(1.0 / total.log10().max(1.0));
    Some(total / tau)
}

fn mean_sd(chains: &[Vec<f64>]) -> (f64, f64) {
    let values: Vec<f64> = chains.iter().flatten().copied().collect();
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

pub fn diagnose(draws: &PosteriorDraws, cfg: &DiagnosticsConfig) -> ConvergenceReport {
    let mut report = ConvergenceReport::default();

    for (col, name) in draws.columns().iter().enumerate() {
        let chains = draws.series(col);
        let (Some(rhat), Some(ess)) = (split_rhat(&chains), effective_sample_size(&chains)) else {
            report.skipped += 1;
            continue;
        };
        let (mean, sd) = mean_sd(&chains);
        let flagged = rhat > cfg.max_rhat || ess < cfg.min_ess;
        if flagged {
            report.flagged.push(name.clone());
        }
        report.worst_rhat = Some(report.worst_rhat.map_or(rhat, |w| w.max(rhat)));
        report.lowest_ess = Some(report.lowest_ess.map_or(ess, |w| w.min(ess)));
        report.parameters.push(ParameterDiagnostic {
            name: name.clone(),
            mean,
            sd,
            rhat,
            ess,
            flagged,
        });
    }

    if report.converged() {
        info!(
            parameters = report.parameters.len(),
            worst_rhat = report.worst_rhat,
            lowest_ess = report.lowest_ess,
            "posterior diagnostics passed"
        );
    } else {
        for p in report
            .parameters
            .iter()
            .filter(|p| p.flagged)
            .take(MAX_LOGGED_FLAGS)
        {
            warn!(parameter = %p.name, rhat = p.rhat, ess = p.ess, "poor convergence");
        }
        warn!(
            flagged = report.flagged.len(),
            parameters = report.parameters.len(),
            max_rhat = cfg.max_rhat,
            min_ess = cfg.min_ess,
            "posterior did not pass convergence checks; results are provisional"
        );
    }
    report
}
