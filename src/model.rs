//! Data payload handed to the latent eigenmodel.
//!
//! Field names follow the model's data block so the same JSON can be fed to an
//! external sampler or to [`crate::sampler`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adjacency::AdjacencyMatrix;
use crate::config::PriorConfig;
use crate::covariates::CovariateMatrix;
use crate::error::DataError;
use crate::registry::TeamRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "K")]
    pub k: usize,
    #[serde(rename = "P")]
    pub p: usize,
    #[serde(rename = "Y")]
    pub y: Vec<Vec<u8>>,
    #[serde(rename = "X")]
    pub x: Vec<Vec<f64>>,
    pub sigma_lambda_shape: f64,
    pub sigma_lambda_rate: f64,
    pub tau_u_shape: f64,
    pub tau_u_rate: f64,
    pub tau_beta_shape: f64,
    pub tau_beta_rate: f64,
    pub alpha_sd: f64,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub covariates: Vec<String>,
}

impl ModelInput {
    pub fn build(
        registry: &TeamRegistry,
        adjacency: &AdjacencyMatrix,
        covariates: &CovariateMatrix,
        latent_dim: usize,
        priors: &PriorConfig,
    ) -> Result<Self, DataError> {
        let input = Self {
            n: registry.len(),
            k: latent_dim,
            p: covariates.covariate_count(),
            y: adjacency.rows().to_vec(),
            x: covariates.rows().to_vec(),
            sigma_lambda_shape: priors.sigma_lambda_shape,
            sigma_lambda_rate: priors.sigma_lambda_rate,
            tau_u_shape: priors.tau_u_shape,
            tau_u_rate: priors.tau_u_rate,
            tau_beta_shape: priors.tau_beta_shape,
            tau_beta_rate: priors.tau_beta_rate,
            alpha_sd: priors.alpha_sd,
            teams: registry.names().to_vec(),
            covariates: covariates.columns().to_vec(),
        };
        input.validate()?;
        Ok(input)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        if self.y.len() != self.n {
            return Err(DataError::DimensionMismatch {
                what: "Y rows".to_string(),
                expected: self.n,
                actual: self.y.len(),
            });
        }
        AdjacencyMatrix::from_rows(self.y.clone()).validate()?;

        if self.x.len() != self.n {
            return Err(DataError::DimensionMismatch {
                what: "X rows".to_string(),
                expected: self.n,
                actual: self.x.len(),
            });
        }
        for row in &self.x {
            if row.len() != self.p {
                return Err(DataError::DimensionMismatch {
                    what: "X columns".to_string(),
                    expected: self.p,
                    actual: row.len(),
                });
            }
        }
        if self.k == 0 {
            return Err(DataError::DimensionMismatch {
                what: "latent dimension".to_string(),
                expected: 1,
                actual: 0,
            });
        }

        let positive = [
            ("sigma_lambda_shape", self.sigma_lambda_shape),
            ("sigma_lambda_rate", self.sigma_lambda_rate),
            ("tau_u_shape", self.tau_u_shape),
            ("tau_u_rate", self.tau_u_rate),
            ("tau_beta_shape", self.tau_beta_shape),
            ("tau_beta_rate", self.tau_beta_rate),
            ("alpha_sd", self.alpha_sd),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DataError::InvalidPrior {
                    name: name.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Sum of covariates for a pair; this is what `beta` multiplies.
    pub fn pair_covariates(&self, i: usize, j: usize) -> impl Iterator<Item = f64> + '_ {
        self.x[i].iter().zip(&self.x[j]).map(|(a, b)| a + b)
    }
}

/// One state of the eigenmodel's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenParams {
    pub alpha: f64,
    pub beta: Vec<f64>,
    pub lambda: Vec<f64>,
    /// N rows of K latent coordinates.
    pub u: Vec<Vec<f64>>,
}

impl EigenParams {
    pub fn zeros(n: usize, k: usize, p: usize) -> Self {
        Self {
            alpha: 0.0,
            beta: vec![0.0; p],
            lambda: vec![0.0; k],
            u: vec![vec![0.0; k]; n],
        }
    }

    pub fn latent_effect(&self, i: usize, j: usize) -> f64 {
        self.lambda
            .iter()
            .zip(self.u[i].iter().zip(&self.u[j]))
            .map(|(l, (a, b))| l * a * b)
            .sum()
    }

    pub fn linear_predictor(&self, input: &ModelInput, i: usize, j: usize) -> f64 {
        let covariate: f64 = self
            .beta
            .iter()
            .zip(input.pair_covariates(i, j))
            .map(|(b, x)| b * x)
            .sum();
        self.alpha + covariate + self.latent_effect(i, j)
    }

    pub fn edge_probability(&self, input: &ModelInput, i: usize, j: usize) -> f64 {
        logistic(self.linear_predictor(input, i, j))
    }

    /// Bernoulli log-likelihood over all pairs i < j.
    pub fn log_likelihood(&self, input: &ModelInput) -> f64 {
        let mut ll = 0.0;
        for i in 0..input.n {
            for j in (i + 1)..input.n {
                ll += bernoulli_logit(input.y[i][j], self.linear_predictor(input, i, j));
            }
        }
        ll
    }

    /// Log-likelihood of the pairs touching node `i` only.
    pub fn node_log_likelihood(&self, input: &ModelInput, i: usize) -> f64 {
        (0..input.n)
            .filter(|&j| j != i)
            .map(|j| bernoulli_logit(input.y[i][j], self.linear_predictor(input, i, j)))
            .sum()
    }
}

pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// log P(y | eta) for a logit-link Bernoulli, stable for large |eta|.
pub fn bernoulli_logit(y: u8, eta: f64) -> f64 {
    let log1p_exp = if eta > 0.0 {
        eta + (-eta).exp().ln_1p()
    } else {
        eta.exp().ln_1p()
    };
    if y == 1 { eta - log1p_exp } else { -log1p_exp }
}

pub fn write_payload(path: &Path, input: &ModelInput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output directory {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(input).context("serialize model input")?;
    fs::write(path, raw).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn read_payload(path: &Path) -> Result<ModelInput> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let input: ModelInput =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    input.validate()?;
    Ok(input)
}
