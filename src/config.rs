//! Run configuration.
//!
//! Loaded from `matchnet.toml` when present; every field falls back to a
//! default so a bare checkout runs against the bundled sample data. A few
//! knobs can be overridden from the environment (`.env` files included).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "matchnet.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub model: ModelConfig,
    pub priors: PriorConfig,
    pub sampler: SamplerConfig,
    pub diagnostics: DiagnosticsConfig,
    pub evaluation: EvaluationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushPolicy {
    /// A zero margin counts as a non-over edge (0).
    #[default]
    Under,
    /// Zero-margin rows are removed before meetings are numbered.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub match_log: PathBuf,
    pub covariates: PathBuf,
    pub date_column: String,
    pub team_column: String,
    pub opponent_column: String,
    pub margin_column: String,
    pub covariate_team_column: String,
    /// Empty means every non-team column.
    pub covariate_columns: Vec<String>,
    pub standardize_covariates: bool,
    pub dedupe_mirrored_rows: bool,
    pub push_policy: PushPolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            match_log: PathBuf::from("data/matches.csv"),
            covariates: PathBuf::from("data/covariates.csv"),
            date_column: "Date".to_string(),
            team_column: "Team".to_string(),
            opponent_column: "Opponent".to_string(),
            margin_column: "Margin".to_string(),
            covariate_team_column: "Team".to_string(),
            covariate_columns: Vec::new(),
            standardize_covariates: true,
            dedupe_mirrored_rows: false,
            push_policy: PushPolicy::Under,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Latent dimension K.
    pub latent_dim: usize,
    /// 1-based meeting whose adjacency matrix is fitted.
    pub meeting: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            latent_dim: 2,
            meeting: 1,
        }
    }
}

/// Shape/rate pairs for the precision priors, plus the intercept sd.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    pub sigma_lambda_shape: f64,
    pub sigma_lambda_rate: f64,
    pub tau_u_shape: f64,
    pub tau_u_rate: f64,
    pub tau_beta_shape: f64,
    pub tau_beta_rate: f64,
    pub alpha_sd: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            sigma_lambda_shape: 2.0,
            sigma_lambda_rate: 1.0,
            tau_u_shape: 2.0,
            tau_u_rate: 1.0,
            tau_beta_shape: 2.0,
            tau_beta_rate: 1.0,
            alpha_sd: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub chains: usize,
    pub warmup: usize,
    pub samples: usize,
    pub thin: usize,
    pub seed: u64,
    pub target_acceptance: f64,
    pub initial_step: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            samples: 1000,
            thin: 1,
            seed: 20_240_901,
            target_acceptance: 0.3,
            initial_step: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub max_rhat: f64,
    pub min_ess: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            max_rhat: 1.1,
            min_ess: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub threshold: f64,
    pub observed_only: bool,
    pub clusters: usize,
    pub reliability_bins: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            observed_only: true,
            clusters: 3,
            reliability_bins: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub payload_file: String,
    pub report_file: String,
    pub summary_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
            payload_file: "model_input.json".to_string(),
            report_file: "matchnet_report.xlsx".to_string(),
            summary_file: "run_summary.json".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn payload_path(&self) -> PathBuf {
        self.dir.join(&self.payload_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(&self.summary_file)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("invalid matchnet config")
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies `MATCHNET_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(seed) = env_parse::<u64>("MATCHNET_SEED") {
            self.sampler.seed = seed;
        }
        if let Some(chains) = env_parse::<usize>("MATCHNET_CHAINS") {
            self.sampler.chains = chains.max(1);
        }
        if let Ok(dir) = std::env::var("MATCHNET_OUT_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                self.output.dir = PathBuf::from(trimmed);
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
}
