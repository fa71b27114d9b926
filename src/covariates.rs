use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::InputConfig;
use crate::error::DataError;
use crate::registry::TeamRegistry;

/// Per-team numeric stats as read from the covariate file.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateTable {
    columns: Vec<String>,
    by_team: HashMap<String, Vec<f64>>,
}

/// Covariates aligned to a registry: row `i` belongs to team index `i`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovariateMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl CovariateTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.by_team.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_team.is_empty()
    }

    pub fn get(&self, team: &str) -> Option<&[f64]> {
        self.by_team.get(team).map(Vec::as_slice)
    }

    /// Fails with every registry team that has no covariate row.
    pub fn align(&self, registry: &TeamRegistry) -> Result<CovariateMatrix, DataError> {
        let missing: Vec<String> = registry
            .names()
            .iter()
            .filter(|name| !self.by_team.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(DataError::MissingCovariates(missing));
        }

        let extra = self
            .by_team
            .keys()
            .filter(|team| registry.index_of(team).is_none())
            .count();
        if extra > 0 {
            debug!(extra, "covariate rows for teams absent from the match log");
        }

        let rows = registry
            .names()
            .iter()
            .map(|name| self.by_team[name.as_str()].clone())
            .collect();
        Ok(CovariateMatrix {
            columns: self.columns.clone(),
            rows,
        })
    }
}

impl CovariateMatrix {
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn team_count(&self) -> usize {
        self.rows.len()
    }

    pub fn covariate_count(&self) -> usize {
        self.columns.len()
    }

    /// Z-scores each column. Zero-variance columns are only centred.
    pub fn standardized(&self) -> Self {
        let n = self.rows.len();
        if n == 0 {
            return self.clone();
        }
        let p = self.columns.len();
        let mut rows = self.rows.clone();
        for col in 0..p {
            let mean = self.rows.iter().map(|r| r[col]).sum::<f64>() / n as f64;
            let var = self
                .rows
                .iter()
                .map(|r| (r[col] - mean).powi(2))
                .sum::<f64>()
                / n as f64;
            let sd = var.sqrt();
            for row in rows.iter_mut() {
                row[col] -= mean;
                if sd > 1e-12 {
                    row[col] /= sd;
                }
            }
        }
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }
}

pub fn load_covariates(path: &Path, cfg: &InputConfig) -> Result<CovariateTable> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open covariate table {}", path.display()))?;
    let table = read_covariates(file, cfg)
        .with_context(|| format!("read covariate table {}", path.display()))?;
    info!(
        path = %path.display(),
        teams = table.len(),
        covariates = table.columns().len(),
        "loaded covariates"
    );
    Ok(table)
}

pub fn read_covariates<R: Read>(reader: R, cfg: &InputConfig) -> Result<CovariateTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers().context("read covariate header")?.clone();

    let team_idx = headers
        .iter()
        .position(|h| h == cfg.covariate_team_column)
        .ok_or_else(|| DataError::MissingColumn {
            source_name: "covariate table".to_string(),
            column: cfg.covariate_team_column.clone(),
        })?;

    let selected: Vec<(usize, String)> = if cfg.covariate_columns.is_empty() {
        headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != team_idx)
            .map(|(idx, h)| (idx, h.to_string()))
            .collect()
    } else {
        cfg.covariate_columns
            .iter()
            .map(|name| {
                headers
                    .iter()
                    .position(|h| h == name)
                    .map(|idx| (idx, name.clone()))
                    .ok_or_else(|| DataError::MissingColumn {
                        source_name: "covariate table".to_string(),
                        column: name.clone(),
                    })
            })
            .collect::<Result<_, _>>()?
    };
    if selected.is_empty() {
        return Err(DataError::NoCovariates.into());
    }

    let mut by_team = HashMap::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.context("read covariate row")?;
        let row = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        let team = record.get(team_idx).unwrap_or("").trim();
        if team.is_empty() {
            return Err(DataError::EmptyTeam { row }.into());
        }

        let values = selected
            .iter()
            .map(|(col_idx, name)| {
                let raw = record.get(*col_idx).unwrap_or("").trim();
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| DataError::InvalidCovariate {
                        row,
                        column: name.clone(),
                        value: raw.to_string(),
                    })
            })
            .collect::<Result<Vec<f64>, DataError>>()?;

        if by_team.insert(team.to_string(), values).is_some() {
            return Err(DataError::DuplicateTeam(team.to_string()).into());
        }
    }

    Ok(CovariateTable {
        columns: selected.into_iter().map(|(_, name)| name).collect(),
        by_team,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "Team,PPG,ORtg\nBOS,118.2,121.0\nMIA,110.0,113.5\nATL,119.8,117.9\n";

    #[test]
    fn aligns_rows_to_registry_order() {
        let table = read_covariates(RAW.as_bytes(), &InputConfig::default()).unwrap();
        let reg = TeamRegistry::from_names(["MIA", "ATL"]);
        let x = table.align(&reg).unwrap();
        assert_eq!(x.columns(), &["PPG", "ORtg"]);
        assert_eq!(x.rows(), &[vec![119.8, 117.9], vec![110.0, 113.5]]);
    }

    #[test]
    fn missing_teams_are_listed() {
        let table = read_covariates(RAW.as_bytes(), &InputConfig::default()).unwrap();
        let reg = TeamRegistry::from_names(["BOS", "DEN", "UTA"]);
        assert_eq!(
            table.align(&reg),
            Err(DataError::MissingCovariates(vec![
                "DEN".to_string(),
                "UTA".to_string()
            ]))
        );
    }

    #[test]
    fn selected_columns_only() {
        let mut cfg = InputConfig::default();
        cfg.covariate_columns = vec!["ORtg".to_string()];
        let table = read_covariates(RAW.as_bytes(), &cfg).unwrap();
        assert_eq!(table.columns(), &["ORtg"]);
        assert_eq!(table.get("BOS"), Some(&[121.0][..]));
    }

    #[test]
    fn duplicate_and_bad_values_are_fatal() {
        let dup = "Team,PPG\nBOS,1\nBOS,2\n";
        let err = read_covariates(dup.as_bytes(), &InputConfig::default()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DataError>(),
            Some(&DataError::DuplicateTeam("BOS".to_string()))
        );

        let bad = "Team,PPG\nBOS,fast\n";
        let err = read_covariates(bad.as_bytes(), &InputConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::InvalidCovariate { row: 2, .. })
        ));
    }

    #[test]
    fn standardization_centres_and_scales() {
        let x = CovariateMatrix::from_rows(
            vec!["a".to_string(), "flat".to_string()],
            vec![vec![1.0, 4.0], vec![3.0, 4.0]],
        )
        .standardized();
        assert!((x.rows()[0][0] + 1.0).abs() < 1e-12);
        assert!((x.rows()[1][0] - 1.0).abs() < 1e-12);
        assert_eq!(x.rows()[0][1], 0.0);
    }
}
