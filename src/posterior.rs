use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::model::{EigenParams, ModelInput};

/// Posterior draws for one fit: named scalar columns, one table per chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorDraws {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    chains: Vec<Vec<Vec<f64>>>,
}

/// Name of an indexed parameter, e.g. `param_name("U", &[3, 1])` is `U[3,1]`.
/// Indices are 1-based like the model's own naming.
pub fn param_name(base: &str, indices: &[usize]) -> String {
    if indices.is_empty() {
        return base.to_string();
    }
    let idx = indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{base}[{idx}]")
}

/// Converts dotted CSV headers (`U.3.1`) to bracket form (`U[3,1]`).
pub fn normalize_column_name(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains('[') {
        return raw.replace(' ', "");
    }
    let mut parts = raw.split('.');
    let base = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() || rest.iter().any(|p| p.parse::<usize>().is_err()) {
        return raw.to_string();
    }
    format!("{base}[{}]", rest.join(","))
}

impl PosteriorDraws {
    pub fn new(columns: Vec<String>, chains: Vec<Vec<Vec<f64>>>) -> Result<Self> {
        if chains.is_empty() {
            return Err(anyhow!("posterior draws need at least one chain"));
        }
        for (c, chain) in chains.iter().enumerate() {
            if chain.is_empty() {
                return Err(anyhow!("chain {} has no draws", c + 1));
            }
            if let Some(bad) = chain.iter().position(|d| d.len() != columns.len()) {
                return Err(anyhow!(
                    "chain {} draw {} has {} values, expected {}",
                    c + 1,
                    bad + 1,
                    chain[bad].len(),
                    columns.len()
                ));
            }
        }
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Ok(Self {
            columns,
            index,
            chains,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn draws_per_chain(&self) -> usize {
        self.chains.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(Vec::len).sum()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Values of column `col`, one vector per chain.
    pub fn series(&self, col: usize) -> Vec<Vec<f64>> {
        self.chains
            .iter()
            .map(|chain| chain.iter().map(|draw| draw[col]).collect())
            .collect()
    }

    pub fn mean_of(&self, col: usize) -> f64 {
        let total = self.total_draws();
        if total == 0 {
            return f64::NAN;
        }
        let sum: f64 = self.chains.iter().flatten().map(|draw| draw[col]).sum();
        sum / total as f64
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        self.column_index(name).map(|col| self.mean_of(col))
    }

    /// Counts `base[1]`, `base[2]`, ... until the first gap.
    pub fn vector_len(&self, base: &str) -> usize {
        (1..)
            .take_while(|i| self.has(&param_name(base, &[*i])))
            .count()
    }

    pub fn means_of(&self, base: &str) -> Vec<f64> {
        (1..=self.vector_len(base))
            .filter_map(|i| self.mean(&param_name(base, &[i])))
            .collect()
    }

    /// Posterior mean edge-probability matrix (symmetric, zero diagonal).
    ///
    /// Uses `p[i,j]` columns when the fit produced them, otherwise recomputes
    /// probabilities from the model parameters of every draw.
    pub fn edge_probability_matrix(&self, input: &ModelInput) -> Result<Vec<Vec<f64>>> {
        let n = input.n;
        let mut out = vec![vec![0.0; n]; n];
        if n < 2 {
            return Ok(out);
        }

        if self.has(&param_name("p", &[1, 2])) {
            for i in 0..n {
                for j in (i + 1)..n {
                    let name = param_name("p", &[i + 1, j + 1]);
                    let value = self
                        .mean(&name)
                        .with_context(|| format!("missing column {name}"))?;
                    out[i][j] = value;
                    out[j][i] = value;
                }
            }
            return Ok(out);
        }

        if !self.has("alpha") {
            return Err(anyhow!(
                "draws carry neither p[i,j] columns nor model parameters"
            ));
        }
        let total = self.total_draws() as f64;
        for draw in self.chains.iter().flatten() {
            let params = self.params_from_draw(draw, input)?;
            for i in 0..n {
                for j in (i + 1)..n {
                    out[i][j] += params.edge_probability(input, i, j) / total;
                }
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                out[j][i] = out[i][j];
            }
        }
        Ok(out)
    }

    /// Posterior mean of `sum_k lambda_k u_ik u_jk`, which is invariant to the
    /// sign and permutation ambiguities of the embeddings themselves.
    pub fn latent_effect_matrix(&self, n: usize) -> Option<Vec<Vec<f64>>> {
        let k = self.vector_len("lambda");
        if k == 0 || !self.has(&param_name("U", &[n.max(1), k])) {
            return None;
        }
        let lambda_cols: Vec<usize> = (1..=k)
            .filter_map(|kk| self.column_index(&param_name("lambda", &[kk])))
            .collect();
        let u_cols: Vec<Vec<usize>> = (1..=n)
            .map(|i| {
                (1..=k)
                    .filter_map(|kk| self.column_index(&param_name("U", &[i, kk])))
                    .collect()
            })
            .collect();
        if lambda_cols.len() != k || u_cols.iter().any(|row| row.len() != k) {
            return None;
        }

        let total = self.total_draws() as f64;
        let mut out = vec![vec![0.0; n]; n];
        for draw in self.chains.iter().flatten() {
            for i in 0..n {
                for j in i..n {
                    let v: f64 = (0..k)
                        .map(|kk| draw[lambda_cols[kk]] * draw[u_cols[i][kk]] * draw[u_cols[j][kk]])
                        .sum();
                    out[i][j] += v / total;
                }
            }
        }
        for i in 0..n {
            for j in 0..i {
                out[i][j] = out[j][i];
            }
        }
        Some(out)
    }

    fn params_from_draw(&self, draw: &[f64], input: &ModelInput) -> Result<EigenParams> {
        let get = |name: String| -> Result<f64> {
            self.column_index(&name)
                .map(|col| draw[col])
                .with_context(|| format!("missing column {name}"))
        };
        let k = self.vector_len("lambda");
        let mut params = EigenParams::zeros(input.n, k, input.p);
        params.alpha = get("alpha".to_string())?;
        for p in 0..input.p {
            params.beta[p] = get(param_name("beta", &[p + 1]))?;
        }
        for kk in 0..k {
            params.lambda[kk] = get(param_name("lambda", &[kk + 1]))?;
            for i in 0..input.n {
                params.u[i][kk] = get(param_name("U", &[i + 1, kk + 1]))?;
            }
        }
        Ok(params)
    }
}

/// Reads one chain of CmdStan-style CSV output.
///
/// Lines starting with `#` are skipped, headers are normalized with
/// [`normalize_column_name`], and sampler bookkeeping columns (`lp__`,
/// `accept_stat__`, ...) are dropped.
pub fn read_cmdstan_csv<R: Read>(reader: R) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
    let mut rdr = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers().context("read draws header")?.clone();

    let keep: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.ends_with("__"))
        .map(|(i, h)| (i, normalize_column_name(h)))
        .collect();
    if keep.is_empty() {
        return Err(anyhow!("draws file has no parameter columns"));
    }

    let mut draws = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record.context("read draws row")?;
        let values = keep
            .iter()
            .map(|(i, name)| {
                let raw = record.get(*i).unwrap_or("");
                raw.parse::<f64>()
                    .with_context(|| format!("draw {} column {name}: bad value {raw:?}", row + 1))
            })
            .collect::<Result<Vec<f64>>>()?;
        draws.push(values);
    }
    Ok((keep.into_iter().map(|(_, name)| name).collect(), draws))
}

/// Loads one CSV file per chain. All chains must share the same columns.
pub fn load_cmdstan_chains(paths: &[impl AsRef<Path>]) -> Result<PosteriorDraws> {
    let mut columns: Option<Vec<String>> = None;
    let mut chains = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let file =
            std::fs::File::open(path).with_context(|| format!("open draws {}", path.display()))?;
        let (cols, draws) =
            read_cmdstan_csv(file).with_context(|| format!("read draws {}", path.display()))?;
        match &columns {
            Some(existing) if *existing != cols => {
                return Err(anyhow!(
                    "draws {} has different columns from the first chain",
                    path.display()
                ));
            }
            Some(_) => {}
            None => columns = Some(cols),
        }
        info!(path = %path.display(), draws = draws.len(), "loaded posterior chain");
        chains.push(draws);
    }
    let columns = columns.ok_or_else(|| anyhow!("no draws files given"))?;
    PosteriorDraws::new(columns, chains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorConfig;

    fn input(n: usize) -> ModelInput {
        let mut y = vec![vec![0u8; n]; n];
        if n >= 2 {
            y[0][1] = 1;
            y[1][0] = 1;
        }
        ModelInput {
            n,
            k: 1,
            p: 0,
            y,
            x: vec![Vec::new(); n],
            sigma_lambda_shape: PriorConfig::default().sigma_lambda_shape,
            sigma_lambda_rate: 1.0,
            tau_u_shape: 1.0,
            tau_u_rate: 1.0,
            tau_beta_shape: 1.0,
            tau_beta_rate: 1.0,
            alpha_sd: 1.0,
            teams: Vec::new(),
            covariates: Vec::new(),
        }
    }

    #[test]
    fn normalizes_dotted_headers() {
        assert_eq!(normalize_column_name("U.3.1"), "U[3,1]");
        assert_eq!(normalize_column_name("beta.2"), "beta[2]");
        assert_eq!(normalize_column_name("alpha"), "alpha");
        assert_eq!(normalize_column_name("p[1, 2]"), "p[1,2]");
        assert_eq!(normalize_column_name("theta.x"), "theta.x");
    }

    #[test]
    fn reads_cmdstan_layout() {
        let raw = "# model = eigen\nlp__,accept_stat__,alpha,beta.1,p.1.2\n-10,0.9,0.1,0.5,0.6\n# adaptation\n-11,0.8,0.2,0.4,0.7\n";
        let (cols, draws) = read_cmdstan_csv(raw.as_bytes()).unwrap();
        assert_eq!(cols, vec!["alpha", "beta[1]", "p[1,2]"]);
        assert_eq!(draws, vec![vec![0.1, 0.5, 0.6], vec![0.2, 0.4, 0.7]]);
    }

    #[test]
    fn rejects_ragged_chains() {
        let err = PosteriorDraws::new(vec!["a".into(), "b".into()], vec![vec![vec![1.0]]]);
        assert!(err.is_err());
    }

    #[test]
    fn edge_probabilities_from_p_columns() {
        let draws = PosteriorDraws::new(
            vec!["p[1,2]".into()],
            vec![vec![vec![0.2], vec![0.4]], vec![vec![0.6]]],
        )
        .unwrap();
        let m = draws.edge_probability_matrix(&input(2)).unwrap();
        assert!((m[0][1] - 0.4).abs() < 1e-12);
        assert_eq!(m[0][1], m[1][0]);
        assert_eq!(m[0][0], 0.0);
    }

    #[test]
    fn edge_probabilities_from_parameters() {
        let cols = vec![
            "alpha".to_string(),
            "lambda[1]".to_string(),
            "U[1,1]".to_string(),
            "U[2,1]".to_string(),
        ];
        let draws = PosteriorDraws::new(cols, vec![vec![vec![0.0, 0.0, 1.0, 1.0]]]).unwrap();
        let m = draws.edge_probability_matrix(&input(2)).unwrap();
        assert!((m[0][1] - 0.5).abs() < 1e-12);

        let latent = draws.latent_effect_matrix(2).unwrap();
        assert_eq!(latent[0][1], 0.0);
    }

    #[test]
    fn latent_effect_is_sign_invariant() {
        let cols = vec![
            "lambda[1]".to_string(),
            "U[1,1]".to_string(),
            "U[2,1]".to_string(),
        ];
        let draws = PosteriorDraws::new(
            cols,
            vec![vec![vec![2.0, 1.0, 0.5]], vec![vec![2.0, -1.0, -0.5]]],
        )
        .unwrap();
        let latent = draws.latent_effect_matrix(2).unwrap();
        assert!((latent[0][1] - 1.0).abs() < 1e-12);
        assert!((latent[0][0] - 2.0).abs() < 1e-12);
    }
}
