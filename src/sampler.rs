//! Metropolis-within-Gibbs sampler for the covariate-augmented latent eigenmodel.
//!
//! For i < j:
//!
//! ```text
//! eta_ij = alpha + sum_p beta_p (x_ip + x_jp) + sum_k lambda_k u_ik u_jk
//! Y_ij   ~ Bernoulli(logistic(eta_ij))
//! ```
//!
//! `u`, `lambda` and `beta` have zero-mean normal priors whose precisions get
//! Gamma hyperpriors; those precisions are drawn from their conjugate
//! conditionals. Everything else moves with Gaussian random-walk proposals whose
//! scales adapt during warmup and are frozen afterwards. Chains are independent
//! and run on the rayon pool.

use anyhow::{Result, anyhow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, StandardNormal};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::SamplerConfig;
use crate::model::{EigenParams, ModelInput};
use crate::posterior::{PosteriorDraws, param_name};

const ADAPT_WINDOW: usize = 50;
const MIN_STEP: f64 = 1e-3;
const MAX_STEP: f64 = 10.0;

/// Column names of one stored draw, in storage order.
pub fn draw_columns(n: usize, k: usize, p: usize) -> Vec<String> {
    let mut cols = vec!["alpha".to_string()];
    cols.extend((1..=p).map(|pp| param_name("beta", &[pp])));
    cols.extend((1..=k).map(|kk| param_name("lambda", &[kk])));
    for i in 1..=n {
        cols.extend((1..=k).map(|kk| param_name("U", &[i, kk])));
    }
    cols.push("tau_u".to_string());
    cols.push("tau_lambda".to_string());
    cols.push("tau_beta".to_string());
    for i in 1..=n {
        cols.extend(((i + 1)..=n).map(|j| param_name("p", &[i, j])));
    }
    cols
}

pub fn sample_posterior(input: &ModelInput, cfg: &SamplerConfig) -> Result<PosteriorDraws> {
    input.validate()?;
    if cfg.chains == 0 || cfg.samples == 0 {
        return Err(anyhow!("sampler needs at least one chain and one sample"));
    }
    if !(cfg.initial_step.is_finite() && cfg.initial_step > 0.0) {
        return Err(anyhow!("initial step must be positive"));
    }

    info!(
        teams = input.n,
        latent_dim = input.k,
        covariates = input.p,
        chains = cfg.chains,
        warmup = cfg.warmup,
        samples = cfg.samples,
        "sampling latent eigenmodel"
    );

    let chains = (0..cfg.chains)
        .into_par_iter()
        .map(|chain| run_chain(input, cfg, chain))
        .collect::<Result<Vec<_>>>()?;

    PosteriorDraws::new(draw_columns(input.n, input.k, input.p), chains)
}

#[derive(Debug, Clone)]
struct Proposal {
    step: f64,
    accepted: usize,
    proposed: usize,
    total_accepted: usize,
    total_proposed: usize,
}

impl Proposal {
    fn new(step: f64) -> Self {
        Self {
            step,
            accepted: 0,
            proposed: 0,
            total_accepted: 0,
            total_proposed: 0,
        }
    }

    fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        self.total_proposed += 1;
        if accepted {
            self.accepted += 1;
            self.total_accepted += 1;
        }
    }

    fn adapt(&mut self, target: f64) {
        if self.proposed == 0 {
            return;
        }
        let rate = self.accepted as f64 / self.proposed as f64;
        self.step = (self.step * (rate - target).exp()).clamp(MIN_STEP, MAX_STEP);
        self.accepted = 0;
        self.proposed = 0;
    }

    fn reset_totals(&mut self) {
        self.accepted = 0;
        self.proposed = 0;
        self.total_accepted = 0;
        self.total_proposed = 0;
    }

    fn acceptance(&self) -> f64 {
        if self.total_proposed == 0 {
            0.0
        } else {
            self.total_accepted as f64 / self.total_proposed as f64
        }
    }
}

struct ChainState<'a> {
    input: &'a ModelInput,
    params: EigenParams,
    tau_u: f64,
    tau_lambda: f64,
    tau_beta: f64,
    log_lik: f64,
    alpha_prop: Proposal,
    beta_prop: Vec<Proposal>,
    lambda_prop: Vec<Proposal>,
    u_prop: Vec<Proposal>,
}

fn run_chain(input: &ModelInput, cfg: &SamplerConfig, chain: usize) -> Result<Vec<Vec<f64>>> {
    let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(chain as u64));
    let mut state = ChainState::init(input, cfg.initial_step, &mut rng);
    let thin = cfg.thin.max(1);
    let total = cfg.warmup + cfg.samples * thin;
    let mut draws = Vec::with_capacity(cfg.samples);

    for iter in 0..total {
        state.sweep(&mut rng)?;

        if iter < cfg.warmup {
            if (iter + 1) % ADAPT_WINDOW == 0 {
                state.adapt(cfg.target_acceptance);
            }
            if iter + 1 == cfg.warmup {
                state.reset_totals();
            }
            continue;
        }
        if (iter - cfg.warmup + 1) % thin == 0 {
            draws.push(state.record());
        }
    }

    debug!(
        chain = chain + 1,
        alpha_accept = state.alpha_prop.acceptance(),
        u_accept = mean_acceptance(&state.u_prop),
        lambda_accept = mean_acceptance(&state.lambda_prop),
        beta_accept = mean_acceptance(&state.beta_prop),
        "chain finished"
    );
    Ok(draws)
}

fn mean_acceptance(props: &[Proposal]) -> f64 {
    if props.is_empty() {
        return 0.0;
    }
    props.iter().map(Proposal::acceptance).sum::<f64>() / props.len() as f64
}

fn normal_log_density(x: f64, precision: f64) -> f64 {
    0.5 * precision.ln() - 0.5 * precision * x * x
}

fn accept<R: Rng>(rng: &mut R, log_ratio: f64) -> bool {
    log_ratio >= 0.0 || rng.r#gen::<f64>().ln() < log_ratio
}

fn gamma_draw<R: Rng>(rng: &mut R, shape: f64, rate: f64) -> Result<f64> {
    let dist = Gamma::new(shape, 1.0 / rate)
        .map_err(|err| anyhow!("invalid gamma conditional ({shape}, {rate}): {err}"))?;
    Ok(dist.sample(rng))
}

impl<'a> ChainState<'a> {
    fn init<R: Rng>(input: &'a ModelInput, step: f64, rng: &mut R) -> Self {
        let mut params = EigenParams::zeros(input.n, input.k, input.p);
        for lambda in params.lambda.iter_mut() {
            *lambda = 0.5 * rng.sample::<f64, _>(StandardNormal);
        }
        for row in params.u.iter_mut() {
            for v in row.iter_mut() {
                *v = 0.5 * rng.sample::<f64, _>(StandardNormal);
            }
        }
        let log_lik = params.log_likelihood(input);
        Self {
            input,
            params,
            tau_u: 1.0,
            tau_lambda: 1.0,
            tau_beta: 1.0,
            log_lik,
            alpha_prop: Proposal::new(step),
            beta_prop: vec![Proposal::new(step); input.p],
            lambda_prop: vec![Proposal::new(step); input.k],
            u_prop: vec![Proposal::new(step); input.n],
        }
    }

    fn sweep<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        self.update_alpha(rng);
        for p in 0..self.input.p {
            self.update_beta(p, rng);
        }
        for k in 0..self.input.k {
            self.update_lambda(k, rng);
        }
        for i in 0..self.input.n {
            self.update_node(i, rng);
        }
        self.update_precisions(rng)
    }

    fn update_alpha<R: Rng>(&mut self, rng: &mut R) {
        let old = self.params.alpha;
        let prec = 1.0 / (self.input.alpha_sd * self.input.alpha_sd);
        let new = old + self.alpha_prop.step * rng.sample::<f64, _>(StandardNormal);
        self.params.alpha = new;
        let new_ll = self.params.log_likelihood(self.input);
        let ratio = new_ll - self.log_lik + normal_log_density(new, prec)
            - normal_log_density(old, prec);
        let ok = accept(rng, ratio);
        if ok {
            self.log_lik = new_ll;
        } else {
            self.params.alpha = old;
        }
        self.alpha_prop.record(ok);
    }

    fn update_beta<R: Rng>(&mut self, p: usize, rng: &mut R) {
        let old = self.params.beta[p];
        let new = old + self.beta_prop[p].step * rng.sample::<f64, _>(StandardNormal);
        self.params.beta[p] = new;
        let new_ll = self.params.log_likelihood(self.input);
        let ratio = new_ll - self.log_lik + normal_log_density(new, self.tau_beta)
            - normal_log_density(old, self.tau_beta);
        let ok = accept(rng, ratio);
        if ok {
            self.log_lik = new_ll;
        } else {
            self.params.beta[p] = old;
        }
        self.beta_prop[p].record(ok);
    }

    fn update_lambda<R: Rng>(&mut self, k: usize, rng: &mut R) {
        let old = self.params.lambda[k];
        let new = old + self.lambda_prop[k].step * rng.sample::<f64, _>(StandardNormal);
        self.params.lambda[k] = new;
        let new_ll = self.params.log_likelihood(self.input);
        let ratio = new_ll - self.log_lik + normal_log_density(new, self.tau_lambda)
            - normal_log_density(old, self.tau_lambda);
        let ok = accept(rng, ratio);
        if ok {
            self.log_lik = new_ll;
        } else {
            self.params.lambda[k] = old;
        }
        self.lambda_prop[k].record(ok);
    }

    /// Joint random-walk move of row `i` of the embedding. Only pairs touching
    /// `i` change, so the node log-likelihood difference is the full difference.
    fn update_node<R: Rng>(&mut self, i: usize, rng: &mut R) {
        let old = self.params.u[i].clone();
        let old_node_ll = self.params.node_log_likelihood(self.input, i);
        let step = self.u_prop[i].step;
        let new: Vec<f64> = old
            .iter()
            .map(|v| v + step * rng.sample::<f64, _>(StandardNormal))
            .collect();

        let prior = |row: &[f64]| -> f64 {
            row.iter()
                .map(|v| normal_log_density(*v, self.tau_u))
                .sum()
        };
        let old_prior = prior(&old);
        let new_prior = prior(&new);

        self.params.u[i] = new;
        let new_node_ll = self.params.node_log_likelihood(self.input, i);
        let ratio = new_node_ll - old_node_ll + new_prior - old_prior;
        let ok = accept(rng, ratio);
        if ok {
            self.log_lik += new_node_ll - old_node_ll;
        } else {
            self.params.u[i] = old;
        }
        self.u_prop[i].record(ok);
    }

    fn update_precisions<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let input = self.input;
        let u_sq: f64 = self.params.u.iter().flatten().map(|v| v * v).sum();
        let u_count = (input.n * input.k) as f64;
        self.tau_u = gamma_draw(
            rng,
            input.tau_u_shape + 0.5 * u_count,
            input.tau_u_rate + 0.5 * u_sq,
        )?;

        let l_sq: f64 = self.params.lambda.iter().map(|v| v * v).sum();
        self.tau_lambda = gamma_draw(
            rng,
            input.sigma_lambda_shape + 0.5 * input.k as f64,
            input.sigma_lambda_rate + 0.5 * l_sq,
        )?;

        let b_sq: f64 = self.params.beta.iter().map(|v| v * v).sum();
        self.tau_beta = gamma_draw(
            rng,
            input.tau_beta_shape + 0.5 * input.p as f64,
            input.tau_beta_rate + 0.5 * b_sq,
        )?;
        Ok(())
    }

    fn adapt(&mut self, target: f64) {
        self.alpha_prop.adapt(target);
        self.beta_prop.iter_mut().for_each(|p| p.adapt(target));
        self.lambda_prop.iter_mut().for_each(|p| p.adapt(target));
        self.u_prop.iter_mut().for_each(|p| p.adapt(target));
    }

    fn reset_totals(&mut self) {
        self.alpha_prop.reset_totals();
        self.beta_prop.iter_mut().for_each(Proposal::reset_totals);
        self.lambda_prop.iter_mut().for_each(Proposal::reset_totals);
        self.u_prop.iter_mut().for_each(Proposal::reset_totals);
    }

    /// Stores the current state in [`draw_columns`] order.
    fn record(&self) -> Vec<f64> {
        let n = self.input.n;
        let mut row = Vec::with_capacity(draw_columns_len(n, self.input.k, self.input.p));
        row.push(self.params.alpha);
        row.extend(&self.params.beta);
        row.extend(&self.params.lambda);
        for u in &self.params.u {
            row.extend(u);
        }
        row.push(self.tau_u);
        row.push(self.tau_lambda);
        row.push(self.tau_beta);
        for i in 0..n {
            for j in (i + 1)..n {
                row.push(self.params.edge_probability(self.input, i, j));
            }
        }
        row
    }
}

fn draw_columns_len(n: usize, k: usize, p: usize) -> usize {
    1 + p + k + n * k + 3 + n * n.saturating_sub(1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorConfig;

    fn small_input() -> ModelInput {
        // Two blocks {0,1,2} and {3,4,5}: dense within, empty across.
        let n = 6;
        let mut y = vec![vec![0u8; n]; n];
        for block in [[0, 1, 2], [3, 4, 5]] {
            for &i in &block {
                for &j in &block {
                    if i != j {
                        y[i][j] = 1;
                    }
                }
            }
        }
        let priors = PriorConfig::default();
        ModelInput {
            n,
            k: 1,
            p: 1,
            y,
            x: vec![vec![1.0], vec![0.5], vec![0.0], vec![0.0], vec![-0.5], vec![-1.0]],
            sigma_lambda_shape: priors.sigma_lambda_shape,
            sigma_lambda_rate: priors.sigma_lambda_rate,
            tau_u_shape: priors.tau_u_shape,
            tau_u_rate: priors.tau_u_rate,
            tau_beta_shape: priors.tau_beta_shape,
            tau_beta_rate: priors.tau_beta_rate,
            alpha_sd: priors.alpha_sd,
            teams: Vec::new(),
            covariates: Vec::new(),
        }
    }

    fn quick_cfg() -> SamplerConfig {
        SamplerConfig {
            chains: 2,
            warmup: 200,
            samples: 150,
            thin: 2,
            seed: 7,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn column_layout_matches_record_width() {
        let cols = draw_columns(4, 2, 3);
        assert_eq!(cols.len(), draw_columns_len(4, 2, 3));
        assert_eq!(cols[0], "alpha");
        assert_eq!(cols[1], "beta[1]");
        assert_eq!(cols[4], "lambda[1]");
        assert_eq!(cols[6], "U[1,1]");
        assert!(cols.contains(&"p[3,4]".to_string()));
        assert!(!cols.contains(&"p[4,3]".to_string()));
    }

    #[test]
    fn produces_requested_draws_with_valid_probabilities() {
        let input = small_input();
        let draws = sample_posterior(&input, &quick_cfg()).unwrap();
        assert_eq!(draws.chain_count(), 2);
        assert_eq!(draws.draws_per_chain(), 150);
        let col = draws.column_index("p[1,2]").unwrap();
        for chain in draws.series(col) {
            assert!(chain.iter().all(|p| (0.0..=1.0).contains(p)));
        }
        for name in ["tau_u", "tau_lambda", "tau_beta"] {
            assert!(draws.mean(name).unwrap() > 0.0);
        }
    }

    #[test]
    fn same_seed_is_reproducible() {
        let input = small_input();
        let a = sample_posterior(&input, &quick_cfg()).unwrap();
        let b = sample_posterior(&input, &quick_cfg()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn within_block_pairs_score_higher_than_across() {
        let input = small_input();
        let cfg = SamplerConfig {
            warmup: 600,
            samples: 400,
            ..quick_cfg()
        };
        let draws = sample_posterior(&input, &cfg).unwrap();
        let probs = draws.edge_probability_matrix(&input).unwrap();
        let within = (probs[0][1] + probs[1][2] + probs[3][4] + probs[4][5]) / 4.0;
        let across = (probs[0][3] + probs[1][4] + probs[2][5] + probs[0][5]) / 4.0;
        assert!(within > across, "within={within} across={across}");
    }

    #[test]
    fn rejects_zero_chains() {
        let cfg = SamplerConfig {
            chains: 0,
            ..quick_cfg()
        };
        assert!(sample_posterior(&small_input(), &cfg).is_err());
    }
}
