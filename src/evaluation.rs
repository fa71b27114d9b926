use serde::Serialize;
use tracing::{info, warn};

use crate::adjacency::{AdjacencyMatrix, ObservationMask};
use crate::config::EvaluationConfig;
use crate::registry::TeamRegistry;

/// Posterior probability next to the observed outcome for one pair (i < j).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub i: usize,
    pub j: usize,
    pub team_a: String,
    pub team_b: String,
    pub probability: f64,
    pub actual: u8,
    /// False when the pair never reached this meeting, so `actual` is a filler 0.
    pub observed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Classification {
    pub threshold: f64,
    pub samples: usize,
    pub true_pos: usize,
    pub false_pos: usize,
    pub true_neg: usize,
    pub false_neg: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub base_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Picks {
    pub over: Vec<ComparisonRow>,
    pub under: Vec<ComparisonRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub rows: Vec<ComparisonRow>,
    pub classification: Classification,
    pub metrics: Metrics,
    pub bins: Vec<CalibrationBin>,
    pub picks: Picks,
    pub observed_only: bool,
}

/// Joins the probability matrix with the adjacency matrix. Pairs that fall
/// outside either matrix are left out rather than treated as errors.
pub fn compare(
    registry: &TeamRegistry,
    probabilities: &[Vec<f64>],
    adjacency: &AdjacencyMatrix,
    mask: &ObservationMask,
) -> Vec<ComparisonRow> {
    let n = registry
        .len()
        .min(probabilities.len())
        .min(adjacency.size());
    if n < registry.len() {
        warn!(
            teams = registry.len(),
            joined = n,
            "probability or adjacency matrix smaller than registry; comparing the overlap"
        );
    }

    let mut rows = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let Some(&probability) = probabilities[i].get(j) else {
                continue;
            };
            let (Some(team_a), Some(team_b)) = (registry.name(i), registry.name(j)) else {
                continue;
            };
            rows.push(ComparisonRow {
                i,
                j,
                team_a: team_a.to_string(),
                team_b: team_b.to_string(),
                probability,
                actual: adjacency.get(i, j),
                observed: mask.is_observed(i, j),
            });
        }
    }
    rows
}

pub fn classify(rows: &[&ComparisonRow], threshold: f64) -> Classification {
    let mut out = Classification {
        threshold,
        samples: rows.len(),
        ..Classification::default()
    };
    for row in rows {
        let predicted = row.probability >= threshold;
        match (predicted, row.actual == 1) {
            (true, true) => out.true_pos += 1,
            (true, false) => out.false_pos += 1,
            (false, false) => out.true_neg += 1,
            (false, true) => out.false_neg += 1,
        }
    }
    out.accuracy = ratio(out.true_pos + out.true_neg, out.samples);
    out.precision = ratio(out.true_pos, out.true_pos + out.false_pos);
    out.recall = ratio(out.true_pos, out.true_pos + out.false_neg);
    out
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn score(rows: &[&ComparisonRow]) -> Metrics {
    if rows.is_empty() {
        return Metrics::default();
    }
    let mut brier = 0.0;
    let mut log_loss = 0.0;
    let mut positives = 0usize;
    for row in rows {
        let y = f64::from(row.actual);
        brier += (row.probability - y).powi(2);
        let p_actual = if row.actual == 1 {
            row.probability
        } else {
            1.0 - row.probability
        }
        .clamp(1e-12, 1.0);
        log_loss -= p_actual.ln();
        positives += usize::from(row.actual);
    }
    let n = rows.len() as f64;
    Metrics {
        samples: rows.len(),
        brier: brier / n,
        log_loss: log_loss / n,
        base_rate: positives as f64 / n,
    }
}

/// Equal-width reliability bins over [0, 1]. Empty bins are kept with zero counts.
pub fn reliability_bins(rows: &[&ComparisonRow], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(1);
    let mut sums = vec![(0usize, 0.0_f64, 0.0_f64); bins];
    for row in rows {
        let idx = ((row.probability * bins as f64) as usize).min(bins - 1);
        let slot = &mut sums[idx];
        slot.0 += 1;
        slot.1 += row.probability;
        slot.2 += f64::from(row.actual);
    }
    sums.into_iter()
        .enumerate()
        .map(|(idx, (count, pred, actual))| CalibrationBin {
            bucket_start: idx as f64 / bins as f64,
            bucket_end: (idx + 1) as f64 / bins as f64,
            count,
            avg_pred: if count > 0 { pred / count as f64 } else { 0.0 },
            actual_rate: if count > 0 { actual / count as f64 } else { 0.0 },
        })
        .collect()
}

/// High-confidence pairs on either side of the threshold, most confident first.
/// Thresholds below 0.5 are mirrored, so a pair lands in at most one list.
pub fn picks(rows: &[&ComparisonRow], threshold: f64) -> Picks {
    let upper = threshold.max(1.0 - threshold);
    let lower = 1.0 - upper;
    let mut over: Vec<ComparisonRow> = rows
        .iter()
        .filter(|r| r.probability >= upper)
        .map(|r| (*r).clone())
        .collect();
    let mut under: Vec<ComparisonRow> = rows
        .iter()
        .filter(|r| r.probability <= lower && r.probability < upper)
        .map(|r| (*r).clone())
        .collect();
    over.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    under.sort_by(|a, b| a.probability.total_cmp(&b.probability));
    Picks { over, under }
}

pub fn evaluate(
    registry: &TeamRegistry,
    probabilities: &[Vec<f64>],
    adjacency: &AdjacencyMatrix,
    mask: &ObservationMask,
    cfg: &EvaluationConfig,
) -> Evaluation {
    let rows = compare(registry, probabilities, adjacency, mask);
    let scored: Vec<&ComparisonRow> = rows
        .iter()
        .filter(|r| !cfg.observed_only || r.observed)
        .collect();

    let classification = classify(&scored, cfg.threshold);
    let metrics = score(&scored);
    let bins = reliability_bins(&scored, cfg.reliability_bins);
    let picks = picks(&scored, cfg.threshold);

    info!(
        pairs = rows.len(),
        scored = scored.len(),
        accuracy = classification.accuracy,
        brier = metrics.brier,
        log_loss = metrics.log_loss,
        over_picks = picks.over.len(),
        under_picks = picks.under.len(),
        "evaluated posterior predictions"
    );

    Evaluation {
        rows,
        classification,
        metrics,
        bins,
        picks,
        observed_only: cfg.observed_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(p: f64, actual: u8) -> ComparisonRow {
        ComparisonRow {
            i: 0,
            j: 1,
            team_a: "A".to_string(),
            team_b: "B".to_string(),
            probability: p,
            actual,
            observed: true,
        }
    }

    #[test]
    fn confusion_counts_and_rates() {
        let rows = [row(0.9, 1), row(0.7, 0), row(0.2, 0), row(0.4, 1), row(0.5, 1)];
        let refs: Vec<&ComparisonRow> = rows.iter().collect();
        let c = classify(&refs, 0.5);
        assert_eq!((c.true_pos, c.false_pos, c.true_neg, c.false_neg), (2, 1, 1, 1));
        assert!((c.accuracy - 0.6).abs() < 1e-12);
        assert!((c.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((c.recall - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs_degrade_to_zeroes() {
        let c = classify(&[], 0.5);
        assert_eq!(c.samples, 0);
        assert_eq!(c.accuracy, 0.0);
        assert_eq!(score(&[]), Metrics::default());
        let p = picks(&[], 0.6);
        assert!(p.over.is_empty() && p.under.is_empty());
        let bins = reliability_bins(&[], 4);
        assert_eq!(bins.len(), 4);
        assert!(bins.iter().all(|b| b.count == 0));
    }

    #[test]
    fn brier_and_log_loss() {
        let rows = [row(0.8, 1), row(0.8, 0)];
        let refs: Vec<&ComparisonRow> = rows.iter().collect();
        let m = score(&refs);
        assert!((m.brier - (0.04 + 0.64) / 2.0).abs() < 1e-12);
        assert!((m.log_loss - (-(0.8_f64.ln()) - 0.2_f64.ln()) / 2.0).abs() < 1e-12);
        assert!((m.base_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn probability_one_lands_in_last_bin() {
        let rows = [row(1.0, 1), row(0.05, 0)];
        let refs: Vec<&ComparisonRow> = rows.iter().collect();
        let bins = reliability_bins(&refs, 10);
        assert_eq!(bins[9].count, 1);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[9].actual_rate, 1.0);
    }

    #[test]
    fn picks_are_sorted_by_confidence() {
        let rows = [row(0.65, 1), row(0.9, 1), row(0.3, 0), row(0.1, 0), row(0.5, 1)];
        let refs: Vec<&ComparisonRow> = rows.iter().collect();
        let p = picks(&refs, 0.6);
        let over: Vec<f64> = p.over.iter().map(|r| r.probability).collect();
        let under: Vec<f64> = p.under.iter().map(|r| r.probability).collect();
        assert_eq!(over, vec![0.9, 0.65]);
        assert_eq!(under, vec![0.1, 0.3]);
    }

    #[test]
    fn low_threshold_does_not_double_count_pairs() {
        let rows = [row(0.45, 1), row(0.55, 0), row(0.8, 1), row(0.2, 0), row(0.5, 1)];
        let refs: Vec<&ComparisonRow> = rows.iter().collect();
        let mirrored = picks(&refs, 0.3);
        assert_eq!(mirrored, picks(&refs, 0.7));
        let over: Vec<f64> = mirrored.over.iter().map(|r| r.probability).collect();
        let under: Vec<f64> = mirrored.under.iter().map(|r| r.probability).collect();
        assert_eq!(over, vec![0.8]);
        assert_eq!(under, vec![0.2]);

        let even = picks(&refs, 0.5);
        for r in &even.over {
            assert!(!even.under.contains(r), "{} in both lists", r.probability);
        }
        assert_eq!(even.over.len() + even.under.len(), rows.len());
    }
}
