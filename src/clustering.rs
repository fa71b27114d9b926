//! Team clustering on posterior latent structure.
//!
//! Coordinates come from the leading eigenpairs of the posterior mean latent
//! effect matrix (or, failing that, rows of the edge-probability matrix) and are
//! grouped with seeded k-means.

use nalgebra::{DMatrix, SymmetricEigen};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::registry::TeamRegistry;

const KMEANS_ITERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSource {
    LatentEigenvectors,
    ProbabilityProfiles,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamCluster {
    pub team: String,
    pub cluster: usize,
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clustering {
    pub source: CoordinateSource,
    pub eigenvalues: Vec<f64>,
    pub assignments: Vec<TeamCluster>,
    pub within_ss: f64,
}

/// Leading `k` eigenpairs (by absolute eigenvalue) of a symmetric matrix.
/// Eigenvectors are unit length, sign fixed so the largest-magnitude entry is
/// positive.
pub fn top_eigenpairs(matrix: &[Vec<f64>], k: usize) -> Vec<(f64, Vec<f64>)> {
    let n = matrix.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    let dense = DMatrix::from_fn(n, n, |i, j| {
        let a = matrix[i].get(j).copied().unwrap_or(0.0);
        let b = matrix[j].get(i).copied().unwrap_or(0.0);
        0.5 * (a + b)
    });
    let eigen = SymmetricEigen::new(dense);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .abs()
            .total_cmp(&eigen.eigenvalues[a].abs())
    });

    order
        .into_iter()
        .take(k)
        .map(|idx| {
            let mut v: Vec<f64> = eigen.eigenvectors.column(idx).iter().copied().collect();
            if let Some(pivot) = v
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                && pivot < 0.0
            {
                v.iter_mut().for_each(|x| *x = -*x);
            }
            (eigen.eigenvalues[idx], v)
        })
        .collect()
}

/// Team coordinates `v_k * sqrt(|lambda_k|)` from the top `k` eigenpairs.
pub fn eigen_coordinates(matrix: &[Vec<f64>], k: usize) -> (Vec<f64>, Vec<Vec<f64>>) {
    let pairs = top_eigenpairs(matrix, k);
    let n = matrix.len();
    let coords = (0..n)
        .map(|i| {
            pairs
                .iter()
                .map(|(val, vec)| vec[i] * val.abs().sqrt())
                .collect()
        })
        .collect();
    (pairs.iter().map(|(val, _)| *val).collect(), coords)
}

/// Seeded k-means with k-means++ initialisation. Returns assignments and the
/// within-cluster sum of squares.
pub fn kmeans(points: &[Vec<f64>], k: usize, seed: u64) -> (Vec<usize>, f64) {
    let n = points.len();
    if n == 0 || k == 0 {
        return (Vec::new(), 0.0);
    }
    let k = k.min(n);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut centroids: Vec<Vec<f64>> = vec![points[rng.gen_range(0..n)].clone()];
    while centroids.len() < k {
        let dists: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| sq_dist(p, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = dists.iter().sum();
        let next = if total <= 0.0 {
            // All remaining points coincide with a centroid.
            (0..n)
                .find(|i| !centroids.iter().any(|c| c == &points[*i]))
                .unwrap_or(centroids.len() % n)
        } else {
            let mut target = rng.r#gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, d) in dists.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        centroids.push(points[next].clone());
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let best = nearest(p, &centroids);
            if best != assignment[i] {
                assignment[i] = best;
                changed = true;
            }
        }

        let dim = points[0].len();
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f64>> = points
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == c)
                .map(|(p, _)| p)
                .collect();
            if members.is_empty() {
                continue;
            }
            for d in 0..dim {
                centroid[d] = members.iter().map(|p| p[d]).sum::<f64>() / members.len() as f64;
            }
        }
        if !changed {
            break;
        }
    }

    let within = points
        .iter()
        .zip(&assignment)
        .map(|(p, a)| sq_dist(p, &centroids[*a]))
        .sum();
    (assignment, within)
}

/// Clusters teams. `latent` is the posterior mean latent effect matrix when the
/// draws carry embeddings; otherwise the probability rows are used.
pub fn cluster_teams(
    registry: &TeamRegistry,
    latent: Option<&[Vec<f64>]>,
    probabilities: &[Vec<f64>],
    latent_dim: usize,
    clusters: usize,
    seed: u64,
) -> Clustering {
    let (source, eigenvalues, coords) = match latent {
        Some(matrix) if !matrix.is_empty() => {
            let (vals, coords) = eigen_coordinates(matrix, latent_dim.max(1));
            (CoordinateSource::LatentEigenvectors, vals, coords)
        }
        _ => (
            CoordinateSource::ProbabilityProfiles,
            Vec::new(),
            probabilities.to_vec(),
        ),
    };

    let n = registry.len().min(coords.len());
    let coords = &coords[..n];
    let (assignment, within_ss) = kmeans(coords, clusters, seed);
    let assignments = assignment
        .into_iter()
        .zip(coords)
        .enumerate()
        .filter_map(|(i, (cluster, c))| {
            registry.name(i).map(|team| TeamCluster {
                team: team.to_string(),
                cluster,
                coordinates: c.clone(),
            })
        })
        .collect();

    Clustering {
        source,
        eigenvalues,
        assignments,
        within_ss,
    }
}

fn nearest(p: &[f64], centroids: &[Vec<f64>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, sq_dist(p, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_eigenpairs_of_diagonal_matrix() {
        let m = vec![
            vec![3.0, 0.0, 0.0],
            vec![0.0, -5.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let pairs = top_eigenpairs(&m, 2);
        assert!((pairs[0].0 + 5.0).abs() < 1e-6, "{:?}", pairs[0]);
        assert!((pairs[0].1[1] - 1.0).abs() < 1e-6);
        assert!((pairs[1].0 - 3.0).abs() < 1e-6);
    }

    #[test]
    fn separates_opposite_sign_eigenvalues_of_equal_magnitude() {
        // 2 u1 u1^T - 2 u2 u2^T with disjoint supports.
        let h = 1.0 / 2.0_f64.sqrt();
        let u1 = [h, h, 0.0, 0.0];
        let u2 = [0.0, 0.0, h, h];
        let m: Vec<Vec<f64>> = (0..4)
            .map(|i| (0..4).map(|j| 2.0 * u1[i] * u1[j] - 2.0 * u2[i] * u2[j]).collect())
            .collect();
        let pairs = top_eigenpairs(&m, 2);
        let mut vals: Vec<f64> = pairs.iter().map(|(v, _)| *v).collect();
        vals.sort_by(f64::total_cmp);
        assert!((vals[0] + 2.0).abs() < 1e-9, "{vals:?}");
        assert!((vals[1] - 2.0).abs() < 1e-9, "{vals:?}");

        for (val, vec) in &pairs {
            let expected = if *val > 0.0 { &u1 } else { &u2 };
            for (a, b) in vec.iter().zip(expected) {
                assert!((a - b).abs() < 1e-9, "{val}: {vec:?}");
            }
        }

        let (_, coords) = eigen_coordinates(&m, 2);
        assert!((coords[0][0] - coords[1][0]).abs() < 1e-9);
        assert!((coords[0][1] - coords[1][1]).abs() < 1e-9);
        assert!((coords[0][0] - coords[2][0]).abs() + (coords[0][1] - coords[2][1]).abs() > 1.0);
    }

    #[test]
    fn rank_one_matrix_coordinates() {
        // u = (1, 1, -1), lambda = 2 -> L = 2 u u^T.
        let u = [1.0, 1.0, -1.0];
        let m: Vec<Vec<f64>> = (0..3)
            .map(|i| (0..3).map(|j| 2.0 * u[i] * u[j]).collect())
            .collect();
        let (vals, coords) = eigen_coordinates(&m, 1);
        assert!((vals[0] - 6.0).abs() < 1e-6);
        assert!((coords[0][0] - coords[1][0]).abs() < 1e-6);
        assert!((coords[0][0] + coords[2][0]).abs() < 1e-6);
    }

    #[test]
    fn kmeans_separates_obvious_groups() {
        let points = vec![
            vec![0.0, 0.1],
            vec![0.1, 0.0],
            vec![5.0, 5.1],
            vec![5.1, 5.0],
        ];
        let (assign, within) = kmeans(&points, 2, 42);
        assert_eq!(assign[0], assign[1]);
        assert_eq!(assign[2], assign[3]);
        assert_ne!(assign[0], assign[2]);
        assert!(within < 0.1);
    }

    #[test]
    fn kmeans_handles_degenerate_inputs() {
        assert_eq!(kmeans(&[], 3, 1), (Vec::new(), 0.0));
        let same = vec![vec![1.0], vec![1.0]];
        let (assign, within) = kmeans(&same, 5, 1);
        assert_eq!(assign.len(), 2);
        assert_eq!(within, 0.0);
    }

    #[test]
    fn falls_back_to_probability_profiles() {
        let reg = TeamRegistry::from_names(["A", "B", "C"]);
        let probs = vec![
            vec![0.0, 0.9, 0.1],
            vec![0.9, 0.0, 0.1],
            vec![0.1, 0.1, 0.0],
        ];
        let c = cluster_teams(&reg, None, &probs, 2, 2, 9);
        assert_eq!(c.source, CoordinateSource::ProbabilityProfiles);
        assert_eq!(c.assignments.len(), 3);
        assert!(c.eigenvalues.is_empty());
        assert_eq!(c.assignments[1].team, "B");
    }
}
