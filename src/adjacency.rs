use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::DataError;
use crate::match_log::MatchRecord;
use crate::registry::TeamRegistry;

/// Order-independent identity of a matchup: the lexicographically smaller team first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PairKey {
    first: String,
    second: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first: first.to_string(),
            second: second.to_string(),
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }
}

/// Square, symmetric, zero-diagonal 0/1 matrix for one meeting number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjacencyMatrix {
    rows: Vec<Vec<u8>>,
}

impl AdjacencyMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            rows: vec![vec![0; n]; n],
        }
    }

    pub fn from_rows(rows: Vec<Vec<u8>>) -> Self {
        Self { rows }
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, i: usize, j: usize) -> u8 {
        self.rows[i][j]
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn edge_count(&self) -> usize {
        let mut n = 0;
        for i in 0..self.size() {
            for j in (i + 1)..self.size() {
                n += usize::from(self.rows[i][j]);
            }
        }
        n
    }

    /// Checks squareness, symmetry and the zero diagonal.
    pub fn validate(&self) -> Result<(), DataError> {
        let n = self.size();
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != n {
                return Err(DataError::DimensionMismatch {
                    what: format!("adjacency row {i}"),
                    expected: n,
                    actual: row.len(),
                });
            }
        }
        for i in 0..n {
            if self.rows[i][i] != 0 {
                return Err(DataError::NonZeroDiagonal(i));
            }
            for j in (i + 1)..n {
                if self.rows[i][j] != self.rows[j][i] {
                    return Err(DataError::Asymmetric { row: i, col: j });
                }
            }
        }
        Ok(())
    }
}

/// Which cells of the matching adjacency matrix come from a real meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservationMask {
    rows: Vec<Vec<bool>>,
}

impl ObservationMask {
    pub fn is_observed(&self, i: usize, j: usize) -> bool {
        self.rows[i][j]
    }

    pub fn observed_pairs(&self) -> usize {
        let n = self.rows.len();
        (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .filter(|&(i, j)| self.rows[i][j])
            .count()
    }
}

/// Adjacency matrices indexed by meeting number, built once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjacencyStack {
    team_count: usize,
    matrices: Vec<AdjacencyMatrix>,
    masks: Vec<ObservationMask>,
}

impl AdjacencyStack {
    pub fn team_count(&self) -> usize {
        self.team_count
    }

    /// Number of meetings M.
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn matrices(&self) -> &[AdjacencyMatrix] {
        &self.matrices
    }

    /// Matrix for a 1-based meeting number.
    pub fn meeting(&self, meeting: usize) -> Result<&AdjacencyMatrix, DataError> {
        meeting
            .checked_sub(1)
            .and_then(|idx| self.matrices.get(idx))
            .ok_or(DataError::MeetingOutOfRange {
                requested: meeting,
                available: self.matrices.len(),
            })
    }

    pub fn mask(&self, meeting: usize) -> Result<&ObservationMask, DataError> {
        meeting
            .checked_sub(1)
            .and_then(|idx| self.masks.get(idx))
            .ok_or(DataError::MeetingOutOfRange {
                requested: meeting,
                available: self.masks.len(),
            })
    }
}

/// A match tagged with its 1-based meeting number within its pair.
#[derive(Debug, Clone, Copy)]
pub struct NumberedMatch<'a> {
    pub meeting: usize,
    pub record: &'a MatchRecord,
}

/// Sorts matches by date (stable, so same-day rows keep input order) and
/// numbers each pair's meetings 1..k in that order. Self-play rows are not
/// meetings and get no number.
pub fn assign_meetings(matches: &[MatchRecord]) -> Vec<NumberedMatch<'_>> {
    let mut ordered: Vec<&MatchRecord> = matches.iter().filter(|m| !m.is_self_play()).collect();
    ordered.sort_by_key(|m| m.date);

    let mut counts: HashMap<PairKey, usize> = HashMap::new();
    ordered
        .into_iter()
        .map(|record| {
            let count = counts.entry(record.pair_key()).or_insert(0);
            *count += 1;
            NumberedMatch {
                meeting: *count,
                record,
            }
        })
        .collect()
}

pub fn meeting_counts(matches: &[MatchRecord]) -> BTreeMap<PairKey, usize> {
    let mut counts = BTreeMap::new();
    for m in matches.iter().filter(|m| !m.is_self_play()) {
        *counts.entry(m.pair_key()).or_insert(0) += 1;
    }
    counts
}

pub fn build_adjacency_stack(
    matches: &[MatchRecord],
    registry: &TeamRegistry,
) -> Result<AdjacencyStack, DataError> {
    let n = registry.len();
    let numbered = assign_meetings(matches);

    let mut layers = numbered.iter().try_fold(
        BTreeMap::<usize, (Vec<Vec<u8>>, Vec<Vec<bool>>)>::new(),
        |mut layers, nm| {
            let a = registry.require(&nm.record.team_a)?;
            let b = registry.require(&nm.record.team_b)?;
            let edge = nm.record.edge();
            let (adj, mask) = layers
                .entry(nm.meeting)
                .or_insert_with(|| (vec![vec![0; n]; n], vec![vec![false; n]; n]));
            adj[a][b] = edge;
            adj[b][a] = edge;
            mask[a][b] = true;
            mask[b][a] = true;
            Ok::<_, DataError>(layers)
        },
    )?;

    let meetings = layers.keys().next_back().copied().unwrap_or(0);
    let (matrices, masks): (Vec<_>, Vec<_>) = (1..=meetings)
        .map(|m| {
            let (mut adj, mut mask) = layers
                .remove(&m)
                .unwrap_or_else(|| (vec![vec![0; n]; n], vec![vec![false; n]; n]));
            for i in 0..n {
                adj[i][i] = 0;
                mask[i][i] = false;
            }
            (AdjacencyMatrix { rows: adj }, ObservationMask { rows: mask })
        })
        .unzip();

    Ok(AdjacencyStack {
        team_count: n,
        matrices,
        masks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_log::parse_date;

    fn rec(row: usize, date: &str, a: &str, b: &str, margin: f64) -> MatchRecord {
        MatchRecord::new(row, parse_date(date).unwrap(), a, b, margin)
    }

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(PairKey::new("LAL", "BOS"), PairKey::new("BOS", "LAL"));
        assert_eq!(PairKey::new("LAL", "BOS").first(), "BOS");
    }

    #[test]
    fn meetings_follow_global_date_order() {
        let rows = vec![
            rec(2, "2024-02-01", "A", "B", 1.0),
            rec(3, "2024-01-01", "B", "A", -1.0),
            rec(4, "2024-01-15", "A", "C", 2.0),
        ];
        let numbered = assign_meetings(&rows);
        let rows_by_meeting: Vec<(usize, usize)> =
            numbered.iter().map(|n| (n.record.row, n.meeting)).collect();
        assert_eq!(rows_by_meeting, vec![(3, 1), (4, 1), (2, 2)]);
    }

    #[test]
    fn self_play_rows_are_not_meetings() {
        let rows = vec![rec(2, "2024-01-01", "A", "A", 5.0)];
        let reg = TeamRegistry::from_matches(&rows);
        let stack = build_adjacency_stack(&rows, &reg).unwrap();
        assert!(stack.is_empty());
        assert!(meeting_counts(&rows).is_empty());
    }

    #[test]
    fn self_play_does_not_inflate_meeting_count() {
        let rows = vec![
            rec(2, "2024-01-01", "A", "B", 3.0),
            rec(3, "2024-01-02", "A", "A", 1.0),
            rec(4, "2024-01-03", "A", "A", -1.0),
            rec(5, "2024-01-04", "A", "A", 2.0),
        ];
        let reg = TeamRegistry::from_matches(&rows);
        let stack = build_adjacency_stack(&rows, &reg).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.meeting(1).unwrap().get(0, 1), 1);
        assert_eq!(stack.meeting(1).unwrap().get(0, 0), 0);
        assert!(!stack.mask(1).unwrap().is_observed(0, 0));
        assert_eq!(assign_meetings(&rows).len(), 1);
    }

    #[test]
    fn unknown_team_is_reported() {
        let rows = vec![rec(2, "2024-01-01", "A", "B", 5.0)];
        let reg = TeamRegistry::from_names(["A"]);
        assert_eq!(
            build_adjacency_stack(&rows, &reg),
            Err(DataError::UnknownTeam("B".to_string()))
        );
    }

    #[test]
    fn validate_catches_asymmetry() {
        let m = AdjacencyMatrix::from_rows(vec![vec![0, 1], vec![0, 0]]);
        assert_eq!(m.validate(), Err(DataError::Asymmetric { row: 0, col: 1 }));
        let m = AdjacencyMatrix::from_rows(vec![vec![1, 0], vec![0, 0]]);
        assert_eq!(m.validate(), Err(DataError::NonZeroDiagonal(0)));
    }

    #[test]
    fn meeting_zero_is_out_of_range() {
        let stack = build_adjacency_stack(&[], &TeamRegistry::from_names(["A"])).unwrap();
        assert!(stack.is_empty());
        assert!(stack.meeting(0).is_err());
        assert!(stack.meeting(1).is_err());
    }
}
