use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::error::DataError;
use crate::match_log::MatchRecord;

/// Fixed bijection between team names and matrix positions for one run.
///
/// Names are kept sorted so the same input always yields the same layout,
/// and every stage that indexes matrices borrows the same registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamRegistry {
    names: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TeamRegistry {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sorted: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let names: Vec<String> = sorted.into_iter().collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self { names, index }
    }

    pub fn from_matches(matches: &[MatchRecord]) -> Self {
        Self::from_names(
            matches
                .iter()
                .flat_map(|m| [m.team_a.as_str(), m.team_b.as_str()]),
        )
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<usize, DataError> {
        self.index_of(name)
            .ok_or_else(|| DataError::UnknownTeam(name.to_string()))
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }
}
