//! The result document tree.

use crate::hash::group_id;
use crate::types::{SolutionGroup, SolutionRecord};
use crate::{ResultsError, ResultsResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    /// RFC 3339 creation time.
    pub created: String,
    pub deck_digest: String,
    pub solutions: Vec<SolutionGroup>,
    /// Groups opened so far, pruned ones included.
    #[serde(skip)]
    opened: usize,
}

impl ResultDocument {
    pub fn new(deck_digest: impl Into<String>) -> Self {
        Self {
            created: chrono::Utc::now().to_rfc3339(),
            deck_digest: deck_digest.into(),
            solutions: Vec::new(),
            opened: 0,
        }
    }

    /// Append a new, empty group and return its index.
    pub fn begin_group(&mut self, label: &str, solve_type: &str) -> usize {
        let id = group_id(&self.deck_digest, self.opened);
        self.opened += 1;
        self.solutions.push(SolutionGroup {
            id,
            label: label.to_string(),
            solve_type: solve_type.to_string(),
            solutions: Vec::new(),
        });
        self.solutions.len() - 1
    }

    /// Append a solution to group `index`; its `index` field is renumbered
    /// to its position within the group.
    pub fn record(&mut self, index: usize, mut solution: SolutionRecord) -> ResultsResult<()> {
        let group = self
            .solutions
            .get_mut(index)
            .ok_or(ResultsError::GroupNotFound { index })?;
        solution.index = group.solutions.len();
        group.solutions.push(solution);
        Ok(())
    }

    pub fn group(&self, index: usize) -> Option<&SolutionGroup> {
        self.solutions.get(index)
    }

    pub fn find_group(&self, label: &str) -> Option<&SolutionGroup> {
        self.solutions.iter().find(|g| g.label == label)
    }

    pub fn groups(&self) -> &[SolutionGroup] {
        &self.solutions
    }

    /// Drop groups without solutions; returns how many were removed.
    pub fn prune_empty(&mut self) -> usize {
        let before = self.solutions.len();
        self.solutions.retain(|g| !g.solutions.is_empty());
        before - self.solutions.len()
    }

    /// Total number of recorded solutions over all groups.
    pub fn solution_count(&self) -> usize {
        self.solutions.iter().map(|g| g.solutions.len()).sum()
    }

    /// Empty groups never reach a sink.
    pub fn to_json(&self) -> ResultsResult<String> {
        let mut persisted = self.clone();
        persisted.prune_empty();
        Ok(serde_json::to_string_pretty(&persisted)?)
    }
}
