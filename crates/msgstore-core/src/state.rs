// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Declared process-state transition graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::ProcessState;

/// The set of states reachable from each state, declared per queue.
///
/// A transition that is not declared here is rejected by the queue
/// (it returns `false`), it is never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateGraph {
    edges: BTreeMap<ProcessState, BTreeSet<ProcessState>>,
}

impl Default for StateGraph {
    fn default() -> Self {
        use ProcessState::*;

        let mut graph = Self::empty();
        graph.allow(Available, &[InProcess, Done, Error, Hold]);
        graph.allow(InProcess, &[Available, Done, Error, Hold]);
        graph.allow(Error, &[Available, Hold]);
        graph.allow(Hold, &[Available, Error]);
        graph
    }
}

impl StateGraph {
    pub fn empty() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    /// Declares `from -> to` for every state in `to`. Self-loops are ignored.
    pub fn allow(&mut self, from: ProcessState, to: &[ProcessState]) -> &mut Self {
        let targets = self.edges.entry(from).or_default();
        targets.extend(to.iter().copied().filter(|t| *t != from));
        self
    }

    /// Restricts the graph to edges whose both ends are in `known`.
    pub fn restrict_to(&self, known: &BTreeSet<ProcessState>) -> Self {
        let edges = self
            .edges
            .iter()
            .filter(|(from, _)| known.contains(from))
            .map(|(from, targets)| {
                let targets = targets.intersection(known).copied().collect();
                (*from, targets)
            })
            .collect();
        Self { edges }
    }

    pub fn targets(&self, from: ProcessState) -> BTreeSet<ProcessState> {
        self.edges.get(&from).cloned().unwrap_or_default()
    }

    pub fn allows(&self, from: ProcessState, to: ProcessState) -> bool {
        self.edges.get(&from).is_some_and(|t| t.contains(&to))
    }

    /// All states from which `to` can be reached in one step.
    pub fn sources(&self, to: ProcessState) -> BTreeSet<ProcessState> {
        self.edges
            .iter()
            .filter(|(_, targets)| targets.contains(&to))
            .map(|(from, _)| *from)
            .collect()
    }
}
