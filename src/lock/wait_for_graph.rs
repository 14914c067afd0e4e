use std::collections::{BTreeMap, BTreeSet};

use crate::common::TransactionID;

/// Directed "waits for" relation between transactions: an edge `a -> b`
/// means `a` is queued behind a lock `b` currently holds.
///
/// The graph is an owned snapshot; the lock table can change freely while
/// a cycle search runs over it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitForGraph {
    edges: BTreeMap<TransactionID, BTreeSet<TransactionID>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, waiter: TransactionID, holder: TransactionID) {
        if waiter != holder {
            self.edges.entry(waiter).or_default().insert(holder);
        }
    }

    pub fn waits_for(&self, waiter: TransactionID) -> Vec<TransactionID> {
        self.edges
            .get(&waiter)
            .map(|holders| holders.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Returns the transactions on some cycle, in wait order, or `None` when
    /// the graph is acyclic.
    pub fn find_cycle(&self) -> Option<Vec<TransactionID>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();
        let mut on_stack = BTreeSet::new();

        for &start in self.edges.keys() {
            if visited.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.dfs(start, &mut visited, &mut stack, &mut on_stack) {
                return Some(cycle);
            }
        }

        None
    }

    /// The youngest transaction (highest id) on the cycle is sacrificed.
    pub fn choose_victim(cycle: &[TransactionID]) -> Option<TransactionID> {
        cycle.iter().copied().max()
    }

    fn dfs(
        &self,
        node: TransactionID,
        visited: &mut BTreeSet<TransactionID>,
        stack: &mut Vec<TransactionID>,
        on_stack: &mut BTreeSet<TransactionID>,
    ) -> Option<Vec<TransactionID>> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(holders) = self.edges.get(&node) {
            for &next in holders {
                if on_stack.contains(&next) {
                    let pos = stack.iter().position(|&txn_id| txn_id == next)?;
                    return Some(stack[pos..].to_vec());
                }
                if !visited.contains(&next) {
                    if let Some(cycle) = self.dfs(next, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(&node);
        None
    }
}
