//! Execution planning: Kahn's algorithm over the confirmed dependency edges,
//! yielding a linear order plus layered batches of parallelizable endpoints.

use crate::error::CoreError;
use crate::model::{Api, ApiDependency, Id};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub sorted_order: Vec<Id>,
    /// Maximal sets of endpoints with no mutual dependency; the executor runs
    /// one layer at a time, members concurrently.
    pub execution_levels: Vec<Vec<Id>>,
}

pub struct ExecutionPlanner;

impl ExecutionPlanner {
    /// Nodes are all apis of the project, including isolated ones. Fails with
    /// `CycleDetected` when the edges do not admit a topological order.
    pub fn plan(apis: &[Api], dependencies: &[ApiDependency]) -> Result<ExecutionPlan, CoreError> {
        let node_ids: Vec<&Id> = apis.iter().map(|api| &api.id).collect();
        let known: HashSet<&Id> = node_ids.iter().copied().collect();

        let mut in_degree: HashMap<&Id, usize> =
            node_ids.iter().map(|id| (*id, 0usize)).collect();
        let mut outgoing: HashMap<&Id, Vec<&Id>> = HashMap::new();
        let mut seen_edges = HashSet::new();
        for dependency in dependencies {
            let source = &dependency.source_api_id;
            let target = &dependency.target_api_id;
            if !known.contains(source) || !known.contains(target) {
                continue;
            }
            if !seen_edges.insert((source, target)) {
                continue;
            }
            outgoing.entry(source).or_default().push(target);
            *in_degree.entry(target).or_default() += 1;
        }

        let mut sorted_order = Vec::with_capacity(node_ids.len());
        let mut execution_levels = Vec::new();
        // Input order keeps layers deterministic.
        let mut layer: Vec<&Id> = node_ids
            .iter()
            .copied()
            .filter(|id| in_degree[*id] == 0)
            .collect();

        while !layer.is_empty() {
            let mut next_layer = Vec::new();
            for node in &layer {
                sorted_order.push((*node).clone());
                for target in outgoing.get(*node).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(*target) {
                        *degree -= 1;
                        if *degree == 0 {
                            next_layer.push(*target);
                        }
                    }
                }
            }
            execution_levels.push(layer.iter().map(|id| (*id).clone()).collect());
            layer = next_layer;
        }

        if sorted_order.len() != node_ids.len() {
            return Err(CoreError::CycleDetected);
        }

        Ok(ExecutionPlan {
            sorted_order,
            execution_levels,
        })
    }
}
