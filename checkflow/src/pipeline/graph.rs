//! The stage dependency graph.
//!
//! Ordering is deterministic: Kahn's algorithm with ties broken by the order
//! in which stages were declared.

use super::StageDefinition;
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// A validated directed acyclic graph of stage definitions.
#[derive(Debug)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage definitions by name.
    stages: HashMap<String, StageDefinition>,
    /// Declaration order.
    stage_order: Vec<String>,
}

impl StageGraph {
    pub(crate) fn new(
        name: String,
        stages: HashMap<String, StageDefinition>,
        stage_order: Vec<String>,
    ) -> Self {
        Self {
            name,
            stages,
            stage_order,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns stage names in declaration order.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.stage_order
    }

    /// Returns true if the graph has a stage with this name.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.stages.contains_key(stage)
    }

    /// Returns the definition of a stage.
    #[must_use]
    pub fn definition(&self, stage: &str) -> Option<&StageDefinition> {
        self.stages.get(stage)
    }

    /// Returns the direct dependents of a stage, in declaration order.
    #[must_use]
    pub fn dependents(&self, stage: &str) -> Vec<&str> {
        self.stage_order
            .iter()
            .filter(|name| {
                self.stages
                    .get(name.as_str())
                    .is_some_and(|def| def.dependencies.iter().any(|d| d == stage))
            })
            .map(String::as_str)
            .collect()
    }

    /// Returns every stage transitively downstream of the given roots,
    /// including the roots themselves.
    #[must_use]
    pub fn downstream_closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = roots.into_iter().map(str::to_string).collect();

        while let Some(stage) = queue.pop_front() {
            if !seen.insert(stage.clone()) {
                continue;
            }
            for child in self.dependents(&stage) {
                if !seen.contains(child) {
                    queue.push_back(child.to_string());
                }
            }
        }
        seen
    }

    /// Checks the graph for unknown dependencies and cycles.
    ///
    /// # Errors
    ///
    /// Returns a `PipelineValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one stage to the pipeline before building."),
                ));
        }

        for name in &self.stage_order {
            let Some(def) = self.stages.get(name) else {
                continue;
            };
            def.validate()?;
            for dep in &def.dependencies {
                if !self.stages.contains_key(dep) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{name}' depends on unknown stage '{dep}'"
                    ))
                    .with_stages(vec![name.clone(), dep.clone()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "CONTRACT-004-MISSING_DEP",
                            format!("Dependency '{dep}' not found"),
                        )
                        .with_fix_hint("Declare the dependency as a stage of this pipeline."),
                    ));
                }
            }
        }

        self.detect_cycles()?;
        Ok(())
    }

    /// Returns a deterministic topological order of the whole graph.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetectedError` if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<String>, CycleDetectedError> {
        let all: HashSet<&str> = self.stage_order.iter().map(String::as_str).collect();
        self.order_subset(&all)
    }

    /// Returns a deterministic topological order of a subset of stages.
    ///
    /// Only edges between members of the subset constrain the order; stages
    /// outside it are treated as already satisfied.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetectedError` if the subset is cyclic.
    pub fn order_subset(&self, include: &HashSet<&str>) -> Result<Vec<String>, CycleDetectedError> {
        let index: HashMap<&str, usize> = self
            .stage_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for name in self.stage_order.iter().map(String::as_str) {
            if !include.contains(name) {
                continue;
            }
            let deps = self.stages.get(name).map_or(0, |def| {
                def.dependencies
                    .iter()
                    .filter(|d| include.contains(d.as_str()))
                    .count()
            });
            in_degree.insert(name, deps);
        }

        // Ready set keyed by declaration index keeps tie-breaking stable.
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, &count)| count == 0)
            .filter_map(|(name, _)| index.get(name).copied())
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(i) = ready.pop_first() {
            let name = self.stage_order[i].as_str();
            order.push(name.to_string());

            for child in self.dependents(name) {
                if let Some(count) = in_degree.get_mut(child) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        if let Some(&ci) = index.get(child) {
                            ready.insert(ci);
                        }
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            let cycle = self
                .find_cycle()
                .unwrap_or_else(|| in_degree.keys().map(|s| (*s).to_string()).collect());
            return Err(CycleDetectedError::new(cycle));
        }
        Ok(order)
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        match self.find_cycle() {
            Some(cycle) => Err(CycleDetectedError::new(cycle)),
            None => Ok(()),
        }
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.stage_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(def) = self.stages.get(node) {
            for dep in &def.dependencies {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}
