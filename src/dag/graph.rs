// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::engine::JobName;
use crate::errors::{BetterciError, Result};
use crate::model::Job;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct JobNode {
    /// Direct dependencies: jobs that must succeed (or be skipped) first.
    deps: Vec<JobName>,
    /// Direct dependents: jobs that list this one in `needs`.
    dependents: Vec<JobName>,
}

/// Validated dependency graph keyed by job name.
///
/// Edges point from a dependency to its dependents. Construction fails on
/// duplicate names, unknown `needs` references and cycles (a job needing
/// itself counts as a cycle), so every `JobGraph` is a DAG.
#[derive(Debug, Clone)]
pub struct JobGraph {
    nodes: BTreeMap<JobName, JobNode>,
}

impl JobGraph {
    /// Build and validate the graph for `jobs`.
    pub fn build(jobs: &[Job]) -> Result<Self> {
        ensure_unique_names(jobs)?;

        let mut nodes: BTreeMap<JobName, JobNode> = jobs
            .iter()
            .map(|job| (job.name.clone(), JobNode::default()))
            .collect();
        let known: Vec<JobName> = nodes.keys().cloned().collect();

        for job in jobs {
            let mut deps: Vec<JobName> = Vec::new();
            for dep in &job.needs {
                if dep == &job.name {
                    return Err(BetterciError::DagCycle(format!(
                        "job '{}' needs itself",
                        job.name
                    )));
                }
                if !nodes.contains_key(dep) {
                    return Err(BetterciError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                        known: known.clone(),
                    });
                }
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
            for dep in &deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(job.name.clone());
                }
            }
            if let Some(node) = nodes.get_mut(&job.name) {
                node.deps = deps;
            }
        }

        let graph = Self { nodes };
        graph.ensure_acyclic()?;
        Ok(graph)
    }

    fn ensure_acyclic(&self) -> Result<()> {
        // Edge direction: dep -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for (name, node) in &self.nodes {
            for dep in &node.deps {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(BetterciError::DagCycle(format!(
                "cycle detected in job graph involving job '{}'",
                cycle.node_id()
            ))),
        }
    }

    /// All job names, sorted.
    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Immediate dependencies of a job (its `needs`, de-duplicated).
    pub fn dependencies_of(&self, name: &str) -> &[JobName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a job.
    pub fn dependents_of(&self, name: &str) -> &[JobName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Number of unresolved dependencies before anything has run.
    pub fn in_degree(&self, name: &str) -> usize {
        self.dependencies_of(name).len()
    }

    /// Jobs with no dependencies, sorted.
    pub fn roots(&self) -> Vec<JobName> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.deps.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Group jobs into stages: each job lands one stage after its deepest
    /// dependency. Names are sorted within a stage.
    pub fn topo_levels(&self) -> Vec<Vec<JobName>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.deps.len()))
            .collect();
        let mut current: Vec<JobName> = self.roots();
        let mut levels = Vec::new();

        while !current.is_empty() {
            let mut next: BTreeSet<JobName> = BTreeSet::new();
            for name in &current {
                for dependent in self.dependents_of(name) {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            next.insert(dependent.clone());
                        }
                    }
                }
            }
            levels.push(std::mem::take(&mut current));
            current = next.into_iter().collect();
        }

        levels
    }

    /// Every job transitively depending on `name` (excluding `name`).
    pub fn descendants_of(&self, name: &str) -> BTreeSet<JobName> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents_of(name).iter().map(String::as_str).collect();
        while let Some(next) = stack.pop() {
            if found.insert(next.to_string()) {
                stack.extend(self.dependents_of(next).iter().map(String::as_str));
            }
        }
        found
    }
}

fn ensure_unique_names(jobs: &[Job]) -> Result<()> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for job in jobs {
        *counts.entry(job.name.as_str()).or_default() += 1;
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(BetterciError::DuplicateJobName(duplicates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Step;

    fn job(name: &str, needs: &[&str]) -> Job {
        let mut builder = Job::builder(name).step(Step::shell("run", "true"));
        for dep in needs {
            builder = builder.needs(*dep);
        }
        builder.build().unwrap()
    }

    fn pipeline() -> Vec<Job> {
        vec![
            job("setup", &[]),
            job("lint", &["setup"]),
            job("unit", &["setup"]),
            job("package", &["lint", "unit"]),
            job("e2e", &["package"]),
        ]
    }

    #[test]
    fn builds_adjacency_and_in_degrees() {
        let graph = JobGraph::build(&pipeline()).unwrap();
        assert_eq!(graph.roots(), vec!["setup"]);
        assert_eq!(graph.in_degree("package"), 2);
        let mut dependents = graph.dependents_of("setup").to_vec();
        dependents.sort();
        assert_eq!(dependents, vec!["lint", "unit"]);
    }

    #[test]
    fn topo_levels_group_by_depth() {
        let graph = JobGraph::build(&pipeline()).unwrap();
        assert_eq!(
            graph.topo_levels(),
            vec![
                vec!["setup".to_string()],
                vec!["lint".to_string(), "unit".to_string()],
                vec!["package".to_string()],
                vec!["e2e".to_string()],
            ]
        );
    }

    #[test]
    fn reports_all_duplicates() {
        let jobs = vec![job("a", &[]), job("b", &[]), job("a", &[]), job("b", &[]), job("c", &[])];
        match JobGraph::build(&jobs) {
            Err(BetterciError::DuplicateJobName(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("expected DuplicateJobName, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_lists_known_jobs() {
        let jobs = vec![job("a", &[]), job("b", &["ghost"])];
        match JobGraph::build(&jobs) {
            Err(BetterciError::UnknownDependency { job, dependency, known }) => {
                assert_eq!(job, "b");
                assert_eq!(dependency, "ghost");
                assert_eq!(known, vec!["a", "b"]);
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_and_cycles_are_rejected() {
        let jobs = vec![job("a", &["a"])];
        assert!(matches!(JobGraph::build(&jobs), Err(BetterciError::DagCycle(_))));

        let jobs = vec![job("a", &["c"]), job("b", &["a"]), job("c", &["b"])];
        assert!(matches!(JobGraph::build(&jobs), Err(BetterciError::DagCycle(_))));
    }

    #[test]
    fn descendants_are_transitive() {
        let graph = JobGraph::build(&pipeline()).unwrap();
        let desc: Vec<_> = graph.descendants_of("lint").into_iter().collect();
        assert_eq!(desc, vec!["e2e", "package"]);
    }
}
