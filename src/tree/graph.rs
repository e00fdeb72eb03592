// src/tree/graph.rs

use std::collections::HashMap;

use uuid::Uuid;

use crate::job::Job;

/// Internal node structure: the job plus its immediate deps and dependents.
#[derive(Debug, Clone)]
struct JobNode {
    job: Job,
    /// Jobs that must finish before this one can run.
    deps: Vec<Uuid>,
    /// Jobs that wait for this one.
    dependents: Vec<Uuid>,
}

/// Dependency view of one job tree, keyed by job UUID.
///
/// Built once per run from the (already optimized) tree; the tree itself is
/// acyclic by construction, so no cycle check happens here.
#[derive(Debug, Clone)]
pub struct JobGraph {
    nodes: HashMap<Uuid, JobNode>,
    /// Tree order: parents before children, children before finished jobs.
    order: Vec<Uuid>,
}

impl JobGraph {
    pub fn from_root(root: &Job) -> Self {
        let mut graph = JobGraph {
            nodes: HashMap::new(),
            order: Vec::new(),
        };
        graph.visit(root, Vec::new());

        // Second pass: populate dependents based on deps.
        let ids = graph.order.clone();
        for id in ids {
            let deps = graph
                .nodes
                .get(&id)
                .map(|n| n.deps.clone())
                .unwrap_or_default();
            for dep in deps {
                if let Some(node) = graph.nodes.get_mut(&dep) {
                    node.dependents.push(id);
                }
            }
        }
        graph
    }

    fn visit(&mut self, job: &Job, deps: Vec<Uuid>) {
        let id = job.uuid();
        if self.nodes.contains_key(&id) {
            return;
        }
        self.order.push(id);
        self.nodes.insert(
            id,
            JobNode {
                job: job.clone(),
                deps,
                dependents: Vec::new(),
            },
        );

        let children = job.children();
        for child in &children {
            self.visit(child, vec![id]);
        }

        if let Some(finished) = job.finished_job() {
            let mut deps = vec![id];
            for child in &children {
                deps.extend(child.tree().iter().map(Job::uuid));
            }
            self.visit(&finished, deps);
        }
    }

    /// All job UUIDs in tree order.
    pub fn jobs(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.order.iter().copied()
    }

    pub fn job(&self, id: Uuid) -> Option<&Job> {
        self.nodes.get(&id).map(|n| &n.job)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Immediate dependencies of a job.
    pub fn dependencies_of(&self, id: Uuid) -> &[Uuid] {
        self.nodes
            .get(&id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a job.
    pub fn dependents_of(&self, id: Uuid) -> &[Uuid] {
        self.nodes
            .get(&id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
