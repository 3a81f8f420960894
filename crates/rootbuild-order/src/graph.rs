//! Dependency graph over a batch of source packages and its leveling.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// What a source package builds and what it needs to build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    /// Binary package names and their provides.
    pub produces: BTreeSet<String>,
    /// Build requirement names.
    pub requires: BTreeSet<String>,
}

impl PackageInfo {
    pub fn new<P, R>(produces: P, requires: R) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            produces: produces.into_iter().map(Into::into).collect(),
            requires: requires.into_iter().map(Into::into).collect(),
        }
    }
}

/// Edges `A -> B` meaning "A needs something B produces".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph from per-package metadata.
    ///
    /// Only requirements produced inside the batch become edges; a package
    /// never depends on itself.
    pub fn build(packages: &BTreeMap<String, PackageInfo>) -> Self {
        let mut producers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, info) in packages {
            for name in &info.produces {
                producers.entry(name.as_str()).or_default().push(id.as_str());
            }
        }

        let mut edges = BTreeMap::new();
        for (id, info) in packages {
            let deps: BTreeSet<String> = info
                .requires
                .iter()
                .filter_map(|req| producers.get(req.as_str()))
                .flatten()
                .filter(|dep| **dep != id.as_str())
                .map(|dep| dep.to_string())
                .collect();
            edges.insert(id.clone(), deps);
        }
        Self { edges }
    }

    /// Add a node with explicit dependencies. Unknown targets are ignored
    /// when ordering.
    pub fn insert<I, S>(&mut self, id: &str, deps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edges
            .entry(id.to_string())
            .or_default()
            .extend(deps.into_iter().map(Into::into));
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    pub fn dependencies(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Drop one direction of every two-node cycle.
    ///
    /// For a pair `{a, b}` with `a < b` the edge `a -> b` goes. Returns the
    /// removed edges.
    pub fn break_mutual_cycles(&mut self) -> Vec<(String, String)> {
        let mut broken = Vec::new();
        for (a, deps) in &self.edges {
            for b in deps {
                if a < b && self.edges.get(b).is_some_and(|d| d.contains(a)) {
                    warn!(first = %a, second = %b, "dependency loop between packages");
                    broken.push((a.clone(), b.clone()));
                }
            }
        }
        for (a, b) in &broken {
            if let Some(deps) = self.edges.get_mut(a) {
                deps.remove(b);
            }
        }
        broken
    }

    /// Order the graph into levels.
    ///
    /// Level `k` holds the packages whose dependencies all sit in earlier
    /// levels; members of a level are sorted by name. `input_count` is the
    /// number of packages the caller asked about, used for the final sanity
    /// check.
    pub fn into_order(mut self, input_count: usize) -> BuildOrder {
        let mut broken_cycles = self.break_mutual_cycles();

        let known: BTreeSet<String> = self.edges.keys().cloned().collect();
        let mut pending: BTreeMap<String, BTreeSet<String>> = self
            .edges
            .into_iter()
            .map(|(id, deps)| {
                let deps = deps.into_iter().filter(|d| known.contains(d)).collect();
                (id, deps)
            })
            .collect();

        let mut groups: Vec<Vec<String>> = Vec::new();
        while !pending.is_empty() {
            let mut ready: Vec<String> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| id.clone())
                .collect();

            if ready.is_empty() {
                // A longer cycle: free the node closest to being buildable.
                let victim = pending
                    .iter()
                    .min_by(|(a_id, a), (b_id, b)| a.len().cmp(&b.len()).then(a_id.cmp(b_id)))
                    .map(|(id, _)| id.clone());
                let Some(victim) = victim else { break };
                if let Some(deps) = pending.get_mut(&victim) {
                    for dep in std::mem::take(deps) {
                        warn!(package = %victim, dependency = %dep, "breaking dependency loop");
                        broken_cycles.push((victim.clone(), dep));
                    }
                }
                ready.push(victim);
            }

            for id in &ready {
                pending.remove(id);
            }
            for deps in pending.values_mut() {
                for id in &ready {
                    deps.remove(id);
                }
            }
            debug!(level = groups.len() + 1, members = ready.len(), "level complete");
            groups.push(ready);
        }

        let order: Vec<String> = groups.iter().flatten().cloned().collect();
        if order.len() != input_count {
            warn!(
                input = input_count,
                returned = order.len(),
                "returned packages do not match number of packages in input"
            );
        }
        BuildOrder {
            order,
            groups,
            broken_cycles,
            input_count,
        }
    }
}

/// Result of scheduling a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOrder {
    /// Every package, dependencies first.
    pub order: Vec<String>,
    /// Parallel-buildable groups; each must finish before the next starts.
    pub groups: Vec<Vec<String>>,
    /// Edges dropped to make the graph acyclic, as `(from, to)`.
    pub broken_cycles: Vec<(String, String)>,
    /// Number of packages handed to the scheduler.
    pub input_count: usize,
}

impl BuildOrder {
    /// Whether every input package made it into the order.
    pub fn is_complete(&self) -> bool {
        self.order.len() == self.input_count
    }

    /// Index of the group `id` belongs to.
    pub fn group_of(&self, id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.iter().any(|m| m == id))
    }
}
