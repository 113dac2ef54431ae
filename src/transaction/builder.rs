// src/transaction/builder.rs

//! Ordering a solution into executable steps
//!
//! Installs come first, in topological order of the requires graph: a
//! package is installed before anything that needs a capability only it
//! provides. Erasures follow, dependents before what they depend on. Nodes
//! are NEVRA keys and edges live in adjacency maps.

use super::{Step, StepKind, Transaction};
use crate::error::{Error, Result};
use crate::packages::{Dependency, Package};
use crate::pool::{PackageId, Pool};
use crate::resolver::{Problem, ProblemKind, Problems, RejectReason, RejectedCandidate, Requester, Solution};
use crate::version::RpmVersion;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Directed graph over NEVRA keys
#[derive(Debug, Default)]
struct Graph {
    /// node -> nodes that must come after it
    edges: BTreeMap<String, BTreeSet<String>>,
    in_degree: BTreeMap<String, usize>,
    /// (from, to) -> dependency that created the edge
    labels: BTreeMap<(String, String), Dependency>,
}

impl Graph {
    fn add_node(&mut self, key: &str) {
        self.edges.entry(key.to_string()).or_default();
        self.in_degree.entry(key.to_string()).or_insert(0);
    }

    fn add_edge(&mut self, from: &str, to: &str, dep: &Dependency) {
        if from == to {
            return;
        }
        if self.edges.entry(from.to_string()).or_default().insert(to.to_string()) {
            *self.in_degree.entry(to.to_string()).or_insert(0) += 1;
            self.labels
                .insert((from.to_string(), to.to_string()), dep.clone());
        }
    }

    /// Find one cycle among `nodes`, as a path whose last node leads back to the first
    fn find_cycle(&self, nodes: &BTreeSet<String>) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        for start in nodes {
            if visited.contains(start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = BTreeSet::new();
            if let Some(cycle) = self.dfs_cycle(start, nodes, &mut visited, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        nodes: &BTreeSet<String>,
        visited: &mut BTreeSet<String>,
        path: &mut Vec<String>,
        on_path: &mut BTreeSet<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        on_path.insert(node.to_string());
        path.push(node.to_string());

        if let Some(next) = self.edges.get(node) {
            for neighbor in next.iter().filter(|n| nodes.contains(*n)) {
                if on_path.contains(neighbor) {
                    let start = path.iter().position(|n| n == neighbor).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
                if !visited.contains(neighbor) {
                    if let Some(cycle) = self.dfs_cycle(neighbor, nodes, visited, path, on_path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(node);
        None
    }
}

type InstallKey = (Reverse<i32>, Reverse<RpmVersion>, String, String, String);

fn install_key(pkg: &Package) -> InstallKey {
    (
        Reverse(pkg.priority),
        Reverse(pkg.evr().clone()),
        pkg.name().to_string(),
        pkg.repo.clone(),
        pkg.nevra.key(),
    )
}

fn erase_key(pkg: &Package) -> (String, String) {
    (pkg.name().to_string(), pkg.nevra.key())
}

/// Build the ordered transaction for a solution
pub fn build(pool: &Pool, solution: &Solution) -> Result<Transaction> {
    let installs: Vec<&Package> = solution.installs.iter().map(|&id| pool.get(id)).collect();
    let erasures: BTreeSet<PackageId> = solution.erasures.iter().copied().collect();

    let post_set: Vec<&Package> = pool
        .installed()
        .iter()
        .filter(|id| !erasures.contains(id))
        .map(|&id| pool.get(id))
        .chain(installs.iter().copied())
        .collect();

    let mut steps = order_installs(&installs, &post_set)?;

    let erase_packages: Vec<&Package> = solution.erasures.iter().map(|&id| pool.get(id)).collect();
    steps.extend(order_erasures(&erase_packages));

    debug!("Transaction ordered: {} steps", steps.len());
    Ok(Transaction { steps })
}

fn order_installs(installs: &[&Package], post_set: &[&Package]) -> Result<Vec<Step>> {
    let by_key: BTreeMap<String, &Package> = installs.iter().map(|p| (p.nevra.key(), *p)).collect();

    let mut graph = Graph::default();
    for pkg in installs {
        graph.add_node(&pkg.nevra.key());
    }
    for requirer in installs {
        for dep in requirer.hard_requires() {
            let providers: Vec<&&Package> = post_set.iter().filter(|p| p.provides_dependency(dep)).collect();
            // Only a single provider pins the order
            if let [provider] = providers.as_slice() {
                let provider_key = provider.nevra.key();
                if by_key.contains_key(&provider_key) {
                    graph.add_edge(&provider_key, &requirer.nevra.key(), dep);
                }
            }
        }
    }

    let mut in_degree = graph.in_degree.clone();
    let mut ready: BTreeSet<InstallKey> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .filter_map(|(key, _)| by_key.get(key).map(|p| install_key(p)))
        .collect();

    let mut steps = Vec::with_capacity(installs.len());
    while let Some(next) = ready.pop_first() {
        let key = next.4;
        let Some(pkg) = by_key.get(&key) else {
            continue;
        };
        steps.push(Step::new(StepKind::Install, (*pkg).clone()));

        if let Some(dependents) = graph.edges.get(&key) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        if let Some(p) = by_key.get(dependent) {
                            ready.insert(install_key(p));
                        }
                    }
                }
            }
        }
    }

    if steps.len() < installs.len() {
        let remaining: BTreeSet<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(key, _)| key.clone())
            .collect();
        return Err(cycle_error(&graph, &remaining, &by_key));
    }
    Ok(steps)
}

fn cycle_error(graph: &Graph, remaining: &BTreeSet<String>, by_key: &BTreeMap<String, &Package>) -> Error {
    let cycle = graph
        .find_cycle(remaining)
        .unwrap_or_else(|| remaining.iter().cloned().collect());
    warn!("Requirement cycle among {} packages", cycle.len());

    let members: Vec<&Package> = cycle.iter().filter_map(|k| by_key.get(k).copied()).collect();
    let (requester, unsatisfied) = match cycle.as_slice() {
        [first, .., last] => {
            let dep = graph
                .labels
                .get(&(last.clone(), first.clone()))
                .cloned()
                .unwrap_or_else(|| Dependency::new(last.clone()));
            (by_key.get(first).map(|p| p.nevra.clone()), dep)
        }
        _ => (None, Dependency::new(cycle.first().cloned().unwrap_or_default())),
    };

    let problem = Problem {
        kind: ProblemKind::Cycle,
        unsatisfied,
        requested_by: requester.map(Requester::Package).unwrap_or(Requester::Job),
        candidates: members
            .iter()
            .map(|p| RejectedCandidate {
                nevra: p.nevra.clone(),
                repo: p.repo.clone(),
                reason: RejectReason::Cycle,
            })
            .collect(),
    };
    Error::Unsatisfiable(Problems::new(vec![problem]))
}

/// Dependents first; cycles among erasures are broken by name
fn order_erasures(erasures: &[&Package]) -> Vec<Step> {
    let by_key: BTreeMap<String, &Package> = erasures.iter().map(|p| (p.nevra.key(), *p)).collect();

    // Edge dependent -> provider: the dependent goes first
    let mut graph = Graph::default();
    for pkg in erasures {
        graph.add_node(&pkg.nevra.key());
    }
    for dependent in erasures {
        for dep in dependent.hard_requires() {
            for provider in erasures.iter().filter(|p| p.provides_dependency(dep)) {
                graph.add_edge(&dependent.nevra.key(), &provider.nevra.key(), dep);
            }
        }
    }

    let mut in_degree = graph.in_degree.clone();
    let mut pending: BTreeSet<(String, String)> = by_key.values().map(|p| erase_key(p)).collect();
    let mut steps = Vec::with_capacity(erasures.len());

    while !pending.is_empty() {
        let next = pending
            .iter()
            .find(|(_, key)| in_degree.get(key).copied().unwrap_or(0) == 0)
            .or_else(|| pending.iter().next())
            .cloned();
        let Some(entry) = next else {
            break;
        };
        pending.remove(&entry);
        let key = entry.1;

        if let Some(pkg) = by_key.get(&key) {
            steps.push(Step::new(StepKind::Erase, (*pkg).clone()));
        }
        in_degree.insert(key.clone(), 0);
        if let Some(providers) = graph.edges.get(&key) {
            for provider in providers {
                if let Some(degree) = in_degree.get_mut(provider) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }
    }
    steps
}
