//! Circular reference detection

use super::graph::DependencyGraph;
use crate::types::QualifiedAddress;
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// A closed walk `[n0, n1, ..., nk, n0]` through the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Cycle(Vec<QualifiedAddress>);

impl Cycle {
    /// The full walk, first node repeated at the end
    pub fn path(&self) -> &[QualifiedAddress] {
        &self.0
    }

    /// Distinct members, in walk order
    pub fn members(&self) -> &[QualifiedAddress] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    pub fn contains(&self, address: &QualifiedAddress) -> bool {
        self.members().contains(address)
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" -> "))
    }
}

/// Every address that sits on some cycle
pub fn cycle_members(cycles: &[Cycle]) -> BTreeSet<QualifiedAddress> {
    cycles
        .iter()
        .flat_map(|c| c.members().iter().cloned())
        .collect()
}

/// Find circular references.
///
/// A depth-first walk reports each back edge it meets; a second pass over the
/// strongly connected components adds a cycle for any node the walk missed,
/// so every node on a cycle appears in at least one report.
pub fn detect_cycles(graph: &DependencyGraph) -> Vec<Cycle> {
    let g = graph.inner();
    let mut found = CycleSet::default();

    let mut roots: Vec<NodeIndex> = g.node_indices().collect();
    roots.sort_by(|a, b| g[*a].cmp(&g[*b]));

    let mut visited: HashSet<NodeIndex> = HashSet::new();
    for root in roots {
        if visited.contains(&root) {
            continue;
        }

        let mut path: Vec<NodeIndex> = vec![root];
        let mut on_path: HashMap<NodeIndex, usize> = HashMap::from([(root, 0)]);
        let mut stack: Vec<(Vec<NodeIndex>, usize)> = vec![(sorted_successors(graph, root), 0)];
        visited.insert(root);

        while let Some((successors, cursor)) = stack.last_mut() {
            let Some(&next) = successors.get(*cursor) else {
                stack.pop();
                if let Some(done) = path.pop() {
                    on_path.remove(&done);
                }
                continue;
            };
            *cursor += 1;

            if let Some(&position) = on_path.get(&next) {
                found.insert(path[position..].to_vec());
            } else if visited.insert(next) {
                on_path.insert(next, path.len());
                path.push(next);
                stack.push((sorted_successors(graph, next), 0));
            }
        }
    }

    // Completeness pass
    for component in tarjan_scc(g) {
        let nontrivial = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| g.find_edge(n, n).is_some());
        if !nontrivial {
            continue;
        }
        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        for &node in &component {
            if found.covers(node) {
                continue;
            }
            if let Some(walk) = shortest_cycle_through(graph, node, &members) {
                found.insert(walk);
            }
        }
    }

    let cycles: Vec<Cycle> = found
        .cycles
        .into_iter()
        .map(|walk| {
            let mut path: Vec<_> = walk.iter().map(|&n| g[n].clone()).collect();
            path.push(g[walk[0]].clone());
            Cycle(path)
        })
        .collect();

    for cycle in &cycles {
        tracing::warn!(cycle = %cycle, "circular reference");
    }
    cycles
}

/// Open walks, de-duplicated by rotation
#[derive(Default)]
struct CycleSet {
    cycles: Vec<Vec<NodeIndex>>,
    canonical: HashSet<Vec<NodeIndex>>,
    covered: HashSet<NodeIndex>,
}

impl CycleSet {
    fn insert(&mut self, walk: Vec<NodeIndex>) {
        if walk.is_empty() {
            return;
        }
        let start = walk
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| n.index())
            .map_or(0, |(i, _)| i);
        let mut rotated = walk.clone();
        rotated.rotate_left(start);
        if self.canonical.insert(rotated) {
            self.covered.extend(walk.iter().copied());
            self.cycles.push(walk);
        }
    }

    fn covers(&self, node: NodeIndex) -> bool {
        self.covered.contains(&node)
    }
}

fn sorted_successors(graph: &DependencyGraph, node: NodeIndex) -> Vec<NodeIndex> {
    let g = graph.inner();
    let mut successors: Vec<NodeIndex> = g.neighbors(node).collect();
    successors.sort_by(|a, b| g[*a].cmp(&g[*b]));
    successors.dedup();
    successors
}

/// BFS from `start` back to itself, staying inside `component`
fn shortest_cycle_through(
    graph: &DependencyGraph,
    start: NodeIndex,
    component: &HashSet<NodeIndex>,
) -> Option<Vec<NodeIndex>> {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for next in sorted_successors(graph, node) {
            if next == start {
                let mut walk = vec![node];
                let mut cursor = node;
                while cursor != start {
                    cursor = parent[&cursor];
                    walk.push(cursor);
                }
                walk.reverse();
                return Some(walk);
            }
            if component.contains(&next) && !parent.contains_key(&next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analyzer::FormulaMetadata;
    use crate::types::{DocumentId, SheetId};

    fn qa(s: &str) -> QualifiedAddress {
        format!("doc#Sheet1!{}", s).parse().unwrap()
    }

    fn graph(formulas: &[(&str, &str)]) -> DependencyGraph {
        let parsed: Vec<_> = formulas
            .iter()
            .map(|(addr, text)| (qa(addr), FormulaMetadata::analyze(text).unwrap()))
            .collect();
        DependencyGraph::build(
            &DocumentId::new("doc"),
            &[SheetId::new("Sheet1")],
            parsed.iter().map(|(a, m)| (a, m)),
        )
    }

    #[test]
    fn test_no_cycles_in_chain() {
        let g = graph(&[("A1", "=B1+1"), ("B1", "=C1*2")]);
        assert!(detect_cycles(&g).is_empty());
    }

    #[test]
    fn test_two_cell_cycle() {
        let g = graph(&[("A1", "=B1+1"), ("B1", "=A1+1")]);
        let cycles = detect_cycles(&g);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path(), &[qa("A1"), qa("B1"), qa("A1")]);
    }

    #[test]
    fn test_three_cell_cycle_reports_every_member() {
        let g = graph(&[("A1", "=B1"), ("B1", "=C1"), ("C1", "=A1")]);
        let cycles = detect_cycles(&g);
        let members = cycle_members(&cycles);
        assert_eq!(members, BTreeSet::from([qa("A1"), qa("B1"), qa("C1")]));
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn test_self_reference() {
        let g = graph(&[("A1", "=A1+1")]);
        let cycles = detect_cycles(&g);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path(), &[qa("A1"), qa("A1")]);
        assert_eq!(cycles[0].len(), 1);
    }

    #[test]
    fn test_overlapping_cycles_all_members_covered() {
        // A1 -> B1 -> A1 and A1 -> C1 -> B1 -> A1; C1 is only reachable on the second
        let g = graph(&[("A1", "=B1+C1"), ("B1", "=A1"), ("C1", "=B1")]);
        let members = cycle_members(&detect_cycles(&g));
        assert_eq!(members, BTreeSet::from([qa("A1"), qa("B1"), qa("C1")]));
    }

    #[test]
    fn test_cycle_display() {
        let g = graph(&[("A1", "=B1"), ("B1", "=A1")]);
        let cycles = detect_cycles(&g);
        assert_eq!(
            cycles[0].to_string(),
            "doc#Sheet1!A1 -> doc#Sheet1!B1 -> doc#Sheet1!A1"
        );
    }
}
