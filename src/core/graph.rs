//! Dependency graph builder
//!
//! Nodes are fully-qualified cells; an edge runs from a formula cell to each
//! cell it reads. Ranges contribute their two corner cells only.

use super::analyzer::FormulaMetadata;
use super::integration::{IntegrationIndex, ParameterName};
use crate::types::{CellReference, DocumentId, QualifiedAddress, SheetId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", content = "parameter", rename_all = "snake_case")]
pub enum EdgeKind {
    SameSheet,
    CrossSheet,
    /// Advisory link between documents that share a parameter
    Integration(ParameterName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Dependency {
    pub kind: EdgeKind,
    /// The reference is a corner of a range rather than a lone cell
    pub via_range: bool,
}

/// One edge, for reporting
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DependencyEdge {
    pub from: QualifiedAddress,
    pub to: QualifiedAddress,
    pub kind: EdgeKind,
    pub via_range: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<QualifiedAddress, Dependency>,
    nodes: HashMap<QualifiedAddress, NodeIndex>,
    formulas: HashSet<NodeIndex>,
    dangling: BTreeSet<QualifiedAddress>,
}

impl DependencyGraph {
    /// Build the graph of one document.
    ///
    /// Bare references resolve to the formula's own sheet. Qualified ones are
    /// matched case-insensitively against `sheet_names`; an unknown sheet
    /// still gets a node, recorded in [`DependencyGraph::dangling`].
    pub fn build<'a, I>(document: &DocumentId, sheet_names: &[SheetId], formulas: I) -> Self
    where
        I: IntoIterator<Item = (&'a QualifiedAddress, &'a FormulaMetadata)>,
    {
        let mut graph = Self::default();

        for (address, metadata) in formulas {
            let from = graph.ensure_node(address);
            graph.formulas.insert(from);

            let corners = metadata
                .referenced_ranges
                .iter()
                .flat_map(|range| range.corners())
                .map(|reference| (reference, true));
            let cells = metadata
                .referenced_cells
                .iter()
                .cloned()
                .map(|reference| (reference, false));

            for (reference, via_range) in cells.chain(corners) {
                let (target, known_sheet) =
                    resolve_reference(document, sheet_names, &address.sheet, &reference);
                if !known_sheet {
                    tracing::warn!(formula = %address, reference = %target, "reference to unknown sheet");
                    graph.dangling.insert(target.clone());
                }
                let kind = if target.sheet == address.sheet {
                    EdgeKind::SameSheet
                } else {
                    EdgeKind::CrossSheet
                };
                graph.add_dependency(address, &target, Dependency { kind, via_range });
            }
        }

        tracing::debug!(
            document = %document,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        graph
    }

    /// Union of per-document graphs plus advisory edges between documents.
    ///
    /// For each shared parameter, every formula-holding candidate gets an
    /// `Integration` edge to the candidates of the same parameter that live in
    /// other documents.
    pub fn integration<'g>(
        graphs: impl IntoIterator<Item = &'g DependencyGraph>,
        index: &IntegrationIndex,
    ) -> Self {
        let mut merged = Self::default();

        for graph in graphs {
            for node in graph.graph.node_indices() {
                let merged_node = merged.ensure_node(&graph.graph[node]);
                if graph.formulas.contains(&node) {
                    merged.formulas.insert(merged_node);
                }
            }
            for edge in graph.graph.edge_references() {
                let from = graph.graph[edge.source()].clone();
                let to = graph.graph[edge.target()].clone();
                merged.add_dependency(&from, &to, *edge.weight());
            }
            merged.dangling.extend(graph.dangling.iter().cloned());
        }

        for (parameter, candidates) in index.iter() {
            let sources: Vec<_> = candidates
                .iter()
                .filter(|c| merged.has_formula(&c.value))
                .collect();
            for source in sources {
                for target in candidates
                    .iter()
                    .filter(|c| c.value.document != source.value.document)
                {
                    merged.add_dependency(
                        &source.value,
                        &target.value,
                        Dependency {
                            kind: EdgeKind::Integration(*parameter),
                            via_range: false,
                        },
                    );
                }
            }
        }

        merged
    }

    fn ensure_node(&mut self, address: &QualifiedAddress) -> NodeIndex {
        if let Some(&index) = self.nodes.get(address) {
            return index;
        }
        let index = self.graph.add_node(address.clone());
        self.nodes.insert(address.clone(), index);
        index
    }

    fn add_dependency(&mut self, from: &QualifiedAddress, to: &QualifiedAddress, dep: Dependency) {
        let a = self.ensure_node(from);
        let b = self.ensure_node(to);
        match self.graph.find_edge(a, b) {
            // A lone-cell reference wins over a range corner
            Some(edge) => {
                let existing = &mut self.graph[edge];
                existing.via_range &= dep.via_range;
            }
            None => {
                self.graph.add_edge(a, b, dep);
            }
        }
    }

    /// The underlying petgraph structure
    pub fn inner(&self) -> &DiGraph<QualifiedAddress, Dependency> {
        &self.graph
    }

    pub fn index_of(&self, address: &QualifiedAddress) -> Option<NodeIndex> {
        self.nodes.get(address).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, address: &QualifiedAddress) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn has_formula(&self, address: &QualifiedAddress) -> bool {
        self.index_of(address)
            .is_some_and(|index| self.formulas.contains(&index))
    }

    /// Nodes on sheets the document does not declare
    pub fn dangling(&self) -> &BTreeSet<QualifiedAddress> {
        &self.dangling
    }

    /// Cells `address` reads, sorted
    pub fn dependencies_of(&self, address: &QualifiedAddress) -> Vec<&QualifiedAddress> {
        self.neighbors(address, Direction::Outgoing)
    }

    /// Formula cells that read `address`, sorted
    pub fn dependents_of(&self, address: &QualifiedAddress) -> Vec<&QualifiedAddress> {
        self.neighbors(address, Direction::Incoming)
    }

    fn neighbors(&self, address: &QualifiedAddress, direction: Direction) -> Vec<&QualifiedAddress> {
        let Some(index) = self.index_of(address) else {
            return Vec::new();
        };
        let mut found: Vec<_> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| &self.graph[n])
            .collect();
        found.sort();
        found.dedup();
        found
    }

    /// Every edge, sorted by source then target
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|edge| DependencyEdge {
                from: self.graph[edge.source()].clone(),
                to: self.graph[edge.target()].clone(),
                kind: edge.weight().kind,
                via_range: edge.weight().via_range,
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn cross_sheet_edges(&self) -> Vec<DependencyEdge> {
        self.edges()
            .into_iter()
            .filter(|edge| edge.kind == EdgeKind::CrossSheet)
            .collect()
    }

    /// Sheet → the other sheets its formulas read
    pub fn sheet_dependencies(&self) -> BTreeMap<SheetId, BTreeSet<SheetId>> {
        let mut sheets: BTreeMap<SheetId, BTreeSet<SheetId>> = BTreeMap::new();
        for edge in self.graph.edge_references() {
            if edge.weight().kind != EdgeKind::CrossSheet {
                continue;
            }
            let from = &self.graph[edge.source()];
            let to = &self.graph[edge.target()];
            sheets
                .entry(from.sheet.clone())
                .or_default()
                .insert(to.sheet.clone());
        }
        sheets
    }
}

/// Resolve a formula reference to a node address. The flag is false when a
/// qualified reference names a sheet the document does not declare.
fn resolve_reference(
    document: &DocumentId,
    sheet_names: &[SheetId],
    current: &SheetId,
    reference: &CellReference,
) -> (QualifiedAddress, bool) {
    let (sheet, known) = match &reference.sheet {
        None => (current.clone(), true),
        Some(name) => match sheet_names
            .iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
        {
            Some(sheet) => (sheet.clone(), true),
            None => (SheetId::new(name.as_str()), false),
        },
    };
    (
        QualifiedAddress::new(document.clone(), sheet, reference.address),
        known,
    )
}
