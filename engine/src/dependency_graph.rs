//! FILENAME: engine/src/dependency_graph.rs
//! PURPOSE: Directed graph tracking cell dependencies, including cycles.
//! CONTEXT: Unlike a traditional spreadsheet engine that forbids cycles up
//! front, this graph is allowed to be cyclic: formulas are free to form a
//! circular reference, and the update scheduler discovers and marks the
//! affected cells CIRCREF after the fact via strongly connected components,
//! rather than rejecting the edit that created the cycle.
//!
//! TERMINOLOGY:
//! - Precedents: cells a formula references (its inputs).
//! - Dependents: cells that reference a given cell (the reverse index).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::coord::CellCoord;

/// For each cell, the set of cells it directly depends on and the reverse
/// index of cells that directly depend on it. `dependents` is maintained
/// incrementally as edges are added/removed, so it always holds the
/// transpose of `precedents` without needing to be recomputed.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    precedents: HashMap<CellCoord, HashSet<CellCoord>>,
    dependents: HashMap<CellCoord, HashSet<CellCoord>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            precedents: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Replaces all outgoing edges of `cell` (i.e. its precedent set) with
    /// `new_precedents`, updating the reverse index accordingly. Call this
    /// whenever a cell's formula is set, changed, or cleared (with an empty
    /// set).
    pub fn replace_outgoing_edges(&mut self, cell: CellCoord, new_precedents: HashSet<CellCoord>) {
        self.clear_dependencies(cell);
        if !new_precedents.is_empty() {
            for &prec in &new_precedents {
                self.dependents.entry(prec).or_default().insert(cell);
            }
            self.precedents.insert(cell, new_precedents);
        }
    }

    /// Removes all outgoing edges of `cell`. Equivalent to
    /// `replace_outgoing_edges(cell, HashSet::new())`.
    pub fn clear_dependencies(&mut self, cell: CellCoord) {
        if let Some(old_precs) = self.precedents.remove(&cell) {
            for prec in old_precs {
                if let Some(deps) = self.dependents.get_mut(&prec) {
                    deps.remove(&cell);
                    if deps.is_empty() {
                        self.dependents.remove(&prec);
                    }
                }
            }
        }
    }

    /// Removes a node and every edge touching it, in either direction.
    pub fn remove_node(&mut self, cell: CellCoord) {
        self.clear_dependencies(cell);
        if let Some(deps) = self.dependents.remove(&cell) {
            for dep in deps {
                if let Some(precs) = self.precedents.get_mut(&dep) {
                    precs.remove(&cell);
                    if precs.is_empty() {
                        self.precedents.remove(&dep);
                    }
                }
            }
        }
    }

    pub fn get_precedents(&self, cell: CellCoord) -> Option<&HashSet<CellCoord>> {
        self.precedents.get(&cell)
    }

    pub fn get_dependents(&self, cell: CellCoord) -> Option<&HashSet<CellCoord>> {
        self.dependents.get(&cell)
    }

    /// All cells transitively reachable by following dependent edges
    /// forward from `cell` (i.e. every cell whose value could change as a
    /// result of `cell` changing). Does not include `cell` itself.
    /// Iterative (explicit queue), not recursive.
    pub fn reachable_from(&self, cell: CellCoord) -> HashSet<CellCoord> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(deps) = self.dependents.get(&cell) {
            queue.extend(deps.iter().copied());
        }

        while let Some(current) = queue.pop_front() {
            if !result.insert(current) {
                continue;
            }
            if let Some(deps) = self.dependents.get(&current) {
                for &dep in deps {
                    if !result.contains(&dep) {
                        queue.push_back(dep);
                    }
                }
            }
        }

        result
    }

    /// All cells transitively reachable from any cell in `cells`, plus the
    /// starting cells themselves.
    pub fn reachable_from_set(&self, cells: &HashSet<CellCoord>) -> HashSet<CellCoord> {
        let mut result: HashSet<CellCoord> = cells.clone();
        for &cell in cells {
            result.extend(self.reachable_from(cell));
        }
        result
    }

    /// The subgraph of precedent edges with both endpoints restricted to
    /// `nodes`, as an adjacency list.
    pub fn induced_subgraph(&self, nodes: &HashSet<CellCoord>) -> HashMap<CellCoord, Vec<CellCoord>> {
        nodes
            .iter()
            .map(|&u| (u, self.neighbors_within(u, nodes)))
            .collect()
    }

    fn neighbors_within(&self, cell: CellCoord, nodes: &HashSet<CellCoord>) -> Vec<CellCoord> {
        self.precedents
            .get(&cell)
            .map(|set| set.iter().filter(|v| nodes.contains(v)).copied().collect())
            .unwrap_or_default()
    }

    /// Partitions `nodes` into strongly connected components, using the
    /// precedent edges restricted to `nodes`. Implemented as an iterative
    /// Tarjan's algorithm (an explicit frame stack standing in for the
    /// call stack), since the graph can be arbitrarily deep and recursion
    /// would risk a stack overflow on a large, heavily-chained sheet.
    pub fn strongly_connected_components(&self, nodes: &HashSet<CellCoord>) -> Vec<Vec<CellCoord>> {
        struct Frame {
            node: CellCoord,
            children: Vec<CellCoord>,
            next_child: usize,
        }

        let mut index_counter = 0usize;
        let mut indices: HashMap<CellCoord, usize> = HashMap::new();
        let mut lowlink: HashMap<CellCoord, usize> = HashMap::new();
        let mut on_stack: HashSet<CellCoord> = HashSet::new();
        let mut tarjan_stack: Vec<CellCoord> = Vec::new();
        let mut components: Vec<Vec<CellCoord>> = Vec::new();

        for &start in nodes {
            if indices.contains_key(&start) {
                continue;
            }

            let mut frames: Vec<Frame> = vec![Frame {
                node: start,
                children: self.neighbors_within(start, nodes),
                next_child: 0,
            }];
            indices.insert(start, index_counter);
            lowlink.insert(start, index_counter);
            index_counter += 1;
            tarjan_stack.push(start);
            on_stack.insert(start);

            while let Some(frame) = frames.last_mut() {
                if frame.next_child < frame.children.len() {
                    let child = frame.children[frame.next_child];
                    frame.next_child += 1;

                    if !indices.contains_key(&child) {
                        indices.insert(child, index_counter);
                        lowlink.insert(child, index_counter);
                        index_counter += 1;
                        tarjan_stack.push(child);
                        on_stack.insert(child);
                        frames.push(Frame {
                            node: child,
                            children: self.neighbors_within(child, nodes),
                            next_child: 0,
                        });
                    } else if on_stack.contains(&child) {
                        let child_index = indices[&child];
                        let parent = frame.node;
                        if child_index < lowlink[&parent] {
                            lowlink.insert(parent, child_index);
                        }
                    }
                } else {
                    let node = frame.node;
                    frames.pop();

                    if let Some(parent_frame) = frames.last() {
                        let parent = parent_frame.node;
                        let node_low = lowlink[&node];
                        if node_low < lowlink[&parent] {
                            lowlink.insert(parent, node_low);
                        }
                    }

                    if lowlink[&node] == indices[&node] {
                        let mut scc = Vec::new();
                        loop {
                            let w = tarjan_stack.pop().expect("tarjan stack underflow");
                            on_stack.remove(&w);
                            scc.push(w);
                            if w == node {
                                break;
                            }
                        }
                        components.push(scc);
                    }
                }
            }
        }

        components
    }

    /// Topologically sorts `nodes` by precedent edges restricted to `nodes`,
    /// using Kahn's algorithm. Callers are expected to invoke this only on
    /// node sets already known to be acyclic (e.g. a recalc batch with its
    /// self-cycling and multi-node SCCs already pulled out and marked
    /// CIRCREF), so a leftover cycle here indicates an internal
    /// inconsistency rather than a user-reachable state.
    pub fn topological_sort_of(&self, nodes: &HashSet<CellCoord>) -> Vec<CellCoord> {
        let mut in_degree: HashMap<CellCoord, usize> = nodes.iter().map(|&c| (c, 0)).collect();

        for &cell in nodes {
            if let Some(precs) = self.precedents.get(&cell) {
                for &prec in precs {
                    if nodes.contains(&prec) {
                        *in_degree.get_mut(&cell).unwrap() += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<CellCoord> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&c, _)| c)
            .collect();

        let mut result = Vec::with_capacity(nodes.len());
        while let Some(cell) = queue.pop_front() {
            result.push(cell);
            if let Some(deps) = self.dependents.get(&cell) {
                for &dep in deps {
                    if let Some(deg) = in_degree.get_mut(&dep) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(dep);
                        }
                    }
                }
            }
        }

        debug_assert_eq!(result.len(), nodes.len(), "topological_sort_of called on a cyclic node set");
        result
    }

    pub fn formula_cell_count(&self) -> usize {
        self.precedents.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.precedents.values().map(|v| v.len()).sum()
    }

    pub fn clear(&mut self) {
        self.precedents.clear();
        self.dependents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::SheetId;

    fn coord(n: u32) -> CellCoord {
        CellCoord::new(SheetId(0), n, 1)
    }

    fn set_of(coords: &[CellCoord]) -> HashSet<CellCoord> {
        coords.iter().copied().collect()
    }

    #[test]
    fn set_and_get_dependencies() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3) = (coord(1), coord(2), coord(3));

        graph.replace_outgoing_edges(a3, set_of(&[a1, a2]));

        let precs = graph.get_precedents(a3).unwrap();
        assert!(precs.contains(&a1) && precs.contains(&a2));
        assert!(graph.get_dependents(a1).unwrap().contains(&a3));
        assert!(graph.get_dependents(a2).unwrap().contains(&a3));
    }

    #[test]
    fn replacing_edges_drops_stale_dependents() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3, b1) = (coord(1), coord(2), coord(3), coord(4));

        graph.replace_outgoing_edges(a3, set_of(&[a1, a2]));
        graph.replace_outgoing_edges(a3, set_of(&[b1]));

        assert!(graph.get_dependents(a1).is_none());
        assert!(graph.get_dependents(a2).is_none());
        assert!(graph.get_dependents(b1).unwrap().contains(&a3));
    }

    #[test]
    fn reachable_from_follows_dependent_chain_transitively() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3) = (coord(1), coord(2), coord(3));

        graph.replace_outgoing_edges(a2, set_of(&[a1]));
        graph.replace_outgoing_edges(a3, set_of(&[a2]));

        let reached = graph.reachable_from(a1);
        assert_eq!(reached, set_of(&[a2, a3]));
    }

    #[test]
    fn reachable_from_diamond_includes_both_branches() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3, a4) = (coord(1), coord(2), coord(3), coord(4));

        graph.replace_outgoing_edges(a2, set_of(&[a1]));
        graph.replace_outgoing_edges(a3, set_of(&[a1]));
        graph.replace_outgoing_edges(a4, set_of(&[a2, a3]));

        let reached = graph.reachable_from(a1);
        assert_eq!(reached, set_of(&[a2, a3, a4]));
    }

    #[test]
    fn scc_finds_self_loop() {
        let mut graph = DependencyGraph::new();
        let a1 = coord(1);
        graph.replace_outgoing_edges(a1, set_of(&[a1]));

        let nodes = set_of(&[a1]);
        let sccs = graph.strongly_connected_components(&nodes);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0], vec![a1]);
    }

    #[test]
    fn scc_finds_multi_node_cycle() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3) = (coord(1), coord(2), coord(3));

        // a1 -> a2 -> a3 -> a1
        graph.replace_outgoing_edges(a1, set_of(&[a2]));
        graph.replace_outgoing_edges(a2, set_of(&[a3]));
        graph.replace_outgoing_edges(a3, set_of(&[a1]));

        let nodes = set_of(&[a1, a2, a3]);
        let sccs = graph.strongly_connected_components(&nodes);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 3);
    }

    #[test]
    fn scc_on_acyclic_graph_is_all_singletons() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3) = (coord(1), coord(2), coord(3));

        graph.replace_outgoing_edges(a2, set_of(&[a1]));
        graph.replace_outgoing_edges(a3, set_of(&[a2]));

        let nodes = set_of(&[a1, a2, a3]);
        let sccs = graph.strongly_connected_components(&nodes);
        assert_eq!(sccs.len(), 3);
        assert!(sccs.iter().all(|scc| scc.len() == 1));
    }

    #[test]
    fn topological_sort_orders_precedents_before_dependents() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3, a4) = (coord(1), coord(2), coord(3), coord(4));

        graph.replace_outgoing_edges(a2, set_of(&[a1]));
        graph.replace_outgoing_edges(a3, set_of(&[a1]));
        graph.replace_outgoing_edges(a4, set_of(&[a2, a3]));

        let nodes = set_of(&[a2, a3, a4]);
        let order = graph.topological_sort_of(&nodes);
        let pos = |c: CellCoord| order.iter().position(|&x| x == c).unwrap();
        assert!(pos(a4) > pos(a2));
        assert!(pos(a4) > pos(a3));
    }

    #[test]
    fn counts_track_formula_cells_and_edges() {
        let mut graph = DependencyGraph::new();
        let (a1, a2, a3) = (coord(1), coord(2), coord(3));

        assert_eq!(graph.formula_cell_count(), 0);
        graph.replace_outgoing_edges(a2, set_of(&[a1]));
        graph.replace_outgoing_edges(a3, set_of(&[a1, a2]));

        assert_eq!(graph.formula_cell_count(), 2);
        assert_eq!(graph.dependency_count(), 3);
    }

    #[test]
    fn remove_node_clears_both_directions() {
        let mut graph = DependencyGraph::new();
        let (a1, a2) = (coord(1), coord(2));

        graph.replace_outgoing_edges(a2, set_of(&[a1]));
        graph.remove_node(a1);

        assert!(graph.get_precedents(a2).is_none());
        assert!(graph.get_dependents(a1).is_none());
    }
}
