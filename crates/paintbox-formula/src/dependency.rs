//! Dependency tracking for formula calculation
//!
//! # Edge direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! Edges may start at any cell, but only formula cells are nodes: they are
//! what ordering, cycle detection and the calculation plan operate on.
//! Literal cells never need evaluating, so they only matter as the start of
//! a [`DependencyGraph::transitive_dependents`] walk.

use ahash::{AHashMap, AHashSet};
use paintbox_core::{CellId, CellStore};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};
use thiserror::Error;

/// Returned by [`DependencyGraph::topological_order`] when cycles exist
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circular reference through {} cell(s)", cells.len())]
pub struct CycleDetected {
    /// Formula cells that could not be ordered, ascending
    pub cells: Vec<CellId>,
}

/// Dependency graph for formula cells
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Formula cells, kept sorted so every traversal is deterministic
    nodes: BTreeSet<CellId>,
    /// Cell → Cells that depend on it (dependents)
    dependents: AHashMap<CellId, AHashSet<CellId>>,
    /// Cell → Cells it depends on (precedents)
    precedents: AHashMap<CellId, AHashSet<CellId>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the edges of every formula cell in `store`
    pub fn from_store(store: &CellStore) -> Self {
        let mut graph = Self::new();
        for id in store.formula_cells() {
            graph.add_node(id);
            for &precedent in store.cell(id).precedents() {
                graph.add_dependency(precedent, id);
            }
        }
        graph
    }

    /// Register a formula cell
    pub fn add_node(&mut self, cell: CellId) {
        self.nodes.insert(cell);
    }

    /// Add a dependency: dependent depends on precedent
    pub fn add_dependency(&mut self, precedent: CellId, dependent: CellId) {
        self.dependents
            .entry(precedent)
            .or_default()
            .insert(dependent);
        self.precedents
            .entry(dependent)
            .or_default()
            .insert(precedent);
    }

    /// Remove the edges into a cell, keeping the cells that depend on it
    pub fn clear_dependencies(&mut self, cell: CellId) {
        if let Some(precedents) = self.precedents.remove(&cell) {
            for precedent in precedents {
                if let Some(deps) = self.dependents.get_mut(&precedent) {
                    deps.remove(&cell);
                    if deps.is_empty() {
                        self.dependents.remove(&precedent);
                    }
                }
            }
        }
    }

    /// Make `cell` a formula cell reading exactly `precedents`
    pub fn replace_dependencies(&mut self, cell: CellId, precedents: impl IntoIterator<Item = CellId>) {
        self.clear_dependencies(cell);
        self.add_node(cell);
        for precedent in precedents {
            self.add_dependency(precedent, cell);
        }
    }

    /// Stop treating a cell as a formula
    ///
    /// Its own precedents go away; cells that read it keep their edges.
    pub fn remove_node(&mut self, cell: CellId) {
        self.clear_dependencies(cell);
        self.nodes.remove(&cell);
    }

    /// Get cells that depend on the given cell
    pub fn dependents(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.dependents
            .get(&cell)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Get cells that the given cell depends on
    pub fn precedents(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.precedents
            .get(&cell)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn contains(&self, cell: CellId) -> bool {
        self.nodes.contains(&cell)
    }

    /// Number of formula cells
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.precedents.values().map(|set| set.len()).sum()
    }

    /// Every cell reachable from `changed` along dependent edges, ascending
    ///
    /// A start cell is only included when it is reachable from another
    /// start cell (or itself, through a cycle).
    pub fn transitive_dependents(&self, changed: impl IntoIterator<Item = CellId>) -> Vec<CellId> {
        self.reach(changed, &self.dependents)
    }

    /// Every cell reachable from `cells` along precedent edges, ascending
    pub fn transitive_precedents(&self, cells: impl IntoIterator<Item = CellId>) -> Vec<CellId> {
        self.reach(cells, &self.precedents)
    }

    fn reach(
        &self,
        starts: impl IntoIterator<Item = CellId>,
        edges: &AHashMap<CellId, AHashSet<CellId>>,
    ) -> Vec<CellId> {
        let mut seen = AHashSet::new();
        let mut queue: VecDeque<CellId> = starts
            .into_iter()
            .flat_map(|c| edges.get(&c).into_iter().flatten().copied())
            .collect();
        while let Some(cell) = queue.pop_front() {
            if seen.insert(cell) {
                queue.extend(edges.get(&cell).into_iter().flatten().copied());
            }
        }
        let mut out: Vec<CellId> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Formula cells in dependency order (Kahn's algorithm)
    ///
    /// Among cells that are ready at the same time the lowest id goes
    /// first, so the order is stable across runs.
    pub fn topological_order(&self) -> Result<Vec<CellId>, CycleDetected> {
        let dense = Dense::new(self);
        let mut indegree = vec![0usize; dense.ids.len()];
        for targets in &dense.adjacency {
            for &t in targets {
                indegree[t] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(dense.ids.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(dense.ids[i]);
            for &t in &dense.adjacency[i] {
                indegree[t] -= 1;
                if indegree[t] == 0 {
                    ready.push(Reverse(t));
                }
            }
        }

        if order.len() == dense.ids.len() {
            Ok(order)
        } else {
            let cells = indegree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d > 0)
                .map(|(i, _)| dense.ids[i])
                .collect();
            Err(CycleDetected { cells })
        }
    }

    /// Strongly connected components that form a cycle
    ///
    /// A component is cyclic when it has more than one cell or its only cell
    /// reads itself. Members are ascending and components are ordered by
    /// their first member.
    pub fn strongly_connected_components(&self) -> Vec<Vec<CellId>> {
        let dense = Dense::new(self);
        let mut cycles: Vec<Vec<CellId>> = tarjan(&dense.adjacency)
            .into_iter()
            .filter(|c| dense.is_cyclic(c))
            .map(|c| c.into_iter().map(|i| dense.ids[i]).collect())
            .collect();
        cycles.sort_unstable();
        cycles
    }

    /// Condense cycles and split the graph into layers
    ///
    /// Nothing in a layer depends on anything in the same or a later
    /// layer, so a layer's cells can be evaluated in any order (or in
    /// parallel) once the layers before it are committed.
    pub fn calculation_plan(&self) -> CalculationPlan {
        let dense = Dense::new(self);
        let components = tarjan(&dense.adjacency);

        let mut component_of = vec![0usize; dense.ids.len()];
        for (c, members) in components.iter().enumerate() {
            for &m in members {
                component_of[m] = c;
            }
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); components.len()];
        for (from, targets) in dense.adjacency.iter().enumerate() {
            for &to in targets {
                let (a, b) = (component_of[from], component_of[to]);
                if a != b {
                    successors[a].push(b);
                }
            }
        }
        let mut indegree = vec![0usize; components.len()];
        for list in &mut successors {
            list.sort_unstable();
            list.dedup();
            for &b in list.iter() {
                indegree[b] += 1;
            }
        }

        // Components are never empty; order them by their lowest member
        let first = |c: &usize| components[*c].first().copied().unwrap_or(usize::MAX);

        let mut plan = CalculationPlan::default();
        let mut current: Vec<usize> = (0..components.len())
            .filter(|&c| indegree[c] == 0)
            .collect();
        current.sort_unstable_by_key(first);

        while !current.is_empty() {
            let rank = plan.layers.len();
            let mut layer = Vec::with_capacity(current.len());
            let mut next = Vec::new();

            for &c in &current {
                let members = &components[c];
                if dense.is_cyclic(members) {
                    let cells: Vec<CellId> = members.iter().map(|&i| dense.ids[i]).collect();
                    for &cell in &cells {
                        plan.rank.insert(cell, rank);
                    }
                    layer.push(PlanNode::Cycle(plan.cycles.len()));
                    plan.cycles.push(cells);
                } else {
                    for &m in members {
                        plan.rank.insert(dense.ids[m], rank);
                        layer.push(PlanNode::Cell(dense.ids[m]));
                    }
                }

                for &s in &successors[c] {
                    indegree[s] -= 1;
                    if indegree[s] == 0 {
                        next.push(s);
                    }
                }
            }

            plan.layers.push(layer);
            next.sort_unstable_by_key(first);
            current = next;
        }

        log::debug!(
            "calculation plan: {} cells in {} layers, {} cycles",
            plan.rank.len(),
            plan.layers.len(),
            plan.cycles.len()
        );
        plan
    }
}

/// One unit of work in a [`CalculationPlan`] layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanNode {
    /// A formula cell outside any cycle
    Cell(CellId),
    /// Index into [`CalculationPlan::cycles`]
    Cycle(usize),
}

/// Layered evaluation order produced by [`DependencyGraph::calculation_plan`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalculationPlan {
    pub layers: Vec<Vec<PlanNode>>,
    /// Cells of each cyclic component, ascending
    pub cycles: Vec<Vec<CellId>>,
    rank: AHashMap<CellId, usize>,
}

impl CalculationPlan {
    /// Layer index of a formula cell
    pub fn rank(&self, cell: CellId) -> Option<usize> {
        self.rank.get(&cell).copied()
    }

    /// The cycle a cell belongs to, if any
    pub fn cycle_of(&self, cell: CellId) -> Option<usize> {
        let rank = self.rank(cell)?;
        self.layers[rank].iter().find_map(|node| match node {
            PlanNode::Cycle(i) if self.cycles[*i].binary_search(&cell).is_ok() => Some(*i),
            _ => None,
        })
    }

    /// Number of formula cells covered by the plan
    pub fn cell_count(&self) -> usize {
        self.rank.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Formula cells renumbered 0..n in id order, with edges between them only
struct Dense {
    ids: Vec<CellId>,
    /// Sorted dependents of each node
    adjacency: Vec<Vec<usize>>,
}

impl Dense {
    fn new(graph: &DependencyGraph) -> Self {
        let ids: Vec<CellId> = graph.nodes.iter().copied().collect();
        let position: AHashMap<CellId, usize> =
            ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let adjacency = ids
            .iter()
            .map(|id| {
                let mut targets: Vec<usize> = graph
                    .dependents(*id)
                    .filter_map(|d| position.get(&d).copied())
                    .collect();
                targets.sort_unstable();
                targets
            })
            .collect();

        Self { ids, adjacency }
    }

    fn is_cyclic(&self, members: &[usize]) -> bool {
        match members {
            [single] => self.adjacency[*single].binary_search(single).is_ok(),
            _ => members.len() > 1,
        }
    }
}

/// Iterative Tarjan; components come out sinks first, members ascending
fn tarjan(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut counter = 0;
    let mut components = Vec::new();

    // (node, position of the next neighbour to visit)
    let mut call: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = counter;
        lowlink[root] = counter;
        counter += 1;
        stack.push(root);
        on_stack[root] = true;
        call.push((root, 0));

        while let Some(top) = call.last_mut() {
            let v = top.0;
            if let Some(&w) = adjacency[v].get(top.1) {
                top.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = counter;
                    lowlink[w] = counter;
                    counter += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }

            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn id(n: u32) -> CellId {
        CellId(n)
    }

    fn graph(nodes: &[u32], edges: &[(u32, u32)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for &n in nodes {
            g.add_node(id(n));
        }
        for &(p, d) in edges {
            g.add_dependency(id(p), id(d));
        }
        g
    }

    #[test]
    fn test_add_dependency() {
        let g = graph(&[1], &[(0, 1)]);

        assert!(g.dependents(id(0)).any(|c| c == id(1)));
        assert!(g.precedents(id(1)).any(|c| c == id(0)));
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_replace_and_remove() {
        let mut g = graph(&[2], &[(0, 2), (1, 2)]);
        g.replace_dependencies(id(2), [id(1)]);
        assert_eq!(g.precedents(id(2)).collect::<Vec<_>>(), vec![id(1)]);
        assert_eq!(g.dependents(id(0)).count(), 0);

        g.add_node(id(3));
        g.add_dependency(id(2), id(3));
        g.remove_node(id(2));
        assert!(!g.contains(id(2)));
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.transitive_dependents([id(2)]), vec![id(3)]);
    }

    #[test]
    fn test_transitive_dependents() {
        // 0 (literal) -> 1 -> 2 -> 3, and 4 unrelated
        let g = graph(&[1, 2, 3, 4], &[(0, 1), (1, 2), (2, 3)]);
        assert_eq!(g.transitive_dependents([id(0)]), vec![id(1), id(2), id(3)]);
        assert_eq!(g.transitive_dependents([id(2)]), vec![id(3)]);
        assert_eq!(g.transitive_precedents([id(3)]), vec![id(0), id(1), id(2)]);
    }

    #[test]
    fn test_topological_order_is_stable() {
        // 5 and 3 both feed 4; 1 is independent
        let g = graph(&[1, 3, 4, 5], &[(5, 4), (3, 4)]);
        assert_eq!(
            g.topological_order().unwrap(),
            vec![id(1), id(3), id(5), id(4)]
        );
    }

    #[test]
    fn test_topological_order_reports_cycle() {
        let g = graph(&[1, 2, 3], &[(1, 2), (2, 1), (2, 3)]);
        let err = g.topological_order().unwrap_err();
        assert_eq!(err.cells, vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_circular_reference() {
        // A1 -> B1 -> C1 -> A1 (circular), D1 reads itself, E1 is acyclic
        let g = graph(
            &[0, 1, 2, 3, 4],
            &[(0, 1), (1, 2), (2, 0), (3, 3), (2, 4)],
        );
        assert_eq!(
            g.strongly_connected_components(),
            vec![vec![id(0), id(1), id(2)], vec![id(3)]]
        );
    }

    #[test]
    fn test_calculation_plan_layers() {
        // 1 and 2 are inputs to 3; 3 feeds the cycle {4, 5}; 6 reads the cycle
        let g = graph(
            &[1, 2, 3, 4, 5, 6],
            &[(1, 3), (2, 3), (3, 4), (4, 5), (5, 4), (5, 6)],
        );
        let plan = g.calculation_plan();

        assert_eq!(
            plan.layers,
            vec![
                vec![PlanNode::Cell(id(1)), PlanNode::Cell(id(2))],
                vec![PlanNode::Cell(id(3))],
                vec![PlanNode::Cycle(0)],
                vec![PlanNode::Cell(id(6))],
            ]
        );
        assert_eq!(plan.cycles, vec![vec![id(4), id(5)]]);
        assert_eq!(plan.rank(id(5)), Some(2));
        assert_eq!(plan.cycle_of(id(4)), Some(0));
        assert_eq!(plan.cycle_of(id(3)), None);
        assert_eq!(plan.cell_count(), 6);
    }

    #[test]
    fn test_plan_ignores_literal_precedents() {
        let g = graph(&[1], &[(0, 1)]);
        let plan = g.calculation_plan();
        assert_eq!(plan.layers, vec![vec![PlanNode::Cell(id(1))]]);
        assert_eq!(plan.rank(id(0)), None);
    }

    fn arbitrary_graph() -> impl Strategy<Value = (u32, Vec<(u32, u32)>)> {
        (2u32..24).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..64)))
    }

    proptest! {
        #[test]
        fn prop_topological_order_respects_edges(n in 2u32..24, raw in prop::collection::vec((0u32..24, 0u32..24), 0..64)) {
            // Only forward edges, so the graph is acyclic
            let edges: Vec<(u32, u32)> = raw
                .into_iter()
                .map(|(a, b)| (a % n, b % n))
                .filter(|(a, b)| a < b)
                .collect();
            let nodes: Vec<u32> = (0..n).collect();
            let order = graph(&nodes, &edges).topological_order().unwrap();

            prop_assert_eq!(order.len(), n as usize);
            let position: AHashMap<CellId, usize> =
                order.iter().enumerate().map(|(i, &c)| (c, i)).collect();
            for (p, d) in edges {
                prop_assert!(position[&id(p)] < position[&id(d)]);
            }
        }

        #[test]
        fn prop_plan_ranks_respect_edges((n, edges) in arbitrary_graph()) {
            let nodes: Vec<u32> = (0..n).collect();
            let g = graph(&nodes, &edges);
            let plan = g.calculation_plan();

            prop_assert_eq!(plan.cell_count(), n as usize);
            for (p, d) in edges {
                let (rp, rd) = (plan.rank(id(p)).unwrap(), plan.rank(id(d)).unwrap());
                match (plan.cycle_of(id(p)), plan.cycle_of(id(d))) {
                    (Some(a), Some(b)) if a == b => {
                        prop_assert_eq!(rp, rd);
                    }
                    _ => {
                        prop_assert!(rp < rd);
                    }
                }
            }
        }
    }
}
