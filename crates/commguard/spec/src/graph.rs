// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Method communication graphs
//!
//! Row `i` holds the out-edges of method `i`. The node count is fixed when
//! the graph is created and edges are only added during compilation.

use crate::intset::{self, IntSet};

/// A directed writer -> reader edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: u32,
    pub sink: u32,
}

#[derive(Debug, Clone)]
pub struct Graph {
    rows: Box<[IntSet]>,
}

impl Graph {
    /// Create a graph with `nodes` empty rows
    pub fn new(nodes: usize) -> Self {
        Self { rows: (0..nodes).map(|_| IntSet::with_capacity(nodes)).collect() }
    }

    /// Add the edge `i -> j`.
    ///
    /// # Panics
    /// If `i` is not a node of this graph.
    pub fn add_edge(&mut self, i: u32, j: u32) {
        self.rows[i as usize].add(j);
    }

    /// Edge query on the checking hot path.
    #[inline]
    pub fn contains_edge(&self, i: u32, j: u32) -> bool {
        match self.rows.get(i as usize) {
            Some(row) => row.contains(j),
            None => false,
        }
    }

    pub fn out_edges(&self, i: u32) -> Option<&IntSet> {
        self.rows.get(i as usize)
    }

    /// Linear scan over all rows. Only used while compiling a module.
    pub fn has_in_edges(&self, i: u32) -> bool {
        self.rows.iter().any(|row| row.contains(i))
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn num_edges(&self) -> usize {
        self.rows.iter().map(IntSet::len).sum()
    }

    /// All edges ascending by source, then sink
    pub fn edges(&self) -> Edges<'_> {
        Edges { rows: &self.rows, source: 0, sinks: self.rows.first().map(IntSet::iter) }
    }
}

pub struct Edges<'a> {
    rows: &'a [IntSet],
    source: usize,
    sinks: Option<intset::Iter<'a>>,
}

impl Iterator for Edges<'_> {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        loop {
            let sinks = self.sinks.as_mut()?;
            if let Some(sink) = sinks.next() {
                return Some(Edge { source: self.source as u32, sink });
            }
            self.source += 1;
            self.sinks = self.rows.get(self.source).map(IntSet::iter);
        }
    }
}

impl<'a> IntoIterator for &'a Graph {
    type Item = Edge;
    type IntoIter = Edges<'a>;

    fn into_iter(self) -> Edges<'a> {
        self.edges()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_edges_and_queries() {
        let mut graph = Graph::new(4);
        graph.add_edge(0, 1);
        graph.add_edge(0, 3);
        graph.add_edge(2, 2);

        assert!(graph.contains_edge(0, 1));
        assert!(graph.contains_edge(2, 2));
        assert!(!graph.contains_edge(1, 0));
        assert!(!graph.contains_edge(17, 0), "out-of-range source is simply absent");

        assert!(graph.has_in_edges(3));
        assert!(!graph.has_in_edges(0));
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(graph.size(), 4);
    }

    #[test]
    fn test_edge_iteration_order() {
        let mut graph = Graph::new(5);
        graph.add_edge(3, 0);
        graph.add_edge(1, 4);
        graph.add_edge(1, 2);
        graph.add_edge(4, 4);

        let edges: Vec<(u32, u32)> = graph.edges().map(|e| (e.source, e.sink)).collect();
        assert_eq!(edges, vec![(1, 2), (1, 4), (3, 0), (4, 4)]);
        assert_eq!(Graph::new(0).edges().count(), 0);
    }

    proptest! {
        #[test]
        fn prop_iteration_reports_every_added_edge(pairs in proptest::collection::vec((0u32..16, 0u32..16), 0..48)) {
            let mut graph = Graph::new(16);
            for (i, j) in &pairs {
                graph.add_edge(*i, *j);
            }
            let mut expected: Vec<(u32, u32)> = pairs.clone();
            expected.sort();
            expected.dedup();
            let seen: Vec<(u32, u32)> = graph.edges().map(|e| (e.source, e.sink)).collect();
            prop_assert_eq!(seen, expected);
        }
    }
}
