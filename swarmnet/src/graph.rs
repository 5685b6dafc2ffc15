// Swarmnet: A Routing Control Plane for Software-Defined Ad-Hoc Networks
// Copyright (C) 2024  The Swarmnet Developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # Topology graph
//!
//! The switch topology as learned from link discovery: a map from dpid to node, where each node
//! holds its outgoing directed edges keyed by neighbor dpid. Every physical link is represented
//! by two directed edges with source and destination ports swapped. Edges carry the pheromone
//! level used by the ant-colony engine; the other engines ignore it.
//!
//! Nodes and edges live in `BTreeMap`s so that iteration order is deterministic; together with
//! an injected random generator this makes every routing run reproducible.

use crate::ofproto::{Dpid, LinkChange, LinkEvent, PortNo};
use rand::Rng;
use std::collections::BTreeMap;

/// Pheromone level assigned to a freshly discovered edge.
pub const INITIAL_PHEROMONE: f64 = 0.01;

/// A directed edge `a -> b`. `sport` is the port on `a`, `dport` the port on `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Egress port on the source switch.
    pub sport: PortNo,
    /// Ingress port on the destination switch.
    pub dport: PortNo,
    /// Link cost. Uniformly 1 in this deployment.
    pub cost: u32,
    /// Pheromone level, raised by ant deposits and lowered by evaporation. Always >= 0.
    pub pheromone: f64,
}

impl Edge {
    fn new(sport: PortNo, dport: PortNo) -> Self {
        Self { sport, dport, cost: 1, pheromone: INITIAL_PHEROMONE }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Node {
    links: BTreeMap<Dpid, Edge>,
}

/// The directed adjacency structure over switch identifiers.
///
/// Invariant: `a -> b` exists iff `b -> a` exists, with `sport`/`dport` swapped and the same
/// cost. Nodes are never removed; a disconnected switch simply ends up with no edges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetGraph {
    nodes: BTreeMap<Dpid, Node>,
}

impl NetGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a switch. Repeated registration keeps the existing node untouched, since a
    /// connection handshake may recur.
    pub fn register_node(&mut self, dpid: Dpid) {
        self.nodes.entry(dpid).or_insert_with(Node::default);
    }

    /// Ensure both directed edges of the link `a <-> b` exist. A self-loop is a no-op. Existing
    /// edges are left untouched, so pheromone survives a re-discovery of the same link.
    pub fn add_edge(&mut self, a: Dpid, port_a: PortNo, b: Dpid, port_b: PortNo) {
        if a == b {
            return;
        }
        self.nodes
            .entry(a)
            .or_insert_with(Node::default)
            .links
            .entry(b)
            .or_insert_with(|| Edge::new(port_a, port_b));
        self.nodes
            .entry(b)
            .or_insert_with(Node::default)
            .links
            .entry(a)
            .or_insert_with(|| Edge::new(port_b, port_a));
    }

    /// Remove both directed edges of the link `a <-> b`, if present.
    pub fn remove_edge(&mut self, a: Dpid, b: Dpid) {
        if let Some(node) = self.nodes.get_mut(&a) {
            node.links.remove(&b);
        }
        if let Some(node) = self.nodes.get_mut(&b) {
            node.links.remove(&a);
        }
    }

    /// Apply a link-discovery event.
    pub fn apply_link_event(&mut self, event: &LinkEvent) {
        let l = event.link;
        match event.change {
            LinkChange::Added => self.add_edge(l.dpid1, l.port1, l.dpid2, l.port2),
            LinkChange::Removed => self.remove_edge(l.dpid1, l.dpid2),
        }
    }

    /// True if the switch is registered.
    pub fn contains_node(&self, dpid: Dpid) -> bool {
        self.nodes.contains_key(&dpid)
    }

    /// Number of registered switches.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over all registered dpids, in ascending order.
    pub fn dpids(&self) -> impl Iterator<Item = Dpid> + '_ {
        self.nodes.keys().copied()
    }

    /// The outgoing edges of a switch, keyed by neighbor dpid. Empty for unknown switches.
    pub fn neighbors(&self, dpid: Dpid) -> impl Iterator<Item = (Dpid, &Edge)> {
        self.nodes.get(&dpid).into_iter().flat_map(|n| n.links.iter().map(|(d, e)| (*d, e)))
    }

    /// The directed edge `a -> b`, if present.
    pub fn edge(&self, a: Dpid, b: Dpid) -> Option<&Edge> {
        self.nodes.get(&a).and_then(|n| n.links.get(&b))
    }

    /// Iterate over every directed edge as `(from, to, edge)`.
    pub fn edges(&self) -> impl Iterator<Item = (Dpid, Dpid, &Edge)> {
        self.nodes
            .iter()
            .flat_map(|(from, node)| node.links.iter().map(move |(to, e)| (*from, *to, e)))
    }

    /// A uniformly random registered dpid, or `None` on an empty graph.
    pub fn random_node<R: Rng>(&self, rng: &mut R) -> Option<Dpid> {
        if self.nodes.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0, self.nodes.len());
        self.nodes.keys().nth(idx).copied()
    }

    /// Add `amount` of pheromone to the edge `a -> b` and to its reverse `b -> a`.
    pub fn deposit_pheromone(&mut self, a: Dpid, b: Dpid, amount: f64) {
        if let Some(edge) = self.nodes.get_mut(&a).and_then(|n| n.links.get_mut(&b)) {
            edge.pheromone += amount;
        }
        if let Some(edge) = self.nodes.get_mut(&b).and_then(|n| n.links.get_mut(&a)) {
            edge.pheromone += amount;
        }
    }

    /// Multiply every edge's pheromone by `1 - rate`.
    pub fn evaporate_pheromones(&mut self, rate: f64) {
        for node in self.nodes.values_mut() {
            for edge in node.links.values_mut() {
                edge.pheromone *= 1.0 - rate;
            }
        }
    }

    /// Reset every edge's pheromone to zero, so the swarm is not anchored by stale chemistry.
    pub fn clear_pheromones(&mut self) {
        for node in self.nodes.values_mut() {
            for edge in node.links.values_mut() {
                edge.pheromone = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ofproto::Link;

    fn link(a: u64, pa: u16, b: u64, pb: u16) -> Link {
        Link { dpid1: Dpid(a), port1: PortNo(pa), dpid2: Dpid(b), port2: PortNo(pb) }
    }

    #[test]
    fn test_edges_are_symmetric() {
        let mut g = NetGraph::new();
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(3));
        let fwd = g.edge(Dpid(1), Dpid(2)).unwrap();
        let rev = g.edge(Dpid(2), Dpid(1)).unwrap();
        assert_eq!((fwd.sport, fwd.dport), (PortNo(2), PortNo(3)));
        assert_eq!((rev.sport, rev.dport), (PortNo(3), PortNo(2)));
        assert_eq!(fwd.cost, rev.cost);
    }

    #[test]
    fn test_self_loop_is_noop() {
        let mut g = NetGraph::new();
        g.register_node(Dpid(1));
        g.add_edge(Dpid(1), PortNo(2), Dpid(1), PortNo(3));
        assert_eq!(g.neighbors(Dpid(1)).count(), 0);
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut g = NetGraph::new();
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(3));
        g.deposit_pheromone(Dpid(1), Dpid(2), 0.5);
        // a re-discovery of the same link must not reset the pheromone
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(3));
        assert_eq!(g.edge(Dpid(1), Dpid(2)).unwrap().pheromone, INITIAL_PHEROMONE + 0.5);
    }

    #[test]
    fn test_add_remove_round_trip() {
        let mut g = NetGraph::new();
        g.register_node(Dpid(1));
        g.register_node(Dpid(2));
        let before = g.clone();
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(3));
        g.remove_edge(Dpid(1), Dpid(2));
        assert_eq!(g, before);
    }

    #[test]
    fn test_remove_absent_edge_is_silent() {
        let mut g = NetGraph::new();
        g.register_node(Dpid(1));
        g.remove_edge(Dpid(1), Dpid(2));
        g.remove_edge(Dpid(3), Dpid(4));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_apply_link_event() {
        let mut g = NetGraph::new();
        g.apply_link_event(&LinkEvent { change: LinkChange::Added, link: link(1, 2, 2, 3) });
        assert!(g.edge(Dpid(1), Dpid(2)).is_some());
        g.apply_link_event(&LinkEvent { change: LinkChange::Removed, link: link(1, 2, 2, 3) });
        assert!(g.edge(Dpid(1), Dpid(2)).is_none());
        assert!(g.edge(Dpid(2), Dpid(1)).is_none());
    }

    #[test]
    fn test_pheromone_operations() {
        let mut g = NetGraph::new();
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(3));
        g.deposit_pheromone(Dpid(1), Dpid(2), 1.0);
        assert_eq!(g.edge(Dpid(1), Dpid(2)).unwrap().pheromone, INITIAL_PHEROMONE + 1.0);
        assert_eq!(g.edge(Dpid(2), Dpid(1)).unwrap().pheromone, INITIAL_PHEROMONE + 1.0);
        g.evaporate_pheromones(0.5);
        assert_eq!(g.edge(Dpid(1), Dpid(2)).unwrap().pheromone, (INITIAL_PHEROMONE + 1.0) * 0.5);
        g.clear_pheromones();
        assert_eq!(g.edge(Dpid(1), Dpid(2)).unwrap().pheromone, 0.0);
    }
}
