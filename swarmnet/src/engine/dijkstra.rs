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

//! Shortest-path routing engine

use crate::addr::dpid_to_mac;
use crate::controller::ControlPlane;
use crate::engine::RoutingEngine;
use crate::graph::NetGraph;
use crate::ofproto::{Dpid, Fabric, PacketKind, PacketMeta, PortNo};

use log::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// An entry of the Dijkstra frontier, ordered by accumulated cost only (smallest first); the
/// node it carries does not take part in the comparison, so ties are broken arbitrarily.
#[derive(Debug, Clone, Copy)]
struct PrioritizedNode {
    cost: u32,
    node: Dpid,
}

impl PartialEq for PrioritizedNode {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for PrioritizedNode {}

impl PartialOrd for PrioritizedNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed, so that the std max-heap pops the cheapest entry first
        other.cost.cmp(&self.cost)
    }
}

/// Shortest-path engine: on the first packet-in after a topology change, every switch gets its
/// forwarding table rewritten with the next-hop ports of a fresh single-source shortest-path
/// run, and every switch's flow table is cleared so the new routes take effect immediately.
#[derive(Debug, Default)]
pub struct DijkstraEngine {}

impl DijkstraEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn recompute<F: Fabric>(&mut self, plane: &mut ControlPlane<F>) {
        debug!("recomputing shortest-path routes for {} switches", plane.graph().node_count());
        let sources: Vec<Dpid> = plane.graph().dpids().collect();
        for source in sources {
            let ports = next_hop_ports(plane.graph(), source);
            let table = match plane.table_mut(source) {
                Some(table) => table,
                None => continue,
            };
            table.flush();
            for (dest, port) in ports {
                table.set(dpid_to_mac(dest), port);
            }
        }
        plane.clear_all_flow_tables();
    }
}

impl<F: Fabric> RoutingEngine<F> for DijkstraEngine {
    fn on_packet_in_prerouting(
        &mut self,
        plane: &mut ControlPlane<F>,
        _meta: &PacketMeta,
        _kind: PacketKind,
    ) -> bool {
        if plane.take_graph_updated() {
            self.recompute(plane);
        }
        true
    }
}

/// Single-source shortest paths from `source`, unwound to the egress port on `source` for every
/// reachable destination. Unreachable destinations (and `source` itself) are absent.
fn next_hop_ports(graph: &NetGraph, source: Dpid) -> BTreeMap<Dpid, PortNo> {
    // predecessor edge of each reached node: the node it was relaxed from, and the egress port
    // on that node
    let mut pred: BTreeMap<Dpid, (Dpid, PortNo)> = BTreeMap::new();
    let mut dist: BTreeMap<Dpid, u32> = BTreeMap::new();
    let mut frontier: BinaryHeap<PrioritizedNode> = BinaryHeap::new();

    dist.insert(source, 0);
    frontier.push(PrioritizedNode { cost: 0, node: source });
    while let Some(PrioritizedNode { cost, node }) = frontier.pop() {
        if dist.get(&node).map(|d| cost > *d).unwrap_or(false) {
            continue;
        }
        for (neighbor, edge) in graph.neighbors(node) {
            let through = cost + edge.cost;
            if dist.get(&neighbor).map(|d| through < *d).unwrap_or(true) {
                dist.insert(neighbor, through);
                pred.insert(neighbor, (node, edge.sport));
                frontier.push(PrioritizedNode { cost: through, node: neighbor });
            }
        }
    }

    // unwind the predecessor edges towards the source; every node on a walked chain shares the
    // first-hop port of the point where the chain meets the source (or an already resolved
    // node), so resolved entries are memoized
    let mut ports: BTreeMap<Dpid, PortNo> = BTreeMap::new();
    for dest in dist.keys().copied().filter(|d| *d != source).collect::<Vec<_>>() {
        if ports.contains_key(&dest) {
            continue;
        }
        let mut chain: Vec<Dpid> = Vec::new();
        let mut current = dest;
        let port = loop {
            if let Some(port) = ports.get(&current) {
                break Some(*port);
            }
            match pred.get(&current) {
                Some((prev, sport)) if *prev == source => {
                    chain.push(current);
                    break Some(*sport);
                }
                Some((prev, _)) => {
                    chain.push(current);
                    current = *prev;
                }
                None => break None,
            }
        };
        if let Some(port) = port {
            for node in chain {
                ports.insert(node, port);
            }
        }
    }
    ports
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ofproto::PortNo;
    use std::collections::BTreeSet;

    /// 1 --(2,2)-- 2 --(3,2)-- 3 --(3,2)-- 4, plus a shortcut 1 --(4,4)-- 4
    fn diamond() -> NetGraph {
        let mut g = NetGraph::new();
        for d in 1..=4 {
            g.register_node(Dpid(d));
        }
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(2));
        g.add_edge(Dpid(2), PortNo(3), Dpid(3), PortNo(2));
        g.add_edge(Dpid(3), PortNo(3), Dpid(4), PortNo(2));
        g.add_edge(Dpid(1), PortNo(4), Dpid(4), PortNo(4));
        g
    }

    /// Walk the computed next hops from `source` to `dest` and count hops.
    fn walk(g: &NetGraph, source: Dpid, dest: Dpid) -> Option<usize> {
        let mut hops = 0;
        let mut current = source;
        while current != dest {
            let port = next_hop_ports(g, current).get(&dest).copied()?;
            let (next, _) = g.neighbors(current).find(|(_, e)| e.sport == port)?;
            current = next;
            hops += 1;
            if hops > g.node_count() {
                return None;
            }
        }
        Some(hops)
    }

    #[test]
    fn test_next_hops_on_chain() {
        let mut g = NetGraph::new();
        for d in 1..=3 {
            g.register_node(Dpid(d));
        }
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(2));
        g.add_edge(Dpid(2), PortNo(3), Dpid(3), PortNo(2));

        let p1 = next_hop_ports(&g, Dpid(1));
        assert_eq!(p1.get(&Dpid(2)), Some(&PortNo(2)));
        assert_eq!(p1.get(&Dpid(3)), Some(&PortNo(2)));
        let p2 = next_hop_ports(&g, Dpid(2));
        assert_eq!(p2.get(&Dpid(1)), Some(&PortNo(2)));
        assert_eq!(p2.get(&Dpid(3)), Some(&PortNo(3)));
        let p3 = next_hop_ports(&g, Dpid(3));
        assert_eq!(p3.get(&Dpid(1)), Some(&PortNo(2)));
        assert_eq!(p3.get(&Dpid(2)), Some(&PortNo(2)));
    }

    #[test]
    fn test_shortcut_wins() {
        let g = diamond();
        // 1 -> 4 directly, not around the chain
        assert_eq!(next_hop_ports(&g, Dpid(1)).get(&Dpid(4)), Some(&PortNo(4)));
        assert_eq!(next_hop_ports(&g, Dpid(4)).get(&Dpid(1)), Some(&PortNo(4)));
    }

    #[test]
    fn test_installed_paths_are_shortest() {
        let g = diamond();
        // true unit-cost distances on the diamond
        let expected = vec![
            ((1, 2), 1),
            ((1, 3), 2),
            ((1, 4), 1),
            ((2, 3), 1),
            ((2, 4), 2),
            ((3, 4), 1),
        ];
        for ((a, b), hops) in expected {
            assert_eq!(walk(&g, Dpid(a), Dpid(b)), Some(hops), "{} -> {}", a, b);
            assert_eq!(walk(&g, Dpid(b), Dpid(a)), Some(hops), "{} -> {}", b, a);
        }
    }

    #[test]
    fn test_unreachable_destinations_are_absent() {
        let mut g = NetGraph::new();
        for d in 1..=3 {
            g.register_node(Dpid(d));
        }
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(2));
        let ports = next_hop_ports(&g, Dpid(1));
        assert_eq!(ports.keys().copied().collect::<BTreeSet<_>>(), {
            let mut s = BTreeSet::new();
            s.insert(Dpid(2));
            s
        });
    }

    #[test]
    fn test_recomputation_is_stable() {
        let g = diamond();
        for d in 1..=4 {
            assert_eq!(next_hop_ports(&g, Dpid(d)), next_hop_ports(&g, Dpid(d)));
        }
    }
}
