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

//! Ant-colony-optimization routing engine

use crate::addr::dpid_to_mac;
use crate::controller::ControlPlane;
use crate::engine::RoutingEngine;
use crate::graph::{Edge, NetGraph};
use crate::ofproto::{Dpid, Fabric, LinkChange, LinkEvent, PacketKind, PacketMeta};

use itertools::Itertools;
use log::*;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Lower bound on the swarm size, regardless of how small the network is.
const MIN_ANTS: usize = 10;

/// Tuning parameters of the swarm.
#[derive(Debug, Clone)]
pub struct AcoParams {
    /// Exponent on the pheromone level when weighing a neighbor.
    pub alpha: f64,
    /// Exponent on the inverse edge cost when weighing a neighbor.
    pub beta: f64,
    /// Fraction of pheromone removed by each evaporation round.
    pub evaporation_rate: f64,
    /// Largest per-edge pheromone change, between two iterations, that still counts as
    /// converged.
    pub convergence_threshold: f64,
    /// Upper bound on iterations per recomputation. Hitting it is logged, and the routes of the
    /// final iteration are materialized regardless.
    pub max_iterations: usize,
}

impl Default for AcoParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 2.0,
            evaporation_rate: 0.5,
            convergence_threshold: 0.1,
            max_iterations: 5,
        }
    }
}

/// The trail of one ant: the visited nodes in order, each together with the edge it was reached
/// over (`None` for the starting node).
type AntPath = Vec<(Dpid, Option<Edge>)>;

/// One ant of the swarm. Stateless apart from its weighing exponents; the walk state lives on
/// the stack of [`Ant::run`].
#[derive(Debug, Clone, Copy)]
struct Ant {
    alpha: f64,
    beta: f64,
}

impl Ant {
    /// Walk the graph from a random starting node until no unvisited neighbor is left, then
    /// deposit `1 / distance` of pheromone on every traversed edge (in both directions).
    fn run<R: Rng>(&self, graph: &mut NetGraph, rng: &mut R) -> AntPath {
        let start = match graph.random_node(rng) {
            Some(start) => start,
            None => return Vec::new(),
        };
        let mut path: AntPath = vec![(start, None)];
        let mut visited: BTreeSet<Dpid> = BTreeSet::new();
        visited.insert(start);
        let mut distance = 0.0;
        let mut current = start;
        while let Some((next, edge)) = self.select_next(graph, current, &visited, rng) {
            visited.insert(next);
            distance += f64::from(edge.cost);
            path.push((next, Some(edge)));
            current = next;
        }
        if distance > 0.0 {
            let deposit = 1.0 / distance;
            for (a, b) in path.iter().map(|(dpid, _)| *dpid).tuple_windows() {
                graph.deposit_pheromone(a, b, deposit);
            }
        }
        path
    }

    /// Choose the next hop among the unvisited neighbors of `current`, each weighted by
    /// `pheromone^alpha * (1/cost)^beta`. If every weight is zero (e.g. right after the
    /// pheromones were cleared), pick uniformly. `None` if no unvisited neighbor is left.
    fn select_next<R: Rng>(
        &self,
        graph: &NetGraph,
        current: Dpid,
        visited: &BTreeSet<Dpid>,
        rng: &mut R,
    ) -> Option<(Dpid, Edge)> {
        let candidates: Vec<(Dpid, &Edge)> = graph
            .neighbors(current)
            .filter(|(neighbor, _)| !visited.contains(neighbor))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let weights: Vec<f64> = candidates
            .iter()
            .map(|(_, e)| e.pheromone.powf(self.alpha) * (1.0 / f64::from(e.cost)).powf(self.beta))
            .collect();
        let total: f64 = weights.iter().sum();
        let index = if total > 0.0 {
            match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(rng),
                Err(_) => rng.gen_range(0, candidates.len()),
            }
        } else {
            rng.gen_range(0, candidates.len())
        };
        let (next, edge) = candidates[index];
        Some((next, edge.clone()))
    }
}

/// Ant-colony engine: on the first packet-in after a topology change, the swarm walks the graph
/// until the pheromone field settles, and the cheapest observed path per node pair is written
/// into the forwarding tables of every switch along it, in both directions.
#[derive(Debug)]
pub struct AcoEngine {
    params: AcoParams,
    num_ants: usize,
    /// Pheromone of every directed edge as observed at the end of the previous iteration.
    last_pheromones: HashMap<(Dpid, Dpid), f64>,
    rng: StdRng,
}

impl AcoEngine {
    /// Create the engine with the given parameters. All randomness flows from the seed, so runs
    /// are reproducible.
    pub fn new(params: AcoParams, seed: u64) -> Self {
        Self {
            params,
            num_ants: MIN_ANTS,
            last_pheromones: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Keep the swarm size at `max(10, |V|^2)`.
    fn adjust_ant_population(&mut self, node_count: usize) {
        let desired = MIN_ANTS.max(node_count * node_count);
        if desired != self.num_ants {
            self.num_ants = desired;
            info!("adjusted ant population to {} for {} switches", desired, node_count);
        }
    }

    /// Iterate the swarm until the pheromone field converges or the iteration cap is hit, then
    /// materialize the routes of the final iteration. Returns whether convergence was reached.
    fn run_ants<F: Fabric>(&mut self, plane: &mut ControlPlane<F>) -> bool {
        self.last_pheromones.clear();
        let mut paths: Vec<AntPath> = Vec::new();
        let mut converged = false;
        let mut iteration = 0;
        while iteration < self.params.max_iterations {
            iteration += 1;
            plane.flush_all_tables();
            paths.clear();
            let ant = Ant { alpha: self.params.alpha, beta: self.params.beta };
            for _ in 0..self.num_ants {
                paths.push(ant.run(plane.graph_mut(), &mut self.rng));
            }
            converged = self.observe_pheromones(plane.graph());
            if converged {
                info!("ACO converged after {} iterations", iteration);
                break;
            }
            debug!("ACO not yet converged after iteration {}", iteration);
            plane.graph_mut().evaporate_pheromones(self.params.evaporation_rate);
        }
        if !converged {
            warn!(
                "maximum ACO iterations ({}) reached, materializing the routes as they are",
                self.params.max_iterations
            );
        }
        self.materialize_routes(plane, &paths);
        self.last_pheromones.clear();
        converged
    }

    /// Compare the pheromone of every directed edge against the value observed the previous
    /// iteration, and remember the current values. An edge whose change exceeds the threshold,
    /// or that was never observed before, means the field has not converged.
    fn observe_pheromones(&mut self, graph: &NetGraph) -> bool {
        let mut converged = true;
        for (from, to, edge) in graph.edges() {
            match self.last_pheromones.get(&(from, to)) {
                Some(previous)
                    if (edge.pheromone - previous).abs() <= self.params.convergence_threshold => {}
                _ => converged = false,
            }
            self.last_pheromones.insert((from, to), edge.pheromone);
        }
        converged
    }

    /// Keep, for every `(start, end)` pair, only the cheapest path the swarm reported, and
    /// install it: each switch along the path learns the port towards the end node, and each
    /// learns the port back towards the start node. Finishes with a broadcast flow-table delete
    /// so the switches re-ask for the new routes.
    fn materialize_routes<F: Fabric>(&self, plane: &mut ControlPlane<F>, paths: &[AntPath]) {
        let mut best: BTreeMap<(Dpid, Dpid), (u32, usize)> = BTreeMap::new();
        for (index, path) in paths.iter().enumerate() {
            if path.len() < 2 {
                continue;
            }
            let start = path[0].0;
            let end = path[path.len() - 1].0;
            let cost: u32 = path.iter().filter_map(|(_, e)| e.as_ref()).map(|e| e.cost).sum();
            debug!("ant path {} -> {} with cost {}", start, end, cost);
            let entry = best.entry((start, end)).or_insert((cost, index));
            if cost < entry.0 {
                *entry = (cost, index);
            }
        }
        for ((start, end), (_, index)) in best {
            let smac = dpid_to_mac(start);
            let dmac = dpid_to_mac(end);
            for (from, to) in paths[index].iter().tuple_windows() {
                let (u, _) = from;
                let (v, edge) = to;
                if let Some(edge) = edge {
                    if let Some(table) = plane.table_mut(*u) {
                        table.set(dmac, edge.sport);
                    }
                    if let Some(table) = plane.table_mut(*v) {
                        table.set(smac, edge.dport);
                    }
                }
            }
        }
        plane.clear_all_flow_tables();
    }
}

impl<F: Fabric> RoutingEngine<F> for AcoEngine {
    fn on_connection_up(&mut self, plane: &mut ControlPlane<F>, _dpid: Dpid) {
        let node_count = plane.graph().node_count();
        self.adjust_ant_population(node_count);
    }

    fn on_link_event(&mut self, plane: &mut ControlPlane<F>, event: &LinkEvent) {
        if event.change == LinkChange::Removed {
            plane.graph_mut().clear_pheromones();
        }
    }

    fn on_packet_in_prerouting(
        &mut self,
        plane: &mut ControlPlane<F>,
        _meta: &PacketMeta,
        _kind: PacketKind,
    ) -> bool {
        if plane.take_graph_updated() {
            self.run_ants(plane);
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::INITIAL_PHEROMONE;
    use crate::ofproto::PortNo;
    use crate::table::MacTable;
    use crate::testbed::TestFabric;
    use assert_approx_eq::assert_approx_eq;

    fn line_graph(n: u64) -> NetGraph {
        let mut g = NetGraph::new();
        for d in 1..=n {
            g.register_node(Dpid(d));
        }
        for d in 1..n {
            g.add_edge(Dpid(d), PortNo(3), Dpid(d + 1), PortNo(2));
        }
        g
    }

    #[test]
    fn test_deposit_is_inverse_distance_on_traversed_edges() {
        let mut g = line_graph(3);
        let ant = Ant { alpha: 1.0, beta: 2.0 };
        let mut rng = StdRng::seed_from_u64(7);
        let path = ant.run(&mut g, &mut rng);
        assert!(path.len() >= 2);
        let distance: f64 = path.iter().filter_map(|(_, e)| e.as_ref()).map(|e| f64::from(e.cost)).sum();
        for (from, to) in path.iter().map(|(d, _)| *d).tuple_windows() {
            // each traversed edge gained exactly 1/distance, in both directions
            assert_approx_eq!(
                g.edge(from, to).unwrap().pheromone,
                INITIAL_PHEROMONE + 1.0 / distance
            );
            assert_approx_eq!(
                g.edge(to, from).unwrap().pheromone,
                INITIAL_PHEROMONE + 1.0 / distance
            );
        }
    }

    #[test]
    fn test_ant_never_revisits_a_node() {
        let mut g = line_graph(5);
        let ant = Ant { alpha: 1.0, beta: 2.0 };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let path = ant.run(&mut g, &mut rng);
            let nodes: Vec<Dpid> = path.iter().map(|(d, _)| *d).collect();
            let unique: BTreeSet<Dpid> = nodes.iter().copied().collect();
            assert_eq!(nodes.len(), unique.len());
        }
    }

    #[test]
    fn test_convergence_is_tracked_per_edge() {
        let mut g = NetGraph::new();
        g.add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(2));
        let mut engine = AcoEngine::new(AcoParams::default(), 1);

        // nothing observed yet, so the first look can never report convergence
        assert!(!engine.observe_pheromones(&g));
        // no deposits since: every per-edge delta is zero
        assert!(engine.observe_pheromones(&g));
        // a change above the threshold on a single directed edge breaks convergence
        g.deposit_pheromone(Dpid(1), Dpid(2), 0.2);
        assert!(!engine.observe_pheromones(&g));
        // and a change below the threshold does not
        g.deposit_pheromone(Dpid(1), Dpid(2), 0.05);
        assert!(engine.observe_pheromones(&g));
    }

    #[test]
    fn test_two_switch_run_hits_cap_and_installs_routes() {
        let mut fabric = TestFabric::new();
        fabric.add_switch(Dpid(1), 2);
        fabric.add_switch(Dpid(2), 2);
        let mut plane = ControlPlane::new(fabric);
        for d in 1..=2 {
            plane.graph_mut().register_node(Dpid(d));
            plane.insert_table(Dpid(d), MacTable::new());
        }
        plane.graph_mut().add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(2));

        let mut engine = AcoEngine::new(AcoParams::default(), 42);
        let converged = engine.run_ants(&mut plane);

        // on a single edge every one of the 10 ants makes exactly one unit move and deposits
        // 1.0, so the pheromone level after five deposit/evaporate rounds is exact:
        // (((((0.01 + 10)/2 + 10)/2 + 10)/2 + 10)/2 + 10)/2 = 9.6878125
        assert!(!converged);
        assert_approx_eq!(plane.graph().edge(Dpid(1), Dpid(2)).unwrap().pheromone, 9.6878125);
        assert_approx_eq!(plane.graph().edge(Dpid(2), Dpid(1)).unwrap().pheromone, 9.6878125);

        // the single link is materialized in both directions
        assert_eq!(plane.table(Dpid(1)).unwrap().get(dpid_to_mac(Dpid(2))), Some(PortNo(2)));
        assert_eq!(plane.table(Dpid(2)).unwrap().get(dpid_to_mac(Dpid(1))), Some(PortNo(2)));
    }

    #[test]
    fn test_ring_materializes_consistent_routes() {
        // four switches in a ring, ports 2 (to the previous) and 3 (to the next)
        let mut fabric = TestFabric::new();
        for d in 0..4 {
            fabric.add_switch(Dpid(d), 3);
        }
        let mut plane = ControlPlane::new(fabric);
        let mut engine = AcoEngine::new(AcoParams::default(), 99);
        for d in 0..4 {
            plane.graph_mut().register_node(Dpid(d));
            plane.insert_table(Dpid(d), MacTable::new());
            engine.on_connection_up(&mut plane, Dpid(d));
        }
        for d in 0..4u64 {
            let next = (d + 1) % 4;
            plane.graph_mut().add_edge(Dpid(d), PortNo(3), Dpid(next), PortNo(2));
        }
        assert_eq!(engine.num_ants, 16);

        // With these parameters the pheromone field cannot settle below the 0.1 threshold in
        // five iterations: every ant walks the full ring (distance 3) and deposits 1/3 on each
        // traversed edge, so each edge gains about four units per iteration while evaporation
        // only halves the previous level, leaving a per-edge delta of roughly 2, 1, 0.5, 0.25
        // across the checks. The run hits the iteration cap, reports non-convergence, and
        // materializes the routes of the final iteration regardless.
        let converged = engine.run_ants(&mut plane);
        assert!(!converged);

        // every switch ends up with at least one route, and every installed port is one of the
        // two ring ports actually leading out of that switch
        for d in 0..4 {
            let table = plane.table(Dpid(d)).unwrap();
            assert!(!table.is_empty());
            let valid: BTreeSet<PortNo> =
                plane.graph().neighbors(Dpid(d)).map(|(_, e)| e.sport).collect();
            for (_, port) in table.iter() {
                assert!(valid.contains(&port));
            }
        }
    }

    #[test]
    fn test_pheromones_cleared_on_link_removal() {
        let mut fabric = TestFabric::new();
        fabric.add_switch(Dpid(1), 2);
        fabric.add_switch(Dpid(2), 2);
        let mut plane = ControlPlane::new(fabric);
        plane.graph_mut().add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(2));
        plane.graph_mut().add_edge(Dpid(2), PortNo(3), Dpid(3), PortNo(2));
        plane.graph_mut().deposit_pheromone(Dpid(1), Dpid(2), 5.0);

        let mut engine = AcoEngine::new(AcoParams::default(), 1);
        let event = LinkEvent {
            change: LinkChange::Removed,
            link: crate::ofproto::Link {
                dpid1: Dpid(2),
                port1: PortNo(3),
                dpid2: Dpid(3),
                port2: PortNo(2),
            },
        };
        plane.graph_mut().apply_link_event(&event);
        engine.on_link_event(&mut plane, &event);
        assert_eq!(plane.graph().edge(Dpid(1), Dpid(2)).unwrap().pheromone, 0.0);
    }
}
