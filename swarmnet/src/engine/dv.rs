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

//! Distance-vector routing engine

use crate::addr::dpid_to_mac;
use crate::controller::ControlPlane;
use crate::engine::RoutingEngine;
use crate::ofproto::{Dpid, Fabric, LinkChange, LinkEvent, Mac, PacketKind, PacketMeta, PortNo};

use log::*;
use std::collections::{BTreeMap, HashMap};

/// Upper bound on full relaxation passes. On a unit-cost graph the fixed point is reached after
/// at most diameter-many passes, so hitting this cap means something is off; it is logged and
/// the tables of the partial computation are kept.
const DV_ITER_LIMIT: usize = 1000;

/// Distance-vector engine: every switch keeps a vector of distances to all known MACs, seeded
/// with itself at distance zero and relaxed from its neighbors' vectors until a full pass over
/// the graph changes nothing.
#[derive(Debug, Default)]
pub struct DistanceVectorEngine {
    dvs: BTreeMap<Dpid, HashMap<Mac, u32>>,
}

impl DistanceVectorEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run relaxation passes to the fixed point, then clear all switch flow tables so the new
    /// routes take effect. Returns the number of completed passes.
    fn run_update<F: Fabric>(&mut self, plane: &mut ControlPlane<F>) -> usize {
        let mut pass = 0;
        while pass < DV_ITER_LIMIT {
            debug!("running DV update pass {}", pass);
            let mut updated = false;
            let dpids: Vec<Dpid> = plane.graph().dpids().collect();
            for dpid in dpids {
                updated |= self.update_node(plane, dpid);
            }
            if !updated {
                break;
            }
            pass += 1;
        }
        if pass >= DV_ITER_LIMIT {
            warn!("DV relaxation did not reach a fixed point within {} passes", DV_ITER_LIMIT);
        }
        plane.clear_all_flow_tables();
        pass
    }

    /// One relaxation round for a single node. Seeds a fresh vector with the node's own MAC at
    /// distance zero, relaxes every entry of every neighbor's vector through the connecting
    /// edge, and rewrites the node's forwarding table if the vector changed. Returns whether it
    /// changed.
    fn update_node<F: Fabric>(&mut self, plane: &mut ControlPlane<F>, dpid: Dpid) -> bool {
        let mut dv: HashMap<Mac, u32> = HashMap::new();
        let mut next_hops: HashMap<Mac, PortNo> = HashMap::new();
        dv.insert(dpid_to_mac(dpid), 0);
        for (neighbor, edge) in plane.graph().neighbors(dpid) {
            let neighbor_dv = match self.dvs.get(&neighbor) {
                Some(neighbor_dv) => neighbor_dv,
                None => continue,
            };
            for (mac, cost) in neighbor_dv {
                let through = cost + edge.cost;
                let better = match dv.get(mac) {
                    None => true,
                    Some(&current) => current != 0 && through < current,
                };
                if better {
                    dv.insert(*mac, through);
                    next_hops.insert(*mac, edge.sport);
                }
            }
        }
        if self.dvs.get(&dpid) == Some(&dv) {
            return false;
        }
        self.dvs.insert(dpid, dv);
        if let Some(table) = plane.table_mut(dpid) {
            table.flush();
            for (mac, port) in next_hops {
                table.set(mac, port);
            }
        }
        true
    }
}

impl<F: Fabric> RoutingEngine<F> for DistanceVectorEngine {
    fn on_connection_up(&mut self, _plane: &mut ControlPlane<F>, dpid: Dpid) {
        self.dvs.insert(dpid, HashMap::new());
    }

    fn on_link_event(&mut self, _plane: &mut ControlPlane<F>, event: &LinkEvent) {
        if event.change == LinkChange::Removed {
            // both endpoints re-learn from scratch, otherwise stale distances can persist
            for dpid in &[event.link.dpid1, event.link.dpid2] {
                if let Some(dv) = self.dvs.get_mut(dpid) {
                    dv.clear();
                }
            }
        }
    }

    fn on_packet_in_prerouting(
        &mut self,
        plane: &mut ControlPlane<F>,
        _meta: &PacketMeta,
        _kind: PacketKind,
    ) -> bool {
        if plane.take_graph_updated() {
            self.run_update(plane);
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::ControlPlane;
    use crate::table::MacTable;
    use crate::testbed::TestFabric;
    use maplit::hashmap;

    /// A triangle of three connected switches, with connection-up already processed.
    fn triangle() -> (ControlPlane<TestFabric>, DistanceVectorEngine) {
        let mut fabric = TestFabric::new();
        for d in 1..=3 {
            fabric.add_switch(Dpid(d), 3);
        }
        let mut plane = ControlPlane::new(fabric);
        let mut engine = DistanceVectorEngine::new();
        for d in 1..=3 {
            plane.graph_mut().register_node(Dpid(d));
            plane.insert_table(Dpid(d), MacTable::new());
            engine.on_connection_up(&mut plane, Dpid(d));
        }
        plane.graph_mut().add_edge(Dpid(1), PortNo(2), Dpid(2), PortNo(2));
        plane.graph_mut().add_edge(Dpid(2), PortNo(3), Dpid(3), PortNo(3));
        plane.graph_mut().add_edge(Dpid(1), PortNo(3), Dpid(3), PortNo(2));
        (plane, engine)
    }

    #[test]
    fn test_triangle_converges_within_three_passes() {
        let (mut plane, mut engine) = triangle();
        let passes = engine.run_update(&mut plane);
        assert!(passes <= 3, "took {} passes", passes);

        let m1 = dpid_to_mac(Dpid(1));
        let m2 = dpid_to_mac(Dpid(2));
        let m3 = dpid_to_mac(Dpid(3));
        assert_eq!(engine.dvs[&Dpid(1)], hashmap![m1 => 0, m2 => 1, m3 => 1]);
        assert_eq!(engine.dvs[&Dpid(2)], hashmap![m1 => 1, m2 => 0, m3 => 1]);
        assert_eq!(engine.dvs[&Dpid(3)], hashmap![m1 => 1, m2 => 1, m3 => 0]);

        // forwarding tables agree with the direct-neighbor ports
        assert_eq!(plane.table(Dpid(1)).unwrap().get(m2), Some(PortNo(2)));
        assert_eq!(plane.table(Dpid(1)).unwrap().get(m3), Some(PortNo(3)));
        assert_eq!(plane.table(Dpid(2)).unwrap().get(m1), Some(PortNo(2)));
        assert_eq!(plane.table(Dpid(2)).unwrap().get(m3), Some(PortNo(3)));
        assert_eq!(plane.table(Dpid(3)).unwrap().get(m1), Some(PortNo(2)));
        assert_eq!(plane.table(Dpid(3)).unwrap().get(m2), Some(PortNo(3)));
    }

    #[test]
    fn test_converged_state_is_a_fixed_point() {
        let (mut plane, mut engine) = triangle();
        engine.run_update(&mut plane);
        let dvs_before = engine.dvs.clone();
        let tables_before: Vec<_> =
            plane.tables().map(|(d, t)| (d, t.clone())).collect();

        // one more full pass must not change anything
        let dpids: Vec<Dpid> = plane.graph().dpids().collect();
        for dpid in dpids {
            assert!(!engine.update_node(&mut plane, dpid));
        }
        assert_eq!(engine.dvs, dvs_before);
        let tables_after: Vec<_> = plane.tables().map(|(d, t)| (d, t.clone())).collect();
        assert_eq!(tables_after, tables_before);
    }

    #[test]
    fn test_link_removal_clears_endpoint_vectors() {
        let (mut plane, mut engine) = triangle();
        engine.run_update(&mut plane);
        let event = LinkEvent {
            change: LinkChange::Removed,
            link: crate::ofproto::Link {
                dpid1: Dpid(2),
                port1: PortNo(3),
                dpid2: Dpid(3),
                port2: PortNo(3),
            },
        };
        plane.graph_mut().apply_link_event(&event);
        engine.on_link_event(&mut plane, &event);
        assert!(engine.dvs[&Dpid(2)].is_empty());
        assert!(engine.dvs[&Dpid(3)].is_empty());
        assert!(!engine.dvs[&Dpid(1)].is_empty());

        // relaxation still reconverges over the remaining edges
        engine.run_update(&mut plane);
        let m3 = dpid_to_mac(Dpid(3));
        assert_eq!(engine.dvs[&Dpid(2)][&m3], 2);
        assert_eq!(plane.table(Dpid(2)).unwrap().get(m3), Some(PortNo(2)));
    }
}
