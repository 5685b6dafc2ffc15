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

//! # Routing engines
//!
//! This module contains the trait definition for [`RoutingEngine`], which the
//! [`Controller`](crate::controller::Controller) dispatches to, along with the three
//! implementations. One engine is active at a time; all of them recompute lazily, on the first
//! packet-in after the topology changed (the `graph_updated` dirty flag), so a burst of link
//! events costs a single recomputation.
//!
//! - **[`DijkstraEngine`]**: runs single-source shortest paths from every switch over the unit
//!   cost topology, unwinds the predecessor edges into next-hop ports and rewrites every
//!   forwarding table. Deterministic, and optimal on every recomputation.
//!
//! - **[`DistanceVectorEngine`]**: keeps one distance vector per switch and relaxes them
//!   Bellman-Ford style until a full pass changes nothing (capped at 1000 passes). Only
//!   switches whose vector changed get their table rewritten. The vectors of both endpoints
//!   are dropped when a link vanishes, so stale distances cannot survive a partition.
//!
//! - **[`AcoEngine`]**: an ant-colony swarm. Ants walk the graph guided by per-edge pheromone,
//!   deposit on the paths they took, and the iteration stops once the largest per-edge
//!   pheromone change falls below a threshold (or the iteration cap is hit). The cheapest
//!   observed path per node pair is materialized into the forwarding tables, in both
//!   directions. Stochastic, but fully reproducible through its injected random generator.

mod aco;
mod dijkstra;
mod dv;

pub use aco::{AcoEngine, AcoParams};
pub use dijkstra::DijkstraEngine;
pub use dv::DistanceVectorEngine;

use crate::controller::ControlPlane;
use crate::ofproto::{Dpid, Fabric, LinkEvent, PacketIn, PacketKind, PacketMeta};

/// The capability set shared by all routing engines. The controller shell calls these hooks at
/// fixed points of its event pipeline; every hook has a no-op default, so an engine only
/// implements the ones it cares about.
pub trait RoutingEngine<F: Fabric> {
    /// Called after a switch connected, its graph node is registered and its (empty)
    /// forwarding table exists.
    fn on_connection_up(&mut self, _plane: &mut ControlPlane<F>, _dpid: Dpid) {}

    /// Called after a link event has been applied to the graph and the flood domain and stale
    /// rules have been taken care of.
    fn on_link_event(&mut self, _plane: &mut ControlPlane<F>, _event: &LinkEvent) {}

    /// Called before any routing decision is made for a punted packet. This is where the lazy
    /// recomputation happens. Return `false` to swallow the packet and skip the rest of the
    /// pipeline.
    fn on_packet_in_prerouting(
        &mut self,
        _plane: &mut ControlPlane<F>,
        _meta: &PacketMeta,
        _kind: PacketKind,
    ) -> bool {
        true
    }

    /// Called after the packet has been answered, forwarded or flooded.
    fn on_packet_in_postrouting(&mut self, _plane: &mut ControlPlane<F>, _event: &PacketIn) {}
}
