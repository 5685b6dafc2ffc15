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

#![deny(missing_docs)]

//! # Swarmnet: a routing control plane for software-defined ad-hoc networks
//!
//! This is a logically centralized controller for a network of OpenFlow-style switches whose
//! links come and go. It learns the topology from link-discovery events, computes per-switch
//! `MAC -> port` forwarding tables with one of several routing engines, and installs the
//! results as flow rules. The controller also answers ARP on behalf of the hosts (exploiting a
//! synthetic address scheme), learns the MACs of directly attached hosts, and floods frames
//! for destinations it does not know yet, so the switches need no distributed routing protocol
//! of their own.
//!
//! ## Structure
//!
//! - **[`ofproto`]**: the southbound interface: events, messages, and the
//!   [`Fabric`](ofproto::Fabric) trait connecting the controller to the switches. The OpenFlow
//!   wire dialect itself is an external collaborator; packets arrive here already parsed.
//!
//! - **[`addr`]**: the synthetic MAC scheme shared by switches and hosts, which lets the
//!   controller answer any ARP request without flooding.
//!
//! - **[`graph`]**: the topology graph maintained from link events, with per-directed-edge
//!   ports, costs, and the pheromone field used by the ant-colony engine.
//!
//! - **[`table`]**: the per-switch forwarding table, a `MAC -> port` map with a reverse index
//!   for invalidation when a port goes down.
//!
//! - **[`controller`]**: the single-writer event core: packet-in pipeline, ARP proxy, MAC
//!   learning, flow installation, flood fallback, and link-teardown cleanup.
//!
//! - **[`engine`]**: the pluggable routing engines: shortest path
//!   ([`DijkstraEngine`](engine::DijkstraEngine)), distance vector
//!   ([`DistanceVectorEngine`](engine::DistanceVectorEngine)), and ant colony
//!   ([`AcoEngine`](engine::AcoEngine)). All of them recompute lazily, on the first packet-in
//!   after the topology changed.
//!
//! - **[`testbed`]**: an in-process fabric with an emulated data plane, used by the tests and
//!   by the churn harness binary.
//!
//! ## Example
//!
//! ```rust
//! use swarmnet::controller::Controller;
//! use swarmnet::engine::DijkstraEngine;
//! use swarmnet::ofproto::{ConnectionUp, Dpid, PortNo};
//! use swarmnet::testbed::{self, TestFabric};
//!
//! // two switches, each with a host, connected by one link
//! let mut fabric = TestFabric::new();
//! fabric.add_switch_with_host(Dpid(1), 2);
//! fabric.add_switch_with_host(Dpid(2), 2);
//! fabric.wire(Dpid(1), PortNo(2), Dpid(2), PortNo(2));
//!
//! let mut ctrl = Controller::new(fabric, DijkstraEngine::new());
//! ctrl.handle_connection_up(&ConnectionUp { dpid: Dpid(1) });
//! ctrl.handle_connection_up(&ConnectionUp { dpid: Dpid(2) });
//! testbed::bring_link_up(&mut ctrl, Dpid(1), PortNo(2), Dpid(2), PortNo(2));
//!
//! assert!(testbed::ping(&mut ctrl, Dpid(1), Dpid(2)));
//! ```

// test modules
mod test;

pub mod addr;
pub mod controller;
pub mod engine;
mod error;
pub mod graph;
pub mod ofproto;
pub mod table;
pub mod testbed;

pub use error::ControllerError;
