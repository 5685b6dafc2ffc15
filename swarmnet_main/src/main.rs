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

//! Churn harness: runs one of the routing engines against an emulated ad-hoc network whose
//! optional links are dropped and re-added every timestep, measures all-pairs reachability by
//! pinging between the emulated hosts, and writes the per-pair results to a CSV file.

use swarmnet::controller::Controller;
use swarmnet::engine::{AcoEngine, AcoParams, DijkstraEngine, DistanceVectorEngine, RoutingEngine};
use swarmnet::ofproto::{ConnectionUp, Dpid, PortNo};
use swarmnet::testbed::{bring_link_up, ping, take_link_down, TestFabric};

use clap::{ArgEnum, Parser};
use log::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;

/// Emulate an ad-hoc network of switch+host pairs under link churn and collect per-pair ping
/// statistics for the chosen routing engine.
#[derive(Parser, Debug)]
#[clap(name = "swarmnet")]
struct CommandLineArguments {
    /// Routing engine to run
    #[clap(arg_enum, short = 'e', long, default_value = "dijkstra")]
    engine: EngineChoice,
    /// Number of link-churn timesteps
    #[clap(short = 't', long, default_value = "10")]
    timesteps: usize,
    /// Seed for reproducible runs
    #[clap(short = 's', long, default_value = "1")]
    seed: u64,
    /// Number of optional links brought up before the first timestep
    #[clap(long, default_value = "5")]
    starting_links: usize,
    /// Number of optional links dropped and re-added on every timestep
    #[clap(long, default_value = "5")]
    dynamic_links: usize,
    /// Number of switch+host pairs
    #[clap(short = 'c', long, default_value = "8")]
    host_count: u64,
    /// Basename of the CSV result file
    csv_basename: String,
}

#[derive(ArgEnum, Debug, Clone, Copy)]
enum EngineChoice {
    Dijkstra,
    DistanceVector,
    Aco,
}

/// One ping result row of the output CSV.
#[derive(Serialize, Debug)]
struct PingRecord {
    timestep: usize,
    batch: usize,
    src: String,
    dst: String,
    sent: u32,
    received: u32,
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let args = CommandLineArguments::parse();
    // the synthetic address scheme has a single host byte
    assert!(args.host_count < 256, "host count must stay below 256");

    match args.engine {
        EngineChoice::Dijkstra => run(DijkstraEngine::new(), &args),
        EngineChoice::DistanceVector => run(DistanceVectorEngine::new(), &args),
        EngineChoice::Aco => run(AcoEngine::new(AcoParams::default(), args.seed), &args),
    }
}

/// The port on switch `i` that leads to switch `j`, in a fully wired mesh where port 1 belongs
/// to the host.
fn port_towards(i: u64, j: u64) -> PortNo {
    let offset = if j > i { 1 } else { 0 };
    PortNo((2 + j - offset) as u16)
}

fn run<E: RoutingEngine<TestFabric>>(
    engine: E,
    args: &CommandLineArguments,
) -> Result<(), Box<dyn Error>> {
    let n = args.host_count;

    // every switch carries its host on port 1 and a cable to every other switch; which of the
    // cables are alive is decided by the churn schedule below
    let mut fabric = TestFabric::new();
    for i in 0..n {
        fabric.add_switch_with_host(Dpid(i), n as u16);
    }
    for i in 0..n {
        for j in (i + 1)..n {
            fabric.wire(Dpid(i), port_towards(i, j), Dpid(j), port_towards(j, i));
        }
    }

    let mut ctrl = Controller::new(fabric, engine);
    for i in 0..n {
        ctrl.handle_connection_up(&ConnectionUp { dpid: Dpid(i) });
    }

    // the backbone chain keeps every node routable; the remaining pairs form the optional pool
    let mut active: BTreeSet<(u64, u64)> = BTreeSet::new();
    let mut inactive: BTreeSet<(u64, u64)> = BTreeSet::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if j == i + 1 {
                link_up(&mut ctrl, (i, j));
            } else {
                inactive.insert((i, j));
            }
        }
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    for link in pick(&inactive, args.starting_links, &mut rng) {
        inactive.remove(&link);
        active.insert(link);
        link_up(&mut ctrl, link);
    }

    let csv_path = format!(
        "{}_s{}_t{}_h{}_sl{}_dl{}.csv",
        args.csv_basename, args.seed, args.timesteps, n, args.starting_links, args.dynamic_links
    );
    let mut writer = csv::Writer::from_path(&csv_path)?;

    for timestep in 0..args.timesteps {
        info!("============= timestep {} =============", timestep);
        let dropped = pick(&active, args.dynamic_links, &mut rng);
        info!("dropping links: {:?}", dropped);
        for link in dropped {
            active.remove(&link);
            inactive.insert(link);
            link_down(&mut ctrl, link);
        }
        let added = pick(&inactive, args.dynamic_links, &mut rng);
        info!("adding links: {:?}", added);
        for link in added {
            inactive.remove(&link);
            active.insert(link);
            link_up(&mut ctrl, link);
        }

        // two batches per step: the first one pays the recomputation and warms the rules, the
        // second one measures the settled network
        for batch in 0..2 {
            for src in 0..n {
                for dst in 0..n {
                    if src == dst {
                        continue;
                    }
                    let received = ping(&mut ctrl, Dpid(src), Dpid(dst));
                    writer.serialize(PingRecord {
                        timestep,
                        batch,
                        src: format!("h{}", src),
                        dst: format!("h{}", dst),
                        sent: 1,
                        received: received as u32,
                    })?;
                }
            }
        }
    }
    writer.flush()?;
    info!("results written to {}", csv_path);
    Ok(())
}

/// Sample `count` links from a pool (all of them if the pool is smaller).
fn pick(pool: &BTreeSet<(u64, u64)>, count: usize, rng: &mut StdRng) -> Vec<(u64, u64)> {
    let links: Vec<(u64, u64)> = pool.iter().copied().collect();
    links.choose_multiple(rng, count.min(links.len())).copied().collect()
}

fn link_up<E: RoutingEngine<TestFabric>>(ctrl: &mut Controller<TestFabric, E>, (i, j): (u64, u64)) {
    bring_link_up(ctrl, Dpid(i), port_towards(i, j), Dpid(j), port_towards(j, i));
}

fn link_down<E: RoutingEngine<TestFabric>>(
    ctrl: &mut Controller<TestFabric, E>,
    (i, j): (u64, u64),
) {
    take_link_down(ctrl, Dpid(i), port_towards(i, j), Dpid(j), port_towards(j, i));
}
