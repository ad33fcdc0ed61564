//! Nodal - operating point solver for small demonstration networks.
//!
//! # Usage
//!
//! ```bash
//! nodal ladder --stages 20 --reltol 1e-4
//! nodal diode --nodeset a=0.7
//! ```

use clap::{Parser, Subcommand};
use nodal_core::{
    components::{Diode, Resistor, VoltageSource},
    error::Result,
    solver::Subsystem,
    BiasingConfig, Circuit, Simulator,
};

/// Sparse MNA operating point solver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    network: Network,

    /// Relative convergence tolerance
    #[arg(long, global = true)]
    reltol: Option<f64>,

    /// Junction shunt conductance in siemens
    #[arg(long, global = true)]
    gmin: Option<f64>,

    /// Decades covered by gmin stepping (0 or 1 disables it)
    #[arg(long, global = true)]
    gmin_steps: Option<usize>,

    /// Source stepping increments (0 or 1 disables it)
    #[arg(long, global = true)]
    source_steps: Option<usize>,

    /// Iteration limit of each operating point attempt
    #[arg(long, global = true)]
    max_iterations: Option<usize>,

    /// Initial guess for a variable, as NAME=VALUE (repeatable)
    #[arg(long, global = true, value_parser = parse_nodeset)]
    nodeset: Vec<(String, f64)>,
}

/// Built-in demonstration networks
#[derive(Subcommand, Debug)]
enum Network {
    /// 1 V source across two 1 kOhm resistors
    Divider,
    /// 5 V source feeding a diode through 1 kOhm
    Diode,
    /// Resistor ladder: 1 kOhm series and 2 kOhm shunt per stage
    Ladder {
        #[arg(long, default_value_t = 10)]
        stages: usize,
    },
    /// The divider with its lower half solved as a subsystem
    Split,
}

fn parse_nodeset(s: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn build(network: &Network) -> Circuit {
    let mut circuit = Circuit::new();
    match network {
        Network::Divider => {
            circuit
                .add(VoltageSource::new("V1", "in", "0", 1.0))
                .add(Resistor::new("R1", "in", "out", 1e3))
                .add(Resistor::new("R2", "out", "0", 1e3));
        }
        Network::Diode => {
            circuit
                .add(VoltageSource::new("V1", "in", "0", 5.0))
                .add(Resistor::new("R1", "in", "a", 1e3))
                .add(Diode::new("D1", "a", "0"));
        }
        Network::Ladder { stages } => {
            circuit.add(VoltageSource::new("V1", "n0", "0", 1.0));
            for k in 1..=*stages {
                let (from, to) = (format!("n{}", k - 1), format!("n{k}"));
                circuit
                    .add(Resistor::new(&format!("RS{k}"), &from, &to, 1e3))
                    .add(Resistor::new(&format!("RP{k}"), &to, "0", 2e3));
            }
        }
        Network::Split => {
            let mut lower = Subsystem::new("S1");
            lower
                .add(Resistor::new("R2", "top", "0", 1e3))
                .bridge("top", "out");
            circuit
                .add(VoltageSource::new("V1", "in", "0", 1.0))
                .add(Resistor::new("R1", "in", "out", 1e3))
                .add(lower);
        }
    }
    circuit
}

fn config(args: &Args) -> BiasingConfig {
    let mut config = BiasingConfig::default();
    if let Some(reltol) = args.reltol {
        config = config.with_reltol(reltol);
    }
    if let Some(gmin) = args.gmin {
        config = config.with_gmin(gmin);
    }
    if let Some(steps) = args.gmin_steps {
        config = config.with_gmin_steps(steps);
    }
    if let Some(steps) = args.source_steps {
        config = config.with_source_steps(steps);
    }
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max);
    }
    for (name, value) in &args.nodeset {
        config = config.with_nodeset(name.clone(), *value);
    }
    config
}

fn main() -> Result<()> {
    let args = Args::parse();

    let circuit = build(&args.network);
    let mut simulator = Simulator::new(circuit, config(&args))?;
    let op = simulator.operating_point()?;

    let newton = simulator.newton();
    for variable in newton.variables().iter() {
        let value = op.solution[variable.id.index()];
        println!("{:>12}  {:>14.6e}", variable.name, value);
    }

    let stats = simulator.statistics();
    println!(
        "# {} iterations, {} reorders, {} fill-ins",
        op.iterations,
        stats.reorders,
        newton.solver().fillins()
    );

    Ok(())
}
