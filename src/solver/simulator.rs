//! Main simulator interface.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::circuit::{validate_circuit, Circuit, VariableId};
use crate::error::{NodalError, Result};

use super::markowitz::PivotConfig;
use super::newton::{BiasingStatistics, IterationMode, NewtonRaphson};
use super::stamp::{Analysis, TimeStep};
use super::{DEFAULT_GMIN, DEFAULT_MAX_ITERATIONS};

/// Configuration for operating point and transient iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasingConfig {
    /// Relative tolerance on every variable.
    pub reltol: f64,
    /// Absolute tolerance on node voltages (volts).
    pub vntol: f64,
    /// Absolute tolerance on branch currents (amperes).
    pub abstol: f64,
    /// Maximum Newton-Raphson iterations for an operating point.
    pub max_iterations: usize,
    /// Maximum Newton-Raphson iterations for one transient time point.
    pub transient_max_iterations: usize,
    /// Conductance shunted across junctions.
    pub gmin: f64,
    /// Decades of gmin stepping. Values of 1 or less disable it.
    pub gmin_steps: usize,
    /// Steps of source stepping. Values of 1 or less disable it.
    pub source_steps: usize,
    /// Initial guesses by variable name, enforced in the first iterations.
    pub nodesets: BTreeMap<String, f64>,
    /// Go straight to the convergence aids.
    pub skip_plain_iteration: bool,
    /// Pivot thresholds of the solver.
    pub pivot: PivotConfig,
}

impl Default for BiasingConfig {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            vntol: 1e-6,
            abstol: 1e-12,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            transient_max_iterations: 10,
            gmin: DEFAULT_GMIN,
            gmin_steps: 10,
            source_steps: 10,
            nodesets: BTreeMap::new(),
            skip_plain_iteration: false,
            pivot: PivotConfig::default(),
        }
    }
}

impl BiasingConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relative tolerance.
    pub fn with_reltol(mut self, reltol: f64) -> Self {
        self.reltol = reltol;
        self
    }

    /// Set the absolute voltage tolerance.
    pub fn with_vntol(mut self, vntol: f64) -> Self {
        self.vntol = vntol;
        self
    }

    /// Set the absolute current tolerance.
    pub fn with_abstol(mut self, abstol: f64) -> Self {
        self.abstol = abstol;
        self
    }

    /// Set the maximum Newton-Raphson iterations for an operating point.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the maximum Newton-Raphson iterations per transient point.
    pub fn with_transient_max_iterations(mut self, max_iterations: usize) -> Self {
        self.transient_max_iterations = max_iterations;
        self
    }

    /// Set the junction shunt conductance.
    pub fn with_gmin(mut self, gmin: f64) -> Self {
        self.gmin = gmin;
        self
    }

    /// Set the number of gmin steps.
    pub fn with_gmin_steps(mut self, steps: usize) -> Self {
        self.gmin_steps = steps;
        self
    }

    /// Set the number of source steps.
    pub fn with_source_steps(mut self, steps: usize) -> Self {
        self.source_steps = steps;
        self
    }

    /// Add an initial guess for a variable.
    pub fn with_nodeset(mut self, name: impl Into<String>, value: f64) -> Self {
        self.nodesets.insert(name.into(), value);
        self
    }

    /// Skip plain iteration and start with the convergence aids.
    pub fn with_skip_plain_iteration(mut self, skip: bool) -> Self {
        self.skip_plain_iteration = skip;
        self
    }

    /// Set the pivot thresholds.
    pub fn with_pivot(mut self, pivot: PivotConfig) -> Self {
        self.pivot = pivot;
        self
    }

    /// Check every parameter against its allowed range.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("reltol", self.reltol),
            ("vntol", self.vntol),
            ("abstol", self.abstol),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(NodalError::invalid_config(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        if self.max_iterations == 0 || self.transient_max_iterations == 0 {
            return Err(NodalError::invalid_config(
                "iteration limits must be at least 1",
            ));
        }
        if !(self.gmin >= 0.0) || !self.gmin.is_finite() {
            return Err(NodalError::invalid_config(format!(
                "gmin must be non-negative, got {}",
                self.gmin
            )));
        }
        let relative = self.pivot.relative_threshold;
        if !(relative > 0.0 && relative <= 1.0) {
            return Err(NodalError::invalid_config(format!(
                "relative pivot threshold must be in (0, 1], got {relative}"
            )));
        }
        if !(self.pivot.absolute_threshold >= 0.0) {
            return Err(NodalError::invalid_config(format!(
                "absolute pivot threshold must be non-negative, got {}",
                self.pivot.absolute_threshold
            )));
        }
        Ok(())
    }
}

/// Controls when subsystem groups load in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Smallest group that is worth spreading over threads.
    pub min_subsystems_for_parallel: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            min_subsystems_for_parallel: 2,
        }
    }
}

/// Result of an operating point analysis.
#[derive(Debug, Clone)]
pub struct OperatingPoint {
    /// Solution indexed by variable, ground at index 0.
    pub solution: Vec<f64>,
    /// Newton-Raphson iterations used, convergence aids included.
    pub iterations: usize,
}

/// One accepted point of a transient analysis.
#[derive(Debug, Clone)]
pub struct TransientPoint {
    pub time: f64,
    pub solution: Vec<f64>,
}

/// The main circuit simulator.
pub struct Simulator {
    newton: NewtonRaphson,
}

impl Simulator {
    /// Validate `circuit` and bind it for simulation.
    pub fn new(circuit: Circuit, config: BiasingConfig) -> Result<Self> {
        validate_circuit(&circuit)?;
        let newton = NewtonRaphson::setup(circuit, config)?;
        Ok(Self { newton })
    }

    /// Compute the DC operating point.
    pub fn operating_point(&mut self) -> Result<OperatingPoint> {
        let before = self.newton.statistics().iterations;
        self.newton.op()?;
        let iterations = self.newton.statistics().iterations - before;
        info!("operating point reached in {iterations} iterations");
        Ok(OperatingPoint {
            solution: self.newton.solution().to_vec(),
            iterations,
        })
    }

    /// Run a fixed-step transient analysis from the operating point.
    ///
    /// Returns every accepted point, time zero included. A point that does
    /// not converge ends the analysis with an error.
    pub fn transient(&mut self, step: f64, stop: f64) -> Result<Vec<TransientPoint>> {
        if !(step > 0.0) || !step.is_finite() {
            return Err(NodalError::invalid_config(format!(
                "time step must be positive, got {step}"
            )));
        }
        if !(stop >= step) {
            return Err(NodalError::invalid_config(format!(
                "stop time {stop} is shorter than the step {step}"
            )));
        }

        self.newton.op()?;
        self.newton.accept(&TimeStep { dt: step, time: 0.0 });
        let mut points = vec![TransientPoint {
            time: 0.0,
            solution: self.newton.solution().to_vec(),
        }];

        let max_iterations = self.newton.config().transient_max_iterations;
        let count = (stop / step).round() as usize;
        for n in 1..=count {
            let time_step = TimeStep {
                dt: step,
                time: n as f64 * step,
            };
            self.newton.set_analysis(Analysis::Transient(time_step));
            self.newton.set_mode(IterationMode::Float);
            if !self.newton.iterate(max_iterations)? {
                let variable = self
                    .newton
                    .problem_variable()
                    .map(|id| self.newton.variables().name(id).to_string());
                debug!("time point {} failed to converge", time_step.time);
                return Err(NodalError::non_convergence(variable, max_iterations));
            }
            self.newton.accept(&time_step);
            points.push(TransientPoint {
                time: time_step.time,
                solution: self.newton.solution().to_vec(),
            });
        }

        self.newton.set_analysis(Analysis::Dc);
        Ok(points)
    }

    /// Voltage or current of a variable by name, from the last solution.
    pub fn voltage(&self, name: &str) -> Option<f64> {
        let id = self.newton.variables().find(name)?;
        self.value(id)
    }

    /// Value of a variable from the last solution.
    pub fn value(&self, id: VariableId) -> Option<f64> {
        self.newton.solution().get(id.index()).copied()
    }

    /// The last solution, indexed by variable.
    pub fn solution(&self) -> &[f64] {
        self.newton.solution()
    }

    /// Get a reference to the Newton-Raphson controller.
    pub fn newton(&self) -> &NewtonRaphson {
        &self.newton
    }

    pub fn statistics(&self) -> &BiasingStatistics {
        self.newton.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Capacitor, CurrentSource, Inductor, Resistor, VoltageSource};
    use approx::assert_relative_eq;

    #[test]
    fn test_config_defaults_are_valid() {
        let config = BiasingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 100);
        assert_relative_eq!(config.gmin, 1e-12);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad = [
            BiasingConfig::default().with_reltol(0.0),
            BiasingConfig::default().with_vntol(f64::NAN),
            BiasingConfig::default().with_max_iterations(0),
            BiasingConfig::default().with_gmin(-1.0),
            BiasingConfig::default().with_pivot(PivotConfig {
                relative_threshold: 1.5,
                ..PivotConfig::default()
            }),
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(NodalError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn test_operating_point_by_name() {
        let mut circuit = Circuit::new();
        circuit.add(CurrentSource::new("I1", "0", "a", 1e-3));
        circuit.add(Resistor::new("R1", "a", "0", 2e3));
        let mut sim = Simulator::new(circuit, BiasingConfig::default()).unwrap();
        let op = sim.operating_point().unwrap();

        assert_relative_eq!(sim.voltage("a").unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(op.iterations, 2);
        assert!(sim.voltage("nowhere").is_none());
    }

    #[test]
    fn test_empty_circuit_is_rejected() {
        assert!(matches!(
            Simulator::new(Circuit::new(), BiasingConfig::default()),
            Err(NodalError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_rc_charging() {
        // 1 V step into 1 kOhm and 1 uF, tau = 1 ms
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::step("V1", "in", "0", 0.0, 1.0));
        circuit.add(Resistor::new("R1", "in", "out", 1e3));
        circuit.add(Capacitor::new("C1", "out", "0", 1e-6));
        let mut sim = Simulator::new(circuit, BiasingConfig::default()).unwrap();

        let (dt, tau) = (1e-5, 1e-3);
        let points = sim.transient(dt, 1e-3).unwrap();
        assert_eq!(points.len(), 101);
        let out = sim.newton().variables().find("out").unwrap().index();
        assert_relative_eq!(points[0].solution[out], 0.0);

        // The trapezoidal rule sees the step as a ramp over the first step,
        // which delays the response by half a step
        for point in &points[1..] {
            let expected = 1.0 - (-(point.time - dt / 2.0) / tau).exp();
            assert_relative_eq!(point.solution[out], expected, epsilon = 1e-4);
        }
        let last = points[100].solution[out];
        assert!((last - (1.0 - (-1.0f64).exp())).abs() < 3e-3, "v(1ms) = {last}");
    }

    #[test]
    fn test_lc_tank_holds_equilibrium() {
        // 1 mA into a tank whose inductor shorts it at DC: all of the current
        // runs through the inductor and nothing is left to oscillate
        let mut circuit = Circuit::new();
        circuit.add(CurrentSource::new("I1", "0", "a", 1e-3));
        circuit.add(Inductor::new("L1", "a", "0", 1e-3));
        circuit.add(Capacitor::new("C1", "a", "0", 1e-6));
        let mut sim = Simulator::new(circuit, BiasingConfig::default()).unwrap();
        let points = sim.transient(1e-6, 1e-4).unwrap();

        let branch = sim.newton().variables().find("L1#branch").unwrap().index();
        let a = sim.newton().variables().find("a").unwrap().index();
        for point in &points {
            assert_relative_eq!(point.solution[branch], 1e-3, epsilon = 1e-9);
            assert!(point.solution[a].abs() < 1e-9);
        }
    }

    #[test]
    fn test_transient_rejects_bad_step() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", "a", "0", 1.0));
        let mut sim = Simulator::new(circuit, BiasingConfig::default()).unwrap();
        assert!(sim.transient(0.0, 1.0).is_err());
        assert!(sim.transient(1.0, 0.5).is_err());
    }
}
