//! Subcircuits solved by partial decomposition.
//!
//! A [`Subsystem`] owns a private solver for its internal variables. The
//! variables it shares with the enclosing circuit are moved to the end of the
//! local system and left unfactored; after eliminating the internal block the
//! remaining Schur complement is added to the parent's matrix like any other
//! stamp. Once the parent has solved, the subsystem reads the shared values
//! back and back-substitutes for its internal variables.
//!
//! A [`SubsystemGroup`] prepares several subsystems in parallel.

use log::debug;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::circuit::{VariableId, VariableKind, VariableSet};
use crate::error::{NodalError, Result};
use crate::sparse::{ElementId, VectorId};

use super::lu::SparseSolver;
use super::newton::{IterationMode, IterationState};
use super::preorder::preorder_mna;
use super::simulator::ParallelConfig;
use super::stamp::{
    Analysis, Behavior, BindContext, ConvergenceContext, LoadContext, MatrixLocation, TimeStep,
};

/// A group of behaviors with its own solver.
pub struct Subsystem {
    name: String,
    solver: SparseSolver,
    variables: VariableSet,
    behaviors: Vec<Box<dyn Behavior>>,
    /// (local name, parent name)
    bridges: Vec<(String, String)>,
    /// (local, parent) pairs resolved by bind
    shared: Vec<(VariableId, VariableId)>,
    elements: Vec<(ElementId, ElementId)>,
    rhs: Vec<(VariableId, VectorId)>,
    solution: Vec<f64>,
    old_solution: Vec<f64>,
    reltol: f64,
    vntol: f64,
    abstol: f64,
    is_preordered: bool,
    /// Outcome of the local convergence test after the last solve
    is_locally_convergent: bool,
}

impl Subsystem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            solver: SparseSolver::new(),
            variables: VariableSet::new(),
            behaviors: Vec::new(),
            bridges: Vec::new(),
            shared: Vec::new(),
            elements: Vec::new(),
            rhs: Vec::new(),
            solution: vec![0.0],
            old_solution: vec![0.0],
            reltol: 1e-3,
            vntol: 1e-6,
            abstol: 1e-12,
            is_preordered: false,
            is_locally_convergent: true,
        }
    }

    /// Tolerances of the internal convergence test.
    pub fn with_tolerances(mut self, reltol: f64, vntol: f64, abstol: f64) -> Self {
        self.reltol = reltol;
        self.vntol = vntol;
        self.abstol = abstol;
        self
    }

    /// Add a behavior to the subsystem. Node names are local.
    pub fn add(&mut self, behavior: impl Behavior + 'static) -> &mut Self {
        self.behaviors.push(Box::new(behavior));
        self
    }

    /// Connect local node `local` to node `parent` of the enclosing circuit.
    pub fn bridge(&mut self, local: &str, parent: &str) -> &mut Self {
        self.bridges.push((local.to_string(), parent.to_string()));
        self
    }

    /// Value of a local variable after the last solve.
    pub fn local_value(&self, name: &str) -> Option<f64> {
        let id = self.variables.find(name)?;
        self.solution.get(id.index()).copied()
    }

    /// Local variables.
    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    /// Number of variables shared with the parent.
    pub fn shared_count(&self) -> usize {
        self.shared.len()
    }

    /// Copy the shared values from the parent, load the local behaviors and
    /// eliminate the internal block.
    ///
    /// Returns whether the local behaviors consider the iteration convergent.
    fn prepare(
        &mut self,
        parent_solution: &[f64],
        state: IterationState,
        analysis: Analysis,
    ) -> Result<bool> {
        self.import_shared(parent_solution);
        let mut convergent = self.load_locals(state, analysis)?;

        if !self.is_preordered {
            self.solver.precondition(|ctx| preorder_mna(ctx));
            self.is_preordered = true;
        }
        if state.mode == IterationMode::Junction {
            self.solver.request_reordering();
        }

        if !self.solver.needs_reordering() && !self.solver.factor() {
            // The failed attempt already modified the matrix
            debug!("subsystem '{}': pivot became too small, reordering", self.name);
            convergent &= self.load_locals(state, analysis)?;
        }
        if !self.solver.is_factored() {
            let eliminated = self.solver.order_and_factor();
            if eliminated < self.solver.order() {
                let variable = self
                    .solver
                    .singular_row()
                    .map_or("?", |row| self.variables.name(VariableId(row)));
                return Err(NodalError::SingularMatrix {
                    variable: format!("{}/{}", self.name, variable),
                    step: eliminated + 1,
                });
            }
        }

        self.solver.forward_reduce()?;
        Ok(convergent)
    }

    /// Add the Schur complement to the parent's system.
    fn merge(&self, parent: &mut SparseSolver) {
        for &(local, target) in &self.elements {
            parent.add(target, self.solver.value(local));
        }
        for &(local, target) in &self.rhs {
            let location = MatrixLocation::new(local.index(), local.index());
            let row = self.solver.external_to_internal(location).row;
            parent.add_rhs(target, self.solver.reduced_rhs(row));
        }
    }

    /// Solve for the internal variables given the parent's solution.
    fn solve_local(&mut self, parent_solution: &[f64]) -> Result<()> {
        std::mem::swap(&mut self.solution, &mut self.old_solution);
        self.import_shared(parent_solution);
        self.solver.solve(&mut self.solution)?;
        self.solution[0] = 0.0;
        self.old_solution[0] = 0.0;

        for behavior in &mut self.behaviors {
            behavior.update(&self.solution)?;
        }
        self.is_locally_convergent = self.check_convergence()?;
        Ok(())
    }

    fn import_shared(&mut self, parent_solution: &[f64]) {
        for &(local, parent) in &self.shared {
            self.solution[local.index()] = parent_solution.get(parent.index()).copied().unwrap_or(0.0);
        }
    }

    fn load_locals(&mut self, state: IterationState, analysis: Analysis) -> Result<bool> {
        self.solver.reset();
        let mut convergent = true;
        for behavior in &mut self.behaviors {
            let mut ctx = LoadContext::new(
                &mut self.solver,
                &self.solution,
                state,
                analysis,
                &mut convergent,
            );
            behavior.load(&mut ctx)?;
        }
        Ok(convergent)
    }

    /// Compare the internal variables with their previous values.
    fn check_convergence(&self) -> Result<bool> {
        for variable in self.variables.iter() {
            if self.shared.iter().any(|&(local, _)| local == variable.id) {
                continue;
            }
            let index = variable.id.index();
            let (new, old) = (self.solution[index], self.old_solution[index]);
            if new.is_nan() {
                return Err(NodalError::NotANumber {
                    variable: format!("{}/{}", self.name, variable.name),
                });
            }
            let floor = match variable.kind {
                VariableKind::Voltage => self.vntol,
                VariableKind::Current => self.abstol,
            };
            if (new - old).abs() > self.reltol * new.abs().max(old.abs()) + floor {
                debug!("subsystem '{}': '{}' still moving", self.name, variable.name);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Behavior for Subsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        for behavior in &mut self.behaviors {
            let mut local = BindContext::new(&mut self.solver, &mut self.variables);
            behavior.bind(&mut local)?;
        }

        self.shared.clear();
        for (local, parent) in &self.bridges {
            let local_id = self.variables.require(local)?;
            let grounded = ctx.variables.find(parent).is_some_and(|id| id.is_ground());
            if local_id.is_ground() || grounded {
                return Err(NodalError::InvalidTopology {
                    message: format!(
                        "subsystem '{}' bridges '{local}' to '{parent}' through ground",
                        self.name
                    ),
                });
            }
            self.shared.push((local_id, ctx.node(parent)));
        }

        let size = self.variables.len();
        self.solver.resize(size);

        self.elements.clear();
        self.rhs.clear();
        for &(local_row, parent_row) in &self.shared {
            for &(local_column, parent_column) in &self.shared {
                let local = self.solver.get_element(local_row.index(), local_column.index());
                self.elements.push((local, ctx.element(parent_row, parent_column)));
            }
            self.solver.get_rhs_element(local_row.index());
            self.rhs.push((local_row, ctx.rhs(parent_row)));
        }

        // Park the shared variables in the trailing block
        let shared: Vec<_> = self.shared.iter().map(|&(local, _)| local).collect();
        self.solver.precondition(|ctx| {
            let mut target = size;
            for variable in &shared {
                let location = MatrixLocation::new(variable.index(), variable.index());
                let internal = ctx.external_to_internal(location);
                ctx.swap_rows(internal.row, target);
                ctx.swap_columns(internal.column, target);
                target -= 1;
            }
        });
        self.solver.set_degeneracy(shared.len());
        self.solver.set_pivot_search_reduction(shared.len());

        self.solution = vec![0.0; size + 1];
        self.old_solution = vec![0.0; size + 1];
        self.is_preordered = false;
        debug!(
            "subsystem '{}': {} local variables, {} shared",
            self.name,
            size,
            shared.len()
        );
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let convergent = self.prepare(ctx.solution, ctx.state, ctx.analysis)?;
        self.merge(ctx.solver);
        if !convergent || !self.is_locally_convergent {
            ctx.flag_nonconvergent();
        }
        Ok(())
    }

    fn is_nonlinear(&self) -> bool {
        self.behaviors.iter().any(|b| b.is_nonlinear())
    }

    fn is_convergent(&self, ctx: &ConvergenceContext<'_>) -> bool {
        let local = ConvergenceContext {
            solution: &self.solution,
            old_solution: &self.old_solution,
            ..*ctx
        };
        self.behaviors.iter().all(|b| b.is_convergent(&local))
    }

    fn update(&mut self, solution: &[f64]) -> Result<()> {
        self.solve_local(solution)
    }

    fn accept(&mut self, _solution: &[f64], step: &TimeStep) {
        for behavior in &mut self.behaviors {
            behavior.accept(&self.solution, step);
        }
    }
}

/// Subsystems that are prepared and solved side by side.
pub struct SubsystemGroup {
    name: String,
    subsystems: Vec<Subsystem>,
    parallel: ParallelConfig,
}

impl SubsystemGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subsystems: Vec::new(),
            parallel: ParallelConfig::default(),
        }
    }

    /// Set when the group spreads its work over threads.
    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn add(&mut self, subsystem: Subsystem) -> &mut Self {
        self.subsystems.push(subsystem);
        self
    }

    pub fn subsystems(&self) -> &[Subsystem] {
        &self.subsystems
    }

    fn use_parallel(&self) -> bool {
        #[cfg(feature = "parallel")]
        {
            self.subsystems.len() >= self.parallel.min_subsystems_for_parallel
                && rayon::current_num_threads() > 1
        }
        #[cfg(not(feature = "parallel"))]
        {
            let _ = self.parallel;
            false
        }
    }

    /// Run `f` on every subsystem, in parallel when worthwhile.
    fn for_each<T, F>(&mut self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&mut Subsystem) -> Result<T> + Send + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            if self.use_parallel() {
                return self.subsystems.par_iter_mut().map(f).collect();
            }
        }
        self.subsystems.iter_mut().map(f).collect()
    }
}

impl Behavior for SubsystemGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        for subsystem in &mut self.subsystems {
            subsystem.bind(ctx)?;
        }
        if self.use_parallel() {
            debug!(
                "group '{}': {} subsystems on {} threads",
                self.name,
                self.subsystems.len(),
                rayon_threads()
            );
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let (solution, state, analysis) = (ctx.solution, ctx.state, ctx.analysis);
        let convergent = self.for_each(|s| s.prepare(solution, state, analysis))?;

        for subsystem in &self.subsystems {
            subsystem.merge(ctx.solver);
        }
        let settled = self.subsystems.iter().all(|s| s.is_locally_convergent);
        if !settled || convergent.contains(&false) {
            ctx.flag_nonconvergent();
        }
        Ok(())
    }

    fn is_nonlinear(&self) -> bool {
        self.subsystems.iter().any(|s| s.is_nonlinear())
    }

    fn is_convergent(&self, ctx: &ConvergenceContext<'_>) -> bool {
        self.subsystems.iter().all(|s| s.is_convergent(ctx))
    }

    fn update(&mut self, solution: &[f64]) -> Result<()> {
        self.for_each(|s| s.solve_local(solution))?;
        Ok(())
    }

    fn accept(&mut self, solution: &[f64], step: &TimeStep) {
        for subsystem in &mut self.subsystems {
            subsystem.accept(solution, step);
        }
    }
}

#[cfg(feature = "parallel")]
fn rayon_threads() -> usize {
    rayon::current_num_threads()
}

#[cfg(not(feature = "parallel"))]
fn rayon_threads() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::components::{Diode, Resistor, VoltageSource};
    use crate::solver::{BiasingConfig, Simulator};
    use approx::assert_relative_eq;

    fn divider_subsystem() -> Subsystem {
        let mut sub = Subsystem::new("S1");
        sub.add(Resistor::new("R2", "x", "mid", 500.0))
            .add(Resistor::new("R3", "mid", "0", 500.0))
            .bridge("x", "out");
        sub
    }

    #[test]
    fn test_split_divider() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 1.0));
        circuit.add(Resistor::new("R1", "in", "out", 1000.0));
        circuit.add(divider_subsystem());

        let mut sim = Simulator::new(circuit, BiasingConfig::default()).unwrap();
        sim.operating_point().unwrap();
        assert_relative_eq!(sim.voltage("out").unwrap(), 0.5, epsilon = 1e-9);
        assert_relative_eq!(sim.voltage("in").unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_internal_node_solved_locally() {
        let mut solver = SparseSolver::new();
        let mut variables = VariableSet::new();
        let mut v1 = VoltageSource::new("V1", "in", "0", 1.0);
        let mut r1 = Resistor::new("R1", "in", "out", 1000.0);
        let mut sub = divider_subsystem();

        let mut behaviors: Vec<&mut dyn Behavior> = vec![&mut v1, &mut r1, &mut sub];
        for behavior in behaviors.iter_mut() {
            let mut ctx = BindContext::new(&mut solver, &mut variables);
            behavior.bind(&mut ctx).unwrap();
        }
        // The internal node stays out of the parent
        assert!(variables.find("mid").is_none());
        solver.resize(variables.len());

        let mut solution = vec![0.0; variables.len() + 1];
        let mut convergent = true;
        for behavior in behaviors.iter_mut() {
            let mut ctx = LoadContext::new(
                &mut solver,
                &solution,
                IterationState::default(),
                Analysis::Dc,
                &mut convergent,
            );
            behavior.load(&mut ctx).unwrap();
        }
        solver.precondition(|ctx| preorder_mna(ctx));
        assert_eq!(solver.order_and_factor(), solver.size());
        solver.solve(&mut solution).unwrap();
        for behavior in behaviors.iter_mut() {
            behavior.update(&solution).unwrap();
        }
        drop(behaviors);

        let out = variables.find("out").unwrap();
        assert_relative_eq!(solution[out.index()], 0.5, epsilon = 1e-12);
        assert_relative_eq!(sub.local_value("mid").unwrap(), 0.25, epsilon = 1e-12);
        assert_relative_eq!(sub.local_value("x").unwrap(), 0.5, epsilon = 1e-12);
        assert_eq!(sub.shared_count(), 1);
    }

    #[test]
    fn test_nonlinear_subsystem_matches_flat_circuit() {
        let mut flat = Circuit::new();
        flat.add(VoltageSource::new("V1", "in", "0", 1.0));
        flat.add(Resistor::new("R1", "in", "out", 1000.0));
        flat.add(Diode::new("D1", "out", "0"));
        let mut expected = Simulator::new(flat, BiasingConfig::default()).unwrap();
        expected.operating_point().unwrap();

        let mut split = Circuit::new();
        split.add(VoltageSource::new("V1", "in", "0", 1.0));
        split.add(Resistor::new("R1", "in", "out", 1000.0));
        let mut sub = Subsystem::new("S1");
        sub.add(Diode::new("D1", "a", "0")).bridge("a", "out");
        split.add(sub);
        let mut sim = Simulator::new(split, BiasingConfig::default()).unwrap();
        sim.operating_point().unwrap();

        assert_relative_eq!(
            sim.voltage("out").unwrap(),
            expected.voltage("out").unwrap(),
            epsilon = 1e-4
        );
    }

    fn ladder_with_group(min_subsystems_for_parallel: usize) -> Simulator {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 1.0));
        circuit.add(Resistor::new("R1", "in", "a", 1000.0));
        circuit.add(Resistor::new("R2", "a", "b", 1000.0));
        circuit.add(Resistor::new("R3", "b", "c", 1000.0));

        let mut group = SubsystemGroup::new("G1").with_parallel(ParallelConfig {
            min_subsystems_for_parallel,
        });
        for (i, (node, r)) in [("a", 2000.0), ("b", 2000.0), ("c", 1000.0)].iter().enumerate() {
            let mut sub = Subsystem::new(&format!("S{i}"));
            sub.add(Resistor::new("R", "p", "q", r / 2.0))
                .add(Resistor::new("Rq", "q", "0", r / 2.0))
                .bridge("p", node);
            group.add(sub);
        }
        circuit.add(group);

        let mut sim = Simulator::new(circuit, BiasingConfig::default()).unwrap();
        sim.operating_point().unwrap();
        sim
    }

    #[test]
    fn test_group_parallel_matches_sequential() {
        let parallel = ladder_with_group(1);
        let sequential = ladder_with_group(usize::MAX);
        for node in ["a", "b", "c"] {
            assert_relative_eq!(
                parallel.voltage(node).unwrap(),
                sequential.voltage(node).unwrap(),
                epsilon = 1e-12
            );
        }
        // c sees 1k to ground, b sees 2k || 2k, a sees 2k || 2k
        assert_relative_eq!(sequential.voltage("c").unwrap(), 0.125, epsilon = 1e-9);
        assert_relative_eq!(sequential.voltage("b").unwrap(), 0.25, epsilon = 1e-9);
        assert_relative_eq!(sequential.voltage("a").unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_bridge_through_ground_is_rejected() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", "in", "0", 1.0));
        circuit.add(Resistor::new("R1", "in", "0", 1000.0));
        let mut sub = Subsystem::new("S1");
        sub.add(Resistor::new("R2", "x", "0", 1000.0)).bridge("x", "0");
        circuit.add(sub);

        let result = Simulator::new(circuit, BiasingConfig::default());
        assert!(matches!(result, Err(NodalError::InvalidTopology { .. })));
    }
}
