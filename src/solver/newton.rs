//! Newton-Raphson iteration with convergence aids.
//!
//! One iteration loads every behavior into the solver, factors (reordering
//! when needed), solves, and compares the new solution with the previous one.
//! [`NewtonRaphson::op`] escalates through gmin stepping, diagonal gmin
//! stepping and source stepping when plain iteration fails.

use log::{debug, info, warn};

use crate::circuit::{Circuit, VariableId, VariableKind, VariableSet};
use crate::error::{NodalError, Result};
use crate::sparse::VectorId;

use super::lu::SparseSolver;
use super::preorder::{apply_diagonal_gmin, preorder_mna};
use super::simulator::BiasingConfig;
use super::stamp::{Analysis, Behavior, BindContext, ConvergenceContext, LoadContext, TimeStep};

/// Diagonal value used to force a nodeset row.
const NODESET_CONDUCTANCE: f64 = 1e10;

/// Initialization mode of the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationMode {
    /// No special initialization, used for linear networks
    None,
    /// Junctions start at their critical voltage
    Junction,
    /// Hold the solution for one more confirming iteration
    Fix,
    /// Regular iteration
    #[default]
    Float,
}

impl IterationMode {
    /// The mode of the next iteration, given whether this one converged.
    pub fn next(self, converged: bool) -> Self {
        match self {
            IterationMode::None => IterationMode::Float,
            IterationMode::Junction => IterationMode::Fix,
            IterationMode::Fix if converged => IterationMode::Float,
            IterationMode::Fix => IterationMode::Fix,
            IterationMode::Float => IterationMode::Float,
        }
    }
}

/// Per-iteration state visible to behaviors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationState {
    pub mode: IterationMode,
    /// Scale of independent sources, in [0, 1]
    pub source_factor: f64,
    /// Conductance shunted across junctions
    pub gmin: f64,
    pub is_convergent: bool,
}

impl Default for IterationState {
    fn default() -> Self {
        Self {
            mode: IterationMode::Float,
            source_factor: 1.0,
            gmin: 1e-12,
            is_convergent: false,
        }
    }
}

/// A strategy tried while looking for an operating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStrategy {
    Plain,
    GminStepping,
    DiagonalGminStepping,
    SourceStepping,
}

/// Counters accumulated over the lifetime of the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BiasingStatistics {
    /// Newton-Raphson iterations
    pub iterations: usize,
    /// Calls to order-and-factor
    pub reorders: usize,
    /// Calls to factor with a reused ordering
    pub factorizations: usize,
    pub solves: usize,
    /// Strategies attempted by operating point searches, in order
    pub strategies: Vec<ConvergenceStrategy>,
}

/// Pulls one variable toward a target value in the early iterations.
#[derive(Debug, Clone)]
struct ConvergenceAid {
    variable: VariableId,
    value: f64,
    rhs: VectorId,
}

impl ConvergenceAid {
    fn new(solver: &mut SparseSolver, variable: VariableId, value: f64) -> Self {
        let row = variable.index();
        solver.get_element(row, row);
        let rhs = solver.get_rhs_element(row);
        Self {
            variable,
            value,
            rhs,
        }
    }

    /// Replace the row of the variable by `C * x = C * value`.
    fn apply(&self, solver: &mut SparseSolver) {
        let row = self.variable.index();
        let internal = solver.external_to_internal((row, row).into());
        let (rhs, target) = (self.rhs, NODESET_CONDUCTANCE * self.value);
        solver.precondition(|ctx| {
            let elements: Vec<_> = ctx.matrix().row_elements(internal.row).collect();
            for id in elements {
                let value = if ctx.matrix().column(id) == internal.column {
                    NODESET_CONDUCTANCE
                } else {
                    0.0
                };
                ctx.set(id, value);
            }
            ctx.set_rhs(rhs, target);
        });
    }
}

/// Newton-Raphson controller.
///
/// Owns the behaviors, the variables, the solver and both solution vectors.
pub struct NewtonRaphson {
    config: BiasingConfig,
    solver: SparseSolver,
    variables: VariableSet,
    behaviors: Vec<Box<dyn Behavior>>,
    solution: Vec<f64>,
    old_solution: Vec<f64>,
    nodesets: Vec<ConvergenceAid>,
    state: IterationState,
    analysis: Analysis,
    diagonal_gmin: f64,
    is_preordered: bool,
    should_reorder: bool,
    problem_variable: Option<VariableId>,
    statistics: BiasingStatistics,
}

impl NewtonRaphson {
    /// Bind every behavior of `circuit` and size the solution vectors.
    ///
    /// Nodesets naming an unknown variable are skipped with a warning.
    pub fn setup(circuit: Circuit, config: BiasingConfig) -> Result<Self> {
        config.validate()?;
        let (mut variables, mut behaviors) = circuit.into_parts();
        let mut solver = SparseSolver::with_config(config.pivot.clone());

        for behavior in &mut behaviors {
            let mut ctx = BindContext::new(&mut solver, &mut variables);
            behavior.bind(&mut ctx)?;
        }
        solver.resize(variables.len());

        let mut nodesets = Vec::new();
        for (name, value) in &config.nodesets {
            match variables.find(name) {
                Some(id) if !id.is_ground() => {
                    nodesets.push(ConvergenceAid::new(&mut solver, id, *value));
                }
                _ => warn!("nodeset '{name}' does not name a variable, ignored"),
            }
        }

        let size = solver.size().max(variables.len()) + 1;
        let state = IterationState {
            gmin: config.gmin,
            ..IterationState::default()
        };
        debug!(
            "bound {} behaviors over {} variables",
            behaviors.len(),
            variables.len()
        );

        Ok(Self {
            config,
            solver,
            variables,
            behaviors,
            solution: vec![0.0; size],
            old_solution: vec![0.0; size],
            nodesets,
            state,
            analysis: Analysis::Dc,
            diagonal_gmin: 0.0,
            is_preordered: false,
            should_reorder: true,
            problem_variable: None,
            statistics: BiasingStatistics::default(),
        })
    }

    /// Find the operating point.
    ///
    /// Tries plain iteration, then gmin stepping, diagonal gmin stepping and
    /// source stepping, in that order.
    pub fn op(&mut self) -> Result<()> {
        let max = self.config.max_iterations;
        self.analysis = Analysis::Dc;
        self.state.source_factor = 1.0;
        self.state.gmin = self.config.gmin;
        self.state.mode = self.initial_mode();

        if !self.config.skip_plain_iteration {
            self.statistics.strategies.push(ConvergenceStrategy::Plain);
            if self.iterate(max)? {
                info!("operating point found by plain iteration");
                return Ok(());
            }
        }

        let gmin_steps = self.config.gmin_steps;
        if gmin_steps > 1 {
            self.statistics.strategies.push(ConvergenceStrategy::GminStepping);
            if self.gmin_stepping(max, gmin_steps)? {
                info!("operating point found by gmin stepping");
                return Ok(());
            }

            self.statistics
                .strategies
                .push(ConvergenceStrategy::DiagonalGminStepping);
            if self.diagonal_gmin_stepping(max, gmin_steps)? {
                info!("operating point found by diagonal gmin stepping");
                return Ok(());
            }
        }

        let source_steps = self.config.source_steps;
        if source_steps > 1 {
            self.statistics.strategies.push(ConvergenceStrategy::SourceStepping);
            if self.source_stepping(max, source_steps)? {
                info!("operating point found by source stepping");
                return Ok(());
            }
        }

        Err(NodalError::non_convergence(
            self.problem_variable_name().map(str::to_string),
            self.statistics.iterations,
        ))
    }

    /// Iterate until convergence or until `max_iterations` is exceeded.
    ///
    /// Returns `Ok(false)` on non-convergence and when the matrix turns out
    /// singular; behavior failures and NaN solutions are errors.
    pub fn iterate(&mut self, max_iterations: usize) -> Result<bool> {
        let mut iterno = 0;
        let result = self.iterate_counted(max_iterations, &mut iterno);
        self.statistics.iterations += iterno;
        result
    }

    fn iterate_counted(&mut self, max_iterations: usize, iterno: &mut usize) -> Result<bool> {
        let mut pass = false;

        loop {
            self.load()?;
            *iterno += 1;

            if !self.is_preordered {
                self.solver.precondition(|ctx| preorder_mna(ctx));
                self.is_preordered = true;
            }
            if self.state.mode == IterationMode::Junction {
                self.should_reorder = true;
            }

            if self.should_reorder {
                self.statistics.reorders += 1;
                let eliminated = self.solver.order_and_factor();
                if eliminated < self.solver.size() {
                    self.problem_variable = self.solver.singular_row().map(VariableId);
                    warn!(
                        "singular matrix at elimination step {} (variable '{}')",
                        eliminated + 1,
                        self.problem_variable_name().unwrap_or("?")
                    );
                    return Ok(false);
                }
                self.should_reorder = false;
            } else {
                self.statistics.factorizations += 1;
                if !self.solver.factor() {
                    debug!("pivot became too small, reordering");
                    self.should_reorder = true;
                    continue;
                }
            }

            std::mem::swap(&mut self.solution, &mut self.old_solution);
            self.solver.solve(&mut self.solution)?;
            self.statistics.solves += 1;

            self.solution[0] = 0.0;
            self.old_solution[0] = 0.0;

            for behavior in &mut self.behaviors {
                behavior.update(&self.solution)?;
            }

            if *iterno > max_iterations {
                return Ok(false);
            }

            self.state.is_convergent = if self.state.is_convergent && *iterno != 1 {
                self.is_convergent()?
            } else {
                false
            };

            let mode = self.state.mode;
            match mode {
                IterationMode::Float => {
                    if !self.nodesets.is_empty() {
                        if pass {
                            self.state.is_convergent = false;
                        }
                        pass = false;
                    }
                    if self.state.is_convergent {
                        return Ok(true);
                    }
                }
                IterationMode::Junction => self.should_reorder = true,
                IterationMode::Fix => pass = true,
                IterationMode::None => {}
            }
            self.state.mode = mode.next(self.state.is_convergent);
            if self.state.mode != mode {
                debug!("iteration {iterno}: {mode:?} -> {:?}", self.state.mode);
            }
        }
    }

    /// Reset the solver and load every behavior, then the nodesets and the
    /// diagonal gmin.
    fn load(&mut self) -> Result<()> {
        self.solver.reset();
        let mut convergent = true;
        for behavior in &mut self.behaviors {
            let mut ctx = LoadContext::new(
                &mut self.solver,
                &self.solution,
                self.state,
                self.analysis,
                &mut convergent,
            );
            behavior.load(&mut ctx)?;
        }
        self.state.is_convergent = convergent;

        if matches!(self.state.mode, IterationMode::Junction | IterationMode::Fix) {
            for aid in &self.nodesets {
                aid.apply(&mut self.solver);
            }
        }

        if self.diagonal_gmin > 0.0 {
            let gmin = self.diagonal_gmin;
            self.solver.precondition(|ctx| apply_diagonal_gmin(ctx, gmin));
        }
        Ok(())
    }

    /// Compare the new solution against the previous one.
    fn is_convergent(&mut self) -> Result<bool> {
        let reltol = self.config.reltol;
        for variable in self.variables.iter() {
            let index = variable.id.index();
            let new = self.solution[index];
            let old = self.old_solution[index];
            if new.is_nan() {
                return Err(NodalError::NotANumber {
                    variable: variable.name.clone(),
                });
            }
            let floor = match variable.kind {
                VariableKind::Voltage => self.config.vntol,
                VariableKind::Current => self.config.abstol,
            };
            let tolerance = reltol * new.abs().max(old.abs()) + floor;
            if (new - old).abs() > tolerance {
                self.problem_variable = Some(variable.id);
                return Ok(false);
            }
        }

        let ctx = ConvergenceContext {
            solution: &self.solution,
            old_solution: &self.old_solution,
            reltol,
            vntol: self.config.vntol,
            abstol: self.config.abstol,
        };
        for behavior in &self.behaviors {
            if !behavior.is_convergent(&ctx) {
                // Only the shared flag set while loading decides
                debug!("'{}' reports non-convergence", behavior.name());
                break;
            }
        }
        Ok(true)
    }

    fn gmin_stepping(&mut self, max_iterations: usize, steps: usize) -> Result<bool> {
        warn!("starting gmin stepping");
        self.solution.fill(0.0);

        let original = self.state.gmin;
        let start = if original <= 0.0 { 1e-12 } else { original };
        self.state.gmin = start * 10f64.powi(steps as i32);

        self.state.mode = IterationMode::Junction;
        for _ in 0..=steps {
            if !self.iterate(max_iterations)? {
                warn!("gmin stepping failed at gmin = {:e}", self.state.gmin);
                break;
            }
            self.state.gmin /= 10.0;
            self.state.mode = IterationMode::Float;
        }

        self.state.gmin = original;
        self.iterate(max_iterations)
    }

    fn diagonal_gmin_stepping(&mut self, max_iterations: usize, steps: usize) -> Result<bool> {
        warn!("starting diagonal gmin stepping");
        self.solution.fill(0.0);

        self.diagonal_gmin = self.state.gmin.min(1e-12) * 10f64.powi(steps as i32);
        self.state.mode = IterationMode::Junction;
        for _ in 0..=steps {
            if !self.iterate(max_iterations)? {
                warn!("diagonal gmin stepping failed at gmin = {:e}", self.diagonal_gmin);
                break;
            }
            self.diagonal_gmin /= 10.0;
            self.state.mode = IterationMode::Float;
        }

        self.diagonal_gmin = 0.0;
        self.iterate(max_iterations)
    }

    fn source_stepping(&mut self, max_iterations: usize, steps: usize) -> Result<bool> {
        warn!("starting source stepping");
        self.solution.fill(0.0);

        self.state.mode = IterationMode::Junction;
        for i in 0..=steps {
            self.state.source_factor = i as f64 / steps as f64;
            if !self.iterate(max_iterations)? {
                warn!(
                    "source stepping failed at source factor {:.3}",
                    self.state.source_factor
                );
                self.state.source_factor = 1.0;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn initial_mode(&self) -> IterationMode {
        if !self.nodesets.is_empty() || self.behaviors.iter().any(|b| b.is_nonlinear()) {
            IterationMode::Junction
        } else {
            IterationMode::None
        }
    }

    /// Let every behavior accept the current solution as a time point.
    pub fn accept(&mut self, step: &TimeStep) {
        for behavior in &mut self.behaviors {
            behavior.accept(&self.solution, step);
        }
    }

    /// Switch between operating point and transient loading.
    pub fn set_analysis(&mut self, analysis: Analysis) {
        self.analysis = analysis;
    }

    /// Current analysis.
    pub fn analysis(&self) -> Analysis {
        self.analysis
    }

    /// Iteration state used by the next load.
    pub fn state(&self) -> &IterationState {
        &self.state
    }

    /// Override the iteration mode of the next iteration.
    pub fn set_mode(&mut self, mode: IterationMode) {
        self.state.mode = mode;
    }

    pub fn config(&self) -> &BiasingConfig {
        &self.config
    }

    /// Solution of the last iteration, indexed by variable.
    pub fn solution(&self) -> &[f64] {
        &self.solution
    }

    /// Solution of the iteration before.
    pub fn old_solution(&self) -> &[f64] {
        &self.old_solution
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn solver(&self) -> &SparseSolver {
        &self.solver
    }

    pub fn statistics(&self) -> &BiasingStatistics {
        &self.statistics
    }

    /// The variable that last prevented convergence.
    pub fn problem_variable(&self) -> Option<VariableId> {
        self.problem_variable
    }

    fn problem_variable_name(&self) -> Option<&str> {
        self.problem_variable.map(|id| self.variables.name(id))
    }
}
