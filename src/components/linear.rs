//! Linear passive components: Resistor, Capacitor, Inductor.

use crate::circuit::VariableId;
use crate::error::{NodalError, Result};
use crate::solver::{Analysis, Behavior, BindContext, ElementSet, LoadContext, TimeStep};

/// A resistor between two nodes.
#[derive(Debug, Clone)]
pub struct Resistor {
    name: String,
    nodes: [String; 2],
    /// Resistance in ohms
    pub resistance: f64,
    elements: ElementSet,
}

impl Resistor {
    /// Create a new resistor. Zero or non-finite resistance is rejected when
    /// the resistor is bound.
    pub fn new(name: &str, positive: &str, negative: &str, resistance: f64) -> Self {
        Self {
            name: name.to_string(),
            nodes: [positive.to_string(), negative.to_string()],
            resistance,
            elements: ElementSet::default(),
        }
    }

    /// Get the conductance (1/R).
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }
}

impl Behavior for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        if self.resistance == 0.0 || !self.resistance.is_finite() {
            return Err(NodalError::invalid_config(format!(
                "resistor '{}' has resistance {}",
                self.name, self.resistance
            )));
        }
        let a = ctx.node(&self.nodes[0]);
        let b = ctx.node(&self.nodes[1]);
        self.elements = ctx.element_set(&[(a, a), (a, b), (b, a), (b, b)], &[]);
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let g = self.conductance();
        self.elements.add(ctx.solver, &[g, -g, -g, g]);
        Ok(())
    }
}

/// A capacitor.
///
/// Open at DC. In a transient analysis the trapezoidal rule turns it into
/// a conductance `G = 2C/dt` in parallel with a history current
/// `I = G * v(n-1) + i(n-1)`.
#[derive(Debug, Clone)]
pub struct Capacitor {
    name: String,
    nodes: [String; 2],
    /// Capacitance in farads
    pub capacitance: f64,
    variables: [VariableId; 2],
    elements: ElementSet,

    // State for discrete-time model
    /// Previous voltage across capacitor
    pub v_prev: f64,
    /// Previous current through capacitor
    pub i_prev: f64,
}

impl Capacitor {
    /// Create a new capacitor.
    pub fn new(name: &str, positive: &str, negative: &str, capacitance: f64) -> Self {
        Self {
            name: name.to_string(),
            nodes: [positive.to_string(), negative.to_string()],
            capacitance,
            variables: [VariableId::GROUND; 2],
            elements: ElementSet::default(),
            v_prev: 0.0,
            i_prev: 0.0,
        }
    }

    /// Equivalent conductance of the companion model.
    pub fn conductance(&self, dt: f64) -> f64 {
        2.0 * self.capacitance / dt
    }

    /// History current of the companion model, flowing into the positive
    /// node.
    pub fn history_current(&self, dt: f64) -> f64 {
        self.conductance(dt) * self.v_prev + self.i_prev
    }

    /// Advance the state to a new accepted voltage.
    pub fn update_state(&mut self, v_new: f64, dt: f64) {
        let g = self.conductance(dt);
        let i_new = g * (v_new - self.v_prev) - self.i_prev;
        self.v_prev = v_new;
        self.i_prev = i_new;
    }
}

impl Behavior for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        let a = ctx.node(&self.nodes[0]);
        let b = ctx.node(&self.nodes[1]);
        self.variables = [a, b];
        self.elements = ctx.element_set(&[(a, a), (a, b), (b, a), (b, b)], &[a, b]);
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        if let Analysis::Transient(step) = ctx.analysis {
            let g = self.conductance(step.dt);
            let i = self.history_current(step.dt);
            self.elements.add(ctx.solver, &[g, -g, -g, g, i, -i]);
        }
        Ok(())
    }

    fn accept(&mut self, solution: &[f64], step: &TimeStep) {
        let [a, b] = self.variables;
        let v = solution[a.index()] - solution[b.index()];
        if step.time == 0.0 {
            self.v_prev = v;
            self.i_prev = 0.0;
        } else {
            self.update_state(v, step.dt);
        }
    }
}

/// An inductor.
///
/// Carries its own branch current variable. A short at DC; in a transient
/// analysis the trapezoidal rule gives `v = R * i - V` with `R = 2L/dt`
/// and `V = R * i(n-1) + v(n-1)`.
#[derive(Debug, Clone)]
pub struct Inductor {
    name: String,
    nodes: [String; 2],
    /// Inductance in henries
    pub inductance: f64,
    variables: [VariableId; 2],
    branch: VariableId,
    elements: ElementSet,

    // State for discrete-time model
    /// Previous current through inductor
    pub i_prev: f64,
    /// Previous voltage across inductor
    pub v_prev: f64,
}

impl Inductor {
    /// Create a new inductor.
    pub fn new(name: &str, positive: &str, negative: &str, inductance: f64) -> Self {
        Self {
            name: name.to_string(),
            nodes: [positive.to_string(), negative.to_string()],
            inductance,
            variables: [VariableId::GROUND; 2],
            branch: VariableId::GROUND,
            elements: ElementSet::default(),
            i_prev: 0.0,
            v_prev: 0.0,
        }
    }

    /// Branch current variable, valid after binding.
    pub fn branch(&self) -> VariableId {
        self.branch
    }

    /// Equivalent resistance of the companion model.
    pub fn resistance(&self, dt: f64) -> f64 {
        2.0 * self.inductance / dt
    }

    /// Equivalent voltage of the companion model.
    pub fn voltage_source(&self, dt: f64) -> f64 {
        self.resistance(dt) * self.i_prev + self.v_prev
    }

    /// Advance the state to a new accepted current.
    pub fn update_state(&mut self, i_new: f64, dt: f64) {
        let r = self.resistance(dt);
        let v_new = r * (i_new - self.i_prev) - self.v_prev;
        self.i_prev = i_new;
        self.v_prev = v_new;
    }
}

impl Behavior for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        let a = ctx.node(&self.nodes[0]);
        let b = ctx.node(&self.nodes[1]);
        let br = ctx.branch(&self.name)?;
        self.variables = [a, b];
        self.branch = br;
        self.elements = ctx.element_set(&[(a, br), (b, br), (br, a), (br, b), (br, br)], &[br]);
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let (r, v) = match ctx.analysis {
            Analysis::Dc => (0.0, 0.0),
            Analysis::Transient(step) => (self.resistance(step.dt), self.voltage_source(step.dt)),
        };
        self.elements.add(ctx.solver, &[1.0, -1.0, 1.0, -1.0, -r, -v]);
        Ok(())
    }

    fn accept(&mut self, solution: &[f64], step: &TimeStep) {
        let i = solution[self.branch.index()];
        if step.time == 0.0 {
            let [a, b] = self.variables;
            self.i_prev = i;
            self.v_prev = solution[a.index()] - solution[b.index()];
        } else {
            self.update_state(i, step.dt);
        }
    }
}
