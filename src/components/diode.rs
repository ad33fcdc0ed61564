//! Diode model.
//!
//! Uses the Shockley diode equation:
//!   I = Is * (exp(V / (n * Vt)) - 1)
//!
//! For Newton-Raphson iteration, we linearize around the current operating point:
//!   I ≈ I0 + G_d * (V - V0)
//!
//! where G_d = dI/dV = Is/(n*Vt) * exp(V0/(n*Vt))

use crate::circuit::VariableId;
use crate::error::{NodalError, Result};
use crate::solver::{
    Behavior, BindContext, ConvergenceContext, ElementSet, IterationMode, LoadContext,
};
use crate::THERMAL_VOLTAGE;

/// Parameters for a diode model.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeParams {
    /// Saturation current (Is), typically 1e-14 to 1e-12 A
    pub is: f64,
    /// Ideality factor (n), typically 1.0 to 2.0
    pub n: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self { is: 1e-14, n: 1.0 }
    }
}

impl DiodeParams {
    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * THERMAL_VOLTAGE
    }

    /// Voltage above which the exponential is limited between iterations.
    pub fn v_crit(&self) -> f64 {
        let n_vt = self.n_vt();
        n_vt * (n_vt / (std::f64::consts::SQRT_2 * self.is)).ln()
    }
}

/// A diode component.
#[derive(Debug, Clone)]
pub struct Diode {
    name: String,
    nodes: [String; 2], // [anode, cathode]
    pub params: DiodeParams,
    variables: [VariableId; 2],
    elements: ElementSet,
    /// Junction voltage of the last load
    pub v_op: f64,
    /// Current at the last load, gmin shunt included
    i_op: f64,
    /// Conductance at the last load, gmin shunt included
    g_op: f64,
}

impl Diode {
    /// Create a silicon diode with default parameters.
    pub fn new(name: &str, anode: &str, cathode: &str) -> Self {
        Self::with_params(name, anode, cathode, DiodeParams::default())
    }

    /// Create a new diode.
    pub fn with_params(name: &str, anode: &str, cathode: &str, params: DiodeParams) -> Self {
        Self {
            name: name.to_string(),
            nodes: [anode.to_string(), cathode.to_string()],
            params,
            variables: [VariableId::GROUND; 2],
            elements: ElementSet::default(),
            v_op: 0.0,
            i_op: 0.0,
            g_op: 0.0,
        }
    }

    /// Calculate the diode current at a given voltage.
    pub fn current(&self, v: f64) -> f64 {
        self.params.is * ((v / self.params.n_vt()).exp() - 1.0)
    }

    /// Calculate the conductance (dI/dV) at a given voltage.
    pub fn conductance(&self, v: f64) -> f64 {
        let n_vt = self.params.n_vt();
        self.params.is / n_vt * (v / n_vt).exp()
    }

    /// Limit the junction voltage step between iterations.
    ///
    /// Above the critical voltage the new value is pulled back onto a
    /// logarithmic path so that the exponential cannot blow up. Returns the
    /// limited voltage and whether limiting was applied.
    pub fn limit_voltage_step(&self, v_old: f64, v_new: f64) -> (f64, bool) {
        let n_vt = self.params.n_vt();
        let v_crit = self.params.v_crit();
        if v_new <= v_crit || (v_new - v_old).abs() <= 2.0 * n_vt {
            return (v_new, false);
        }
        if v_old > 0.0 {
            let arg = 1.0 + (v_new - v_old) / n_vt;
            if arg > 0.0 {
                (v_old + n_vt * arg.ln(), true)
            } else {
                (v_crit, true)
            }
        } else {
            (n_vt * (v_new / n_vt).ln(), true)
        }
    }
}

impl Behavior for Diode {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        let a = ctx.node(&self.nodes[0]);
        let c = ctx.node(&self.nodes[1]);
        self.variables = [a, c];
        self.elements = ctx.element_set(&[(a, a), (a, c), (c, a), (c, c)], &[a, c]);
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let [a, c] = self.variables;
        let v = if ctx.state.mode == IterationMode::Junction {
            self.params.v_crit()
        } else {
            let (v, limited) = self.limit_voltage_step(self.v_op, ctx.value(a) - ctx.value(c));
            if limited {
                ctx.flag_nonconvergent();
            }
            v
        };

        let gmin = ctx.state.gmin;
        let i = self.current(v) + gmin * v;
        let g = self.conductance(v) + gmin;
        if !i.is_finite() || !g.is_finite() {
            return Err(NodalError::device(
                &self.name,
                format!("junction current is not finite at {v} V"),
            ));
        }

        // I = G * V + I_eq
        let i_eq = i - g * v;
        self.elements.add(ctx.solver, &[g, -g, -g, g, -i_eq, i_eq]);
        self.v_op = v;
        self.i_op = i;
        self.g_op = g;
        Ok(())
    }

    fn is_nonlinear(&self) -> bool {
        true
    }

    fn is_convergent(&self, ctx: &ConvergenceContext<'_>) -> bool {
        let [a, c] = self.variables;
        let v = ctx.solution[a.index()] - ctx.solution[c.index()];
        let predicted = self.i_op + self.g_op * (v - self.v_op);
        let tolerance = ctx.reltol * predicted.abs().max(self.i_op.abs()) + ctx.abstol;
        (predicted - self.i_op).abs() <= tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_diode_forward_bias() {
        let d = Diode::new("D1", "a", "0");

        // At 0V, current should be approximately 0
        assert!(d.current(0.0).abs() < 1e-10);

        // At forward bias, current should increase exponentially
        let i_small = d.current(0.3);
        let i_large = d.current(0.6);
        assert!(i_large > i_small * 100.0);
    }

    #[test]
    fn test_diode_reverse_bias() {
        let d = Diode::new("D1", "a", "0");

        // In reverse bias, current should approach -Is
        let i_rev = d.current(-1.0);
        assert!(i_rev < 0.0);
        assert!(i_rev > -2.0 * d.params.is);
    }

    #[test]
    fn test_critical_voltage() {
        let params = DiodeParams::default();
        // n*Vt * ln(n*Vt / (sqrt(2) * Is)) for Is = 1e-14
        assert_relative_eq!(params.v_crit(), 0.0258 * (0.0258 / (2f64.sqrt() * 1e-14)).ln());
        assert!(params.v_crit() > 0.6 && params.v_crit() < 0.8);
    }

    #[test]
    fn test_limiting_only_above_critical_voltage() {
        let d = Diode::new("D1", "a", "0");
        assert_eq!(d.limit_voltage_step(0.0, 0.5), (0.5, false));

        let (v, limited) = d.limit_voltage_step(0.7, 5.0);
        assert!(limited);
        assert!(v > 0.7 && v < 1.0, "limited to {v}");

        let (v, limited) = d.limit_voltage_step(-1.0, 3.0);
        assert!(limited);
        assert_relative_eq!(v, 0.0258 * (3.0f64 / 0.0258).ln());
    }
}
