//! Voltage and current sources.
//!
//! Both are scaled by the source factor of the iteration state, which source
//! stepping ramps from 0 to 1.

use crate::circuit::VariableId;
use crate::error::Result;
use crate::solver::{Analysis, Behavior, BindContext, ElementSet, LoadContext, MatrixLocation};

/// An independent voltage source.
///
/// Adds a branch current variable. The source enforces `V+ - V- = value`.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    name: String,
    nodes: [String; 2], // [positive, negative]
    pub dc_value: f64,
    /// Value for every time point after zero, if it differs from DC
    pub step_value: Option<f64>,
    branch: VariableId,
    elements: ElementSet,
}

impl VoltageSource {
    /// Create a new DC voltage source.
    pub fn new(name: &str, positive: &str, negative: &str, dc_value: f64) -> Self {
        Self {
            name: name.to_string(),
            nodes: [positive.to_string(), negative.to_string()],
            dc_value,
            step_value: None,
            branch: VariableId::GROUND,
            elements: ElementSet::default(),
        }
    }

    /// A source that jumps from `initial` to `final_value` right after time zero.
    pub fn step(name: &str, positive: &str, negative: &str, initial: f64, final_value: f64) -> Self {
        Self {
            step_value: Some(final_value),
            ..Self::new(name, positive, negative, initial)
        }
    }

    /// Branch current variable, valid after binding.
    pub fn branch(&self) -> VariableId {
        self.branch
    }

    /// Value of the source for an analysis, before source factor scaling.
    pub fn voltage(&self, analysis: Analysis) -> f64 {
        match (analysis, self.step_value) {
            (Analysis::Transient(step), Some(value)) if step.time > 0.0 => value,
            _ => self.dc_value,
        }
    }
}

impl Behavior for VoltageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        let p = ctx.node(&self.nodes[0]);
        let n = ctx.node(&self.nodes[1]);
        let br = ctx.branch(&self.name)?;
        self.branch = br;
        self.elements = ctx.element_set(&[(p, br), (n, br), (br, p), (br, n)], &[br]);
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let value = self.voltage(ctx.analysis) * ctx.state.source_factor;
        self.elements.add(ctx.solver, &[1.0, -1.0, 1.0, -1.0, value]);
        Ok(())
    }
}

/// An independent current source.
///
/// The current flows from the positive node through the source into the
/// negative node.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    name: String,
    nodes: [String; 2],
    pub dc_value: f64,
    elements: ElementSet,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(name: &str, positive: &str, negative: &str, dc_value: f64) -> Self {
        Self {
            name: name.to_string(),
            nodes: [positive.to_string(), negative.to_string()],
            dc_value,
            elements: ElementSet::default(),
        }
    }
}

impl Behavior for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, ctx: &mut BindContext<'_>) -> Result<()> {
        let p = ctx.node(&self.nodes[0]);
        let n = ctx.node(&self.nodes[1]);
        self.elements = ctx.element_set::<MatrixLocation>(&[], &[p, n]);
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let value = self.dc_value * ctx.state.source_factor;
        self.elements.add(ctx.solver, &[-value, value]);
        Ok(())
    }
}
