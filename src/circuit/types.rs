//! Unknowns of the MNA system.

use std::collections::HashMap;
use std::fmt;

use crate::error::{NodalError, Result};

/// Index of an unknown in the solution vector.
/// Index 0 is always ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub usize);

impl VariableId {
    /// The ground reference (always index 0).
    pub const GROUND: VariableId = VariableId(0);

    /// Check if this is the ground reference.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }

    /// Position in the solution vector and row/column in the matrix.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<VariableId> for usize {
    fn from(id: VariableId) -> usize {
        id.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "V{}", self.0)
        }
    }
}

/// What an unknown measures. Decides which absolute tolerance applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// Node voltage
    Voltage,
    /// Branch current (voltage sources, inductors)
    Current,
}

/// A named unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: VariableId,
    pub kind: VariableKind,
    pub name: String,
}

/// All unknowns of one system, in creation order.
///
/// Variables are only ever added. The names "0" and "gnd" refer to ground.
#[derive(Debug, Clone)]
pub struct VariableSet {
    variables: Vec<Variable>,
    by_name: HashMap<String, VariableId>,
}

impl Default for VariableSet {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableSet {
    /// Create a set holding only ground.
    pub fn new() -> Self {
        let ground = Variable {
            id: VariableId::GROUND,
            kind: VariableKind::Voltage,
            name: "0".to_string(),
        };
        let mut by_name = HashMap::new();
        by_name.insert("0".to_string(), VariableId::GROUND);
        Self {
            variables: vec![ground],
            by_name,
        }
    }

    /// Get or create the voltage variable of a node.
    pub fn node(&mut self, name: &str) -> VariableId {
        if let Some(id) = self.find(name) {
            return id;
        }
        self.push(name, VariableKind::Voltage)
    }

    /// Create a branch current variable. Branch names must be unique.
    pub fn branch(&mut self, name: &str) -> Result<VariableId> {
        if self.find(name).is_some() {
            return Err(NodalError::DuplicateComponent {
                name: name.to_string(),
            });
        }
        Ok(self.push(name, VariableKind::Current))
    }

    /// Look up a variable by name.
    pub fn find(&self, name: &str) -> Option<VariableId> {
        if is_ground_name(name) {
            return Some(VariableId::GROUND);
        }
        self.by_name.get(name).copied()
    }

    /// Look up a variable by name, failing if it does not exist.
    pub fn require(&self, name: &str) -> Result<VariableId> {
        self.find(name).ok_or_else(|| NodalError::UnknownVariable {
            name: name.to_string(),
        })
    }

    /// Get a variable by index.
    pub fn get(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.0)
    }

    /// Name of a variable, `"?"` if the index is out of range.
    pub fn name(&self, id: VariableId) -> &str {
        self.get(id).map_or("?", |v| v.name.as_str())
    }

    /// Number of unknowns, ground excluded.
    pub fn len(&self) -> usize {
        self.variables.len() - 1
    }

    /// True if only ground exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all unknowns, ground excluded.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().skip(1)
    }

    fn push(&mut self, name: &str, kind: VariableKind) -> VariableId {
        let id = VariableId(self.variables.len());
        self.variables.push(Variable {
            id,
            kind,
            name: name.to_string(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }
}

fn is_ground_name(name: &str) -> bool {
    name == "0" || name.eq_ignore_ascii_case("gnd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_are_shared_by_name() {
        let mut vars = VariableSet::new();
        let a = vars.node("in");
        let b = vars.node("out");
        assert_eq!(vars.node("in"), a);
        assert_eq!(a, VariableId(1));
        assert_eq!(b, VariableId(2));
        assert_eq!(vars.node("GND"), VariableId::GROUND);
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_branches_are_unique() {
        let mut vars = VariableSet::new();
        let br = vars.branch("V1#branch").unwrap();
        assert_eq!(vars.get(br).map(|v| v.kind), Some(VariableKind::Current));
        assert!(matches!(
            vars.branch("V1#branch"),
            Err(NodalError::DuplicateComponent { .. })
        ));
        assert!(matches!(
            vars.require("missing"),
            Err(NodalError::UnknownVariable { .. })
        ));
    }
}
