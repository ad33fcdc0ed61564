//! Circuit validation.

use std::collections::HashSet;

use crate::error::{NodalError, Result};

use super::Circuit;

/// Validate a circuit before binding.
///
/// Checks:
/// - The circuit has at least one behavior
/// - No two behaviors share a name
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.is_empty() {
        return Err(NodalError::InvalidTopology {
            message: "Circuit has no components".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for name in circuit.names() {
        if !seen.insert(name) {
            return Err(NodalError::DuplicateComponent {
                name: name.to_string(),
            });
        }
    }

    // Floating nodes surface as singular matrices while iterating
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Resistor, VoltageSource};

    #[test]
    fn test_empty_circuit_rejected() {
        let result = validate_circuit(&Circuit::new());
        assert!(matches!(result, Err(NodalError::InvalidTopology { .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut circuit = Circuit::new();
        circuit
            .add(VoltageSource::new("V1", "in", "0", 1.0))
            .add(Resistor::new("R1", "in", "0", 1e3))
            .add(Resistor::new("R1", "in", "0", 2e3));
        match validate_circuit(&circuit) {
            Err(NodalError::DuplicateComponent { name }) => assert_eq!(name, "R1"),
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }
}
