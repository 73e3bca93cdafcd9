//! Solver registry keyed by formulation tag.

use crate::error::{SolverError, SolverResult};
use crate::method::Formulation;
use crate::physics::{NetworkSolver, PhysicsSolver, SolveKind};
use std::collections::BTreeMap;

pub type SolverFactory = fn() -> Box<dyn PhysicsSolver>;

pub struct SolverRegistry {
    factories: BTreeMap<Formulation, SolverFactory>,
}

impl SolverRegistry {
    /// Registry without any solver.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// The network-backed formulations.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Formulation::Poisson, || Box::new(NetworkSolver::poisson()));
        registry.register(Formulation::Ddml1, || Box::new(NetworkSolver::ddml1()));
        registry.register(Formulation::Ddml2, || Box::new(NetworkSolver::ddml2()));
        registry.register(Formulation::Ddmac, || Box::new(NetworkSolver::ddmac()));
        registry
    }

    /// Register `factory` for `formulation`, replacing an earlier one.
    pub fn register(&mut self, formulation: Formulation, factory: SolverFactory) {
        self.factories.insert(formulation, factory);
    }

    pub fn is_available(&self, formulation: Formulation) -> bool {
        self.factories.contains_key(&formulation)
    }

    pub fn available(&self) -> impl Iterator<Item = Formulation> + '_ {
        self.factories.keys().copied()
    }

    /// Fresh solver instance for `formulation` able to run a `kind` solve.
    pub fn instantiate(&self, formulation: Formulation, kind: SolveKind) -> SolverResult<Box<dyn PhysicsSolver>> {
        let factory = self.factories.get(&formulation).ok_or_else(|| SolverError::Unavailable {
            tag: formulation.tag().to_string(),
        })?;
        let solver = factory();
        if !solver.supports(kind) {
            return Err(SolverError::Unsupported {
                tag: formulation.tag().to_string(),
                solve: kind.name().to_string(),
            });
        }
        Ok(solver)
    }
}

impl Default for SolverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_network_formulations() {
        let registry = SolverRegistry::with_defaults();
        let available: Vec<_> = registry.available().collect();
        assert_eq!(
            available,
            vec![
                Formulation::Poisson,
                Formulation::Ddml1,
                Formulation::Ddml2,
                Formulation::Ddmac
            ]
        );
        let solver = registry.instantiate(Formulation::Ddml1, SolveKind::DcSweep).unwrap();
        assert_eq!(solver.label(), "ddml1");
    }

    #[test]
    fn unavailable_and_unsupported_are_distinguished() {
        let registry = SolverRegistry::with_defaults();
        assert!(matches!(
            registry.instantiate(Formulation::Ebml3, SolveKind::SteadyState),
            Err(SolverError::Unavailable { .. })
        ));
        assert!(matches!(
            registry.instantiate(Formulation::Poisson, SolveKind::DcSweep),
            Err(SolverError::Unsupported { .. })
        ));
        assert!(matches!(
            registry.instantiate(Formulation::Ddmac, SolveKind::Transient),
            Err(SolverError::Unsupported { .. })
        ));
        assert!(registry.instantiate(Formulation::Ddmac, SolveKind::AcSweep).is_ok());
    }
}
