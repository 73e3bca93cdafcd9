//! Method settings from the METHOD card.
//!
//! Settings persist across commands; every METHOD card starts again from
//! the defaults before applying its own parameters.

use crate::error::{SolverError, SolverResult};
use crate::newton::NewtonConfig;
use serde::{Deserialize, Serialize};
use tc_deck::Card;
use tracing::debug;

/// Physics formulation tag selecting a solver implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Formulation {
    Poisson,
    Ddml1,
    Ddml2,
    Ddmac,
    Ebml3,
    DensityGradient,
    Hall,
    Ddml1Mix,
    Ddml1MixA,
    Ddml2MixA,
    Ebml3MixA,
    HalfImplicit,
    Ric,
    Dictat,
}

const TAGS: &[(Formulation, &str)] = &[
    (Formulation::Poisson, "poisson"),
    (Formulation::Ddml1, "ddml1"),
    (Formulation::Ddml2, "ddml2"),
    (Formulation::Ddmac, "ddmac"),
    (Formulation::Ebml3, "ebml3"),
    (Formulation::DensityGradient, "dg"),
    (Formulation::Hall, "hall"),
    (Formulation::Ddml1Mix, "ddml1mix"),
    (Formulation::Ddml1MixA, "ddml1mixa"),
    (Formulation::Ddml2MixA, "ddml2mixa"),
    (Formulation::Ebml3MixA, "ebml3mixa"),
    (Formulation::HalfImplicit, "halfimplicit"),
    (Formulation::Ric, "ric"),
    (Formulation::Dictat, "dictat"),
];

impl Formulation {
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_lowercase();
        let tag = match tag.as_str() {
            "ddm" | "ddml1e" => "ddml1",
            "ddml2e" => "ddml2",
            "densitygradient" => "dg",
            other => other,
        };
        TAGS.iter().find(|(_, t)| *t == tag).map(|(f, _)| *f)
    }

    pub fn tag(self) -> &'static str {
        TAGS.iter()
            .find(|(f, _)| *f == self)
            .map(|(_, t)| *t)
            .unwrap_or("unknown")
    }

    /// Formulations with a lattice heat equation.
    pub fn has_lattice_temperature(self) -> bool {
        matches!(
            self,
            Formulation::Ddml2 | Formulation::Ebml3 | Formulation::Ddml2MixA | Formulation::Ebml3MixA
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonlinearSolver {
    Basic,
    LineSearch,
    TrustRegion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolver {
    Lu,
    Mumps,
    SuperLu,
    Umfpack,
    Gmres,
    Bcgs,
    Tfqmr,
    Cgs,
}

impl LinearSolver {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "lu" => LinearSolver::Lu,
            "mumps" => LinearSolver::Mumps,
            "superlu" => LinearSolver::SuperLu,
            "umfpack" => LinearSolver::Umfpack,
            "gmres" => LinearSolver::Gmres,
            "bcgs" | "bicgstab" => LinearSolver::Bcgs,
            "tfqmr" => LinearSolver::Tfqmr,
            "cgs" => LinearSolver::Cgs,
            _ => return None,
        })
    }

    pub fn is_direct(self) -> bool {
        matches!(
            self,
            LinearSolver::Lu | LinearSolver::Mumps | LinearSolver::SuperLu | LinearSolver::Umfpack
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preconditioner {
    None,
    Jacobi,
    BlockJacobi,
    Asm,
    Ilu,
    Lu,
}

impl Preconditioner {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "none" => Preconditioner::None,
            "jacobi" => Preconditioner::Jacobi,
            "bjacobi" | "blockjacobi" => Preconditioner::BlockJacobi,
            "asm" => Preconditioner::Asm,
            "ilu" => Preconditioner::Ilu,
            "lu" => Preconditioner::Lu,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Damping {
    No,
    Potential,
    SuperPotential,
    BankRose,
}

/// Voronoi cell truncation at boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Truncation {
    No,
    Boundary,
    Always,
}

/// Absolute tolerances per equation, in SI units of the residual.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquationTolerances {
    /// Poisson equation (C).
    pub poisson: f64,
    /// Electron continuity (A).
    pub elec_continuity: f64,
    /// Hole continuity (A).
    pub hole_continuity: f64,
    /// Lattice heat equation (W).
    pub lattice_temperature: f64,
    /// Electrode current balance (A).
    pub electrode: f64,
}

impl Default for EquationTolerances {
    fn default() -> Self {
        Self {
            poisson: 1e-26,
            elec_continuity: 5e-18,
            hole_continuity: 5e-18,
            lattice_temperature: 1e-11,
            electrode: 1e-14,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodSettings {
    pub formulation: Formulation,
    pub nonlinear: NonlinearSolver,
    pub linear: LinearSolver,
    pub preconditioner: Preconditioner,
    pub damping: Damping,
    pub truncation: Truncation,
    pub max_iterations: usize,
    /// Largest potential update per Newton iteration (V).
    pub potential_update: f64,
    pub absolute_tol: f64,
    pub relative_tol: f64,
    pub toler_relax: f64,
    pub tolerances: EquationTolerances,
    pub divergence_factor: f64,
}

impl Default for MethodSettings {
    fn default() -> Self {
        Self {
            formulation: Formulation::Ddml1,
            nonlinear: NonlinearSolver::Basic,
            linear: LinearSolver::Gmres,
            preconditioner: Preconditioner::Lu,
            damping: Damping::Potential,
            truncation: Truncation::Boundary,
            max_iterations: 30,
            potential_update: 1.0,
            absolute_tol: 1e-12,
            relative_tol: 1e-5,
            toler_relax: 1e5,
            tolerances: EquationTolerances::default(),
            divergence_factor: 1e20,
        }
    }
}

fn invalid(card: &Card, name: &str, value: &str) -> SolverError {
    SolverError::ProblemSetup {
        what: format!("{}: unknown {name} '{value}'", card.location),
    }
}

impl MethodSettings {
    /// Defaults overwritten by the parameters of a METHOD card. An unknown
    /// solver `type` is an error; recognised tags without an implementation
    /// are accepted here and rejected when a solve asks for them.
    pub fn from_card(card: &Card) -> SolverResult<Self> {
        let mut m = Self::default();

        let ns = card.get_enum("ns", "basic")?;
        m.nonlinear = match ns.as_str() {
            "basic" | "newton" => NonlinearSolver::Basic,
            "linesearch" => NonlinearSolver::LineSearch,
            "trustregion" => NonlinearSolver::TrustRegion,
            _ => return Err(invalid(card, "nonlinear solver", &ns)),
        };
        let ls = card.get_enum("ls", "gmres")?;
        m.linear = LinearSolver::parse(&ls).ok_or_else(|| invalid(card, "linear solver", &ls))?;
        let pc = card.get_enum("pc", "lu")?;
        m.preconditioner = Preconditioner::parse(&pc).ok_or_else(|| invalid(card, "preconditioner", &pc))?;

        if card.is_parameter_exist("damping") {
            let d = card.get_enum("damping", "potential")?;
            m.damping = match d.as_str() {
                "no" => Damping::No,
                "potential" => Damping::Potential,
                "superpotential" => Damping::SuperPotential,
                "bankrose" => Damping::BankRose,
                _ => return Err(invalid(card, "damping", &d)),
            };
        }
        if card.is_parameter_exist("truncation") {
            let t = card.get_enum("truncation", "boundary")?;
            m.truncation = match t.as_str() {
                "no" => Truncation::No,
                "boundary" => Truncation::Boundary,
                "always" => Truncation::Always,
                _ => return Err(invalid(card, "truncation", &t)),
            };
        }

        let max_iterations = card.get_int("maxiteration", 30)?;
        if max_iterations < 1 {
            return Err(SolverError::ProblemSetup {
                what: format!("{}: maxiteration must be at least 1", card.location),
            });
        }
        m.max_iterations = max_iterations as usize;
        m.potential_update = card.get_real("potential.update", 1.0)?;
        m.absolute_tol = card.get_real("absolute.tol", 1e-12)?;
        m.relative_tol = card.get_real("relative.tol", 1e-5)?;
        m.toler_relax = if card.is_parameter_exist("tol.relax") {
            card.get_real("tol.relax", 1e5)?
        } else {
            card.get_real("toler.relax", 1e5)?
        };
        m.tolerances = EquationTolerances {
            poisson: card.get_real("poisson.tol", 1e-26)?,
            elec_continuity: card.get_real("elec.continuity.tol", card.get_real("elec.c.tol", 5e-18)?)?,
            hole_continuity: card.get_real("hole.continuity.tol", card.get_real("hole.c.tol", 5e-18)?)?,
            lattice_temperature: card.get_real("latt.temp.tol", 1e-11)?,
            electrode: card.get_real("electrode.tol", 1e-14)?,
        };
        m.divergence_factor = card.get_real("divergence.factor", 1e20)?;

        if card.is_parameter_exist("type") {
            let tag = card.get_string("type", "")?;
            m.formulation = Formulation::parse(&tag).ok_or(SolverError::UnknownFormulation { tag })?;
        }
        debug!(
            formulation = m.formulation.tag(),
            damping = ?m.damping,
            max_iterations = m.max_iterations,
            "method settings"
        );
        Ok(m)
    }

    /// Newton configuration for residuals scaled by their tolerances.
    pub fn newton_config(&self) -> NewtonConfig {
        let damping = match (self.nonlinear, self.damping) {
            // a line search supplies its own step control
            (NonlinearSolver::LineSearch, Damping::No) => Damping::BankRose,
            (_, d) => d,
        };
        NewtonConfig {
            max_iterations: self.max_iterations,
            abs_tol: 1.0,
            rel_tol: self.relative_tol,
            relax: self.toler_relax,
            damping,
            potential_update: self.potential_update,
            divergence_factor: self.divergence_factor,
            ..NewtonConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;

    fn card() -> Card {
        Card::new("METHOD", SourceLocation::new("m.yaml", 4))
    }

    #[test]
    fn each_card_starts_from_defaults() {
        let first = MethodSettings::from_card(&card().with("type", "ddml2").with("maxiteration", 50i64)).unwrap();
        assert_eq!(first.formulation, Formulation::Ddml2);
        assert_eq!(first.max_iterations, 50);

        let second = MethodSettings::from_card(&card().with("damping", "bankrose")).unwrap();
        assert_eq!(second.formulation, Formulation::Ddml1);
        assert_eq!(second.max_iterations, 30);
        assert_eq!(second.damping, Damping::BankRose);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = MethodSettings::from_card(&card().with("type", "quantum")).unwrap_err();
        assert!(matches!(err, SolverError::UnknownFormulation { .. }));
        // recognised even though no implementation exists
        let m = MethodSettings::from_card(&card().with("type", "EBML3")).unwrap();
        assert_eq!(m.formulation, Formulation::Ebml3);
    }

    #[test]
    fn tolerances_and_aliases() {
        let m = MethodSettings::from_card(
            &card()
                .with("tol.relax", 10.0)
                .with("elec.c.tol", 1e-16)
                .with("electrode.tol", 1e-12),
        )
        .unwrap();
        assert_eq!(m.toler_relax, 10.0);
        assert_eq!(m.tolerances.elec_continuity, 1e-16);
        assert_eq!(m.newton_config().relax, 10.0);
        assert_eq!(m.tolerances.electrode, 1e-12);
    }

    #[test]
    fn bad_enumerations_are_rejected() {
        assert!(MethodSettings::from_card(&card().with("ls", "magic")).is_err());
        assert!(MethodSettings::from_card(&card().with("damping", "heavy")).is_err());
        assert!(MethodSettings::from_card(&card().with("maxiteration", 0i64)).is_err());
    }

    #[test]
    fn line_search_backtracks_by_default() {
        let m = MethodSettings::from_card(&card().with("ns", "linesearch").with("damping", "no")).unwrap();
        assert_eq!(m.newton_config().damping, Damping::BankRose);
    }

    #[test]
    fn tags_round_trip() {
        for (f, t) in TAGS {
            assert_eq!(Formulation::parse(t), Some(*f));
            assert_eq!(f.tag(), *t);
        }
    }
}
