//! Nonlinear device solvers.
//!
//! This crate provides:
//! - a damped Newton solver over a finite-difference Jacobian
//! - METHOD card settings (solver kinds, damping, tolerances) and the
//!   physics formulation tags
//! - a lumped device network derived from the simulation system: junctions,
//!   bulk and metal resistances, oxide and junction capacitances, optional
//!   lattice self-heating
//! - the `PhysicsSolver` capability and a registry keyed by formulation
//! - small-signal (AC) analysis around a stored operating point

pub mod error;
pub mod jacobian;
pub mod method;
pub mod network;
pub mod newton;
pub mod physics;
pub mod registry;

pub use error::{SolverError, SolverResult};
pub use method::{
    Damping, EquationTolerances, Formulation, LinearSolver, MethodSettings, NonlinearSolver, Preconditioner,
    Truncation,
};
pub use network::{DeviceNetwork, Dynamics, Excitation, Terminal};
pub use newton::{NewtonConfig, NewtonResult, newton_solve};
pub use physics::{AcPoint, NetworkSolver, PhysicsSolver, PointOutcome, PointRequest, SolveKind};
pub use registry::{SolverFactory, SolverRegistry};
