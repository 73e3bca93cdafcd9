//! tc-sim: continuation-controlled solve engine.
//!
//! Provides:
//! - `SolveConfig`: immutable per-solve configuration built from a SOLVE card
//! - `run_solve`: solver lifecycle (create, solve, destroy) and result recording
//! - continuation strategies: equilibrium, steady state with ramp-up, Gmin
//!   stepping and pseudo-time relaxation, DC/current sweep with cutback, IV
//!   trace, BDF1/BDF2 transient with step control, small-signal sweep
//! - the hook set: default IV recorder, probe and C-V recorders, control hook

pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;

mod ac;
mod steady;
mod sweep;
mod transient;

pub use config::{
    AcConfig, Hold, Scan, SolveConfig, SolveParams, SteadyConfig, SweepConfig, TimeScheme, TraceConfig,
    TransientConfig,
};
pub use engine::{SolveSummary, run_solve};
pub use error::{SimError, SimResult};
pub use hooks::{
    ControlHook, CvHook, GnuplotHook, Hook, HookContext, HookEntry, HookKind, HookRegistry, HookSet, ProbeHook,
};
