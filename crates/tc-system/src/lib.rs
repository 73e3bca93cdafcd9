//! tc-system: field state attached to a prepared mesh.
//!
//! This crate provides:
//! - `SimulationSystem`: regions (material, per-node variables, advanced
//!   model, PMI selections), boundary conditions and electrodes with their
//!   external circuits, the electrical source set and the field source
//! - analytic doping and mole-fraction profile solvers
//! - per-cell error estimation for adaptive refinement
//! - field capture/restore across mesh rebuilds through `tc-interp`
//! - snapshot import/export and boundary/node information tables

pub mod boundary;
pub mod error;
pub mod estimate;
pub mod field;
pub mod material;
pub mod model;
pub mod profile;
pub mod region;
pub mod snapshot;
pub mod source;
pub mod system;
pub mod units;

pub use boundary::{Boundary, BoundaryKind, ExternalCircuit};
pub use error::{SystemError, SystemResult};
pub use estimate::Measure;
pub use field::FieldSource;
pub use material::{Compound, Material, MaterialClass, material};
pub use model::{AdvancedModel, EbLevel, IiForce, MobilityForce};
pub use profile::{DopingAnalytic, MoleAnalytic, ProfileSolver};
pub use region::{PmiSelection, Region};
pub use snapshot::{Snapshot, bc_info, node_info};
pub use source::{Attachment, Drive, Source, SourceKind, SourceSet, Waveform};
pub use system::{FieldTransfer, ModelOutcome, OperatingPoint, SimulationSystem, region_pattern};
pub use units::{length_scale, unit_factor};
