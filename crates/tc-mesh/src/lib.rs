//! Spatial mesh lifecycle for tcadctl.
//!
//! This crate provides:
//! - `Mesh`: 2D/3D cells (Tri3, Quad4, Tet4) with regions, refinement
//!   ancestry and topologically derived boundary labels
//! - structured generators selected by a type tag (`s_tri3`, `s_quad4`,
//!   `s_tet4`)
//! - error-driven cell flagging and red/green refinement with sibling
//!   coarsening
//! - 2D to 3D extrusion and revolution
//! - worker communication (broadcast, gather, barrier) and the
//!   `MeshLifecycle` that owns the live mesh

pub mod boundary;
pub mod comm;
pub mod error;
pub mod extrude;
pub mod generator;
pub mod lifecycle;
pub mod mesh;
pub mod refine;

pub use comm::{Communicator, LocalGroup, LocalWorker, SerialCommunicator};
pub use error::{MeshError, MeshResult};
pub use extrude::{extrude, revolve};
pub use generator::{MeshGenerator, StructuredGenerator, generator_for};
pub use lifecycle::MeshLifecycle;
pub use mesh::{BoundaryFace, Cell, CellShape, FaceRule, Family, Mesh, Point, RegionInfo};
pub use refine::{
    FlagPolicy, RefineFlag, RefineStats, flag_cells, refine_and_coarsen, refine_conforming,
    refine_uniformly,
};
