//! Field interpolation between meshes.
//!
//! Interpolators are filled from node values on an existing mesh region and
//! evaluated at the nodes of a rebuilt mesh. Values pass through an
//! [`InterpolationLaw`] so concentration-like fields spanning many decades
//! are blended in signed-log space.

pub mod error;
mod grid;
pub mod law;
pub mod planar;
pub mod solid;

pub use error::{InterpError, InterpResult};
pub use law::InterpolationLaw;
pub use planar::Interpolator2D;
pub use solid::Interpolator3D;

use rayon::prelude::*;
use tc_mesh::{Mesh, Point};

/// Fill-from-existing / evaluate-at-new-points capability.
pub trait Interpolator: Send + Sync {
    fn law(&self) -> InterpolationLaw;

    /// Load node `values` (indexed by mesh node) of the cells in `region`.
    /// Filling a region again replaces its data.
    fn fill(&mut self, mesh: &Mesh, region: usize, values: &[f64]) -> InterpResult<()>;

    fn evaluate(&self, region: usize, point: &Point) -> InterpResult<f64>;

    /// Evaluate at many points in parallel.
    fn evaluate_all(&self, region: usize, points: &[Point]) -> InterpResult<Vec<f64>> {
        points.par_iter().map(|p| self.evaluate(region, p)).collect()
    }

    fn clear(&mut self);
}

/// Interpolator suited to the mesh dimension.
pub fn interpolator_for(dim: usize, law: InterpolationLaw) -> Box<dyn Interpolator> {
    if dim == 3 {
        Box::new(Interpolator3D::new(law))
    } else {
        Box::new(Interpolator2D::new(law))
    }
}
