//! Per-cell error indicator for adaptive refinement.

use crate::error::{SystemError, SystemResult};
use crate::region::Region;
use rayon::prelude::*;
use tc_interp::InterpolationLaw;
use tc_mesh::Mesh;

/// How node values are compared within a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measure {
    Linear,
    SignedLog,
}

impl Measure {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Some(Measure::Linear),
            "signedlog" | "asinh" | "log" => Some(Measure::SignedLog),
            _ => None,
        }
    }

    fn law(self) -> InterpolationLaw {
        match self {
            Measure::Linear => InterpolationLaw::Linear,
            Measure::SignedLog => InterpolationLaw::Asinh,
        }
    }
}

/// Spread (max - min) of `variable` over each cell's nodes, measured in the
/// chosen space. Cells whose region lacks the variable get zero error.
pub fn estimate_error(
    mesh: &Mesh,
    regions: &[Region],
    variable: &str,
    measure: Measure,
) -> SystemResult<Vec<f64>> {
    if !regions.iter().any(|r| r.has_variable(variable)) {
        return Err(SystemError::UnknownVariable {
            owner: "any region".to_string(),
            variable: variable.to_string(),
        });
    }
    let law = measure.law();
    let by_index: Vec<Option<&Region>> = (0..mesh.regions().len())
        .map(|i| regions.iter().find(|r| r.index() == i))
        .collect();

    mesh.cells()
        .par_iter()
        .map(|cell| {
            let Some(region) = by_index.get(cell.region).copied().flatten() else {
                return Ok(0.0);
            };
            let Ok(values) = region.variable(variable) else {
                return Ok(0.0);
            };
            let mut lo = f64::MAX;
            let mut hi = f64::MIN;
            for &n in &cell.nodes {
                let k = region.local_index(n).ok_or_else(|| SystemError::InvalidInput {
                    what: format!("node {n} is not part of region {}", region.name()),
                })?;
                let v = law.forward(values[k]);
                lo = lo.min(v);
                hi = hi.max(v);
            }
            Ok(hi - lo)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::material;
    use tc_mesh::{Cell, CellShape};

    #[test]
    fn junction_cells_carry_the_error() {
        let mut mesh = Mesh::new(2);
        let r = mesh.add_region("si", "Si");
        for j in 0..2 {
            for i in 0..3 {
                mesh.add_node([i as f64, j as f64, 0.0]);
            }
        }
        mesh.add_cell(Cell::new(CellShape::Quad4, vec![0, 1, 4, 3], r)).unwrap();
        mesh.add_cell(Cell::new(CellShape::Quad4, vec![1, 2, 5, 4], r)).unwrap();

        let mut si = Region::new("si", 0, material("Si").unwrap(), (0..6).collect());
        si.set_variable("doping", vec![1e16, 1e16, -1e18, 1e16, 1e16, -1e18]).unwrap();
        let regions = vec![si];

        let lin = estimate_error(&mesh, &regions, "doping", Measure::Linear).unwrap();
        assert_eq!(lin[0], 0.0);
        assert!((lin[1] - 1.01e18).abs() < 1e3);

        let log = estimate_error(&mesh, &regions, "doping", Measure::SignedLog).unwrap();
        assert_eq!(log[0], 0.0);
        assert!(log[1] > 70.0 && log[1] < 80.0);

        assert!(matches!(
            estimate_error(&mesh, &regions, "vorticity", Measure::Linear),
            Err(SystemError::UnknownVariable { .. })
        ));
    }
}
