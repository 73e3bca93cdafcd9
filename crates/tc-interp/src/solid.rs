//! 3D interpolation on the nearest source tetrahedron.

use crate::Interpolator;
use crate::error::{InterpError, InterpResult};
use crate::grid::{BucketGrid, bounding_box};
use crate::law::InterpolationLaw;
use crate::planar::collect_region;
use std::collections::HashMap;
use tc_mesh::{Mesh, Point};
use tracing::debug;

struct RegionData {
    points: Vec<Point>,
    values: Vec<f64>,
    tets: Vec<[usize; 4]>,
    grid: BucketGrid,
}

pub struct Interpolator3D {
    law: InterpolationLaw,
    regions: HashMap<usize, RegionData>,
}

impl Interpolator3D {
    pub fn new(law: InterpolationLaw) -> Self {
        Self {
            law,
            regions: HashMap::new(),
        }
    }
}

fn det3(u: [f64; 3], v: [f64; 3], w: [f64; 3]) -> f64 {
    u[0] * (v[1] * w[2] - v[2] * w[1]) - u[1] * (v[0] * w[2] - v[2] * w[0])
        + u[2] * (v[0] * w[1] - v[1] * w[0])
}

fn sub(a: &Point, b: &Point) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn barycentric(t: [&Point; 4], p: &Point) -> Option<[f64; 4]> {
    let (e1, e2, e3) = (sub(t[1], t[0]), sub(t[2], t[0]), sub(t[3], t[0]));
    let d = det3(e1, e2, e3);
    if d.abs() < f64::MIN_POSITIVE {
        return None;
    }
    let r = sub(p, t[0]);
    let l1 = det3(r, e2, e3) / d;
    let l2 = det3(e1, r, e3) / d;
    let l3 = det3(e1, e2, r) / d;
    Some([1.0 - l1 - l2 - l3, l1, l2, l3])
}

impl RegionData {
    fn blend(&self, tet: &[usize; 4], l: [f64; 4]) -> f64 {
        // clamp onto the tetrahedron for points slightly outside
        let clamped = l.map(|x| x.max(0.0));
        let sum: f64 = clamped.iter().sum();
        (0..4).map(|k| clamped[k] / sum * self.values[tet[k]]).sum()
    }

    fn corners(&self, tet: &[usize; 4]) -> [&Point; 4] {
        tet.map(|k| &self.points[k])
    }
}

impl Interpolator for Interpolator3D {
    fn law(&self) -> InterpolationLaw {
        self.law
    }

    fn fill(&mut self, mesh: &Mesh, region: usize, values: &[f64]) -> InterpResult<()> {
        if mesh.dim() != 3 {
            return Err(InterpError::Dimension {
                expected: 3,
                found: mesh.dim(),
            });
        }
        let (points, values, cells) = collect_region(mesh, region, values, self.law)?;
        let tets: Vec<[usize; 4]> = cells
            .into_iter()
            .filter(|ids| ids.len() == 4)
            .map(|ids| [ids[0], ids[1], ids[2], ids[3]])
            .collect();
        let boxes: Vec<(Point, Point)> = tets
            .iter()
            .map(|t| bounding_box(&t.map(|k| points[k])))
            .collect();
        let grid = BucketGrid::build(&boxes, 3);
        debug!(
            region,
            nodes = points.len(),
            tets = tets.len(),
            law = self.law.name(),
            "filled 3D interpolator"
        );
        self.regions.insert(
            region,
            RegionData {
                points,
                values,
                tets,
                grid,
            },
        );
        Ok(())
    }

    /// Blend on the candidate tetrahedron whose smallest barycentric
    /// coordinate is largest; the whole region is searched when the bucket
    /// holds no usable element.
    fn evaluate(&self, region: usize, p: &Point) -> InterpResult<f64> {
        let data = self
            .regions
            .get(&region)
            .ok_or(InterpError::Empty { region })?;

        let best = |candidates: &mut dyn Iterator<Item = usize>| {
            candidates
                .filter_map(|t| {
                    let tet = &data.tets[t];
                    barycentric(data.corners(tet), p).map(|l| (t, l))
                })
                .max_by(|a, b| {
                    let ma = a.1.iter().copied().fold(f64::MAX, f64::min);
                    let mb = b.1.iter().copied().fold(f64::MAX, f64::min);
                    ma.total_cmp(&mb)
                })
        };

        let found = best(&mut data.grid.candidates(p).iter().copied())
            .filter(|(_, l)| l.iter().all(|&x| x >= -1e-10))
            .or_else(|| best(&mut (0..data.tets.len())));
        match found {
            Some((t, l)) => Ok(self.law.inverse(data.blend(&data.tets[t], l))),
            None => Err(InterpError::Empty { region }),
        }
    }

    fn clear(&mut self) {
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_mesh::{Cell, CellShape};

    fn cube() -> Mesh {
        let mut m = Mesh::new(3);
        let r = m.add_region("si", "Si");
        for k in 0..2 {
            for j in 0..2 {
                for i in 0..2 {
                    m.add_node([i as f64, j as f64, k as f64]);
                }
            }
        }
        // corner 0 to corner 7 Kuhn split
        for tet in [
            [0, 1, 3, 7],
            [0, 1, 5, 7],
            [0, 2, 3, 7],
            [0, 2, 6, 7],
            [0, 4, 5, 7],
            [0, 4, 6, 7],
        ] {
            m.add_cell(Cell::new(CellShape::Tet4, tet.to_vec(), r)).unwrap();
        }
        m
    }

    #[test]
    fn linear_fields_are_reproduced_inside() {
        let m = cube();
        let values: Vec<f64> = m.nodes().iter().map(|p| p[0] + 2.0 * p[1] - 3.0 * p[2]).collect();
        let mut interp = Interpolator3D::new(InterpolationLaw::Linear);
        interp.fill(&m, 0, &values).unwrap();
        for p in [[0.2, 0.3, 0.4], [0.9, 0.1, 0.5], [0.5, 0.5, 0.5]] {
            let v = interp.evaluate(0, &p).unwrap();
            assert!((v - (p[0] + 2.0 * p[1] - 3.0 * p[2])).abs() < 1e-12);
        }
    }

    #[test]
    fn outside_points_clamp_to_the_nearest_tet() {
        let m = cube();
        let values: Vec<f64> = m.nodes().iter().map(|p| p[0]).collect();
        let mut interp = Interpolator3D::new(InterpolationLaw::Linear);
        interp.fill(&m, 0, &values).unwrap();
        let v = interp.evaluate(0, &[1.5, 0.5, 0.5]).unwrap();
        assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn rejects_planar_meshes() {
        let mut m = Mesh::new(2);
        m.add_region("si", "Si");
        let mut interp = Interpolator3D::new(InterpolationLaw::Linear);
        assert_eq!(
            interp.fill(&m, 0, &[]).unwrap_err(),
            InterpError::Dimension {
                expected: 3,
                found: 2
            }
        );
    }
}
