//! 2D interpolation: linear on the source triangles, inverse-distance
//! weighting of the nearest source nodes outside them.

use crate::error::{InterpError, InterpResult};
use crate::Interpolator;
use crate::grid::{BucketGrid, bounding_box, dist2};
use crate::law::InterpolationLaw;
use std::collections::HashMap;
use tc_mesh::{CellShape, Mesh, Point};
use tracing::debug;

const INSIDE_TOL: f64 = 1e-10;
const IDW_NEIGHBOURS: usize = 3;

struct RegionData {
    points: Vec<Point>,
    values: Vec<f64>,
    tris: Vec<[usize; 3]>,
    grid: BucketGrid,
}

pub struct Interpolator2D {
    law: InterpolationLaw,
    regions: HashMap<usize, RegionData>,
}

impl Interpolator2D {
    pub fn new(law: InterpolationLaw) -> Self {
        Self {
            law,
            regions: HashMap::new(),
        }
    }
}

/// Local node lists of the cells of `region`, translated to compact indices.
pub(crate) fn collect_region(
    mesh: &Mesh,
    region: usize,
    values: &[f64],
    law: InterpolationLaw,
) -> InterpResult<(Vec<Point>, Vec<f64>, Vec<Vec<usize>>)> {
    if values.len() != mesh.n_nodes() {
        return Err(InterpError::Length {
            len: values.len(),
            nodes: mesh.n_nodes(),
        });
    }
    let mut local: HashMap<usize, usize> = HashMap::new();
    let mut points = Vec::new();
    let mut transformed = Vec::new();
    let mut cells = Vec::new();
    for cell in mesh.cells().iter().filter(|c| c.region == region) {
        let mut ids = Vec::with_capacity(cell.nodes.len());
        for &n in &cell.nodes {
            let id = match local.get(&n) {
                Some(&id) => id,
                None => {
                    let v = values[n];
                    if !v.is_finite() {
                        return Err(InterpError::NonFinite { node: n, value: v });
                    }
                    points.push(mesh.nodes()[n]);
                    transformed.push(law.forward(v));
                    local.insert(n, points.len() - 1);
                    points.len() - 1
                }
            };
            ids.push(id);
        }
        cells.push(ids);
    }
    if points.is_empty() {
        return Err(InterpError::Empty { region });
    }
    Ok((points, transformed, cells))
}

fn barycentric(a: &Point, b: &Point, c: &Point, p: &Point) -> Option<[f64; 3]> {
    let det = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
    if det.abs() < f64::MIN_POSITIVE {
        return None;
    }
    let l1 = ((b[1] - c[1]) * (p[0] - c[0]) + (c[0] - b[0]) * (p[1] - c[1])) / det;
    let l2 = ((c[1] - a[1]) * (p[0] - c[0]) + (a[0] - c[0]) * (p[1] - c[1])) / det;
    Some([l1, l2, 1.0 - l1 - l2])
}

/// Inverse-distance weighting over the `k` nearest points.
pub(crate) fn idw(points: &[Point], values: &[f64], p: &Point, k: usize) -> f64 {
    let mut nearest: Vec<(f64, usize)> = points
        .iter()
        .enumerate()
        .map(|(i, q)| (dist2(p, q), i))
        .collect();
    nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
    nearest.truncate(k.max(1));
    if let Some(&(d, i)) = nearest.first() {
        if d == 0.0 {
            return values[i];
        }
    }
    let (mut num, mut den) = (0.0, 0.0);
    for (d, i) in nearest {
        let w = 1.0 / d;
        num += w * values[i];
        den += w;
    }
    num / den
}

impl Interpolator for Interpolator2D {
    fn law(&self) -> InterpolationLaw {
        self.law
    }

    fn fill(&mut self, mesh: &Mesh, region: usize, values: &[f64]) -> InterpResult<()> {
        if mesh.dim() != 2 {
            return Err(InterpError::Dimension {
                expected: 2,
                found: mesh.dim(),
            });
        }
        let (points, values, cells) = collect_region(mesh, region, values, self.law)?;
        let mut tris = Vec::with_capacity(cells.len() * 2);
        for ids in cells {
            match ids.len() {
                3 => tris.push([ids[0], ids[1], ids[2]]),
                4 => {
                    tris.push([ids[0], ids[1], ids[2]]);
                    tris.push([ids[0], ids[2], ids[3]]);
                }
                _ => {}
            }
        }
        let boxes: Vec<(Point, Point)> = tris
            .iter()
            .map(|t| bounding_box(&[points[t[0]], points[t[1]], points[t[2]]]))
            .collect();
        let grid = BucketGrid::build(&boxes, CellShape::Tri3.dim());
        debug!(
            region,
            nodes = points.len(),
            triangles = tris.len(),
            law = self.law.name(),
            "filled 2D interpolator"
        );
        self.regions.insert(
            region,
            RegionData {
                points,
                values,
                tris,
                grid,
            },
        );
        Ok(())
    }

    fn evaluate(&self, region: usize, p: &Point) -> InterpResult<f64> {
        let data = self
            .regions
            .get(&region)
            .ok_or(InterpError::Empty { region })?;
        for &t in data.grid.candidates(p) {
            let [a, b, c] = data.tris[t];
            let Some(l) = barycentric(&data.points[a], &data.points[b], &data.points[c], p)
            else {
                continue;
            };
            if l.iter().all(|&x| x >= -INSIDE_TOL) {
                let v = l[0] * data.values[a] + l[1] * data.values[b] + l[2] * data.values[c];
                return Ok(self.law.inverse(v));
            }
        }
        let v = idw(&data.points, &data.values, p, IDW_NEIGHBOURS);
        Ok(self.law.inverse(v))
    }

    fn clear(&mut self) {
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_mesh::Cell;

    fn square(nx: usize) -> Mesh {
        let mut m = Mesh::new(2);
        let r = m.add_region("si", "Si");
        for j in 0..=nx {
            for i in 0..=nx {
                m.add_node([i as f64 / nx as f64, j as f64 / nx as f64, 0.0]);
            }
        }
        let id = |i: usize, j: usize| j * (nx + 1) + i;
        for j in 0..nx {
            for i in 0..nx {
                m.add_cell(Cell::new(
                    CellShape::Quad4,
                    vec![id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1)],
                    r,
                ))
                .unwrap();
            }
        }
        m
    }

    #[test]
    fn linear_fields_are_reproduced_exactly() {
        let m = square(4);
        let values: Vec<f64> = m.nodes().iter().map(|p| 2.0 * p[0] - p[1] + 0.5).collect();
        let mut interp = Interpolator2D::new(InterpolationLaw::Linear);
        interp.fill(&m, 0, &values).unwrap();
        for p in [[0.13, 0.77, 0.0], [0.5, 0.5, 0.0], [1.0, 0.0, 0.0]] {
            let v = interp.evaluate(0, &p).unwrap();
            assert!((v - (2.0 * p[0] - p[1] + 0.5)).abs() < 1e-12);
        }
    }

    #[test]
    fn asinh_law_blends_decades() {
        let m = square(1);
        let values: Vec<f64> = m
            .nodes()
            .iter()
            .map(|p| if p[0] < 0.5 { 1e15 } else { 1e19 })
            .collect();
        let mut interp = Interpolator2D::new(InterpolationLaw::Asinh);
        interp.fill(&m, 0, &values).unwrap();
        let v = interp.evaluate(0, &[0.5, 0.5, 0.0]).unwrap();
        assert!((v / 1e17 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn points_outside_use_nearest_nodes() {
        let m = square(2);
        let values = vec![3.0; m.n_nodes()];
        let mut interp = Interpolator2D::new(InterpolationLaw::Linear);
        interp.fill(&m, 0, &values).unwrap();
        let v = interp.evaluate(0, &[2.0, 2.0, 0.0]).unwrap();
        assert!((v - 3.0).abs() < 1e-12);
        assert_eq!(
            interp.evaluate(5, &[0.0, 0.0, 0.0]).unwrap_err(),
            InterpError::Empty { region: 5 }
        );
    }

    #[test]
    fn fill_checks_input() {
        let m = square(1);
        let mut interp = Interpolator2D::new(InterpolationLaw::Linear);
        assert!(matches!(
            interp.fill(&m, 0, &[1.0]),
            Err(InterpError::Length { .. })
        ));
        let mut values = vec![0.0; m.n_nodes()];
        values[2] = f64::NAN;
        assert!(matches!(
            interp.fill(&m, 0, &values),
            Err(InterpError::NonFinite { node: 2, .. })
        ));
    }
}
