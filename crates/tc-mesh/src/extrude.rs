//! 2D to 3D mesh transforms.
//!
//! Both transforms sweep the triangulated 2D mesh through a list of layers
//! and split every prism into three tetrahedra. The split is chosen from the
//! sorted 2D node indices so neighbouring prisms agree on their shared faces.

use crate::error::{MeshError, MeshResult};
use crate::mesh::{Cell, CellShape, Mesh, Point, tet_volume};
use tracing::debug;

const AXIS_EPS: f64 = 1e-12;

/// Triangles covering a 2D cell. Quads are split from their lowest-index
/// vertex.
fn triangles(cell: &Cell) -> Vec<[usize; 3]> {
    let n = &cell.nodes;
    match cell.shape {
        CellShape::Tri3 => vec![[n[0], n[1], n[2]]],
        CellShape::Quad4 => {
            let k = (0..4).min_by_key(|&i| n[i]).unwrap_or(0);
            let v = |o: usize| n[(k + o) % 4];
            vec![[v(0), v(1), v(2)], [v(0), v(2), v(3)]]
        }
        CellShape::Tet4 => Vec::new(),
    }
}

fn check_planar(mesh: &Mesh) -> MeshResult<()> {
    if mesh.dim() != 2 {
        return Err(MeshError::UnsupportedOperation {
            what: format!("cannot sweep a {}D mesh", mesh.dim()),
        });
    }
    Ok(())
}

fn check_increasing(values: &[f64], what: &str) -> MeshResult<()> {
    if values.len() < 2 || values.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(MeshError::InvalidInput {
            what: format!("{what} must hold at least two strictly increasing values"),
        });
    }
    Ok(())
}

/// Sweep `mesh` through `layers` placements. `shared(i)` marks 2D nodes that
/// map to a single 3D node in every layer; `wrap` closes the last layer onto
/// the first.
fn sweep(
    mesh: &Mesh,
    layers: usize,
    place: impl Fn(usize, &Point) -> Point,
    shared: impl Fn(&Point) -> bool,
    wrap: bool,
) -> MeshResult<Mesh> {
    let mut out = Mesh::new(3);
    out.set_regions(mesh.regions().to_vec());
    out.face_rules_mut().extend(mesh.face_rules().iter().cloned());

    let unique = if wrap { layers - 1 } else { layers };
    let mut ids: Vec<Vec<usize>> = Vec::with_capacity(layers);
    for k in 0..unique {
        let layer = mesh
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if k > 0 && shared(p) {
                    ids[0][i]
                } else {
                    out.add_node(place(k, p))
                }
            })
            .collect();
        ids.push(layer);
    }
    if wrap {
        ids.push(ids[0].clone());
    }

    let scale = mesh
        .nodes()
        .iter()
        .flat_map(|p| p.iter().map(|c| c.abs()))
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let min_volume = 1e-14 * scale.powi(3);

    let mut dropped = 0usize;
    for cell in mesh.cells() {
        for mut tri in triangles(cell) {
            tri.sort_unstable();
            let [a, b, c] = tri;
            for k in 0..layers - 1 {
                let (lo, hi) = (&ids[k], &ids[k + 1]);
                let candidates = [
                    [lo[a], lo[b], lo[c], hi[a]],
                    [lo[b], lo[c], hi[a], hi[b]],
                    [lo[c], hi[a], hi[b], hi[c]],
                ];
                for tet in candidates {
                    let distinct = (0..4).all(|i| (i + 1..4).all(|j| tet[i] != tet[j]));
                    let p = |i: usize| out.nodes()[tet[i]];
                    if !distinct || tet_volume(&p(0), &p(1), &p(2), &p(3)) < min_volume {
                        dropped += 1;
                        continue;
                    }
                    out.add_cell(Cell::new(CellShape::Tet4, tet.to_vec(), cell.region))?;
                }
            }
        }
    }
    debug!(
        layers,
        nodes = out.n_nodes(),
        cells = out.n_cells(),
        dropped,
        "swept 2D mesh"
    );
    Ok(out)
}

/// Extrude a 2D mesh along z through the given layer coordinates.
pub fn extrude(mesh: &Mesh, z: &[f64]) -> MeshResult<Mesh> {
    check_planar(mesh)?;
    check_increasing(z, "extrusion coordinates")?;
    sweep(mesh, z.len(), |k, p| [p[0], p[1], z[k]], |_| false, false)
}

/// Revolve a 2D mesh about the y axis through the given angles (radians).
/// Nodes on the axis are shared by all layers. A `full` revolution closes
/// the last layer onto the first.
pub fn revolve(mesh: &Mesh, angles: &[f64], full: bool) -> MeshResult<Mesh> {
    check_planar(mesh)?;
    check_increasing(angles, "revolution angles")?;
    if mesh.nodes().iter().any(|p| p[0] < -AXIS_EPS) {
        return Err(MeshError::InvalidInput {
            what: "revolved mesh must lie in x >= 0".to_string(),
        });
    }
    if full && angles.len() < 4 {
        return Err(MeshError::InvalidInput {
            what: "a full revolution needs at least three sectors".to_string(),
        });
    }
    let mut out = sweep(
        mesh,
        angles.len(),
        |k, p| {
            let (s, c) = angles[k].sin_cos();
            [p[0] * c, p[1], p[0] * s]
        },
        |p| p[0].abs() <= AXIS_EPS,
        full,
    )?;
    for rule in out.face_rules_mut() {
        rule.radial = true;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::FaceRule;
    use std::f64::consts::PI;

    fn unit_square(shape: CellShape) -> Mesh {
        let mut m = Mesh::new(2);
        let r = m.add_region("si", "Si");
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]] {
            m.add_node(p);
        }
        match shape {
            CellShape::Quad4 => {
                m.add_cell(Cell::new(shape, vec![0, 1, 2, 3], r)).unwrap();
            }
            _ => {
                m.add_cell(Cell::new(CellShape::Tri3, vec![0, 1, 2], r)).unwrap();
                m.add_cell(Cell::new(CellShape::Tri3, vec![0, 2, 3], r)).unwrap();
            }
        }
        m.add_face_rule(FaceRule::new(
            "anode",
            [0.0, f64::MIN, f64::MIN],
            [0.0, f64::MAX, f64::MAX],
        ));
        m
    }

    fn volume(m: &Mesh) -> f64 {
        (0..m.n_cells()).map(|c| m.cell_measure(c)).sum()
    }

    #[test]
    fn extrusion_fills_the_slab() {
        let m = unit_square(CellShape::Tri3);
        let mut out = extrude(&m, &[0.0, 1.0, 2.0]).unwrap();
        assert_eq!(out.dim(), 3);
        assert_eq!(out.n_nodes(), 12);
        assert_eq!(out.n_cells(), 12);
        assert!((volume(&out) - 2.0).abs() < 1e-12);
        out.prepare().unwrap();
        // every side is a boundary side or shared; the slab keeps its label
        assert!(out.boundary_labels().unwrap().contains(&"anode".to_string()));
    }

    #[test]
    fn extruded_quads_are_split() {
        let m = unit_square(CellShape::Quad4);
        let out = extrude(&m, &[0.0, 0.5]).unwrap();
        assert_eq!(out.n_cells(), 6);
        assert!((volume(&out) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn full_revolution_shares_axis_nodes() {
        let m = unit_square(CellShape::Tri3);
        let n = 16;
        let angles: Vec<f64> = (0..=n).map(|k| 2.0 * PI * k as f64 / n as f64).collect();
        let out = revolve(&m, &angles, true).unwrap();
        // two axis nodes plus the off-axis pair in every sector
        assert_eq!(out.n_nodes(), 2 + 2 * n);
        let polygon = n as f64 * 0.5 * (2.0 * PI / n as f64).sin();
        assert!((volume(&out) - polygon).abs() < 1e-9);
        assert!(out.face_rules().iter().all(|r| r.radial));
    }

    #[test]
    fn sweeps_reject_bad_input() {
        let m = unit_square(CellShape::Tri3);
        assert!(matches!(
            extrude(&m, &[1.0, 1.0]),
            Err(MeshError::InvalidInput { .. })
        ));
        let out = extrude(&m, &[0.0, 1.0]).unwrap();
        assert!(matches!(
            extrude(&out, &[0.0, 1.0]),
            Err(MeshError::UnsupportedOperation { .. })
        ));
        let mut shifted = Mesh::new(2);
        let r = shifted.add_region("si", "Si");
        for p in [[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            shifted.add_node(p);
        }
        shifted
            .add_cell(Cell::new(CellShape::Tri3, vec![0, 1, 2], r))
            .unwrap();
        assert!(revolve(&shifted, &[0.0, 1.0], false).is_err());
    }
}
