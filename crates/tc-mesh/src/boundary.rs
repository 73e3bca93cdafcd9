//! Topological boundary extraction and labelling.
//!
//! A side is on the boundary when exactly one cell owns it (exterior) or
//! when its two cells belong to different regions (interface). Exterior
//! sides take the label of the first face rule containing their centroid,
//! falling back to `<region>_Neumann`; interfaces are labelled
//! `IF_<a>_to_<b>` with the region names sorted.

use crate::mesh::{BoundaryFace, Mesh, Point};
use rayon::prelude::*;
use std::collections::HashMap;

const RULE_EPS: f64 = 1e-9;

fn side_centroid(mesh: &Mesh, nodes: &[usize]) -> Point {
    let mut p = [0.0; 3];
    for &n in nodes {
        for d in 0..3 {
            p[d] += mesh.nodes()[n][d];
        }
    }
    let k = nodes.len() as f64;
    [p[0] / k, p[1] / k, p[2] / k]
}

pub(crate) fn label_boundary(mesh: &Mesh) -> Vec<BoundaryFace> {
    // sorted side nodes -> (original ordering, owning cells)
    let mut sides: HashMap<Vec<usize>, (Vec<usize>, Vec<usize>)> = HashMap::new();
    for (ci, cell) in mesh.cells().iter().enumerate() {
        for side in cell.shape.sides() {
            let nodes: Vec<usize> = side.iter().map(|&l| cell.nodes[l]).collect();
            let mut key = nodes.clone();
            key.sort_unstable();
            sides
                .entry(key)
                .or_insert_with(|| (nodes, Vec::new()))
                .1
                .push(ci);
        }
    }

    let mut candidates: Vec<(Vec<usize>, usize, Option<usize>)> = sides
        .into_values()
        .filter_map(|(nodes, owners)| match owners.as_slice() {
            [a] => Some((nodes, *a, None)),
            [a, b] if mesh.cells()[*a].region != mesh.cells()[*b].region => {
                Some((nodes, *a, Some(*b)))
            }
            _ => None,
        })
        .collect();
    // deterministic order regardless of hashing
    candidates.sort_by(|a, b| {
        let mut ka = a.0.clone();
        let mut kb = b.0.clone();
        ka.sort_unstable();
        kb.sort_unstable();
        ka.cmp(&kb)
    });

    candidates
        .into_par_iter()
        .map(|(nodes, cell, neighbor)| {
            let label = match neighbor {
                None => {
                    let c = side_centroid(mesh, &nodes);
                    mesh.face_rules()
                        .iter()
                        .find(|r| r.contains(&c, RULE_EPS))
                        .map(|r| r.label.clone())
                        .unwrap_or_else(|| {
                            format!("{}_Neumann", mesh.regions()[mesh.cells()[cell].region].name)
                        })
                }
                Some(other) => {
                    let mut names = [
                        mesh.regions()[mesh.cells()[cell].region].name.as_str(),
                        mesh.regions()[mesh.cells()[other].region].name.as_str(),
                    ];
                    names.sort_unstable();
                    format!("IF_{}_to_{}", names[0], names[1])
                }
            };
            BoundaryFace {
                nodes,
                label,
                cell,
                neighbor,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::mesh::{Cell, CellShape, FaceRule, Mesh};

    fn two_region_strip() -> Mesh {
        // [0,1]x[0,1] region a, [1,2]x[0,1] region b, one quad each
        let mut m = Mesh::new(2);
        let a = m.add_region("a", "Si");
        let b = m.add_region("b", "SiO2");
        for p in [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [2.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
            [2.0, 1.0, 0.0],
        ] {
            m.add_node(p);
        }
        m.add_cell(Cell::new(CellShape::Quad4, vec![0, 1, 4, 3], a)).unwrap();
        m.add_cell(Cell::new(CellShape::Quad4, vec![1, 2, 5, 4], b)).unwrap();
        m.add_face_rule(FaceRule::new(
            "left",
            [-1.0, -1.0, -1.0],
            [0.0, 2.0, 1.0],
        ));
        m
    }

    #[test]
    fn interface_and_rule_labels() {
        let mut m = two_region_strip();
        m.prepare().unwrap();
        let labels = m.boundary_labels().unwrap();
        assert!(labels.contains(&"IF_a_to_b".to_string()));
        assert!(labels.contains(&"left".to_string()));
        assert!(labels.contains(&"a_Neumann".to_string()));
        assert!(labels.contains(&"b_Neumann".to_string()));
        let faces = m.boundary_faces().unwrap();
        // 6 exterior edges + 1 interface
        assert_eq!(faces.len(), 7);
        assert_eq!(faces.iter().filter(|f| f.label == "left").count(), 1);
    }
}
