//! Error-driven flagging and red/green refinement.
//!
//! Refinement is "red" (regular subdivision through edge midpoints) for
//! flagged cells. Closure keeps the mesh conforming: triangles and quads
//! with two or more split edges are promoted to red, tetrahedra with any
//! split edge are promoted, and the remaining cells with a single split
//! edge are bisected ("green"). Every refined cell records a `Family` so
//! hierarchical coarsening can restore the parent later.

use crate::error::{MeshError, MeshResult};
use crate::mesh::{Cell, CellShape, Family, Mesh};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefineFlag {
    Keep,
    Refine,
    Coarsen,
}

/// Cell selection policy; each carries independent refine/coarsen cutoffs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FlagPolicy {
    /// Refine cells with error >= (1 - refine) * max; coarsen cells with
    /// error <= min + coarsen * (max - min).
    ErrorFraction { refine: f64, coarsen: f64 },
    /// Refine the `refine * n` largest errors; coarsen the `coarsen * n`
    /// smallest.
    CellFraction { refine: f64, coarsen: f64 },
    /// Refine above `refine`; coarsen below `coarsen`.
    ErrorThreshold { refine: f64, coarsen: f64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefineStats {
    pub cells_before: usize,
    pub cells_after: usize,
    pub refined: usize,
    pub coarsened: usize,
}

/// Combine the requested policies into one flag per cell. Refinement wins
/// when policies disagree.
pub fn flag_cells(errors: &[f64], policies: &[FlagPolicy]) -> MeshResult<Vec<RefineFlag>> {
    if policies.is_empty() {
        return Err(MeshError::NoFlagPolicy);
    }
    let n = errors.len();
    let mut flags = vec![RefineFlag::Keep; n];
    if n == 0 {
        return Ok(flags);
    }

    let max = errors.iter().copied().fold(f64::MIN, f64::max);
    let min = errors.iter().copied().fold(f64::MAX, f64::min);

    for policy in policies {
        match *policy {
            FlagPolicy::ErrorFraction { refine, coarsen } => {
                let refine_cut = (1.0 - refine.clamp(0.0, 1.0)) * max;
                let coarsen_cut = min + coarsen.clamp(0.0, 1.0) * (max - min);
                for (i, &e) in errors.iter().enumerate() {
                    if refine > 0.0 && e >= refine_cut && max > 0.0 {
                        mark(i, RefineFlag::Refine, &mut flags);
                    } else if coarsen > 0.0 && e <= coarsen_cut {
                        mark(i, RefineFlag::Coarsen, &mut flags);
                    }
                }
            }
            FlagPolicy::CellFraction { refine, coarsen } => {
                let mut order: Vec<usize> = (0..n).collect();
                order.sort_by(|&a, &b| errors[b].total_cmp(&errors[a]).then(a.cmp(&b)));
                let n_refine = ((refine.clamp(0.0, 1.0) * n as f64) as usize).min(n);
                let n_coarsen = ((coarsen.clamp(0.0, 1.0) * n as f64) as usize).min(n - n_refine);
                for &i in &order[..n_refine] {
                    mark(i, RefineFlag::Refine, &mut flags);
                }
                for &i in order.iter().rev().take(n_coarsen) {
                    mark(i, RefineFlag::Coarsen, &mut flags);
                }
            }
            FlagPolicy::ErrorThreshold { refine, coarsen } => {
                for (i, &e) in errors.iter().enumerate() {
                    if e > refine {
                        mark(i, RefineFlag::Refine, &mut flags);
                    } else if e < coarsen {
                        mark(i, RefineFlag::Coarsen, &mut flags);
                    }
                }
            }
        }
    }
    Ok(flags)
}

fn mark(i: usize, f: RefineFlag, flags: &mut [RefineFlag]) {
    match (flags[i], f) {
        (RefineFlag::Refine, _) => {}
        (_, RefineFlag::Refine) => flags[i] = RefineFlag::Refine,
        (RefineFlag::Keep, RefineFlag::Coarsen) => flags[i] = RefineFlag::Coarsen,
        _ => {}
    }
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b { (a, b) } else { (b, a) }
}

/// Conforming refinement of the flagged cells into a new, flat mesh.
/// Coarsening flags are ignored.
pub fn refine_conforming(mesh: &Mesh, flags: &[RefineFlag]) -> MeshResult<Mesh> {
    check_flags(mesh, flags)?;
    let mut out = mesh.clone();
    out.unprepare();
    let marked: Vec<bool> = flags.iter().map(|f| *f == RefineFlag::Refine).collect();
    let refined = refine_marked(&mut out, &marked);
    out.flatten();
    debug!(
        refined,
        before = mesh.n_cells(),
        after = out.n_cells(),
        "conforming refinement"
    );
    Ok(out)
}

/// Hierarchical coarsening followed by refinement, in place.
pub fn refine_and_coarsen(mesh: &mut Mesh, flags: &[RefineFlag]) -> MeshResult<RefineStats> {
    check_flags(mesh, flags)?;
    let cells_before = mesh.n_cells();
    let (coarsened, carried) = coarsen(mesh, flags);
    let marked: Vec<bool> = carried.iter().map(|f| *f == RefineFlag::Refine).collect();
    let refined = refine_marked(mesh, &marked);
    mesh.unprepare();
    Ok(RefineStats {
        cells_before,
        cells_after: mesh.n_cells(),
        refined,
        coarsened,
    })
}

/// Refine every cell `steps` times and drop the ancestry.
pub fn refine_uniformly(mesh: &mut Mesh, steps: usize) -> MeshResult<RefineStats> {
    let cells_before = mesh.n_cells();
    let mut refined = 0;
    for _ in 0..steps {
        let marked = vec![true; mesh.n_cells()];
        refined += refine_marked(mesh, &marked);
    }
    mesh.flatten();
    mesh.unprepare();
    Ok(RefineStats {
        cells_before,
        cells_after: mesh.n_cells(),
        refined,
        coarsened: 0,
    })
}

fn check_flags(mesh: &Mesh, flags: &[RefineFlag]) -> MeshResult<()> {
    if flags.len() != mesh.n_cells() {
        return Err(MeshError::FlagLength {
            flags: flags.len(),
            cells: mesh.n_cells(),
        });
    }
    Ok(())
}

/// Red/green refinement of `marked` cells (after closure). Returns the
/// number of cells that were subdivided.
fn refine_marked(mesh: &mut Mesh, marked: &[bool]) -> usize {
    let cells = mesh.cells().to_vec();
    let mut red = marked.to_vec();

    // closure: promote cells that cannot be bisected conformingly
    loop {
        let split: HashSet<(usize, usize)> = cells
            .iter()
            .zip(&red)
            .filter(|(_, r)| **r)
            .flat_map(|(c, _)| c.shape.edges().iter().map(|&(a, b)| edge_key(c.nodes[a], c.nodes[b])))
            .collect();
        let mut changed = false;
        for (i, c) in cells.iter().enumerate() {
            if red[i] {
                continue;
            }
            let hanging = c
                .shape
                .edges()
                .iter()
                .filter(|&&(a, b)| split.contains(&edge_key(c.nodes[a], c.nodes[b])))
                .count();
            let promote = match c.shape {
                CellShape::Tri3 | CellShape::Quad4 => hanging >= 2,
                CellShape::Tet4 => hanging >= 1,
            };
            if promote {
                red[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    if !red.iter().any(|&r| r) {
        return 0;
    }

    let mut midpoints: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    let mut midpoint = |mesh: &mut Mesh, a: usize, b: usize| -> usize {
        *midpoints.entry(edge_key(a, b)).or_insert_with(|| {
            let (pa, pb) = (mesh.nodes()[a], mesh.nodes()[b]);
            let nodes = mesh.nodes_mut();
            nodes.push([
                0.5 * (pa[0] + pb[0]),
                0.5 * (pa[1] + pb[1]),
                0.5 * (pa[2] + pb[2]),
            ]);
            nodes.len() - 1
        })
    };

    // split edges after closure, used to find green cells
    let split: HashSet<(usize, usize)> = cells
        .iter()
        .zip(&red)
        .filter(|(_, r)| **r)
        .flat_map(|(c, _)| c.shape.edges().iter().map(|&(a, b)| edge_key(c.nodes[a], c.nodes[b])))
        .collect();

    let mut new_cells = Vec::with_capacity(cells.len() * 4);
    let mut refined = 0;
    for (i, cell) in cells.iter().enumerate() {
        let n = &cell.nodes;
        let level = cell.level + 1;
        if red[i] {
            refined += 1;
            let family = mesh.families().len();
            let (children, created): (Vec<Vec<usize>>, Vec<usize>) = match cell.shape {
                CellShape::Tri3 => {
                    let m01 = midpoint(mesh, n[0], n[1]);
                    let m12 = midpoint(mesh, n[1], n[2]);
                    let m20 = midpoint(mesh, n[2], n[0]);
                    (
                        vec![
                            vec![n[0], m01, m20],
                            vec![m01, n[1], m12],
                            vec![m20, m12, n[2]],
                            vec![m01, m12, m20],
                        ],
                        vec![m01, m12, m20],
                    )
                }
                CellShape::Quad4 => {
                    let m01 = midpoint(mesh, n[0], n[1]);
                    let m12 = midpoint(mesh, n[1], n[2]);
                    let m23 = midpoint(mesh, n[2], n[3]);
                    let m30 = midpoint(mesh, n[3], n[0]);
                    let p = |k: usize| mesh.nodes()[n[k]];
                    let centre = {
                        let (a, b, c, d) = (p(0), p(1), p(2), p(3));
                        [
                            0.25 * (a[0] + b[0] + c[0] + d[0]),
                            0.25 * (a[1] + b[1] + c[1] + d[1]),
                            0.25 * (a[2] + b[2] + c[2] + d[2]),
                        ]
                    };
                    let c = {
                        let nodes = mesh.nodes_mut();
                        nodes.push(centre);
                        nodes.len() - 1
                    };
                    (
                        vec![
                            vec![n[0], m01, c, m30],
                            vec![m01, n[1], m12, c],
                            vec![c, m12, n[2], m23],
                            vec![m30, c, m23, n[3]],
                        ],
                        vec![m01, m12, m23, m30, c],
                    )
                }
                CellShape::Tet4 => {
                    let m01 = midpoint(mesh, n[0], n[1]);
                    let m02 = midpoint(mesh, n[0], n[2]);
                    let m03 = midpoint(mesh, n[0], n[3]);
                    let m12 = midpoint(mesh, n[1], n[2]);
                    let m13 = midpoint(mesh, n[1], n[3]);
                    let m23 = midpoint(mesh, n[2], n[3]);
                    (
                        vec![
                            vec![n[0], m01, m02, m03],
                            vec![m01, n[1], m12, m13],
                            vec![m02, m12, n[2], m23],
                            vec![m03, m13, m23, n[3]],
                            // inner octahedron split along m02-m13
                            vec![m02, m13, m01, m03],
                            vec![m02, m13, m03, m23],
                            vec![m02, m13, m23, m12],
                            vec![m02, m13, m12, m01],
                        ],
                        vec![m01, m02, m03, m12, m13, m23],
                    )
                }
            };
            let size = children.len();
            for nodes in children {
                new_cells.push(Cell {
                    shape: cell.shape,
                    nodes,
                    region: cell.region,
                    level,
                    family: Some(family),
                });
            }
            mesh.families_mut().push(Family {
                parent: cell.clone(),
                created_nodes: created,
                size,
                green: false,
            });
            continue;
        }

        let hanging: Vec<usize> = cell
            .shape
            .edges()
            .iter()
            .enumerate()
            .filter(|(_, (a, b))| split.contains(&edge_key(n[*a], n[*b])))
            .map(|(k, _)| k)
            .collect();
        if let [edge] = hanging.as_slice() {
            refined += 1;
            let family = mesh.families().len();
            let (a, b) = cell.shape.edges()[*edge];
            let m = midpoint(mesh, n[a], n[b]);
            let children: Vec<Vec<usize>> = match cell.shape {
                CellShape::Tri3 => {
                    let c = 3 - a - b;
                    vec![vec![n[a], m, n[c]], vec![m, n[b], n[c]]]
                }
                CellShape::Quad4 => {
                    // edge (k, k+1): fan from the midpoint
                    let k = a;
                    let v = |o: usize| n[(k + o) % 4];
                    vec![vec![m, v(1), v(2)], vec![m, v(2), v(3)], vec![m, v(3), v(0)]]
                }
                CellShape::Tet4 => unreachable!("tetrahedra with a split edge are promoted"),
            };
            let size = children.len();
            for nodes in children {
                new_cells.push(Cell {
                    shape: CellShape::Tri3,
                    nodes,
                    region: cell.region,
                    level,
                    family: Some(family),
                });
            }
            mesh.families_mut().push(Family {
                parent: cell.clone(),
                created_nodes: vec![m],
                size,
                green: true,
            });
        } else {
            new_cells.push(cell.clone());
        }
    }

    *mesh.cells_mut() = new_cells;
    refined
}

/// Restore parents of sibling groups whose members are all flagged for
/// coarsening and whose created nodes are not needed outside the group.
/// Green closure groups hanging off a coarsened group are removed with it.
///
/// Returns the number of removed groups and the flags carried over to the
/// resulting cell list.
fn coarsen(mesh: &mut Mesh, flags: &[RefineFlag]) -> (usize, Vec<RefineFlag>) {
    let cells = mesh.cells().to_vec();
    let families = mesh.families().to_vec();

    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, c) in cells.iter().enumerate() {
        if let Some(f) = c.family {
            members.entry(f).or_default().push(i);
        }
    }
    let complete = |f: usize| members.get(&f).is_some_and(|m| m.len() == families[f].size);
    let users = mesh.node_cells();

    // red groups fully flagged for coarsening
    let mut candidates: HashSet<usize> = members
        .iter()
        .filter(|&(&f, m)| {
            !families[f].green && complete(f) && m.iter().all(|&c| flags[c] == RefineFlag::Coarsen)
        })
        .map(|(&f, _)| f)
        .collect();

    // a created node may only be shared with another coarsening group or
    // with a green group bisecting the edge it sits on
    let green_on = |g: usize, m: usize| {
        families[g].green && families[g].created_nodes == [m] && complete(g)
    };
    loop {
        let blocked: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&fid| {
                families[fid].created_nodes.iter().any(|&m| {
                    users[m].iter().any(|&u| match cells[u].family {
                        Some(g) => !candidates.contains(&g) && !green_on(g, m),
                        None => true,
                    })
                })
            })
            .collect();
        if blocked.is_empty() {
            break;
        }
        for fid in blocked {
            candidates.remove(&fid);
        }
    }

    let mut remove = candidates.clone();
    for &fid in &candidates {
        for &m in &families[fid].created_nodes {
            for &u in &users[m] {
                if let Some(g) = cells[u].family {
                    if green_on(g, m) {
                        remove.insert(g);
                    }
                }
            }
        }
    }

    if remove.is_empty() {
        return (0, flags.to_vec());
    }

    // rebuild the cell list, emitting each restored parent once
    let mut emitted: HashSet<usize> = HashSet::new();
    let mut new_cells = Vec::with_capacity(cells.len());
    let mut new_flags = Vec::with_capacity(cells.len());
    for (i, c) in cells.iter().enumerate() {
        match c.family {
            Some(f) if remove.contains(&f) => {
                if emitted.insert(f) {
                    new_cells.push(families[f].parent.clone());
                    new_flags.push(RefineFlag::Keep);
                }
            }
            _ => {
                new_cells.push(c.clone());
                new_flags.push(flags[i]);
            }
        }
    }

    // compact the family table
    let mut remap = vec![None; families.len()];
    let mut kept = Vec::with_capacity(families.len() - remove.len());
    for (i, f) in families.into_iter().enumerate() {
        if !remove.contains(&i) {
            remap[i] = Some(kept.len());
            kept.push(f);
        }
    }
    let fix = |f: &mut Option<usize>| {
        if let Some(old) = *f {
            *f = remap[old];
        }
    };
    for c in &mut new_cells {
        fix(&mut c.family);
    }
    for f in &mut kept {
        fix(&mut f.parent.family);
    }

    let count = remove.len();
    *mesh.cells_mut() = new_cells;
    *mesh.families_mut() = kept;
    (count, new_flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use proptest::prelude::*;

    fn grid(nx: usize, ny: usize, shape: CellShape) -> Mesh {
        let mut m = Mesh::new(2);
        let r = m.add_region("si", "Si");
        for j in 0..=ny {
            for i in 0..=nx {
                m.add_node([i as f64, j as f64, 0.0]);
            }
        }
        let id = |i: usize, j: usize| j * (nx + 1) + i;
        for j in 0..ny {
            for i in 0..nx {
                let (a, b, c, d) = (id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1));
                match shape {
                    CellShape::Quad4 => {
                        m.add_cell(Cell::new(shape, vec![a, b, c, d], r)).unwrap();
                    }
                    _ => {
                        m.add_cell(Cell::new(CellShape::Tri3, vec![a, b, c], r)).unwrap();
                        m.add_cell(Cell::new(CellShape::Tri3, vec![a, c, d], r)).unwrap();
                    }
                }
            }
        }
        m
    }

    fn total_measure(m: &Mesh) -> f64 {
        (0..m.n_cells()).map(|c| m.cell_measure(c)).sum()
    }

    /// Every interior side is shared by exactly two cells.
    fn is_conforming(m: &Mesh) -> bool {
        let mut count: HashMap<Vec<usize>, usize> = HashMap::new();
        for c in m.cells() {
            for s in c.shape.sides() {
                let mut k: Vec<usize> = s.iter().map(|&l| c.nodes[l]).collect();
                k.sort_unstable();
                *count.entry(k).or_default() += 1;
            }
        }
        // boundary sides lie on the outer square; all others must be paired
        let mut bbox_lo = [f64::MAX; 2];
        let mut bbox_hi = [f64::MIN; 2];
        for p in m.nodes() {
            for d in 0..2 {
                bbox_lo[d] = bbox_lo[d].min(p[d]);
                bbox_hi[d] = bbox_hi[d].max(p[d]);
            }
        }
        count.iter().all(|(k, &n)| {
            if n == 2 {
                return true;
            }
            let (a, b) = (m.nodes()[k[0]], m.nodes()[k[1]]);
            (0..2).any(|d| {
                ((a[d] - bbox_lo[d]).abs() < 1e-12 && (b[d] - bbox_lo[d]).abs() < 1e-12)
                    || ((a[d] - bbox_hi[d]).abs() < 1e-12 && (b[d] - bbox_hi[d]).abs() < 1e-12)
            })
        })
    }

    #[test]
    fn flag_cells_requires_a_policy() {
        assert_eq!(flag_cells(&[1.0], &[]).unwrap_err(), MeshError::NoFlagPolicy);
    }

    #[test]
    fn error_fraction_flags_top_cells() {
        let errors = [0.0, 0.2, 0.5, 0.95, 1.0];
        let flags = flag_cells(
            &errors,
            &[FlagPolicy::ErrorFraction {
                refine: 0.1,
                coarsen: 0.1,
            }],
        )
        .unwrap();
        assert_eq!(
            flags,
            vec![
                RefineFlag::Coarsen,
                RefineFlag::Keep,
                RefineFlag::Keep,
                RefineFlag::Refine,
                RefineFlag::Refine
            ]
        );
    }

    #[test]
    fn refinement_wins_over_coarsening() {
        let errors = [0.0, 1.0];
        let flags = flag_cells(
            &errors,
            &[
                FlagPolicy::ErrorThreshold {
                    refine: 10.0,
                    coarsen: 0.5,
                },
                FlagPolicy::CellFraction {
                    refine: 1.0,
                    coarsen: 0.0,
                },
            ],
        )
        .unwrap();
        assert_eq!(flags, vec![RefineFlag::Refine, RefineFlag::Refine]);
    }

    #[test]
    fn single_red_triangle_gets_green_neighbours() {
        let m = grid(2, 2, CellShape::Tri3);
        let mut flags = vec![RefineFlag::Keep; m.n_cells()];
        flags[3] = RefineFlag::Refine;
        let out = refine_conforming(&m, &flags).unwrap();
        assert!(out.n_cells() > m.n_cells());
        assert!(is_conforming(&out));
        assert!((total_measure(&out) - 4.0).abs() < 1e-12);
        assert!(out.families().is_empty());
    }

    #[test]
    fn quads_close_with_triangles() {
        let m = grid(3, 3, CellShape::Quad4);
        let mut flags = vec![RefineFlag::Keep; m.n_cells()];
        flags[4] = RefineFlag::Refine;
        let out = refine_conforming(&m, &flags).unwrap();
        // centre quad -> 4 quads, four edge neighbours -> 3 triangles each
        assert_eq!(out.n_cells(), 9 - 1 + 4 + 4 * 2);
        assert!(is_conforming(&out));
        assert!((total_measure(&out) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn hierarchical_round_trip_restores_mesh() {
        let mut m = grid(2, 2, CellShape::Tri3);
        let original = m.n_cells();
        let mut flags = vec![RefineFlag::Keep; m.n_cells()];
        flags[0] = RefineFlag::Refine;
        let stats = refine_and_coarsen(&mut m, &flags).unwrap();
        assert!(stats.cells_after > original);
        assert!(is_conforming(&m));

        let flags = vec![RefineFlag::Coarsen; m.n_cells()];
        let stats = refine_and_coarsen(&mut m, &flags).unwrap();
        assert!(stats.coarsened >= 1);
        assert_eq!(m.n_cells(), original);
        assert!(m.families().is_empty());
        m.prepare().unwrap();
        assert_eq!(m.n_nodes(), 9);
    }

    #[test]
    fn coarsening_blocked_by_refined_neighbour() {
        let mut m = grid(2, 1, CellShape::Quad4);
        let flags = vec![RefineFlag::Refine, RefineFlag::Refine];
        refine_and_coarsen(&mut m, &flags).unwrap();
        assert_eq!(m.n_cells(), 8);
        // coarsen only the left family; its midpoints on the shared edge are
        // used by the right family, so it must stay
        let flags: Vec<RefineFlag> = m
            .cells()
            .iter()
            .map(|c| {
                if c.family == Some(0) {
                    RefineFlag::Coarsen
                } else {
                    RefineFlag::Keep
                }
            })
            .collect();
        let stats = refine_and_coarsen(&mut m, &flags).unwrap();
        assert_eq!(stats.coarsened, 0);
        assert_eq!(m.n_cells(), 8);
    }

    #[test]
    fn uniform_refinement_counts() {
        let mut m = grid(1, 1, CellShape::Quad4);
        let stats = refine_uniformly(&mut m, 2).unwrap();
        assert_eq!(stats.cells_after, 16);
        assert!(m.families().is_empty());
    }

    #[test]
    fn tetrahedron_red_refinement_preserves_volume() {
        let mut m = Mesh::new(3);
        let r = m.add_region("si", "Si");
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
            m.add_node(p);
        }
        m.add_cell(Cell::new(CellShape::Tet4, vec![0, 1, 2, 3], r)).unwrap();
        let out = refine_conforming(&m, &[RefineFlag::Refine]).unwrap();
        assert_eq!(out.n_cells(), 8);
        assert!((total_measure(&out) - 1.0 / 6.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn pure_refinement_never_reduces_cells(
            errors in proptest::collection::vec(0.0f64..1.0, 8),
            frac in 0.0f64..1.0,
        ) {
            let m = grid(2, 2, CellShape::Tri3);
            let flags = flag_cells(&errors, &[FlagPolicy::ErrorFraction { refine: frac, coarsen: 0.0 }]).unwrap();
            prop_assert!(flags.iter().all(|f| *f != RefineFlag::Coarsen));
            let out = refine_conforming(&m, &flags).unwrap();
            prop_assert!(out.n_cells() >= m.n_cells());
            prop_assert!(is_conforming(&out));
            prop_assert!((total_measure(&out) - 4.0).abs() < 1e-9);
        }
    }
}
