//! Mesh generator capability and the structured rectilinear generators.

use crate::error::{MeshError, MeshResult};
use crate::mesh::{Cell, CellShape, FaceRule, Mesh, Point};
use crate::refine::{RefineFlag, refine_conforming};
use tc_deck::{Card, Deck};
use tracing::debug;

/// A mesh generator selected once per run by the MESH card's type tag.
pub trait MeshGenerator: Send {
    fn name(&self) -> &'static str;

    /// Build the initial (unprepared) mesh from the deck.
    fn generate(&mut self, deck: &Deck) -> MeshResult<Mesh>;

    /// Conforming remesh honouring the refine flags; returns a flat mesh.
    fn refine(&mut self, mesh: &Mesh, flags: &[RefineFlag]) -> MeshResult<Mesh>;
}

/// Generator types that exist in the deck vocabulary but have no
/// implementation here.
const KNOWN_UNSUPPORTED: &[&str] = &["s_prism6", "s_hex8", "c_2d", "c_3d"];

pub fn generator_for(kind: &str) -> MeshResult<Box<dyn MeshGenerator>> {
    let shape = match kind.to_ascii_lowercase().as_str() {
        "s_tri3" => CellShape::Tri3,
        "s_quad4" => CellShape::Quad4,
        "s_tet4" => CellShape::Tet4,
        other => {
            if KNOWN_UNSUPPORTED.contains(&other) {
                debug!(kind = other, "recognised but unavailable mesh generator");
            }
            return Err(MeshError::UnsupportedGenerator {
                kind: kind.to_string(),
            });
        }
    };
    Ok(Box::new(StructuredGenerator::new(shape)))
}

/// Tensor-product grid generator driven by X.MESH/Y.MESH/Z.MESH, REGION and
/// FACE cards.
#[derive(Debug, Clone)]
pub struct StructuredGenerator {
    shape: CellShape,
}

impl StructuredGenerator {
    pub fn new(shape: CellShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> CellShape {
        self.shape
    }
}

const AXES: [&str; 3] = ["x", "y", "z"];

fn axis_coordinates(deck: &Deck, axis: usize) -> MeshResult<Vec<f64>> {
    let a = AXES[axis];
    let key = format!("{}.MESH", a.to_ascii_uppercase());
    let mut coords: Vec<f64> = Vec::new();
    let mut cursor = 0.0;
    for card in deck.cards_with_key(&key) {
        let lo = card.get_real(&format!("{a}.min"), cursor)?;
        let hi = if card.is_parameter_exist(&format!("{a}.max")) {
            card.get_real(&format!("{a}.max"), lo)?
        } else {
            lo + card.get_real("width", 1.0)?
        };
        let n = card.get_int("n.spaces", 1)?;
        let ratio = card.get_real("ratio", 1.0)?;
        if hi <= lo || n < 1 || ratio <= 0.0 {
            return Err(MeshError::InvalidInput {
                what: format!(
                    "{}: {key} needs max > min, n.spaces >= 1, ratio > 0",
                    card.location
                ),
            });
        }
        let n = n as usize;
        let weights: Vec<f64> = (0..n).map(|k| ratio.powi(k as i32)).collect();
        let total: f64 = weights.iter().sum();
        let mut x = lo;
        if coords.last().is_none_or(|&last| (last - lo).abs() > 1e-12) {
            coords.push(lo);
        }
        for (k, w) in weights.iter().enumerate() {
            x += (hi - lo) * w / total;
            coords.push(if k + 1 == n { hi } else { x });
        }
        cursor = hi;
    }
    if coords.len() < 2 {
        return Err(MeshError::InvalidInput {
            what: format!("no {key} card defines the {a} axis"),
        });
    }
    coords.sort_by(f64::total_cmp);
    coords.dedup_by(|b, a| (*b - *a).abs() <= 1e-12);
    Ok(coords)
}

fn card_box(card: &Card) -> MeshResult<(Point, Point)> {
    let mut lo = [f64::MIN; 3];
    let mut hi = [f64::MAX; 3];
    for (d, a) in AXES.iter().enumerate() {
        lo[d] = card.get_real(&format!("{a}.min"), f64::MIN)?;
        hi[d] = card.get_real(&format!("{a}.max"), f64::MAX)?;
    }
    Ok((lo, hi))
}

fn inside(p: &Point, lo: &Point, hi: &Point) -> bool {
    (0..3).all(|d| p[d] >= lo[d] && p[d] <= hi[d])
}

/// Kuhn subdivision of the unit cube into six tetrahedra sharing the main
/// diagonal; neighbouring cubes agree on every shared face.
const KUHN_PATHS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

impl MeshGenerator for StructuredGenerator {
    fn name(&self) -> &'static str {
        match self.shape {
            CellShape::Tri3 => "s_tri3",
            CellShape::Quad4 => "s_quad4",
            CellShape::Tet4 => "s_tet4",
        }
    }

    fn generate(&mut self, deck: &Deck) -> MeshResult<Mesh> {
        let dim = self.shape.dim();
        let xs = axis_coordinates(deck, 0)?;
        let ys = axis_coordinates(deck, 1)?;
        let zs = if dim == 3 {
            axis_coordinates(deck, 2)?
        } else {
            vec![0.0]
        };

        let mut mesh = Mesh::new(dim);
        let mut region_boxes = Vec::new();
        for card in deck.cards_with_key("REGION") {
            let label = card.require_string("label")?;
            let material = card.require_string("material")?;
            if mesh.region_index(&label).is_some() {
                return Err(MeshError::InvalidInput {
                    what: format!("{}: duplicate region '{label}'", card.location),
                });
            }
            let idx = mesh.add_region(label, material);
            region_boxes.push((idx, card_box(card)?));
        }
        if region_boxes.is_empty() {
            return Err(MeshError::InvalidInput {
                what: "at least one REGION card is required".to_string(),
            });
        }

        let (nx, ny, nz) = (xs.len(), ys.len(), zs.len());
        let node = |i: usize, j: usize, k: usize| (k * ny + j) * nx + i;
        for &z in &zs {
            for &y in &ys {
                for &x in &xs {
                    mesh.add_node([x, y, z]);
                }
            }
        }

        let kz = if dim == 3 { nz - 1 } else { 1 };
        for k in 0..kz {
            for j in 0..ny - 1 {
                for i in 0..nx - 1 {
                    let zc = if dim == 3 { 0.5 * (zs[k] + zs[k + 1]) } else { 0.0 };
                    let centre = [0.5 * (xs[i] + xs[i + 1]), 0.5 * (ys[j] + ys[j + 1]), zc];
                    // later REGION cards take precedence
                    let Some(region) = region_boxes
                        .iter()
                        .rev()
                        .find(|(_, (lo, hi))| inside(&centre, lo, hi))
                        .map(|(r, _)| *r)
                    else {
                        continue;
                    };
                    match self.shape {
                        CellShape::Tri3 => {
                            let (a, b, c, d) =
                                (node(i, j, 0), node(i + 1, j, 0), node(i + 1, j + 1, 0), node(i, j + 1, 0));
                            mesh.add_cell(Cell::new(CellShape::Tri3, vec![a, b, c], region))?;
                            mesh.add_cell(Cell::new(CellShape::Tri3, vec![a, c, d], region))?;
                        }
                        CellShape::Quad4 => {
                            let nodes = vec![
                                node(i, j, 0),
                                node(i + 1, j, 0),
                                node(i + 1, j + 1, 0),
                                node(i, j + 1, 0),
                            ];
                            mesh.add_cell(Cell::new(CellShape::Quad4, nodes, region))?;
                        }
                        CellShape::Tet4 => {
                            for path in KUHN_PATHS {
                                let mut ijk = [i, j, k];
                                let mut nodes = vec![node(i, j, k)];
                                for axis in path {
                                    ijk[axis] += 1;
                                    nodes.push(node(ijk[0], ijk[1], ijk[2]));
                                }
                                mesh.add_cell(Cell::new(CellShape::Tet4, nodes, region))?;
                            }
                        }
                    }
                }
            }
        }
        if mesh.n_cells() == 0 {
            return Err(MeshError::InvalidInput {
                what: "no grid cell lies inside any REGION".to_string(),
            });
        }

        let extent_lo = [xs[0], ys[0], zs[0]];
        let extent_hi = [xs[nx - 1], ys[ny - 1], zs[nz - 1]];
        for card in deck.cards_with_key("FACE") {
            let label = card.require_string("label")?;
            let (mut lo, mut hi) = card_box(card)?;
            if card.is_parameter_exist("location") {
                let loc = card.get_enum("location", "")?;
                let (axis, at) = match loc.as_str() {
                    "left" => (0, extent_lo[0]),
                    "right" => (0, extent_hi[0]),
                    "bottom" => (1, extent_lo[1]),
                    "top" => (1, extent_hi[1]),
                    "front" if dim == 3 => (2, extent_lo[2]),
                    "back" if dim == 3 => (2, extent_hi[2]),
                    _ => {
                        return Err(MeshError::InvalidInput {
                            what: format!("{}: unknown FACE location '{loc}'", card.location),
                        });
                    }
                };
                lo[axis] = at;
                hi[axis] = at;
            }
            mesh.add_face_rule(FaceRule::new(label, lo, hi));
        }

        debug!(
            generator = self.name(),
            nodes = mesh.n_nodes(),
            cells = mesh.n_cells(),
            "structured mesh generated"
        );
        Ok(mesh)
    }

    fn refine(&mut self, mesh: &Mesh, flags: &[RefineFlag]) -> MeshResult<Mesh> {
        refine_conforming(mesh, flags)
    }
}
