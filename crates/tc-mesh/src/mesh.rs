//! Mesh data model.

use crate::boundary;
use crate::error::{MeshError, MeshResult};

/// Node coordinate (2D meshes keep `z = 0`).
pub type Point = [f64; 3];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellShape {
    Tri3,
    Quad4,
    Tet4,
}

impl CellShape {
    pub fn n_nodes(self) -> usize {
        match self {
            CellShape::Tri3 => 3,
            CellShape::Quad4 => 4,
            CellShape::Tet4 => 4,
        }
    }

    pub fn dim(self) -> usize {
        match self {
            CellShape::Tri3 | CellShape::Quad4 => 2,
            CellShape::Tet4 => 3,
        }
    }

    /// Local node pairs forming the cell edges.
    pub fn edges(self) -> &'static [(usize, usize)] {
        match self {
            CellShape::Tri3 => &[(0, 1), (1, 2), (2, 0)],
            CellShape::Quad4 => &[(0, 1), (1, 2), (2, 3), (3, 0)],
            CellShape::Tet4 => &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)],
        }
    }

    /// Local node lists of the cell's sides (edges in 2D, faces in 3D).
    pub fn sides(self) -> &'static [&'static [usize]] {
        match self {
            CellShape::Tri3 => &[&[0, 1], &[1, 2], &[2, 0]],
            CellShape::Quad4 => &[&[0, 1], &[1, 2], &[2, 3], &[3, 0]],
            CellShape::Tet4 => &[&[0, 1, 2], &[0, 1, 3], &[0, 2, 3], &[1, 2, 3]],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CellShape::Tri3 => "tri3",
            CellShape::Quad4 => "quad4",
            CellShape::Tet4 => "tet4",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub shape: CellShape,
    pub nodes: Vec<usize>,
    pub region: usize,
    /// Refinement depth (0 for generator output).
    pub level: u32,
    /// Sibling group this cell was created in, if any.
    pub family: Option<usize>,
}

impl Cell {
    pub fn new(shape: CellShape, nodes: Vec<usize>, region: usize) -> Self {
        Self {
            shape,
            nodes,
            region,
            level: 0,
            family: None,
        }
    }
}

/// A group of sibling cells produced by refining `parent`.
#[derive(Clone, Debug, PartialEq)]
pub struct Family {
    pub parent: Cell,
    /// Nodes introduced for this refinement (edge midpoints, centers).
    pub created_nodes: Vec<usize>,
    pub size: usize,
    /// Closure (green) refinement, removable together with its red neighbour.
    pub green: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegionInfo {
    pub name: String,
    pub material: String,
}

/// Bounding box rule assigning a label to exterior boundary sides.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceRule {
    pub label: String,
    pub lo: Point,
    pub hi: Point,
    /// Test the point in (radius, y) coordinates (revolved meshes).
    pub radial: bool,
}

impl FaceRule {
    pub fn new(label: impl Into<String>, lo: Point, hi: Point) -> Self {
        Self {
            label: label.into(),
            lo,
            hi,
            radial: false,
        }
    }

    pub fn contains(&self, p: &Point, eps: f64) -> bool {
        let q = if self.radial {
            [(p[0] * p[0] + p[2] * p[2]).sqrt(), p[1], 0.0]
        } else {
            *p
        };
        (0..3).all(|d| q[d] >= self.lo[d] - eps && q[d] <= self.hi[d] + eps)
    }
}

/// A labelled boundary side: exterior (one cell) or region interface.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryFace {
    pub nodes: Vec<usize>,
    pub label: String,
    pub cell: usize,
    pub neighbor: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    dim: usize,
    nodes: Vec<Point>,
    cells: Vec<Cell>,
    regions: Vec<RegionInfo>,
    face_rules: Vec<FaceRule>,
    families: Vec<Family>,
    boundary: Vec<BoundaryFace>,
    prepared: bool,
}

impl Mesh {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            nodes: Vec::new(),
            cells: Vec::new(),
            regions: Vec::new(),
            face_rules: Vec::new(),
            families: Vec::new(),
            boundary: Vec::new(),
            prepared: false,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nodes(&self) -> &[Point] {
        &self.nodes
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }

    pub fn face_rules(&self) -> &[FaceRule] {
        &self.face_rules
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn add_node(&mut self, p: Point) -> usize {
        self.prepared = false;
        self.nodes.push(p);
        self.nodes.len() - 1
    }

    pub fn add_region(&mut self, name: impl Into<String>, material: impl Into<String>) -> usize {
        self.prepared = false;
        self.regions.push(RegionInfo {
            name: name.into(),
            material: material.into(),
        });
        self.regions.len() - 1
    }

    pub fn add_face_rule(&mut self, rule: FaceRule) {
        self.prepared = false;
        self.face_rules.push(rule);
    }

    pub fn add_cell(&mut self, cell: Cell) -> MeshResult<usize> {
        let index = self.cells.len();
        self.check_cell(index, &cell)?;
        self.prepared = false;
        self.cells.push(cell);
        Ok(index)
    }

    fn check_cell(&self, index: usize, cell: &Cell) -> MeshResult<()> {
        if cell.nodes.len() != cell.shape.n_nodes() || cell.shape.dim() != self.dim {
            return Err(MeshError::InvalidInput {
                what: format!(
                    "cell {} is {} with {} nodes in a {}D mesh",
                    index,
                    cell.shape.name(),
                    cell.nodes.len(),
                    self.dim
                ),
            });
        }
        if let Some(&node) = cell.nodes.iter().find(|&&n| n >= self.nodes.len()) {
            return Err(MeshError::NodeOob {
                cell: index,
                node,
                len: self.nodes.len(),
            });
        }
        if cell.region >= self.regions.len() {
            return Err(MeshError::RegionOob {
                cell: index,
                region: cell.region,
                len: self.regions.len(),
            });
        }
        Ok(())
    }

    pub fn region_index(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.name == name)
    }

    pub fn cell_centroid(&self, cell: usize) -> Point {
        let c = &self.cells[cell];
        let mut p = [0.0; 3];
        for &n in &c.nodes {
            for d in 0..3 {
                p[d] += self.nodes[n][d];
            }
        }
        let k = c.nodes.len() as f64;
        [p[0] / k, p[1] / k, p[2] / k]
    }

    /// Area (2D) or volume (3D) of a cell.
    pub fn cell_measure(&self, cell: usize) -> f64 {
        let c = &self.cells[cell];
        let p = |i: usize| self.nodes[c.nodes[i]];
        match c.shape {
            CellShape::Tri3 => tri_area(&p(0), &p(1), &p(2)),
            CellShape::Quad4 => tri_area(&p(0), &p(1), &p(2)) + tri_area(&p(0), &p(2), &p(3)),
            CellShape::Tet4 => tet_volume(&p(0), &p(1), &p(2), &p(3)),
        }
    }

    /// Cells (by index) containing each node.
    pub fn node_cells(&self) -> Vec<Vec<usize>> {
        let mut users = vec![Vec::new(); self.nodes.len()];
        for (i, c) in self.cells.iter().enumerate() {
            for &n in &c.nodes {
                users[n].push(i);
            }
        }
        users
    }

    /// Labelled boundary sides; only available on a prepared mesh.
    pub fn boundary_faces(&self) -> MeshResult<&[BoundaryFace]> {
        if !self.prepared {
            return Err(MeshError::NotPrepared);
        }
        Ok(&self.boundary)
    }

    /// Sorted, de-duplicated boundary labels of a prepared mesh.
    pub fn boundary_labels(&self) -> MeshResult<Vec<String>> {
        let mut labels: Vec<String> = self
            .boundary_faces()?
            .iter()
            .map(|f| f.label.clone())
            .collect();
        labels.sort();
        labels.dedup();
        Ok(labels)
    }

    /// Compact unused nodes, label boundary sides and mark the mesh ready
    /// for field attachment.
    pub fn prepare(&mut self) -> MeshResult<()> {
        if self.cells.is_empty() {
            return Err(MeshError::InvalidInput {
                what: "mesh has no cells".to_string(),
            });
        }
        for (i, c) in self.cells.iter().enumerate() {
            self.check_cell(i, c)?;
        }
        self.compact_nodes();
        self.boundary = boundary::label_boundary(self);
        self.prepared = true;
        Ok(())
    }

    /// Mark the mesh as needing another broadcast before use.
    pub fn unprepare(&mut self) {
        self.prepared = false;
        self.boundary.clear();
    }

    /// Drop refinement ancestry; every cell becomes a root cell.
    pub fn flatten(&mut self) {
        self.families.clear();
        for c in &mut self.cells {
            c.family = None;
        }
    }

    fn compact_nodes(&mut self) {
        let mut used = vec![false; self.nodes.len()];
        for c in &self.cells {
            for &n in &c.nodes {
                used[n] = true;
            }
        }
        for f in &self.families {
            for &n in f.parent.nodes.iter().chain(f.created_nodes.iter()) {
                used[n] = true;
            }
        }
        if used.iter().all(|&u| u) {
            return;
        }
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (i, p) in self.nodes.iter().enumerate() {
            if used[i] {
                remap[i] = nodes.len();
                nodes.push(*p);
            }
        }
        self.nodes = nodes;
        for c in &mut self.cells {
            for n in &mut c.nodes {
                *n = remap[*n];
            }
        }
        for f in &mut self.families {
            for n in f.parent.nodes.iter_mut().chain(f.created_nodes.iter_mut()) {
                *n = remap[*n];
            }
        }
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<Point> {
        self.prepared = false;
        &mut self.nodes
    }

    pub(crate) fn cells_mut(&mut self) -> &mut Vec<Cell> {
        self.prepared = false;
        &mut self.cells
    }

    pub(crate) fn families_mut(&mut self) -> &mut Vec<Family> {
        self.prepared = false;
        &mut self.families
    }

    pub(crate) fn face_rules_mut(&mut self) -> &mut Vec<FaceRule> {
        self.prepared = false;
        &mut self.face_rules
    }

    pub(crate) fn set_dim(&mut self, dim: usize) {
        self.prepared = false;
        self.dim = dim;
    }

    pub(crate) fn set_regions(&mut self, regions: Vec<RegionInfo>) {
        self.prepared = false;
        self.regions = regions;
    }
}

pub fn tri_area(a: &Point, b: &Point, c: &Point) -> f64 {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let cx = u[1] * v[2] - u[2] * v[1];
    let cy = u[2] * v[0] - u[0] * v[2];
    let cz = u[0] * v[1] - u[1] * v[0];
    0.5 * (cx * cx + cy * cy + cz * cz).sqrt()
}

pub fn tet_volume(a: &Point, b: &Point, c: &Point, d: &Point) -> f64 {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let w = [d[0] - a[0], d[1] - a[1], d[2] - a[2]];
    let det = u[0] * (v[1] * w[2] - v[2] * w[1]) - u[1] * (v[0] * w[2] - v[2] * w[0])
        + u[2] * (v[0] * w[1] - v[1] * w[0]);
    det.abs() / 6.0
}
