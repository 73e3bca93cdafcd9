//! Native snapshot format and boundary/node information exports.
//!
//! A snapshot is a JSON document with the flat mesh, every region variable
//! and the electrode circuit state, enough to rebuild the system elsewhere.

use crate::boundary::ExternalCircuit;
use crate::error::{SystemError, SystemResult};
use crate::system::SimulationSystem;
use crate::units::length_scale;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tc_mesh::{Cell, CellShape, FaceRule, Mesh, Point};

pub const SNAPSHOT_FORMAT: &str = "tcadctl-snapshot-1";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub shape: String,
    pub nodes: Vec<usize>,
    pub region: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub label: String,
    pub lo: Point,
    pub hi: Point,
    #[serde(default)]
    pub radial: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshRecord {
    pub dim: usize,
    pub nodes: Vec<Point>,
    pub cells: Vec<CellRecord>,
    /// (name, material) per region.
    pub regions: Vec<(String, String)>,
    #[serde(default)]
    pub faces: Vec<FaceRecord>,
}

fn shape_from_name(name: &str) -> SystemResult<CellShape> {
    [CellShape::Tri3, CellShape::Quad4, CellShape::Tet4]
        .into_iter()
        .find(|s| s.name() == name)
        .ok_or_else(|| SystemError::InvalidInput {
            what: format!("unknown cell shape {name} in snapshot"),
        })
}

impl MeshRecord {
    pub fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            dim: mesh.dim(),
            nodes: mesh.nodes().to_vec(),
            cells: mesh
                .cells()
                .iter()
                .map(|c| CellRecord {
                    shape: c.shape.name().to_string(),
                    nodes: c.nodes.clone(),
                    region: c.region,
                })
                .collect(),
            regions: mesh
                .regions()
                .iter()
                .map(|r| (r.name.clone(), r.material.clone()))
                .collect(),
            faces: mesh
                .face_rules()
                .iter()
                .map(|f| FaceRecord {
                    label: f.label.clone(),
                    lo: f.lo,
                    hi: f.hi,
                    radial: f.radial,
                })
                .collect(),
        }
    }

    /// Rebuild an unprepared mesh; cell references are validated.
    pub fn to_mesh(&self) -> SystemResult<Mesh> {
        let mut mesh = Mesh::new(self.dim);
        for p in &self.nodes {
            mesh.add_node(*p);
        }
        for (name, material) in &self.regions {
            mesh.add_region(name.clone(), material.clone());
        }
        for f in &self.faces {
            let mut rule = FaceRule::new(f.label.clone(), f.lo, f.hi);
            rule.radial = f.radial;
            mesh.add_face_rule(rule);
        }
        for c in &self.cells {
            mesh.add_cell(Cell::new(shape_from_name(&c.shape)?, c.nodes.clone(), c.region))?;
        }
        Ok(mesh)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub name: String,
    pub variables: BTreeMap<String, Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: String,
    pub mesh: MeshRecord,
    pub regions: Vec<RegionRecord>,
    /// Electrode name to circuit state.
    pub electrodes: BTreeMap<String, ExternalCircuit>,
}

impl Snapshot {
    pub fn capture(system: &SimulationSystem) -> SystemResult<Self> {
        let mesh = system.mesh()?;
        let regions = system
            .regions()?
            .iter()
            .map(|r| {
                let variables = r
                    .variable_names()
                    .filter_map(|v| r.variable(v).ok().map(|vals| (v.to_string(), vals.to_vec())))
                    .collect();
                RegionRecord {
                    name: r.name().to_string(),
                    variables,
                }
            })
            .collect();
        let electrodes = system
            .boundaries()?
            .iter()
            .filter(|b| b.is_electrode())
            .map(|b| (b.name().to_string(), b.circuit.clone()))
            .collect();
        Ok(Self {
            format: SNAPSHOT_FORMAT.to_string(),
            mesh: MeshRecord::from_mesh(mesh),
            regions,
            electrodes,
        })
    }

    pub fn save(&self, path: &Path) -> SystemResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read and check a snapshot file. Nothing is mutated here, so a bad
    /// file leaves the running system untouched.
    pub fn load(path: &Path) -> SystemResult<Self> {
        if !path.is_file() {
            return Err(SystemError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("snapshot file {} not found", path.display()),
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(SystemError::InvalidInput {
                what: format!("{} is not a {SNAPSHOT_FORMAT} file", path.display()),
            });
        }
        // validates cell references before any caller touches its state
        snapshot.mesh.to_mesh()?;
        Ok(snapshot)
    }
}

/// Boundary table: name, kind, electrode flag, contact, sizes and regions.
pub fn bc_info(system: &SimulationSystem) -> SystemResult<String> {
    let mesh = system.mesh()?;
    let mut out = String::new();
    let _ = writeln!(out, "# name kind electrode contact faces nodes regions");
    for b in system.boundaries()? {
        let regions: Vec<&str> = b
            .regions()
            .iter()
            .filter_map(|&r| mesh.regions().get(r).map(|info| info.name.as_str()))
            .collect();
        let _ = writeln!(
            out,
            "{} {} {} {} {} {} {}",
            b.name(),
            b.kind().name(),
            b.is_electrode(),
            b.contact().unwrap_or("-"),
            b.faces().len(),
            b.nodes().len(),
            regions.join(",")
        );
    }
    Ok(out)
}

/// Node coordinates scaled to `lunit`, optionally prefixed by node index.
pub fn node_info(system: &SimulationSystem, lunit: &str, numbering: bool) -> SystemResult<String> {
    let scale = length_scale(lunit)?;
    let mesh = system.mesh()?;
    let mut out = String::new();
    let _ = writeln!(out, "# {} nodes, unit {lunit}", mesh.n_nodes());
    for (i, p) in mesh.nodes().iter().enumerate() {
        let coords: Vec<String> = p[..mesh.dim()]
            .iter()
            .map(|c| format!("{:.6e}", c * scale))
            .collect();
        if numbering {
            let _ = writeln!(out, "{i} {}", coords.join(" "));
        } else {
            let _ = writeln!(out, "{}", coords.join(" "));
        }
    }
    Ok(out)
}
