//! The simulation system: regions, boundaries and sources on a prepared
//! mesh.

use crate::boundary::{Boundary, ExternalCircuit, default_kind};
use crate::error::{SystemError, SystemResult};
use crate::estimate::{Measure, estimate_error};
use crate::field::FieldSource;
use crate::material::{Compound, MaterialClass, material};
use crate::model::AdvancedModel;
use crate::profile::{DopingAnalytic, MoleAnalytic, ProfileSolver};
use crate::region::{PmiSelection, Region};
use crate::snapshot::Snapshot;
use crate::source::{Attachment, Source, SourceSet};
use crate::units::unit_factor;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tc_deck::Deck;
use tc_interp::{InterpolationLaw, Interpolator, interpolator_for};
use tc_mesh::mesh::tri_area;
use tc_mesh::{Mesh, Point};
use tracing::{debug, info, warn};

/// Converged linearisation point of the last steady-state solve.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatingPoint {
    /// Formulation tag of the solver that produced it.
    pub formulation: String,
    /// Solver unknowns.
    pub unknowns: Vec<f64>,
    /// Applied bias per electrode (V).
    pub bias: BTreeMap<String, f64>,
}

/// Outcome of a MODEL assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelOutcome {
    pub matched: Vec<String>,
    /// Lattice temperature was switched on in regions that did not ask for it.
    pub forced_temperature: bool,
}

/// Node fields captured before a mesh rebuild.
pub struct FieldTransfer {
    entries: Vec<TransferEntry>,
}

struct TransferEntry {
    variable: String,
    region: String,
    mesh_region: usize,
    interp: Box<dyn Interpolator>,
}

impl FieldTransfer {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct variables carried.
    pub fn variables(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.variable.as_str()).collect()
    }
}

#[derive(Default)]
struct Carried {
    models: BTreeMap<String, (AdvancedModel, BTreeMap<String, PmiSelection>)>,
    circuits: BTreeMap<String, ExternalCircuit>,
}

#[derive(Default)]
pub struct SimulationSystem {
    mesh: Option<Mesh>,
    regions: Vec<Region>,
    boundaries: Vec<Boundary>,
    sources: SourceSet,
    sources_loaded: bool,
    field: FieldSource,
    doping_solver: Option<Box<dyn ProfileSolver>>,
    mole_solver: Option<Box<dyn ProfileSolver>>,
    nearest_electrode: Vec<Option<usize>>,
    operating_point: Option<OperatingPoint>,
    carried: Carried,
}

/// Compile a region pattern that must match the whole name.
pub fn region_pattern(pattern: &str) -> SystemResult<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| SystemError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn side_measure(mesh: &Mesh, nodes: &[usize]) -> f64 {
    let p = |k: usize| &mesh.nodes()[nodes[k]];
    match nodes.len() {
        2 => (0..3).map(|d| (p(1)[d] - p(0)[d]).powi(2)).sum::<f64>().sqrt(),
        3 => tri_area(p(0), p(1), p(2)),
        _ => 0.0,
    }
}

fn dist2(a: &Point, b: &Point) -> f64 {
    (0..3).map(|d| (a[d] - b[d]).powi(2)).sum()
}

impl SimulationSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_built(&self) -> bool {
        self.mesh.is_some()
    }

    /// Build regions, boundaries and sources on a prepared mesh.
    pub fn build(&mut self, mesh: &Mesh, deck: &Deck) -> SystemResult<()> {
        let faces = mesh.boundary_faces()?;

        let mut names = BTreeSet::new();
        let mut region_nodes: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); mesh.regions().len()];
        for cell in mesh.cells() {
            region_nodes[cell.region].extend(cell.nodes.iter().copied());
        }
        let mut regions = Vec::with_capacity(mesh.regions().len());
        for (i, info) in mesh.regions().iter().enumerate() {
            if !names.insert(info.name.clone()) {
                return Err(SystemError::Duplicate {
                    what: "region",
                    name: info.name.clone(),
                });
            }
            let nodes = std::mem::take(&mut region_nodes[i]).into_iter().collect();
            regions.push(Region::new(info.name.clone(), i, material(&info.material)?, nodes));
        }

        let mut by_label: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, f) in faces.iter().enumerate() {
            by_label.entry(f.label.as_str()).or_default().push(i);
        }
        let mut boundaries = Vec::with_capacity(by_label.len());
        for (label, idx) in by_label {
            if names.contains(label) {
                return Err(SystemError::Duplicate {
                    what: "boundary",
                    name: label.to_string(),
                });
            }
            let mut nodes = BTreeSet::new();
            let mut touching = BTreeSet::new();
            let mut extent = 0.0;
            for &k in &idx {
                let f = &faces[k];
                nodes.extend(f.nodes.iter().copied());
                touching.insert(mesh.cells()[f.cell].region);
                if let Some(nb) = f.neighbor {
                    touching.insert(mesh.cells()[nb].region);
                }
                extent += side_measure(mesh, &f.nodes);
            }
            boundaries.push(Boundary::new(
                label,
                default_kind(label),
                idx,
                nodes.into_iter().collect(),
                touching.into_iter().collect(),
                extent,
            ));
        }
        for card in deck.cards_with_key("BOUNDARY") {
            let id = card.require_string("id")?;
            let b = boundaries
                .iter_mut()
                .find(|b| b.name() == id)
                .ok_or(SystemError::UnknownBoundary { name: id })?;
            b.configure(card)?;
        }

        if !self.sources_loaded {
            for card in deck.cards().iter().filter(|c| c.key() == "VSOURCE" || c.key() == "ISOURCE") {
                self.sources.add(Source::from_card(card)?)?;
            }
            self.sources_loaded = true;
        }
        self.field = FieldSource::from_deck(deck)?;

        for r in &mut regions {
            if let Some((model, pmi)) = self.carried.models.remove(r.name()) {
                r.model = model;
                r.pmi = pmi;
            }
        }
        for b in &mut boundaries {
            if let Some(c) = self.carried.circuits.remove(b.name()) {
                b.circuit = c;
            }
        }
        self.carried = Carried::default();

        self.nearest_electrode = nearest_electrodes(mesh, &boundaries);
        info!(
            regions = regions.len(),
            boundaries = boundaries.len(),
            electrodes = boundaries.iter().filter(|b| b.is_electrode()).count(),
            "simulation system built"
        );
        self.regions = regions;
        self.boundaries = boundaries;
        self.mesh = Some(mesh.clone());
        Ok(())
    }

    /// Detach all mesh-bound state. Region models and electrode circuits
    /// are kept by name and restored by the next `build`; sources and
    /// profile solvers are kept as they are.
    pub fn clear(&mut self) {
        for r in self.regions.drain(..) {
            self.carried.models.insert(r.name().to_string(), (r.model, r.pmi));
        }
        for b in self.boundaries.drain(..) {
            self.carried.circuits.insert(b.name().to_string(), b.circuit);
        }
        self.mesh = None;
        self.nearest_electrode.clear();
        self.operating_point = None;
    }

    pub fn mesh(&self) -> SystemResult<&Mesh> {
        self.mesh.as_ref().ok_or(SystemError::NotBuilt)
    }

    pub fn regions(&self) -> SystemResult<&[Region]> {
        self.mesh()?;
        Ok(&self.regions)
    }

    pub fn regions_mut(&mut self) -> SystemResult<&mut [Region]> {
        self.mesh()?;
        Ok(&mut self.regions)
    }

    pub fn region(&self, name: &str) -> SystemResult<&Region> {
        self.regions()?
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| SystemError::UnknownRegion {
                name: name.to_string(),
            })
    }

    pub fn region_mut(&mut self, name: &str) -> SystemResult<&mut Region> {
        self.mesh()?;
        self.regions
            .iter_mut()
            .find(|r| r.name() == name)
            .ok_or_else(|| SystemError::UnknownRegion {
                name: name.to_string(),
            })
    }

    pub fn boundaries(&self) -> SystemResult<&[Boundary]> {
        self.mesh()?;
        Ok(&self.boundaries)
    }

    pub fn boundary(&self, name: &str) -> SystemResult<&Boundary> {
        self.boundaries()?
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| SystemError::UnknownBoundary {
                name: name.to_string(),
            })
    }

    pub fn boundary_mut(&mut self, name: &str) -> SystemResult<&mut Boundary> {
        self.mesh()?;
        self.boundaries
            .iter_mut()
            .find(|b| b.name() == name)
            .ok_or_else(|| SystemError::UnknownBoundary {
                name: name.to_string(),
            })
    }

    /// An electrode boundary; other boundaries are rejected.
    pub fn electrode(&self, name: &str) -> SystemResult<&Boundary> {
        let b = self.boundary(name)?;
        if !b.is_electrode() {
            return Err(SystemError::NotElectrode {
                name: name.to_string(),
            });
        }
        Ok(b)
    }

    pub fn is_electrode(&self, name: &str) -> bool {
        self.electrode(name).is_ok()
    }

    pub fn electrode_names(&self) -> Vec<String> {
        self.boundaries
            .iter()
            .filter(|b| b.is_electrode())
            .map(|b| b.name().to_string())
            .collect()
    }

    /// Electrodes belonging to a contact group.
    pub fn electrodes_in_contact(&self, contact: &str) -> SystemResult<Vec<String>> {
        let names: Vec<String> = self
            .boundaries()?
            .iter()
            .filter(|b| b.is_electrode() && b.contact() == Some(contact))
            .map(|b| b.name().to_string())
            .collect();
        if names.is_empty() {
            return Err(SystemError::NotElectrode {
                name: contact.to_string(),
            });
        }
        Ok(names)
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn field(&self) -> &FieldSource {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut FieldSource {
        &mut self.field
    }

    /// Assign `model` to every region whose name fully matches `pattern`.
    /// When any region then solves lattice temperature, all regions do.
    pub fn set_model(&mut self, pattern: &str, model: &AdvancedModel) -> SystemResult<ModelOutcome> {
        let re = region_pattern(pattern)?;
        self.mesh()?;
        let mut matched = Vec::new();
        for r in self.regions.iter_mut().filter(|r| re.is_match(r.name())) {
            r.model = model.clone();
            matched.push(r.name().to_string());
        }
        if matched.is_empty() {
            return Err(SystemError::NoMatch {
                pattern: pattern.to_string(),
            });
        }

        let mut forced_temperature = false;
        if self.regions.iter().any(|r| r.model.enable_tl()) {
            for r in &mut self.regions {
                if !r.model.enable_tl() {
                    r.model.force_temperature_usage();
                    forced_temperature = true;
                }
            }
        }
        if forced_temperature {
            warn!(pattern, "lattice temperature enabled in every region");
        }
        Ok(ModelOutcome {
            matched,
            forced_temperature,
        })
    }

    /// Select a physical-model interface `kind` for matching regions.
    pub fn set_pmi(&mut self, pattern: &str, kind: &str, selection: PmiSelection) -> SystemResult<usize> {
        let re = region_pattern(pattern)?;
        self.mesh()?;
        let mut count = 0;
        for r in self.regions.iter_mut().filter(|r| re.is_match(r.name())) {
            r.pmi.insert(kind.to_ascii_lowercase(), selection.clone());
            count += 1;
        }
        if count == 0 {
            return Err(SystemError::NoMatch {
                pattern: pattern.to_string(),
            });
        }
        debug!(pattern, kind, model = %selection.model, regions = count, "PMI selected");
        Ok(count)
    }

    /// Attach the same drive to several electrodes. Every name is checked
    /// before anything is attached.
    pub fn attach(&mut self, electrodes: &[String], attachment: Attachment) -> SystemResult<()> {
        for e in electrodes {
            self.electrode(e)?;
        }
        for e in electrodes {
            self.sources.attach(e, attachment.clone())?;
        }
        Ok(())
    }

    /// NODESET: initial potential of an electrode's external circuit.
    pub fn set_initial_potential(&mut self, electrode: &str, v: f64) -> SystemResult<()> {
        self.electrode(electrode)?;
        self.boundary_mut(electrode)?.circuit.potential = v;
        Ok(())
    }

    /// REGIONSET: fill `variable` of a region with `value * unit`.
    pub fn region_set(
        &mut self,
        region: &str,
        variable: &str,
        value: f64,
        unit: &str,
        reinit: bool,
    ) -> SystemResult<()> {
        let factor = unit_factor(unit)?;
        let r = self.region_mut(region)?;
        r.fill_variable(variable, value * factor)?;
        if reinit {
            r.init_equilibrium();
        }
        Ok(())
    }

    /// BOUNDARYSET: set a boundary scalar to `value * unit`.
    pub fn boundary_set(&mut self, boundary: &str, variable: &str, value: f64, unit: &str) -> SystemResult<()> {
        let factor = unit_factor(unit)?;
        self.boundary_mut(boundary)?.set_scalar(variable, value * factor)
    }

    /// Create profile solvers from PROFILE/MOLE cards, keeping existing ones.
    pub fn attach_profile_solvers(&mut self, deck: &Deck) -> SystemResult<()> {
        if self.doping_solver.is_none()
            && let Some(s) = DopingAnalytic::from_deck(deck)?
        {
            self.doping_solver = Some(Box::new(s));
        }
        if self.mole_solver.is_none()
            && let Some(s) = MoleAnalytic::from_deck(deck)?
        {
            self.mole_solver = Some(Box::new(s));
        }
        Ok(())
    }

    pub fn has_doping_solver(&self) -> bool {
        self.doping_solver.is_some()
    }

    pub fn has_mole_solver(&self) -> bool {
        self.mole_solver.is_some()
    }

    /// Run attached profile solvers; returns their names.
    pub fn run_profile_solvers(&mut self) -> SystemResult<Vec<&'static str>> {
        let mesh = self.mesh.as_ref().ok_or(SystemError::NotBuilt)?;
        let mut ran = Vec::new();
        for solver in [&self.doping_solver, &self.mole_solver].into_iter().flatten() {
            solver.solve(mesh, &mut self.regions)?;
            ran.push(solver.name());
        }
        Ok(ran)
    }

    pub fn has_single_compound_region(&self) -> bool {
        self.regions.iter().any(|r| r.material().compound == Compound::Single)
    }

    pub fn has_complex_compound_region(&self) -> bool {
        self.regions.iter().any(|r| r.material().compound == Compound::Complex)
    }

    /// Recompute equilibrium carriers and potential in every region.
    pub fn init_regions(&mut self) -> SystemResult<()> {
        self.mesh()?;
        for r in &mut self.regions {
            r.init_equilibrium();
        }
        Ok(())
    }

    /// Fill interpolators with `variable` from every region carrying it.
    pub fn capture_fields(&self, variables: &[&str], law: InterpolationLaw) -> SystemResult<FieldTransfer> {
        let mesh = self.mesh()?;
        let mut entries = Vec::new();
        for &variable in variables {
            for r in self.regions.iter().filter(|r| r.has_variable(variable) && r.n_nodes() > 0) {
                let mut values = vec![0.0; mesh.n_nodes()];
                for (&n, &v) in r.nodes().iter().zip(r.variable(variable)?) {
                    values[n] = v;
                }
                let mut interp = interpolator_for(mesh.dim(), law);
                interp.fill(mesh, r.index(), &values)?;
                entries.push(TransferEntry {
                    variable: variable.to_string(),
                    region: r.name().to_string(),
                    mesh_region: r.index(),
                    interp,
                });
            }
        }
        Ok(FieldTransfer { entries })
    }

    /// Evaluate captured fields at the nodes of the rebuilt regions with the
    /// same name. Returns the number of region fields restored.
    pub fn restore_fields(&mut self, transfer: &FieldTransfer) -> SystemResult<usize> {
        let mesh = self.mesh.as_ref().ok_or(SystemError::NotBuilt)?;
        let mut restored = 0;
        for e in &transfer.entries {
            let Some(r) = self.regions.iter_mut().find(|r| r.name() == e.region) else {
                continue;
            };
            if !r.has_variable(&e.variable) {
                continue;
            }
            let points: Vec<Point> = r.nodes().iter().map(|&n| mesh.nodes()[n]).collect();
            let values = e.interp.evaluate_all(e.mesh_region, &points)?;
            r.set_variable(&e.variable, values)?;
            restored += 1;
        }
        debug!(restored, "fields interpolated onto rebuilt mesh");
        Ok(restored)
    }

    pub fn estimate_error(&self, variable: &str, measure: Measure) -> SystemResult<Vec<f64>> {
        estimate_error(self.mesh()?, &self.regions, variable, measure)
    }

    /// Re-evaluate optical/particle generation at time `t`.
    pub fn update_source(&mut self, t: f64) -> SystemResult<()> {
        let mesh = self.mesh.as_ref().ok_or(SystemError::NotBuilt)?;
        self.field.set_time(t);
        self.field.update_source(mesh, &mut self.regions)
    }

    pub fn operating_point(&self) -> Option<&OperatingPoint> {
        self.operating_point.as_ref()
    }

    pub fn set_operating_point(&mut self, op: OperatingPoint) {
        self.operating_point = Some(op);
    }

    /// Electrode nearest to a mesh node.
    pub fn nearest_electrode(&self, node: usize) -> Option<&Boundary> {
        self.nearest_electrode
            .get(node)
            .copied()
            .flatten()
            .map(|b| &self.boundaries[b])
    }

    /// Record converged terminal state and refresh node potentials: each
    /// node takes its equilibrium potential shifted by the bias of the
    /// nearest electrode.
    pub fn apply_solution(
        &mut self,
        bias: &BTreeMap<String, f64>,
        currents: &BTreeMap<String, f64>,
    ) -> SystemResult<()> {
        self.mesh()?;
        for b in &mut self.boundaries {
            if let Some(&v) = bias.get(b.name()) {
                b.circuit.bias = v;
            }
            if let Some(&i) = currents.get(b.name()) {
                b.circuit.current = i;
            }
        }
        let shift: Vec<f64> = self
            .nearest_electrode
            .iter()
            .map(|e| {
                e.and_then(|b| bias.get(self.boundaries[b].name()))
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect();
        for r in &mut self.regions {
            let t = r.mean("temperature")?;
            let base: Vec<f64> = match r.class() {
                MaterialClass::Semiconductor => r
                    .variable("doping")?
                    .iter()
                    .map(|&d| r.equilibrium_potential(d, t))
                    .collect(),
                _ => vec![0.0; r.n_nodes()],
            };
            let psi = base
                .iter()
                .zip(r.nodes())
                .map(|(b, &n)| b + shift[n])
                .collect();
            r.set_variable("potential", psi)?;
        }
        Ok(())
    }

    /// Semiconductor regions grouped by shared nodes (mesh region indices).
    pub fn semiconductor_components(&self) -> Vec<Vec<usize>> {
        let semis: Vec<&Region> = self
            .regions
            .iter()
            .filter(|r| r.class() == MaterialClass::Semiconductor && r.n_nodes() > 0)
            .collect();
        let mut parent: Vec<usize> = (0..semis.len()).collect();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        for a in 0..semis.len() {
            for b in a + 1..semis.len() {
                let touching = semis[a].nodes().iter().any(|&n| semis[b].local_index(n).is_some());
                if touching {
                    let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                    parent[ra] = rb;
                }
            }
        }
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..semis.len() {
            let root = find(&mut parent, i);
            groups.entry(root).or_default().push(semis[i].index());
        }
        groups.into_values().collect()
    }

    /// Replace region variables and electrode state from a snapshot whose
    /// mesh has already been broadcast and built.
    pub fn load_snapshot_fields(&mut self, snapshot: &Snapshot) -> SystemResult<()> {
        self.mesh()?;
        for rec in &snapshot.regions {
            let r = self.region_mut(&rec.name)?;
            for (name, values) in &rec.variables {
                if r.has_variable(name) {
                    r.set_variable(name, values.clone())?;
                }
            }
        }
        for (name, circuit) in &snapshot.electrodes {
            self.boundary_mut(name)?.circuit = circuit.clone();
        }
        Ok(())
    }
}

fn nearest_electrodes(mesh: &Mesh, boundaries: &[Boundary]) -> Vec<Option<usize>> {
    let anchors: Vec<(usize, Point)> = boundaries
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_electrode())
        .flat_map(|(i, b)| b.nodes().iter().map(move |&n| (i, mesh.nodes()[n])))
        .collect();
    mesh.nodes()
        .par_iter()
        .map(|p| {
            anchors
                .iter()
                .min_by(|a, b| dist2(p, &a.1).total_cmp(&dist2(p, &b.1)))
                .map(|a| a.0)
        })
        .collect()
}
