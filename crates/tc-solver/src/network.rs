//! Lumped device network.
//!
//! The device is reduced to a small circuit: one node per electrode, a
//! junction diode with bulk series resistance between electrodes that sit on
//! oppositely doped parts of a semiconductor component, a resistor between
//! electrodes on like-doped parts, oxide capacitors from gate contacts and
//! metal links through conductor regions. The unknowns are the node
//! potentials followed by the lattice temperature when self-heating is on.

use crate::error::{SolverError, SolverResult};
use crate::method::EquationTolerances;
use nalgebra::{DMatrix, DVector};
use tc_core::constants::{Q, T_AMBIENT, thermal_voltage};
use tc_core::{limited_exp, limited_exp_deriv};
use tc_system::{Boundary, Drive, Material, MaterialClass, Region, SimulationSystem};
use tracing::debug;

const UM_TO_CM: f64 = 1e-4;
/// Depth assumed for two-dimensional devices (µm).
const DEPTH_2D: f64 = 1.0;
const MAX_EXP_ARG: f64 = 40.0;
/// Conductance of a link through a conductor region (S).
const METAL_CONDUCTANCE: f64 = 1e3;
/// Minority carrier lifetime behind the diffusion capacitance (s).
const CARRIER_LIFETIME: f64 = 1e-7;
/// Forward-bias depletion capacitance linearisation point (fraction of Vbi).
const DEPLETION_FC: f64 = 0.5;
/// Volumetric heat capacity of the semiconductor (J/cm³/K).
const HEAT_CAPACITY: f64 = 1.63;
/// Ideal voltage rows are scaled as if their tolerance were this (V).
const VOLTAGE_TOL: f64 = 1e-9;

#[derive(Clone, Debug)]
pub struct Terminal {
    pub name: String,
    /// Series resistance of the external circuit (Ohm); zero is an ideal
    /// source.
    pub resistance: f64,
    /// Initial potential (NODESET) used for current-driven guesses.
    pub initial_potential: f64,
    centroid: [f64; 3],
    /// Contact area (cm²).
    area: f64,
}

impl Terminal {
    pub fn area(&self) -> f64 {
        self.area
    }
}

#[derive(Clone, Debug)]
struct Junction {
    /// Internal p-side node behind the bulk resistance.
    anode: usize,
    /// n-side terminal node.
    cathode: usize,
    material: Material,
    area: f64,
    na: f64,
    nd: f64,
    /// Quasi-neutral widths (cm).
    wp: f64,
    wn: f64,
    component: usize,
    photo_share: f64,
}

impl Junction {
    fn saturation_current(&self, t: f64) -> f64 {
        let vt = thermal_voltage(t);
        let ni = self.material.ni_at(t);
        let dn = self.material.mobility[0] * vt;
        let dp = self.material.mobility[1] * vt;
        Q * self.area * ni * ni * (dn / (self.wp * self.na) + dp / (self.wn * self.nd))
    }

    fn current(&self, v: f64, t: f64, photo: f64) -> f64 {
        let vt = thermal_voltage(t);
        self.saturation_current(t) * (limited_exp(v / vt, MAX_EXP_ARG) - 1.0) - photo
    }

    fn capacitance(&self, v: f64, t: f64) -> f64 {
        let vt = thermal_voltage(t);
        let ni = self.material.ni_at(t);
        let vbi = (vt * (self.na * self.nd / (ni * ni)).ln()).max(0.1);
        let cj0 = self.area
            * (Q * self.material.epsilon() * self.na * self.nd / (2.0 * (self.na + self.nd) * vbi)).sqrt();
        let cj = if v < DEPLETION_FC * vbi {
            cj0 / (1.0 - v / vbi).sqrt()
        } else {
            // grading 1/2 continued linearly past FC·Vbi
            cj0 / (1.0 - DEPLETION_FC).powf(1.5) * (1.0 - 1.5 * DEPLETION_FC + 0.5 * v / vbi)
        };
        let cd = CARRIER_LIFETIME * self.saturation_current(t) / vt * limited_exp_deriv(v / vt, MAX_EXP_ARG);
        cj + cd
    }
}

#[derive(Clone, Debug)]
enum Element {
    Conductance { a: usize, b: Option<usize>, g: f64 },
    Diode(Junction),
    Capacitance { a: usize, b: Option<usize>, c: f64 },
}

#[derive(Clone, Copy, Debug)]
struct Thermal {
    /// Conductance to the heat sink (W/K).
    conductance: f64,
    /// Heat capacity (J/K).
    capacity: f64,
    ambient: f64,
}

/// Discretised time derivative `dx/dt ≈ a0·x + history`.
#[derive(Clone, Debug, PartialEq)]
pub struct Dynamics {
    pub a0: f64,
    pub history: Vec<f64>,
    /// Extra capacitance on every potential node (pseudo-time relaxation).
    pub pseudo_capacitance: f64,
}

/// Everything that drives one network evaluation besides the unknowns.
#[derive(Clone, Copy, Debug)]
pub struct Excitation<'a> {
    /// Drive per terminal, in terminal order.
    pub drives: &'a [Drive],
    pub gmin: f64,
    /// Scale factors of the optical and particle generation.
    pub optical: f64,
    pub particle: f64,
    pub dynamics: Option<&'a Dynamics>,
}

#[derive(Clone, Debug)]
pub struct DeviceNetwork {
    terminals: Vec<Terminal>,
    /// Terminal each internal node hangs off, for initial guesses.
    internal: Vec<usize>,
    elements: Vec<Element>,
    thermal: Option<Thermal>,
    /// Lattice temperature of an isothermal network (K).
    temperature: f64,
    /// Photocurrent (A) per semiconductor component at unit scale, optical
    /// and particle.
    generation: Vec<[f64; 2]>,
    component_regions: Vec<Vec<usize>>,
    tolerances: EquationTolerances,
}

fn centroid(points: impl Iterator<Item = [f64; 3]>) -> [f64; 3] {
    let mut c = [0.0; 3];
    let mut n = 0usize;
    for p in points {
        for d in 0..3 {
            c[d] += p[d];
        }
        n += 1;
    }
    if n > 0 {
        for v in &mut c {
            *v /= n as f64;
        }
    }
    c
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Mean net doping at the boundary nodes lying in `regions`, or `None` when
/// the boundary does not touch them.
fn contact_doping(b: &Boundary, regions: &[&Region]) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for r in regions {
        let Ok(doping) = r.variable("doping") else {
            continue;
        };
        for &node in b.nodes() {
            if let Some(k) = r.local_index(node) {
                sum += doping[k];
                n += 1;
            }
        }
    }
    (n > 0).then(|| sum / n as f64)
}

fn touches(b: &Boundary, r: &Region) -> bool {
    b.nodes().iter().any(|&n| r.local_index(n).is_some())
}

fn resistivity(material: &Material, net: f64, t: f64) -> f64 {
    let ni = material.ni_at(t);
    let [mun, mup] = material.mobility;
    if net.abs() <= ni {
        return 1.0 / (Q * ni * (mun + mup));
    }
    let mu = if net > 0.0 { mun } else { mup };
    1.0 / (Q * net.abs() * mu)
}

impl DeviceNetwork {
    /// Build the network from a built system. `self_heating` adds the
    /// lattice temperature unknown.
    pub fn build(
        system: &SimulationSystem,
        tolerances: &EquationTolerances,
        self_heating: bool,
    ) -> SolverResult<Self> {
        let mesh = system.mesh()?;
        let regions = system.regions()?;
        let boundaries = system.boundaries()?;
        let depth = if mesh.dim() == 2 { DEPTH_2D } else { 1.0 };
        let region_at = |idx: usize| regions.iter().find(|r| r.index() == idx);

        let electrodes: Vec<&Boundary> = boundaries.iter().filter(|b| b.is_electrode()).collect();
        if electrodes.is_empty() {
            return Err(SolverError::ProblemSetup {
                what: "device has no electrode".to_string(),
            });
        }
        let terminals: Vec<Terminal> = electrodes
            .iter()
            .map(|b| {
                let extent = if b.extent() > 0.0 { b.extent() } else { 1.0 };
                let area = if mesh.dim() == 2 { extent * DEPTH_2D } else { extent } * UM_TO_CM * UM_TO_CM;
                Terminal {
                    name: b.name().to_string(),
                    resistance: b.circuit.resistance.max(0.0),
                    initial_potential: b.circuit.potential,
                    centroid: centroid(b.nodes().iter().map(|&n| mesh.nodes()[n])),
                    area,
                }
            })
            .collect();

        let temperature = {
            let semis: Vec<f64> = regions
                .iter()
                .filter(|r| r.class() == MaterialClass::Semiconductor)
                .filter_map(|r| r.mean("temperature").ok())
                .collect();
            if semis.is_empty() {
                T_AMBIENT
            } else {
                semis.iter().sum::<f64>() / semis.len() as f64
            }
        };

        let mut elements = Vec::new();
        let mut internal = Vec::new();
        let n_terminals = terminals.len();
        let components = system.semiconductor_components();
        let mut diodes_per_component = vec![0usize; components.len()];

        for (ci, component) in components.iter().enumerate() {
            let members: Vec<&Region> = component.iter().filter_map(|&i| region_at(i)).collect();
            let contacts: Vec<(usize, f64, Material)> = electrodes
                .iter()
                .enumerate()
                .filter_map(|(ti, b)| {
                    let doping = contact_doping(b, &members)?;
                    let material = *members.iter().find(|r| touches(b, r))?.material();
                    Some((ti, doping, material))
                })
                .collect();

            for (a, &(ti, ni_dop, mat)) in contacts.iter().enumerate() {
                for &(tj, nj_dop, _) in &contacts[a + 1..] {
                    let d_cm = distance(&terminals[ti].centroid, &terminals[tj].centroid) * UM_TO_CM;
                    if d_cm <= 0.0 {
                        continue;
                    }
                    let area = terminals[ti].area.min(terminals[tj].area);
                    if ni_dop * nj_dop < 0.0 {
                        let (p, n, na, nd) = if ni_dop < 0.0 {
                            (ti, tj, -ni_dop, nj_dop)
                        } else {
                            (tj, ti, -nj_dop, ni_dop)
                        };
                        let ni = mat.ni_at(temperature);
                        let (na, nd) = (na.max(ni), nd.max(ni));
                        let half = 0.5 * d_cm;
                        let bulk = (resistivity(&mat, -na, temperature) + resistivity(&mat, nd, temperature)) * half
                            / area;
                        let node = n_terminals + internal.len();
                        internal.push(p);
                        elements.push(Element::Conductance {
                            a: p,
                            b: Some(node),
                            g: 1.0 / bulk,
                        });
                        elements.push(Element::Diode(Junction {
                            anode: node,
                            cathode: n,
                            material: mat,
                            area,
                            na,
                            nd,
                            wp: half,
                            wn: half,
                            component: ci,
                            photo_share: 0.0,
                        }));
                        diodes_per_component[ci] += 1;
                        debug!(anode = %terminals[p].name, cathode = %terminals[n].name, na, nd, "junction");
                    } else {
                        let net = 0.5 * (ni_dop + nj_dop).signum() * (ni_dop.abs() + nj_dop.abs());
                        let rho = resistivity(&mat, net, temperature);
                        elements.push(Element::Conductance {
                            a: ti,
                            b: Some(tj),
                            g: area / (rho * d_cm),
                        });
                    }
                }
            }
        }
        for e in &mut elements {
            if let Element::Diode(j) = e {
                j.photo_share = 1.0 / diodes_per_component[j.component].max(1) as f64;
            }
        }

        // gate contacts: oxide capacitance to the terminals of the
        // semiconductor under the insulator, or to ground
        for (ti, b) in electrodes.iter().enumerate() {
            let touched: Vec<&Region> = b.regions().iter().filter_map(|&i| region_at(i)).collect();
            if touched.iter().any(|r| r.class() == MaterialClass::Semiconductor) {
                continue;
            }
            let Some(oxide) = touched.iter().find(|r| r.class() == MaterialClass::Insulator) else {
                continue;
            };
            let under: Vec<&Region> = regions
                .iter()
                .filter(|r| r.class() == MaterialClass::Semiconductor)
                .filter(|r| oxide.nodes().iter().any(|&n| r.local_index(n).is_some()))
                .collect();
            let interface: Vec<usize> = oxide
                .nodes()
                .iter()
                .copied()
                .filter(|&n| under.iter().any(|r| r.local_index(n).is_some()))
                .collect();
            let t_ox = interface
                .iter()
                .map(|&n| distance(&terminals[ti].centroid, &mesh.nodes()[n]))
                .fold(f64::MAX, f64::min);
            if interface.is_empty() || t_ox <= 0.0 {
                debug!(gate = b.name(), "gate contact without semiconductor interface");
                continue;
            }
            let c_ox = oxide.material().epsilon() * terminals[ti].area / (t_ox * UM_TO_CM);
            let targets: Vec<usize> = electrodes
                .iter()
                .enumerate()
                .filter(|(tj, other)| *tj != ti && under.iter().any(|r| touches(other, r)))
                .map(|(tj, _)| tj)
                .collect();
            if targets.is_empty() {
                elements.push(Element::Capacitance { a: ti, b: None, c: c_ox });
            } else {
                let share = c_ox / targets.len() as f64;
                for tj in targets {
                    elements.push(Element::Capacitance {
                        a: ti,
                        b: Some(tj),
                        c: share,
                    });
                }
            }
            debug!(gate = b.name(), kind = b.kind().name(), c_ox, "oxide capacitance");
        }

        for r in regions.iter().filter(|r| r.class() == MaterialClass::Conductor) {
            let linked: Vec<usize> = electrodes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.regions().contains(&r.index()))
                .map(|(i, _)| i)
                .collect();
            for pair in linked.windows(2) {
                elements.push(Element::Conductance {
                    a: pair[0],
                    b: Some(pair[1]),
                    g: METAL_CONDUCTANCE,
                });
            }
        }

        for (ti, b) in electrodes.iter().enumerate() {
            if b.circuit.capacitance > 0.0 {
                elements.push(Element::Capacitance {
                    a: ti,
                    b: None,
                    c: b.circuit.capacitance,
                });
            }
        }

        let thermal = self_heating.then(|| {
            let nodes = mesh.nodes();
            let mut lo = [f64::MAX; 3];
            let mut hi = [f64::MIN; 3];
            for p in nodes {
                for d in 0..3 {
                    lo[d] = lo[d].min(p[d]);
                    hi[d] = hi[d].max(p[d]);
                }
            }
            let spread = if nodes.is_empty() { 1.0 } else { distance(&lo, &hi) };
            let length = (0.5 * spread * UM_TO_CM).max(UM_TO_CM);
            let mut conductance: f64 = electrodes
                .iter()
                .zip(&terminals)
                .map(|(b, t)| {
                    let kappa = b
                        .regions()
                        .iter()
                        .filter_map(|&i| region_at(i))
                        .map(|r| r.material().kappa)
                        .fold(0.0, f64::max);
                    kappa * t.area / length
                })
                .sum();
            conductance += boundaries
                .iter()
                .map(|b| {
                    let h = b.scalar("heat.transfer").unwrap_or(0.0);
                    let area = if mesh.dim() == 2 { b.extent() * DEPTH_2D } else { b.extent() };
                    h * area * UM_TO_CM * UM_TO_CM
                })
                .sum::<f64>();
            let volume: f64 = mesh
                .cells()
                .iter()
                .enumerate()
                .filter(|(_, c)| region_at(c.region).is_some_and(|r| r.class() == MaterialClass::Semiconductor))
                .map(|(i, _)| mesh.cell_measure(i) * depth)
                .sum::<f64>()
                * UM_TO_CM.powi(3);
            let ambients: Vec<f64> = electrodes
                .iter()
                .filter_map(|b| b.scalar("ext.temperature").ok())
                .collect();
            let ambient = if ambients.is_empty() {
                T_AMBIENT
            } else {
                ambients.iter().sum::<f64>() / ambients.len() as f64
            };
            Thermal {
                conductance: if conductance > 0.0 { conductance } else { 1e-3 },
                capacity: HEAT_CAPACITY * volume,
                ambient,
            }
        });

        let mut network = Self {
            terminals,
            internal,
            elements,
            thermal,
            temperature,
            generation: vec![[0.0; 2]; components.len()],
            component_regions: components,
            tolerances: tolerances.clone(),
        };
        network.refresh_generation(system)?;
        debug!(
            terminals = network.terminals.len(),
            nodes = network.n_nodes(),
            elements = network.elements.len(),
            thermal = network.thermal.is_some(),
            "device network built"
        );
        Ok(network)
    }

    /// Re-integrate the optical and particle generation of every
    /// semiconductor component into photocurrents.
    pub fn refresh_generation(&mut self, system: &SimulationSystem) -> SolverResult<()> {
        let mesh = system.mesh()?;
        let regions = system.regions()?;
        let depth = if mesh.dim() == 2 { DEPTH_2D } else { 1.0 };
        for (ci, component) in self.component_regions.iter().enumerate() {
            let mut total = [0.0; 2];
            for (cell_idx, cell) in mesh.cells().iter().enumerate() {
                if !component.contains(&cell.region) {
                    continue;
                }
                let Some(region) = regions.iter().find(|r| r.index() == cell.region) else {
                    continue;
                };
                let volume = mesh.cell_measure(cell_idx) * depth * UM_TO_CM.powi(3);
                for (slot, var) in total.iter_mut().zip(["optical.gen", "particle.gen"]) {
                    let Ok(values) = region.variable(var) else {
                        continue;
                    };
                    let mean = cell
                        .nodes
                        .iter()
                        .filter_map(|&n| region.local_index(n).map(|k| values[k]))
                        .sum::<f64>()
                        / cell.nodes.len().max(1) as f64;
                    *slot += Q * mean * volume;
                }
            }
            self.generation[ci] = total;
        }
        Ok(())
    }

    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    pub fn terminal_index(&self, name: &str) -> Option<usize> {
        self.terminals.iter().position(|t| t.name == name)
    }

    pub fn n_nodes(&self) -> usize {
        self.terminals.len() + self.internal.len()
    }

    pub fn n_unknowns(&self) -> usize {
        self.n_nodes() + usize::from(self.thermal.is_some())
    }

    pub fn is_thermal(&self) -> bool {
        self.thermal.is_some()
    }

    pub fn lattice_temperature(&self, x: &DVector<f64>) -> f64 {
        match self.thermal {
            Some(_) => x[self.n_nodes()],
            None => self.temperature,
        }
    }

    /// Starting point: driven terminals at their voltage, current-driven ones
    /// at their initial potential, internal nodes at their terminal.
    pub fn initial_guess(&self, drives: &[Drive]) -> DVector<f64> {
        let mut x = DVector::zeros(self.n_unknowns());
        for (i, t) in self.terminals.iter().enumerate() {
            x[i] = match drives.get(i) {
                Some(Drive::Voltage(v)) => *v,
                _ => t.initial_potential,
            };
        }
        for (k, &owner) in self.internal.iter().enumerate() {
            x[self.terminals.len() + k] = x[owner];
        }
        if let Some(th) = self.thermal {
            x[self.n_nodes()] = th.ambient;
        }
        x
    }

    fn photocurrent(&self, j: &Junction, optical: f64, particle: f64) -> f64 {
        let [g_opt, g_par] = self.generation[j.component];
        j.photo_share * (optical * g_opt + particle * g_par)
    }

    /// Unscaled static balance: current leaving every node through the
    /// device (A), then the heat balance (W) when self-heating is on.
    pub fn static_rows(&self, x: &DVector<f64>, gmin: f64, optical: f64, particle: f64) -> DVector<f64> {
        let n_nodes = self.n_nodes();
        let t = self.lattice_temperature(x);
        let v = |n: Option<usize>| n.map_or(0.0, |k| x[k]);
        let mut f = DVector::zeros(self.n_unknowns());
        let mut power = 0.0;
        for e in &self.elements {
            match e {
                Element::Conductance { a, b, g } => {
                    let drop = x[*a] - v(*b);
                    let i = g * drop;
                    f[*a] += i;
                    if let Some(b) = b {
                        f[*b] -= i;
                    }
                    power += i * drop;
                }
                Element::Diode(j) => {
                    let drop = x[j.anode] - x[j.cathode];
                    let i = j.current(drop, t, self.photocurrent(j, optical, particle));
                    f[j.anode] += i;
                    f[j.cathode] -= i;
                    power += i * drop;
                }
                Element::Capacitance { .. } => {}
            }
        }
        for k in 0..n_nodes {
            f[k] += gmin * x[k];
        }
        if let Some(th) = self.thermal {
            f[n_nodes] = th.conductance * (t - th.ambient) - power;
        }
        f
    }

    /// Small-signal capacitance matrix at `x` (F, and J/K for temperature).
    pub fn capacitance_matrix(&self, x: &DVector<f64>) -> DMatrix<f64> {
        fn stamp(c: &mut DMatrix<f64>, a: usize, b: Option<usize>, value: f64) {
            c[(a, a)] += value;
            if let Some(b) = b {
                c[(b, b)] += value;
                c[(a, b)] -= value;
                c[(b, a)] -= value;
            }
        }
        let n = self.n_unknowns();
        let t = self.lattice_temperature(x);
        let mut c = DMatrix::zeros(n, n);
        for e in &self.elements {
            match e {
                Element::Capacitance { a, b, c: value } => stamp(&mut c, *a, *b, *value),
                Element::Diode(j) => {
                    let value = j.capacitance(x[j.anode] - x[j.cathode], t);
                    stamp(&mut c, j.anode, Some(j.cathode), value);
                }
                Element::Conductance { .. } => {}
            }
        }
        if let Some(th) = self.thermal {
            let k = self.n_nodes();
            c[(k, k)] += th.capacity;
        }
        c
    }

    fn dynamic_rows(&self, x: &DVector<f64>, dynamics: &Dynamics) -> SolverResult<DVector<f64>> {
        if dynamics.history.len() != x.len() {
            return Err(SolverError::InvalidState {
                what: format!(
                    "time history holds {} values for {} unknowns",
                    dynamics.history.len(),
                    x.len()
                ),
            });
        }
        let history = DVector::from_column_slice(&dynamics.history);
        let dxdt = x * dynamics.a0 + history;
        let mut rows = self.capacitance_matrix(x) * &dxdt;
        for k in 0..self.n_nodes() {
            rows[k] += dynamics.pseudo_capacitance * dxdt[k];
        }
        Ok(rows)
    }

    fn balance(&self, x: &DVector<f64>, exc: &Excitation) -> SolverResult<DVector<f64>> {
        let mut f = self.static_rows(x, exc.gmin, exc.optical, exc.particle);
        if let Some(dynamics) = exc.dynamics {
            f += self.dynamic_rows(x, dynamics)?;
        }
        Ok(f)
    }

    /// Residual scaled by the equation tolerances; a norm of one is at
    /// tolerance.
    pub fn residual(&self, x: &DVector<f64>, exc: &Excitation) -> SolverResult<DVector<f64>> {
        let f = self.balance(x, exc)?;
        let tol_i = self.tolerances.electrode;
        let mut r = &f / tol_i;
        for (i, term) in self.terminals.iter().enumerate() {
            let drive = exc.drives.get(i).copied().unwrap_or(Drive::Voltage(0.0));
            r[i] = match drive {
                Drive::Voltage(v) if term.resistance > 0.0 => (f[i] + (x[i] - v) / term.resistance) / tol_i,
                Drive::Voltage(v) => (x[i] - v) / VOLTAGE_TOL,
                Drive::Current(c) => (f[i] - c) / tol_i,
            };
        }
        if self.thermal.is_some() {
            let k = self.n_nodes();
            r[k] = f[k] / self.tolerances.lattice_temperature;
        }
        Ok(r)
    }

    /// Current flowing into the device at every terminal (A).
    pub fn terminal_currents(&self, x: &DVector<f64>, exc: &Excitation) -> SolverResult<Vec<f64>> {
        let f = self.balance(x, exc)?;
        Ok((0..self.terminals.len()).map(|i| f[i]).collect())
    }
}
